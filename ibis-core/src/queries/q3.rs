//! Q3: top-k person pairs by shared interests around a place
//!
//! The place name resolves to one or more hierarchy intervals (merged
//! into a minimal disjoint set); every person with a matching place
//! becomes a seed for a depth-limited BFS, pairs are counted once
//! (`friend > seed`), and the interest intersection runs over the sorted
//! lists.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::index::FileIndexes;
use crate::model::{PersonId, PlaceBounds};
use crate::structures::{simd, TopKList};

type PersonPair = (u64, u64);
type Entry = (PersonPair, u32);

/// Shared-count descending, pair ascending.
fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Widen `existing` to cover `other` when the intervals overlap.
/// Returns whether `other` is now covered.
fn merge_bounds(existing: &mut PlaceBounds, other: &PlaceBounds) -> bool {
    if other.lower <= existing.lower {
        if other.upper >= existing.lower {
            existing.lower = other.lower;
            if other.upper > existing.upper {
                existing.upper = other.upper;
            }
            true
        } else {
            false
        }
    } else if other.upper >= existing.upper {
        if other.lower <= existing.upper {
            existing.upper = other.upper;
            true
        } else {
            false
        }
    } else {
        // Fully contained.
        true
    }
}

pub struct QueryRunner<'a> {
    indexes: &'a FileIndexes,
    num_persons: u32,
    person_filter: Vec<bool>,
    seen: Vec<bool>,
    queue: VecDeque<(PersonId, u32)>,
    bfs_results: Vec<PersonId>,
    seeds: Vec<(PersonId, u32)>,
}

impl<'a> QueryRunner<'a> {
    pub fn new(indexes: &'a FileIndexes) -> Self {
        let num_persons = indexes.person_mapper().count();
        QueryRunner {
            indexes,
            num_persons,
            person_filter: vec![false; num_persons as usize],
            seen: vec![false; num_persons as usize],
            queue: VecDeque::new(),
            bfs_results: Vec::new(),
            seeds: Vec::new(),
        }
    }

    /// Disjoint interval set covering every place with the given name.
    fn resolve_place(&self, place: &str) -> Vec<PlaceBounds> {
        let mut merged: Vec<PlaceBounds> = Vec::new();
        let Some(places) = self.indexes.name_places().get(place) else {
            return merged;
        };
        let bounds_index = self.indexes.place_bounds();
        for place_id in places {
            let Some(current) = bounds_index.get(place_id) else {
                log::warn!("place {place_id} is missing from the hierarchy");
                continue;
            };
            let mut covered = false;
            for existing in merged.iter_mut() {
                covered |= merge_bounds(existing, current);
            }
            if !covered {
                merged.push(*current);
            }
        }
        // Widening can make previously disjoint intervals touch.
        let mut restart = merged.len() > 1;
        while restart {
            restart = false;
            'outer: for a in 0..merged.len() - 1 {
                for b in a + 1..merged.len() {
                    let other = merged[b];
                    if merge_bounds(&mut merged[a], &other) {
                        merged.remove(b);
                        restart = merged.len() > 1;
                        break 'outer;
                    }
                }
            }
        }
        merged
    }

    /// Seeds ordered by interest count descending (richer lists can reach
    /// higher shared counts, improving the bound early).
    fn build_person_filter(&mut self, bounds: &[PlaceBounds]) {
        let person_places = self.indexes.person_places();
        let interests = self.indexes.has_interest();
        self.person_filter.fill(false);
        self.seeds.clear();
        for person in 0..self.num_persons {
            let at_place = bounds
                .iter()
                .any(|b| person_places.person_at_place(person, *b));
            if at_place {
                self.person_filter[person as usize] = true;
                self.seeds.push((person, interests.degree(person)));
            }
        }
        self.seeds
            .sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    }

    /// Depth-limited BFS collecting filtered persons with an id above the
    /// seed, so each pair is enumerated exactly once.
    fn run_bfs(&mut self, seed: PersonId, hops: u32) {
        let graph = self.indexes.person_graph();
        self.seen.fill(false);
        self.seen[seed as usize] = true;
        self.bfs_results.clear();
        self.queue.clear();
        self.queue.push_back((seed, 0));

        while let Some((person, distance)) = self.queue.pop_front() {
            if distance + 1 > hops {
                self.queue.clear();
                return;
            }
            let Some(friends) = graph.list(person) else {
                continue;
            };
            for &friend in friends.entries() {
                if self.seen[friend as usize] {
                    continue;
                }
                if friend > seed && self.person_filter[friend as usize] {
                    self.bfs_results.push(friend);
                }
                self.seen[friend as usize] = true;
                self.queue.push_back((friend, distance + 1));
            }
        }
    }

    pub fn run(&mut self, k: u32, hops: u32, place: &str) -> String {
        let bounds = self.resolve_place(place);
        if bounds.is_empty() {
            return String::new();
        }
        self.build_person_filter(&bounds);

        let mapper = self.indexes.person_mapper();
        let interests = self.indexes.has_interest();
        let mut top: TopKList<Entry> = TopKList::new(k as usize, compare_entries);

        let seeds = std::mem::take(&mut self.seeds);
        for &(seed, interest_count) in &seeds {
            let seed_raw = mapper.to_raw(seed);
            if let Some(bound) = top.bound() {
                // No pair from this seed can carry more shared tags than
                // the seed has interests.
                if interest_count < bound.1
                    || (interest_count == bound.1 && bound.0 < (seed_raw, u64::MAX))
                {
                    continue;
                }
            }

            self.run_bfs(seed, hops);
            let own_interests = interests.list(seed);

            for &friend in &self.bfs_results {
                let friend_interests = interests.list(friend);
                let friend_count = friend_interests.map(|l| l.len() as u32).unwrap_or(0);
                let pair = (seed_raw, mapper.to_raw(friend));
                if let Some(bound) = top.bound() {
                    if friend_count < bound.1 || (friend_count == bound.1 && bound.0 < pair) {
                        continue;
                    }
                }
                let common = match (own_interests, friend_interests) {
                    (Some(a), Some(b)) => simd::intersect_count(a.entries(), b.entries()),
                    _ => 0,
                };
                top.insert((pair, common));
            }
        }
        self.seeds = seeds;

        let pairs: Vec<String> = top
            .entries()
            .iter()
            .map(|((a, b), _)| format!("{a}|{b}"))
            .collect();
        pairs.join(" ")
    }
}
