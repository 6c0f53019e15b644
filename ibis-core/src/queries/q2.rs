//! Q2: largest component per interest tag over a birthday cutoff
//!
//! Interests are scanned in descending person-count order, so the scan
//! stops as soon as a tag's total person count can no longer beat the
//! current k-th best component.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::index::FileIndexes;
use crate::model::{Birthday, PersonId};
use crate::structures::{AdjacencyIndex, ListRef, TopKList};

type Entry<'a> = (&'a str, u32);

/// Size descending, tag name ascending.
fn compare_entries<'a>(a: &Entry<'a>, b: &Entry<'a>) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

pub struct QueryRunner<'a> {
    indexes: &'a FileIndexes,
    num_persons: u32,
    visited: Vec<bool>,
    correct_birthday: Vec<bool>,
    queue: VecDeque<PersonId>,
}

fn has_interest(list: Option<ListRef<'_>>, tag: u32) -> bool {
    list.map(|l| l.find(tag).is_some()).unwrap_or(false)
}

/// Size of the component around `seed`, marking every member visited.
/// Stops early once the component provably covers all remaining persons.
fn component_size(
    graph: &AdjacencyIndex,
    visited: &mut [bool],
    queue: &mut VecDeque<PersonId>,
    seed: PersonId,
    remaining: u32,
) -> u32 {
    queue.clear();
    queue.push_back(seed);
    visited[seed as usize] = true;
    let mut size = 1u32;
    while let Some(person) = queue.pop_front() {
        let Some(friends) = graph.list(person) else {
            continue;
        };
        for &friend in friends.entries() {
            if visited[friend as usize] {
                continue;
            }
            visited[friend as usize] = true;
            size += 1;
            queue.push_back(friend);
        }
        if remaining <= size {
            break;
        }
    }
    size
}

impl<'a> QueryRunner<'a> {
    pub fn new(indexes: &'a FileIndexes) -> Self {
        let num_persons = indexes.person_mapper().count();
        QueryRunner {
            indexes,
            num_persons,
            visited: vec![false; num_persons as usize],
            correct_birthday: vec![false; num_persons as usize],
            queue: VecDeque::new(),
        }
    }

    pub fn run(&mut self, k: u32, cutoff: Birthday) -> String {
        let graph = self.indexes.person_graph();
        let birthdays = self.indexes.birthdays();
        let interests = self.indexes.has_interest();
        let tags = self.indexes.tags();

        for person in 0..self.num_persons as usize {
            self.correct_birthday[person] = birthdays[person] >= cutoff;
        }

        let mut top: TopKList<Entry<'_>> = TopKList::new(k as usize, compare_entries);

        for stat in self.indexes.interest_stats() {
            // Counts only decrease from here on.
            if let Some(bound) = top.bound() {
                if stat.num_persons < bound.1 {
                    break;
                }
            }
            if stat.max_birthday < cutoff {
                continue;
            }
            let Some(tag_name) = tags.name(stat.tag) else {
                log::warn!("interest {} has no tag name", stat.tag);
                continue;
            };
            if let Some(bound) = top.bound() {
                // A full-count tie still loses on the name ordering.
                if stat.num_persons == bound.1
                    && compare_entries(&(tag_name, stat.num_persons), bound) == Ordering::Greater
                {
                    continue;
                }
            }
            if stat.num_persons == 0 {
                continue;
            }

            // Only persons with the interest and a late enough birthday
            // may be expanded.
            self.visited.fill(true);
            let mut matching = 0u32;
            for person in 0..self.num_persons {
                if self.correct_birthday[person as usize]
                    && has_interest(interests.list(person), stat.tag)
                {
                    self.visited[person as usize] = false;
                    matching += 1;
                }
            }

            let mut max_component = 0u32;
            let mut remaining = matching;
            for person in 0..self.num_persons {
                if self.visited[person as usize] {
                    continue;
                }
                if let Some(bound) = top.bound() {
                    if remaining < bound.1 {
                        break;
                    }
                }
                let size = component_size(
                    graph,
                    &mut self.visited,
                    &mut self.queue,
                    person,
                    remaining,
                );
                remaining = remaining.saturating_sub(size);
                max_component = max_component.max(size);
            }

            if max_component > 0 {
                top.insert((tag_name, max_component));
            }
        }

        let names: Vec<&str> = top.entries().iter().map(|e| e.0).collect();
        names.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::interests::build_interest_stats;
    use crate::index::TagIndex;
    use crate::model::{encode_birthday, PersonMapper};
    use crate::structures::HashIndex;
    use rustc_hash::FxHashSet;

    /// Six persons; tag "cinema" connects 0-4 into one component of 5,
    /// tag "opera" covers 0-2 (component 3) and 5 (isolated), person 5
    /// born too early for late cutoffs.
    fn fixture() -> std::sync::Arc<FileIndexes> {
        let indexes = FileIndexes::new();
        let mut mapper = PersonMapper::with_capacity(6);
        for raw in 0..6u64 {
            mapper.insert(raw);
        }
        indexes.person_mapper.set(mapper).ok().unwrap();

        let adjacency: &[&[u32]] = &[&[1, 2], &[0, 2], &[0, 1, 3], &[2, 4], &[3], &[]];
        let mut graph = AdjacencyIndex::new(6);
        for (person, neighbours) in adjacency.iter().enumerate() {
            let offset = graph.arena_mut().push_list(neighbours);
            graph.insert(person as u32, offset);
        }
        indexes.person_graph.set(graph).ok().unwrap();

        // Tag 1 = cinema (persons 0..=4), tag 2 = opera (0, 1, 2, 5).
        let mut interests = AdjacencyIndex::new(6);
        let lists: &[&[u32]] = &[&[1, 2], &[1, 2], &[1, 2], &[1], &[1], &[2]];
        for (person, list) in lists.iter().enumerate() {
            let offset = interests.arena_mut().push_list(list);
            interests.insert(person as u32, offset);
        }
        indexes.has_interest.set(interests).ok().unwrap();

        let birthdays = vec![
            encode_birthday(1985, 1, 1),
            encode_birthday(1986, 1, 1),
            encode_birthday(1987, 1, 1),
            encode_birthday(1988, 1, 1),
            encode_birthday(1989, 1, 1),
            encode_birthday(1960, 1, 1),
        ];
        indexes.birthdays.set(birthdays).ok().unwrap();

        let mut id_to_name = HashIndex::new();
        let mut name_to_id = HashIndex::new();
        for (id, name) in [(1u32, "cinema"), (2, "opera")] {
            id_to_name.insert(id, name.to_owned());
            name_to_id.insert(name.to_owned(), id);
        }
        indexes
            .tags
            .set(TagIndex {
                id_to_name,
                name_to_id,
                used_tags: FxHashSet::default(),
            })
            .ok()
            .unwrap();

        let stats = build_interest_stats(&indexes);
        indexes.interest_stats.set(stats).ok().unwrap();
        indexes
    }

    #[test]
    fn test_largest_components_in_order() {
        let indexes = fixture();
        let mut runner = QueryRunner::new(&indexes);
        // Everyone qualifies: cinema gives a component of 5, opera of 3.
        assert_eq!(runner.run(3, encode_birthday(1950, 1, 1)), "cinema opera");
    }

    #[test]
    fn test_birthday_cutoff_shrinks_components() {
        let indexes = fixture();
        let mut runner = QueryRunner::new(&indexes);
        // Cutoff 1987 keeps persons 2, 3, 4: cinema chain 2-3-4 (3),
        // opera only person 2 (1).
        assert_eq!(runner.run(2, encode_birthday(1987, 1, 1)), "cinema opera");
        // k = 1 returns just the best tag.
        assert_eq!(runner.run(1, encode_birthday(1987, 1, 1)), "cinema");
    }

    #[test]
    fn test_fewer_tags_than_k() {
        let indexes = fixture();
        let mut runner = QueryRunner::new(&indexes);
        assert_eq!(runner.run(5, encode_birthday(1950, 1, 1)), "cinema opera");
    }

    #[test]
    fn test_no_matching_person_gives_empty_line() {
        let indexes = fixture();
        let mut runner = QueryRunner::new(&indexes);
        assert_eq!(runner.run(3, encode_birthday(2001, 1, 1)), "");
    }

    #[test]
    fn test_sizes_order_results_not_scan_order() {
        let indexes = fixture();
        let mut runner = QueryRunner::new(&indexes);
        // Cutoff 1985 keeps 0..=4: cinema still connects all five, opera
        // shrinks to the triangle 0-1-2.
        assert_eq!(runner.run(2, encode_birthday(1985, 1, 1)), "cinema opera");
    }
}
