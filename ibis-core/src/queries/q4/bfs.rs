//! Centrality BFS: single-seed with pruning, and the 64-wide batch
//!
//! Both variants account exact totals per level and compare the running
//! total plus the estimate tail against the admissible distance bound; a
//! seed whose bound is exceeded exits early and never enters the top-k.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::estimates::{calc_distance_bound, PersonEstimate, ESTIMATE_LEVELS};
use super::subgraph::PersonSubgraph;
use crate::model::PersonId;

pub const MIN_CENTRALITY: f64 = 0.0;
const CENTRALITY_EPSILON: f64 = 1e-12;

/// A finished (or bounding) centrality value.
#[derive(Debug, Clone, Copy)]
pub struct CentralityRecord {
    /// Raw person id (original id space, used for ordering and output).
    pub person: u64,
    pub distances: u64,
    pub num_reachable: u32,
    pub centrality: f64,
}

impl CentralityRecord {
    pub fn initial() -> CentralityRecord {
        CentralityRecord {
            person: u64::MAX,
            distances: 0,
            num_reachable: 0,
            centrality: MIN_CENTRALITY,
        }
    }

    pub fn same_as(&self, other: &CentralityRecord) -> bool {
        self.person == other.person && self.centrality == other.centrality
    }
}

/// Centrality descending with a tolerance, person id ascending.
pub fn compare_centrality(a: &CentralityRecord, b: &CentralityRecord) -> Ordering {
    let delta = a.centrality - b.centrality;
    if delta > CENTRALITY_EPSILON {
        Ordering::Less
    } else if delta < -CENTRALITY_EPSILON {
        Ordering::Greater
    } else {
        a.person.cmp(&b.person)
    }
}

/// `(r - 1)^2 / ((N - 1) * D)`, zero when degenerate.
pub fn closeness(total_persons: u32, total_distances: u64, total_reachable: u32) -> f64 {
    if total_distances > 0 && total_reachable > 0 && total_persons > 0 {
        let reached = (total_reachable - 1) as f64;
        (reached * reached) / ((total_persons - 1) as f64 * total_distances as f64)
    } else {
        0.0
    }
}

/// Maximum total distance that could still beat `bound` for a seed
/// reaching `num_reachable` persons; `None` disables the check.
pub fn distance_bound(
    bound: &CentralityRecord,
    num_reachable: u32,
    num_persons_in_forums: u32,
) -> Option<u64> {
    if bound.centrality <= MIN_CENTRALITY {
        return None;
    }
    if bound.num_reachable == num_reachable {
        // Identical reachability: compare distances without the float
        // round trip.
        Some(bound.distances)
    } else {
        let reached = (num_reachable - 1) as u64;
        let limit = (reached * reached) as f64
            / (bound.centrality * (num_persons_in_forums - 1) as f64);
        Some(limit as u64 + 1)
    }
}

/// Exact totals so far plus the estimate tail for the unseen remainder.
pub struct BoundManager<'a> {
    estimate: &'a PersonEstimate,
    pub distances: u64,
    unknown: u64,
    reached: u32,
    total_reachable: u32,
}

impl<'a> BoundManager<'a> {
    pub fn new(estimate: &'a PersonEstimate, total_reachable: u32) -> Self {
        let unknown = calc_distance_bound(&estimate.snapshot(), 0, total_reachable, 0);
        BoundManager {
            estimate,
            distances: 0,
            unknown,
            reached: 0,
            total_reachable,
        }
    }

    /// Fold in a completed BFS level and refresh the tail estimate.
    pub fn update(&mut self, new_reached: u32, distance: u32) {
        if distance == 0 {
            return;
        }
        let delta = new_reached - self.reached;
        self.distances += delta as u64 * distance as u64;
        self.reached = new_reached;
        if (distance as usize - 1) < ESTIMATE_LEVELS {
            self.estimate.set_level(distance as usize - 1, new_reached);
        }
        self.unknown = calc_distance_bound(
            &self.estimate.snapshot(),
            self.reached,
            self.total_reachable,
            distance,
        );
    }

    /// Pin the abandoned level to the component total so later estimate
    /// refreshes stay monotone.
    pub fn early_exit(&mut self, distance: u32) {
        let d = distance as usize;
        if d >= 1 && (d - 1) < ESTIMATE_LEVELS {
            let next_known = d < ESTIMATE_LEVELS && self.estimate.level(d) > 0;
            if !next_known {
                self.estimate
                    .set_level(d - 1, self.total_reachable.saturating_sub(1));
            }
        }
    }

    #[inline]
    pub fn lower_bound(&self) -> u64 {
        self.distances + self.unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BfsResult {
    pub total_distances: u64,
    pub total_reachable: u32,
    pub early_exit: bool,
}

thread_local! {
    static TO_VISIT: RefCell<VecDeque<PersonId>> = RefCell::new(VecDeque::new());
}

/// Single-seed BFS with per-level early exit against `bound`.
pub fn run_single(
    start: PersonId,
    subgraph: &PersonSubgraph,
    bound: Option<u64>,
    bfs_bound: &mut BoundManager<'_>,
    num_total_reachable: u32,
) -> BfsResult {
    TO_VISIT.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.clear();

        let mut seen = vec![false; subgraph.size() as usize];
        seen[start as usize] = true;
        queue.push_back(start);

        let mut result = BfsResult {
            total_distances: 0,
            total_reachable: 0,
            early_exit: false,
        };
        let mut distance = 0u32;
        loop {
            let remaining = (num_total_reachable - 1) - result.total_reachable;
            let level_size = queue.len() as u32;
            let discovered = run_round(subgraph, &mut seen, &mut queue, level_size, remaining);
            distance += 1;

            result.total_reachable += discovered;
            result.total_distances += discovered as u64 * distance as u64;
            bfs_bound.update(result.total_reachable, distance);
            debug_assert_eq!(bfs_bound.distances, result.total_distances);

            if (num_total_reachable - 1) == result.total_reachable || discovered == 0 {
                break;
            }
            if let Some(limit) = bound {
                if bfs_bound.lower_bound() > limit {
                    bfs_bound.early_exit(distance + 1);
                    result.early_exit = true;
                    break;
                }
            }
        }
        queue.clear();
        result
    })
}

/// Expand one BFS level; returns the number of newly discovered persons.
fn run_round(
    subgraph: &PersonSubgraph,
    seen: &mut [bool],
    queue: &mut VecDeque<PersonId>,
    num_to_visit: u32,
    num_unseen: u32,
) -> u32 {
    let mut remaining_to_visit = num_to_visit;
    let mut remaining_unseen = num_unseen;

    while remaining_to_visit > 0 && remaining_unseen > 0 {
        let Some(person) = queue.pop_front() else {
            break;
        };
        let Some(friends) = subgraph.graph().list(person) else {
            remaining_to_visit -= 1;
            continue;
        };
        for &friend in friends.entries() {
            if seen[friend as usize] {
                continue;
            }
            seen[friend as usize] = true;
            queue.push_back(friend);
            remaining_unseen -= 1;
        }
        remaining_to_visit -= 1;
    }
    num_unseen - remaining_unseen
}

/// Per-seed state of a 64-wide batch.
pub struct BatchBfsData<'a> {
    pub person: PersonId,
    pub component_size: u32,
    pub bound_manager: BoundManager<'a>,
    pub distance_bound: Option<u64>,
    pub total_distances: u64,
    pub total_reachable: u32,
    pub early_exit: bool,
}

impl<'a> BatchBfsData<'a> {
    pub fn new(
        person: PersonId,
        component_size: u32,
        bound_manager: BoundManager<'a>,
        distance_bound: Option<u64>,
    ) -> Self {
        BatchBfsData {
            person,
            component_size,
            bound_manager,
            distance_bound,
            total_distances: 0,
            total_reachable: 0,
            early_exit: false,
        }
    }
}

/// Run up to 64 BFS instances in one sweep: per-person 64-bit bitmaps
/// track which seeds saw it and which want to expand it next. Numeric
/// results are identical to running the seeds independently.
pub fn run_batch(batch: &mut [BatchBfsData<'_>], subgraph: &PersonSubgraph) {
    let size = subgraph.size() as usize;
    let num_queries = batch.len();
    debug_assert!(num_queries > 0 && num_queries <= 64);

    let mut to_visit = vec![0u64; size];
    let mut next_to_visit = vec![0u64; size];
    let mut seen = vec![0u64; size];

    let mut min_person = PersonId::MAX;
    for (i, data) in batch.iter().enumerate() {
        let mask = 1u64 << i;
        debug_assert_eq!(seen[data.person as usize], 0);
        seen[data.person as usize] = mask;
        to_visit[data.person as usize] = mask;
        min_person = min_person.min(data.person);
    }

    let mut process_mask = !0u64;
    let mut queries_left = num_queries as u32;
    let mut discovered = [0u32; 64];
    let mut next_distance = 1u32;
    let mut cursor = min_person as usize;
    let mut next_empty = true;

    loop {
        while cursor < size && to_visit[cursor] == 0 {
            cursor += 1;
        }
        if cursor < size {
            let visit_entry = to_visit[cursor];
            let friends = subgraph
                .graph()
                .list(cursor as PersonId)
                .map(|l| l.entries())
                .unwrap_or(&[]);

            if visit_entry.is_power_of_two() {
                // Single seed wants this person.
                let query = visit_entry.trailing_zeros() as usize;
                for &friend in friends {
                    if visit_entry & process_mask & !seen[friend as usize] != 0 {
                        seen[friend as usize] |= visit_entry;
                        next_to_visit[friend as usize] |= visit_entry;
                        next_empty = false;
                        discovered[query] += 1;
                    }
                }
            } else {
                for &friend in friends {
                    let new_bits = visit_entry & process_mask & !seen[friend as usize];
                    if new_bits == 0 {
                        continue;
                    }
                    seen[friend as usize] |= visit_entry;
                    next_to_visit[friend as usize] |= new_bits;
                    next_empty = false;
                    let mut bits = new_bits;
                    while bits != 0 {
                        let query = bits.trailing_zeros() as usize;
                        discovered[query] += 1;
                        bits &= bits - 1;
                    }
                }
            }
            cursor += 1;
        } else {
            // Level complete: fold counters, retire finished seeds.
            for (i, data) in batch.iter_mut().enumerate() {
                let mask = 1u64 << i;
                if process_mask & mask == 0 {
                    continue;
                }
                data.total_reachable += discovered[i];
                data.total_distances += discovered[i] as u64 * next_distance as u64;
                data.bound_manager.update(data.total_reachable, next_distance);
                debug_assert_eq!(data.bound_manager.distances, data.total_distances);

                if data.component_size - 1 == data.total_reachable {
                    if queries_left == 1 {
                        return;
                    }
                    process_mask &= !mask;
                    queries_left -= 1;
                    continue;
                }
                if let Some(limit) = data.distance_bound {
                    if data.bound_manager.lower_bound() > limit {
                        data.bound_manager.early_exit(next_distance + 1);
                        data.early_exit = true;
                        if queries_left == 1 {
                            return;
                        }
                        process_mask &= !mask;
                        queries_left -= 1;
                    }
                }
            }
            if next_empty {
                return;
            }
            to_visit.iter_mut().for_each(|v| *v = 0);
            std::mem::swap(&mut to_visit, &mut next_to_visit);
            discovered[..num_queries].iter_mut().for_each(|d| *d = 0);
            next_empty = true;
            cursor = 0;
            next_distance += 1;
        }
    }
}

/// Bidirectional shortest path returning the vertex sequence, used for
/// sampling persons that lie on paths between qualified pairs.
pub fn shortest_path_vertices(
    subgraph: &PersonSubgraph,
    from: PersonId,
    to: PersonId,
) -> Vec<PersonId> {
    struct Side {
        seen: FxHashMap<PersonId, (PersonId, u32)>,
        fringe: VecDeque<(PersonId, u32)>,
        target: PersonId,
    }
    impl Side {
        fn new(source: PersonId, target: PersonId) -> Side {
            let mut seen = FxHashMap::default();
            seen.insert(source, (source, 0));
            let mut fringe = VecDeque::new();
            fringe.push_back((source, 0));
            Side {
                seen,
                fringe,
                target,
            }
        }
    }

    let mut sides = [Side::new(from, to), Side::new(to, from)];
    let mut dir = 0usize;
    let mut joined = [false, false];
    let mut best_distance = u32::MAX;
    let mut meet = PersonId::MAX;

    // Walk the parent chain back to the side's source.
    let trace = |side: &Side, start: PersonId| -> Vec<PersonId> {
        let mut path = vec![start];
        let mut current = start;
        while let Some(&(parent, _)) = side.seen.get(&current) {
            if parent == current {
                break;
            }
            path.push(parent);
            current = parent;
        }
        path
    };

    while !sides[0].fringe.is_empty() && !sides[1].fringe.is_empty() {
        dir = 1 - dir;
        let (this, other) = if dir == 0 {
            let (a, b) = sides.split_at_mut(1);
            (&mut a[0], &mut b[0])
        } else {
            let (a, b) = sides.split_at_mut(1);
            (&mut b[0], &mut a[0])
        };

        let (person, depth) = this
            .fringe
            .pop_front()
            .expect("loop condition keeps both fringes non-empty");
        if joined[1 - dir] && other.seen.contains_key(&person) {
            // Join the two half-paths through the meeting vertex.
            let mut path = trace(this, meet);
            let mut back = trace(other, meet);
            back.remove(0);
            path.reverse();
            path.append(&mut back);
            return path;
        }

        let Some(friends) = subgraph.graph().list(person) else {
            continue;
        };
        for &friend in friends.entries() {
            if this.seen.contains_key(&friend) {
                continue;
            }
            let distance = depth + 1;
            if friend == this.target {
                let mut path = vec![friend];
                path.extend(trace(this, person));
                return path;
            }
            this.seen.insert(friend, (person, distance));
            this.fringe.push_back((friend, distance));

            if let Some(&(_, other_distance)) = other.seen.get(&friend) {
                let met = distance + other_distance;
                if met < best_distance {
                    best_distance = met;
                    meet = friend;
                    joined[dir] = true;
                }
            }
        }
    }
    Vec::new()
}
