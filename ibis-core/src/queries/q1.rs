//! Q1: bounded shortest path with an interaction threshold
//!
//! Bidirectional BFS over the knows graph. When a threshold `n >= 0` is
//! given, an edge is traversable only if the reply counters in both
//! directions exceed `n`.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::index::{CommentWeights, FileIndexes};
use crate::model::PersonId;
use crate::structures::AdjacencyIndex;

struct SearchState {
    seen: FxHashMap<PersonId, u32>,
    fringe: VecDeque<(PersonId, u32)>,
    target: PersonId,
}

impl SearchState {
    fn new() -> Self {
        SearchState {
            seen: FxHashMap::default(),
            fringe: VecDeque::new(),
            target: 0,
        }
    }

    fn init(&mut self, source: PersonId, target: PersonId) {
        self.seen.clear();
        self.fringe.clear();
        self.target = target;
        self.fringe.push_back((source, 0));
    }
}

pub struct QueryRunner<'a> {
    graph: &'a AdjacencyIndex,
    weights: &'a CommentWeights,
    states: [SearchState; 2],
}

impl<'a> QueryRunner<'a> {
    pub fn new(indexes: &'a FileIndexes) -> Self {
        QueryRunner {
            graph: indexes.person_graph(),
            weights: indexes.comment_weights(),
            states: [SearchState::new(), SearchState::new()],
        }
    }

    /// Hop count of the shortest qualifying path between two raw person
    /// ids, `0` for identical persons, `-1` when unreachable.
    pub fn run(&mut self, indexes: &FileIndexes, raw_a: u64, raw_b: u64, threshold: i32) -> i64 {
        if raw_a == raw_b {
            return 0;
        }
        let mapper = indexes.person_mapper();
        let (Some(a), Some(b)) = (mapper.to_dense(raw_a), mapper.to_dense(raw_b)) else {
            return -1;
        };
        if threshold >= 0 {
            self.shortest_path::<true>(a, b, threshold)
        } else {
            self.shortest_path::<false>(a, b, threshold)
        }
    }

    fn shortest_path<const CHECK_WEIGHTS: bool>(
        &mut self,
        a: PersonId,
        b: PersonId,
        threshold: i32,
    ) -> i64 {
        let graph = self.graph;
        let weights = self.weights;
        self.states[0].init(a, b);
        self.states[1].init(b, a);

        let mut dir = 0usize;
        let mut joined = [false, false];
        let mut result = u32::MAX;

        while !self.states[0].fringe.is_empty() && !self.states[1].fringe.is_empty() {
            dir = 1 - dir;
            let (state, other) = if dir == 0 {
                let (left, right) = self.states.split_at_mut(1);
                (&mut left[0], &mut right[0])
            } else {
                let (left, right) = self.states.split_at_mut(1);
                (&mut right[0], &mut left[0])
            };

            let (person, depth) = state
                .fringe
                .pop_front()
                .expect("loop condition keeps both fringes non-empty");

            // Once both searches joined, the first popped vertex already
            // seen by the other side settles the minimum.
            if joined[1 - dir] && other.seen.contains_key(&person) {
                return result as i64;
            }

            let Some(neighbours) = graph.list(person) else {
                continue;
            };
            for (i, &neighbour) in neighbours.entries().iter().enumerate() {
                if state.seen.contains_key(&neighbour) {
                    continue;
                }
                if CHECK_WEIGHTS {
                    // Forward counter, then the mirrored edge's counter.
                    if (weights.get(neighbours.slot(i)) as i32) <= threshold {
                        continue;
                    }
                    let reverse_ok = graph
                        .list(neighbour)
                        .and_then(|l| l.find_slot(person))
                        .map(|slot| weights.get(slot) as i32 > threshold)
                        .unwrap_or(false);
                    if !reverse_ok {
                        continue;
                    }
                }

                let distance = depth + 1;
                if neighbour == state.target {
                    return distance as i64;
                }
                state.seen.insert(neighbour, distance);
                state.fringe.push_back((neighbour, distance));

                if let Some(&other_distance) = other.seen.get(&neighbour) {
                    let met = distance + other_distance;
                    if met < result {
                        result = met;
                        joined[dir] = true;
                    }
                }
            }
        }
        if result != u32::MAX {
            result as i64
        } else {
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FileIndexes;
    use crate::model::PersonMapper;
    use std::sync::Arc;

    /// Path 0 - 1 - 2 - 3 plus a detour 0 - 4 - 3; weights only on the
    /// path edges with the given counters.
    fn fixture(edge_weights: &[((u32, u32), u8)]) -> Arc<FileIndexes> {
        let adjacency: &[(u32, &[u32])] = &[
            (0, &[1, 4]),
            (1, &[0, 2]),
            (2, &[1, 3]),
            (3, &[2, 4]),
            (4, &[0, 3]),
        ];
        let indexes = FileIndexes::new();
        let mut mapper = PersonMapper::with_capacity(5);
        for raw in 0..5u64 {
            mapper.insert(raw * 100);
        }
        indexes.person_mapper.set(mapper).ok().unwrap();

        let mut graph = AdjacencyIndex::new(5);
        for &(person, neighbours) in adjacency {
            let offset = graph.arena_mut().push_list(neighbours);
            graph.insert(person, offset);
        }
        let weights = CommentWeights::new(graph.arena_slots());
        for &((from, to), count) in edge_weights {
            let slot = graph.list(from).unwrap().find_slot(to).unwrap();
            for _ in 0..count {
                weights.increment(slot);
            }
        }
        indexes.person_graph.set(graph).ok().unwrap();
        indexes.comment_weights.set(Arc::new(weights)).ok().unwrap();
        indexes
    }

    #[test]
    fn test_same_person_is_zero() {
        let indexes = fixture(&[]);
        let mut runner = QueryRunner::new(&indexes);
        assert_eq!(runner.run(&indexes, 100, 100, -1), 0);
    }

    #[test]
    fn test_unfiltered_paths() {
        let indexes = fixture(&[]);
        let mut runner = QueryRunner::new(&indexes);
        assert_eq!(runner.run(&indexes, 0, 100, -1), 1);
        assert_eq!(runner.run(&indexes, 0, 300, -1), 2); // via 4
        assert_eq!(runner.run(&indexes, 100, 300, -1), 2);
    }

    #[test]
    fn test_unknown_person_is_unreachable() {
        let indexes = fixture(&[]);
        let mut runner = QueryRunner::new(&indexes);
        assert_eq!(runner.run(&indexes, 0, 999, -1), -1);
    }

    #[test]
    fn test_threshold_requires_both_directions() {
        // Both directions above threshold only along 0-1-2-3.
        let indexes = fixture(&[
            ((0, 1), 3),
            ((1, 0), 2),
            ((1, 2), 5),
            ((2, 1), 5),
            ((2, 3), 2),
            ((3, 2), 2),
            // Detour edge qualifies one-way only.
            ((0, 4), 9),
            ((3, 4), 9),
        ]);
        let mut runner = QueryRunner::new(&indexes);
        // Threshold 1: the full path qualifies; detour does not (4->0 and
        // 4->3 counters are zero).
        assert_eq!(runner.run(&indexes, 0, 300, 1), 3);
        // Threshold 2: edge 1<->0 fails (2 <= 2).
        assert_eq!(runner.run(&indexes, 0, 300, 2), -1);
        // Unfiltered still takes the short detour.
        assert_eq!(runner.run(&indexes, 0, 300, -1), 2);
    }
}
