//! Densified per-query subgraph
//!
//! The centrality query operates on the persons that passed the forum
//! filter, renumbered into [1, N]; id 0 is the sentinel for "not in the
//! subgraph". Adjacency lists keep only intra-subgraph edges and stay
//! sorted because the renumbering preserves order.

use std::collections::VecDeque;

use crate::model::PersonId;
use crate::structures::AdjacencyIndex;

pub struct PersonSubgraph {
    size: u32,
    map_to: Vec<PersonId>,
    map_from: Vec<PersonId>,
    graph: AdjacencyIndex,
}

impl PersonSubgraph {
    /// Build from the global knows graph restricted to `filter`.
    /// `num_filtered` persons pass the filter; `num_filtered_edges` is the
    /// total number of their qualifying adjacency entries.
    pub fn build(
        filter: &[bool],
        num_filtered: u32,
        num_filtered_edges: u64,
        knows: &AdjacencyIndex,
    ) -> Self {
        let size = num_filtered + 1;
        let mut map_to = vec![0 as PersonId; filter.len()];
        let mut map_from = vec![0 as PersonId; size as usize];
        let mut next: PersonId = 1;
        for (person, &keep) in filter.iter().enumerate() {
            if keep {
                map_to[person] = next;
                map_from[next as usize] = person as PersonId;
                next += 1;
            }
        }

        let arena_slots = num_filtered as usize + num_filtered_edges as usize;
        let mut graph = AdjacencyIndex::with_arena_capacity(size as usize, arena_slots);
        for (person, &subgraph_id) in map_to.iter().enumerate() {
            if subgraph_id == 0 {
                continue;
            }
            let Some(friends) = knows.list(person as PersonId) else {
                continue;
            };
            let offset = graph.arena_mut().begin_list();
            for &friend in friends.entries() {
                let friend_id = map_to[friend as usize];
                if friend_id > 0 {
                    graph.arena_mut().push(friend_id);
                }
            }
            graph.arena_mut().end_list(offset);
            graph.insert(subgraph_id, offset);
        }

        PersonSubgraph {
            size,
            map_to,
            map_from,
            graph,
        }
    }

    /// Number of subgraph slots, sentinel included.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn graph(&self) -> &AdjacencyIndex {
        &self.graph
    }

    /// Subgraph id for a dense person id; 0 when filtered out.
    #[inline]
    pub fn to_subgraph(&self, person: PersonId) -> PersonId {
        self.map_to[person as usize]
    }

    /// Dense person id for a subgraph id.
    #[inline]
    pub fn from_subgraph(&self, id: PersonId) -> PersonId {
        self.map_from[id as usize]
    }
}

/// Connected components over the subgraph: per-person component id
/// (1-based), per-component sizes, and the largest size.
pub struct ComponentStats {
    pub person_components: Vec<u32>,
    pub component_sizes: Vec<u32>,
    pub max_component_size: u32,
}

impl ComponentStats {
    /// Size of the component containing `person` (a subgraph id).
    #[inline]
    pub fn reachable(&self, person: PersonId) -> u32 {
        self.component_sizes[self.person_components[person as usize - 1] as usize]
    }

    #[inline]
    pub fn component(&self, person: PersonId) -> u32 {
        self.person_components[person as usize - 1]
    }
}

pub fn connected_components(subgraph: &PersonSubgraph) -> ComponentStats {
    let size = subgraph.size();
    let mut stats = ComponentStats {
        person_components: vec![0; size.saturating_sub(1) as usize],
        // Component 0 is invalid.
        component_sizes: vec![u32::MAX],
        max_component_size: 0,
    };

    let mut queue: VecDeque<PersonId> = VecDeque::new();
    let mut component_id = 1u32;
    for person in 1..size {
        if stats.person_components[person as usize - 1] != 0 {
            continue;
        }
        let mut component_size = 1u32;
        stats.person_components[person as usize - 1] = component_id;
        queue.push_back(person);
        while let Some(current) = queue.pop_front() {
            let Some(friends) = subgraph.graph().list(current) else {
                continue;
            };
            for &friend in friends.entries() {
                if stats.person_components[friend as usize - 1] != 0 {
                    continue;
                }
                stats.person_components[friend as usize - 1] = component_id;
                component_size += 1;
                queue.push_back(friend);
            }
        }
        stats.component_sizes.push(component_size);
        component_id += 1;
        log::debug!("centrality subgraph component of size {component_size}");
    }

    stats.max_component_size = stats.component_sizes[1..].iter().copied().max().unwrap_or(0);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knows(adjacency: &[&[u32]]) -> AdjacencyIndex {
        let mut graph = AdjacencyIndex::new(adjacency.len());
        for (person, neighbours) in adjacency.iter().enumerate() {
            let offset = graph.arena_mut().push_list(neighbours);
            graph.insert(person as u32, offset);
        }
        graph
    }

    #[test]
    fn test_build_filters_and_renumbers() {
        // Persons 0, 2, 3 kept; 1 dropped.
        let knows = knows(&[&[1, 2], &[0, 3], &[0, 3], &[1, 2]]);
        let filter = [true, false, true, true];
        let subgraph = PersonSubgraph::build(&filter, 3, 3, &knows);

        assert_eq!(subgraph.size(), 4);
        assert_eq!(subgraph.to_subgraph(0), 1);
        assert_eq!(subgraph.to_subgraph(1), 0);
        assert_eq!(subgraph.to_subgraph(2), 2);
        assert_eq!(subgraph.to_subgraph(3), 3);
        assert_eq!(subgraph.from_subgraph(2), 2);

        // Edges through the dropped person disappear.
        assert_eq!(subgraph.graph().list(1).unwrap().entries(), &[2]);
        assert_eq!(subgraph.graph().list(2).unwrap().entries(), &[1, 3]);
        assert_eq!(subgraph.graph().list(3).unwrap().entries(), &[2]);
    }

    #[test]
    fn test_connected_components() {
        // Two components: {0, 1} and {2, 3, 4}.
        let knows = knows(&[&[1], &[0], &[3, 4], &[2], &[2]]);
        let filter = [true; 5];
        let subgraph = PersonSubgraph::build(&filter, 5, 6, &knows);
        let stats = connected_components(&subgraph);

        assert_eq!(stats.max_component_size, 3);
        assert_eq!(stats.component(1), stats.component(2));
        assert_ne!(stats.component(1), stats.component(3));
        assert_eq!(stats.reachable(3), 3);
        assert_eq!(stats.reachable(1), 2);
    }
}
