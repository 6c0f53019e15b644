//! Q4: top-k persons by closeness centrality inside a tag's forums
//!
//! The heaviest query. Setup builds the forum person filter, the
//! densified subgraph, component statistics and reachability estimates;
//! seeds are then processed in estimate order: a sequential warm-up until
//! the top-k bound first moves, then either every remaining seed is
//! dispatched as parallel morsels, or round-based search-space chunking
//! alternates estimate windows with sampled "interesting" seeds until the
//! bound stops improving.

mod bfs;
mod estimates;
mod subgraph;

pub use bfs::{closeness, compare_centrality, CentralityRecord};
pub use subgraph::{connected_components, ComponentStats, PersonSubgraph};

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::index::FileIndexes;
use crate::model::{PersonId, TagId};
use crate::scheduler::graph::{ScheduleGraph, TaskNode};
use crate::scheduler::{Priority, Task, TaskGroup};
use crate::structures::TopKList;

use bfs::{distance_bound, run_batch, run_single, BatchBfsData, BoundManager};
use estimates::{compare_by_estimate, update_person_estimate, EstimatesData, PersonEstimate};

/// Seeds per worker task.
const MORSEL_SIZE: u32 = 128;
const MAX_MORSEL_TASKS: u32 = 128;
/// Share of consecutive prunable seeds after which the warm-up considers
/// the bound stable.
const BOUNDS_STABLE_PERCENTAGE: f32 = 0.002;
const MIN_BOUND_ROUNDS: u32 = 20;
/// Window base width for the round-based strategy.
const WINDOW_FACTOR_BASE: u32 = 28;

/// How the search space is covered after the warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// Dispatch every remaining seed as morsels right away.
    #[default]
    Morsels,
    /// Round-based windows with interesting-seed resampling.
    ExpBackoff,
}

#[derive(Default)]
struct PruningStats {
    early_pruned: AtomicU32,
    early_bfs_exits: AtomicU32,
    bound_updates: AtomicU32,
    reached_persons: AtomicU64,
}

/// Shared state of one centrality query.
struct QueryState {
    k: u32,
    num_persons_in_forums: u32,
    subgraph: PersonSubgraph,
    components: ComponentStats,
    estimates: Vec<PersonEstimate>,
    /// Seed processing order; re-sorted only between dispatch phases.
    ordered: Mutex<Vec<PersonId>>,
    person_checked: Vec<AtomicBool>,
    top_results: Mutex<TopKList<CentralityRecord>>,
    /// Published k-th-best record; read lock-cheap by every seed task.
    bound: RwLock<CentralityRecord>,
    last_bound_update: AtomicU32,
    indexes: Arc<FileIndexes>,
    stats: PruningStats,
}

impl QueryState {
    fn raw_person(&self, subgraph_id: PersonId) -> u64 {
        self.indexes
            .person_mapper()
            .to_raw(self.subgraph.from_subgraph(subgraph_id))
    }
}

fn compare_records(a: &CentralityRecord, b: &CentralityRecord) -> Ordering {
    compare_centrality(a, b)
}

/// Process one seed; returns whether the published bound improved.
fn process_single_person(state: &QueryState, range_offset: u32, person: PersonId) -> bool {
    if state.person_checked[person as usize].swap(true, AtomicOrdering::AcqRel) {
        return false;
    }
    let bound_record = *state.bound.read();
    let component_reachable = state.components.reachable(person);
    update_person_estimate(&state.subgraph, &state.estimates, person, component_reachable);
    let estimate = &state.estimates[person as usize];

    let mut manager = BoundManager::new(estimate, component_reachable);
    let limit = distance_bound(&bound_record, component_reachable, state.num_persons_in_forums);
    if let Some(limit) = limit {
        if manager.lower_bound() > limit {
            state.stats.early_pruned.fetch_add(1, AtomicOrdering::Relaxed);
            return false;
        }
    }

    let result = run_single(
        person,
        &state.subgraph,
        limit,
        &mut manager,
        component_reachable,
    );
    state
        .stats
        .reached_persons
        .fetch_add(result.total_reachable as u64, AtomicOrdering::Relaxed);
    if result.early_exit {
        state
            .stats
            .early_bfs_exits
            .fetch_add(1, AtomicOrdering::Relaxed);
        return false;
    }

    let record = CentralityRecord {
        person: state.raw_person(person),
        distances: result.total_distances,
        num_reachable: result.total_reachable,
        centrality: closeness(
            state.num_persons_in_forums,
            result.total_distances,
            result.total_reachable,
        ),
    };
    publish_record(state, &bound_record, record, range_offset)
}

/// Insert a finished record into the top-k; publish the new bound when
/// the k-th best changed.
fn publish_record(
    state: &QueryState,
    seen_bound: &CentralityRecord,
    record: CentralityRecord,
    range_offset: u32,
) -> bool {
    if compare_records(&record, seen_bound) != Ordering::Less {
        return false;
    }
    let mut top = state.top_results.lock();
    top.insert(record);
    if let Some(new_bound) = top.bound() {
        let new_bound = *new_bound;
        *state.bound.write() = new_bound;
        if !new_bound.same_as(seen_bound) {
            state
                .last_bound_update
                .store(range_offset, AtomicOrdering::Relaxed);
            state.stats.bound_updates.fetch_add(1, AtomicOrdering::Relaxed);
            return true;
        }
    }
    false
}

/// Process up to 64 seeds as one batched BFS wave. Returns the number of
/// order positions consumed and whether the bound improved.
fn process_person_batch(
    state: &QueryState,
    persons: &[PersonId],
    base_offset: u32,
    begin: u32,
    end: u32,
) -> (u32, bool) {
    let bound_record = *state.bound.read();

    let mut batch: Vec<BatchBfsData<'_>> = Vec::with_capacity(64);
    let mut position = begin;
    while batch.len() < 64 && position < end {
        let person = persons[(position - base_offset) as usize];
        position += 1;
        if state.person_checked[person as usize].swap(true, AtomicOrdering::AcqRel) {
            continue;
        }
        let component_reachable = state.components.reachable(person);
        update_person_estimate(&state.subgraph, &state.estimates, person, component_reachable);

        let manager = BoundManager::new(&state.estimates[person as usize], component_reachable);
        let limit =
            distance_bound(&bound_record, component_reachable, state.num_persons_in_forums);
        if let Some(limit) = limit {
            if manager.lower_bound() > limit {
                state.stats.early_pruned.fetch_add(1, AtomicOrdering::Relaxed);
                continue;
            }
        }
        batch.push(BatchBfsData::new(person, component_reachable, manager, limit));
    }
    let last = position.saturating_sub(1);

    let mut updated = false;
    if !batch.is_empty() {
        run_batch(&mut batch, &state.subgraph);
        for data in &batch {
            state
                .stats
                .reached_persons
                .fetch_add(data.total_reachable as u64, AtomicOrdering::Relaxed);
            if data.early_exit {
                state
                    .stats
                    .early_bfs_exits
                    .fetch_add(1, AtomicOrdering::Relaxed);
                continue;
            }
            let record = CentralityRecord {
                person: state.raw_person(data.person),
                distances: data.total_distances,
                num_reachable: data.total_reachable,
                centrality: closeness(
                    state.num_persons_in_forums,
                    data.total_distances,
                    data.total_reachable,
                ),
            };
            updated |= publish_record(state, &bound_record, record, last);
        }
    }
    (position - begin, updated)
}

/// Work through order positions `[range_start, range_end)`. In warm-up
/// mode the loop stops once the bound has been stable for long enough;
/// returns the position after the last processed seed.
fn process_morsel(
    state: &QueryState,
    range_start: u32,
    range_end: u32,
    abort_once_stable: bool,
) -> u32 {
    debug_assert!(range_start <= range_end);
    let persons: Vec<PersonId> = {
        let ordered = state.ordered.lock();
        ordered[range_start as usize..range_end as usize].to_vec()
    };

    let mut stable_threshold =
        ((range_end - range_start) as f32 * BOUNDS_STABLE_PERCENTAGE) as u32;
    stable_threshold = stable_threshold.max(MIN_BOUND_ROUNDS * 6);

    let mut offset = range_start;
    while offset < range_end {
        if (abort_once_stable && offset < 300) || range_end - offset < 30 {
            process_single_person(state, offset, persons[(offset - range_start) as usize]);
            offset += 1;
        } else {
            let (processed, _) =
                process_person_batch(state, &persons, range_start, offset, range_end);
            offset += processed;
        }

        if abort_once_stable {
            let last_update = state.last_bound_update.load(AtomicOrdering::Relaxed);
            if offset.saturating_sub(last_update) >= stable_threshold {
                break;
            }
        }
    }
    offset
}

/// Sample persons lying on shortest paths between random qualified pairs
/// of the same component; deterministic per query so reruns are
/// byte-identical.
fn generate_interesting_persons(state: &QueryState, num_persons: u32) -> Vec<PersonId> {
    let n = state.num_persons_in_forums;
    if n <= 2 || num_persons == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(n as u64);
    let num_pairs = num_persons * 2;

    let mut pairs = Vec::new();
    let mut attempts = 0u32;
    while (pairs.len() as u32) < num_pairs && attempts < num_pairs * 3 {
        attempts += 1;
        let start: PersonId = rng.gen_range(1..n);
        let end: PersonId = rng.gen_range(1..n);
        if start == end {
            continue;
        }
        if state.components.component(start) != state.components.component(end) {
            continue;
        }
        pairs.push((start, end));
    }

    let mut vertices = Vec::new();
    for (start, end) in pairs {
        vertices.extend(bfs::shortest_path_vertices(&state.subgraph, start, end));
    }
    vertices.sort_unstable();

    let mut counted: Vec<(u32, PersonId)> = Vec::new();
    let mut last = PersonId::MAX;
    for vertex in vertices {
        if vertex != last {
            counted.push((1, vertex));
        } else {
            counted.last_mut().expect("vertex repeats only after a push").0 += 1;
        }
        last = vertex;
    }
    counted.sort_unstable();

    let mut chosen = Vec::new();
    for &(_, person) in counted.iter().rev() {
        if state.person_checked[person as usize].load(AtomicOrdering::Relaxed) {
            continue;
        }
        chosen.push(person);
        if chosen.len() as u32 == num_persons {
            break;
        }
    }
    chosen
}

/// Write the final result line and release the query node.
fn finish_query(
    state: &Arc<QueryState>,
    graph: &Arc<ScheduleGraph>,
    result: &Arc<OnceLock<String>>,
) {
    let line = {
        let top = state.top_results.lock();
        let ids: Vec<String> = top
            .entries()
            .iter()
            .map(|record| record.person.to_string())
            .collect();
        ids.join(" ")
    };
    result.set(line).ok();
    log::debug!(
        "centrality top-{}: {} pruned before BFS, {} early BFS exits, {} bound updates, {} persons reached",
        state.k,
        state.stats.early_pruned.load(AtomicOrdering::Relaxed),
        state.stats.early_bfs_exits.load(AtomicOrdering::Relaxed),
        state.stats.bound_updates.load(AtomicOrdering::Relaxed),
        state.stats.reached_persons.load(AtomicOrdering::Relaxed),
    );
    graph.update_task(TaskNode::Query4, -1);
}

fn persons_per_task(num_remaining: u32) -> u32 {
    let mut per_task = MORSEL_SIZE;
    if num_remaining / per_task > MAX_MORSEL_TASKS {
        per_task = num_remaining / MAX_MORSEL_TASKS;
    }
    per_task
}

fn schedule_morsel_range(
    group: &mut TaskGroup,
    state: &Arc<QueryState>,
    range_start: u32,
    range_end: u32,
) {
    let span = range_end - range_start;
    let per_task = persons_per_task(span);
    let num_tasks = (span / per_task).max(1);
    for task in 0..num_tasks {
        let start = range_start + per_task * task;
        let end = if task == num_tasks - 1 {
            range_end
        } else {
            start + per_task
        };
        let state = Arc::clone(state);
        group.schedule(Task::new("centrality_morsel", move || {
            process_morsel(&state, start, end, false);
        }));
    }
}

/// Refresh estimates for the remaining order positions and re-sort them.
fn refresh_and_sort(state: &QueryState, from: u32) {
    let mut ordered = state.ordered.lock();
    for position in from as usize..ordered.len() {
        let person = ordered[position];
        update_person_estimate(
            &state.subgraph,
            &state.estimates,
            person,
            state.components.reachable(person),
        );
    }
    let estimates = &state.estimates;
    ordered[from as usize..]
        .sort_unstable_by(|&a, &b| compare_by_estimate(estimates, a, b));
}

/// Round-based search-space coverage (the backoff strategy): even rounds
/// chase sampled interesting seeds, odd rounds widen an estimate-ordered
/// window; two rounds without a bound improvement end the search.
struct SearchSpaceChunker {
    state: Arc<QueryState>,
    graph: Arc<ScheduleGraph>,
    result: Arc<OnceLock<String>>,
    last_change_pos: u32,
    last_offset: u32,
    search_round: u32,
}

impl SearchSpaceChunker {
    fn run(mut self) {
        let num = self.state.num_persons_in_forums;
        if self.last_offset == num {
            finish_query(&self.state, &self.graph, &self.result);
            return;
        }

        if self.search_round % 2 == 0 {
            let last_update = self.state.last_bound_update.load(AtomicOrdering::Relaxed);
            if self.search_round > 0 && last_update == self.last_change_pos {
                log::debug!(
                    "centrality search settled after {} of {} seeds in {} rounds",
                    self.last_offset,
                    num,
                    self.search_round
                );
                finish_query(&self.state, &self.graph, &self.result);
                return;
            }
            self.last_change_pos = last_update;
        }

        let (window_start, window_end) = if self.search_round % 2 == 0 {
            // Interesting-seed round.
            let factor = if self.search_round == 0 { 4 } else { 2 };
            let interesting = generate_interesting_persons(
                &self.state,
                self.last_change_pos.saturating_mul(factor),
            );
            for &person in &interesting {
                self.state.estimates[person as usize].set_interesting(true);
            }
            {
                let mut ordered = self.state.ordered.lock();
                let state = &self.state;
                ordered[self.last_offset as usize..].sort_unstable_by(|&a, &b| {
                    let checked_a = state.person_checked[a as usize].load(AtomicOrdering::Relaxed);
                    let checked_b = state.person_checked[b as usize].load(AtomicOrdering::Relaxed);
                    checked_a
                        .cmp(&checked_b)
                        .then_with(|| {
                            let int_a = state.estimates[a as usize].is_interesting();
                            let int_b = state.estimates[b as usize].is_interesting();
                            int_b.cmp(&int_a)
                        })
                        .then_with(|| compare_by_estimate(&state.estimates, a, b))
                });
            }
            let end = (self.last_offset + interesting.len() as u32).min(num);
            (self.last_offset, end)
        } else {
            // Estimate-window round.
            refresh_and_sort(&self.state, self.last_offset);
            let mut window_factor = WINDOW_FACTOR_BASE / (self.search_round / 2 + 1);
            if num > 800_000 {
                window_factor *= 2;
            }
            let window = self.last_change_pos.max(MIN_BOUND_ROUNDS) * window_factor;
            (self.last_offset, (self.last_offset + window).min(num))
        };

        log::debug!(
            "centrality search round {}: seeds {}..{} (last change at {})",
            self.search_round,
            window_start,
            window_end,
            self.last_change_pos
        );

        let mut group = TaskGroup::new();
        if window_end > window_start {
            schedule_morsel_range(&mut group, &self.state, window_start, window_end);
        }
        let next = SearchSpaceChunker {
            state: Arc::clone(&self.state),
            graph: Arc::clone(&self.graph),
            result: Arc::clone(&self.result),
            last_change_pos: self.last_change_pos,
            last_offset: window_end,
            search_round: self.search_round + 1,
        };
        let scheduler = Arc::clone(self.graph.scheduler());
        group.join(Task::new("centrality_chunker", move || next.run()));
        scheduler.schedule_all(group.close(), Priority::Default, true);
    }
}

pub struct QueryRunner {
    graph: Arc<ScheduleGraph>,
    indexes: Arc<FileIndexes>,
    strategy: SearchStrategy,
}

impl QueryRunner {
    pub fn new(
        graph: Arc<ScheduleGraph>,
        indexes: Arc<FileIndexes>,
        strategy: SearchStrategy,
    ) -> Self {
        QueryRunner {
            graph,
            indexes,
            strategy,
        }
    }

    /// Everybody in a forum carrying the tag, minus persons without a
    /// qualifying forum-member friend. Returns the filter, the person
    /// count and the number of qualifying adjacency entries.
    fn build_person_filter(&self, tag: TagId) -> (Vec<bool>, u32, u64) {
        let num_persons = self.indexes.person_mapper().count() as usize;
        let mut filter = vec![false; num_persons];

        if let Some(forums) = self.indexes.tag_forums().index.retrieve(&tag) {
            let members = self.indexes.forum_members();
            for &forum in forums.iter() {
                let Some(persons) = members.retrieve(&forum) else {
                    continue;
                };
                for &person in persons.iter() {
                    filter[person as usize] = true;
                }
            }
        }

        let knows = self.indexes.person_graph();
        let mut num_in_forums = 0u32;
        let mut num_friend_edges = 0u64;
        for person in 0..num_persons {
            if !filter[person] {
                continue;
            }
            let Some(friends) = knows.list(person as PersonId) else {
                filter[person] = false;
                continue;
            };
            let mut has_friend = false;
            for &friend in friends.entries() {
                if filter[friend as usize] {
                    has_friend = true;
                    num_friend_edges += 1;
                }
            }
            if has_friend {
                num_in_forums += 1;
            } else {
                filter[person] = false;
            }
        }
        (filter, num_in_forums, num_friend_edges)
    }

    /// Execute one centrality query; the returned group completes when
    /// the result line has been written.
    pub fn run(&self, k: u32, tag: &str, result: Arc<OnceLock<String>>) -> TaskGroup {
        let Some(tag_id) = self.indexes.tags().id(tag) else {
            result.set(String::new()).ok();
            return TaskGroup::new();
        };

        let (filter, num_in_forums, num_friend_edges) = self.build_person_filter(tag_id);
        if num_in_forums == 0 {
            result.set(String::new()).ok();
            return TaskGroup::new();
        }

        let subgraph = PersonSubgraph::build(
            &filter,
            num_in_forums,
            num_friend_edges,
            self.indexes.person_graph(),
        );
        let components = connected_components(&subgraph);
        let estimates_data = EstimatesData::create(&subgraph, &components);

        let state = Arc::new(QueryState {
            k,
            num_persons_in_forums: num_in_forums,
            person_checked: (0..subgraph.size()).map(|_| AtomicBool::new(false)).collect(),
            subgraph,
            components,
            estimates: estimates_data.estimates,
            ordered: Mutex::new(estimates_data.ordered),
            top_results: Mutex::new(TopKList::new(k as usize, compare_records)),
            bound: RwLock::new(CentralityRecord::initial()),
            last_bound_update: AtomicU32::new(0),
            indexes: Arc::clone(&self.indexes),
            stats: PruningStats::default(),
        });

        // Sequential warm-up until the k-th-best bound first moves.
        let mut num_sequential = 0u32;
        loop {
            num_sequential = process_morsel(&state, num_sequential, num_in_forums, true);
            let updated = state.last_bound_update.load(AtomicOrdering::Relaxed) > 0;
            if updated || num_sequential >= num_in_forums {
                break;
            }
        }
        log::debug!(
            "centrality warm-up processed {num_sequential} of {num_in_forums} seeds"
        );

        self.graph.update_task(TaskNode::Query4, 1);
        if num_sequential < num_in_forums {
            refresh_and_sort(&state, num_sequential);
        }

        match self.strategy {
            SearchStrategy::Morsels => {
                let mut group = TaskGroup::new();
                if num_sequential < num_in_forums {
                    schedule_morsel_range(&mut group, &state, num_sequential, num_in_forums);
                }
                let graph = Arc::clone(&self.graph);
                group.join(Task::new("centrality_finish", move || {
                    finish_query(&state, &graph, &result);
                }));
                group
            }
            SearchStrategy::ExpBackoff => {
                let chunker = SearchSpaceChunker {
                    state,
                    graph: Arc::clone(&self.graph),
                    result,
                    last_change_pos: 0,
                    last_offset: num_sequential,
                    search_round: 0,
                };
                chunker.run();
                TaskGroup::new()
            }
        }
    }
}
