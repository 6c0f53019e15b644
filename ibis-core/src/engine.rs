//! Engine wiring and execution
//!
//! Builds the dependency graph (ingestion, query dispatch, output,
//! shutdown), releases the gate nodes for the requested query types,
//! prunes dead branches and drives the worker pool until the scheduler
//! closes. Results come back in input order.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::index::{abort_on_error, setup_index_tasks, FileIndexes};
use crate::queries::batch::{QueryBatcher, QuerySource, QUERY_TYPES};
use crate::queries::runner::run_batch;
use crate::queries::SearchStrategy;
use crate::scheduler::graph::{ScheduleGraph, TaskNode};
use crate::scheduler::{run_worker, Priority, Scheduler, Task, TaskGroup};

/// Knobs for one engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker thread count; the first half prefers I/O-tagged tasks.
    pub workers: usize,
    /// Centrality search-space strategy.
    pub q4_strategy: SearchStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            q4_strategy: SearchStrategy::default(),
        }
    }
}

/// One run over a dataset: ingestion, query execution, ordered results.
pub struct Engine {
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
    graph: Arc<ScheduleGraph>,
    batcher: Arc<QueryBatcher>,
}

impl Engine {
    /// Wire up the run. `active_types` marks the query types this run may
    /// contain (all four for query-file mode); index branches feeding
    /// only inactive types never release.
    pub fn new(
        data_dir: PathBuf,
        source: Box<dyn QuerySource>,
        active_types: [bool; QUERY_TYPES],
        config: EngineConfig,
    ) -> Engine {
        let scheduler = Scheduler::new();
        let graph = ScheduleGraph::new(Arc::clone(&scheduler));
        let indexes = FileIndexes::new();
        let batcher = QueryBatcher::new(source);
        let data_dir = Arc::new(data_dir);

        setup_index_tasks(&graph, &indexes, &data_dir, &batcher);

        graph.add_edge(TaskNode::Initialize, TaskNode::QueryLoading);
        graph.add_edge(TaskNode::QueryLoading, TaskNode::Query1);
        graph.add_edge(TaskNode::QueryLoading, TaskNode::Query2);
        graph.add_edge(TaskNode::QueryLoading, TaskNode::Query3);
        graph.add_edge(TaskNode::QueryLoading, TaskNode::Query4);

        {
            let batcher = Arc::clone(&batcher);
            graph.set_task(
                Priority::Critical,
                TaskNode::QueryLoading,
                Task::new("query_loading", move || {
                    abort_on_error(batcher.parse());
                }),
            );
        }

        let dispatch_nodes = [
            TaskNode::Query1,
            TaskNode::Query2,
            TaskNode::Query3,
            TaskNode::Query4,
        ];
        for (query_type, &node) in dispatch_nodes.iter().enumerate() {
            let graph_ref = Arc::clone(&graph);
            let scheduler_ref = Arc::clone(&scheduler);
            let batcher_ref = Arc::clone(&batcher);
            let indexes_ref = Arc::clone(&indexes);
            let strategy = config.q4_strategy;
            graph.set_task(
                Priority::HyperCritical,
                node,
                Task::new(node.name(), move || {
                    dispatch_query_batches(
                        &graph_ref,
                        &scheduler_ref,
                        &batcher_ref,
                        &indexes_ref,
                        strategy,
                        node,
                        query_type,
                    );
                }),
            );
        }

        {
            let batcher = Arc::clone(&batcher);
            graph.set_task(
                Priority::Critical,
                TaskNode::Output,
                Task::new("output", move || {
                    let counts = batcher.batch_counts();
                    log::info!(
                        "executed batches q1:{} q2:{} q3:{} q4:{}",
                        counts[0],
                        counts[1],
                        counts[2],
                        counts[3]
                    );
                }),
            );
        }
        graph.add_edge(TaskNode::Output, TaskNode::Finish);
        {
            let scheduler = Arc::clone(&scheduler);
            graph.set_task(
                Priority::Default,
                TaskNode::Finish,
                Task::new("finish", move || {
                    scheduler.set_close_on_empty();
                }),
            );
        }

        graph.update_task(TaskNode::Initialize, -1);

        if active_types[0] {
            graph.add_edge(TaskNode::Query1, TaskNode::Output);
            graph.update_task(TaskNode::NeedQ1, -1);
        }
        if active_types[1] {
            graph.add_edge(TaskNode::Query2, TaskNode::Output);
            graph.update_task(TaskNode::NeedQ2, -1);
        }
        if active_types[2] {
            graph.add_edge(TaskNode::Query3, TaskNode::Output);
            graph.update_task(TaskNode::NeedQ3, -1);
        }
        if active_types[3] {
            graph.add_edge(TaskNode::Query4, TaskNode::Output);
            graph.update_task(TaskNode::NeedQ4, -1);
        }
        if active_types[1] || active_types[2] {
            graph.update_task(TaskNode::NeedQ2orQ3, -1);
        }
        if active_types[1] || active_types[3] {
            graph.update_task(TaskNode::NeedQ2orQ4, -1);
        }

        graph.erase_unused_edges();

        Engine {
            config,
            scheduler,
            graph,
            batcher,
        }
    }

    /// Run the worker pool to completion and return the result lines in
    /// query input order.
    pub fn execute(self) -> Vec<String> {
        let workers = self.config.workers.max(1);
        let io_preferring = workers / 2;

        let handles: Vec<_> = (0..workers.saturating_sub(1))
            .map(|i| {
                let scheduler = Arc::clone(&self.scheduler);
                let prefer_io = i < io_preferring;
                thread::spawn(move || run_worker(&scheduler, prefer_io))
            })
            .collect();
        // The calling thread is the last, CPU-preferring worker.
        run_worker(&self.scheduler, false);
        for handle in handles {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }

        drop(self.graph);
        self.batcher.results_in_order()
    }
}

/// One task per parsed batch; the join closes the query node. Dispatch
/// runs at the highest priority, the batches themselves compete at low
/// priority on the CPU queue (shortest-path batches) or critical
/// priority (the rest).
#[allow(clippy::too_many_arguments)]
fn dispatch_query_batches(
    graph: &Arc<ScheduleGraph>,
    scheduler: &Arc<Scheduler>,
    batcher: &Arc<QueryBatcher>,
    indexes: &Arc<FileIndexes>,
    strategy: SearchStrategy,
    node: TaskNode,
    query_type: usize,
) {
    let mut group = TaskGroup::new();
    for batch in batcher.batches(query_type) {
        let graph = Arc::clone(graph);
        let indexes = Arc::clone(indexes);
        let batch = Arc::clone(batch);
        group.schedule(Task::new(node.name(), move || {
            run_batch(&graph, &indexes, strategy, &batch);
        }));
    }
    log::debug!(
        "dispatching {} batches for {}",
        batcher.batches(query_type).len(),
        node.name()
    );

    let graph_done = Arc::clone(graph);
    group.join(Task::new(node.name(), move || {
        graph_done.update_task(node, -1);
    }));
    graph.update_task(node, 1);

    let priority = if query_type == 0 {
        Priority::Low
    } else {
        Priority::Critical
    };
    scheduler.schedule_all(group.close(), priority, false);
}
