//! Per-batch query dispatch
//!
//! A batch holds queries of a single type; the runner materialises the
//! type's engine once per batch (scratch buffers amortise across the
//! batch) and writes each query's result into its write-once slot. The
//! centrality query is special: it schedules dependent task groups and
//! keeps its graph node open until they join.

use std::sync::Arc;

use crate::index::FileIndexes;
use crate::queries::batch::{Query, QueryBatch};
use crate::queries::{q1, q2, q3, q4, SearchStrategy};
use crate::scheduler::graph::{ScheduleGraph, TaskNode};
use crate::scheduler::{Priority, Task};

pub fn run_batch(
    graph: &Arc<ScheduleGraph>,
    indexes: &Arc<FileIndexes>,
    strategy: SearchStrategy,
    batch: &QueryBatch,
) {
    let Some(first) = batch.entries.first() else {
        return;
    };
    // Ignored batches are uniform; checking the first entry suffices.
    if first.ignore {
        return;
    }

    match batch.query_type {
        0 => {
            let mut runner = q1::QueryRunner::new(indexes);
            for entry in &batch.entries {
                let Query::ShortestPath {
                    person_a,
                    person_b,
                    min_interactions,
                } = &entry.query
                else {
                    continue;
                };
                let hops = runner.run(indexes, *person_a, *person_b, *min_interactions);
                entry.result.set(hops.to_string()).ok();
            }
        }
        1 => {
            let mut runner = q2::QueryRunner::new(indexes);
            for entry in &batch.entries {
                let Query::TagComponents { k, cutoff } = &entry.query else {
                    continue;
                };
                entry.result.set(runner.run(*k, *cutoff)).ok();
            }
        }
        2 => {
            let mut runner = q3::QueryRunner::new(indexes);
            for entry in &batch.entries {
                let Query::SharedInterests { k, hops, place } = &entry.query else {
                    continue;
                };
                entry.result.set(runner.run(*k, *hops, place)).ok();
            }
        }
        3 => {
            let runner =
                q4::QueryRunner::new(Arc::clone(graph), Arc::clone(indexes), strategy);
            for entry in &batch.entries {
                let Query::Centrality { k, tag } = &entry.query else {
                    continue;
                };
                let mut group = runner.run(*k, tag, Arc::clone(&entry.result));
                // The query node stays open until the inner groups join.
                graph.update_task(TaskNode::Query4, 1);
                let graph_done = Arc::clone(graph);
                group.join(Task::new("centrality_batch", move || {
                    graph_done.update_task(TaskNode::Query4, -1);
                }));
                graph
                    .scheduler()
                    .schedule_all(group.close(), Priority::Low, false);
            }
        }
        other => {
            log::error!("batch with invalid query type {other}");
        }
    }
}
