//! Static dependency graph driving the run
//!
//! A fixed set of named nodes (ingestion, query dispatch, output,
//! shutdown) with atomic pending counters. A node's task is submitted to
//! the scheduler exactly once, when every predecessor's counter has
//! reached zero; contention between finishing predecessors is resolved by
//! an atomic triggered flag. Gate nodes carry no task and model whether a
//! query type was requested at all.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use super::{Priority, Scheduler, Task};

/// Nodes of the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum TaskNode {
    Initialize = 0,
    QueryLoading,
    // Gate nodes: released when the corresponding query type is requested.
    NeedQ1,
    NeedQ2,
    NeedQ2orQ3,
    NeedQ2orQ4,
    NeedQ3,
    NeedQ4,
    // Ingestion nodes.
    PersonMapping,
    Tags,
    NamePlaces,
    TagForums,
    PersonGraph,
    CommentCreators,
    HasInterest,
    Birthdays,
    PersonPlaces,
    ForumMembers,
    InterestStats,
    // Query dispatch nodes.
    Query1,
    Query2,
    Query3,
    Query4,
    // Run tail.
    Output,
    Finish,
}

pub const NODE_COUNT: usize = TaskNode::Finish as usize + 1;

impl TaskNode {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskNode::Initialize => "initialize",
            TaskNode::QueryLoading => "query_loading",
            TaskNode::NeedQ1 => "need_q1",
            TaskNode::NeedQ2 => "need_q2",
            TaskNode::NeedQ2orQ3 => "need_q2_or_q3",
            TaskNode::NeedQ2orQ4 => "need_q2_or_q4",
            TaskNode::NeedQ3 => "need_q3",
            TaskNode::NeedQ4 => "need_q4",
            TaskNode::PersonMapping => "person_mapping",
            TaskNode::Tags => "tags",
            TaskNode::NamePlaces => "name_places",
            TaskNode::TagForums => "tag_forums",
            TaskNode::PersonGraph => "person_graph",
            TaskNode::CommentCreators => "comment_creators",
            TaskNode::HasInterest => "has_interest",
            TaskNode::Birthdays => "birthdays",
            TaskNode::PersonPlaces => "person_places",
            TaskNode::ForumMembers => "forum_members",
            TaskNode::InterestStats => "interest_stats",
            TaskNode::Query1 => "query1",
            TaskNode::Query2 => "query2",
            TaskNode::Query3 => "query3",
            TaskNode::Query4 => "query4",
            TaskNode::Output => "output",
            TaskNode::Finish => "finish",
        }
    }
}

const NODE_NAMES: [TaskNode; NODE_COUNT] = [
    TaskNode::Initialize,
    TaskNode::QueryLoading,
    TaskNode::NeedQ1,
    TaskNode::NeedQ2,
    TaskNode::NeedQ2orQ3,
    TaskNode::NeedQ2orQ4,
    TaskNode::NeedQ3,
    TaskNode::NeedQ4,
    TaskNode::PersonMapping,
    TaskNode::Tags,
    TaskNode::NamePlaces,
    TaskNode::TagForums,
    TaskNode::PersonGraph,
    TaskNode::CommentCreators,
    TaskNode::HasInterest,
    TaskNode::Birthdays,
    TaskNode::PersonPlaces,
    TaskNode::ForumMembers,
    TaskNode::InterestStats,
    TaskNode::Query1,
    TaskNode::Query2,
    TaskNode::Query3,
    TaskNode::Query4,
    TaskNode::Output,
    TaskNode::Finish,
];

struct NodeState {
    pending: AtomicI64,
    triggered: AtomicBool,
    task: Mutex<Option<(Task, Priority)>>,
    successors: RwLock<FxHashSet<usize>>,
    predecessors: RwLock<FxHashSet<usize>>,
}

impl NodeState {
    fn new() -> Self {
        NodeState {
            pending: AtomicI64::new(1),
            triggered: AtomicBool::new(false),
            task: Mutex::new(None),
            successors: RwLock::new(FxHashSet::default()),
            predecessors: RwLock::new(FxHashSet::default()),
        }
    }
}

/// Dependency graph over [`TaskNode`]s, submitting released node tasks to
/// the scheduler at their configured priority.
pub struct ScheduleGraph {
    scheduler: Arc<Scheduler>,
    nodes: Vec<NodeState>,
}

impl ScheduleGraph {
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<ScheduleGraph> {
        Arc::new(ScheduleGraph {
            scheduler,
            nodes: (0..NODE_COUNT).map(|_| NodeState::new()).collect(),
        })
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Attach the task executed when `node` is released.
    pub fn set_task(&self, priority: Priority, node: TaskNode, task: Task) {
        *self.nodes[node.index()].task.lock() = Some((task, priority));
    }

    /// Declare that `target` cannot start before `source` finished.
    pub fn add_edge(&self, source: TaskNode, target: TaskNode) {
        self.nodes[source.index()]
            .successors
            .write()
            .insert(target.index());
        self.nodes[target.index()]
            .predecessors
            .write()
            .insert(source.index());
    }

    /// Adjust `node`'s pending counter by `delta`; on zero, release every
    /// successor whose predecessors are all at zero.
    pub fn update_task(self: &Arc<Self>, node: TaskNode, delta: i64) {
        self.update_index(node.index(), delta);
    }

    fn update_index(self: &Arc<Self>, index: usize, delta: i64) {
        let previous = self.nodes[index].pending.fetch_add(delta, Ordering::AcqRel);
        let current = previous + delta;
        debug_assert!(current >= 0);
        if current != 0 {
            return;
        }
        log::debug!("task graph node {} finished", NODE_NAMES[index].name());

        let mut released = Vec::new();
        {
            let successors = self.nodes[index].successors.read();
            for &succ in successors.iter() {
                if self.nodes[succ].triggered.load(Ordering::Acquire) {
                    continue;
                }
                let ready = self.nodes[succ]
                    .predecessors
                    .read()
                    .iter()
                    .all(|&p| self.nodes[p].pending.load(Ordering::Acquire) == 0);
                // The swap admits exactly one releasing thread.
                if ready && !self.nodes[succ].triggered.swap(true, Ordering::AcqRel) {
                    released.push(succ);
                }
            }
        }
        for succ in released {
            self.run_node(succ);
        }
    }

    fn run_node(self: &Arc<Self>, index: usize) {
        let node = NODE_NAMES[index];
        log::debug!("task graph scheduling node {}", node.name());
        let (task, priority) = self.nodes[index]
            .task
            .lock()
            .take()
            .unwrap_or_else(|| panic!("no task attached to node {}", node.name()));
        let graph = Arc::clone(self);
        let wrapped = Task::new(task.label, move || {
            task.execute();
            graph.update_index(index, -1);
        });
        self.scheduler.schedule(wrapped, priority, true);
    }

    /// Drop edges whose source cannot reach `Finish`, so releases for
    /// query types that are absent from the input never gate termination.
    pub fn erase_unused_edges(&self) {
        let mut reachable = FxHashSet::default();
        let mut stack = vec![TaskNode::Finish.index()];
        while let Some(index) = stack.pop() {
            if !reachable.insert(index) {
                continue;
            }
            for &p in self.nodes[index].predecessors.read().iter() {
                stack.push(p);
            }
        }
        for index in 0..NODE_COUNT {
            if reachable.contains(&index) {
                continue;
            }
            let successors: Vec<usize> =
                self.nodes[index].successors.write().drain().collect();
            for succ in successors {
                self.nodes[succ].predecessors.write().remove(&index);
            }
            log::debug!(
                "task graph erased edges from unused node {}",
                NODE_NAMES[index].name()
            );
        }
    }
}
