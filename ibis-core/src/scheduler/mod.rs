//! Priority-ordered task scheduler
//!
//! Two max-heap queues (I/O-tagged and CPU-tagged tasks) guarded by a
//! single mutex + condition variable. Workers prefer one queue and drain
//! the other on demand; ties within a priority are broken by insertion
//! order. Tasks run to completion; there is no cooperative suspension.

pub mod graph;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Scheduling priorities; larger wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 10,
    Default = 11,
    Normal = 30,
    Urgent = 50,
    Critical = 70,
    HyperCritical = 80,
}

/// A unit of work with a diagnostic label.
pub struct Task {
    pub label: &'static str,
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub fn new(label: &'static str, run: impl FnOnce() + Send + 'static) -> Self {
        Task {
            label,
            run: Box::new(run),
        }
    }

    #[inline]
    pub fn execute(self) {
        (self.run)()
    }
}

struct OrderedTask {
    priority: Priority,
    insertion: u64,
    task: Task,
}

impl PartialEq for OrderedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.insertion == other.insertion
    }
}

impl Eq for OrderedTask {}

impl PartialOrd for OrderedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier insertion.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.insertion.cmp(&self.insertion))
    }
}

struct Queues {
    io: BinaryHeap<OrderedTask>,
    cpu: BinaryHeap<OrderedTask>,
    next_insertion: u64,
    close_on_empty: bool,
}

impl Queues {
    fn push(&mut self, task: Task, priority: Priority, io: bool) {
        let ordered = OrderedTask {
            priority,
            insertion: self.next_insertion,
            task,
        };
        self.next_insertion += 1;
        if io {
            self.io.push(ordered);
        } else {
            self.cpu.push(ordered);
        }
    }

    fn len(&self) -> usize {
        self.io.len() + self.cpu.len()
    }
}

/// Priority-ordered scheduler shared by all workers.
pub struct Scheduler {
    queues: Mutex<Queues>,
    available: Condvar,
}

impl Scheduler {
    pub fn new() -> Arc<Scheduler> {
        Arc::new(Scheduler {
            queues: Mutex::new(Queues {
                io: BinaryHeap::new(),
                cpu: BinaryHeap::new(),
                next_insertion: 0,
                close_on_empty: false,
            }),
            available: Condvar::new(),
        })
    }

    /// Enqueue one task.
    pub fn schedule(&self, task: Task, priority: Priority, io: bool) {
        let mut queues = self.queues.lock();
        queues.push(task, priority, io);
        drop(queues);
        self.available.notify_one();
    }

    /// Enqueue a batch of tasks at one priority.
    pub fn schedule_all(&self, tasks: Vec<Task>, priority: Priority, io: bool) {
        let mut queues = self.queues.lock();
        for task in tasks {
            queues.push(task, priority, io);
        }
        drop(queues);
        self.available.notify_one();
    }

    /// Best task from the preferred queue, falling back to the other;
    /// blocks while both are empty unless the scheduler is closing.
    /// `None` tells the worker to exit.
    pub fn get_task(&self, prefer_io: bool) -> Option<Task> {
        let mut queues = self.queues.lock();
        loop {
            if !queues.io.is_empty() || !queues.cpu.is_empty() {
                let from_io = (prefer_io && !queues.io.is_empty()) || queues.cpu.is_empty();
                let ordered = if from_io {
                    queues.io.pop()
                } else {
                    queues.cpu.pop()
                };
                let remaining = queues.len();
                drop(queues);
                if remaining > 0 {
                    self.available.notify_one();
                }
                return ordered.map(|o| o.task);
            }
            if queues.close_on_empty {
                drop(queues);
                self.available.notify_one();
                return None;
            }
            self.available.wait(&mut queues);
        }
    }

    /// After this, workers finding both queues empty exit instead of
    /// blocking.
    pub fn set_close_on_empty(&self) {
        let mut queues = self.queues.lock();
        queues.close_on_empty = true;
        drop(queues);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Worker loop: run tasks until the scheduler closes.
pub fn run_worker(scheduler: &Scheduler, prefer_io: bool) {
    while let Some(task) = scheduler.get_task(prefer_io) {
        log::trace!("worker running task {}", task.label);
        task.execute();
    }
}

/// A set of tasks with join semantics: the join task runs exactly once,
/// after the last member finishes.
pub struct TaskGroup {
    tasks: Vec<Task>,
}

impl TaskGroup {
    pub fn new() -> Self {
        TaskGroup { tasks: Vec::new() }
    }

    pub fn schedule(&mut self, task: Task) {
        self.tasks.push(task);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wrap every member so the last one to finish runs `join_task`.
    /// An empty group degrades to the join task alone.
    pub fn join(&mut self, join_task: Task) {
        if self.tasks.is_empty() {
            self.tasks.push(join_task);
            return;
        }
        let counter = Arc::new(AtomicUsize::new(self.tasks.len()));
        let join_slot = Arc::new(Mutex::new(Some(join_task)));
        self.tasks = self
            .tasks
            .drain(..)
            .map(|task| {
                let counter = Arc::clone(&counter);
                let join_slot = Arc::clone(&join_slot);
                Task::new(task.label, move || {
                    task.execute();
                    if counter.fetch_sub(1, AtomicOrdering::AcqRel) == 1 {
                        if let Some(join) = join_slot.lock().take() {
                            join.execute();
                        }
                    }
                })
            })
            .collect();
    }

    /// Hand the (possibly wrapped) members over for scheduling.
    pub fn close(self) -> Vec<Task> {
        self.tasks
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}
