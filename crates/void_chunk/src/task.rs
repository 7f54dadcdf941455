//! Background task management
//!
//! Chunk loading hands its slow work (resource reads, parsing, item
//! construction) to a [`TaskManager`]. A task runs its background half on a
//! worker and its main-thread half when the owner next calls
//! [`TaskManager::tick`].
//!
//! # Architecture
//!
//! ```text
//!  main thread                         workers
//! ┌───────────────┐  high ─────────▶ ┌──────────────────────┐
//! │ submit(task)  │  low  ─────────▶ │ do_background_task() │
//! └───────────────┘                  └──────────┬───────────┘
//! ┌───────────────┐        done                 │
//! │ tick()        │ ◀───────────────────────────┘
//! │ do_main_thread│
//! └───────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// Scheduling priority of a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// A unit of work split between a worker and the main thread
pub trait BackgroundTask: Send {
    /// Runs on a worker thread
    fn do_background_task(&mut self);

    /// Runs on the main thread after the background half
    fn do_main_thread_task(self: Box<Self>) {}

    /// Runs on the main thread instead of both halves when the task is dropped unrun
    fn cancel(&mut self) {}

    /// Name used in logs
    fn name(&self) -> &str {
        "task"
    }
}

/// Accepts background tasks
pub trait TaskManager: Send + Sync {
    /// Queue a task; fire and forget
    fn submit(&self, task: Box<dyn BackgroundTask>, priority: TaskPriority);

    /// Run main-thread halves of finished tasks; returns how many ran
    fn tick(&self) -> usize;

    /// Tasks submitted but not yet finished on the main thread
    fn pending(&self) -> usize;
}

type TaskBox = Box<dyn BackgroundTask>;

/// Fixed pool of named worker threads
pub struct WorkerPool {
    high_tx: Option<Sender<TaskBox>>,
    low_tx: Option<Sender<TaskBox>>,
    done_rx: Receiver<TaskBox>,
    cancelled_rx: Receiver<TaskBox>,
    pending: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one)
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (high_tx, high_rx) = crossbeam_channel::unbounded::<TaskBox>();
        let (low_tx, low_rx) = crossbeam_channel::unbounded::<TaskBox>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<TaskBox>();
        let (cancelled_tx, cancelled_rx) = crossbeam_channel::unbounded::<TaskBox>();
        let stopping = Arc::new(AtomicBool::new(false));

        let count = threads.max(1);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let high = high_rx.clone();
            let low = low_rx.clone();
            let done = done_tx.clone();
            let cancelled = cancelled_tx.clone();
            let stopping = stopping.clone();
            let handle = thread::Builder::new()
                .name(format!("chunk-loader-{index}"))
                .spawn(move || Self::worker_loop(high, low, done, cancelled, stopping))?;
            workers.push(handle);
        }
        log::info!("Chunk worker pool started with {} threads", count);

        Ok(Self {
            high_tx: Some(high_tx),
            low_tx: Some(low_tx),
            done_rx,
            cancelled_rx,
            pending: Arc::new(AtomicUsize::new(0)),
            stopping,
            workers,
        })
    }

    fn worker_loop(
        high: Receiver<TaskBox>,
        low: Receiver<TaskBox>,
        done: Sender<TaskBox>,
        cancelled: Sender<TaskBox>,
        stopping: Arc<AtomicBool>,
    ) {
        loop {
            // High priority work is always taken first when present
            let next = match high.try_recv() {
                Ok(task) => Some(task),
                Err(_) => crossbeam_channel::select! {
                    recv(high) -> msg => msg.ok().or_else(|| low.recv().ok()),
                    recv(low) -> msg => msg.ok().or_else(|| high.recv().ok()),
                },
            };
            let Some(mut task) = next else {
                break;
            };

            if stopping.load(Ordering::Acquire) {
                let _ = cancelled.send(task);
                continue;
            }

            task.do_background_task();
            if done.send(task).is_err() {
                break;
            }
        }
    }

    /// Number of worker threads
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop the workers. Queued tasks are cancelled rather than run.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.stopping.store(true, Ordering::Release);
        self.high_tx.take();
        self.low_tx.take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Chunk worker thread panicked");
            }
        }
        while let Ok(mut task) = self.cancelled_rx.try_recv() {
            log::debug!("Cancelling unrun task '{}'", task.name());
            task.cancel();
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        log::info!("Chunk worker pool stopped");
    }
}

impl TaskManager for WorkerPool {
    fn submit(&self, task: TaskBox, priority: TaskPriority) {
        let sender = match priority {
            TaskPriority::High => self.high_tx.as_ref(),
            TaskPriority::Normal | TaskPriority::Low => self.low_tx.as_ref(),
        };
        let Some(sender) = sender else {
            log::warn!("Task '{}' submitted after shutdown; cancelling", task.name());
            let mut task = task;
            task.cancel();
            return;
        };

        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = sender.send(task) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            let mut task = err.into_inner();
            log::error!("Worker pool is gone; cancelling task '{}'", task.name());
            task.cancel();
        }
    }

    fn tick(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.done_rx.try_recv() {
            task.do_main_thread_task();
            self.pending.fetch_sub(1, Ordering::AcqRel);
            ran += 1;
        }
        ran
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs both halves of every task inline at submission
#[derive(Debug, Default)]
pub struct ImmediateTaskManager;

impl ImmediateTaskManager {
    pub fn new() -> Self {
        Self
    }
}

impl TaskManager for ImmediateTaskManager {
    fn submit(&self, mut task: TaskBox, _priority: TaskPriority) {
        task.do_background_task();
        task.do_main_thread_task();
    }

    fn tick(&self) -> usize {
        0
    }

    fn pending(&self) -> usize {
        0
    }
}

/// Holds tasks until told to run them, for deterministic stepping
#[derive(Default)]
pub struct QueuedTaskManager {
    queue: Mutex<VecDeque<(TaskPriority, TaskBox)>>,
}

impl QueuedTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the highest priority queued task; returns false when empty
    pub fn run_one(&self) -> bool {
        let next = {
            let mut queue = self.queue.lock();
            let best = queue
                .iter()
                .enumerate()
                .max_by_key(|(index, (priority, _))| (*priority, std::cmp::Reverse(*index)))
                .map(|(index, _)| index);
            best.and_then(|index| queue.remove(index))
        };
        match next {
            Some((_, mut task)) => {
                task.do_background_task();
                task.do_main_thread_task();
                true
            }
            None => false,
        }
    }

    /// Run every queued task; returns how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Cancel every queued task
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.queue.lock().drain(..).collect();
        let count = drained.len();
        for (_, mut task) in drained {
            task.cancel();
        }
        count
    }
}

impl TaskManager for QueuedTaskManager {
    fn submit(&self, task: TaskBox, priority: TaskPriority) {
        self.queue.lock().push_back((priority, task));
    }

    fn tick(&self) -> usize {
        0
    }

    fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}
