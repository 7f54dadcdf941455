//! Background chunk loading
//!
//! The main thread marks a chunk as loading and submits a load task. The
//! task reads and parses the chunk resource on a worker and sends a
//! [`LoadCompletion`] back over a channel; the chunk space drains that
//! channel on the main thread and applies the contents. A worker never
//! touches a live chunk, and a completion whose chunk has since been deleted
//! or cancelled is simply dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use glam::Mat4;

use crate::error::{ChunkError, Result};
use crate::handle::ChunkId;
use crate::item::ItemFactories;
use crate::mapping::GeometryMapping;
use crate::resource::ChunkResource;
use crate::section::{ChunkContents, ChunkSection};
use crate::task::{BackgroundTask, TaskManager, TaskPriority};

/// Outcome of a background load
#[derive(Debug)]
pub struct LoadCompletion {
    /// Chunk the load was for
    pub chunk: ChunkId,
    /// Parsed contents, or why the load failed
    pub result: Result<ChunkContents>,
    /// The load was cancelled before it ran
    pub cancelled: bool,
    ticket: u64,
}

struct LoadChunkTask {
    chunk: ChunkId,
    identifier: String,
    resource_id: String,
    mapping_transform: Mat4,
    grid_size: f32,
    resource: Arc<dyn ChunkResource>,
    factories: Arc<ItemFactories>,
    cancelled: Arc<AtomicBool>,
    done: Sender<LoadCompletion>,
    submitted_at: Instant,
    ticket: u64,
}

impl LoadChunkTask {
    fn load(&self) -> Result<ChunkContents> {
        let bytes = self.resource.read(&self.resource_id)?;
        let section = ChunkSection::from_slice(&bytes)?;
        ChunkContents::from_section(
            &self.identifier,
            &section,
            self.mapping_transform,
            self.grid_size,
            &self.factories,
        )
    }

    fn send(&self, result: Result<ChunkContents>, cancelled: bool) {
        let completion = LoadCompletion {
            chunk: self.chunk,
            result,
            cancelled,
            ticket: self.ticket,
        };
        if self.done.send(completion).is_err() {
            log::debug!("Chunk loader gone; dropping load of '{}'", self.identifier);
        }
    }
}

impl BackgroundTask for LoadChunkTask {
    fn do_background_task(&mut self) {
        if self.cancelled.load(Ordering::Acquire) {
            self.send(Err(cancelled_error(&self.identifier)), true);
            return;
        }

        let result = self.load();
        log::debug!(
            "Loaded chunk '{}' in {:.2}ms ({})",
            self.identifier,
            self.submitted_at.elapsed().as_secs_f64() * 1000.0,
            if result.is_ok() { "ok" } else { "failed" }
        );
        self.send(result, false);
    }

    fn cancel(&mut self) {
        self.send(Err(cancelled_error(&self.identifier)), true);
    }

    fn name(&self) -> &str {
        &self.identifier
    }
}

fn cancelled_error(identifier: &str) -> ChunkError {
    ChunkError::InvalidState {
        identifier: identifier.to_string(),
        operation: "load",
        reason: "load was cancelled",
    }
}

/// Submits chunk loads and collects their completions
pub struct ChunkLoader {
    tasks: Arc<dyn TaskManager>,
    resource: Arc<dyn ChunkResource>,
    factories: Arc<ItemFactories>,
    done_tx: Sender<LoadCompletion>,
    done_rx: Receiver<LoadCompletion>,
    in_flight: HashMap<ChunkId, (u64, Arc<AtomicBool>)>,
    next_ticket: u64,
}

impl ChunkLoader {
    /// Create a loader
    pub fn new(
        tasks: Arc<dyn TaskManager>,
        resource: Arc<dyn ChunkResource>,
        factories: Arc<ItemFactories>,
    ) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        Self {
            tasks,
            resource,
            factories,
            done_tx,
            done_rx,
            in_flight: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Submit a background load of a chunk
    pub fn load(
        &mut self,
        chunk: ChunkId,
        identifier: &str,
        mapping: &GeometryMapping,
        priority: TaskPriority,
    ) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        if let Some((_, previous)) = self.in_flight.insert(chunk, (ticket, cancelled.clone())) {
            log::warn!("Chunk '{}' resubmitted while loading", identifier);
            previous.store(true, Ordering::Release);
        }

        let task = LoadChunkTask {
            chunk,
            identifier: identifier.to_string(),
            resource_id: mapping.resource_id(identifier),
            mapping_transform: mapping.transform(),
            grid_size: mapping.grid_size,
            resource: self.resource.clone(),
            factories: self.factories.clone(),
            cancelled,
            done: self.done_tx.clone(),
            submitted_at: Instant::now(),
            ticket,
        };
        self.tasks.submit(Box::new(task), priority);
    }

    /// Flag a pending load as cancelled; returns false if none is pending
    pub fn cancel(&mut self, chunk: ChunkId) -> bool {
        match self.in_flight.remove(&chunk) {
            Some((_, flag)) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Check whether a load of the chunk is pending
    pub fn is_loading(&self, chunk: ChunkId) -> bool {
        self.in_flight.contains_key(&chunk)
    }

    /// Number of pending loads
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Item factories used by loads
    pub fn factories(&self) -> &ItemFactories {
        &self.factories
    }

    /// Collect completions of loads that are still wanted
    pub fn drain(&mut self) -> Vec<LoadCompletion> {
        self.tasks.tick();

        let mut wanted = Vec::new();
        while let Ok(completion) = self.done_rx.try_recv() {
            match self.in_flight.get(&completion.chunk) {
                Some((ticket, _)) if *ticket == completion.ticket => {
                    self.in_flight.remove(&completion.chunk);
                    wanted.push(completion);
                }
                _ => log::trace!("Dropping stale load completion for {:?}", completion.chunk),
            }
        }
        wanted
    }
}
