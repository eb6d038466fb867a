//! Background Compaction Worker
//!
//! A dedicated thread that runs merges when the engine asks, so foreground
//! writes never wait on compaction.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{Result, SegKvError};

use super::Compactor;

/// Messages from the engine to the worker
#[derive(Debug)]
pub enum CompactionRequest {
    /// Compact while thresholds are crossed
    Trigger,

    /// Reply once every earlier request has been handled
    Barrier(Sender<()>),

    /// Finish the current merge and exit
    Shutdown,
}

/// Handle to the compaction thread
pub struct CompactionWorker {
    sender: Sender<CompactionRequest>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    /// Spawn the worker thread
    pub fn spawn(compactor: Arc<Compactor>) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();

        let handle = thread::Builder::new()
            .name("segkv-compactor".to_string())
            .spawn(move || run_loop(compactor, receiver))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Ask for a compaction check; never blocks
    pub fn trigger(&self) {
        if self.sender.send(CompactionRequest::Trigger).is_err() {
            tracing::warn!("Compaction worker is gone; trigger dropped");
        }
    }

    /// Block until all previously sent requests are handled
    pub fn wait_idle(&self) -> Result<()> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.sender
            .send(CompactionRequest::Barrier(reply_tx))
            .map_err(|_| SegKvError::Compaction("compaction worker has stopped".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| SegKvError::Compaction("compaction worker has stopped".to_string()))
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.sender.send(CompactionRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Compaction worker panicked");
            }
        }
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(compactor: Arc<Compactor>, receiver: Receiver<CompactionRequest>) {
    tracing::debug!("Compaction worker started");

    for request in receiver.iter() {
        match request {
            CompactionRequest::Trigger => compact_while_due(&compactor),
            CompactionRequest::Barrier(reply) => {
                let _ = reply.send(());
            }
            CompactionRequest::Shutdown => break,
        }
    }

    tracing::debug!("Compaction worker stopped");
}

/// Each merge lowers the closed-segment count, so this terminates
fn compact_while_due(compactor: &Compactor) {
    while !compactor.is_halted() && compactor.needs_compaction() {
        match compactor.run() {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Background compaction failed, inputs left intact: {}", e);
                break;
            }
        }
    }
}
