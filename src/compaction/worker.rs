//! Background compaction worker
//!
//! A single thread that runs compaction passes on request. Requests go
//! through a bounded channel of capacity 1, so a burst of rotations while a
//! pass is pending coalesces into one more pass.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};

use crate::error::Result;

pub(crate) struct CompactionWorker {
    sender: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    /// Spawn the worker thread; `task` runs once per accepted request
    pub fn spawn<F>(task: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (sender, receiver) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("driftkv-compaction".to_string())
            .spawn(move || {
                while receiver.recv().is_ok() {
                    task();
                }
                tracing::debug!("Compaction worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Request a pass; returns false if one is already queued
    pub fn schedule(&self) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        match sender.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Disconnected(())) => {
                tracing::warn!("Compaction worker is gone, request dropped");
                false
            }
        }
    }

    /// Stop accepting requests, finish queued work, and join the thread
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Compaction worker panicked");
            }
        }
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
