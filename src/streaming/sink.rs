//! Flow-controlled sink, one per connected viewer.
//!
//! ACTIVE -> PAUSED on `pause()`, PAUSED -> ACTIVE only after a resume
//! delay, anything -> STOPPED on `stop()`. Frames written while paused are
//! dropped, never queued.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::streaming::channel::{CommandSender, DistributorCommand, SinkId};

/// Sink lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Active,
    Paused,
    Stopped,
}

/// Result of handing one segment to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Delivered,
    /// Sink is paused; segment discarded
    Dropped,
    /// Transport queue full; segment discarded and sink paused
    Saturated,
    /// Transport gone; sink stopped
    Closed,
}

#[derive(Debug)]
pub struct Sink {
    id: SinkId,
    state: SinkState,
    output: Option<mpsc::Sender<Bytes>>,
    congested: Arc<AtomicBool>,
    resume_delay: Duration,
    resume_timer: Option<JoinHandle<()>>,
    generation: u64,
    timer_tx: CommandSender,
}

impl Sink {
    pub fn new(
        id: SinkId,
        output: mpsc::Sender<Bytes>,
        congested: Arc<AtomicBool>,
        resume_delay: Duration,
        timer_tx: CommandSender,
    ) -> Self {
        Self {
            id,
            state: SinkState::Active,
            output: Some(output),
            congested,
            resume_delay,
            resume_timer: None,
            generation: 0,
            timer_tx,
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SinkState::Active
    }

    pub fn resume_pending(&self) -> bool {
        self.resume_timer.is_some()
    }

    /// Stop producing. Cancels a pending resume. Idempotent.
    pub fn pause(&mut self) {
        if self.state == SinkState::Stopped {
            return;
        }
        self.cancel_timer();
        self.state = SinkState::Paused;
    }

    /// Schedule the return to ACTIVE after the resume delay. A second call
    /// before the timer fires replaces it. Returns false if not paused.
    pub fn resume(&mut self) -> bool {
        if self.state != SinkState::Paused {
            return false;
        }
        self.cancel_timer();
        self.generation += 1;

        let id = self.id;
        let generation = self.generation;
        let delay = self.resume_delay;
        let tx = self.timer_tx.clone();
        self.resume_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DistributorCommand::ResumeElapsed { id, generation });
        }));
        true
    }

    /// Apply a fired resume timer. Stale generations are ignored.
    pub fn resume_elapsed(&mut self, generation: u64) -> bool {
        if self.state != SinkState::Paused
            || generation != self.generation
            || self.resume_timer.is_none()
        {
            return false;
        }
        self.resume_timer = None;
        self.state = SinkState::Active;
        true
    }

    /// Terminal. Releases the output channel.
    pub fn stop(&mut self) {
        self.cancel_timer();
        self.state = SinkState::Stopped;
        self.output = None;
    }

    /// Hand one segment to the transport. Callers check `is_active` first;
    /// a non-active sink drops the segment.
    pub fn write(&mut self, segment: Bytes) -> WriteOutcome {
        if self.state != SinkState::Active {
            return match self.state {
                SinkState::Stopped => WriteOutcome::Closed,
                _ => WriteOutcome::Dropped,
            };
        }

        let Some(output) = &self.output else {
            self.stop();
            return WriteOutcome::Closed;
        };

        match output.try_send(segment) {
            Ok(()) => WriteOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                self.congested.store(true, Ordering::Release);
                self.pause();
                WriteOutcome::Saturated
            }
            Err(TrySendError::Closed(_)) => {
                self.stop();
                WriteOutcome::Closed
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.resume_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
