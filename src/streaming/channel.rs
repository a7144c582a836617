//! Channel types for the fan-out pipeline.
//!
//! Ingest -> Distributor -> N x viewer connection.
//! The distributor owns every sink; everything else talks to it through
//! `DistributorCommand` messages so the sink set needs no locking.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{MonitorError, Result};

/// Read size for the raw source socket
pub const INGEST_READ_SIZE: usize = 64 * 1024;

/// Identifier of one connected viewer
pub type SinkId = u64;

// =============================================================================
// Distributor commands
// =============================================================================

/// Message to the distributor task
#[derive(Debug)]
pub enum DistributorCommand {
    /// A viewer connected; frames go to `output` while the sink is active
    Register {
        id: SinkId,
        output: mpsc::Sender<Bytes>,
        congested: Arc<AtomicBool>,
    },

    /// A segment from the splitter, to every active sink
    Broadcast(Bytes),

    /// Transport asked the sink to stop producing
    Pause(SinkId),

    /// Transport drained; sink becomes active after the resume delay
    Resume(SinkId),

    /// A resume timer fired
    ResumeElapsed { id: SinkId, generation: u64 },

    /// Viewer connection lost
    Disconnected(SinkId),

    /// Stop the distributor task
    Shutdown,
}

pub type CommandSender = mpsc::UnboundedSender<DistributorCommand>;
pub type CommandReceiver = mpsc::UnboundedReceiver<DistributorCommand>;

/// Create the command channel feeding the distributor
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}

// =============================================================================
// DistributorHandle: cloneable front end
// =============================================================================

/// Cloneable handle to a running distributor
#[derive(Debug, Clone)]
pub struct DistributorHandle {
    tx: CommandSender,
    next_id: Arc<AtomicU64>,
    queue_frames: usize,
}

impl DistributorHandle {
    pub fn new(tx: CommandSender, queue_frames: usize) -> Self {
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            queue_frames,
        }
    }

    /// Register a new viewer and return the receiving end of its sink.
    pub fn connect(&self) -> Result<ViewerFeed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (output, rx) = mpsc::channel(self.queue_frames);
        let congested = Arc::new(AtomicBool::new(false));

        self.send(DistributorCommand::Register {
            id,
            output,
            congested: congested.clone(),
        })?;

        Ok(ViewerFeed {
            id,
            rx,
            congested,
            tx: self.tx.clone(),
        })
    }

    pub fn broadcast(&self, segment: Bytes) -> Result<()> {
        self.send(DistributorCommand::Broadcast(segment))
    }

    pub fn pause(&self, id: SinkId) -> Result<()> {
        self.send(DistributorCommand::Pause(id))
    }

    pub fn resume(&self, id: SinkId) -> Result<()> {
        self.send(DistributorCommand::Resume(id))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(DistributorCommand::Shutdown)
    }

    fn send(&self, cmd: DistributorCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| MonitorError::ChannelClosed("distributor"))
    }
}

// =============================================================================
// ViewerFeed: connection side of a sink
// =============================================================================

/// Receiving end of one sink, held by the viewer connection task.
///
/// Dropping the feed tells the distributor the viewer is gone.
#[derive(Debug)]
pub struct ViewerFeed {
    id: SinkId,
    rx: mpsc::Receiver<Bytes>,
    congested: Arc<AtomicBool>,
    tx: CommandSender,
}

impl ViewerFeed {
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Next segment for this viewer, or `None` once the sink is stopped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Call after a segment reached the socket. If the distributor paused
    /// this sink for saturation, ask for it to be resumed.
    pub fn written(&self) {
        if self.congested.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(DistributorCommand::Resume(self.id));
        }
    }
}

impl Drop for ViewerFeed {
    fn drop(&mut self) {
        let _ = self.tx.send(DistributorCommand::Disconnected(self.id));
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters kept by the distributor
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DistributorStats {
    /// Segments received for broadcast
    pub segments: u64,

    /// Segment copies handed to viewer transports
    pub delivered: u64,

    /// Segment copies dropped because the sink was paused
    pub dropped_paused: u64,

    /// Segment copies dropped because the transport queue was full
    pub dropped_saturated: u64,

    /// Viewers ever registered
    pub viewers_seen: u64,
}

impl DistributorStats {
    pub fn new() -> Self {
        Self::default()
    }
}
