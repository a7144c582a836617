//! Fan-out distributor.
//!
//! Owns the live sink set and routes each segment to every ACTIVE sink.
//! Runs as a single task; registration, flow control and disconnects all
//! arrive as `DistributorCommand`s.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::streaming::channel::{
    command_channel, CommandReceiver, CommandSender, DistributorCommand, DistributorHandle,
    DistributorStats, SinkId,
};
use crate::streaming::sink::{Sink, SinkState, WriteOutcome};

/// Distributor state
pub struct Distributor {
    sinks: HashMap<SinkId, Sink>,
    rx: CommandReceiver,
    timer_tx: CommandSender,
    resume_delay: Duration,
    stats: DistributorStats,
}

impl Distributor {
    /// Create a distributor and the handle used to reach it.
    pub fn new(resume_delay: Duration, queue_frames: usize) -> (Self, DistributorHandle) {
        let (tx, rx) = command_channel();
        let handle = DistributorHandle::new(tx.clone(), queue_frames);
        let distributor = Self {
            sinks: HashMap::new(),
            rx,
            timer_tx: tx,
            resume_delay,
            stats: DistributorStats::new(),
        };
        (distributor, handle)
    }

    /// Process commands until `Shutdown`.
    pub async fn run(mut self) -> DistributorStats {
        while let Some(cmd) = self.rx.recv().await {
            if !self.handle(cmd) {
                break;
            }
        }

        for sink in self.sinks.values_mut() {
            sink.stop();
        }
        self.sinks.clear();

        tracing::debug!(
            segments = self.stats.segments,
            delivered = self.stats.delivered,
            dropped_paused = self.stats.dropped_paused,
            dropped_saturated = self.stats.dropped_saturated,
            viewers = self.stats.viewers_seen,
            "Distributor stopped"
        );
        self.stats
    }

    /// Apply one command. Returns false on shutdown.
    pub fn handle(&mut self, cmd: DistributorCommand) -> bool {
        match cmd {
            DistributorCommand::Register {
                id,
                output,
                congested,
            } => self.register(id, output, congested),
            DistributorCommand::Broadcast(segment) => {
                self.broadcast(segment);
            }
            DistributorCommand::Pause(id) => self.pause(id),
            DistributorCommand::Resume(id) => self.resume(id),
            DistributorCommand::ResumeElapsed { id, generation } => {
                if let Some(sink) = self.sinks.get_mut(&id) {
                    sink.resume_elapsed(generation);
                }
            }
            DistributorCommand::Disconnected(id) => self.disconnected(id),
            DistributorCommand::Shutdown => return false,
        }
        true
    }

    pub fn register(
        &mut self,
        id: SinkId,
        output: mpsc::Sender<Bytes>,
        congested: Arc<AtomicBool>,
    ) {
        let sink = Sink::new(
            id,
            output,
            congested,
            self.resume_delay,
            self.timer_tx.clone(),
        );
        self.sinks.insert(id, sink);
        self.stats.viewers_seen += 1;
        tracing::info!(viewer = id, viewers = self.sinks.len(), "New viewer of image stream");
    }

    /// Route one segment to every active sink. Returns the delivery count.
    pub fn broadcast(&mut self, segment: Bytes) -> usize {
        self.stats.segments += 1;
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, sink) in self.sinks.iter_mut() {
            if !sink.is_active() {
                self.stats.dropped_paused += 1;
                continue;
            }
            match sink.write(segment.clone()) {
                WriteOutcome::Delivered => delivered += 1,
                WriteOutcome::Dropped => self.stats.dropped_paused += 1,
                WriteOutcome::Saturated => {
                    self.stats.dropped_saturated += 1;
                    tracing::debug!(viewer = id, "Viewer transport saturated, pausing");
                }
                WriteOutcome::Closed => closed.push(*id),
            }
        }

        for id in closed {
            self.disconnected(id);
        }

        self.stats.delivered += delivered as u64;
        delivered
    }

    pub fn pause(&mut self, id: SinkId) {
        if let Some(sink) = self.sinks.get_mut(&id) {
            sink.pause();
        }
    }

    pub fn resume(&mut self, id: SinkId) {
        if let Some(sink) = self.sinks.get_mut(&id) {
            sink.resume();
        }
    }

    /// Stop and forget a sink whose viewer went away.
    pub fn disconnected(&mut self, id: SinkId) {
        if let Some(mut sink) = self.sinks.remove(&id) {
            sink.stop();
            tracing::info!(viewer = id, viewers = self.sinks.len(), "Connection to viewer lost");
        }
    }

    pub fn sink_state(&self, id: SinkId) -> Option<SinkState> {
        self.sinks.get(&id).map(|s| s.state())
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn stats(&self) -> &DistributorStats {
        &self.stats
    }

    /// Apply every command already queued.
    #[cfg(test)]
    pub fn drain_pending(&mut self) -> bool {
        while let Ok(cmd) = self.rx.try_recv() {
            if !self.handle(cmd) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(1);

    fn viewer(d: &mut Distributor, id: SinkId, queue: usize) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(queue);
        d.register(id, tx, Arc::new(AtomicBool::new(false)));
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(b);
        }
        out
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_active() {
        let (mut d, _handle) = Distributor::new(DELAY, 8);
        let mut a = viewer(&mut d, 1, 8);
        let mut b = viewer(&mut d, 2, 8);

        assert_eq!(d.broadcast(Bytes::from_static(b"seg")), 2);
        assert_eq!(drain(&mut a), vec![Bytes::from_static(b"seg")]);
        assert_eq!(drain(&mut b), vec![Bytes::from_static(b"seg")]);
    }

    #[tokio::test]
    async fn test_paused_sink_gets_nothing_others_unaffected() {
        let (mut d, _handle) = Distributor::new(DELAY, 8);
        let mut slow = viewer(&mut d, 1, 8);
        let mut fast = viewer(&mut d, 2, 8);

        d.pause(1);
        for _ in 0..5 {
            d.broadcast(Bytes::from_static(b"seg"));
        }

        assert!(drain(&mut slow).is_empty());
        assert_eq!(drain(&mut fast).len(), 5);
        assert_eq!(d.stats().dropped_paused, 5);
    }

    #[tokio::test]
    async fn test_saturated_viewer_paused_not_blocking() {
        let (mut d, _handle) = Distributor::new(DELAY, 8);
        let mut slow = viewer(&mut d, 1, 1);
        let mut fast = viewer(&mut d, 2, 16);

        for _ in 0..10 {
            d.broadcast(Bytes::from_static(b"seg"));
        }

        assert_eq!(d.sink_state(1), Some(SinkState::Paused));
        assert_eq!(drain(&mut slow).len(), 1);
        assert_eq!(drain(&mut fast).len(), 10);
    }

    #[tokio::test]
    async fn test_closed_viewer_removed_on_broadcast() {
        let (mut d, _handle) = Distributor::new(DELAY, 8);
        let gone = viewer(&mut d, 1, 8);
        let _alive = viewer(&mut d, 2, 8);
        drop(gone);

        assert_eq!(d.broadcast(Bytes::from_static(b"seg")), 1);
        assert_eq!(d.len(), 1);
        assert_eq!(d.sink_state(1), None);
    }

    #[tokio::test]
    async fn test_disconnect_removes_sink() {
        let (mut d, _handle) = Distributor::new(DELAY, 8);
        let _rx = viewer(&mut d, 1, 8);
        d.disconnected(1);
        assert!(d.is_empty());
        // Unknown ids are ignored
        d.disconnected(1);
        d.pause(42);
        d.resume(42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_through_command_loop() {
        let (mut d, _handle) = Distributor::new(DELAY, 8);
        let mut rx = viewer(&mut d, 1, 8);

        d.pause(1);
        d.resume(1);
        d.broadcast(Bytes::from_static(b"during-throttle"));

        tokio::time::sleep(DELAY * 2).await;
        assert!(d.drain_pending());
        assert_eq!(d.sink_state(1), Some(SinkState::Active));

        d.broadcast(Bytes::from_static(b"after"));
        assert_eq!(drain(&mut rx), vec![Bytes::from_static(b"after")]);
    }

    #[tokio::test]
    async fn test_run_via_handle() {
        let (d, handle) = Distributor::new(DELAY, 8);
        let task = tokio::spawn(d.run());

        let mut feed = handle.connect().unwrap();
        handle.broadcast(Bytes::from_static(b"one")).unwrap();
        assert_eq!(feed.recv().await.unwrap(), Bytes::from_static(b"one"));

        drop(feed);
        handle.shutdown().unwrap();
        let stats = task.await.unwrap();
        assert_eq!(stats.viewers_seen, 1);
        assert_eq!(stats.delivered, 1);
    }
}
