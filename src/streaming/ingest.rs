//! Raw MJPEG source listener.
//!
//! Accepts the encoder's TCP connection, splits the stream at boundary
//! markers and hands each segment to the distributor.

use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;

use crate::error::Result;
use crate::streaming::channel::{DistributorHandle, INGEST_READ_SIZE};
use crate::streaming::splitter::FrameSplitter;

/// Interval between throughput traces
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

/// Pause after a failed accept (e.g. EMFILE) before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-source counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub reads: u64,
    pub bytes_read: u64,
    pub segments: u64,
    pub bytes_forwarded: u64,
}

/// Accept raw sources forever; each connection gets its own splitter.
/// Accept failures are logged and retried, they never end the listener.
pub async fn run_ingest(listener: TcpListener, marker: Vec<u8>, distributor: DistributorHandle) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept MJPEG source, retrying");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        tracing::info!(%peer, "MJPEG image stream received");

        let marker = marker.clone();
        let distributor = distributor.clone();
        tokio::spawn(async move {
            match pump(stream, FrameSplitter::new(marker), &distributor).await {
                Ok(stats) => tracing::info!(
                    %peer,
                    bytes = stats.bytes_read,
                    segments = stats.segments,
                    "MJPEG source closed"
                ),
                Err(e) => tracing::warn!(%peer, error = %e, "MJPEG source failed"),
            }
        });
    }
}

/// Read `source` to EOF, forwarding segments as they complete.
pub async fn pump<R>(
    mut source: R,
    mut splitter: FrameSplitter,
    distributor: &DistributorHandle,
) -> Result<IngestStats>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; INGEST_READ_SIZE];
    let mut stats = IngestStats::default();

    let mut window_start = Instant::now();
    let mut window_bytes = 0u64;
    let mut window_reads = 0u64;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stats.reads += 1;
        stats.bytes_read += n as u64;
        window_reads += 1;

        if let Some(segment) = splitter.feed(&buf[..n]) {
            stats.segments += 1;
            stats.bytes_forwarded += segment.len() as u64;
            window_bytes += segment.len() as u64;
            distributor.broadcast(segment)?;
        }

        if window_start.elapsed() > THROUGHPUT_WINDOW {
            tracing::debug!(
                bytes = window_bytes,
                reads = window_reads,
                buffered = splitter.buffered(),
                "Forwarded in the last second"
            );
            window_start = Instant::now();
            window_bytes = 0;
            window_reads = 0;
        }
    }

    Ok(stats)
}
