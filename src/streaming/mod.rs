//! MJPEG fan-out data plane.
//!
//! One raw source, many viewers. Slow viewers lose frames instead of
//! stalling the others.
//!
//! # Architecture
//!
//! ```text
//! +--------------+     +---------------+     +---------------+
//! |    Ingest    | --> |  Distributor  | --> | Sink x N      |
//! | (splitter)   |     | (one task)    |     | (per viewer)  |
//! +--------------+     +---------------+     +---------------+
//!                             ^                     |
//!                             +-- pause / resume ---+
//! ```
//!
//! Segments are `Bytes`, so fan-out clones are reference counted.

pub mod channel;
pub mod distributor;
pub mod ingest;
pub mod sink;
pub mod splitter;

pub use channel::{
    DistributorCommand, DistributorHandle, DistributorStats, SinkId, ViewerFeed,
    INGEST_READ_SIZE,
};
pub use distributor::Distributor;
pub use ingest::{pump, run_ingest, IngestStats};
pub use sink::{Sink, SinkState, WriteOutcome};
pub use splitter::FrameSplitter;
