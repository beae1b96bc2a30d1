//! # CMAF ingest engine
//!
//! Pushes simulated live CMAF streams to a remote destination with HTTP PUT,
//! each segment at the moment it becomes available.
//!
//! ## Features
//!
//! - One session per destination, rounds of one segment per representation
//! - Chunked segment bodies streamed while they are being produced
//! - Wall-clock scheduling with drift catch-up, or fixed simulated time
//!   advanced by explicit triggers
//! - Segment number and segment timeline addressing
//! - Pluggable stream sources through [`LiveSource`], with an on-disk
//!   [`VodSource`] looping VOD assets as live

pub mod bridge;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod report;
pub mod sequence;
pub mod session;
pub mod source;
pub mod template;
pub mod timesubs;
pub mod types;
pub mod vod;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{PushHandle, PushOutcome, SegmentBridge, SegmentWriter};
pub use builder::IngestConfigBuilder;
pub use client::create_client;
pub use config::IngestConfig;
pub use error::{IngestError, SegmentError, SourceError};
pub use registry::{IngesterRegistry, RegistryState, build_descriptors};
pub use report::Report;
pub use sequence::{AtomicSequence, SequenceGenerator};
pub use session::{IngestSession, SessionClock, SessionState};
pub use source::LiveSource;
pub use types::{ContentType, Credentials, IngestRequest, RepresentationDescriptor, StreamConfig};
pub use vod::VodSource;
