//! The collaborator an ingester pulls its stream from.
//!
//! A [`LiveSource`] owns everything about the simulated stream itself:
//! resolving the stream URL, finding the asset behind it, building the
//! manifest, the segment availability arithmetic and producing segment
//! bytes. The ingest engine only schedules and pushes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::bridge::SegmentWriter;
use crate::error::{SegmentError, SourceError};
use crate::types::{InitSegment, Manifest, SegmentEntries, StreamConfig};

#[async_trait]
pub trait LiveSource: Send + Sync + 'static {
    /// Handle on a located asset.
    type Asset: Send + Sync + 'static;
    /// Wrap-around timing windows used for segment timeline generation.
    type Windows: Send + Sync;

    /// Resolve a stream URL into the current time (ms) and its stream
    /// configuration. `now_override_ms` pins the simulated clock.
    fn resolve_config(
        &self,
        url: &str,
        now_override_ms: Option<i64>,
    ) -> Result<(i64, StreamConfig), SourceError>;

    fn find_asset(&self, content_path: &str) -> Option<Arc<Self::Asset>>;

    fn build_manifest(
        &self,
        asset: &Self::Asset,
        manifest_name: &str,
        cfg: &StreamConfig,
        now_ms: i64,
    ) -> Result<Manifest, SourceError>;

    async fn resolve_init_segment(
        &self,
        init_path: &str,
        cfg: &StreamConfig,
        asset: &Self::Asset,
    ) -> Result<InitSegment, SourceError>;

    /// Representation whose segment grid drives the schedule.
    fn reference_representation(&self, asset: &Self::Asset) -> String;

    /// Number of the last segment available at `now_ms`. May be negative
    /// before the first segment is complete.
    fn last_segment_number(
        &self,
        cfg: &StreamConfig,
        asset: &Self::Asset,
        now_ms: i64,
        reference_rep: &str,
    ) -> i64;

    /// Wall-clock instant (ms) at which segment `nr` becomes available.
    fn segment_availability_time(
        &self,
        asset: &Self::Asset,
        reference_rep: &str,
        nr: u64,
        cfg: &StreamConfig,
    ) -> Result<i64, SourceError>;

    fn wrap_windows(
        &self,
        asset: &Self::Asset,
        cfg: &StreamConfig,
        now_ms: i64,
        segment_duration: Duration,
    ) -> Self::Windows;

    fn timeline_entries(
        &self,
        asset: &Self::Asset,
        rep_id: &str,
        windows: &Self::Windows,
        availability_offset_ms: i64,
    ) -> SegmentEntries;

    /// Entries for `rep_id` aligned on another representation's entries.
    fn timeline_entries_from_ref(
        &self,
        asset: &Self::Asset,
        reference: &SegmentEntries,
        rep_id: &str,
    ) -> SegmentEntries;

    /// Produce the bytes of `segment_name` into `writer`.
    async fn write_segment(
        &self,
        writer: &mut SegmentWriter,
        cfg: &StreamConfig,
        asset: &Self::Asset,
        segment_name: &str,
        now_ms: i64,
    ) -> Result<StatusCode, SegmentError>;
}
