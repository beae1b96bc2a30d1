//! Test fixtures: a scriptable [`LiveSource`] and an in-process PUT
//! receiver.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::put;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::bridge::SegmentWriter;
use crate::error::{SegmentError, SourceError};
use crate::source::LiveSource;
use crate::types::{
    AdaptationSet, InitSegment, Manifest, Period, Representation, SegmentEntries, SegmentTemplate,
    StreamConfig, TimelineEntry,
};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub(crate) struct PutRecord {
    pub path: String,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub body: Bytes,
}

#[derive(Clone, Default)]
struct ReceiverState {
    records: Arc<Mutex<Vec<PutRecord>>>,
    statuses: Arc<Mutex<HashMap<String, axum::http::StatusCode>>>,
}

/// HTTP server accepting PUTs on any path and recording them.
pub(crate) struct PutReceiver {
    addr: SocketAddr,
    state: ReceiverState,
}

async fn record_put(
    State(state): State<ReceiverState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::http::StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let status = state
        .statuses
        .lock()
        .get(&path)
        .copied()
        .unwrap_or(axum::http::StatusCode::OK);
    state.records.lock().push(PutRecord {
        content_type: header("content-type"),
        authorization: header("authorization"),
        path,
        body,
    });
    status
}

impl PutReceiver {
    pub async fn start() -> Self {
        let state = ReceiverState::default();
        let app = Router::new()
            .route("/{*path}", put(record_put))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path)
    }

    /// Answer PUTs to `path` with `status` instead of 200.
    pub fn respond_with(&self, path: &str, status: axum::http::StatusCode) {
        self.state.statuses.lock().insert(path.to_string(), status);
    }

    pub fn records(&self) -> Vec<PutRecord> {
        self.state.records.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state
            .records
            .lock()
            .iter()
            .map(|r| r.path.clone())
            .collect()
    }

    /// Wait until at least `count` PUTs have been received.
    pub async fn wait_for(&self, count: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.state.records.lock().len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} PUTs, got {:?}",
                self.paths()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FailKind {
    NotFound,
    TooEarly,
    Gone,
    Other,
}

#[derive(Debug, Clone)]
struct MockRep {
    id: String,
    content_type: String,
    timescale: u32,
}

pub(crate) struct MockAsset;

pub(crate) struct MockWindows {
    now_ms: i64,
}

/// Live source with a fixed segment grid starting at time zero.
///
/// Defaults to an asset with a video `v` and an audio `a` representation
/// (listed audio first), media named `<rep>-$Number$.m4s`.
pub(crate) struct MockSource {
    segment_duration_ms: i64,
    availability_shift_ms: i64,
    segment_timeline: bool,
    time_subs: Vec<String>,
    reps: Vec<MockRep>,
    failing: Mutex<HashMap<String, FailKind>>,
    missing_init: Mutex<Vec<String>>,
    write_delay: Option<Duration>,
    writes: Arc<Mutex<Vec<(String, i64)>>>,
}

impl MockSource {
    pub fn new(segment_duration_ms: i64) -> Self {
        Self {
            segment_duration_ms,
            availability_shift_ms: 0,
            segment_timeline: false,
            time_subs: Vec::new(),
            reps: vec![
                MockRep {
                    id: "a".to_string(),
                    content_type: "audio".to_string(),
                    timescale: 48_000,
                },
                MockRep {
                    id: "v".to_string(),
                    content_type: "video".to_string(),
                    timescale: 90_000,
                },
            ],
            failing: Mutex::new(HashMap::new()),
            missing_init: Mutex::new(Vec::new()),
            write_delay: None,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_segment_timeline(mut self) -> Self {
        self.segment_timeline = true;
        self
    }

    /// Shift every availability time by `shift_ms`.
    pub fn with_availability_shift(mut self, shift_ms: i64) -> Self {
        self.availability_shift_ms = shift_ms;
        self
    }

    pub fn with_time_subs(mut self, lang: &str) -> Self {
        self.time_subs.push(lang.to_string());
        self.reps.push(MockRep {
            id: format!("timestpp-{lang}"),
            content_type: "text".to_string(),
            timescale: 1000,
        });
        self
    }

    pub fn with_rep(mut self, id: &str, content_type: &str) -> Self {
        self.reps.push(MockRep {
            id: id.to_string(),
            content_type: content_type.to_string(),
            timescale: 1000,
        });
        self
    }

    /// Sleep this long inside every segment write.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn fail_rep(&self, rep_id: &str, kind: FailKind) {
        self.failing.lock().insert(rep_id.to_string(), kind);
    }

    pub fn missing_init(&self, rep_id: &str) {
        self.missing_init.lock().push(rep_id.to_string());
    }

    /// Segment names produced so far with the `now` they were produced at.
    pub fn writes(&self) -> Arc<Mutex<Vec<(String, i64)>>> {
        Arc::clone(&self.writes)
    }

    fn rep(&self, rep_id: &str) -> Option<&MockRep> {
        self.reps.iter().find(|r| r.id == rep_id)
    }

    fn entries(&self, rep_id: &str, last_nr: u64) -> SegmentEntries {
        let timescale = self.rep(rep_id).map_or(1000, |r| r.timescale);
        let d = self.segment_duration_ms as u64 * u64::from(timescale) / 1000;
        SegmentEntries {
            rep_id: rep_id.to_string(),
            timescale,
            entries: vec![TimelineEntry {
                t: 0,
                d,
                r: last_nr as u32,
            }],
        }
    }
}

#[async_trait]
impl LiveSource for MockSource {
    type Asset = MockAsset;
    type Windows = MockWindows;

    fn resolve_config(
        &self,
        url: &str,
        now_override_ms: Option<i64>,
    ) -> Result<(i64, StreamConfig), SourceError> {
        let parsed = url::Url::parse(url).map_err(|e| SourceError::InvalidUrl(e.to_string()))?;
        let url_parts: Vec<String> = parsed.path().split('/').map(str::to_string).collect();
        if url_parts.len() < 4 {
            return Err(SourceError::InvalidUrl(url.to_string()));
        }
        let now = now_override_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        Ok((
            now,
            StreamConfig {
                url_parts,
                segment_timeline: self.segment_timeline,
                availability_time_offset_s: 0.0,
                time_subs_stpp_languages: self.time_subs.clone(),
            },
        ))
    }

    fn find_asset(&self, content_path: &str) -> Option<Arc<MockAsset>> {
        content_path.starts_with("asset/").then(|| Arc::new(MockAsset))
    }

    fn build_manifest(
        &self,
        _asset: &MockAsset,
        _manifest_name: &str,
        _cfg: &StreamConfig,
        _now_ms: i64,
    ) -> Result<Manifest, SourceError> {
        let media = if self.segment_timeline {
            "$RepresentationID$-$Time$.m4s"
        } else {
            "$RepresentationID$-$Number$.m4s"
        };
        let adaptation_sets = self
            .reps
            .iter()
            .map(|rep| AdaptationSet {
                content_type: rep.content_type.clone(),
                segment_template: Some(SegmentTemplate {
                    initialization: "$RepresentationID$/init.mp4".to_string(),
                    media: media.to_string(),
                    timescale: rep.timescale,
                    start_number: 0,
                }),
                representations: vec![Representation {
                    id: rep.id.clone(),
                    bandwidth: 100_000,
                    segment_template: None,
                }],
            })
            .collect();
        Ok(Manifest {
            periods: vec![Period {
                id: "P0".to_string(),
                adaptation_sets,
            }],
        })
    }

    async fn resolve_init_segment(
        &self,
        init_path: &str,
        _cfg: &StreamConfig,
        _asset: &MockAsset,
    ) -> Result<InitSegment, SourceError> {
        let rep_id = init_path.split('/').next().unwrap_or_default();
        let is_init = !self.missing_init.lock().iter().any(|r| r == rep_id);
        Ok(InitSegment {
            is_init,
            data: Bytes::from(format!("init:{rep_id}")),
            segment_type: "video/mp4".to_string(),
        })
    }

    fn reference_representation(&self, _asset: &MockAsset) -> String {
        "v".to_string()
    }

    fn last_segment_number(
        &self,
        _cfg: &StreamConfig,
        _asset: &MockAsset,
        now_ms: i64,
        _reference_rep: &str,
    ) -> i64 {
        now_ms.div_euclid(self.segment_duration_ms) - 1
    }

    fn segment_availability_time(
        &self,
        _asset: &MockAsset,
        _reference_rep: &str,
        nr: u64,
        _cfg: &StreamConfig,
    ) -> Result<i64, SourceError> {
        Ok((nr as i64 + 1) * self.segment_duration_ms + self.availability_shift_ms)
    }

    fn wrap_windows(
        &self,
        _asset: &MockAsset,
        _cfg: &StreamConfig,
        now_ms: i64,
        _segment_duration: Duration,
    ) -> MockWindows {
        MockWindows { now_ms }
    }

    fn timeline_entries(
        &self,
        _asset: &MockAsset,
        rep_id: &str,
        windows: &MockWindows,
        _availability_offset_ms: i64,
    ) -> SegmentEntries {
        let last = windows.now_ms.div_euclid(self.segment_duration_ms) - 1;
        self.entries(rep_id, last.max(0) as u64)
    }

    fn timeline_entries_from_ref(
        &self,
        _asset: &MockAsset,
        reference: &SegmentEntries,
        rep_id: &str,
    ) -> SegmentEntries {
        SegmentEntries {
            rep_id: rep_id.to_string(),
            ..reference.clone()
        }
    }

    async fn write_segment(
        &self,
        writer: &mut SegmentWriter,
        _cfg: &StreamConfig,
        _asset: &MockAsset,
        segment_name: &str,
        now_ms: i64,
    ) -> Result<StatusCode, SegmentError> {
        self.writes.lock().push((segment_name.to_string(), now_ms));
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let rep_id = segment_name.split('-').next().unwrap_or_default();
        let failure = self.failing.lock().get(rep_id).copied();
        match failure {
            Some(FailKind::NotFound) => {
                return Err(SegmentError::NotFound(segment_name.to_string()));
            }
            Some(FailKind::TooEarly) => {
                return Err(SegmentError::TooEarly(segment_name.to_string()));
            }
            Some(FailKind::Gone) => return Err(SegmentError::Gone(segment_name.to_string())),
            Some(FailKind::Other) => return Err(SegmentError::Other("broken asset".to_string())),
            None => {}
        }

        for chunk in 0..4 {
            writer
                .write_all(format!("{segment_name}:{chunk};").as_bytes())
                .await?;
        }
        Ok(StatusCode::OK)
    }
}
