//! A single ingest session: pushes one simulated live stream to one
//! destination.
//!
//! The session first pushes the init segments of every representation,
//! then loops over segment rounds. Each round pushes one media segment per
//! representation concurrently and is joined before the next availability
//! time is computed, so all representations advance in lockstep.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::{PushOutcome, SegmentBridge};
use crate::error::SegmentError;
use crate::source::LiveSource;
use crate::template::replace_time_or_nr;
use crate::timesubs::{self, TIME_SUBS_TIMESCALE, match_time_subs_init};
use crate::types::{
    ContentType, Credentials, RepresentationDescriptor, SegmentEntries, StreamConfig,
};
use crate::{IngestConfig, IngestError, Report};

/// Timeline windows are computed slightly after the availability time so
/// the round's own segment is inside them.
const TIMELINE_LOOKAHEAD_MS: i64 = 50;
const TIMELINE_SEGMENT_HINT: Duration = Duration::from_millis(100);

/// Where a session takes "now" from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClock {
    /// Simulated time pinned at the given milliseconds. Rounds only
    /// advance on an explicit trigger.
    Fixed(i64),
    /// Wall clock; rounds fire at segment availability times.
    Wall,
}

impl SessionClock {
    pub fn from_override(now_override_ms: Option<i64>) -> Self {
        now_override_ms.map_or(SessionClock::Wall, SessionClock::Fixed)
    }

    pub fn now_ms(&self) -> i64 {
        match self {
            SessionClock::Fixed(ms) => *ms,
            SessionClock::Wall => chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Stopped,
}

/// Result of catching up with the clock: what to wait for before the
/// next round.
#[derive(Debug, PartialEq, Eq)]
enum Schedule {
    Timer(Duration),
    Manual,
    Cancelled,
}

/// One representation's share of a round.
#[derive(Debug)]
struct SegmentJob {
    rep_id: String,
    file_name: String,
}

/// Everything a session is built from, resolved by the registry.
pub(crate) struct SessionSetup<S: LiveSource> {
    pub id: u64,
    pub source: Arc<S>,
    pub client: Client,
    pub config: Arc<IngestConfig>,
    pub credentials: Option<Credentials>,
    pub destination: String,
    pub url: String,
    pub clock: SessionClock,
    pub stream: StreamConfig,
    pub asset: Arc<S::Asset>,
    pub descriptors: Vec<RepresentationDescriptor>,
}

pub struct IngestSession<S: LiveSource> {
    id: u64,
    source: Arc<S>,
    client: Client,
    config: Arc<IngestConfig>,
    credentials: Option<Credentials>,
    destination: String,
    url: String,
    clock: SessionClock,
    stream: StreamConfig,
    asset: Arc<S::Asset>,
    descriptors: Vec<RepresentationDescriptor>,
    advance: Notify,
    report: Report,
    state: Mutex<SessionState>,
}

impl<S: LiveSource> IngestSession<S> {
    pub(crate) fn new(setup: SessionSetup<S>) -> Self {
        Self {
            id: setup.id,
            source: setup.source,
            client: setup.client,
            config: setup.config,
            credentials: setup.credentials,
            destination: setup.destination,
            url: setup.url,
            clock: setup.clock,
            stream: setup.stream,
            asset: setup.asset,
            descriptors: setup.descriptors,
            advance: Notify::new(),
            report: Report::new(),
            state: Mutex::new(SessionState::NotStarted),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn clock(&self) -> SessionClock {
        self.clock
    }

    pub fn descriptors(&self) -> &[RepresentationDescriptor] {
        &self.descriptors
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move from `NotStarted` to `Running`. Returns false if the session
    /// was started before.
    pub(crate) fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::NotStarted {
            return false;
        }
        *state = SessionState::Running;
        true
    }

    /// Final transition, also taken by the registry when the loop had to
    /// be aborted and could not stop itself.
    pub(crate) fn mark_stopped(&self) {
        *self.state.lock() = SessionState::Stopped;
    }

    /// Push the next round now instead of waiting for its timer. A
    /// trigger fired while a round is in progress is kept for the next
    /// wait.
    pub fn trigger_next_segment(&self) {
        debug!(session = self.id, "Next segment triggered");
        self.advance.notify_one();
    }

    fn record(&self, msg: String) {
        error!(session = self.id, "{msg}");
        self.report.push(msg);
    }

    /// Run the session until `cancel` fires or a fatal error occurs.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.try_start();
        info!(
            session = self.id,
            url = %self.url,
            destination = %self.destination,
            "Ingest session started"
        );

        if let Err(e) = self.run_inner(&cancel).await {
            self.record(e.to_string());
        }

        self.mark_stopped();
        info!(session = self.id, "Ingest session stopped");
    }

    async fn run_inner(self: &Arc<Self>, cancel: &CancellationToken) -> Result<(), IngestError> {
        self.send_init_segments().await?;

        let reference = self.source.reference_representation(&self.asset);
        let now = self.clock.now_ms();
        let last = self
            .source
            .last_segment_number(&self.stream, &self.asset, now, &reference);
        let mut next = u64::try_from(last + 1).unwrap_or(0);
        debug!(session = self.id, nr = next, "Next segment number at start");
        let mut availability = self.availability_time(&reference, next)?;

        loop {
            let wait = match self
                .catch_up(&reference, &mut next, &mut availability, cancel)
                .await?
            {
                Schedule::Cancelled => return Ok(()),
                Schedule::Timer(wait) => Some(wait),
                Schedule::Manual => None,
            };
            info!(session = self.id, nr = next, availability, "Waiting for next segment");

            let timer = async {
                match wait {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = timer => {}
                _ = self.advance.notified() => {
                    debug!(session = self.id, nr = next, "Advancing on trigger");
                }
                _ = cancel.cancelled() => {
                    info!(session = self.id, "Cancelled, stopping ingest");
                    return Ok(());
                }
            }

            self.send_media_segments(next, availability).await?;
            next += 1;
            availability = self.availability_time(&reference, next)?;
        }
    }

    fn availability_time(&self, reference: &str, nr: u64) -> Result<i64, IngestError> {
        let time = self
            .source
            .segment_availability_time(&self.asset, reference, nr, &self.stream)
            .map_err(IngestError::AvailabilityComputation)?;
        debug!(session = self.id, nr, time, "Next segment availability time");
        Ok(time)
    }

    /// Push every overdue round, then decide how long to wait for the
    /// next one. Entered identically at start and after each round.
    async fn catch_up(
        self: &Arc<Self>,
        reference: &str,
        next: &mut u64,
        availability: &mut i64,
        cancel: &CancellationToken,
    ) -> Result<Schedule, IngestError> {
        if let SessionClock::Fixed(_) = self.clock {
            return Ok(Schedule::Manual);
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(Schedule::Cancelled);
            }
            let delta = *availability - self.clock.now_ms();
            if delta > 0 {
                return Ok(Schedule::Timer(Duration::from_millis(delta as u64)));
            }

            self.record(format!(
                "Segment availability time in the past: {}",
                *availability
            ));
            self.send_media_segments(*next, *availability).await?;
            *next += 1;
            *availability = self.availability_time(reference, *next)?;
        }
    }

    fn asset_file_path(&self, file_name: &str) -> String {
        let mut parts: Vec<&str> = self
            .stream
            .asset_parts()
            .iter()
            .map(String::as_str)
            .collect();
        parts.push(file_name);
        parts.join("/")
    }

    fn destination_url(&self, path: &str) -> String {
        format!("{}/{}", self.destination.trim_end_matches('/'), path)
    }

    async fn send_init_segments(&self) -> Result<(), IngestError> {
        for rd in &self.descriptors {
            if let Some(track) = match_time_subs_init(&self.stream, &rd.init_path) {
                let track = track?;
                let init = timesubs::create_init_segment(&track.lang, TIME_SUBS_TIMESCALE)
                    .map_err(|e| IngestError::TimeSubsInit(format!("encoding init segment: {e}")))?;
                // NOTE: synthesized time-subtitle inits are not pushed, only
                // asset inits are. Unconfirmed whether destinations rely on it.
                info!(
                    session = self.id,
                    path = %rd.init_path,
                    lang = %track.lang,
                    size = init.len(),
                    "Generated time subtitles init segment"
                );
                continue;
            }

            let init = match self
                .source
                .resolve_init_segment(&rd.init_path, &self.stream, &self.asset)
                .await
            {
                Ok(init) if init.is_init => init,
                Ok(_) => {
                    self.record(format!(
                        "Error matching init segment: {}",
                        IngestError::InitMatch(rd.init_path.clone())
                    ));
                    continue;
                }
                Err(e) => {
                    self.record(format!("Error matching init segment: {e}"));
                    continue;
                }
            };

            let path = self.asset_file_path(&rd.init_path);
            info!(
                session = self.id,
                path = %path,
                content_type = %init.segment_type,
                size = init.data.len(),
                "Sending init segment"
            );
            if let Err(e) = self.send_init_segment(&path, &rd.mime_type, init.data).await {
                self.record(format!("Error uploading init segment {path}: {e}"));
            }
        }
        Ok(())
    }

    async fn send_init_segment(
        &self,
        path: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<(), IngestError> {
        let mut request = self
            .client
            .put(self.destination_url(path))
            .header(CONTENT_TYPE, mime_type)
            .header(CONNECTION, "keep-alive")
            .body(data);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.user, Some(&creds.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::StatusCode(status));
        }
        Ok(())
    }

    /// Resolve the file name of every representation's segment for round `nr`.
    fn round_jobs(&self, nr: u64, now_ms: i64) -> Result<Vec<SegmentJob>, IngestError> {
        if !self.stream.segment_timeline {
            return Ok(self
                .descriptors
                .iter()
                .map(|rd| SegmentJob {
                    rep_id: rd.rep_id.clone(),
                    file_name: replace_time_or_nr(&rd.media_pattern, nr),
                })
                .collect());
        }

        let windows = self.source.wrap_windows(
            &self.asset,
            &self.stream,
            now_ms + TIMELINE_LOOKAHEAD_MS,
            TIMELINE_SEGMENT_HINT,
        );
        let ato_ms = self.stream.availability_time_offset_ms();

        // The first representation is the timing reference; audio follows
        // its segment boundaries instead of computing its own.
        let mut reference: Option<SegmentEntries> = None;
        let mut jobs = Vec::with_capacity(self.descriptors.len());
        for rd in &self.descriptors {
            let entries = match &reference {
                Some(ref_entries) if rd.content_type == ContentType::Audio => self
                    .source
                    .timeline_entries_from_ref(&self.asset, ref_entries, &rd.rep_id),
                _ => self
                    .source
                    .timeline_entries(&self.asset, &rd.rep_id, &windows, ato_ms),
            };
            let time = entries.last_time().ok_or_else(|| {
                IngestError::Production(format!("no timeline entries for {}", rd.rep_id))
            })?;
            jobs.push(SegmentJob {
                rep_id: rd.rep_id.clone(),
                file_name: replace_time_or_nr(&rd.media_pattern, time),
            });
            if reference.is_none() {
                reference = Some(entries);
            }
        }
        Ok(jobs)
    }

    /// Push round `nr` for every representation and wait for all of them.
    async fn send_media_segments(
        self: &Arc<Self>,
        nr: u64,
        now_ms: i64,
    ) -> Result<(), IngestError> {
        debug!(session = self.id, nr, now_ms, "Start media segment round");
        let jobs = self.round_jobs(nr, now_ms)?;

        let mut units = JoinSet::new();
        for job in jobs {
            let session = Arc::clone(self);
            units.spawn(async move { session.send_media_segment(job, nr, now_ms).await });
        }
        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                self.record(format!("Media segment task failed: {e}"));
            }
        }
        Ok(())
    }

    async fn send_media_segment(&self, job: SegmentJob, nr: u64, now_ms: i64) {
        let path = self.asset_file_path(&job.file_name);
        let url = self.destination_url(&path);
        info!(session = self.id, rep = %job.rep_id, path = %path, nr, now_ms, "Send media segment");

        let body_cancel = CancellationToken::new();
        let (mut writer, push) = SegmentBridge::spawn(
            &self.client,
            url,
            self.credentials.as_ref(),
            self.config.bridge_capacity,
            &body_cancel,
        );

        let written = self
            .source
            .write_segment(&mut writer, &self.stream, &self.asset, &job.file_name, now_ms)
            .await;

        match written {
            Ok(status) if status.is_success() => {
                writer.flush_ack();
                writer.finish();
                match push.finished().await {
                    PushOutcome::Completed(code) if code.is_success() => {
                        debug!(
                            session = self.id,
                            path = %path,
                            bytes = writer.bytes_written(),
                            "Media segment pushed"
                        );
                    }
                    PushOutcome::Completed(code) => {
                        self.record(format!(
                            "Error uploading media segment {path}: status code {code}"
                        ));
                    }
                    PushOutcome::Failed(e) => {
                        self.record(format!("Error uploading media segment {path}: {e}"));
                    }
                    PushOutcome::Aborted => {
                        self.record(format!("Media segment upload aborted: {path}"));
                    }
                }
            }
            Ok(status) => {
                writer.set_status(status);
                body_cancel.cancel();
                push.abort();
                self.record(format!("writeSegment {path}: status code {status}"));
            }
            Err(SegmentError::Io(e)) if writer.is_closed() => {
                // The request ended before the producer did
                warn!(session = self.id, path = %path, error = %e, "Segment request closed early");
                drop(writer);
                match push.finished().await {
                    PushOutcome::Completed(code) => {
                        self.record(format!(
                            "Media segment request for {path} ended early with status code {code}"
                        ));
                    }
                    PushOutcome::Failed(e) => {
                        self.record(format!("Error uploading media segment {path}: {e}"));
                    }
                    PushOutcome::Aborted => {
                        self.record(format!("Media segment upload aborted: {path}"));
                    }
                }
            }
            Err(e) if e.is_unit_local() => {
                body_cancel.cancel();
                push.abort();
                let msg = match e {
                    SegmentError::NotFound(_) => format!("Segment not found: {path}"),
                    SegmentError::TooEarly(_) => format!("Segment too early: {path}"),
                    _ => format!("Segment gone: {path}"),
                };
                self.record(msg);
            }
            Err(e) => {
                writer.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                body_cancel.cancel();
                push.abort();
                self.record(format!("writeSegment {path}: {e}"));
            }
        }
    }
}
