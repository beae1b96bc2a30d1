use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::SourceError;
use crate::sequence::{AtomicSequence, SequenceGenerator};
use crate::session::{IngestSession, SessionClock, SessionSetup};
use crate::source::LiveSource;
use crate::template::replace_identifiers;
use crate::types::{AdaptationSet, ContentType, IngestRequest, Manifest, RepresentationDescriptor};
use crate::{IngestConfig, IngestError, create_client};

/// Lifecycle of the registry. Sessions can only be created while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    NotStarted,
    Running,
    Stopped,
}

struct SessionEntry<S: LiveSource> {
    session: Arc<IngestSession<S>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Process-wide table of ingest sessions.
pub struct IngesterRegistry<S: LiveSource> {
    source: Arc<S>,
    config: Arc<IngestConfig>,
    client: Client,
    sequence: Arc<dyn SequenceGenerator>,
    state: RwLock<RegistryState>,
    sessions: RwLock<HashMap<u64, SessionEntry<S>>>,
    shutdown: CancellationToken,
}

impl<S: LiveSource> IngesterRegistry<S> {
    pub fn new(source: S, config: IngestConfig) -> Result<Self, IngestError> {
        let client = create_client(&config)?;
        Ok(Self {
            source: Arc::new(source),
            config: Arc::new(config),
            client,
            sequence: Arc::new(AtomicSequence::new()),
            state: RwLock::new(RegistryState::NotStarted),
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Replace the session id generator.
    pub fn with_sequence(mut self, sequence: Arc<dyn SequenceGenerator>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn state(&self) -> RegistryState {
        *self.state.read()
    }

    pub fn start(&self) {
        *self.state.write() = RegistryState::Running;
        info!("CMAF ingester manager started");
    }

    /// Resolve `request` into a new session and register it, not yet started.
    pub fn create(&self, request: IngestRequest) -> Result<u64, IngestError> {
        if self.state() != RegistryState::Running {
            return Err(IngestError::NotRunning);
        }
        let id = self.sequence.next_id();

        let (now_ms, stream) = self
            .source
            .resolve_config(&request.url, request.test_now_ms)
            .map_err(IngestError::ConfigResolution)?;
        let content_path = stream.content_path();
        let asset = self
            .source
            .find_asset(&content_path)
            .ok_or_else(|| IngestError::UnknownAsset(content_path.clone()))?;
        let manifest = self
            .source
            .build_manifest(&asset, stream.manifest_name(), &stream, now_ms)
            .map_err(IngestError::ConfigResolution)?;
        let descriptors = build_descriptors(&manifest)?;

        info!(
            session = id,
            url = %request.url,
            destination = %request.destination,
            representations = descriptors.len(),
            "Created ingest session"
        );
        let session = IngestSession::new(SessionSetup {
            id,
            source: Arc::clone(&self.source),
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            credentials: request.credentials(),
            clock: SessionClock::from_override(request.test_now_ms),
            destination: request.destination,
            url: request.url,
            stream,
            asset,
            descriptors,
        });

        self.sessions.write().insert(
            id,
            SessionEntry {
                session: Arc::new(session),
                cancel: self.shutdown.child_token(),
                handle: None,
            },
        );
        Ok(id)
    }

    /// Spawn the loop of a created session.
    pub fn start_session(&self, id: u64) -> Result<(), IngestError> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(&id)
            .ok_or(IngestError::UnknownSession(id))?;
        if entry.handle.is_some() || !entry.session.try_start() {
            return Err(IngestError::AlreadyStarted(id));
        }

        let session = Arc::clone(&entry.session);
        let cancel = entry.cancel.clone();
        entry.handle = Some(tokio::spawn(
            session.run(cancel).instrument(info_span!("ingester", id)),
        ));
        Ok(())
    }

    pub fn session(&self, id: u64) -> Option<Arc<IngestSession<S>>> {
        self.sessions
            .read()
            .get(&id)
            .map(|entry| Arc::clone(&entry.session))
    }

    pub fn session_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn trigger_next_segment(&self, id: u64) -> Result<(), IngestError> {
        let session = self.session(id).ok_or(IngestError::UnknownSession(id))?;
        session.trigger_next_segment();
        Ok(())
    }

    /// Snapshot of a session's report. May be incomplete while it runs.
    pub fn report(&self, id: u64) -> Result<Vec<String>, IngestError> {
        let session = self.session(id).ok_or(IngestError::UnknownSession(id))?;
        Ok(session.report().snapshot())
    }

    /// Cancel a session, wait for it to drain and return its final report.
    pub async fn stop(&self, id: u64) -> Result<Vec<String>, IngestError> {
        let entry = {
            let mut sessions = self.sessions.write();
            sessions.remove(&id)
        }
        .ok_or(IngestError::UnknownSession(id))?;
        info!(session = id, "Stopping ingest session");
        Ok(self.drain(entry).await)
    }

    /// Drop a session without waiting for it.
    pub fn remove(&self, id: u64) -> Result<(), IngestError> {
        let entry = {
            let mut sessions = self.sessions.write();
            sessions.remove(&id)
        }
        .ok_or(IngestError::UnknownSession(id))?;
        entry.cancel.cancel();
        debug!(session = id, "Removed ingest session");
        Ok(())
    }

    /// Stop accepting sessions and stop every running one.
    pub async fn shutdown(&self) {
        *self.state.write() = RegistryState::Stopped;
        self.shutdown.cancel();

        let entries: Vec<SessionEntry<S>> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        info!(sessions = entries.len(), "Shutting down CMAF ingester manager");
        futures::future::join_all(entries.into_iter().map(|entry| self.drain(entry))).await;
    }

    async fn drain(&self, entry: SessionEntry<S>) -> Vec<String> {
        entry.cancel.cancel();
        let report = entry.session.report();

        if let Some(mut handle) = entry.handle {
            let grace = self.config.drain_grace_period;
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    entry.session.mark_stopped();
                    report.push(format!("Ingest session task failed: {e}"));
                }
                Err(_) => {
                    handle.abort();
                    entry.session.mark_stopped();
                    warn!(
                        session = entry.session.id(),
                        ?grace,
                        "Ingest session did not drain in time"
                    );
                    report.push(format!(
                        "Ingest session aborted after drain grace period of {} ms",
                        grace.as_millis()
                    ));
                }
            }
        }
        report.snapshot()
    }
}

/// Representation descriptors of the first period, video first, then
/// audio, then everything else.
pub fn build_descriptors(
    manifest: &Manifest,
) -> Result<Vec<RepresentationDescriptor>, IngestError> {
    let period = manifest.periods.first().ok_or_else(|| {
        IngestError::ConfigResolution(SourceError::Manifest("no periods in manifest".to_string()))
    })?;

    let mut adaptation_sets: Vec<&AdaptationSet> = period.adaptation_sets.iter().collect();
    adaptation_sets.sort_by_key(|aset| ContentType::ordering_rank(&aset.content_type));

    let mut seen = HashSet::new();
    let mut descriptors = Vec::new();
    for aset in adaptation_sets {
        let content_type = ContentType::parse(&aset.content_type)
            .ok_or_else(|| IngestError::UnsupportedContentType(aset.content_type.clone()))?;
        let mime_type = content_type.ingest_mime_type()?;

        for rep in &aset.representations {
            if !seen.insert(rep.id.as_str()) {
                return Err(IngestError::DuplicateRepresentation(rep.id.clone()));
            }
            let template = rep.segment_template(aset).ok_or_else(|| {
                IngestError::ConfigResolution(SourceError::Manifest(format!(
                    "no segment template for representation {}",
                    rep.id
                )))
            })?;
            descriptors.push(RepresentationDescriptor {
                rep_id: rep.id.clone(),
                content_type,
                mime_type: mime_type.to_string(),
                init_path: replace_identifiers(&template.initialization, &rep.id, rep.bandwidth),
                media_pattern: replace_identifiers(&template.media, &rep.id, rep.bandwidth),
            });
        }
    }
    Ok(descriptors)
}
