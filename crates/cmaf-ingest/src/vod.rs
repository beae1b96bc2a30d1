//! On-disk VOD assets looped as live streams.
//!
//! Every directory below the catalogue root holding an `asset.json` is an
//! asset. Its path relative to the root is the asset path used in stream
//! URLs:
//!
//! ```text
//! /<prefix>/<asset path>/<manifest>.mpd?segtimeline=1&ato=<s>&timesubsstpp=en,sv&nowMS=<ms>
//! ```
//!
//! Segment `n` ends, and becomes available, at `(n + 1) * duration - ato`
//! milliseconds after the epoch. Media bytes of segment `n` are those of
//! file `start_number + n mod segment_count`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::bridge::SegmentWriter;
use crate::error::{SegmentError, SourceError};
use crate::source::LiveSource;
use crate::template::{TemplateValueKind, match_template, replace_identifiers, replace_time_or_nr};
use crate::timesubs::{self, TIME_SUBS_PREFIX, TIME_SUBS_TIMESCALE, time_subs_lang};
use crate::types::{
    AdaptationSet, InitSegment, Manifest, Period, Representation, SegmentEntries, SegmentTemplate,
    StreamConfig, TimelineEntry,
};

pub const ASSET_FILE: &str = "asset.json";

const TIME_SUBS_INIT: &str = "$RepresentationID$/init.mp4";
const TIME_SUBS_MEDIA: &str = "$RepresentationID$/$Number$.m4s";

static NUMBER_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$Number(%0\d+d)?\$").unwrap());

fn default_time_shift_buffer_depth_ms() -> u64 {
    60_000
}

fn default_timescale() -> u32 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VodAssetMeta {
    pub segment_duration_ms: u64,
    #[serde(default = "default_time_shift_buffer_depth_ms")]
    pub time_shift_buffer_depth_ms: u64,
    pub representations: Vec<VodRepresentation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VodRepresentation {
    pub id: String,
    pub content_type: String,
    pub bandwidth: u64,
    #[serde(default = "default_timescale")]
    pub timescale: u32,
    /// Init file template relative to the asset directory
    pub init: String,
    /// Media file template relative to the asset directory, numbered
    pub media: String,
    pub segment_count: u64,
    #[serde(default)]
    pub start_number: u64,
}

impl VodRepresentation {
    fn init_path(&self) -> String {
        replace_identifiers(&self.init, &self.id, self.bandwidth)
    }

    fn media_pattern(&self) -> String {
        replace_identifiers(&self.media, &self.id, self.bandwidth)
    }

    /// Segment duration in the representation's timescale.
    fn segment_duration(&self, duration_ms: u64) -> u64 {
        duration_ms * u64::from(self.timescale) / 1000
    }
}

#[derive(Debug)]
pub struct VodAsset {
    pub path: String,
    pub dir: PathBuf,
    pub meta: VodAssetMeta,
}

impl VodAsset {
    fn rep(&self, rep_id: &str) -> Option<&VodRepresentation> {
        self.meta.representations.iter().find(|r| r.id == rep_id)
    }

    fn duration_ms(&self) -> i64 {
        self.meta.segment_duration_ms as i64
    }
}

/// Time range covered by a timeline, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VodWindows {
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Default)]
pub struct VodSource {
    root: PathBuf,
    assets: HashMap<String, Arc<VodAsset>>,
}

impl VodSource {
    /// Load every asset below `root`.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        let mut assets = HashMap::new();
        let mut dirs = vec![root.clone()];

        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    dirs.push(path);
                } else if path.file_name().is_some_and(|n| n == ASSET_FILE) {
                    let asset = load_asset(&root, &path)?;
                    info!(
                        asset = %asset.path,
                        representations = asset.meta.representations.len(),
                        "Loaded asset"
                    );
                    assets.insert(asset.path.clone(), Arc::new(asset));
                }
            }
        }

        Ok(Self { root, assets })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn asset_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.assets.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Media template as addressed by the stream: timeline streams use
    /// `$Time$` instead of `$Number$`.
    fn stream_media_pattern(rep: &VodRepresentation, cfg: &StreamConfig) -> String {
        let pattern = rep.media_pattern();
        if cfg.segment_timeline {
            NUMBER_IDENTIFIER.replace_all(&pattern, "$$Time$$").into_owned()
        } else {
            pattern
        }
    }

    fn timescale(asset: &VodAsset, rep_id: &str) -> u32 {
        if time_subs_lang(rep_id).is_some() {
            return TIME_SUBS_TIMESCALE;
        }
        asset.rep(rep_id).map_or(1000, |r| r.timescale)
    }

    /// Check the segment is inside the time-shift window at `now_ms`.
    fn check_available(
        asset: &VodAsset,
        cfg: &StreamConfig,
        nr: u64,
        now_ms: i64,
        name: &str,
    ) -> Result<(), SegmentError> {
        let availability =
            (nr as i64 + 1) * asset.duration_ms() - cfg.availability_time_offset_ms();
        if availability > now_ms {
            return Err(SegmentError::TooEarly(name.to_string()));
        }
        let window = asset.meta.time_shift_buffer_depth_ms as i64 + asset.duration_ms();
        if availability + window < now_ms {
            return Err(SegmentError::Gone(name.to_string()));
        }
        Ok(())
    }

    async fn write_time_subs(
        &self,
        writer: &mut SegmentWriter,
        cfg: &StreamConfig,
        asset: &VodAsset,
        lang: &str,
        segment_name: &str,
        now_ms: i64,
    ) -> Result<StatusCode, SegmentError> {
        let rep_id = format!("{TIME_SUBS_PREFIX}-{lang}");
        let mut pattern = replace_identifiers(TIME_SUBS_MEDIA, &rep_id, 0);
        if cfg.segment_timeline {
            pattern = NUMBER_IDENTIFIER.replace_all(&pattern, "$$Time$$").into_owned();
        }
        let m = match_template(&pattern, segment_name)
            .ok_or_else(|| SegmentError::NotFound(segment_name.to_string()))?;
        let duration_ms = asset.meta.segment_duration_ms;
        let nr = match m.kind {
            TemplateValueKind::Number => m.value,
            TemplateValueKind::Time => m.value / duration_ms,
        };
        Self::check_available(asset, cfg, nr, now_ms, segment_name)?;

        let sequence_number = u32::try_from(nr % u64::from(u32::MAX)).unwrap_or_default();
        let duration = u32::try_from(duration_ms)
            .map_err(|_| SegmentError::Other(format!("segment duration {duration_ms} too large")))?;
        let data =
            timesubs::create_media_segment(lang, sequence_number, nr * duration_ms, duration)?;

        writer
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/mp4"));
        writer.write_all(&data).await?;
        writer.flush_ack();
        Ok(StatusCode::OK)
    }
}

fn load_asset(root: &Path, file: &Path) -> Result<VodAsset, SourceError> {
    let dir = file
        .parent()
        .ok_or_else(|| SourceError::Config(format!("{} has no parent", file.display())))?;
    let raw = std::fs::read_to_string(file)?;
    let meta: VodAssetMeta = serde_json::from_str(&raw)
        .map_err(|e| SourceError::Config(format!("{}: {e}", file.display())))?;

    if meta.segment_duration_ms == 0 {
        return Err(SourceError::Config(format!(
            "{}: segmentDurationMs must be positive",
            file.display()
        )));
    }
    if let Some(rep) = meta.representations.iter().find(|r| r.segment_count == 0) {
        return Err(SourceError::Config(format!(
            "{}: representation {} has no segments",
            file.display(),
            rep.id
        )));
    }

    let relative = dir
        .strip_prefix(root)
        .map_err(|e| SourceError::Config(e.to_string()))?;
    let path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Ok(VodAsset {
        path,
        dir: dir.to_path_buf(),
        meta,
    })
}

fn parse_query_config(url: &url::Url, cfg: &mut StreamConfig) -> Result<Option<i64>, SourceError> {
    let mut now_ms = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "segtimeline" => cfg.segment_timeline = value == "1",
            "ato" => {
                cfg.availability_time_offset_s = value
                    .parse()
                    .map_err(|_| SourceError::InvalidUrl(format!("bad ato value {value:?}")))?;
            }
            "timesubsstpp" => {
                cfg.time_subs_stpp_languages = value
                    .split(',')
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "nowMS" => {
                now_ms = Some(
                    value
                        .parse()
                        .map_err(|_| {
                            SourceError::InvalidUrl(format!("bad nowMS value {value:?}"))
                        })?,
                );
            }
            other => debug!(key = other, "Ignoring stream URL parameter"),
        }
    }
    Ok(now_ms)
}

#[async_trait]
impl LiveSource for VodSource {
    type Asset = VodAsset;
    type Windows = VodWindows;

    fn resolve_config(
        &self,
        url: &str,
        now_override_ms: Option<i64>,
    ) -> Result<(i64, StreamConfig), SourceError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SourceError::InvalidUrl(format!("{url}: {e}")))?;
        let url_parts: Vec<String> = parsed.path().split('/').map(str::to_string).collect();
        // "", prefix, at least one asset part, manifest
        if url_parts.len() < 4 || !url_parts.last().is_some_and(|m| m.ends_with(".mpd")) {
            return Err(SourceError::InvalidUrl(format!("{url}: no asset or manifest in path")));
        }

        let mut cfg = StreamConfig {
            url_parts,
            ..Default::default()
        };
        let url_now = parse_query_config(&parsed, &mut cfg)?;
        let now = now_override_ms
            .or(url_now)
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        Ok((now, cfg))
    }

    fn find_asset(&self, content_path: &str) -> Option<Arc<VodAsset>> {
        let (asset_path, _manifest) = content_path.rsplit_once('/')?;
        self.assets.get(asset_path).cloned()
    }

    fn build_manifest(
        &self,
        asset: &VodAsset,
        manifest_name: &str,
        cfg: &StreamConfig,
        _now_ms: i64,
    ) -> Result<Manifest, SourceError> {
        if asset.meta.representations.is_empty() {
            return Err(SourceError::Manifest(format!(
                "{}/{manifest_name}: asset has no representations",
                asset.path
            )));
        }

        let mut adaptation_sets: Vec<AdaptationSet> = Vec::new();
        for rep in &asset.meta.representations {
            let media = if cfg.segment_timeline {
                NUMBER_IDENTIFIER.replace_all(&rep.media, "$$Time$$").into_owned()
            } else {
                rep.media.clone()
            };
            let representation = Representation {
                id: rep.id.clone(),
                bandwidth: rep.bandwidth,
                segment_template: Some(SegmentTemplate {
                    initialization: rep.init.clone(),
                    media,
                    timescale: rep.timescale,
                    start_number: 0,
                }),
            };
            match adaptation_sets
                .iter_mut()
                .find(|a| a.content_type == rep.content_type)
            {
                Some(aset) => aset.representations.push(representation),
                None => adaptation_sets.push(AdaptationSet {
                    content_type: rep.content_type.clone(),
                    segment_template: None,
                    representations: vec![representation],
                }),
            }
        }

        if !cfg.time_subs_stpp_languages.is_empty() {
            let media = if cfg.segment_timeline {
                NUMBER_IDENTIFIER.replace_all(TIME_SUBS_MEDIA, "$$Time$$").into_owned()
            } else {
                TIME_SUBS_MEDIA.to_string()
            };
            adaptation_sets.push(AdaptationSet {
                content_type: "text".to_string(),
                segment_template: Some(SegmentTemplate {
                    initialization: TIME_SUBS_INIT.to_string(),
                    media,
                    timescale: TIME_SUBS_TIMESCALE,
                    start_number: 0,
                }),
                representations: cfg
                    .time_subs_stpp_languages
                    .iter()
                    .map(|lang| Representation {
                        id: format!("{TIME_SUBS_PREFIX}-{lang}"),
                        bandwidth: 0,
                        segment_template: None,
                    })
                    .collect(),
            });
        }

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
        asset: &VodAsset,
    ) -> Result<InitSegment, SourceError> {
        let Some(rep) = asset
            .meta
            .representations
            .iter()
            .find(|r| r.init_path() == init_path)
        else {
            return Ok(InitSegment {
                is_init: false,
                data: Bytes::new(),
                segment_type: String::new(),
            });
        };

        let data = tokio::fs::read(asset.dir.join(init_path)).await?;
        Ok(InitSegment {
            is_init: true,
            data: Bytes::from(data),
            segment_type: format!("{}/mp4", rep.content_type),
        })
    }

    fn reference_representation(&self, asset: &VodAsset) -> String {
        let reps = &asset.meta.representations;
        reps.iter()
            .find(|r| r.content_type == "video")
            .or_else(|| reps.first())
            .map(|r| r.id.clone())
            .unwrap_or_default()
    }

    fn last_segment_number(
        &self,
        cfg: &StreamConfig,
        asset: &VodAsset,
        now_ms: i64,
        _reference_rep: &str,
    ) -> i64 {
        (now_ms + cfg.availability_time_offset_ms()).div_euclid(asset.duration_ms()) - 1
    }

    fn segment_availability_time(
        &self,
        asset: &VodAsset,
        _reference_rep: &str,
        nr: u64,
        cfg: &StreamConfig,
    ) -> Result<i64, SourceError> {
        i64::try_from(nr)
            .ok()
            .and_then(|nr| nr.checked_add(1))
            .and_then(|n| n.checked_mul(asset.duration_ms()))
            .map(|end| end - cfg.availability_time_offset_ms())
            .ok_or_else(|| SourceError::Availability(format!("segment {nr} out of range")))
    }

    fn wrap_windows(
        &self,
        asset: &VodAsset,
        _cfg: &StreamConfig,
        now_ms: i64,
        _segment_duration: Duration,
    ) -> VodWindows {
        VodWindows {
            start_ms: (now_ms - asset.meta.time_shift_buffer_depth_ms as i64).max(0),
            end_ms: now_ms,
        }
    }

    fn timeline_entries(
        &self,
        asset: &VodAsset,
        rep_id: &str,
        windows: &VodWindows,
        availability_offset_ms: i64,
    ) -> SegmentEntries {
        let timescale = Self::timescale(asset, rep_id);
        let duration_ms = asset.duration_ms();
        let d = asset.meta.segment_duration_ms * u64::from(timescale) / 1000;

        let first = (windows.start_ms + availability_offset_ms)
            .div_euclid(duration_ms)
            .max(0);
        let last = (windows.end_ms + availability_offset_ms).div_euclid(duration_ms) - 1;
        let entries = if last >= first {
            vec![TimelineEntry {
                t: first as u64 * d,
                d,
                r: u32::try_from(last - first).unwrap_or(u32::MAX),
            }]
        } else {
            Vec::new()
        };

        SegmentEntries {
            rep_id: rep_id.to_string(),
            timescale,
            entries,
        }
    }

    fn timeline_entries_from_ref(
        &self,
        asset: &VodAsset,
        reference: &SegmentEntries,
        rep_id: &str,
    ) -> SegmentEntries {
        let timescale = Self::timescale(asset, rep_id);
        let ref_timescale = u64::from(reference.timescale.max(1));
        let rescale = |v: u64| v * u64::from(timescale) / ref_timescale;
        SegmentEntries {
            rep_id: rep_id.to_string(),
            timescale,
            entries: reference
                .entries
                .iter()
                .map(|e| TimelineEntry {
                    t: rescale(e.t),
                    d: rescale(e.d),
                    r: e.r,
                })
                .collect(),
        }
    }

    async fn write_segment(
        &self,
        writer: &mut SegmentWriter,
        cfg: &StreamConfig,
        asset: &VodAsset,
        segment_name: &str,
        now_ms: i64,
    ) -> Result<StatusCode, SegmentError> {
        let subs_lang = segment_name
            .split_once('/')
            .and_then(|(rep_id, _)| time_subs_lang(rep_id))
            .filter(|lang| cfg.time_subs_stpp_languages.iter().any(|l| l == lang));
        if let Some(lang) = subs_lang {
            return self
                .write_time_subs(writer, cfg, asset, lang, segment_name, now_ms)
                .await;
        }

        let Some((rep, m)) = asset.meta.representations.iter().find_map(|rep| {
            match_template(&Self::stream_media_pattern(rep, cfg), segment_name).map(|m| (rep, m))
        }) else {
            return Err(SegmentError::NotFound(segment_name.to_string()));
        };

        let nr = match m.kind {
            TemplateValueKind::Number => m.value,
            TemplateValueKind::Time => {
                let d = rep.segment_duration(asset.meta.segment_duration_ms);
                if d == 0 || m.value % d != 0 {
                    return Err(SegmentError::NotFound(segment_name.to_string()));
                }
                m.value / d
            }
        };
        Self::check_available(asset, cfg, nr, now_ms, segment_name)?;

        let file_nr = rep.start_number + nr % rep.segment_count;
        let file = asset.dir.join(replace_time_or_nr(&rep.media_pattern(), file_nr));
        let mut input = match tokio::fs::File::open(&file).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file = %file.display(), "Media file missing");
                return Err(SegmentError::NotFound(segment_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Ok(value) = HeaderValue::from_str(&format!("{}/mp4", rep.content_type)) {
            writer.headers_mut().insert(CONTENT_TYPE, value);
        }
        let copied = tokio::io::copy(&mut input, writer).await?;
        writer.flush_ack();
        debug!(segment = segment_name, nr, file_nr, bytes = copied, "Wrote media segment");
        Ok(StatusCode::OK)
    }
}
