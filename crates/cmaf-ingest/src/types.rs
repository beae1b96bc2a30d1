use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::IngestError;

/// A request to start pushing a simulated live stream to a destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default, rename = "password")]
    pub password: String,
    #[serde(rename = "destination")]
    pub destination: String,
    #[serde(rename = "livesimURL")]
    pub url: String,
    #[serde(rename = "testTimeMS", default, skip_serializing_if = "Option::is_none")]
    pub test_now_ms: Option<i64>,
}

impl IngestRequest {
    /// Basic-auth credentials, if a user was given.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.user.is_empty() {
            None
        } else {
            Some(Credentials {
                user: self.user.clone(),
                password: self.password.clone(),
            })
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Audio,
    Text,
    Image,
}

impl ContentType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(ContentType::Video),
            "audio" => Some(ContentType::Audio),
            "text" => Some(ContentType::Text),
            "image" => Some(ContentType::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Audio => "audio",
            ContentType::Text => "text",
            ContentType::Image => "image",
        }
    }

    /// Mime type used when pushing init segments. Image tracks are
    /// not ingested.
    pub fn ingest_mime_type(&self) -> Result<&'static str, IngestError> {
        match self {
            ContentType::Video => Ok("video/mp4"),
            ContentType::Audio => Ok("audio/mp4"),
            ContentType::Text => Ok("application/mp4"),
            ContentType::Image => Err(IngestError::UnsupportedContentType(
                self.as_str().to_string(),
            )),
        }
    }

    /// Adaptation set ordering: video first, then audio, then the rest.
    pub(crate) fn ordering_rank(value: &str) -> u8 {
        match value {
            "video" => 0,
            "audio" => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One representation to push, resolved once at session setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepresentationDescriptor {
    pub rep_id: String,
    pub content_type: ContentType,
    pub mime_type: String,
    /// Init path with identifiers substituted
    pub init_path: String,
    /// Media template still carrying `$Number$` or `$Time$`
    pub media_pattern: String,
}

/// Stream parameters resolved from the source URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamConfig {
    /// `/`-separated parts of the URL path, starting with the empty
    /// part before the leading slash
    pub url_parts: Vec<String>,
    pub segment_timeline: bool,
    pub availability_time_offset_s: f64,
    pub time_subs_stpp_languages: Vec<String>,
}

impl StreamConfig {
    /// Parts between the service prefix and the manifest name.
    pub fn asset_parts(&self) -> &[String] {
        if self.url_parts.len() < 3 {
            return &[];
        }
        &self.url_parts[2..self.url_parts.len() - 1]
    }

    pub fn asset_path(&self) -> String {
        self.asset_parts().join("/")
    }

    /// Asset path plus manifest name, used to look up the asset.
    pub fn content_path(&self) -> String {
        if self.url_parts.len() < 3 {
            return String::new();
        }
        self.url_parts[2..].join("/")
    }

    pub fn manifest_name(&self) -> &str {
        self.url_parts.last().map(String::as_str).unwrap_or_default()
    }

    pub fn availability_time_offset_ms(&self) -> i64 {
        (self.availability_time_offset_s * 1000.0) as i64
    }
}

// --- Manifest shape consumed at session setup ---

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, Default)]
pub struct Period {
    pub id: String,
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptationSet {
    pub content_type: String,
    pub segment_template: Option<SegmentTemplate>,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default)]
pub struct Representation {
    pub id: String,
    pub bandwidth: u64,
    pub segment_template: Option<SegmentTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentTemplate {
    pub initialization: String,
    pub media: String,
    pub timescale: u32,
    pub start_number: u64,
}

impl Representation {
    /// The representation's own template, or the one inherited from its
    /// adaptation set.
    pub fn segment_template<'a>(
        &'a self,
        adaptation_set: &'a AdaptationSet,
    ) -> Option<&'a SegmentTemplate> {
        self.segment_template
            .as_ref()
            .or(adaptation_set.segment_template.as_ref())
    }
}

/// Result of resolving an init segment against the asset.
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub is_init: bool,
    pub data: Bytes,
    /// Segment type reported by the asset, e.g. `video/mp4`
    pub segment_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Start time in the representation's timescale
    pub t: u64,
    pub d: u64,
    /// Repeat count
    pub r: u32,
}

/// Segment timeline entries generated for one representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentEntries {
    pub rep_id: String,
    pub timescale: u32,
    pub entries: Vec<TimelineEntry>,
}

impl SegmentEntries {
    /// Start time of the last segment described by the entries.
    pub fn last_time(&self) -> Option<u64> {
        self.entries.last().map(|e| e.t + e.d * u64::from(e.r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: &str) -> StreamConfig {
        StreamConfig {
            url_parts: path.split('/').map(str::to_string).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_json_names() {
        let req: IngestRequest = serde_json::from_str(
            r#"{"user":"u","password":"p","destination":"http://dest","livesimURL":"http://host/livesim2/a/Manifest.mpd","testTimeMS":1000}"#,
        )
        .unwrap();
        assert_eq!(req.test_now_ms, Some(1000));
        assert_eq!(req.credentials().unwrap().user, "u");

        let req: IngestRequest =
            serde_json::from_str(r#"{"destination":"d","livesimURL":"u"}"#).unwrap();
        assert!(req.credentials().is_none());
        assert!(req.test_now_ms.is_none());
    }

    #[test]
    fn test_stream_config_paths() {
        let cfg = config("/livesim2/testpic_2s/sub/Manifest.mpd");
        assert_eq!(cfg.asset_path(), "testpic_2s/sub");
        assert_eq!(cfg.content_path(), "testpic_2s/sub/Manifest.mpd");
        assert_eq!(cfg.manifest_name(), "Manifest.mpd");

        let short = config("/Manifest.mpd");
        assert!(short.asset_parts().is_empty());
        assert_eq!(short.content_path(), "");
    }

    #[test]
    fn test_last_time_with_repeat() {
        let entries = SegmentEntries {
            rep_id: "v".to_string(),
            timescale: 1000,
            entries: vec![
                TimelineEntry { t: 0, d: 2000, r: 2 },
                TimelineEntry { t: 6000, d: 1000, r: 0 },
            ],
        };
        assert_eq!(entries.last_time(), Some(6000));

        let repeated = SegmentEntries {
            entries: vec![TimelineEntry { t: 0, d: 2000, r: 2 }],
            ..Default::default()
        };
        assert_eq!(repeated.last_time(), Some(4000));
        assert_eq!(SegmentEntries::default().last_time(), None);
    }

    #[test]
    fn test_content_type_mime() {
        assert_eq!(ContentType::Video.ingest_mime_type().unwrap(), "video/mp4");
        assert_eq!(ContentType::Text.ingest_mime_type().unwrap(), "application/mp4");
        assert!(ContentType::Image.ingest_mime_type().is_err());
        assert_eq!(ContentType::parse("audio"), Some(ContentType::Audio));
        assert_eq!(ContentType::parse("application"), None);
    }
}
