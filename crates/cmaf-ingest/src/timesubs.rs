//! Synthetic timed-text (TTML in ISOBMFF, `stpp`) segments.
//!
//! Time-subtitle tracks are generated in-process instead of being read
//! from an asset: each media segment carries one cue showing the wall
//! clock time it covers.

use std::io::{self, Write};
use std::sync::LazyLock;

use byteorder::{BigEndian, WriteBytesExt};
use regex::Regex;

use crate::IngestError;
use crate::types::StreamConfig;

/// Fixed timescale of synthesized subtitle tracks.
pub const TIME_SUBS_TIMESCALE: u32 = 1000;

/// Representation id prefix of time-subtitle tracks (`timestpp-<lang>`).
pub const TIME_SUBS_PREFIX: &str = "timestpp";

const TRACK_ID: u32 = 1;
const TTML_NAMESPACE: &str = "http://www.w3.org/ns/ttml";
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

static TIME_SUBS_INIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(timestpp)-([A-Za-z0-9]+(?:-[A-Za-z0-9]+)*)/init\.mp4$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSubsTrack {
    pub prefix: String,
    pub lang: String,
}

/// Match `init_path` against the time-subtitles init naming.
///
/// Returns `None` for ordinary init paths, and an error if the path names
/// a language the stream was not configured with.
pub fn match_time_subs_init(
    cfg: &StreamConfig,
    init_path: &str,
) -> Option<Result<TimeSubsTrack, IngestError>> {
    let caps = TIME_SUBS_INIT.captures(init_path)?;
    let lang = &caps[2];
    if !cfg.time_subs_stpp_languages.iter().any(|l| l == lang) {
        return Some(Err(IngestError::TimeSubsInit(format!(
            "language {lang:?} not configured for {init_path}"
        ))));
    }
    Some(Ok(TimeSubsTrack {
        prefix: caps[1].to_string(),
        lang: lang.to_string(),
    }))
}

/// Language of a time-subtitles representation id.
pub fn time_subs_lang(rep_id: &str) -> Option<&str> {
    rep_id
        .strip_prefix(TIME_SUBS_PREFIX)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|lang| !lang.is_empty())
}

fn write_box<F>(out: &mut Vec<u8>, kind: &[u8; 4], body: F) -> io::Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
{
    let start = out.len();
    out.write_u32::<BigEndian>(0)?;
    out.write_all(kind)?;
    body(out)?;
    let size = u32::try_from(out.len() - start)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "box too large"))?;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

fn write_full_box<F>(
    out: &mut Vec<u8>,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: F,
) -> io::Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
{
    write_box(out, kind, |out| {
        out.write_u8(version)?;
        out.write_u24::<BigEndian>(flags)?;
        body(out)
    })
}

fn write_cstr(out: &mut Vec<u8>, s: &str) -> io::Result<()> {
    out.write_all(s.as_bytes())?;
    out.write_u8(0)
}

/// ISO-639-2/T code packed into 15 bits as used by `mdhd`.
fn packed_language(lang: &str) -> u16 {
    let code = if lang.len() == 3 && lang.bytes().all(|b| b.is_ascii_lowercase()) {
        lang.as_bytes()
    } else {
        b"und"
    };
    code.iter()
        .fold(0u16, |acc, &c| (acc << 5) | u16::from(c - 0x60))
}

/// Build an `stpp` init segment (ftyp + moov) for `lang`.
pub fn create_init_segment(lang: &str, timescale: u32) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(768);

    write_box(&mut out, b"ftyp", |out| {
        out.write_all(b"iso6")?;
        out.write_u32::<BigEndian>(0)?;
        for brand in [b"iso6", b"cmfc", b"dash"] {
            out.write_all(brand)?;
        }
        Ok(())
    })?;

    write_box(&mut out, b"moov", |out| {
        write_full_box(out, b"mvhd", 0, 0, |out| {
            out.write_u32::<BigEndian>(0)?; // creation time
            out.write_u32::<BigEndian>(0)?; // modification time
            out.write_u32::<BigEndian>(timescale)?;
            out.write_u32::<BigEndian>(0)?; // duration
            out.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
            out.write_u16::<BigEndian>(0x0100)?; // volume 1.0
            out.write_all(&[0; 10])?;
            for v in UNITY_MATRIX {
                out.write_u32::<BigEndian>(v)?;
            }
            out.write_all(&[0; 24])?;
            out.write_u32::<BigEndian>(TRACK_ID + 1) // next track id
        })?;

        write_box(out, b"trak", |out| {
            write_full_box(out, b"tkhd", 0, 0x03, |out| {
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(TRACK_ID)?;
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(0)?; // duration
                out.write_all(&[0; 8])?;
                out.write_u16::<BigEndian>(0)?; // layer
                out.write_u16::<BigEndian>(0)?; // alternate group
                out.write_u16::<BigEndian>(0)?; // volume
                out.write_u16::<BigEndian>(0)?;
                for v in UNITY_MATRIX {
                    out.write_u32::<BigEndian>(v)?;
                }
                out.write_u32::<BigEndian>(0)?; // width
                out.write_u32::<BigEndian>(0) // height
            })?;

            write_box(out, b"mdia", |out| {
                write_full_box(out, b"mdhd", 0, 0, |out| {
                    out.write_u32::<BigEndian>(0)?;
                    out.write_u32::<BigEndian>(0)?;
                    out.write_u32::<BigEndian>(timescale)?;
                    out.write_u32::<BigEndian>(0)?;
                    out.write_u16::<BigEndian>(packed_language(lang))?;
                    out.write_u16::<BigEndian>(0)
                })?;
                write_full_box(out, b"hdlr", 0, 0, |out| {
                    out.write_u32::<BigEndian>(0)?;
                    out.write_all(b"subt")?;
                    out.write_all(&[0; 12])?;
                    write_cstr(out, "TimeSubs")
                })?;
                write_full_box(out, b"elng", 0, 0, |out| write_cstr(out, lang))?;

                write_box(out, b"minf", |out| {
                    write_full_box(out, b"sthd", 0, 0, |_| Ok(()))?;
                    write_box(out, b"dinf", |out| {
                        write_full_box(out, b"dref", 0, 0, |out| {
                            out.write_u32::<BigEndian>(1)?;
                            write_full_box(out, b"url ", 0, 0x01, |_| Ok(()))
                        })
                    })?;
                    write_box(out, b"stbl", |out| {
                        write_full_box(out, b"stsd", 0, 0, |out| {
                            out.write_u32::<BigEndian>(1)?;
                            write_box(out, b"stpp", |out| {
                                out.write_all(&[0; 6])?;
                                out.write_u16::<BigEndian>(1)?; // data reference index
                                write_cstr(out, TTML_NAMESPACE)?;
                                write_cstr(out, "")?; // schema location
                                write_cstr(out, "") // auxiliary mime types
                            })
                        })?;
                        write_full_box(out, b"stts", 0, 0, |out| out.write_u32::<BigEndian>(0))?;
                        write_full_box(out, b"stsc", 0, 0, |out| out.write_u32::<BigEndian>(0))?;
                        write_full_box(out, b"stsz", 0, 0, |out| {
                            out.write_u32::<BigEndian>(0)?;
                            out.write_u32::<BigEndian>(0)
                        })?;
                        write_full_box(out, b"stco", 0, 0, |out| out.write_u32::<BigEndian>(0))
                    })
                })
            })
        })?;

        write_box(out, b"mvex", |out| {
            write_full_box(out, b"trex", 0, 0, |out| {
                out.write_u32::<BigEndian>(TRACK_ID)?;
                out.write_u32::<BigEndian>(1)?; // default sample description index
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(0)
            })
        })
    })?;

    Ok(out)
}

fn ttml_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{:03}", ms % 1000)
}

fn ttml_document(lang: &str, start_ms: u64, end_ms: u64) -> String {
    let text = chrono::DateTime::from_timestamp_millis(start_ms as i64)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ttml_time(start_ms));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<tt xmlns="{TTML_NAMESPACE}" xml:lang="{lang}"><body><div><p begin="{}" end="{}">{lang} {text}</p></div></body></tt>
"#,
        ttml_time(start_ms),
        ttml_time(end_ms)
    )
}

fn write_moof(
    sequence_number: u32,
    base_media_decode_time: u64,
    duration: u32,
    sample_size: u32,
    data_offset: i32,
) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    write_box(&mut out, b"moof", |out| {
        write_full_box(out, b"mfhd", 0, 0, |out| {
            out.write_u32::<BigEndian>(sequence_number)
        })?;
        write_box(out, b"traf", |out| {
            // default-base-is-moof
            write_full_box(out, b"tfhd", 0, 0x02_0000, |out| {
                out.write_u32::<BigEndian>(TRACK_ID)
            })?;
            write_full_box(out, b"tfdt", 1, 0, |out| {
                out.write_u64::<BigEndian>(base_media_decode_time)
            })?;
            // data offset, sample duration and sample size present
            write_full_box(out, b"trun", 0, 0x00_0301, |out| {
                out.write_u32::<BigEndian>(1)?;
                out.write_i32::<BigEndian>(data_offset)?;
                out.write_u32::<BigEndian>(duration)?;
                out.write_u32::<BigEndian>(sample_size)
            })
        })
    })?;
    Ok(out)
}

/// Build one `stpp` media segment (styp + moof + mdat) covering
/// `[start_ms, start_ms + duration_ms)` at [`TIME_SUBS_TIMESCALE`].
pub fn create_media_segment(
    lang: &str,
    sequence_number: u32,
    start_ms: u64,
    duration_ms: u32,
) -> io::Result<Vec<u8>> {
    let doc = ttml_document(lang, start_ms, start_ms + u64::from(duration_ms));
    let sample_size = u32::try_from(doc.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "sample too large"))?;

    let mut out = Vec::with_capacity(doc.len() + 256);
    write_box(&mut out, b"styp", |out| {
        out.write_all(b"msdh")?;
        out.write_u32::<BigEndian>(0)?;
        out.write_all(b"msdh")?;
        out.write_all(b"msix")
    })?;

    // First pass only sizes the moof
    let moof_len = write_moof(sequence_number, start_ms, duration_ms, sample_size, 0)?.len();
    let data_offset = i32::try_from(moof_len + 8)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "moof too large"))?;
    out.extend_from_slice(&write_moof(
        sequence_number,
        start_ms,
        duration_ms,
        sample_size,
        data_offset,
    )?);

    write_box(&mut out, b"mdat", |out| out.write_all(doc.as_bytes()))?;
    Ok(out)
}
