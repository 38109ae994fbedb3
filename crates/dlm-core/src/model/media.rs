use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed variant over the media delivery protocols the `VideoPipeline`
/// understands, replacing a runtime string-keyed dispatch (§9 design note:
/// "Dynamic dispatch over media protocols").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Hls,
    Dash,
    Mhtml,
}

/// A single fragment of a segmented format (HLS media segment / DASH chunk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub url: String,
    pub duration: Option<f64>,
    pub byte_range: Option<(u64, u64)>,
}

/// One selectable rendition of a `MediaInfo` (e.g. a quality/format choice
/// returned by `InfoExtractor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Format {
    pub format_id: String,
    pub url: String,
    pub protocol: Protocol,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub abr: Option<f64>,
    pub vbr: Option<f64>,
    pub filesize: Option<u64>,
    pub fragments: Option<Vec<Fragment>>,
    pub http_headers: HashMap<String, String>,
    pub decryption_key: Option<String>,
}

impl Format {
    pub fn is_segmented(&self) -> bool {
        matches!(self.protocol, Protocol::Hls | Protocol::Dash)
    }
}

/// Output of `InfoExtractor::extract`/`refresh` (§6) for jobs that aren't a
/// plain progressive download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub ext: String,
    pub is_live: bool,
    pub formats: Vec<Format>,
}

impl MediaInfo {
    /// The format selected for the video/primary track, highest bitrate
    /// first among non-audio-only formats; falls back to the first format.
    pub fn best_format(&self) -> Option<&Format> {
        self.formats
            .iter()
            .filter(|f| f.vcodec.as_deref().map(|c| c != "none").unwrap_or(true))
            .max_by(|a, b| {
                a.vbr
                    .unwrap_or(0.0)
                    .partial_cmp(&b.vbr.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .or_else(|| self.formats.first())
    }

    /// A separate audio-only format to merge in, when the selected video
    /// format carries no audio (split HLS / DASH adaptation sets).
    pub fn best_audio_only(&self) -> Option<&Format> {
        self.formats
            .iter()
            .find(|f| f.vcodec.as_deref() == Some("none") && f.acodec.is_some())
    }
}
