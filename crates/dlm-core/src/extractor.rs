//! `InfoExtractor` (§6): the external collaborator that turns a URL into
//! either a plain resource or `MediaInfo` (a yt-dlp-style extractor). This
//! crate only states the contract; concrete site extractors live outside it.

use crate::error::Result;
use crate::model::MediaInfo;

/// What `extract`/`refresh` resolve a URL to when it isn't a page the
/// extractor recognizes — the caller falls back to a plain progressive
/// download of `url` itself.
#[derive(Debug, Clone)]
pub struct PlainResource {
    pub url: String,
    pub suggested_filename: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ExtractedResource {
    Plain(PlainResource),
    Media(MediaInfo),
}

/// Resolves a user-supplied URL into downloadable media, and re-resolves an
/// already-extracted one when its links have gone stale (§4.9 refresh
/// policy: RangeRejected/403/410 -> `refresh` -> re-probe).
pub trait InfoExtractor: Send + Sync {
    fn extract(&self, url: &str) -> Result<ExtractedResource>;

    /// Re-resolves `url` after the previously extracted links stopped
    /// working. Implementations typically re-run `extract` and compare the
    /// result; the caller decides whether the content changed.
    fn refresh(&self, url: &str) -> Result<ExtractedResource>;
}
