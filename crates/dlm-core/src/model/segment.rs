use serde::{Deserialize, Serialize};

/// One contiguous unit of the download: a byte range for plain HTTP
/// resources, or a single media fragment for HLS/DASH (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    /// Half-open byte range `[start, end)` into the target resource. For HLS
    /// fragments this is the decrypted-output byte range and is informational
    /// only — the authoritative identity of an HLS segment is `source_url`.
    pub start: u64,
    pub end: u64,
    pub state: SegmentState,
    pub bytes_written: u64,
    pub attempts: u32,
    /// Present only for HLS/DASH fragments: the fragment's own URL.
    pub source_url: Option<String>,
    /// AES-128 key, fetched and cached once per playlist (not persisted).
    #[serde(skip)]
    pub decrypt_key: Option<[u8; 16]>,
    /// Explicit IV from `#EXT-X-KEY`, or derived from the sequence number.
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    Idle,
    Downloading,
    Done,
    Failed,
}

impl Segment {
    pub fn new_range(index: usize, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            state: SegmentState::Idle,
            bytes_written: 0,
            attempts: 0,
            source_url: None,
            decrypt_key: None,
            iv: None,
        }
    }

    pub fn new_fragment(index: usize, source_url: String) -> Self {
        Self {
            index,
            start: 0,
            end: 0,
            state: SegmentState::Idle,
            bytes_written: 0,
            attempts: 0,
            source_url: Some(source_url),
            decrypt_key: None,
            iv: None,
        }
    }

    /// Declared length of this segment's range. Zero (and meaningless) for
    /// fragment-addressed HLS segments whose size isn't known up front.
    pub fn range_len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn part_filename(&self) -> String {
        format!("part-{:06}", self.index)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, SegmentState::Done)
    }
}
