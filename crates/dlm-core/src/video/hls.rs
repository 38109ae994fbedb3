//! HLS playlist fetch, parse, and fragment expansion (§4.8 steps 1-2).

use crate::error::{DlmError, Result};
use crate::model::Segment;
use crate::transport::{Request, Sink, SinkSignal, Transport};
use m3u8_rs::{MediaSegment, Playlist};

/// One expanded fragment, carrying the key material needed to decrypt it
/// (if the playlist declares `#EXT-X-KEY:METHOD=AES-128`).
#[derive(Debug, Clone)]
pub struct HlsFragment {
    pub sequence: u64,
    pub url: String,
    pub key_uri: Option<String>,
    pub iv: Option<[u8; 16]>,
}

struct CollectSink(Vec<u8>);
impl Sink for CollectSink {
    fn write_chunk(&mut self, chunk: &[u8], _cumulative: u64) -> SinkSignal {
        self.0.extend_from_slice(chunk);
        SinkSignal::Continue
    }
}

pub fn fetch_text(transport: &dyn Transport, url: &str) -> Result<Vec<u8>> {
    let req = Request::get(url);
    let mut sink = CollectSink(Vec::new());
    transport
        .fetch(&req, &mut sink)
        .map_err(|e| DlmError::ProbeFailed(format!("fetching playlist {url}: {e}")))?;
    Ok(sink.0)
}

fn resolve(base: &str, maybe_relative: &str) -> String {
    if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
        return maybe_relative.to_string();
    }
    url::Url::parse(base)
        .and_then(|b| b.join(maybe_relative))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| maybe_relative.to_string())
}

fn parse_explicit_iv(iv_hex: &str) -> Option<[u8; 16]> {
    let iv_hex = iv_hex.trim_start_matches("0x").trim_start_matches("0X");
    let mut bytes = [0u8; 16];
    hex::decode_to_slice(iv_hex, &mut bytes).ok()?;
    Some(bytes)
}

/// Parses a media playlist and expands it into one fragment per
/// `#EXTINF` entry, threading the active `#EXT-X-KEY` (and its IV, explicit
/// or not) through subsequent segments until it changes.
pub fn expand_media_playlist(base_url: &str, bytes: &[u8]) -> Result<Vec<HlsFragment>> {
    let playlist = m3u8_rs::parse_playlist_res(bytes)
        .map_err(|e| DlmError::ProbeFailed(format!("invalid HLS playlist: {e:?}")))?;

    let media = match playlist {
        Playlist::MediaPlaylist(p) => p,
        Playlist::MasterPlaylist(_) => {
            return Err(DlmError::ProbeFailed(
                "expected a media playlist, got a master playlist".into(),
            ))
        }
    };

    let mut fragments = Vec::with_capacity(media.segments.len());
    let mut sequence = media.media_sequence as u64;
    let mut current_key_uri: Option<String> = None;
    let mut current_explicit_iv: Option<[u8; 16]> = None;

    for seg in &media.segments {
        update_key_state(seg, &mut current_key_uri, &mut current_explicit_iv);

        let iv = current_key_uri
            .as_ref()
            .map(|_| current_explicit_iv.unwrap_or_else(|| crate::video::decrypt::iv_from_sequence_number(sequence)));

        fragments.push(HlsFragment {
            sequence,
            url: resolve(base_url, &seg.uri),
            key_uri: current_key_uri.clone(),
            iv,
        });
        sequence += 1;
    }

    Ok(fragments)
}

fn update_key_state(
    seg: &MediaSegment,
    current_key_uri: &mut Option<String>,
    current_explicit_iv: &mut Option<[u8; 16]>,
) {
    if let Some(key) = &seg.key {
        match key.method {
            m3u8_rs::KeyMethod::None => {
                *current_key_uri = None;
                *current_explicit_iv = None;
            }
            m3u8_rs::KeyMethod::AES128 => {
                *current_key_uri = key.uri.clone();
                *current_explicit_iv = key.iv.as_deref().and_then(parse_explicit_iv);
            }
            _ => {
                // SAMPLE-AES and other methods are out of scope (§4.8 covers
                // AES-128 only); leave key state untouched rather than guess.
            }
        }
    }
}

pub fn fragments_to_segments(fragments: &[HlsFragment]) -> Vec<Segment> {
    fragments
        .iter()
        .enumerate()
        .map(|(i, frag)| {
            let mut seg = Segment::new_fragment(i, frag.url.clone());
            seg.iv = frag.iv;
            seg
        })
        .collect()
}
