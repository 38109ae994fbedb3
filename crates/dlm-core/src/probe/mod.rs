//! C6 Probe: pre-flight HEAD/GET-range to learn size, resumability, server
//! filename, and accept-ranges (§4.6).

mod content_disposition;
mod filename;

pub use filename::{derive_filename, sanitize_for_filesystem};

use crate::error::{DlmError, Result};
use crate::transport::{Method, RangeSpec, Request, Sink, SinkSignal, Transport};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub total_size: Option<u64>,
    pub resumable: bool,
    pub accept_ranges: bool,
    pub effective_url: String,
    pub content_type: Option<String>,
    pub server_filename: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

struct DiscardSink;
impl Sink for DiscardSink {
    fn write_chunk(&mut self, _chunk: &[u8], _cumulative: u64) -> SinkSignal {
        // A 206 to our 1-byte range GET always carries a body; aborting the
        // transfer here would turn that body into a curl cancellation error
        // before the response status is ever reached. Let it run to completion
        // and throw the bytes away.
        SinkSignal::Continue
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    // "bytes 0-0/12345" or "bytes */12345"
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// §4.6: HEAD first; on 405/ambiguous fall back to a `Range: bytes=0-0` GET.
pub fn probe(transport: &dyn Transport, url: &str, headers: HashMap<String, String>) -> Result<ProbeResult> {
    let mut head_req = Request::head(url);
    head_req.headers = headers.clone();
    let mut sink = DiscardSink;

    let head_outcome = transport.fetch(&head_req, &mut sink);

    let (status, resp_headers, effective_url) = match head_outcome {
        Ok(success) => (success.status_code, success.response_headers, success.final_url),
        Err(e) if e.kind == crate::transport::TransportErrorKind::HttpStatus(405) => {
            return probe_via_range_get(transport, url, headers);
        }
        Err(e) => return Err(DlmError::ProbeFailed(e.to_string())),
    };

    if status == 200 || status == 204 {
        let accept_ranges = header(&resp_headers, "accept-ranges")
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        let total_size = header(&resp_headers, "content-length").and_then(|v| v.parse().ok());
        if total_size.is_some() && accept_ranges {
            return Ok(build_result(
                total_size,
                true,
                accept_ranges,
                effective_url,
                &resp_headers,
            ));
        }
        // Ambiguous: HEAD succeeded but didn't confirm resumability — try
        // the range GET probe for a definitive answer before giving up.
        if let Ok(via_range) = probe_via_range_get(transport, url, headers) {
            return Ok(via_range);
        }
        return Ok(build_result(
            total_size,
            false,
            accept_ranges,
            effective_url,
            &resp_headers,
        ));
    }

    probe_via_range_get(transport, url, headers)
}

fn probe_via_range_get(
    transport: &dyn Transport,
    url: &str,
    headers: HashMap<String, String>,
) -> Result<ProbeResult> {
    let mut req = Request::get(url).with_range(RangeSpec {
        first: 0,
        last: Some(0),
    });
    req.method = Method::Get;
    req.headers = headers;
    let mut sink = DiscardSink;

    match transport.fetch(&req, &mut sink) {
        Ok(success) if success.status_code == 206 => {
            let total = header(&success.response_headers, "content-range")
                .and_then(parse_content_range_total);
            Ok(build_result(
                total,
                true,
                true,
                success.final_url,
                &success.response_headers,
            ))
        }
        Ok(success) => {
            let total = header(&success.response_headers, "content-length").and_then(|v| v.parse().ok());
            Ok(build_result(
                total,
                false,
                false,
                success.final_url,
                &success.response_headers,
            ))
        }
        Err(e) => Err(DlmError::ProbeFailed(e.to_string())),
    }
}

fn build_result(
    total_size: Option<u64>,
    resumable: bool,
    accept_ranges: bool,
    effective_url: String,
    resp_headers: &HashMap<String, String>,
) -> ProbeResult {
    let content_type = header(resp_headers, "content-type").map(|s| s.to_string());
    let etag = header(resp_headers, "etag").map(|s| s.trim_matches('"').to_string());
    let last_modified = header(resp_headers, "last-modified").map(|s| s.to_string());
    let content_disposition = header(resp_headers, "content-disposition");
    let server_filename = Some(derive_filename(&effective_url, content_disposition));

    ProbeResult {
        total_size,
        resumable,
        accept_ranges,
        effective_url,
        content_type,
        server_filename,
        etag,
        last_modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_range_total_extracts_denominator() {
        assert_eq!(parse_content_range_total("bytes 0-0/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes */12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
    }
}
