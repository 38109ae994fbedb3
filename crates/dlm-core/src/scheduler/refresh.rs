//! Dead-link refresh policy (§4.9): on `RangeRejected` or a post-success
//! 403/410, re-resolve the URL via `InfoExtractor` and validate the new
//! resource still matches before resuming.

use crate::error::{DlmError, Result};
use crate::extractor::{ExtractedResource, InfoExtractor};
use crate::probe::{self, ProbeResult};
use crate::transport::Transport;
use std::collections::HashMap;

pub(super) struct RefreshOutcome {
    pub effective_url: String,
    pub headers: HashMap<String, String>,
}

/// Re-resolves `original_url`, re-probes the result, and checks that
/// `total_size`/`etag` still match what the job observed before the link
/// went stale. A mismatch is `ContentChanged`, not a retryable failure —
/// continuing would silently corrupt the partially-downloaded file.
pub(super) fn refresh_and_validate(
    transport: &dyn Transport,
    extractor: &dyn InfoExtractor,
    original_url: &str,
    headers: HashMap<String, String>,
    expected_total_size: Option<u64>,
    expected_etag: Option<&str>,
) -> Result<RefreshOutcome> {
    let resolved = extractor
        .refresh(original_url)
        .map_err(|e| DlmError::RefreshFailed(e.to_string()))?;

    let new_url = match resolved {
        ExtractedResource::Plain(p) => p.url,
        ExtractedResource::Media(media) => media
            .best_format()
            .map(|f| f.url.clone())
            .ok_or_else(|| DlmError::RefreshFailed("refresh returned media with no formats".into()))?,
    };

    let probed: ProbeResult = probe::probe(transport, &new_url, headers.clone())
        .map_err(|e| DlmError::RefreshFailed(e.to_string()))?;

    if let (Some(expected), Some(found)) = (expected_total_size, probed.total_size) {
        if expected != found {
            return Err(DlmError::ContentChanged(format!(
                "total_size changed after refresh: {expected} -> {found}"
            )));
        }
    }
    if let (Some(expected), Some(found)) = (expected_etag, probed.etag.as_deref()) {
        if expected != found {
            return Err(DlmError::ContentChanged(format!(
                "etag changed after refresh: {expected} -> {found}"
            )));
        }
    }

    Ok(RefreshOutcome {
        effective_url: probed.effective_url,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PlainResource;
    use crate::transport::{Request, Sink, SinkSignal, TransportError, TransportSuccess};

    struct StubTransport(HashMap<String, u64>);
    impl Transport for StubTransport {
        fn fetch(&self, req: &Request, sink: &mut dyn Sink) -> std::result::Result<TransportSuccess, TransportError> {
            sink.write_chunk(&[], 0);
            let mut headers = HashMap::new();
            if let Some(size) = self.0.get(&req.url) {
                headers.insert("content-length".to_string(), size.to_string());
                headers.insert("accept-ranges".to_string(), "bytes".to_string());
            }
            Ok(TransportSuccess {
                status_code: 200,
                response_headers: headers,
                final_url: req.url.clone(),
                total_received: 0,
            })
        }
    }

    struct StubExtractor(String);
    impl InfoExtractor for StubExtractor {
        fn extract(&self, url: &str) -> Result<ExtractedResource> {
            Ok(ExtractedResource::Plain(PlainResource {
                url: url.to_string(),
                suggested_filename: None,
            }))
        }
        fn refresh(&self, _url: &str) -> Result<ExtractedResource> {
            Ok(ExtractedResource::Plain(PlainResource {
                url: self.0.clone(),
                suggested_filename: None,
            }))
        }
    }

    #[test]
    fn matching_size_after_refresh_succeeds() {
        let mut sizes = HashMap::new();
        sizes.insert("https://cdn.example.com/new".to_string(), 1000u64);
        let transport = StubTransport(sizes);
        let extractor = StubExtractor("https://cdn.example.com/new".to_string());
        let outcome = refresh_and_validate(&transport, &extractor, "https://example.com/old", HashMap::new(), Some(1000), None).unwrap();
        assert_eq!(outcome.effective_url, "https://cdn.example.com/new");
    }

    #[test]
    fn mismatched_size_after_refresh_is_content_changed() {
        let mut sizes = HashMap::new();
        sizes.insert("https://cdn.example.com/new".to_string(), 2000u64);
        let transport = StubTransport(sizes);
        let extractor = StubExtractor("https://cdn.example.com/new".to_string());
        let err = refresh_and_validate(&transport, &extractor, "https://example.com/old", HashMap::new(), Some(1000), None).unwrap_err();
        assert!(matches!(err, DlmError::ContentChanged(_)));
    }
}
