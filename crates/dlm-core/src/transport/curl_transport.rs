use super::{
    Method, Request, Sink, SinkSignal, Transport, TransportError, TransportErrorKind,
    TransportSuccess,
};
use curl::easy::{Easy, List};
use std::cell::RefCell;
use std::collections::HashMap;

/// Transport backed by libcurl's simple (non-multi) interface. Every call to
/// `fetch` owns a dedicated `Easy` handle; callers run many of these
/// concurrently on a thread pool (see [`crate::worker`]) rather than sharing
/// one handle, matching the per-segment-thread model the engine uses for
/// byte-range downloads.
pub struct CurlTransport;

impl Default for CurlTransport {
    fn default() -> Self {
        Self
    }
}

fn classify_curl_err(err: &curl::Error) -> TransportErrorKind {
    if err.is_operation_timedout() {
        TransportErrorKind::Timeout
    } else if err.is_couldnt_resolve_host() || err.is_couldnt_resolve_proxy() {
        TransportErrorKind::Resolve
    } else if err.is_ssl_connect_error() || err.is_ssl_certproblem() || err.is_ssl_cacert() {
        TransportErrorKind::Tls
    } else if err.is_couldnt_connect() || err.is_recv_error() || err.is_send_error() {
        TransportErrorKind::Connect
    } else if err.is_got_nothing() {
        TransportErrorKind::ServerClosed
    } else {
        TransportErrorKind::Connect
    }
}

impl Transport for CurlTransport {
    fn fetch(
        &self,
        req: &Request,
        sink: &mut dyn Sink,
    ) -> Result<TransportSuccess, TransportError> {
        let mut handle = Easy::new();
        let err = |kind: TransportErrorKind, e: impl std::fmt::Display| TransportError {
            kind,
            message: e.to_string(),
        };

        handle
            .url(&req.url)
            .map_err(|e| err(TransportErrorKind::Connect, e))?;

        if req.method == Method::Head {
            handle
                .nobody(true)
                .map_err(|e| err(TransportErrorKind::Connect, e))?;
        }

        handle
            .follow_location(req.follow_redirects)
            .map_err(|e| err(TransportErrorKind::Connect, e))?;
        handle
            .connect_timeout(req.timeout_connect)
            .map_err(|e| err(TransportErrorKind::Connect, e))?;
        handle
            .low_speed_time(req.timeout_read)
            .map_err(|e| err(TransportErrorKind::Connect, e))?;
        handle
            .low_speed_limit(1024)
            .map_err(|e| err(TransportErrorKind::Connect, e))?;
        handle
            .ssl_verify_peer(req.verify_tls)
            .map_err(|e| err(TransportErrorKind::Tls, e))?;
        handle
            .ssl_verify_host(req.verify_tls)
            .map_err(|e| err(TransportErrorKind::Tls, e))?;

        if let Some(range) = &req.range {
            handle
                .range(&range.header_value()[6..]) // curl wants "first-last", not "bytes=..."
                .map_err(|e| err(TransportErrorKind::Connect, e))?;
        }

        if let Some(proxy) = &req.proxy {
            handle
                .proxy(&proxy.url)
                .map_err(|e| err(TransportErrorKind::Connect, e))?;
        }

        if let Some(auth) = &req.auth {
            handle
                .username(&auth.username)
                .map_err(|e| err(TransportErrorKind::Connect, e))?;
            handle
                .password(&auth.password)
                .map_err(|e| err(TransportErrorKind::Connect, e))?;
        }

        let mut header_list = List::new();
        for (k, v) in &req.headers {
            header_list
                .append(&format!("{k}: {v}"))
                .map_err(|e| err(TransportErrorKind::Connect, e))?;
        }
        if let Some(cookie) = &req.cookie_header {
            header_list
                .append(&format!("Cookie: {cookie}"))
                .map_err(|e| err(TransportErrorKind::Connect, e))?;
        }
        handle
            .http_headers(header_list)
            .map_err(|e| err(TransportErrorKind::Connect, e))?;

        let response_headers: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
        let status_code: RefCell<u32> = RefCell::new(0);
        let total_received: RefCell<u64> = RefCell::new(0);
        let aborted: RefCell<bool> = RefCell::new(false);
        let write_err: RefCell<Option<String>> = RefCell::new(None);

        {
            let mut transfer = handle.transfer();

            transfer
                .header_function(|line| {
                    if let Ok(s) = std::str::from_utf8(line) {
                        let s = s.trim_end();
                        if s.starts_with("HTTP/") {
                            response_headers.borrow_mut().clear();
                        } else if let Some((name, value)) = s.split_once(':') {
                            response_headers
                                .borrow_mut()
                                .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                        }
                    }
                    true
                })
                .map_err(|e| err(TransportErrorKind::Connect, e))?;

            transfer
                .write_function(|data| {
                    if *aborted.borrow() {
                        return Ok(0); // signals abort to libcurl
                    }
                    let cumulative = {
                        let mut t = total_received.borrow_mut();
                        *t += data.len() as u64;
                        *t
                    };
                    match sink.write_chunk(data, cumulative) {
                        SinkSignal::Continue => Ok(data.len()),
                        SinkSignal::Pause | SinkSignal::Abort => {
                            *aborted.borrow_mut() = true;
                            if write_err.borrow().is_none() {
                                *write_err.borrow_mut() = Some("sink requested stop".into());
                            }
                            Ok(0)
                        }
                    }
                })
                .map_err(|e| err(TransportErrorKind::Connect, e))?;

            transfer
                .perform()
                .map_err(|e| {
                    if *aborted.borrow() {
                        TransportError {
                            kind: TransportErrorKind::Cancelled,
                            message: "sink requested stop".into(),
                        }
                    } else {
                        err(classify_curl_err(&e), e)
                    }
                })?;
        }

        let code = handle
            .response_code()
            .map_err(|e| err(TransportErrorKind::Connect, e))?;
        *status_code.borrow_mut() = code;

        if code == 416 {
            return Err(TransportError {
                kind: TransportErrorKind::RangeRejected,
                message: "416 Range Not Satisfiable".into(),
            });
        }
        if code >= 400 {
            return Err(TransportError {
                kind: TransportErrorKind::HttpStatus(code),
                message: format!("HTTP {code}"),
            });
        }

        let final_url = handle
            .effective_url()
            .map_err(|e| err(TransportErrorKind::Connect, e))?
            .unwrap_or(&req.url)
            .to_string();

        Ok(TransportSuccess {
            status_code: code,
            final_url,
            response_headers: response_headers.into_inner(),
            total_received: total_received.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RangeSpec;

    struct CollectSink(Vec<u8>);
    impl Sink for CollectSink {
        fn write_chunk(&mut self, chunk: &[u8], _cumulative: u64) -> SinkSignal {
            self.0.extend_from_slice(chunk);
            SinkSignal::Continue
        }
    }

    #[test]
    fn range_header_value_strips_bytes_prefix() {
        let range = RangeSpec {
            first: 0,
            last: Some(99),
        };
        assert_eq!(&range.header_value()[6..], "0-99");
    }

    #[test]
    fn transport_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CurlTransport>();
    }

    // Network-touching fetch behavior is covered by the integration tests in
    // `tests/` against a local range-serving HTTP server instead of here, to
    // keep unit tests hermetic.
    #[allow(dead_code)]
    fn _unused(t: &CurlTransport, req: &Request) {
        let mut s = CollectSink(Vec::new());
        let _ = t.fetch(req, &mut s);
    }
}
