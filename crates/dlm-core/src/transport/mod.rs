//! C1 Transport: performs a single HTTP(S) request with byte-range, proxy,
//! auth, and cookie support, streaming chunks to a caller-supplied sink.

mod curl_transport;

pub use curl_transport::CurlTransport;

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Head,
    Get,
}

/// A byte range request, inclusive on both ends as in the `Range` header.
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec {
    pub first: u64,
    pub last: Option<u64>,
}

impl RangeSpec {
    pub fn header_value(&self) -> String {
        match self.last {
            Some(last) => format!("bytes={}-{}", self.first, last),
            None => format!("bytes={}-", self.first),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyDescriptor {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub range: Option<RangeSpec>,
    pub headers: HashMap<String, String>,
    pub proxy: Option<ProxyDescriptor>,
    pub auth: Option<BasicAuth>,
    pub cookie_header: Option<String>,
    pub timeout_connect: Duration,
    pub timeout_read: Duration,
    pub verify_tls: bool,
    pub follow_redirects: bool,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            range: None,
            headers: HashMap::new(),
            proxy: None,
            auth: None,
            cookie_header: None,
            timeout_connect: Duration::from_secs(10),
            timeout_read: Duration::from_secs(30),
            verify_tls: true,
            follow_redirects: true,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    pub fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = Some(range);
        self
    }
}

/// What a sink callback returns after each chunk, letting the caller pause
/// or abort mid-stream without Transport itself knowing about job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkSignal {
    Continue,
    Pause,
    Abort,
}

#[derive(Debug, Clone)]
pub struct TransportSuccess {
    pub status_code: u32,
    pub final_url: String,
    pub response_headers: HashMap<String, String>,
    pub total_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Resolve,
    Connect,
    Tls,
    HttpStatus(u32),
    Timeout,
    RangeRejected,
    ServerClosed,
    WriteSink,
    Cancelled,
}

impl TransportErrorKind {
    /// §4.1: retryable for Resolve/Connect/Tls/Timeout/ServerClosed and 5xx;
    /// RangeRejected and 4xx (except 408, 429) are not.
    pub fn retryable(self) -> bool {
        match self {
            TransportErrorKind::Resolve
            | TransportErrorKind::Connect
            | TransportErrorKind::Tls
            | TransportErrorKind::Timeout
            | TransportErrorKind::ServerClosed => true,
            TransportErrorKind::HttpStatus(code) => {
                (500..600).contains(&code) || code == 408 || code == 429
            }
            TransportErrorKind::RangeRejected
            | TransportErrorKind::WriteSink
            | TransportErrorKind::Cancelled => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

/// The sink chunks are handed to. Implementors decide what `Abort`/`Pause`
/// mean for their caller (e.g. the Worker checks `JobTokens` and returns
/// `Abort`/`Pause` from here rather than Transport polling anything itself).
pub trait Sink: Send {
    fn write_chunk(&mut self, chunk: &[u8], cumulative_bytes: u64) -> SinkSignal;
}

pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        req: &Request,
        sink: &mut dyn Sink,
    ) -> Result<TransportSuccess, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_open_ended() {
        let r = RangeSpec {
            first: 100,
            last: None,
        };
        assert_eq!(r.header_value(), "bytes=100-");
    }

    #[test]
    fn range_header_closed() {
        let r = RangeSpec {
            first: 0,
            last: Some(99),
        };
        assert_eq!(r.header_value(), "bytes=0-99");
    }

    #[test]
    fn retryable_classification() {
        assert!(TransportErrorKind::Timeout.retryable());
        assert!(TransportErrorKind::HttpStatus(503).retryable());
        assert!(TransportErrorKind::HttpStatus(429).retryable());
        assert!(!TransportErrorKind::HttpStatus(404).retryable());
        assert!(!TransportErrorKind::RangeRejected.retryable());
    }
}
