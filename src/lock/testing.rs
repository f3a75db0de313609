//! Scripted device transport for engine tests.

use super::http_client::DeviceTransport;
use crate::config::HttpMethod;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub url: String,
    pub method: HttpMethod,
    pub at: Instant,
}

impl SentRequest {
    /// Path of the request without the device root or query string.
    pub fn route(&self) -> &str {
        let without_scheme = self.url.split_once("://").map_or(self.url.as_str(), |(_, r)| r);
        let path = without_scheme.find('/').map_or("", |i| &without_scheme[i..]);
        path.split('?').next().unwrap_or(path)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.url.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// Records every request and answers `/status` with a configurable body and
/// HTTP status code.
pub struct MockTransport {
    requests: Mutex<Vec<SentRequest>>,
    status_body: Mutex<String>,
    status_code: Mutex<u16>,
    unreachable: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            status_body: Mutex::new(r#"{"current":1,"target":1}"#.to_string()),
            status_code: Mutex::new(200),
            unreachable: Mutex::new(false),
        }
    }

    pub fn set_status(&self, body: &str) {
        *self.status_body.lock() = body.to_string();
    }

    /// Answer `/status` with this HTTP status code. Anything outside 2xx is
    /// reported the way the HTTP client reports it, body included.
    pub fn set_status_code(&self, code: u16) {
        *self.status_code.lock() = code;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    pub fn requests(&self) -> Vec<SentRequest> {
        self.requests.lock().clone()
    }

    /// Lock and unlock commands, in send order.
    pub fn commands(&self) -> Vec<SentRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.route() != "/status")
            .collect()
    }

    pub fn count(&self, route: &str) -> usize {
        self.requests().iter().filter(|r| r.route() == route).count()
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn send(&self, url: &str, method: HttpMethod) -> Result<String> {
        let request = SentRequest {
            url: url.to_string(),
            method,
            at: Instant::now(),
        };
        let is_status = request.route() == "/status";
        self.requests.lock().push(request);

        if *self.unreachable.lock() {
            return Err(unreachable_error());
        }
        if !is_status {
            return Ok("OK".to_string());
        }

        let body = self.status_body.lock().clone();
        let status = *self.status_code.lock();
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(BridgeError::HttpStatus {
                url: url.to_string(),
                status,
                body,
            })
        }
    }
}

/// A genuine reqwest error, produced without touching the network: the
/// request cannot even be built from an unparsable URL.
fn unreachable_error() -> BridgeError {
    match reqwest::Client::new().get("://unreachable").build() {
        Err(e) => BridgeError::Transport(e),
        Ok(request) => panic!("request to {} unexpectedly built", request.url()),
    }
}

/// Process-wide logger that keeps every record so tests can assert on what
/// was logged. Tests run in parallel, so match on something unique to the
/// test rather than counting everything.
struct CapturingLogger {
    records: Mutex<Vec<(Level, String)>>,
}

static LOGGER: CapturingLogger = CapturingLogger {
    records: parking_lot::const_mutex(Vec::new()),
};

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

/// Install the capturing logger. Safe to call from every test.
pub fn capture_logs() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

/// Number of records at `level` whose message contains `needle`.
pub fn logged(level: Level, needle: &str) -> usize {
    LOGGER
        .records
        .lock()
        .iter()
        .filter(|(l, message)| *l == level && message.contains(needle))
        .count()
}
