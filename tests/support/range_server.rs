//! A wiremock responder that serves byte ranges of a fixed body.

#![allow(dead_code)]

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic test payload of `len` bytes.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serves `body` with `206 Partial Content` for ranged GETs and `200` otherwise.
pub struct RangeResponder {
    body: Vec<u8>,
    delay: Option<Duration>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body, delay: None }
    }

    /// Delays every response, keeping workers in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Inclusive byte bounds requested by a `Range` header, clamped to the body.
    pub fn bounds(&self, header: &str) -> Option<(usize, usize)> {
        let bounds = header.strip_prefix("bytes=")?;
        let (start, end) = bounds.split_once('-')?;
        let start: usize = start.trim().parse().ok()?;
        let last = self.body.len().checked_sub(1)?;
        let end = match end.trim() {
            "" => last,
            end => end.parse::<usize>().ok()?.min(last),
        };
        (start <= end).then_some((start, end))
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let template = match request.headers.get("range").and_then(|v| v.to_str().ok()) {
            Some(range) => match self.bounds(range) {
                Some((start, end)) => ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                    )
                    .set_body_bytes(self.body[start..=end].to_vec()),
                None => ResponseTemplate::new(416),
            },
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        };
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Mounts a HEAD advertising `len` bytes and, optionally, range support.
pub async fn mount_head(server: &MockServer, route: &str, len: usize, accept_ranges: bool) {
    let mut template = ResponseTemplate::new(200).insert_header("Content-Length", len.to_string().as_str());
    if accept_ranges {
        template = template.insert_header("Accept-Ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

/// Mounts HEAD plus a range-aware GET for `body` at `route`.
pub async fn mount_ranged(server: &MockServer, route: &str, body: &[u8]) {
    mount_head(server, route, body.len(), true).await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangeResponder::new(body.to_vec()))
        .mount(server)
        .await;
}
