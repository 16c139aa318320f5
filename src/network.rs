//! In-flight request accounting.

use crate::chrome::{RequestInfo, ResponseInfo};
use crate::timeouts::limits;
use std::collections::HashSet;

/// What the scheduler should do after a response was recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseOutcome {
    /// First successful response since load started: arm the force-render timer.
    pub arm_force: bool,
    /// In-flight count just reached zero.
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResponseKey {
    method: Option<String>,
    status: Option<u16>,
    url: String,
}

#[derive(Debug, Default)]
pub struct NetworkTracker {
    in_flight: u32,
    awaiting_first_success: bool,
    logged: HashSet<ResponseKey>,
}

impl NetworkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn is_quiet(&self) -> bool {
        self.in_flight == 0
    }

    /// The next 200 response arms the force-render timer.
    pub fn on_load_started(&mut self) {
        self.awaiting_first_success = true;
    }

    /// Whether the force-render timer is still waiting for its first 200.
    pub fn awaiting_first_success(&self) -> bool {
        self.awaiting_first_success
    }

    /// Gives up on waiting for a 200; the caller arms the force timer itself.
    pub fn clear_first_success(&mut self) {
        self.awaiting_first_success = false;
    }

    pub fn on_request_started(&mut self, request: &RequestInfo) {
        self.in_flight = self.in_flight.saturating_add(1);
        tracing::debug!("-> {} {}", request.method, truncate_url(&request.url));
    }

    pub fn on_response_received(&mut self, response: &ResponseInfo) -> ResponseOutcome {
        let key = ResponseKey {
            method: response.method.clone(),
            status: response.status,
            url: response.url.clone(),
        };
        if !self.logged.contains(&key) {
            tracing::debug!(
                "<- {} {}",
                response
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "---".into()),
                truncate_url(&response.url)
            );
            self.logged.insert(key);
        }

        if !response.is_final() {
            return ResponseOutcome::default();
        }

        let mut outcome = ResponseOutcome::default();
        if self.awaiting_first_success && response.status == Some(200) {
            self.awaiting_first_success = false;
            outcome.arm_force = true;
        }

        // A stray final response on an idle count must not look like a quiet network.
        let before = self.in_flight;
        self.in_flight = before.saturating_sub(1);
        outcome.quiet = before == 1;
        outcome
    }
}

pub fn truncate_url(url: &str) -> String {
    if url.len() <= limits::LOGGED_URL_LEN {
        return url.to_string();
    }
    let mut end = limits::LOGGED_URL_LEN;
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &url[..end])
}
