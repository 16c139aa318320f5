//! Readiness latch polled on a fixed interval.
//!
//! Readiness is informational: it never authorizes a capture by itself, it
//! only decides whether the animated-banner fast path is available. Checks
//! run off the scheduler loop; this type only tracks their outcome.

use crate::{Result, chrome::PageDriver, js_templates};

#[derive(Debug, Default)]
pub struct ReadinessPoller {
    ready: bool,
    active: bool,
    checking: bool,
    polls: u64,
    animated_banner: Option<bool>,
}

impl ReadinessPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a predicate evaluation is currently in flight.
    pub fn is_checking(&self) -> bool {
        self.checking
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// `Some(true)` only once readiness was reached on a page with a seekable timeline.
    pub fn animated_banner(&self) -> Option<bool> {
        self.animated_banner
    }

    /// Starts polling unless already ready or already polling. Returns whether it started.
    pub fn start(&mut self) -> bool {
        if self.ready || self.active {
            return false;
        }
        self.active = true;
        true
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Claims the next check. At most one evaluation is in flight at a time.
    pub fn begin_check(&mut self) -> bool {
        if !self.active || self.checking {
            return false;
        }
        self.checking = true;
        true
    }

    /// Records one predicate result. Returns true on the not-ready to ready transition.
    pub fn record(&mut self, result: Result<bool>) -> bool {
        self.checking = false;
        self.polls += 1;
        match result {
            Ok(true) if !self.ready => {
                self.ready = true;
                self.active = false;
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!("Readiness check #{} failed: {}", self.polls, e);
                false
            }
        }
    }

    pub fn set_animated_banner(&mut self, found: bool) {
        self.animated_banner = Some(found);
        tracing::debug!(
            "Page ready after {} poll(s){}",
            self.polls,
            if found { " (animated banner)" } else { "" }
        );
    }
}

/// Checks whether the page exposes a seekable animation timeline.
pub async fn probe_timeline(page: &dyn PageDriver) -> bool {
    match page.evaluate_bool(js_templates::TIMELINE_PROBE).await {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!("Timeline probe failed: {}", e);
            false
        }
    }
}
