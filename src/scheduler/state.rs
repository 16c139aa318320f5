use crate::chrome::{LoadStatus, PageEvent};
use crate::network::NetworkTracker;
use crate::readiness::ReadinessPoller;
use crate::timeouts::ms;
use crate::{CaptureConfig, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    AwaitingQuiet,
    AwaitingForce,
    Authorized,
    Rendering,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

/// Which timer authorized the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Debounce,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Force,
    Debounce,
    FrameSettle,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Page(PageEvent),
    TimerFired(TimerKind),
}

/// What the driver must do after a transition.
#[derive(Debug)]
pub enum Step {
    Continue,
    LoadCompleted,
    Poll,
    BeginCapture,
    LoadFailed(String),
}

/// Deadlines of the scheduler's cancellable timers. `None` means disarmed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timers {
    pub force: Option<Instant>,
    pub debounce: Option<Instant>,
    pub frame_settle: Option<Instant>,
    pub poll: Option<Instant>,
}

impl Timers {
    /// Earliest armed deadline. Ties go to the kind listed first.
    pub fn next(&self) -> Option<(TimerKind, Instant)> {
        [
            (TimerKind::Force, self.force),
            (TimerKind::Debounce, self.debounce),
            (TimerKind::FrameSettle, self.frame_settle),
            (TimerKind::Poll, self.poll),
        ]
        .into_iter()
        .filter_map(|(kind, at)| at.map(|at| (kind, at)))
        .min_by_key(|(_, at)| *at)
    }

    fn cancel(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Force => self.force = None,
            TimerKind::Debounce => self.debounce = None,
            TimerKind::FrameSettle => self.frame_settle = None,
            TimerKind::Poll => self.poll = None,
        }
    }

    fn cancel_all(&mut self) {
        *self = Self::default();
    }
}

/// All mutable state of one capture run.
#[derive(Debug)]
pub struct SchedulerState {
    debounce: Duration,
    max_timeout: Duration,
    pub network: NetworkTracker,
    pub readiness: ReadinessPoller,
    pub timers: Timers,
    phase: Phase,
    force_armed: bool,
    authorizations: u32,
    trigger: Option<Trigger>,
    authorized_at: Option<Instant>,
}

impl SchedulerState {
    pub fn new(config: &CaptureConfig) -> Self {
        Self::with_timeouts(config.debounce, config.max_timeout)
    }

    pub fn with_timeouts(debounce: Duration, max_timeout: Duration) -> Self {
        Self {
            debounce,
            max_timeout,
            network: NetworkTracker::new(),
            readiness: ReadinessPoller::new(),
            timers: Timers::default(),
            phase: Phase::Loading,
            force_armed: false,
            authorizations: 0,
            trigger: None,
            authorized_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn trigger(&self) -> Option<Trigger> {
        self.trigger
    }

    pub fn authorized_at(&self) -> Option<Instant> {
        self.authorized_at
    }

    pub fn authorizations(&self) -> u32 {
        self.authorizations
    }

    pub fn is_authorized(&self) -> bool {
        self.authorizations > 0
    }

    pub fn handle(&mut self, event: SchedulerEvent, now: Instant) -> Step {
        if self.phase.is_terminal() {
            return Step::Continue;
        }

        let step = match event {
            SchedulerEvent::Page(event) => self.on_page_event(event, now),
            SchedulerEvent::TimerFired(kind) => self.on_timer(kind, now),
        };
        self.refresh_phase();
        step
    }

    pub fn begin_render(&mut self) {
        self.timers.cancel_all();
        self.phase = Phase::Rendering;
    }

    pub fn finish(&mut self, succeeded: bool) {
        self.timers.cancel_all();
        self.readiness.stop();
        self.phase = if succeeded { Phase::Done } else { Phase::Failed };
    }

    /// Re-arms the poll interval after a tick, unless readiness was reached.
    pub fn schedule_next_poll(&mut self, now: Instant) {
        self.timers.poll = if self.readiness.is_active() && !self.phase.is_terminal() {
            Some(now + Duration::from_millis(ms::POLL_INTERVAL))
        } else {
            None
        };
    }

    /// Applies a finished readiness check and re-arms the poll interval.
    /// Returns true on the transition to ready.
    pub fn on_readiness_result(&mut self, result: Result<bool>, now: Instant) -> bool {
        let became_ready = self.readiness.record(result);
        self.schedule_next_poll(now);
        became_ready
    }

    fn on_page_event(&mut self, event: PageEvent, now: Instant) -> Step {
        match event {
            PageEvent::LoadStarted => {
                self.network.on_load_started();
                if self.readiness.start() {
                    self.timers.poll = Some(now);
                }
                Step::Continue
            }
            PageEvent::RequestStarted(request) => {
                self.network.on_request_started(&request);
                if self.timers.debounce.take().is_some() {
                    tracing::debug!("New request, debounce timer cancelled");
                }
                Step::Continue
            }
            PageEvent::ResponseReceived(response) => {
                let outcome = self.network.on_response_received(&response);
                if outcome.arm_force {
                    self.arm_force(now);
                }
                if outcome.quiet && !self.is_authorized() {
                    self.timers.debounce = Some(now + self.debounce);
                }
                Step::Continue
            }
            PageEvent::LoadFinished(LoadStatus::Success) => {
                // Without any 200 the force timer would never be armed.
                if self.network.awaiting_first_success() && !self.force_armed {
                    self.network.clear_first_success();
                    self.arm_force(now);
                }
                Step::LoadCompleted
            }
            PageEvent::LoadFinished(LoadStatus::Failure(reason)) => {
                self.timers.cancel_all();
                self.readiness.stop();
                self.phase = Phase::Failed;
                Step::LoadFailed(reason)
            }
            PageEvent::PageError(message) => {
                tracing::debug!("Page error: {}", message);
                Step::Continue
            }
            PageEvent::Console { level, text } => {
                tracing::debug!("CONSOLE ({}): {}", level, text);
                Step::Continue
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind, now: Instant) -> Step {
        self.timers.cancel(kind);
        match kind {
            TimerKind::Force => {
                self.authorize(Trigger::Force, now);
                Step::Continue
            }
            TimerKind::Debounce => {
                self.authorize(Trigger::Debounce, now);
                Step::Continue
            }
            TimerKind::FrameSettle => Step::BeginCapture,
            TimerKind::Poll => Step::Poll,
        }
    }

    fn arm_force(&mut self, now: Instant) {
        if self.force_armed || self.is_authorized() {
            return;
        }
        self.force_armed = true;
        self.timers.force = Some(now + self.max_timeout);
        tracing::debug!(
            "Force render timer armed ({}ms)",
            self.max_timeout.as_millis()
        );
    }

    /// Strictly-once guard: only the first firing is acted upon.
    fn authorize(&mut self, trigger: Trigger, now: Instant) -> bool {
        self.authorizations += 1;
        if self.authorizations != 1 {
            tracing::debug!("{:?} timer fired after authorization, ignored", trigger);
            return false;
        }

        self.timers.force = None;
        self.timers.debounce = None;
        self.trigger = Some(trigger);
        self.authorized_at = Some(now);

        let settle = Duration::from_millis(ms::FRAME_SETTLE);
        self.timers.frame_settle = Some(now + settle);
        tracing::debug!(
            "Capture authorized by {:?} timer; waiting for frame ({}ms)...",
            trigger,
            settle.as_millis()
        );
        true
    }

    fn refresh_phase(&mut self) {
        if self.phase.is_terminal() || self.phase == Phase::Rendering {
            return;
        }
        self.phase = if self.is_authorized() {
            Phase::Authorized
        } else if self.timers.debounce.is_some() {
            Phase::AwaitingQuiet
        } else if self.timers.force.is_some() {
            Phase::AwaitingForce
        } else {
            Phase::Loading
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrome::{RequestInfo, ResponseInfo, ResponseStage};

    fn state() -> SchedulerState {
        SchedulerState::with_timeouts(Duration::from_millis(500), Duration::from_millis(5000))
    }

    fn request(url: &str) -> SchedulerEvent {
        SchedulerEvent::Page(PageEvent::RequestStarted(RequestInfo {
            url: url.into(),
            method: "GET".into(),
        }))
    }

    fn finished(url: &str, status: u16) -> SchedulerEvent {
        SchedulerEvent::Page(PageEvent::ResponseReceived(ResponseInfo {
            url: url.into(),
            method: Some("GET".into()),
            status: Some(status),
            stage: ResponseStage::End,
        }))
    }

    fn load_started() -> SchedulerEvent {
        SchedulerEvent::Page(PageEvent::LoadStarted)
    }

    #[test]
    fn test_quiet_network_arms_debounce() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        s.handle(request("https://a.test/"), t0);
        s.handle(finished("https://a.test/", 200), t0);

        assert_eq!(s.timers.debounce, Some(t0 + Duration::from_millis(500)));
        assert_eq!(s.timers.force, Some(t0 + Duration::from_millis(5000)));
        assert_eq!(s.phase(), Phase::AwaitingQuiet);
    }

    #[test]
    fn test_new_request_cancels_debounce() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        s.handle(request("https://a.test/"), t0);
        s.handle(finished("https://a.test/", 200), t0);
        s.handle(request("https://a.test/api"), t0 + Duration::from_millis(100));

        assert!(s.timers.debounce.is_none());
        assert_eq!(s.phase(), Phase::AwaitingForce);
    }

    #[test]
    fn test_force_armed_only_once() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        s.handle(request("https://a.test/"), t0);
        s.handle(request("https://a.test/a"), t0);
        s.handle(finished("https://a.test/", 200), t0);
        s.handle(request("https://a.test/b"), t0);
        s.handle(finished("https://a.test/a", 200), t0 + Duration::from_millis(300));

        assert_eq!(s.timers.force, Some(t0 + Duration::from_millis(5000)));
    }

    #[test]
    fn test_competing_timers_authorize_once() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        s.handle(request("https://a.test/"), t0);
        s.handle(finished("https://a.test/", 200), t0);

        s.handle(SchedulerEvent::TimerFired(TimerKind::Force), t0);
        s.handle(SchedulerEvent::TimerFired(TimerKind::Debounce), t0);

        assert_eq!(s.authorizations(), 2);
        assert_eq!(s.trigger(), Some(Trigger::Force));
        assert_eq!(s.authorized_at(), Some(t0));
        assert!(s.timers.force.is_none());
        assert!(s.timers.debounce.is_none());
        assert_eq!(s.phase(), Phase::Authorized);

        assert_eq!(s.timers.next().map(|(kind, _)| kind), Some(TimerKind::FrameSettle));
        let step = s.handle(SchedulerEvent::TimerFired(TimerKind::FrameSettle), t0);
        assert!(matches!(step, Step::BeginCapture));
        assert!(s.timers.frame_settle.is_none());
    }

    #[test]
    fn test_no_debounce_after_authorization() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        s.handle(request("https://a.test/"), t0);
        s.handle(request("https://a.test/x"), t0);
        s.handle(finished("https://a.test/", 200), t0);
        s.handle(SchedulerEvent::TimerFired(TimerKind::Force), t0);
        s.handle(finished("https://a.test/x", 200), t0);

        assert!(s.timers.debounce.is_none());
    }

    #[test]
    fn test_load_failure_aborts_without_timers() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        let step = s.handle(
            SchedulerEvent::Page(PageEvent::LoadFinished(LoadStatus::Failure(
                "net::ERR_NAME_NOT_RESOLVED".into(),
            ))),
            t0,
        );

        match step {
            Step::LoadFailed(reason) => assert!(reason.contains("NAME_NOT_RESOLVED")),
            other => panic!("expected load failure, got {:?}", other),
        }
        assert!(s.timers.next().is_none());
        assert_eq!(s.phase(), Phase::Failed);
    }

    #[test]
    fn test_load_success_without_200_arms_backstop() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        s.handle(request("https://a.test/"), t0);
        s.handle(request("https://a.test/stream"), t0);
        s.handle(finished("https://a.test/", 404), t0);
        assert!(s.timers.force.is_none());

        let step = s.handle(
            SchedulerEvent::Page(PageEvent::LoadFinished(LoadStatus::Success)),
            t0 + Duration::from_millis(50),
        );
        assert!(matches!(step, Step::LoadCompleted));
        assert_eq!(s.timers.force, Some(t0 + Duration::from_millis(5050)));
    }

    #[test]
    fn test_poll_scheduled_on_load_start() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        assert_eq!(s.timers.next(), Some((TimerKind::Poll, t0)));

        let step = s.handle(SchedulerEvent::TimerFired(TimerKind::Poll), t0);
        assert!(matches!(step, Step::Poll));
        s.schedule_next_poll(t0);
        assert_eq!(s.timers.poll, Some(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_readiness_result_rearms_poll_until_ready() {
        let mut s = state();
        let t0 = Instant::now();
        s.handle(load_started(), t0);
        s.handle(SchedulerEvent::TimerFired(TimerKind::Poll), t0);
        assert!(s.readiness.begin_check());
        assert!(s.timers.poll.is_none());

        let later = t0 + Duration::from_millis(1900);
        assert!(!s.on_readiness_result(Ok(false), later));
        assert_eq!(s.timers.poll, Some(later + Duration::from_millis(100)));

        assert!(s.readiness.begin_check());
        assert!(s.on_readiness_result(Ok(true), later));
        assert!(s.timers.poll.is_none());
    }

    #[test]
    fn test_terminal_phase_ignores_events() {
        let mut s = state();
        let t0 = Instant::now();
        s.finish(true);
        s.handle(load_started(), t0);
        assert!(s.timers.next().is_none());
        assert_eq!(s.phase(), Phase::Done);
    }
}
