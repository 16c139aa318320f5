//! Decides the single moment a capture is authorized.
//!
//! All run state lives in [`SchedulerState`]; this driver only turns page
//! events and timer deadlines into [`SchedulerEvent`]s and performs the
//! asynchronous work each [`Step`] asks for. Page-side work that may be slow
//! (readiness checks, the timeline probe, the `complete` hook) runs as
//! background tasks so timers keep firing on time while it is in flight.

pub mod state;

pub use state::{Phase, SchedulerEvent, SchedulerState, Step, TimerKind, Timers, Trigger};

use crate::{
    CaptureConfig, CaptureError, Result,
    capture::{CaptureExecutor, CaptureReport},
    chrome::{PageDriver, PageEvent},
    hooks::SiteHooks,
    readiness,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Results of work spawned off the scheduler loop.
enum Background {
    Readiness(Result<bool>),
    TimelineProbe(bool),
    Hook {
        name: &'static str,
        result: Result<()>,
    },
}

pub struct Scheduler {
    config: Arc<CaptureConfig>,
    page: Arc<dyn PageDriver>,
    hooks: Arc<dyn SiteHooks>,
    events: UnboundedReceiver<PageEvent>,
    events_open: bool,
    background: JoinSet<Background>,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(
        config: Arc<CaptureConfig>,
        page: Arc<dyn PageDriver>,
        hooks: Box<dyn SiteHooks>,
        events: UnboundedReceiver<PageEvent>,
    ) -> Self {
        let state = SchedulerState::new(&config);
        Self {
            config,
            page,
            hooks: Arc::from(hooks),
            events,
            events_open: true,
            background: JoinSet::new(),
            state,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Runs until the capture is written or the run fails.
    ///
    /// Closing the returned receiver is left to the caller; dropping it
    /// silences any page errors that arrive after the run. Background work
    /// still in flight is aborted.
    pub async fn run(mut self) -> (Result<CaptureReport>, UnboundedReceiver<PageEvent>) {
        let result = self.drive().await;
        self.background.abort_all();
        (result, self.events)
    }

    async fn drive(&mut self) -> Result<CaptureReport> {
        let started = Instant::now();

        if let Err(e) = self.hooks.init(self.page.as_ref()).await {
            tracing::warn!("Site script init failed: {}", e);
        }

        tracing::debug!("Opening {}", self.config.url);
        self.page.open(&self.config.url).await?;

        loop {
            match self.next_step().await {
                Step::Continue => {}
                Step::LoadCompleted => {
                    tracing::debug!("Page load finished");
                    self.spawn_complete_hook();
                }
                Step::Poll => self.spawn_readiness_check(),
                Step::LoadFailed(reason) => {
                    tracing::error!("Unable to load url: {}", self.config.url);
                    return Err(CaptureError::LoadFailed {
                        url: self.config.url.clone(),
                        reason,
                    });
                }
                Step::BeginCapture => return self.capture(started).await,
            }
        }
    }

    /// Waits for the next page event, background result or timer deadline and applies it.
    async fn next_step(&mut self) -> Step {
        let next_timer = self.state.timers.next();
        let deadline = next_timer.map(|(_, at)| at);

        tokio::select! {
            biased;
            event = self.events.recv(), if self.events_open => match event {
                Some(event) => self.state.handle(SchedulerEvent::Page(event), Instant::now()),
                None => {
                    tracing::debug!("Page event stream closed");
                    self.events_open = false;
                    Step::Continue
                }
            },
            Some(joined) = self.background.join_next(), if !self.background.is_empty() => {
                match joined {
                    Ok(done) => self.on_background(done),
                    Err(e) => tracing::debug!("Background page task ended early: {}", e),
                }
                Step::Continue
            }
            _ = sleep_until_armed(deadline) => match next_timer {
                Some((kind, _)) => self.state.handle(SchedulerEvent::TimerFired(kind), Instant::now()),
                None => Step::Continue,
            },
        }
    }

    fn on_background(&mut self, done: Background) {
        match done {
            Background::Readiness(result) => {
                if self.state.on_readiness_result(result, Instant::now()) {
                    let page = Arc::clone(&self.page);
                    self.background.spawn(async move {
                        Background::TimelineProbe(readiness::probe_timeline(page.as_ref()).await)
                    });
                }
            }
            Background::TimelineProbe(found) => self.state.readiness.set_animated_banner(found),
            Background::Hook { name, result } => {
                if let Err(e) = result {
                    tracing::warn!("Site script {} failed: {}", name, e);
                }
            }
        }
    }

    fn spawn_readiness_check(&mut self) {
        if !self.state.readiness.begin_check() {
            return;
        }
        let hooks = Arc::clone(&self.hooks);
        let page = Arc::clone(&self.page);
        self.background
            .spawn(async move { Background::Readiness(hooks.is_ready(page.as_ref()).await) });
    }

    fn spawn_complete_hook(&mut self) {
        let hooks = Arc::clone(&self.hooks);
        let page = Arc::clone(&self.page);
        self.background.spawn(async move {
            Background::Hook {
                name: "complete",
                result: hooks.complete(page.as_ref()).await,
            }
        });
    }

    async fn capture(&mut self, started: Instant) -> Result<CaptureReport> {
        self.state.begin_render();

        let authorized_after_ms = self
            .state
            .authorized_at()
            .map(|at| at.duration_since(started).as_millis() as u64)
            .unwrap_or_default();
        let trigger = self.state.trigger().unwrap_or(Trigger::Force);
        let animated_banner = self.state.readiness.animated_banner().unwrap_or(false);

        let executor = CaptureExecutor::new(
            &self.config,
            self.page.as_ref(),
            &mut self.events,
            started,
        );
        let result = executor.run(animated_banner).await;
        self.state.finish(result.is_ok());
        let outcome = result?;

        Ok(CaptureReport {
            url: self.config.url.clone(),
            file_path: self.config.output.clone(),
            encoding: outcome.encoding,
            encoding_used: outcome.used,
            attempts: outcome.attempts,
            trigger,
            authorized_after_ms,
            render_ms: outcome.render_ms,
            total_ms: started.elapsed().as_millis() as u64,
            width: outcome.image.width,
            height: outcome.image.height,
            file_size_bytes: outcome.image.file_size_bytes,
            captured_at: chrono::Utc::now(),
        })
    }
}

async fn sleep_until_armed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
