use crate::{
    CaptureConfig, CaptureError, CropRect, Encoding, Result,
    chrome::{PageDriver, PageEvent, RenderedImage},
    js_templates, output,
    scheduler::Trigger,
    timeouts::ms,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// How a capture will be performed, fixed at authorization time.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub settle_delay: Duration,
    pub primary: Encoding,
    pub fallback: Encoding,
    pub crop: Option<CropRect>,
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl RenderPlan {
    /// A fast-forwarded timeline needs no real-time settle delay.
    pub fn new(config: &CaptureConfig, fast_forwarded: bool) -> Self {
        Self {
            settle_delay: if fast_forwarded {
                Duration::ZERO
            } else {
                config.debounce
            },
            primary: config.encoding,
            fallback: Encoding::FALLBACK,
            crop: config.crop,
            retry_interval: config.debounce,
            max_attempts: config.max_render_attempts(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingUsed {
    Primary,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub encoding: Encoding,
    pub used: EncodingUsed,
    pub attempts: u32,
    pub image: RenderedImage,
    pub render_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub url: String,
    pub file_path: PathBuf,
    pub encoding: Encoding,
    pub encoding_used: EncodingUsed,
    pub attempts: u32,
    pub trigger: Trigger,
    pub authorized_after_ms: u64,
    pub render_ms: u64,
    pub total_ms: u64,
    pub width: u32,
    pub height: u32,
    pub file_size_bytes: u64,
    pub captured_at: DateTime<Utc>,
}

impl output::OutputFormatter for CaptureReport {
    fn format_text(&self) -> String {
        use crate::output::text;
        let mut lines = vec![
            text::success(&format!("Screenshot saved: {}", self.file_path.display())),
            text::key_value("URL", &self.url),
            text::key_value("Size", &format!("{}x{}", self.width, self.height)),
            text::key_value(
                "Format",
                &format!("{} (quality {})", self.encoding.format, self.encoding.quality),
            ),
            text::key_value("File Size", &text::format_bytes(self.file_size_bytes)),
            text::key_value(
                "Triggered By",
                &format!(
                    "{:?} timer after {}",
                    self.trigger,
                    text::format_duration_ms(self.authorized_after_ms)
                ),
            ),
            text::key_value("Total Time", &text::format_duration_ms(self.total_ms)),
        ];
        if self.encoding_used == EncodingUsed::Fallback {
            lines.push(text::warning("Primary encoding failed, fallback encoding used"));
        }
        if self.attempts > 1 {
            lines.push(text::key_value("Attempts", &self.attempts.to_string()));
        }
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self, pretty)
    }
}

/// Performs the single authorized capture.
pub struct CaptureExecutor<'a> {
    config: &'a CaptureConfig,
    page: &'a dyn PageDriver,
    events: &'a mut UnboundedReceiver<PageEvent>,
    events_open: bool,
    started: Instant,
}

impl<'a> CaptureExecutor<'a> {
    pub fn new(
        config: &'a CaptureConfig,
        page: &'a dyn PageDriver,
        events: &'a mut UnboundedReceiver<PageEvent>,
        started: Instant,
    ) -> Self {
        Self {
            config,
            page,
            events,
            events_open: true,
            started,
        }
    }

    pub async fn run(mut self, animated_banner: bool) -> Result<RenderOutcome> {
        tracing::debug!("Waiting to start rendering...");

        if let Some(crop) = self.config.crop {
            tracing::debug!("Cropping...");
            self.page.set_clip(Some(crop)).await?;
        }

        let fast_forwarded = animated_banner && self.fast_forward().await;
        let plan = RenderPlan::new(self.config, fast_forwarded);

        let elapsed = self.started.elapsed().as_millis();
        tracing::debug!(
            "Waiting {}ms before rendering image...",
            plan.settle_delay.as_millis()
        );
        tracing::debug!(
            "Should grab screenshot at {}ms",
            elapsed + plan.settle_delay.as_millis()
        );
        self.idle_until(Instant::now() + plan.settle_delay, true)
            .await;

        for attempt in 1..=plan.max_attempts {
            if attempt > 1 {
                self.idle_until(Instant::now() + plan.retry_interval, false)
                    .await;
            }

            tracing::debug!("...timeout completed, starting rendering image...");
            let begin = Instant::now();

            if let Some((encoding, used, image)) = self.render_once(&plan).await {
                let render_ms = begin.elapsed().as_millis() as u64;
                if let Err(e) = self.page.close().await {
                    tracing::warn!("Failed to close page: {}", e);
                }

                tracing::info!("Done rendering image: {}", self.config.output.display());
                tracing::debug!("Rendering time {}ms", render_ms);
                tracing::debug!(
                    "Total processing time: {}ms",
                    self.started.elapsed().as_millis()
                );

                return Ok(RenderOutcome {
                    encoding,
                    used,
                    attempts: attempt,
                    image,
                    render_ms,
                });
            }

            tracing::warn!("Render attempt {}/{} failed", attempt, plan.max_attempts);
        }

        tracing::error!("Render timed out after {} attempt(s)", plan.max_attempts);
        Err(CaptureError::RenderTimeout {
            attempts: plan.max_attempts,
        })
    }

    /// Seeks an animated banner's timeline so no real time has to pass.
    async fn fast_forward(&self) -> bool {
        let script = js_templates::seek_timeline(self.config.timeline_position);
        match self.page.evaluate_bool(&script).await {
            Ok(true) => {
                tracing::debug!("Animated banner detected, timeline seeked");
                true
            }
            Ok(false) => {
                tracing::debug!("Timeline disappeared before seeking, using settle delay");
                false
            }
            Err(e) => {
                tracing::debug!("Timeline seek failed, using settle delay: {}", e);
                false
            }
        }
    }

    async fn render_once(
        &self,
        plan: &RenderPlan,
    ) -> Option<(Encoding, EncodingUsed, RenderedImage)> {
        let path = &self.config.output;

        match self.page.render(path, &plan.primary).await {
            Ok(image) => return Some((plan.primary, EncodingUsed::Primary, image)),
            Err(e) => tracing::warn!("Render with {} failed: {}", plan.primary.format, e),
        }

        match self.page.render(path, &plan.fallback).await {
            Ok(image) => Some((plan.fallback, EncodingUsed::Fallback, image)),
            Err(e) => {
                tracing::warn!("Fallback render with {} failed: {}", plan.fallback.format, e);
                None
            }
        }
    }

    /// Waits for `deadline` while still logging late page events.
    async fn idle_until(&mut self, deadline: Instant, still_waiting: bool) {
        let period = Duration::from_millis(ms::WAITING_TICK);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick(), if still_waiting => {
                    tracing::debug!("...still waiting...");
                }
                event = self.events.recv(), if self.events_open => match event {
                    Some(PageEvent::PageError(message)) => tracing::debug!("Page error: {}", message),
                    Some(PageEvent::Console { level, text }) => {
                        tracing::debug!("CONSOLE ({}): {}", level, text)
                    }
                    Some(_) => {}
                    None => self.events_open = false,
                },
            }
        }
    }
}
