//! Scripted in-memory page used to drive the scheduler on a paused clock.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use url_to_image::{
    CaptureConfig, CaptureError, Config, CropRect, Encoding, Result,
    chrome::{
        LoadStatus, PageDriver, PageEvent, RenderedImage, RequestInfo, ResponseInfo,
        ResponseStage,
    },
    config::CaptureTarget,
    js_templates,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(String),
    Execute(String),
    InitScript(String),
    Evaluate(String),
    SetClip(Option<CropRect>),
    Render { at: Instant, encoding: Encoding },
    Close,
}

/// Behaviour knobs for [`FakePage`].
#[derive(Debug, Default)]
pub struct Behaviour {
    /// Readiness results handed out in order; once exhausted the page reports ready.
    pub readiness: VecDeque<Result<bool>>,
    pub timeline: bool,
    pub seek_succeeds: bool,
    /// Per render call: `false` fails that call. Exhausted means success.
    pub renders: VecDeque<bool>,
    /// How long each readiness evaluation takes.
    pub readiness_delay: Duration,
    /// How long each executed script takes.
    pub execute_delay: Duration,
}

pub struct FakePage {
    script: Mutex<Vec<(u64, PageEvent)>>,
    events: UnboundedSender<PageEvent>,
    behaviour: Mutex<Behaviour>,
    calls: Mutex<Vec<Call>>,
}

impl FakePage {
    pub fn new(
        script: Vec<(u64, PageEvent)>,
        behaviour: Behaviour,
    ) -> (Arc<Self>, UnboundedReceiver<PageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let page = Arc::new(Self {
            script: Mutex::new(script),
            events: tx,
            behaviour: Mutex::new(behaviour),
            calls: Mutex::new(Vec::new()),
        });
        (page, rx)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn renders(&self) -> Vec<(Instant, Encoding)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Render { at, encoding } => Some((at, encoding)),
                _ => None,
            })
            .collect()
    }

    pub fn evaluations_of(&self, expression: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Evaluate(e) if e == expression))
            .count()
    }

    pub fn closes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Close))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn open(&self, url: &str) -> Result<()> {
        self.record(Call::Open(url.to_string()));

        let script = std::mem::take(&mut *self.script.lock().unwrap());
        let tx = self.events.clone();
        let opened = Instant::now();
        tokio::spawn(async move {
            for (offset, event) in script {
                tokio::time::sleep_until(opened + Duration::from_millis(offset)).await;
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn set_viewport(&self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    async fn set_clip(&self, crop: Option<CropRect>) -> Result<()> {
        self.record(Call::SetClip(crop));
        Ok(())
    }

    async fn evaluate_bool(&self, expression: &str) -> Result<bool> {
        self.record(Call::Evaluate(expression.to_string()));
        let (result, delay) = {
            let mut behaviour = self.behaviour.lock().unwrap();
            if expression == js_templates::TIMELINE_PROBE {
                return Ok(behaviour.timeline);
            }
            if expression.contains("seek") {
                return if behaviour.seek_succeeds {
                    Ok(true)
                } else {
                    Err(CaptureError::EvaluationError("seek threw".into()))
                };
            }
            (
                behaviour.readiness.pop_front().unwrap_or(Ok(true)),
                behaviour.readiness_delay,
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn execute(&self, script: &str) -> Result<()> {
        self.record(Call::Execute(script.to_string()));
        let delay = self.behaviour.lock().unwrap().execute_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn add_init_script(&self, script: &str) -> Result<()> {
        self.record(Call::InitScript(script.to_string()));
        Ok(())
    }

    async fn render(&self, path: &Path, encoding: &Encoding) -> Result<RenderedImage> {
        self.record(Call::Render {
            at: Instant::now(),
            encoding: *encoding,
        });
        let succeeds = self
            .behaviour
            .lock()
            .unwrap()
            .renders
            .pop_front()
            .unwrap_or(true);
        if succeeds {
            Ok(RenderedImage {
                width: 1280,
                height: 800,
                file_size_bytes: 4096,
            })
        } else {
            Err(CaptureError::RenderFailed(format!(
                "could not write {}",
                path.display()
            )))
        }
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}

pub fn capture_config(debounce_ms: u64, max_timeout_ms: u64) -> Arc<CaptureConfig> {
    capture_config_with(debounce_ms, max_timeout_ms, CaptureTarget::default())
}

pub fn capture_config_with(
    debounce_ms: u64,
    max_timeout_ms: u64,
    target: CaptureTarget,
) -> Arc<CaptureConfig> {
    let mut config = Config::default();
    config.capture.debounce_ms = debounce_ms;
    config.capture.max_timeout_ms = max_timeout_ms;
    let target = CaptureTarget {
        url: "https://example.com/".into(),
        output: PathBuf::from("out.png"),
        ..target
    };
    Arc::new(CaptureConfig::new(&config, target).unwrap())
}

pub fn request(url: &str) -> PageEvent {
    PageEvent::RequestStarted(RequestInfo {
        url: url.to_string(),
        method: "GET".into(),
    })
}

pub fn response(url: &str, status: u16, stage: ResponseStage) -> PageEvent {
    PageEvent::ResponseReceived(ResponseInfo {
        url: url.to_string(),
        method: Some("GET".into()),
        status: Some(status),
        stage,
    })
}

pub fn load_ok() -> PageEvent {
    PageEvent::LoadFinished(LoadStatus::Success)
}

/// A plain document: one request that finishes quickly, then the load event.
pub fn simple_page() -> Vec<(u64, PageEvent)> {
    let url = "https://example.com/";
    vec![
        (0, PageEvent::LoadStarted),
        (0, request(url)),
        (50, response(url, 200, ResponseStage::Start)),
        (100, response(url, 200, ResponseStage::End)),
        (120, load_ok()),
    ]
}

pub fn millis_between(from: Instant, to: Instant) -> u64 {
    to.duration_since(from).as_millis() as u64
}
