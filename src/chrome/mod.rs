pub mod browser;
pub mod discovery;
pub mod events;

use crate::{CropRect, Encoding, Result};
use serde::Serialize;
use std::path::Path;

pub use browser::{ChromePage, launch};
pub use discovery::find_chrome_executable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
}

/// Which part of a response an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStage {
    /// Headers arrived; the body may still be streaming.
    Start,
    /// The request is finished, successfully or not.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub url: String,
    pub method: Option<String>,
    pub status: Option<u16>,
    pub stage: ResponseStage,
}

impl ResponseInfo {
    pub fn is_final(&self) -> bool {
        self.stage == ResponseStage::End
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    Failure(String),
}

/// Lifecycle notifications delivered by the page, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    LoadStarted,
    RequestStarted(RequestInfo),
    ResponseReceived(ResponseInfo),
    LoadFinished(LoadStatus),
    PageError(String),
    Console { level: String, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    pub file_size_bytes: u64,
}

/// Operations the capture core invokes on the browser page.
#[async_trait::async_trait]
pub trait PageDriver: Send + Sync {
    /// Starts navigation. Progress and failure are reported as [`PageEvent`]s.
    async fn open(&self, url: &str) -> Result<()>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;

    async fn set_clip(&self, crop: Option<CropRect>) -> Result<()>;

    async fn evaluate_bool(&self, expression: &str) -> Result<bool>;

    /// Runs a script for its side effects.
    async fn execute(&self, script: &str) -> Result<()>;

    /// Registers a script that runs in every new document before its own scripts.
    async fn add_init_script(&self, script: &str) -> Result<()>;

    async fn render(&self, path: &Path, encoding: &Encoding) -> Result<RenderedImage>;

    async fn close(&self) -> Result<()>;
}
