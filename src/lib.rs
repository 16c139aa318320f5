pub mod capture;
pub mod chrome;
pub mod cli;
pub mod config;
pub mod error;
pub mod hooks;
pub mod js_templates;
pub mod network;
pub mod output;
pub mod readiness;
pub mod scheduler;
pub mod timeouts;

pub use config::{CaptureConfig, Config, CropRect, Encoding, ImageFormat};
pub use error::CaptureError;

pub type Result<T> = std::result::Result<T, CaptureError>;
