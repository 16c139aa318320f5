use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unable to load url {url}: {reason}")]
    LoadFailed { url: String, reason: String },

    #[error("Render timed out after {attempts} attempt(s)")]
    RenderTimeout { attempts: u32 },

    #[error("Render failed: {0}")]
    RenderFailed(String),

    #[error("JavaScript evaluation failed: {0}")]
    EvaluationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Site script error: {0}")]
    ScriptError(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("General error: {0}")]
    General(String),
}

impl CaptureError {
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::LaunchFailed(_) => vec![
                "Ensure Chrome/Chromium is installed".into(),
                "Check if another Chrome instance is using the debugging port".into(),
                "Try specifying Chrome path with --chrome-path".into(),
            ],
            Self::LoadFailed { url, .. } => vec![
                format!("Verify '{}' is reachable from this machine", url),
                "Check network connectivity and proxy settings".into(),
            ],
            Self::RenderTimeout { .. } => vec![
                "Increase the maximum timeout".into(),
                "Ensure the output directory exists and is writable".into(),
                "Try a different output format with --format".into(),
            ],
            Self::RenderFailed(_) => vec![
                "Ensure output directory exists and is writable".into(),
                "Try a different output format with --format".into(),
            ],
            Self::ConfigError(_) | Self::TomlDeError(_) => vec![
                "Check configuration file syntax".into(),
                "Run with --verbose to see detailed error".into(),
                "Use --config to specify a different config file".into(),
            ],
            Self::InvalidUrl(_) => vec![
                "Ensure URL includes protocol (http:// or https://)".into(),
                "Check for typos in the URL".into(),
            ],
            Self::ScriptError(_) => vec![
                "Check the site script path and TOML syntax".into(),
                "Use --no-script to capture without a site script".into(),
            ],
            _ => vec![
                "Run with --verbose for more details".into(),
                "Check the documentation for help".into(),
            ],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LoadFailed { .. } => 10,
            Self::RenderTimeout { .. } => 1,
            Self::ConfigError(_)
            | Self::TomlDeError(_)
            | Self::InvalidUrl(_)
            | Self::ScriptError(_) => 2,
            Self::LaunchFailed(_) | Self::Connection(_) => 3,
            _ => 1,
        }
    }
}
