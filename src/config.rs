use crate::{CaptureError, Result, timeouts::ms};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub capture: CaptureDefaults,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub disable_web_security: bool,
    pub user_agent: Option<String>,
}

/// Defaults for a capture run, used when the command line leaves them out.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureDefaults {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Timeline position (seconds) to seek animated banners to. `None` seeks to the end.
    pub timeline_position: Option<f64>,
}

fn default_headless() -> bool {
    true
}
fn default_port() -> u16 {
    9222
}
fn default_debounce_ms() -> u64 {
    ms::DEFAULT_DEBOUNCE
}
fn default_max_timeout_ms() -> u64 {
    ms::DEFAULT_MAX_TIMEOUT
}
fn default_quality() -> u8 {
    100
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    800
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: default_headless(),
            port: default_port(),
            user_data_dir: None,
            disable_web_security: false,
            user_agent: None,
        }
    }
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            format: ImageFormat::default(),
            quality: default_quality(),
            width: default_width(),
            height: default_height(),
            timeline_position: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn is_lossy(self) -> bool {
        !matches!(self, ImageFormat::Png)
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Webp => write!(f, "webp"),
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(CaptureError::ConfigError(format!(
                "Unsupported image format: {}. Use png, jpeg, or webp",
                other
            ))),
        }
    }
}

/// Output encoding handed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    pub format: ImageFormat,
    pub quality: u8,
}

impl Encoding {
    /// Conservative encoding tried when the requested one fails.
    pub const FALLBACK: Encoding = Encoding {
        format: ImageFormat::Png,
        quality: 100,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
}

impl CropRect {
    /// A crop only exists when both dimensions are given.
    pub fn from_parts(
        width: Option<u32>,
        height: Option<u32>,
        left: Option<u32>,
        top: Option<u32>,
    ) -> Option<Self> {
        match (width, height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Self {
                width,
                height,
                left: left.unwrap_or(0),
                top: top.unwrap_or(0),
            }),
            _ => None,
        }
    }
}

/// Immutable settings for a single capture run.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub url: String,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub debounce: Duration,
    pub max_timeout: Duration,
    pub encoding: Encoding,
    pub crop: Option<CropRect>,
    pub script: Option<PathBuf>,
    pub timeline_position: Option<f64>,
}

/// Per-run values that only come from the command line.
#[derive(Debug, Clone, Default)]
pub struct CaptureTarget {
    pub url: String,
    pub output: PathBuf,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub crop_width: Option<u32>,
    pub crop_height: Option<u32>,
    pub crop_left: Option<u32>,
    pub crop_top: Option<u32>,
    pub script: Option<PathBuf>,
}

impl CaptureConfig {
    pub fn new(config: &Config, target: CaptureTarget) -> Result<Self> {
        let parsed = url::Url::parse(&target.url)
            .map_err(|e| CaptureError::InvalidUrl(format!("{}: {}", target.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https" | "file" | "data" | "about") {
            return Err(CaptureError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                parsed.scheme(),
                target.url
            )));
        }

        let defaults = &config.capture;
        Ok(Self {
            url: target.url,
            output: target.output,
            width: target.width.unwrap_or(defaults.width),
            height: target.height.unwrap_or(defaults.height),
            debounce: Duration::from_millis(defaults.debounce_ms),
            max_timeout: Duration::from_millis(defaults.max_timeout_ms),
            encoding: Encoding {
                format: defaults.format,
                quality: defaults.quality,
            },
            crop: CropRect::from_parts(
                target.crop_width,
                target.crop_height,
                target.crop_left,
                target.crop_top,
            ),
            script: target.script,
            timeline_position: defaults.timeline_position,
        })
    }

    /// Number of render passes allowed before giving up.
    pub fn max_render_attempts(&self) -> u32 {
        let debounce = self.debounce.as_millis().max(1);
        ((self.max_timeout.as_millis() / debounce) as u32).max(1)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

pub fn default_config_dir() -> Result<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|p| p.join("url-to-image"))
        .ok_or_else(|| CaptureError::ConfigError("Could not determine config directory".into()))
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let global_path = default_config_path()?;
        if global_path.exists() {
            let content = std::fs::read_to_string(&global_path)?;
            config = toml::from_str(&content)?;
        }

        let project_path = PathBuf::from(".url-to-image.toml");
        if project_path.exists() {
            let content = std::fs::read_to_string(&project_path)?;
            let project_config: Config = toml::from_str(&content)?;
            config = config.merge(project_config);
        }

        config.load_from_env();

        Ok(config)
    }

    pub fn load_with_overrides(&self, cli_overrides: ConfigOverrides) -> Self {
        let mut config = self.clone();

        if let Some(headless) = cli_overrides.headless {
            config.browser.headless = headless;
        }
        if let Some(port) = cli_overrides.port {
            config.browser.port = port;
        }
        if let Some(chrome_path) = cli_overrides.chrome_path {
            config.browser.chrome_path = Some(chrome_path);
        }
        if let Some(debounce) = cli_overrides.debounce_ms {
            config.capture.debounce_ms = debounce;
        }
        if let Some(max_timeout) = cli_overrides.max_timeout_ms {
            config.capture.max_timeout_ms = max_timeout;
        }
        if let Some(format) = cli_overrides.format {
            config.capture.format = format;
        }
        if let Some(quality) = cli_overrides.quality {
            config.capture.quality = quality;
        }

        config
    }

    fn merge(mut self, other: Config) -> Self {
        if other.browser.chrome_path.is_some() {
            self.browser.chrome_path = other.browser.chrome_path;
        }
        if other.browser.user_data_dir.is_some() {
            self.browser.user_data_dir = other.browser.user_data_dir;
        }
        if other.browser.user_agent.is_some() {
            self.browser.user_agent = other.browser.user_agent;
        }
        if other.capture.timeline_position.is_some() {
            self.capture.timeline_position = other.capture.timeline_position;
        }
        // Project files only win for values they actually change.
        let defaults = CaptureDefaults::default();
        if other.capture.debounce_ms != defaults.debounce_ms {
            self.capture.debounce_ms = other.capture.debounce_ms;
        }
        if other.capture.max_timeout_ms != defaults.max_timeout_ms {
            self.capture.max_timeout_ms = other.capture.max_timeout_ms;
        }
        if other.capture.format != defaults.format {
            self.capture.format = other.capture.format;
        }
        if other.capture.quality != defaults.quality {
            self.capture.quality = other.capture.quality;
        }
        if other.capture.width != defaults.width {
            self.capture.width = other.capture.width;
        }
        if other.capture.height != defaults.height {
            self.capture.height = other.capture.height;
        }
        self
    }

    fn load_from_env(&mut self) {
        if let Ok(path) = std::env::var("URL_TO_IMAGE_CHROME_PATH") {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Ok(headless) = std::env::var("URL_TO_IMAGE_HEADLESS") {
            self.browser.headless = headless == "true" || headless == "1";
        }
        if let Ok(debounce) = std::env::var("URL_TO_IMAGE_DEBOUNCE_MS")
            && let Ok(debounce) = debounce.parse()
        {
            self.capture.debounce_ms = debounce;
        }
        if let Ok(max_timeout) = std::env::var("URL_TO_IMAGE_MAX_TIMEOUT_MS")
            && let Ok(max_timeout) = max_timeout.parse()
        {
            self.capture.max_timeout_ms = max_timeout;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;

        if capture.debounce_ms == 0 {
            return Err(CaptureError::ConfigError(
                "debounce timeout must be greater than 0".into(),
            ));
        }

        if capture.max_timeout_ms == 0 {
            return Err(CaptureError::ConfigError(
                "maximum timeout must be greater than 0".into(),
            ));
        }

        if capture.debounce_ms > capture.max_timeout_ms {
            return Err(CaptureError::ConfigError(format!(
                "debounce timeout ({}ms) must not exceed maximum timeout ({}ms)",
                capture.debounce_ms, capture.max_timeout_ms
            )));
        }

        if capture.quality < 1 || capture.quality > 100 {
            return Err(CaptureError::ConfigError(
                "quality must be between 1 and 100".into(),
            ));
        }

        if capture.width == 0 || capture.height == 0 {
            return Err(CaptureError::ConfigError(
                "viewport width and height must be greater than 0".into(),
            ));
        }

        if let Some(ref path) = self.browser.chrome_path
            && !path.exists()
        {
            return Err(CaptureError::ConfigError(format!(
                "Chrome path does not exist: {}",
                path.display()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub headless: Option<bool>,
    pub port: Option<u16>,
    pub chrome_path: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    pub max_timeout_ms: Option<u64>,
    pub format: Option<ImageFormat>,
    pub quality: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> CaptureTarget {
        CaptureTarget {
            url: url.into(),
            output: PathBuf::from("out.png"),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.browser.headless);
        assert_eq!(config.capture.debounce_ms, 500);
        assert_eq!(config.capture.max_timeout_ms, 5000);
        assert_eq!(config.capture.quality, 100);
        assert_eq!(config.capture.format, ImageFormat::Png);
    }

    #[test]
    fn test_config_validate_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_timeouts() {
        let mut config = Config::default();
        config.capture.debounce_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.max_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_debounce_exceeds_max() {
        let mut config = Config::default();
        config.capture.debounce_ms = 6000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_invalid_quality() {
        let mut config = Config::default();
        config.capture.quality = 0;
        assert!(config.validate().is_err());

        config.capture.quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_with_overrides() {
        let config = Config::default();
        let overrides = ConfigOverrides {
            headless: Some(false),
            port: Some(9333),
            debounce_ms: Some(300),
            max_timeout_ms: Some(9000),
            format: Some(ImageFormat::Jpeg),
            quality: Some(80),
            ..Default::default()
        };

        let result = config.load_with_overrides(overrides);
        assert!(!result.browser.headless);
        assert_eq!(result.browser.port, 9333);
        assert_eq!(result.capture.debounce_ms, 300);
        assert_eq!(result.capture.max_timeout_ms, 9000);
        assert_eq!(result.capture.format, ImageFormat::Jpeg);
        assert_eq!(result.capture.quality, 80);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.capture.debounce_ms = 800;
        let mut other = Config::default();
        other.browser.chrome_path = Some(PathBuf::from("/usr/bin/chromium"));
        other.capture.quality = 70;

        let merged = base.merge(other);
        assert_eq!(
            merged.browser.chrome_path,
            Some(PathBuf::from("/usr/bin/chromium"))
        );
        assert_eq!(merged.capture.quality, 70);
        assert_eq!(merged.capture.debounce_ms, 800);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[browser]"));
        assert!(toml_str.contains("[capture]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.capture.debounce_ms, config.capture.debounce_ms);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str("[capture]\nformat = \"jpeg\"\n").unwrap();
        assert_eq!(parsed.capture.format, ImageFormat::Jpeg);
        assert_eq!(parsed.capture.quality, 100);
        assert_eq!(parsed.browser.port, 9222);
    }

    #[test]
    fn test_image_format_parse() {
        assert_eq!("png".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert_eq!("JPG".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!("webp".parse::<ImageFormat>().unwrap(), ImageFormat::Webp);
        assert!("gif".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn test_crop_requires_both_dimensions() {
        assert!(CropRect::from_parts(Some(100), None, None, None).is_none());
        assert!(CropRect::from_parts(None, Some(100), Some(5), None).is_none());

        let crop = CropRect::from_parts(Some(300), Some(250), None, Some(20)).unwrap();
        assert_eq!(crop.left, 0);
        assert_eq!(crop.top, 20);
    }

    #[test]
    fn test_capture_config_from_defaults() {
        let capture = CaptureConfig::new(&Config::default(), target("https://example.com")).unwrap();
        assert_eq!(capture.width, 1280);
        assert_eq!(capture.height, 800);
        assert_eq!(capture.debounce, Duration::from_millis(500));
        assert_eq!(capture.encoding.quality, 100);
        assert!(capture.crop.is_none());
        assert_eq!(capture.max_render_attempts(), 10);
    }

    #[test]
    fn test_capture_config_rejects_bad_url() {
        assert!(CaptureConfig::new(&Config::default(), target("not a url")).is_err());
        assert!(CaptureConfig::new(&Config::default(), target("ftp://example.com")).is_err());
    }

    #[test]
    fn test_max_render_attempts_is_at_least_one() {
        let mut config = Config::default();
        config.capture.debounce_ms = 5000;
        config.capture.max_timeout_ms = 5000;
        let capture = CaptureConfig::new(&config, target("https://example.com")).unwrap();
        assert_eq!(capture.max_render_attempts(), 1);
    }
}
