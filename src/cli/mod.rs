use crate::{
    CaptureConfig, ImageFormat, Result,
    chrome::{self, PageDriver},
    config::{CaptureTarget, Config, ConfigOverrides},
    hooks, output,
    scheduler::Scheduler,
    timeouts::secs,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "url-to-image")]
#[command(version, about = "Capture a web page as an image once its content has loaded")]
#[command(
    long_about = "Captures a still image of a web page. Instead of sleeping for a fixed time, \
                  the capture waits until network activity has been quiet for the request \
                  timeout, bounded by the maximum timeout."
)]
pub struct Cli {
    #[arg(help = "URL to capture")]
    pub url: String,

    #[arg(help = "Output image path")]
    pub output: PathBuf,

    #[arg(help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(help = "Viewport height")]
    pub height: Option<u32>,

    #[arg(help = "Quiet period in ms after the last request before capturing")]
    pub request_timeout: Option<u64>,

    #[arg(help = "Maximum wait in ms after the first successful response")]
    pub max_timeout: Option<u64>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Image format (png, jpeg, webp)")]
    pub format: Option<ImageFormat>,

    #[arg(
        long,
        value_parser = clap::value_parser!(u8).range(1..=100),
        help = "JPEG/WebP quality (1-100)"
    )]
    pub quality: Option<u8>,

    #[arg(long, help = "Crop width")]
    pub crop_width: Option<u32>,

    #[arg(long, help = "Crop height")]
    pub crop_height: Option<u32>,

    #[arg(long, help = "Crop offset from the left edge")]
    pub crop_left: Option<u32>,

    #[arg(long, help = "Crop offset from the top edge")]
    pub crop_top: Option<u32>,

    #[arg(long, help = "Prefix log lines with elapsed time")]
    pub timestamps: bool,

    #[arg(long, env = "URL_TO_IMAGE_SCRIPT", help = "Site script (TOML) with init/complete/ready hooks")]
    pub script: Option<PathBuf>,

    #[arg(long, help = "Ignore any configured site script")]
    pub no_script: bool,

    #[arg(long, help = "Print the capture report as JSON")]
    pub json: bool,

    #[arg(long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Path to Chrome executable")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, help = "Run Chrome in headless mode")]
    pub headless: Option<bool>,

    #[arg(long, help = "Chrome debugging port")]
    pub port: Option<u16>,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            headless: self.headless,
            port: self.port,
            chrome_path: self.chrome_path.clone(),
            debounce_ms: self.request_timeout,
            max_timeout_ms: self.max_timeout,
            format: self.format,
            quality: self.quality,
        }
    }

    pub fn target(&self) -> CaptureTarget {
        CaptureTarget {
            url: self.url.clone(),
            output: self.output.clone(),
            width: self.width,
            height: self.height,
            crop_width: self.crop_width,
            crop_height: self.crop_height,
            crop_left: self.crop_left,
            crop_top: self.crop_top,
            script: if self.no_script {
                None
            } else {
                self.script.clone()
            },
        }
    }

    pub fn load_config(&self) -> Result<Config> {
        let config = if let Some(config_path) = &self.config {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str(&content)?
        } else {
            Config::load()?
        };

        let mut config = config.load_with_overrides(self.overrides());
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        config.validate()?;
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    let capture = Arc::new(CaptureConfig::new(&config, cli.target())?);
    let hooks = hooks::resolve(capture.script.as_deref())?;

    let navigation_timeout = capture.max_timeout.max(Duration::from_secs(secs::NAVIGATION));
    let (page, events) = chrome::launch(&config.browser, navigation_timeout).await?;
    let page: Arc<dyn PageDriver> = Arc::new(page);
    page.set_viewport(capture.width, capture.height).await?;

    let (result, events) = Scheduler::new(Arc::clone(&capture), page, hooks, events)
        .run()
        .await;
    // No page error may reach us past this point.
    drop(events);

    let report = result?;
    output::print_output(&report, cli.json)
}
