use super::{LoadStatus, PageDriver, PageEvent, RenderedImage, events};
use crate::{
    CaptureError, CropRect, Encoding, ImageFormat, Result,
    config::BrowserConfig,
    timeouts::{ms, secs},
};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
    NavigateParams, Viewport,
};
use chromiumoxide::{Browser, BrowserConfig as CdpBrowserConfig, Page};
use futures::StreamExt;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// A single Chrome tab owned for the lifetime of one capture.
pub struct ChromePage {
    page: Page,
    browser: tokio::sync::Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    clip: Mutex<Option<CropRect>>,
    events: UnboundedSender<PageEvent>,
    navigation_timeout: Duration,
}

/// Launches Chrome, opens a blank tab and wires its events to the returned receiver.
pub async fn launch(
    config: &BrowserConfig,
    navigation_timeout: Duration,
) -> Result<(ChromePage, UnboundedReceiver<PageEvent>)> {
    let chrome_path = match config.chrome_path.clone() {
        Some(path) => path,
        None => super::find_chrome_executable()?,
    };

    let mut builder = CdpBrowserConfig::builder()
        .chrome_executable(&chrome_path)
        .port(config.port)
        .request_timeout(Duration::from_secs(secs::REQUEST));

    if !config.headless {
        builder = builder.with_head();
    }

    if let Some(ref dir) = config.user_data_dir {
        builder = builder.user_data_dir(dir);
    }

    if config.disable_web_security {
        builder = builder.arg("--disable-web-security");
    }

    let cdp_config = builder.build().map_err(CaptureError::LaunchFailed)?;

    tracing::debug!("Launching {}", chrome_path.display());
    let (browser, mut handler) = Browser::launch(cdp_config)
        .await
        .map_err(|e| CaptureError::LaunchFailed(e.to_string()))?;

    let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| CaptureError::LaunchFailed(format!("Failed to open page: {}", e)))?;

    if let Some(ref user_agent) = config.user_agent {
        let params = SetUserAgentOverrideParams::builder()
            .user_agent(user_agent.clone())
            .build()
            .map_err(CaptureError::General)?;
        page.execute(params)
            .await
            .map_err(|e| CaptureError::Connection(format!("Failed to set user agent: {}", e)))?;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    events::attach(&page, tx.clone()).await?;

    Ok((
        ChromePage {
            page,
            browser: tokio::sync::Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler_task)),
            clip: Mutex::new(None),
            events: tx,
            navigation_timeout,
        },
        rx,
    ))
}

fn screenshot_params(encoding: &Encoding, clip: Option<CropRect>) -> CaptureScreenshotParams {
    let format = match encoding.format {
        ImageFormat::Png => CaptureScreenshotFormat::Png,
        ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        ImageFormat::Webp => CaptureScreenshotFormat::Webp,
    };

    let mut params = CaptureScreenshotParams::builder().format(format).build();

    if encoding.format.is_lossy() {
        params.quality = Some(encoding.quality as i64);
    }

    if let Some(crop) = clip {
        params.clip = Some(Viewport {
            x: crop.left as f64,
            y: crop.top as f64,
            width: crop.width as f64,
            height: crop.height as f64,
            scale: 1.0,
        });
        params.capture_beyond_viewport = Some(true);
    }

    params
}

#[async_trait::async_trait]
impl PageDriver for ChromePage {
    async fn open(&self, url: &str) -> Result<()> {
        let _ = self.events.send(PageEvent::LoadStarted);

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| CaptureError::General(format!("Failed to build navigate params: {}", e)))?;

        let failure = match tokio::time::timeout(self.navigation_timeout, self.page.execute(params))
            .await
        {
            Ok(Ok(response)) => response.error_text.clone(),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "navigation timed out after {}ms",
                self.navigation_timeout.as_millis()
            )),
        };

        if let Some(reason) = failure {
            let _ = self
                .events
                .send(PageEvent::LoadFinished(LoadStatus::Failure(reason)));
        }

        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| CaptureError::General(format!("Failed to build metrics params: {}", e)))?;

        self.page
            .execute(params)
            .await
            .map_err(|e| CaptureError::Connection(format!("Failed to set viewport: {}", e)))?;
        Ok(())
    }

    async fn set_clip(&self, crop: Option<CropRect>) -> Result<()> {
        if let Ok(mut clip) = self.clip.lock() {
            *clip = crop;
        }
        Ok(())
    }

    async fn evaluate_bool(&self, expression: &str) -> Result<bool> {
        let result = tokio::time::timeout(
            Duration::from_millis(ms::EVALUATE),
            self.page.evaluate(expression),
        )
        .await
        .map_err(|_| CaptureError::EvaluationError("evaluation timed out".into()))?
        .map_err(|e| CaptureError::EvaluationError(e.to_string()))?;

        result
            .into_value::<bool>()
            .map_err(|e| CaptureError::EvaluationError(format!("expected a boolean: {}", e)))
    }

    async fn execute(&self, script: &str) -> Result<()> {
        tokio::time::timeout(
            Duration::from_millis(ms::EVALUATE),
            self.page.evaluate(script),
        )
        .await
        .map_err(|_| CaptureError::EvaluationError("script timed out".into()))?
        .map_err(|e| CaptureError::EvaluationError(e.to_string()))?;
        Ok(())
    }

    async fn add_init_script(&self, script: &str) -> Result<()> {
        let params = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(script)
            .build()
            .map_err(CaptureError::ScriptError)?;

        self.page
            .execute(params)
            .await
            .map_err(|e| CaptureError::ScriptError(format!("Failed to register init script: {}", e)))?;
        Ok(())
    }

    async fn render(&self, path: &Path, encoding: &Encoding) -> Result<RenderedImage> {
        let clip = self.clip.lock().ok().and_then(|clip| *clip);
        let data = self
            .page
            .screenshot(screenshot_params(encoding, clip))
            .await
            .map_err(|e| CaptureError::RenderFailed(e.to_string()))?;

        let image = image::load_from_memory(&data)
            .map_err(|e| CaptureError::RenderFailed(format!("Failed to decode image: {}", e)))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &data)?;

        Ok(RenderedImage {
            width: image.width(),
            height: image.height(),
            file_size_bytes: data.len() as u64,
        })
    }

    async fn close(&self) -> Result<()> {
        let close_timeout = Duration::from_secs(secs::CLOSE);

        if let Err(e) = self.page.clone().close().await {
            tracing::debug!("Failed to close page: {}", e);
        }

        if let Some(mut browser) = self.browser.lock().await.take() {
            match tokio::time::timeout(close_timeout, browser.close()).await {
                Ok(Ok(_)) => {
                    let _ = tokio::time::timeout(close_timeout, browser.wait()).await;
                }
                Ok(Err(e)) => tracing::debug!("Failed to close browser: {}", e),
                Err(_) => tracing::debug!("Timed out closing browser"),
            }
        }

        if let Some(handler) = self.handler.lock().ok().and_then(|mut h| h.take()) {
            handler.abort();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_params_skip_quality() {
        let params = screenshot_params(&Encoding::FALLBACK, None);
        assert!(params.quality.is_none());
        assert!(params.clip.is_none());
    }

    #[test]
    fn test_lossy_params_carry_quality_and_clip() {
        let encoding = Encoding {
            format: ImageFormat::Jpeg,
            quality: 75,
        };
        let crop = CropRect {
            width: 300,
            height: 200,
            left: 10,
            top: 20,
        };
        let params = screenshot_params(&encoding, Some(crop));
        assert_eq!(params.quality, Some(75));
        let clip = params.clip.unwrap();
        assert_eq!(clip.x, 10.0);
        assert_eq!(clip.y, 20.0);
        assert_eq!(clip.width, 300.0);
        assert_eq!(params.capture_beyond_viewport, Some(true));
    }
}
