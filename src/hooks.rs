//! Optional site-specific behaviour.
//!
//! A site script is a TOML file with up to three JavaScript snippets:
//!
//! ```toml
//! init = "window.__captureStarted = Date.now()"
//! complete = "document.querySelector('.cookie-banner')?.remove()"
//! ready = "document.querySelectorAll('.chart svg').length > 0"
//! ```
//!
//! Every key is optional. A present `ready` replaces the default
//! `document.readyState` check entirely.

use crate::{CaptureError, Result, chrome::PageDriver, js_templates};
use serde::Deserialize;
use std::path::Path;

#[async_trait::async_trait]
pub trait SiteHooks: Send + Sync {
    /// Runs once, before navigation and before any timer is started.
    async fn init(&self, _page: &dyn PageDriver) -> Result<()> {
        Ok(())
    }

    /// Runs after the page reports a successful load.
    async fn complete(&self, _page: &dyn PageDriver) -> Result<()> {
        Ok(())
    }

    /// Replacement readiness predicate, if this site has one.
    fn readiness_override(&self) -> Option<&str> {
        None
    }

    /// Evaluates the active readiness predicate.
    async fn is_ready(&self, page: &dyn PageDriver) -> Result<bool> {
        let predicate = self
            .readiness_override()
            .unwrap_or(js_templates::DOCUMENT_COMPLETE);
        page.evaluate_bool(predicate).await
    }
}

/// No site script: default readiness check, no lifecycle hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SiteHooks for NoHooks {}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SiteScript {
    pub init: Option<String>,
    pub complete: Option<String>,
    pub ready: Option<String>,
}

impl SiteScript {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::ScriptError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| CaptureError::ScriptError(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let script: SiteScript = toml::from_str(content)?;
        Ok(script.normalized())
    }

    /// Blank snippets count as absent.
    fn normalized(self) -> Self {
        let keep = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        Self {
            init: keep(self.init),
            complete: keep(self.complete),
            ready: keep(self.ready),
        }
    }
}

#[async_trait::async_trait]
impl SiteHooks for SiteScript {
    async fn init(&self, page: &dyn PageDriver) -> Result<()> {
        // Registered rather than executed: navigation would discard it otherwise.
        if let Some(ref script) = self.init {
            tracing::debug!("MODULE: Registering init callback function");
            page.add_init_script(script).await?;
        }
        Ok(())
    }

    async fn complete(&self, page: &dyn PageDriver) -> Result<()> {
        if let Some(ref script) = self.complete {
            tracing::debug!("MODULE: Executing complete callback function");
            page.execute(script).await?;
        }
        Ok(())
    }

    fn readiness_override(&self) -> Option<&str> {
        self.ready.as_deref()
    }
}

/// Resolves the hooks for a run once, at startup.
pub fn resolve(script: Option<&Path>) -> Result<Box<dyn SiteHooks>> {
    match script {
        Some(path) => {
            let script = SiteScript::load(path)?;
            tracing::debug!(
                "Loaded site script {} (init: {}, complete: {}, ready: {})",
                path.display(),
                script.init.is_some(),
                script.complete.is_some(),
                script.ready.is_some()
            );
            Ok(Box::new(script))
        }
        None => Ok(Box::new(NoHooks)),
    }
}
