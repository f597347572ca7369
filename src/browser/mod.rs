//! Headless Chromium sessions.
//!
//! A crawl run acquires exactly one page through [`BrowserLauncher::launch`]
//! and must hand it back through [`PageDriver::close`], error or not. The
//! orchestrator is written against these traits so the same page loop runs
//! against a real browser and against static fixtures.

pub mod navigator;

use crate::config::BrowserSettings;
use crate::error::CrawlError;
use async_trait::async_trait;
use chromiumoxide::handler::Handler;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ── Page handle ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait PageDriver: Send {
    /// Load `url` and wait for it to settle, failing after `timeout`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), CrawlError>;

    /// Serialized DOM of the current document.
    async fn content(&mut self) -> Result<String, CrawlError>;

    async fn current_url(&mut self) -> Result<String, CrawlError>;

    /// Click the first element matching `selector`; errors when none does.
    async fn click(&mut self, selector: &str) -> Result<(), CrawlError>;

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<(), CrawlError>;

    /// Run a script in the page and return its JSON-serializable result.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, CrawlError>;

    /// Best effort: wait for a navigation started by a click to finish.
    async fn wait_for_navigation(&mut self, timeout: Duration);

    /// Release the page and its browser. Safe to call more than once.
    async fn close(&mut self);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, CrawlError>;
}

// ── Chromium ──────────────────────────────────────────────────────────────────

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn find_executable(&self) -> Option<PathBuf> {
        if let Some(path) = &self.settings.executable {
            return Some(path.clone());
        }
        CHROME_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf)
    }

    async fn launch_local(&self) -> Result<(Browser, JoinHandle<()>), CrawlError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .request_timeout(Duration::from_secs(self.settings.timeout_secs));

        if let Some(path) = self.find_executable() {
            info!("Using Chrome at {:?}", path);
            builder = builder.chrome_executable(path);
        }
        if !self.settings.headless {
            builder = builder.with_head();
        }
        for arg in &self.settings.args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| CrawlError::Launch(format!("browser config: {}", e)))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| CrawlError::Launch(e.to_string()))?;

        Ok((browser, spawn_handler(handler)))
    }

    /// Attach to a Chrome started elsewhere (`--remote-debugging-port`).
    async fn connect_remote(&self, url: &str) -> Result<(Browser, JoinHandle<()>), CrawlError> {
        let http_url = url.replace("ws://", "http://").replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));
        info!("Connecting to remote browser via {}", version_url);

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .send()
            .await
            .map_err(|e| CrawlError::Launch(format!("remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| CrawlError::Launch(format!("bad /json/version response: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CrawlError::Launch("no webSocketDebuggerUrl in response".into()))?;

        let (browser, handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| CrawlError::Launch(e.to_string()))?;

        Ok((browser, spawn_handler(handler)))
    }
}

fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, CrawlError> {
        let remote = self.settings.remote_url.clone();
        let (browser, handler) = match &remote {
            Some(url) => self.connect_remote(url).await?,
            None => {
                info!("Launching headless browser (headless={})", self.settings.headless);
                self.launch_local().await?
            }
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut half_open = ChromePage {
                    browser: Some(browser),
                    page: None,
                    handler,
                    owns_browser: remote.is_none(),
                };
                half_open.close().await;
                return Err(CrawlError::Launch(format!("could not open a tab: {}", e)));
            }
        };

        Ok(Box::new(ChromePage {
            browser: Some(browser),
            page: Some(page),
            handler,
            owns_browser: remote.is_none(),
        }))
    }
}

pub struct ChromePage {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
    /// False when attached to a remote browser we must leave running.
    owns_browser: bool,
}

impl ChromePage {
    fn page(&self) -> Result<&Page, CrawlError> {
        self.page
            .as_ref()
            .ok_or_else(|| CrawlError::Browser("page already closed".into()))
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), CrawlError> {
        let page = self.page()?;
        debug!("Navigating to {}", url);

        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| CrawlError::navigation(url, format!("timed out after {:?}", timeout)))?
            .map_err(|e| CrawlError::navigation(url, e))?;

        if tokio::time::timeout(timeout, page.wait_for_navigation()).await.is_err() {
            return Err(CrawlError::navigation(url, "page never settled"));
        }
        Ok(())
    }

    async fn content(&mut self) -> Result<String, CrawlError> {
        self.page()?
            .content()
            .await
            .map_err(|e| CrawlError::Browser(format!("content: {}", e)))
    }

    async fn current_url(&mut self) -> Result<String, CrawlError> {
        let url = self
            .page()?
            .url()
            .await
            .map_err(|e| CrawlError::Browser(format!("url: {}", e)))?;
        Ok(url.unwrap_or_default())
    }

    async fn click(&mut self, selector: &str) -> Result<(), CrawlError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|e| CrawlError::Browser(format!("find {}: {}", selector, e)))?;
        element
            .click()
            .await
            .map_err(|e| CrawlError::Browser(format!("click {}: {}", selector, e)))?;
        Ok(())
    }

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<(), CrawlError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|e| CrawlError::Browser(format!("find {}: {}", selector, e)))?;
        element
            .focus()
            .await
            .map_err(|e| CrawlError::Browser(format!("focus {}: {}", selector, e)))?;
        element
            .press_key(key)
            .await
            .map_err(|e| CrawlError::Browser(format!("press {} on {}: {}", key, selector, e)))?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, CrawlError> {
        let result = self
            .page()?
            .evaluate(script.to_string())
            .await
            .map_err(|e| CrawlError::Browser(format!("evaluate: {}", e)))?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn wait_for_navigation(&mut self, timeout: Duration) {
        let Ok(page) = self.page() else { return };
        match tokio::time::timeout(timeout, page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("wait_for_navigation: {}", e),
            Err(_) => debug!("No navigation finished within {:?}", timeout),
        }
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Page close error: {}", e);
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if self.owns_browser {
                if let Err(e) = browser.close().await {
                    warn!("Browser close error: {}", e);
                }
                if let Err(e) = browser.wait().await {
                    debug!("Browser wait error: {}", e);
                }
            }
        }
        self.handler.abort();
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if self.page.is_some() {
            debug!("ChromePage dropped without close()");
        }
        self.handler.abort();
    }
}
