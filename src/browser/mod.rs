//! Shared headless-browser session pool.
//!
//! One Chrome process serves every browser-needing task. Each page
//! gets the current context's fingerprint and the stealth init script
//! before navigation, and is always closed before the fetch returns,
//! success or not. Rotation swaps the context (and its fingerprint)
//! so long-running daemons do not present one identity forever.

pub mod config;
pub mod fingerprint;
pub mod stealth;

pub use config::BrowserPoolConfig;
pub use fingerprint::Fingerprint;

use crate::error::{Result, ScrapeError};

/// Identity of the pool's current browsing context.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    pub id: String,
    pub fingerprint: Fingerprint,
}

impl ContextHandle {
    fn fresh() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint: Fingerprint::random(),
        }
    }
}

#[cfg(feature = "browser")]
mod imp {
    use std::time::Duration;

    use chromiumoxide::cdp::browser_protocol::emulation::{
        SetDeviceMetricsOverrideParams, SetTimezoneOverrideParams,
    };
    use chromiumoxide::cdp::browser_protocol::network::{
        SetBlockedUrLsParams, SetUserAgentOverrideParams,
    };
    use chromiumoxide::cdp::browser_protocol::page::{
        AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
    };
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use super::{ContextHandle, Result, ScrapeError};
    use crate::browser::stealth::{BLOCKED_URL_PATTERNS, STEALTH_INIT_SCRIPT};
    use crate::browser::BrowserPoolConfig;

    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &[&str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    struct PoolInner {
        browser: Browser,
        context: ContextHandle,
    }

    pub struct BrowserSessionPool {
        config: BrowserPoolConfig,
        inner: Mutex<Option<PoolInner>>,
    }

    impl BrowserSessionPool {
        /// Cheap; the browser launches lazily on first use.
        pub fn new(config: BrowserPoolConfig) -> Self {
            Self {
                config,
                inner: Mutex::new(None),
            }
        }

        fn find_chrome() -> Result<std::path::PathBuf> {
            for path in CHROME_PATHS {
                let p = std::path::Path::new(path);
                if p.exists() {
                    debug!("found Chrome at {}", path);
                    return Ok(p.to_path_buf());
                }
            }
            for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
                if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                    if output.status.success() {
                        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                        if !path.is_empty() {
                            debug!("found Chrome in PATH: {}", path);
                            return Ok(std::path::PathBuf::from(path));
                        }
                    }
                }
            }
            Err(ScrapeError::Browser(
                "Chrome/Chromium not found; install chromium or google-chrome".to_string(),
            ))
        }

        async fn launch(&self) -> Result<PoolInner> {
            info!("launching browser (headless={})", self.config.headless);
            let chrome_path = Self::find_chrome()?;

            let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
            if !self.config.headless {
                builder = builder.with_head();
            }
            builder = builder
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-infobars")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-background-networking")
                .arg("--disable-sync")
                .arg("--disable-extensions")
                .arg("--no-sandbox")
                .arg("--disable-gpu");
            for arg in &self.config.chrome_args {
                builder = builder.arg(arg);
            }

            let browser_config = builder
                .build()
                .map_err(|e| ScrapeError::Browser(format!("browser config: {e}")))?;
            let (mut browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| ScrapeError::Browser(format!("launch failed: {e}")))?;

            tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            // Pages open in an incognito context so rotation can throw
            // away cookies and storage along with the fingerprint.
            browser
                .start_incognito_context()
                .await
                .map_err(|e| ScrapeError::Browser(format!("incognito context: {e}")))?;

            let context = ContextHandle::fresh();
            info!(context = %context.id, "browser ready");
            Ok(PoolInner { browser, context })
        }

        /// Launch the browser if it is not already running. Safe to
        /// call from any number of tasks.
        pub async fn initialize(&self) -> Result<()> {
            let mut inner = self.inner.lock().await;
            if inner.is_none() {
                *inner = Some(self.launch().await?);
            }
            Ok(())
        }

        /// Fetch a URL through a fully prepared page and return the
        /// rendered HTML. The page is closed on every exit path.
        pub async fn fetch_page(&self, url: &str) -> Result<String> {
            self.fetch_page_with_selector(url, None).await
        }

        /// Same as [`fetch_page`](Self::fetch_page), with a best-effort
        /// wait for a selector before reading the content. The lock is
        /// only held to open the page, so fetches run concurrently;
        /// rotation alone serializes on the pool state.
        pub async fn fetch_page_with_selector(
            &self,
            url: &str,
            wait_selector: Option<&str>,
        ) -> Result<String> {
            let (page, context) = {
                let mut guard = self.inner.lock().await;
                if guard.is_none() {
                    *guard = Some(self.launch().await?);
                }
                let inner = guard.as_ref().ok_or_else(|| {
                    ScrapeError::Browser("browser unavailable after launch".to_string())
                })?;
                let page = inner
                    .browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| ScrapeError::Browser(format!("new page: {e}")))?;
                (page, inner.context.clone())
            };

            let result = self.render(&page, url, &context, wait_selector).await;
            if let Err(e) = page.close().await {
                debug!("page close after {} failed: {}", url, e);
            }
            result
        }

        async fn render(
            &self,
            page: &Page,
            url: &str,
            context: &ContextHandle,
            wait_selector: Option<&str>,
        ) -> Result<String> {
            let fp = &context.fingerprint;

            let ua = SetUserAgentOverrideParams::builder()
                .user_agent(fp.user_agent.clone())
                .accept_language(fp.locale.clone())
                .build()
                .map_err(|e| ScrapeError::Browser(format!("user agent params: {e}")))?;
            page.execute(ua)
                .await
                .map_err(|e| ScrapeError::Browser(format!("user agent override: {e}")))?;

            page.execute(SetTimezoneOverrideParams::new(fp.timezone.clone()))
                .await
                .map_err(|e| ScrapeError::Browser(format!("timezone override: {e}")))?;

            let (width, height) = fp.viewport;
            page.execute(SetDeviceMetricsOverrideParams::new(
                width as i64,
                height as i64,
                1.0,
                false,
            ))
            .await
            .map_err(|e| ScrapeError::Browser(format!("viewport override: {e}")))?;

            // Stealth must be registered before site scripts run.
            let stealth = AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(STEALTH_INIT_SCRIPT)
                .build()
                .map_err(|e| ScrapeError::Browser(format!("stealth params: {e}")))?;
            page.execute(stealth)
                .await
                .map_err(|e| ScrapeError::Browser(format!("stealth install: {e}")))?;

            let blocked: Vec<String> =
                BLOCKED_URL_PATTERNS.iter().map(|s| s.to_string()).collect();
            page.execute(SetBlockedUrLsParams::new(blocked))
                .await
                .map_err(|e| ScrapeError::Browser(format!("url blocking: {e}")))?;

            let nav = NavigateParams::builder()
                .url(url)
                .build()
                .map_err(|e| ScrapeError::Browser(format!("invalid url {url}: {e}")))?;
            page.execute(nav)
                .await
                .map_err(|e| ScrapeError::Browser(format!("navigate {url}: {e}")))?;

            self.wait_until_ready(page, url).await;
            if let Some(selector) = wait_selector {
                self.wait_for_selector(page, url, selector).await;
            }

            page.content()
                .await
                .map_err(|e| ScrapeError::Browser(format!("content of {url}: {e}")))
        }

        /// Wait for document readiness, then a short settle delay for
        /// late-rendering content. Readiness failures are non-fatal;
        /// the page content is still worth reading.
        async fn wait_until_ready(&self, page: &Page, url: &str) {
            let script = r#"
                new Promise((resolve) => {
                    if (document.readyState === 'complete' || document.readyState === 'interactive') {
                        resolve(document.readyState);
                    } else {
                        document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                        setTimeout(() => resolve('timeout'), 10000);
                    }
                })
            "#;
            let timeout = Duration::from_secs(self.config.timeout_secs);
            match tokio::time::timeout(timeout, page.evaluate(script.to_string())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("readiness check failed for {}: {}", url, e),
                Err(_) => warn!("timed out waiting for {} to become ready", url),
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        /// Poll for a selector the caller expects the content to hang
        /// off of. Absence is logged, not fatal; whatever did render is
        /// still returned to the extractor.
        async fn wait_for_selector(&self, page: &Page, url: &str, selector: &str) {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            loop {
                if page.find_element(selector).await.is_ok() {
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!("selector {:?} never appeared on {}", selector, url);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        /// Swap to a fresh context with a new fingerprint. The old
        /// incognito context is disposed browser-side, so cookies and
        /// storage accumulated under the old identity go with it.
        pub async fn rotate_context(&self) -> Result<()> {
            let mut guard = self.inner.lock().await;
            if let Some(inner) = guard.as_mut() {
                let fresh = ContextHandle::fresh();
                info!(old = %inner.context.id, new = %fresh.id, "rotating browser context");
                inner
                    .browser
                    .quit_incognito_context()
                    .await
                    .map_err(|e| ScrapeError::Browser(format!("context dispose: {e}")))?;
                inner
                    .browser
                    .start_incognito_context()
                    .await
                    .map_err(|e| ScrapeError::Browser(format!("context create: {e}")))?;
                inner.context = fresh;
            }
            Ok(())
        }

        /// Current context id, for logging and tests.
        pub async fn context_id(&self) -> Option<String> {
            self.inner.lock().await.as_ref().map(|i| i.context.id.clone())
        }

        /// Close the browser. Idempotent; a later fetch relaunches.
        pub async fn shutdown(&self) {
            let mut guard = self.inner.lock().await;
            if let Some(mut inner) = guard.take() {
                info!("shutting down browser");
                if let Err(e) = inner.browser.close().await {
                    warn!("browser close failed: {}", e);
                }
            }
        }
    }
}

#[cfg(not(feature = "browser"))]
mod imp {
    use super::{Result, ScrapeError};
    use crate::browser::BrowserPoolConfig;

    /// Stub used when browser support is not compiled in. Sources that
    /// need rendering fail with a clear message instead of at link time.
    pub struct BrowserSessionPool;

    impl BrowserSessionPool {
        pub fn new(_config: BrowserPoolConfig) -> Self {
            Self
        }

        pub async fn initialize(&self) -> Result<()> {
            Err(Self::unavailable())
        }

        pub async fn fetch_page(&self, _url: &str) -> Result<String> {
            Err(Self::unavailable())
        }

        pub async fn fetch_page_with_selector(
            &self,
            _url: &str,
            _wait_selector: Option<&str>,
        ) -> Result<String> {
            Err(Self::unavailable())
        }

        pub async fn rotate_context(&self) -> Result<()> {
            Ok(())
        }

        pub async fn context_id(&self) -> Option<String> {
            None
        }

        pub async fn shutdown(&self) {}

        fn unavailable() -> ScrapeError {
            ScrapeError::Browser(
                "browser support not compiled; rebuild with --features browser".to_string(),
            )
        }
    }
}

pub use imp::BrowserSessionPool;
