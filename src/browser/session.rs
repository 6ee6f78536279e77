//! Browser session management
//!
//! Acquires and controls a single Chrome/Chromium instance over CDP. The
//! session is either launched locally or attached to a remote debugging
//! endpoint when running inside a container.

use std::path::Path;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::BrowserError;
use crate::cookies::StoredCookie;

/// Check whether the process runs inside a container. A remote browser
/// endpoint is used in that case instead of launching a local process.
pub fn in_container() -> bool {
    Path::new("/.dockerenv").exists()
}

/// Launch flags suppressing automation banners and first-run UI.
/// `navigator.webdriver` is handled by `--disable-blink-features=AutomationControlled`.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--no-default-browser-check",
    "--start-maximized",
];

/// Find a Chrome/Chromium executable on the system
fn find_chrome() -> Option<std::path::PathBuf> {
    let candidates: Vec<std::path::PathBuf> = if cfg!(target_os = "windows") {
        vec![
            std::path::PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            std::path::PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![std::path::PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            std::path::PathBuf::from("/usr/bin/chromium"),
            std::path::PathBuf::from("/usr/bin/chromium-browser"),
            std::path::PathBuf::from("/usr/bin/google-chrome"),
            std::path::PathBuf::from("/usr/bin/google-chrome-stable"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Configuration for a browser session
#[derive(Debug, Clone)]
pub struct BrowserSessionConfig {
    /// Remote CDP endpoint; when set the session attaches instead of launching
    pub remote_url: Option<String>,
    /// Path to Chrome/Chromium executable
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// User-agent override
    pub user_agent: String,
    /// Accept-Language value
    pub accept_language: String,
    /// Navigation timeout in seconds
    pub timeout_secs: u64,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
}

impl Default for BrowserSessionConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            chrome_path: None,
            headless: false,
            user_agent: String::new(),
            accept_language: String::new(),
            timeout_secs: 60,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// A single browser session for automation
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    timeout_secs: u64,
}

impl BrowserSession {
    /// Acquire a browser session with the given config: attach to the remote
    /// endpoint when one is set, otherwise launch a local browser.
    pub async fn new(config: BrowserSessionConfig) -> Result<Self, BrowserError> {
        let (browser, mut handler) = match config.remote_url {
            Some(ref url) => {
                info!("Connecting to remote browser at {}", url);
                let ws_url = Self::resolve_ws_url(url).await?;
                Browser::connect(ws_url)
                    .await
                    .map_err(|e| BrowserError::ConnectFailed(e.to_string()))?
            }
            None => {
                info!("Launching local browser (headless: {})", config.headless);
                let browser_config = Self::build_browser_config(&config)?;
                Browser::launch(browser_config)
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            }
        };

        // Drain CDP events in the background; when the handler ends the
        // browser has disconnected or crashed.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                    break;
                }
            }
            warn!("Browser disconnected (event handler ended)");
        });

        // Take the first existing tab as our page, close any extras
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            };

            for extra_page in pages {
                debug!("Closing extra blank tab");
                let _ = extra_page.close().await;
            }

            main_page
        };

        Self::apply_identity(&page, &config).await?;

        info!("Browser session acquired");
        Ok(Self {
            browser,
            page,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Build the launch configuration for a local browser
    fn build_browser_config(config: &BrowserSessionConfig) -> Result<BrowserConfig, BrowserError> {
        if config.chrome_path.is_none() && find_chrome().is_none() {
            return Err(BrowserError::LaunchFailed(
                "Chrome/Chromium not found; install it or set CHROME_PATH".to_string(),
            ));
        }

        let mut builder = BrowserConfig::builder()
            .window_size(config.window_width, config.window_height);

        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }

        if !config.headless {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            info!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        builder.build().map_err(BrowserError::LaunchFailed)
    }

    /// Resolve the DevTools websocket URL from a remote endpoint. An http
    /// endpoint is queried for its `/json/version` document.
    async fn resolve_ws_url(remote_url: &str) -> Result<String, BrowserError> {
        if remote_url.starts_with("ws") {
            return Ok(remote_url.to_string());
        }

        let endpoint = format!("{}/json/version", remote_url.trim_end_matches('/'));
        let info: serde_json::Value = reqwest::get(&endpoint)
            .await
            .map_err(|e| BrowserError::ConnectFailed(format!("{}: {}", endpoint, e)))?
            .json()
            .await
            .map_err(|e| BrowserError::ConnectFailed(format!("{}: {}", endpoint, e)))?;

        info.get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                BrowserError::ConnectFailed(format!("no webSocketDebuggerUrl at {}", endpoint))
            })
    }

    /// Apply user agent and Accept-Language through CDP so the override works
    /// the same for local and remote sessions.
    async fn apply_identity(page: &Page, config: &BrowserSessionConfig) -> Result<(), BrowserError> {
        if config.user_agent.is_empty() {
            return Ok(());
        }

        let mut builder =
            SetUserAgentOverrideParams::builder().user_agent(config.user_agent.as_str());
        if !config.accept_language.is_empty() {
            builder = builder.accept_language(config.accept_language.as_str());
        }
        let params = builder
            .build()
            .map_err(|e| BrowserError::ConnectionLost(format!("UA override params: {}", e)))?;

        page.execute(params)
            .await
            .map_err(|e| BrowserError::ConnectionLost(format!("Failed to set UA override: {}", e)))?;

        debug!(
            "UA override set ({}..., lang: {})",
            crate::safe_truncate(&config.user_agent, 24),
            config.accept_language
        );
        Ok(())
    }

    /// Navigate to a URL and wait for the load to settle
    pub async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(format!("{}: {}", url, e)))?;

        tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            self.page.wait_for_navigation(),
        )
        .await
        .map_err(|_| BrowserError::Timeout(format!("Navigation to {} timed out", url)))?
        .map_err(|e| BrowserError::NavigationFailed(format!("{}: {}", url, e)))?;

        Ok(())
    }

    /// Probe whether an element matching the selector is present. Absence is
    /// an ordinary `false`, never an error.
    pub async fn probe_selector(&self, selector: &str) -> Result<bool, BrowserError> {
        let literal = serde_json::to_string(selector)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        let script = format!("document.querySelector({}) !== null", literal);

        self.page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?
            .into_value::<bool>()
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))
    }

    /// Type text into the element matching the selector. The element is
    /// required: absence is an error here, unlike [`Self::probe_selector`].
    pub async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(())
    }

    /// Click the element matching the selector
    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(())
    }

    /// Scroll to the bottom of the document
    pub async fn scroll_to_bottom(&self) -> Result<(), BrowserError> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    /// Scroll back to the top of the document
    pub async fn scroll_to_top(&self) -> Result<(), BrowserError> {
        self.page
            .evaluate("window.scrollTo(0, -document.body.scrollHeight)")
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    /// Capture the session cookies in the persisted record format
    pub async fn capture_cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::CookieOperation(e.to_string()))?;

        // Funnel through the CDP wire representation; session cookies report
        // a negative expiry which normalizes to "no expiry".
        let raw = serde_json::to_value(&cookies)
            .map_err(|e| BrowserError::CookieOperation(e.to_string()))?;
        let stored: Vec<StoredCookie> = serde_json::from_value(raw)
            .map_err(|e| BrowserError::CookieOperation(e.to_string()))?;

        Ok(stored.into_iter().map(StoredCookie::normalized).collect())
    }

    /// Inject stored cookies into the session
    pub async fn inject_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
        if cookies.is_empty() {
            return Ok(());
        }

        // Same wire representation both ways: StoredCookie serializes to the
        // CDP CookieParam shape.
        let raw = serde_json::to_value(cookies)
            .map_err(|e| BrowserError::CookieOperation(e.to_string()))?;
        let params: Vec<CookieParam> = serde_json::from_value(raw)
            .map_err(|e| BrowserError::CookieOperation(e.to_string()))?;

        self.page
            .set_cookies(params)
            .await
            .map_err(|e| BrowserError::CookieOperation(e.to_string()))?;

        Ok(())
    }

    /// Close the browser session. Consumes the session so release happens at
    /// most once per run; close failures are logged, not propagated.
    pub async fn close(mut self) {
        let _ = self.page.close().await;

        // Graceful CDP close first, then force kill any locally launched
        // child so no Chrome processes linger.
        let _ = self.browser.close().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = self.browser.kill().await;

        info!("Browser session closed");
    }
}
