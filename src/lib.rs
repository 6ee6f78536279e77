//! Session Guardian
//!
//! A single-run watchdog that keeps an FL.ru browser session alive: it
//! restores persisted cookies, logs in again when the session has expired,
//! and relays a Telegram alert when unread notifications are present.

pub mod browser;
pub mod cookies;
pub mod guardian;
pub mod notify;

use std::path::PathBuf;

/// Default user agent, matching a desktop Chrome build.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default remote CDP debugging endpoint (used when running in a container).
const DEFAULT_BROWSER_URL: &str = "http://localhost:9222";

/// Default path for the persisted cookie file.
const DEFAULT_COOKIE_PATH: &str = "/tmp/cookies.json";

/// Default Accept-Language value.
const DEFAULT_LOCALE: &str = "ru,ru_RU";

/// Guardian configuration, resolved once at startup from environment
/// variables and passed explicitly to the run — no ambient global state.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Remote CDP debugging endpoint, used instead of launching a local
    /// browser when running inside a container.
    pub remote_url: String,
    /// Run the local browser in headless mode.
    pub headless: bool,
    /// User-agent override applied to the session.
    pub user_agent: String,
    /// Accept-Language value applied to the session.
    pub locale: String,
    /// Explicit Chrome/Chromium executable path (auto-detected when absent).
    pub chrome_path: Option<String>,
    /// Path of the persisted cookie file.
    pub cookie_path: PathBuf,
    /// Account username (required, non-empty).
    pub username: String,
    /// Account password (required, non-empty).
    pub password: String,
    /// Telegram bot token.
    pub bot_token: String,
    /// Telegram chat identifier for alerts.
    pub chat_id: String,
    /// Keep the expiry attribute on loaded cookies instead of stripping it.
    pub keep_cookie_expiry: bool,
}

impl GuardConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through a lookup function. Tests use this with a
    /// plain map so they never mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            remote_url: lookup("BROWSER_URL").unwrap_or_else(|| DEFAULT_BROWSER_URL.to_string()),
            headless: lookup("HEADLESS").is_some(),
            user_agent: lookup("USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            locale: lookup("LOCALE").unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            chrome_path: lookup("CHROME_PATH"),
            cookie_path: lookup("COOKIE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIE_PATH)),
            username: lookup("ACC_USER").unwrap_or_default(),
            password: lookup("ACC_PASS").unwrap_or_default(),
            bot_token: lookup("BOT_TOKEN").unwrap_or_default(),
            chat_id: lookup("CHAT_ID").unwrap_or_default(),
            keep_cookie_expiry: lookup("KEEP_COOKIE_EXPIRY").is_some(),
        }
    }

    /// Whether both credentials are present and non-empty.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Truncate a string to at most `max_chars` characters, respecting char
/// boundaries (byte slicing panics inside a multibyte character).
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("session-guardian").join("logs"))
}

/// Initialize logging: console layer plus a daily-rolling file layer.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "session-guardian.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
