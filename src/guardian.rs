//! Run orchestration
//!
//! The linear Session Guardian sequence: acquire a browser session, restore
//! the logged-in state (re-submitting credentials when cookies no longer
//! authenticate), check for the notification badge, and alert Telegram when
//! one is present. The session is released on every exit path.

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::browser::{in_container, BrowserError, BrowserSession, BrowserSessionConfig};
use crate::cookies::{prepare_for_injection, CookieError, CookieJar, StoredCookie};
use crate::notify::{Notifier, NotifyError};
use crate::GuardConfig;

const LOGIN_URL: &str = "https://www.fl.ru/login/";
const PROJECTS_URL: &str = "https://www.fl.ru/projects/";
const ALERT_TEXT: &str = "You have new notifications";

/// Settling delay after the login check, before scrolling
const POST_LOGIN_SETTLE: Duration = Duration::from_secs(2);
/// Settling delay before locating the login form fields
const FORM_RENDER_DELAY: Duration = Duration::from_secs(3);
/// Settling delay after submitting credentials, before capturing cookies
const POST_SUBMIT_DELAY: Duration = Duration::from_secs(3);

/// Telegram request timeout in seconds
const NOTIFY_TIMEOUT_SECS: u64 = 30;

/// FL.ru page selectors
mod selectors {
    /// Present only when the session is authenticated
    pub const AUTH_MARKER: &str = ".b-dropdown-opener-picture";
    pub const LOGIN_INPUT: &str = "input[name=login]";
    pub const PASSWORD_INPUT: &str = "input[name=passwd]";
    pub const SUBMIT_BUTTON: &str = "button[name=singin]";
    /// Unread notification counter badge
    pub const NOTIFICATION_BADGE: &str = ".b-user-menu-clause-quantity";
}

/// Errors that abort the run
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Missing account creds")]
    MissingCredentials,

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Cookies(#[from] CookieError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// How the logged-in state was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Restored cookies already authenticate the session
    AlreadyAuthenticated,
    /// Credentials were submitted and fresh cookies persisted
    SubmittedCredentials,
}

/// Browser operations the run sequence drives. The concrete session speaks
/// CDP; tests script the page instead.
trait SessionDriver {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;
    async fn probe_selector(&self, selector: &str) -> Result<bool, BrowserError>;
    async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError>;
    async fn click(&self, selector: &str) -> Result<(), BrowserError>;
    async fn scroll_to_bottom(&self) -> Result<(), BrowserError>;
    async fn scroll_to_top(&self) -> Result<(), BrowserError>;
    async fn capture_cookies(&self) -> Result<Vec<StoredCookie>, BrowserError>;
    async fn inject_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError>;
}

impl SessionDriver for BrowserSession {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        BrowserSession::goto(self, url).await
    }
    async fn probe_selector(&self, selector: &str) -> Result<bool, BrowserError> {
        BrowserSession::probe_selector(self, selector).await
    }
    async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        BrowserSession::type_into(self, selector, text).await
    }
    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        BrowserSession::click(self, selector).await
    }
    async fn scroll_to_bottom(&self) -> Result<(), BrowserError> {
        BrowserSession::scroll_to_bottom(self).await
    }
    async fn scroll_to_top(&self) -> Result<(), BrowserError> {
        BrowserSession::scroll_to_top(self).await
    }
    async fn capture_cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
        BrowserSession::capture_cookies(self).await
    }
    async fn inject_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
        BrowserSession::inject_cookies(self, cookies).await
    }
}

/// Outbound alert delivery
trait Alerter {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Constructs the Telegram client only when an alert actually has to go
/// out; runs without notifications never touch the bot configuration.
struct TelegramAlerter<'a> {
    bot_token: &'a str,
    chat_id: &'a str,
}

impl Alerter for TelegramAlerter<'_> {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let notifier = Notifier::new(self.bot_token, NOTIFY_TIMEOUT_SECS)?;
        notifier.send_message(self.chat_id, text).await
    }
}

/// Execute one guardian run end to end. The browser session is released
/// exactly once, whether the sequence succeeds or aborts mid-way.
pub async fn run(config: &GuardConfig) -> Result<(), GuardError> {
    // Checked before any session acquisition or navigation
    if !config.has_credentials() {
        return Err(GuardError::MissingCredentials);
    }

    let session = BrowserSession::new(session_config(config, in_container())).await?;
    let outcome = run_inner(&session, config).await;
    session.close().await;
    outcome
}

/// Map guardian configuration onto a browser session configuration. A remote
/// endpoint is used when running in a container.
fn session_config(config: &GuardConfig, remote: bool) -> BrowserSessionConfig {
    BrowserSessionConfig {
        remote_url: remote.then(|| config.remote_url.clone()),
        chrome_path: config.chrome_path.clone(),
        headless: config.headless,
        user_agent: config.user_agent.clone(),
        accept_language: config.locale.clone(),
        ..Default::default()
    }
}

async fn run_inner(session: &BrowserSession, config: &GuardConfig) -> Result<(), GuardError> {
    let jar = CookieJar::new(&config.cookie_path);

    let outcome = ensure_logged_in(session, config, &jar).await?;
    info!("Login check complete: {:?}", outcome);

    tokio::time::sleep(POST_LOGIN_SETTLE).await;

    let alerter = TelegramAlerter {
        bot_token: &config.bot_token,
        chat_id: &config.chat_id,
    };
    check_notifications(session, &alerter).await?;

    Ok(())
}

/// Restore or establish the logged-in state.
///
/// Stored cookies are injected on the login page and the page is reloaded —
/// cookies only take effect once attached to a matching domain context. The
/// marker element then decides: present means authenticated, absent falls
/// through to a credential submission followed by persisting the fresh
/// session cookies.
async fn ensure_logged_in<S: SessionDriver>(
    session: &S,
    config: &GuardConfig,
    jar: &CookieJar,
) -> Result<LoginOutcome, GuardError> {
    session.goto(LOGIN_URL).await?;

    if let Some(cookies) = jar.load()? {
        let prepared = prepare_for_injection(cookies, config.keep_cookie_expiry);
        session.inject_cookies(&prepared).await?;
    }

    session.goto(LOGIN_URL).await?;

    if session.probe_selector(selectors::AUTH_MARKER).await? {
        session.goto(PROJECTS_URL).await?;
        return Ok(LoginOutcome::AlreadyAuthenticated);
    }

    tokio::time::sleep(FORM_RENDER_DELAY).await;

    session.type_into(selectors::LOGIN_INPUT, &config.username).await?;
    session.type_into(selectors::PASSWORD_INPUT, &config.password).await?;
    session.click(selectors::SUBMIT_BUTTON).await?;

    tokio::time::sleep(POST_SUBMIT_DELAY).await;

    let cookies = session.capture_cookies().await?;
    jar.save(&cookies)?;

    Ok(LoginOutcome::SubmittedCredentials)
}

/// Scroll the page so lazy-loaded badges render, then probe for the
/// notification counter. An absent badge is the expected negative case: a
/// log line only, no message. Returns whether an alert was sent.
async fn check_notifications<S: SessionDriver, A: Alerter>(
    session: &S,
    alerter: &A,
) -> Result<bool, GuardError> {
    session.scroll_to_bottom().await?;
    session.scroll_to_top().await?;

    if session.probe_selector(selectors::NOTIFICATION_BADGE).await? {
        info!("Notification badge present, sending alert");
        alerter.send(ALERT_TEXT).await?;
        Ok(true)
    } else {
        info!("No new messages");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path;

    fn empty_config() -> GuardConfig {
        GuardConfig::from_lookup(|_| None)
    }

    fn creds_config(cookie_path: &Path) -> GuardConfig {
        let mut config = GuardConfig::from_lookup(|key| match key {
            "ACC_USER" => Some("user".to_string()),
            "ACC_PASS" => Some("secret".to_string()),
            _ => None,
        });
        config.cookie_path = cookie_path.to_path_buf();
        config
    }

    fn fresh_cookie(name: &str, expires: Option<f64>) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: ".fl.ru".to_string(),
            path: "/".to_string(),
            expires,
            secure: true,
            http_only: false,
        }
    }

    /// Page scripted with fixed probe answers, recording every interaction
    struct ScriptedSession {
        marker_present: bool,
        badge_present: bool,
        session_cookies: Vec<StoredCookie>,
        visited: RefCell<Vec<String>>,
        typed: RefCell<Vec<(String, String)>>,
        clicked: RefCell<Vec<String>>,
        injected: RefCell<Vec<StoredCookie>>,
    }

    impl ScriptedSession {
        fn new(marker_present: bool, badge_present: bool) -> Self {
            Self {
                marker_present,
                badge_present,
                session_cookies: vec![fresh_cookie("sid", None)],
                visited: RefCell::new(Vec::new()),
                typed: RefCell::new(Vec::new()),
                clicked: RefCell::new(Vec::new()),
                injected: RefCell::new(Vec::new()),
            }
        }
    }

    impl SessionDriver for ScriptedSession {
        async fn goto(&self, url: &str) -> Result<(), BrowserError> {
            self.visited.borrow_mut().push(url.to_string());
            Ok(())
        }
        async fn probe_selector(&self, selector: &str) -> Result<bool, BrowserError> {
            Ok(match selector {
                selectors::AUTH_MARKER => self.marker_present,
                selectors::NOTIFICATION_BADGE => self.badge_present,
                _ => false,
            })
        }
        async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
            self.typed
                .borrow_mut()
                .push((selector.to_string(), text.to_string()));
            Ok(())
        }
        async fn click(&self, selector: &str) -> Result<(), BrowserError> {
            self.clicked.borrow_mut().push(selector.to_string());
            Ok(())
        }
        async fn scroll_to_bottom(&self) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn scroll_to_top(&self) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn capture_cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
            Ok(self.session_cookies.clone())
        }
        async fn inject_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
            self.injected.borrow_mut().extend_from_slice(cookies);
            Ok(())
        }
    }

    /// Alerter recording every message instead of calling Telegram
    struct RecordingAlerter {
        sent: RefCell<Vec<String>>,
    }

    impl RecordingAlerter {
        fn new() -> Self {
            Self {
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl Alerter for RecordingAlerter {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            self.sent.borrow_mut().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_rejects_missing_credentials_before_any_navigation() {
        // No browser is acquired: the run fails before the session exists
        let config = empty_config();
        let result = run(&config).await;
        assert!(matches!(result, Err(GuardError::MissingCredentials)));
    }

    #[tokio::test]
    async fn test_run_rejects_empty_password() {
        let config = GuardConfig::from_lookup(|key| match key {
            "ACC_USER" => Some("user".to_string()),
            "ACC_PASS" => Some(String::new()),
            _ => None,
        });
        let result = run(&config).await;
        assert!(matches!(result, Err(GuardError::MissingCredentials)));
    }

    #[tokio::test]
    async fn test_marker_present_skips_credential_submission() {
        let dir = tempfile::tempdir().unwrap();
        let cookie_path = dir.path().join("cookies.json");
        let config = creds_config(&cookie_path);
        let jar = CookieJar::new(&cookie_path);

        let session = ScriptedSession::new(true, false);
        let outcome = ensure_logged_in(&session, &config, &jar).await.unwrap();

        assert_eq!(outcome, LoginOutcome::AlreadyAuthenticated);
        // Credential fields never receive input, nothing is clicked
        assert!(session.typed.borrow().is_empty());
        assert!(session.clicked.borrow().is_empty());
        // Lands on the target content page, no cookie file is written
        assert_eq!(session.visited.borrow().last().map(String::as_str), Some(PROJECTS_URL));
        assert!(!cookie_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_absent_submits_credentials_and_persists_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let cookie_path = dir.path().join("cookies.json");
        let config = creds_config(&cookie_path);
        let jar = CookieJar::new(&cookie_path);

        let session = ScriptedSession::new(false, false);
        let outcome = ensure_logged_in(&session, &config, &jar).await.unwrap();

        assert_eq!(outcome, LoginOutcome::SubmittedCredentials);
        assert_eq!(
            *session.typed.borrow(),
            vec![
                (selectors::LOGIN_INPUT.to_string(), "user".to_string()),
                (selectors::PASSWORD_INPUT.to_string(), "secret".to_string()),
            ]
        );
        assert_eq!(*session.clicked.borrow(), vec![selectors::SUBMIT_BUTTON.to_string()]);

        // Post-login session cookies overwrite the file
        let saved = jar.load().unwrap().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "sid");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_cookies_are_stripped_before_injection() {
        let dir = tempfile::tempdir().unwrap();
        let cookie_path = dir.path().join("cookies.json");
        let config = creds_config(&cookie_path);
        let jar = CookieJar::new(&cookie_path);
        jar.save(&[fresh_cookie("sid", Some(1_900_000_000.0))]).unwrap();

        let session = ScriptedSession::new(false, false);
        ensure_logged_in(&session, &config, &jar).await.unwrap();

        let injected = session.injected.borrow();
        assert_eq!(injected.len(), 1);
        assert!(injected[0].expires.is_none());
    }

    #[tokio::test]
    async fn test_badge_present_sends_exactly_one_alert() {
        let session = ScriptedSession::new(true, true);
        let alerter = RecordingAlerter::new();

        let sent = check_notifications(&session, &alerter).await.unwrap();

        assert!(sent);
        assert_eq!(*alerter.sent.borrow(), vec![ALERT_TEXT.to_string()]);
    }

    #[tokio::test]
    async fn test_badge_absent_sends_no_alert() {
        let session = ScriptedSession::new(true, false);
        let alerter = RecordingAlerter::new();

        let sent = check_notifications(&session, &alerter).await.unwrap();

        assert!(!sent);
        assert!(alerter.sent.borrow().is_empty());
    }

    #[test]
    fn test_session_config_local_mapping() {
        let mut config = empty_config();
        config.headless = true;
        config.chrome_path = Some("/usr/bin/chromium".to_string());

        let session_config = session_config(&config, false);
        assert!(session_config.remote_url.is_none());
        assert!(session_config.headless);
        assert_eq!(session_config.chrome_path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(session_config.accept_language, "ru,ru_RU");
    }

    #[test]
    fn test_session_config_remote_mapping() {
        let config = empty_config();
        let session_config = session_config(&config, true);
        assert_eq!(
            session_config.remote_url.as_deref(),
            Some("http://localhost:9222")
        );
    }

    #[test]
    fn test_missing_credentials_message() {
        assert_eq!(GuardError::MissingCredentials.to_string(), "Missing account creds");
    }
}
