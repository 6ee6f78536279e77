//! Cookie persistence
//!
//! Stores session cookies in an explicit, versioned JSON record format
//! instead of an opaque serializer dump. Cookies are written after a
//! successful credential submission and read back at the start of every run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Version of the on-disk cookie file format
pub const COOKIE_FILE_VERSION: u32 = 1;

/// Cookie persistence errors
#[derive(Error, Debug)]
pub enum CookieError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed cookie file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported cookie file version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// A single persisted cookie. Field names follow the CDP wire representation
/// so captured cookies deserialize directly from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    /// Expiry in seconds since the epoch; absent for session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl StoredCookie {
    /// Drop the expiry attribute
    pub fn without_expiry(mut self) -> Self {
        self.expires = None;
        self
    }

    /// Normalize a cookie captured from CDP: session cookies carry a
    /// non-positive expiry there, which maps to "no expiry" in this format.
    pub fn normalized(mut self) -> Self {
        if matches!(self.expires, Some(e) if e <= 0.0) {
            self.expires = None;
        }
        self
    }
}

/// On-disk cookie file layout
#[derive(Debug, Serialize, Deserialize)]
struct CookieFile {
    version: u32,
    cookies: Vec<StoredCookie>,
}

/// Handle for the persisted cookie file
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted cookies. `Ok(None)` when no file exists yet; a file
    /// with an unknown version or malformed contents is an error.
    pub fn load(&self) -> Result<Option<Vec<StoredCookie>>, CookieError> {
        if !self.path.exists() {
            return Ok(None);
        }

        info!("Loading cookies from {}", self.path.display());
        let content = std::fs::read_to_string(&self.path)?;
        let file: CookieFile = serde_json::from_str(&content)?;

        if file.version != COOKIE_FILE_VERSION {
            return Err(CookieError::UnsupportedVersion {
                found: file.version,
                supported: COOKIE_FILE_VERSION,
            });
        }

        Ok(Some(file.cookies))
    }

    /// Persist the cookies, overwriting any previous contents
    pub fn save(&self, cookies: &[StoredCookie]) -> Result<(), CookieError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = CookieFile {
            version: COOKIE_FILE_VERSION,
            cookies: cookies.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, content)?;

        info!("Saved {} cookies to {}", cookies.len(), self.path.display());
        Ok(())
    }
}

/// Prepare loaded cookies for injection into a browser session. The expiry
/// attribute is stripped from every cookie unless explicitly kept.
pub fn prepare_for_injection(cookies: Vec<StoredCookie>, keep_expiry: bool) -> Vec<StoredCookie> {
    if keep_expiry {
        cookies
    } else {
        cookies.into_iter().map(StoredCookie::without_expiry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cookie(name: &str, expires: Option<f64>) -> StoredCookie {
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

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::new(dir.path().join("cookies.json"));
        assert!(jar.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::new(dir.path().join("cookies.json"));

        let cookies = vec![
            sample_cookie("sid", Some(1_900_000_000.0)),
            sample_cookie("token", None),
        ];
        jar.save(&cookies).unwrap();

        let loaded = jar.load().unwrap().unwrap();
        assert_eq!(loaded, cookies);
    }

    #[test]
    fn test_save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::new(dir.path().join("cookies.json"));

        jar.save(&[sample_cookie("old", None)]).unwrap();
        jar.save(&[sample_cookie("new", None)]).unwrap();

        let loaded = jar.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "new");
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::new(dir.path().join("nested").join("cookies.json"));
        jar.save(&[sample_cookie("sid", None)]).unwrap();
        assert!(jar.path().exists());
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, r#"{"version": 99, "cookies": []}"#).unwrap();

        let jar = CookieJar::new(&path);
        assert!(matches!(
            jar.load(),
            Err(CookieError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "not json").unwrap();

        let jar = CookieJar::new(&path);
        assert!(matches!(jar.load(), Err(CookieError::Malformed(_))));
    }

    #[test]
    fn test_prepare_for_injection_strips_every_expiry() {
        let cookies = vec![
            sample_cookie("a", Some(1_900_000_000.0)),
            sample_cookie("b", None),
            sample_cookie("c", Some(2_000_000_000.0)),
        ];

        let prepared = prepare_for_injection(cookies, false);
        assert!(prepared.iter().all(|c| c.expires.is_none()));
    }

    #[test]
    fn test_prepare_for_injection_can_keep_expiry() {
        let cookies = vec![sample_cookie("a", Some(1_900_000_000.0))];
        let prepared = prepare_for_injection(cookies, true);
        assert_eq!(prepared[0].expires, Some(1_900_000_000.0));
    }

    #[test]
    fn test_normalized_drops_session_cookie_expiry() {
        let session = sample_cookie("sid", Some(-1.0)).normalized();
        assert!(session.expires.is_none());

        let persistent = sample_cookie("sid", Some(1_900_000_000.0)).normalized();
        assert_eq!(persistent.expires, Some(1_900_000_000.0));
    }

    #[test]
    fn test_deserializes_cdp_wire_shape() {
        // CDP reports extra fields (size, session, priority); they are ignored
        let raw = r#"{
            "name": "sid", "value": "abc", "domain": ".fl.ru", "path": "/",
            "expires": 1900000000.5, "size": 7, "httpOnly": true,
            "secure": true, "session": false, "priority": "Medium"
        }"#;

        let cookie: StoredCookie = serde_json::from_str(raw).unwrap();
        assert_eq!(cookie.name, "sid");
        assert!(cookie.http_only);
        assert!(cookie.secure);
        assert_eq!(cookie.expires, Some(1_900_000_000.5));
    }
}
