//! Browser automation module
//!
//! Handles acquiring and controlling a single Chrome/Chromium session over
//! the Chrome DevTools Protocol, either locally launched or remote.

mod errors;
mod session;

pub use errors::BrowserError;
pub use session::{in_container, BrowserSession, BrowserSessionConfig};
