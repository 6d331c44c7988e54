//! Browser automation backend abstraction.
//!
//! This module provides a unified interface over browser engines:
//! - [`ChromiumBrowser`] drives Chrome/Chromium over the DevTools protocol
//!   (requires the `chromium` feature)
//! - [`MockBrowser`] is an in-memory page for tests and offline runs
//!
//! Every command blocks until the engine acknowledges it or its timeout
//! expires.

pub mod mock;

#[cfg(feature = "chromium")]
pub mod chromium;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mock::{MockBrowser, MockElement, MockLauncher, MockPage, RecordedCommand};

#[cfg(feature = "chromium")]
pub use chromium::{ChromiumBrowser, ChromiumLauncher};

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Errors raised by browser commands
#[derive(Debug, Error)]
pub enum BrowserError {
    /// A wait exceeded its deadline
    #[error("timeout after {}ms waiting for {what}", timeout.as_millis())]
    Timeout { what: String, timeout: Duration },

    /// No element matched the selector
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The engine rejected or failed a command
    #[error("browser command failed: {0}")]
    Command(String),

    /// The session could not be opened or closed
    #[error("browser session error: {0}")]
    Session(String),

    /// Filesystem error (screenshots)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Current page information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    /// Viewport (width, height) in CSS pixels
    pub viewport: (u32, u32),
}

/// Command surface of one open browser page
///
/// Implementations:
/// - `ChromiumBrowser` for real Chrome/Chromium sessions
/// - `MockBrowser` for scripted pages in tests
pub trait BrowserSession {
    /// Load `url` and wait until the network is idle
    fn navigate(&mut self, url: &str, timeout: Duration) -> BrowserResult<()>;

    /// Wait until an element matching `selector` is attached to the page
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> BrowserResult<()>;

    fn click(&mut self, selector: &str) -> BrowserResult<()>;

    /// Replace the value of an input element
    fn fill(&mut self, selector: &str, value: &str) -> BrowserResult<()>;

    /// Press a key (e.g. "Enter", "Tab") while `selector` has focus
    fn press(&mut self, selector: &str, key: &str) -> BrowserResult<()>;

    /// Choose the option with `value` in a `<select>`
    fn select_option(&mut self, selector: &str, value: &str) -> BrowserResult<()>;

    fn hover(&mut self, selector: &str) -> BrowserResult<()>;

    fn scroll_into_view(&mut self, selector: &str) -> BrowserResult<()>;

    /// Scroll the page by an offset in pixels
    fn scroll_by(&mut self, dx: i64, dy: i64) -> BrowserResult<()>;

    /// Text content of the first element matching `selector`
    fn text_content(&mut self, selector: &str) -> BrowserResult<String>;

    /// Whether the element is visible; a missing element is not visible
    fn is_visible(&mut self, selector: &str) -> BrowserResult<bool>;

    fn is_enabled(&mut self, selector: &str) -> BrowserResult<bool>;

    /// Capture a full-page PNG to `path`
    fn screenshot(&mut self, path: &Path) -> BrowserResult<()>;

    fn page_info(&mut self) -> BrowserResult<PageInfo>;

    /// Explicit timed wait
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Close the page and its browser process
    fn close(&mut self) -> BrowserResult<()>;
}

/// Opens browser sessions
pub trait BrowserLauncher {
    fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>>;
}
