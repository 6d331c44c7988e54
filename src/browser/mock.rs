//! In-memory browser for tests and offline runs.
//!
//! A [`MockPage`] declares which selectors exist and what state they are in.
//! Every command issued against a [`MockBrowser`] is recorded so tests can
//! assert on the exact sequence the executor produced. Screenshots are real
//! PNG files so artifact handling is exercised end to end.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use image::{ImageBuffer, Rgb, RgbImage};

use super::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession, PageInfo};
use crate::config::{DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH};

/// Placeholder screenshots are rendered at this fraction of the viewport
const SCREENSHOT_SCALE: u32 = 10;

/// State of one element on the mock page
#[derive(Debug, Clone, PartialEq)]
pub struct MockElement {
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
    /// Allowed values when the element is a `<select>`; empty accepts anything
    pub options: Vec<String>,
}

impl MockElement {
    /// A visible, enabled element with no text
    pub fn new() -> Self {
        Self {
            text: String::new(),
            visible: true,
            enabled: true,
            options: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for MockElement {
    fn default() -> Self {
        Self::new()
    }
}

/// Declarative description of the page the mock browser serves
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    elements: HashMap<String, MockElement>,
    title: String,
    unreachable: HashSet<String>,
    fail_screenshots: bool,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element reachable through `selector`
    pub fn element(mut self, selector: impl Into<String>, element: MockElement) -> Self {
        self.elements.insert(selector.into(), element);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Navigation to `url` never settles
    pub fn unreachable(mut self, url: impl Into<String>) -> Self {
        self.unreachable.insert(url.into());
        self
    }

    /// Every screenshot attempt fails
    pub fn failing_screenshots(mut self) -> Self {
        self.fail_screenshots = true;
        self
    }
}

/// A command received by the mock browser
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Navigate(String),
    WaitForSelector(String, Duration),
    Click(String),
    Fill(String, String),
    Press(String, String),
    SelectOption(String, String),
    Hover(String),
    ScrollIntoView(String),
    ScrollBy(i64, i64),
    TextContent(String),
    IsVisible(String),
    IsEnabled(String),
    Screenshot(PathBuf),
    Pause(Duration),
    Close,
}

#[derive(Debug)]
struct MockState {
    page: MockPage,
    url: String,
    values: HashMap<String, String>,
    log: Vec<RecordedCommand>,
    launches: usize,
    closes: usize,
}

impl MockState {
    fn new(page: MockPage) -> Self {
        Self {
            page,
            url: "about:blank".to_string(),
            values: HashMap::new(),
            log: Vec::new(),
            launches: 0,
            closes: 0,
        }
    }

    fn element(&self, selector: &str) -> BrowserResult<&MockElement> {
        self.page
            .elements
            .get(selector)
            .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A scripted browser session
#[derive(Debug, Clone)]
pub struct MockBrowser {
    state: Arc<Mutex<MockState>>,
    viewport: (u32, u32),
}

impl MockBrowser {
    /// Standalone session serving `page`
    pub fn new(page: MockPage) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new(page))),
            viewport: (DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT),
        }
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<RecordedCommand> {
        lock(&self.state).log.clone()
    }

    /// Current value of a filled input
    pub fn value_of(&self, selector: &str) -> Option<String> {
        lock(&self.state).values.get(selector).cloned()
    }

    fn record(&self, command: RecordedCommand) -> MutexGuard<'_, MockState> {
        let mut state = lock(&self.state);
        state.log.push(command);
        state
    }
}

impl BrowserSession for MockBrowser {
    fn navigate(&mut self, url: &str, timeout: Duration) -> BrowserResult<()> {
        let mut state = self.record(RecordedCommand::Navigate(url.to_string()));
        if state.page.unreachable.contains(url) {
            return Err(BrowserError::Timeout {
                what: format!("navigation to {}", url),
                timeout,
            });
        }
        state.url = url.to_string();
        Ok(())
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let state = self.record(RecordedCommand::WaitForSelector(selector.to_string(), timeout));
        if state.page.elements.contains_key(selector) {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: format!("selector {}", selector),
                timeout,
            })
        }
    }

    fn click(&mut self, selector: &str) -> BrowserResult<()> {
        let state = self.record(RecordedCommand::Click(selector.to_string()));
        let element = state.element(selector)?;
        if !element.enabled {
            return Err(BrowserError::Command(format!("{} is disabled", selector)));
        }
        Ok(())
    }

    fn fill(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        let mut state = self.record(RecordedCommand::Fill(selector.to_string(), value.to_string()));
        state.element(selector)?;
        state.values.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    fn press(&mut self, selector: &str, key: &str) -> BrowserResult<()> {
        let state = self.record(RecordedCommand::Press(selector.to_string(), key.to_string()));
        // The page body always exists
        if selector != "body" {
            state.element(selector)?;
        }
        Ok(())
    }

    fn select_option(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        let mut state = self.record(RecordedCommand::SelectOption(
            selector.to_string(),
            value.to_string(),
        ));
        let element = state.element(selector)?;
        if !element.options.is_empty() && !element.options.iter().any(|o| o == value) {
            return Err(BrowserError::Command(format!(
                "option '{}' not found in {}",
                value, selector
            )));
        }
        state.values.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    fn hover(&mut self, selector: &str) -> BrowserResult<()> {
        let state = self.record(RecordedCommand::Hover(selector.to_string()));
        state.element(selector).map(|_| ())
    }

    fn scroll_into_view(&mut self, selector: &str) -> BrowserResult<()> {
        let state = self.record(RecordedCommand::ScrollIntoView(selector.to_string()));
        state.element(selector).map(|_| ())
    }

    fn scroll_by(&mut self, dx: i64, dy: i64) -> BrowserResult<()> {
        self.record(RecordedCommand::ScrollBy(dx, dy));
        Ok(())
    }

    fn text_content(&mut self, selector: &str) -> BrowserResult<String> {
        let state = self.record(RecordedCommand::TextContent(selector.to_string()));
        state.element(selector).map(|e| e.text.clone())
    }

    fn is_visible(&mut self, selector: &str) -> BrowserResult<bool> {
        let state = self.record(RecordedCommand::IsVisible(selector.to_string()));
        Ok(state.page.elements.get(selector).map(|e| e.visible).unwrap_or(false))
    }

    fn is_enabled(&mut self, selector: &str) -> BrowserResult<bool> {
        let state = self.record(RecordedCommand::IsEnabled(selector.to_string()));
        state.element(selector).map(|e| e.enabled)
    }

    fn screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        let state = self.record(RecordedCommand::Screenshot(path.to_path_buf()));
        if state.page.fail_screenshots {
            return Err(BrowserError::Command("screenshot capture failed".to_string()));
        }
        drop(state);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        render_placeholder(self.viewport)
            .save(path)
            .map_err(|e| BrowserError::Command(format!("failed to encode screenshot: {}", e)))
    }

    fn page_info(&mut self) -> BrowserResult<PageInfo> {
        let state = lock(&self.state);
        Ok(PageInfo {
            url: state.url.clone(),
            title: state.page.title.clone(),
            viewport: self.viewport,
        })
    }

    fn pause(&mut self, duration: Duration) {
        self.record(RecordedCommand::Pause(duration));
    }

    fn close(&mut self) -> BrowserResult<()> {
        let mut state = self.record(RecordedCommand::Close);
        state.closes += 1;
        Ok(())
    }
}

/// Grey page with a dark header bar, scaled down from the viewport
fn render_placeholder(viewport: (u32, u32)) -> RgbImage {
    let width = (viewport.0 / SCREENSHOT_SCALE).max(1);
    let height = (viewport.1 / SCREENSHOT_SCALE).max(1);
    let header = height / 8;
    ImageBuffer::from_fn(width, height, |_, y| {
        if y < header {
            Rgb([40, 40, 40])
        } else {
            Rgb([230, 230, 230])
        }
    })
}

/// Launches [`MockBrowser`] sessions that share one recorded state
#[derive(Debug, Clone)]
pub struct MockLauncher {
    state: Arc<Mutex<MockState>>,
    launch_error: Option<String>,
}

impl MockLauncher {
    pub fn new(page: MockPage) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new(page))),
            launch_error: None,
        }
    }

    /// A launcher whose sessions can never be opened
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            launch_error: Some(reason.into()),
            ..Self::new(MockPage::new())
        }
    }

    /// Commands received by every session launched so far
    pub fn commands(&self) -> Vec<RecordedCommand> {
        lock(&self.state).log.clone()
    }

    /// Paths of every screenshot requested so far
    pub fn screenshots(&self) -> Vec<PathBuf> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Screenshot(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Value of a filled input in the most recent session
    pub fn value_of(&self, selector: &str) -> Option<String> {
        lock(&self.state).values.get(selector).cloned()
    }

    pub fn launch_count(&self) -> usize {
        lock(&self.state).launches
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    /// Forget recorded commands (launch/close counters are kept)
    pub fn clear_commands(&self) {
        lock(&self.state).log.clear();
    }
}

impl BrowserLauncher for MockLauncher {
    fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        if let Some(reason) = &self.launch_error {
            return Err(BrowserError::Session(reason.clone()));
        }

        {
            let mut state = lock(&self.state);
            state.launches += 1;
            state.url = "about:blank".to_string();
            state.values.clear();
        }

        Ok(Box::new(MockBrowser {
            state: Arc::clone(&self.state),
            viewport: (DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_page() -> MockPage {
        MockPage::new()
            .title("Swag Labs")
            .element("#user", MockElement::new())
            .element("#login", MockElement::new().with_text("Login"))
            .element("#locked", MockElement::new().disabled())
            .element("#banner", MockElement::new().hidden())
    }

    #[test]
    fn test_wait_for_missing_selector_times_out() {
        let mut browser = MockBrowser::new(login_page());
        let err = browser
            .wait_for_selector("#nope", Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, BrowserError::Timeout { .. }));
        assert!(err.to_string().contains("timeout after 10000ms"));
    }

    #[test]
    fn test_fill_records_value() {
        let mut browser = MockBrowser::new(login_page());
        browser.fill("#user", "standard_user").unwrap();
        assert_eq!(browser.value_of("#user").as_deref(), Some("standard_user"));
        assert_eq!(
            browser.commands(),
            vec![RecordedCommand::Fill("#user".into(), "standard_user".into())]
        );
    }

    #[test]
    fn test_visibility_and_enabled_state() {
        let mut browser = MockBrowser::new(login_page());
        assert!(browser.is_visible("#login").unwrap());
        assert!(!browser.is_visible("#banner").unwrap());
        assert!(!browser.is_visible("#absent").unwrap());
        assert!(!browser.is_enabled("#locked").unwrap());
        assert!(browser.is_enabled("#absent").is_err());
    }

    #[test]
    fn test_click_disabled_fails() {
        let mut browser = MockBrowser::new(login_page());
        assert!(browser.click("#login").is_ok());
        assert!(matches!(browser.click("#locked"), Err(BrowserError::Command(_))));
    }

    #[test]
    fn test_screenshot_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots").join("final-result.png");
        let mut browser = MockBrowser::new(login_page());
        browser.screenshot(&path).unwrap();

        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), DEFAULT_VIEWPORT_WIDTH / SCREENSHOT_SCALE);
    }

    #[test]
    fn test_navigate_unreachable() {
        let mut browser = MockBrowser::new(MockPage::new().unreachable("https://down.example"));
        assert!(browser.navigate("https://ok.example", Duration::from_secs(30)).is_ok());
        assert_eq!(browser.page_info().unwrap().url, "https://ok.example");
        assert!(browser.navigate("https://down.example", Duration::from_secs(30)).is_err());
    }

    #[test]
    fn test_launcher_shares_state() {
        let launcher = MockLauncher::new(login_page());
        let mut session = launcher.launch().unwrap();
        session.click("#login").unwrap();
        session.close().unwrap();

        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(launcher.close_count(), 1);
        assert_eq!(
            launcher.commands(),
            vec![RecordedCommand::Click("#login".into()), RecordedCommand::Close]
        );
    }

    #[test]
    fn test_failing_launcher() {
        let launcher = MockLauncher::failing("no chrome");
        let err = launcher.launch().err().unwrap();
        assert!(matches!(err, BrowserError::Session(_)));
        assert_eq!(launcher.launch_count(), 0);
    }
}
