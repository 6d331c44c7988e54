//! Step executor: runs action steps against one browser session.
//!
//! Steps run strictly in order. A failing step gets an `error-step-<n>`
//! screenshot and halts the plan unless it is marked non-critical. Every
//! call to [`StepExecutor::execute`] ends with exactly one `final-result`
//! screenshot. Screenshot problems are logged and never fail a step.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::browser::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession};
use crate::config::ExecutorSettings;
use crate::plan::{Action, ActionError, ActionKind, ActionPlan, ActionStep, Verification, WaitTarget};
use crate::report::{ExecutionReport, StepResult};

/// Tag of the screenshot taken after every execution
pub const FINAL_SCREENSHOT_TAG: &str = "final-result";

/// Why a single step failed
#[derive(Debug, Error)]
pub enum StepError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("{action} requires a {field}")]
    MissingField { action: ActionKind, field: &'static str },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl From<ActionError> for StepError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::UnknownAction(kind) => StepError::UnknownAction(kind),
            ActionError::MissingField { action, field } => StepError::MissingField { action, field },
        }
    }
}

/// Executes steps in one lazily opened browser session
pub struct StepExecutor<'a> {
    launcher: &'a dyn BrowserLauncher,
    session: Option<Box<dyn BrowserSession>>,
    settings: ExecutorSettings,
    artifacts: ArtifactStore,
}

impl<'a> StepExecutor<'a> {
    pub fn new(launcher: &'a dyn BrowserLauncher, settings: ExecutorSettings, artifacts: ArtifactStore) -> Self {
        Self {
            launcher,
            session: None,
            settings,
            artifacts,
        }
    }

    /// Open the browser session if it is not open yet
    pub fn open(&mut self) -> BrowserResult<()> {
        open_session(&mut self.session, self.launcher).map(|_| ())
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Execute the steps of `plan`; an invalid sequence executes nothing
    pub fn execute_plan(&mut self, plan: &ActionPlan) -> BrowserResult<ExecutionReport> {
        self.execute(plan.steps().unwrap_or(&[]))
    }

    /// Execute `steps` in order.
    ///
    /// Step failures are recorded in the report. The only error is a session
    /// that cannot be opened.
    pub fn execute(&mut self, steps: &[ActionStep]) -> BrowserResult<ExecutionReport> {
        self.open()?;
        let total = steps.len();
        let mut results = Vec::with_capacity(total);

        for (i, step) in steps.iter().enumerate() {
            let n = i + 1;
            info!(step = n, total, action = %step.describe(), "executing step");

            match self.run_step(step) {
                Ok(message) => {
                    debug!(step = n, %message, "step passed");
                    results.push(StepResult::passed(n, &step.action, message));
                }
                Err(e) => {
                    warn!(step = n, error = %e, "step failed");
                    self.capture(&format!("error-step-{}", n));
                    results.push(StepResult::failed(n, &step.action, e.to_string()));

                    if step.is_critical(self.settings.critical_by_default) {
                        info!(step = n, "critical step failed, halting plan");
                        break;
                    }
                }
            }

            if n < total && !self.settings.step_delay.is_zero() {
                let delay = self.settings.step_delay;
                if let Ok(session) = open_session(&mut self.session, self.launcher) {
                    session.pause(delay);
                }
            }
        }

        if let Some(Ok(page)) = self.session.as_deref_mut().map(|s| s.page_info()) {
            info!(url = %page.url, title = %page.title, "execution finished");
        }
        self.capture(FINAL_SCREENSHOT_TAG);
        Ok(ExecutionReport::new(total, results))
    }

    /// Close the browser session, if open
    pub fn close(&mut self) -> BrowserResult<()> {
        match self.session.take() {
            Some(mut session) => {
                debug!("closing browser session");
                session.close()
            }
            None => Ok(()),
        }
    }

    fn run_step(&mut self, step: &ActionStep) -> Result<String, StepError> {
        let action = Action::from_step(step)?;
        let s = &self.settings;
        let session = open_session(&mut self.session, self.launcher)?;

        let message = match action {
            Action::Navigate { url } => {
                session.navigate(&url, s.navigation_timeout)?;
                format!("navigated to {}", url)
            }
            Action::Click { selector } => {
                session.wait_for_selector(&selector, s.element_timeout)?;
                session.click(&selector)?;
                format!("clicked {}", selector)
            }
            Action::Fill { selector, value } => {
                session.wait_for_selector(&selector, s.element_timeout)?;
                session.fill(&selector, &value)?;
                format!("filled '{}' in {}", value, selector)
            }
            Action::Press { selector, key } => {
                let target = match selector {
                    Some(selector) => {
                        session.wait_for_selector(&selector, s.element_timeout)?;
                        selector
                    }
                    None => "body".to_string(),
                };
                session.press(&target, &key)?;
                format!("pressed {}", key)
            }
            Action::Wait(WaitTarget::Selector(selector)) => {
                session.wait_for_selector(&selector, s.wait_selector_timeout)?;
                format!("waited for {}", selector)
            }
            Action::Wait(WaitTarget::Sleep(ms)) => {
                let duration = ms.map(Duration::from_millis).unwrap_or(s.default_wait);
                session.pause(duration);
                format!("waited {}ms", duration.as_millis())
            }
            Action::Screenshot { label } => {
                let label = label.unwrap_or_else(|| format!("screenshot-{}", Utc::now().timestamp_millis()));
                let path = self.artifacts.screenshot_path(&label).map_err(BrowserError::from)?;
                session.screenshot(&path)?;
                format!("screenshot taken: {}", file_name(&path))
            }
            Action::Scroll { selector: Some(selector) } => {
                session.wait_for_selector(&selector, s.element_timeout)?;
                session.scroll_into_view(&selector)?;
                "scrolled".to_string()
            }
            Action::Scroll { selector: None } => {
                session.scroll_by(0, s.scroll_offset)?;
                "scrolled".to_string()
            }
            Action::Select { selector, value } => {
                session.wait_for_selector(&selector, s.element_timeout)?;
                session.select_option(&selector, &value)?;
                format!("selected '{}' in {}", value, selector)
            }
            Action::Hover { selector } => {
                session.wait_for_selector(&selector, s.element_timeout)?;
                session.hover(&selector)?;
                format!("hovered {}", selector)
            }
            Action::Verify { selector, check } => verify(session, &selector, check, s.verify_timeout)?,
        };
        Ok(message)
    }

    /// Diagnostic screenshot; failures are only logged
    fn capture(&mut self, tag: &str) -> Option<PathBuf> {
        let attempt = self
            .artifacts
            .screenshot_path(tag)
            .map_err(BrowserError::from)
            .and_then(|path| {
                let session = open_session(&mut self.session, self.launcher)?;
                session.screenshot(&path)?;
                Ok(path)
            });

        match attempt {
            Ok(path) => {
                debug!(path = %path.display(), "screenshot saved");
                Some(path)
            }
            Err(e) => {
                warn!(tag, error = %e, "could not take screenshot");
                None
            }
        }
    }
}

impl Drop for StepExecutor<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close browser session");
        }
    }
}

fn open_session<'s>(
    slot: &'s mut Option<Box<dyn BrowserSession>>,
    launcher: &dyn BrowserLauncher,
) -> BrowserResult<&'s mut (dyn BrowserSession + 'static)> {
    if slot.is_none() {
        info!("launching browser session");
        *slot = Some(launcher.launch()?);
    }
    slot.as_deref_mut()
        .ok_or_else(|| BrowserError::Session("browser session unavailable".to_string()))
}

/// Verification checks, in priority order: text, visibility, enabled state, presence
fn verify(
    session: &mut dyn BrowserSession,
    selector: &str,
    check: Verification,
    timeout: Duration,
) -> Result<String, StepError> {
    match check {
        Verification::Text(expected) => {
            session.wait_for_selector(selector, timeout)?;
            let actual = session.text_content(selector)?;
            if !actual.contains(&expected) {
                return Err(StepError::Verification(format!(
                    "expected text '{}' in {}, found '{}'",
                    expected, selector, actual
                )));
            }
            Ok(format!("verified text '{}' in {}", expected, selector))
        }
        Verification::Visible(expected) => {
            let actual = session.is_visible(selector)?;
            let word = |v: bool| if v { "visible" } else { "hidden" };
            if actual != expected {
                return Err(StepError::Verification(format!(
                    "expected {} to be {}, but it is {}",
                    selector,
                    word(expected),
                    word(actual)
                )));
            }
            Ok(format!("verified {} is {}", selector, word(actual)))
        }
        Verification::Enabled(expected) => {
            let actual = session.is_enabled(selector)?;
            let word = |v: bool| if v { "enabled" } else { "disabled" };
            if actual != expected {
                return Err(StepError::Verification(format!(
                    "expected {} to be {}, but it is {}",
                    selector,
                    word(expected),
                    word(actual)
                )));
            }
            Ok(format!("verified {} is {}", selector, word(actual)))
        }
        Verification::Present => {
            session.wait_for_selector(selector, timeout)?;
            Ok(format!("verified {} exists", selector))
        }
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
