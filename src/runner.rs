//! Test runner: description -> plan -> execution -> summary.
//!
//! Every run gets its own executor and browser session, closed on every exit
//! path, so one run never sees another's state. Runs never fail outward: any
//! error becomes an aborted [`RunSummary`].

use std::thread;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::browser::{BrowserError, BrowserLauncher};
use crate::config::{Config, ExecutorSettings, RunnerSettings};
use crate::executor::StepExecutor;
use crate::inference::InferenceError;
use crate::plan::{ActionPlan, PlanGenerator, StepSequence, TestContext};
use crate::report::{BatchSummary, RunSummary};

/// Why a run was aborted
#[derive(Debug, Error)]
pub enum RunError {
    #[error("plan generation failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("browser session failed: {0}")]
    Session(#[from] BrowserError),
}

/// Runs test descriptions end to end
pub struct TestRunner {
    generator: PlanGenerator,
    launcher: Box<dyn BrowserLauncher>,
    executor_settings: ExecutorSettings,
    settings: RunnerSettings,
    artifacts: ArtifactStore,
}

impl TestRunner {
    pub fn new(generator: PlanGenerator, launcher: Box<dyn BrowserLauncher>, config: &Config) -> Self {
        Self {
            generator,
            launcher,
            executor_settings: config.executor.clone(),
            settings: config.runner.clone(),
            artifacts: ArtifactStore::new(&config.artifacts),
        }
    }

    pub fn generator(&self) -> &PlanGenerator {
        &self.generator
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run one test description
    pub fn run_one(&self, description: &str, context: &TestContext) -> RunSummary {
        let started = Instant::now();
        info!(description, "starting test run");

        let plan = match self.plan(description, context) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "run aborted before execution");
                return self.finish(RunSummary::aborted(description, e.to_string(), 0, elapsed_ms(started)));
            }
        };
        info!(steps = plan.len(), reasoning = %plan.reasoning, "plan ready");

        let mut executor = StepExecutor::new(
            self.launcher.as_ref(),
            self.executor_settings.clone(),
            self.artifacts.clone(),
        );
        let outcome = executor.execute_plan(&plan).map_err(RunError::from);
        if let Err(e) = executor.close() {
            warn!(error = %e, "failed to close browser session");
        }

        let summary = match outcome {
            Ok(report) => RunSummary::executed(description, plan.model, plan.reasoning, report, elapsed_ms(started)),
            Err(e) => {
                warn!(error = %e, "run aborted");
                RunSummary::aborted(description, e.to_string(), plan.len(), elapsed_ms(started))
            }
        };
        self.finish(summary)
    }

    /// Run several descriptions one after another
    pub fn run_many<S: AsRef<str>>(&self, descriptions: &[S], context: &TestContext) -> BatchSummary {
        let total = descriptions.len();
        info!(total, "starting batch");

        let mut results = Vec::with_capacity(total);
        for (i, description) in descriptions.iter().enumerate() {
            info!(test = i + 1, total, "batch run");
            results.push(self.run_one(description.as_ref(), context));

            if i + 1 < total && !self.settings.run_pacing.is_zero() {
                info!(pause_ms = self.settings.run_pacing.as_millis() as u64, "pausing between tests");
                thread::sleep(self.settings.run_pacing);
            }
        }

        let batch = BatchSummary::from_runs(results);
        info!(
            successful = batch.successful,
            failed = batch.failed,
            success_rate = batch.success_rate,
            "batch finished"
        );
        batch
    }

    fn plan(&self, description: &str, context: &TestContext) -> Result<ActionPlan, RunError> {
        let plan = self.generator.generate(description, context)?;
        if let StepSequence::Invalid { reason } = &plan.steps {
            return Err(RunError::InvalidPlan(reason.clone()));
        }
        Ok(plan)
    }

    fn finish(&self, summary: RunSummary) -> RunSummary {
        info!(
            success = summary.success,
            description = %summary.description,
            duration_ms = summary.duration_ms,
            "test run finished"
        );

        if self.settings.save_results {
            match self.artifacts.save_summary(&summary) {
                Ok(path) => info!(path = %path.display(), "results saved"),
                Err(e) => warn!(error = %e, "could not save results"),
            }
        }
        summary
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockElement, MockLauncher, MockPage};
    use crate::config::ArtifactSettings;
    use crate::inference::{InferenceRequest, InferenceResult};
    use crate::report::RunOutcome;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            executor: ExecutorSettings::defaults().step_delay(Duration::ZERO),
            runner: RunnerSettings::defaults().run_pacing(Duration::ZERO),
            artifacts: ArtifactSettings::under(dir.path()),
            ..Config::defaults()
        }
    }

    fn runner(dir: &TempDir, response: &'static str, launcher: &MockLauncher) -> TestRunner {
        let config = config(dir);
        let client = move |_: &InferenceRequest| -> InferenceResult<String> { Ok(response.to_string()) };
        let generator = PlanGenerator::new(Box::new(client), &config.inference, &config.planner);
        TestRunner::new(generator, Box::new(launcher.clone()), &config)
    }

    #[test]
    fn test_run_one_executes_and_saves() {
        let dir = TempDir::new().unwrap();
        let launcher = MockLauncher::new(MockPage::new().element("#go", MockElement::new()));
        let runner = runner(&dir, r##"{"reasoning": "press go", "steps": [{"action": "click", "selector": "#go"}]}"##, &launcher);

        let summary = runner.run_one("click go", &TestContext::default());
        assert!(summary.success);
        match &summary.outcome {
            RunOutcome::Executed { total_steps, reasoning, model, .. } => {
                assert_eq!(*total_steps, 1);
                assert_eq!(reasoning, "press go");
                assert_eq!(model, "llama3.1:8b");
            }
            other => panic!("expected executed run, got {:?}", other),
        }
        assert_eq!(launcher.close_count(), 1);
        assert_eq!(runner.artifacts().list_results().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_plan_aborts_without_browser() {
        let dir = TempDir::new().unwrap();
        let launcher = MockLauncher::new(MockPage::new());
        let runner = runner(&dir, r#"{"steps": {"action": "click"}}"#, &launcher);

        let summary = runner.run_one("broken", &TestContext::default());
        assert!(!summary.success);
        assert!(summary.error().unwrap().starts_with("invalid plan:"));
        assert_eq!(launcher.launch_count(), 0);
    }
}
