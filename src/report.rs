//! Types for step, run and batch results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based position in the plan
    pub step: usize,

    /// Action kind as written in the plan
    pub action: String,

    pub success: bool,

    /// Result message (success only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Error message (failure only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn passed(step: usize, action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step,
            action: action.into(),
            success: true,
            result: Some(message.into()),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(step: usize, action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step,
            action: action.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of executing one plan; counts are derived from `results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    total_steps: usize,
    completed_steps: usize,
    failed_steps: usize,
    duration_ms: u64,
    results: Vec<StepResult>,
}

impl ExecutionReport {
    pub fn new(total_steps: usize, results: Vec<StepResult>) -> Self {
        let completed_steps = results.iter().filter(|r| r.success).count();
        let failed_steps = results.len() - completed_steps;
        let duration_ms = match (results.first(), results.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds().max(0) as u64,
            _ => 0,
        };

        Self {
            total_steps,
            completed_steps,
            failed_steps,
            duration_ms,
            results,
        }
    }

    /// Steps in the plan, attempted or not
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn completed_steps(&self) -> usize {
        self.completed_steps
    }

    pub fn failed_steps(&self) -> usize {
        self.failed_steps
    }

    /// Time between the first and last step result
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }

    /// True when no step failed
    pub fn success(&self) -> bool {
        self.failed_steps == 0
    }
}

/// What happened in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutcome {
    /// The plan was executed
    Executed {
        total_steps: usize,
        completed_steps: usize,
        failed_steps: usize,
        model: String,
        reasoning: String,
        results: Vec<StepResult>,
    },

    /// The run stopped before or while opening the browser
    Aborted {
        error: String,
        /// Steps in the plan, if one was generated
        steps: usize,
    },
}

/// Summary of one test run, as printed and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    pub description: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn executed(
        description: impl Into<String>,
        model: impl Into<String>,
        reasoning: impl Into<String>,
        report: ExecutionReport,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: report.success(),
            description: description.into(),
            duration_ms,
            timestamp: Utc::now(),
            outcome: RunOutcome::Executed {
                total_steps: report.total_steps(),
                completed_steps: report.completed_steps(),
                failed_steps: report.failed_steps(),
                model: model.into(),
                reasoning: reasoning.into(),
                results: report.into_results(),
            },
        }
    }

    pub fn aborted(description: impl Into<String>, error: impl Into<String>, steps: usize, duration_ms: u64) -> Self {
        Self {
            success: false,
            description: description.into(),
            duration_ms,
            timestamp: Utc::now(),
            outcome: RunOutcome::Aborted {
                error: error.into(),
                steps,
            },
        }
    }

    /// Error message of an aborted run
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Aborted { error, .. } => Some(error),
            RunOutcome::Executed { .. } => None,
        }
    }

    /// Step results of an executed run (empty when aborted)
    pub fn results(&self) -> &[StepResult] {
        match &self.outcome {
            RunOutcome::Executed { results, .. } => results,
            RunOutcome::Aborted { .. } => &[],
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{}", rule)?;
        writeln!(f, "Test: {}", self.description)?;
        writeln!(f, "Result: {}", if self.success { "PASS" } else { "FAIL" })?;
        match &self.outcome {
            RunOutcome::Executed {
                total_steps,
                completed_steps,
                failed_steps,
                reasoning,
                results,
                ..
            } => {
                writeln!(f, "Steps: {}/{}", completed_steps, total_steps)?;
                if *failed_steps > 0 {
                    writeln!(f, "Failures: {}", failed_steps)?;
                    for r in results.iter().filter(|r| !r.success) {
                        writeln!(f, "  step {} ({}): {}", r.step, r.action, r.error.as_deref().unwrap_or(""))?;
                    }
                }
                writeln!(f, "Duration: {}s", self.duration_ms / 1000)?;
                writeln!(f, "Plan: {}", reasoning)?;
            }
            RunOutcome::Aborted { error, .. } => {
                writeln!(f, "Error: {}", error)?;
                writeln!(f, "Duration: {}s", self.duration_ms / 1000)?;
            }
        }
        write!(f, "{}", rule)
    }
}

/// Aggregate of a batch of runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_tests: usize,
    pub successful: usize,
    pub failed: usize,
    /// successful / total_tests, 0.0 for an empty batch
    pub success_rate: f64,
    pub results: Vec<RunSummary>,
}

impl BatchSummary {
    pub fn from_runs(results: Vec<RunSummary>) -> Self {
        let total_tests = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let success_rate = if total_tests == 0 {
            0.0
        } else {
            successful as f64 / total_tests as f64
        };

        Self {
            total_tests,
            successful,
            failed: total_tests - successful,
            success_rate,
            results,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "FINAL SUMMARY")?;
        writeln!(f, "{}", rule)?;
        for (i, run) in self.results.iter().enumerate() {
            writeln!(f, "{:>3}. [{}] {}", i + 1, if run.success { "PASS" } else { "FAIL" }, run.description)?;
        }
        writeln!(f, "Passed: {}", self.successful)?;
        writeln!(f, "Failed: {}", self.failed)?;
        write!(f, "Success rate: {:.0}%", self.success_rate * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(result: StepResult, offset_ms: i64, base: DateTime<Utc>) -> StepResult {
        StepResult {
            timestamp: base + Duration::milliseconds(offset_ms),
            ..result
        }
    }

    #[test]
    fn test_report_counts_and_duration() {
        let base = Utc::now();
        let report = ExecutionReport::new(
            4,
            vec![
                at(StepResult::passed(1, "navigate", "navigated to x"), 0, base),
                at(StepResult::failed(2, "click", "boom"), 250, base),
                at(StepResult::passed(3, "click", "clicked y"), 1200, base),
            ],
        );

        assert_eq!(report.total_steps(), 4);
        assert_eq!(report.completed_steps(), 2);
        assert_eq!(report.failed_steps(), 1);
        assert_eq!(report.duration_ms(), 1200);
        assert!(!report.success());
    }

    #[test]
    fn test_empty_report() {
        let report = ExecutionReport::new(0, vec![]);
        assert_eq!(report.duration_ms(), 0);
        assert!(report.success());
    }

    #[test]
    fn test_batch_rates() {
        let ok = RunSummary::executed("a", "m", "r", ExecutionReport::new(0, vec![]), 10);
        let bad = RunSummary::aborted("b", "connection failed", 0, 5);
        let batch = BatchSummary::from_runs(vec![ok.clone(), bad, ok]);

        assert_eq!(batch.total_tests, 3);
        assert_eq!(batch.successful, 2);
        assert_eq!(batch.failed, 1);
        assert!((batch.success_rate - 2.0 / 3.0).abs() < 1e-9);

        assert_eq!(BatchSummary::from_runs(vec![]).success_rate, 0.0);
    }

    #[test]
    fn test_summary_json_shapes() {
        let aborted = RunSummary::aborted("login", "refused", 3, 42);
        let value = serde_json::to_value(&aborted).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"], json!("refused"));
        assert_eq!(value["steps"], json!(3));
        assert!(value.get("results").is_none());

        let report = ExecutionReport::new(1, vec![StepResult::passed(1, "click", "clicked #a")]);
        let executed = RunSummary::executed("login", "llama", "why", report, 7);
        let value = serde_json::to_value(&executed).unwrap();
        assert_eq!(value["completed_steps"], json!(1));
        assert_eq!(value["results"][0]["result"], json!("clicked #a"));
        assert!(value["results"][0].get("error").is_none());

        let back: RunSummary = serde_json::from_value(value).unwrap();
        assert_eq!(back, executed);
    }

    #[test]
    fn test_display_lists_failures() {
        let report = ExecutionReport::new(2, vec![StepResult::failed(1, "click", "timeout after 10000ms")]);
        let text = RunSummary::executed("t", "m", "r", report, 0).to_string();
        assert!(text.contains("Result: FAIL"));
        assert!(text.contains("step 1 (click): timeout after 10000ms"));
    }
}
