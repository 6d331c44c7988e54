//! End-to-end tests: scripted inference, in-memory browser, real artifacts

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use nl_webtest::browser::{MockElement, MockLauncher, MockPage};
use nl_webtest::config::{ArtifactSettings, Config, ExecutorSettings, RunnerSettings};
use nl_webtest::inference::{InferenceError, InferenceRequest, InferenceResult};
use nl_webtest::report::RunOutcome;
use nl_webtest::{PlanGenerator, TestContext, TestRunner};

fn config(dir: &TempDir) -> Config {
    Config {
        executor: ExecutorSettings::defaults().step_delay(Duration::ZERO),
        runner: RunnerSettings::defaults().run_pacing(Duration::ZERO),
        artifacts: ArtifactSettings::under(dir.path()),
        ..Config::defaults()
    }
}

/// Runner whose inference client answers with `responses` in turn
fn scripted_runner(
    dir: &TempDir,
    responses: Vec<InferenceResult<String>>,
    launcher: &MockLauncher,
) -> (TestRunner, Rc<Cell<usize>>) {
    let config = config(dir);
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let responses = std::cell::RefCell::new(responses.into_iter());

    let client = move |_: &InferenceRequest| -> InferenceResult<String> {
        counter.set(counter.get() + 1);
        responses
            .borrow_mut()
            .next()
            .unwrap_or_else(|| Err(InferenceError::Connection("script exhausted".into())))
    };
    let generator = PlanGenerator::new(Box::new(client), &config.inference, &config.planner);
    (TestRunner::new(generator, Box::new(launcher.clone()), &config), calls)
}

fn saucedemo_page() -> MockPage {
    MockPage::new()
        .title("Swag Labs")
        .element("[data-test=\"username\"]", MockElement::new())
        .element("[data-test=\"password\"]", MockElement::new())
        .element("[data-test=\"login-button\"]", MockElement::new())
        .element(".inventory_list", MockElement::new())
        .element(".title", MockElement::new().with_text("Products"))
}

fn screenshot_tags(launcher: &MockLauncher) -> Vec<String> {
    launcher
        .screenshots()
        .iter()
        .map(|p| {
            let name = p.file_name().unwrap().to_string_lossy().into_owned();
            name[..name.len() - "-YYYY-MM-DDTHH-MM-SS.png".len()].to_string()
        })
        .collect()
}

#[test]
fn test_missing_element_scenario() {
    let dir = TempDir::new().unwrap();
    let launcher = MockLauncher::new(saucedemo_page());
    let response = r##"Here is the plan you asked for:
{"reasoning": "log in", "steps": [
  {"action": "navigate", "value": "https://www.saucedemo.com"},
  {"action": "fill", "selector": "[data-test=\"username\"]", "value": "standard_user"},
  {"action": "click", "selector": "#does-not-exist"},
  {"action": "verify", "selector": ".inventory_list", "options": {"visible": true}}
]}
Good luck!"##;
    let (runner, _) = scripted_runner(&dir, vec![Ok(response.to_string())], &launcher);

    let summary = runner.run_one("log in", &TestContext::default());

    assert!(!summary.success);
    match &summary.outcome {
        RunOutcome::Executed {
            total_steps,
            completed_steps,
            failed_steps,
            results,
            reasoning,
            ..
        } => {
            assert_eq!((*total_steps, *completed_steps, *failed_steps), (4, 2, 1));
            assert_eq!(results.len(), 3);
            assert_eq!(reasoning, "log in");
            let error = results[2].error.as_deref().unwrap();
            assert!(error.contains("timeout"), "{}", error);
        }
        other => panic!("expected executed run, got {:?}", other),
    }
    assert_eq!(screenshot_tags(&launcher), vec!["error-step-3", "final-result"]);
    assert_eq!(launcher.value_of("[data-test=\"username\"]").as_deref(), Some("standard_user"));
    assert_eq!(launcher.close_count(), 1);
}

#[test]
fn test_prose_only_response_runs_fallback_plan() {
    let dir = TempDir::new().unwrap();
    let launcher = MockLauncher::new(saucedemo_page());
    let (runner, _) = scripted_runner(
        &dir,
        vec![Ok("Sorry, I am not able to produce JSON today.".to_string())],
        &launcher,
    );

    let summary = runner.run_one("anything", &TestContext::default());

    assert!(summary.success);
    assert_eq!(summary.results().len(), 2);
    assert_eq!(
        summary.results()[0].result.as_deref(),
        Some("navigated to https://www.saucedemo.com")
    );
    assert_eq!(screenshot_tags(&launcher), vec!["fallback-test", "final-result"]);
}

#[test]
fn test_batch_runs_are_independent() {
    let dir = TempDir::new().unwrap();
    let launcher = MockLauncher::new(saucedemo_page());
    let ok = r#"{"steps": [{"action": "verify", "selector": ".title", "options": {"text": "Products"}}]}"#;
    let failing = r##"{"steps": [{"action": "click", "selector": "#checkout"}]}"##;
    let (runner, calls) = scripted_runner(
        &dir,
        vec![
            Ok(ok.to_string()),
            Ok(failing.to_string()),
            Err(InferenceError::Connection("connection refused".into())),
            Ok(ok.to_string()),
        ],
        &launcher,
    );

    let batch = runner.run_many(&["first", "second", "third", "fourth"], &TestContext::default());

    assert_eq!(calls.get(), 4);
    assert_eq!(batch.total_tests, 4);
    assert_eq!(batch.successful, 2);
    assert_eq!(batch.failed, 2);
    assert_eq!(batch.success_rate, 0.5);
    let outcome: Vec<bool> = batch.results.iter().map(|r| r.success).collect();
    assert_eq!(outcome, vec![true, false, false, true]);
    assert!(batch.results[2].error().unwrap().contains("connection refused"));

    // The aborted run never opened a browser; the others each got a fresh one
    assert_eq!(launcher.launch_count(), 3);
    assert_eq!(launcher.close_count(), 3);
    assert_eq!(runner.artifacts().list_results().unwrap().len(), 4);
}

#[test]
fn test_invalid_steps_abort_without_browser() {
    let dir = TempDir::new().unwrap();
    let launcher = MockLauncher::new(saucedemo_page());
    let (runner, _) = scripted_runner(
        &dir,
        vec![Ok(r#"{"reasoning": "x", "steps": ["click the login button"]}"#.to_string())],
        &launcher,
    );

    let summary = runner.run_one("login", &TestContext::default());

    assert!(!summary.success);
    assert!(summary.error().unwrap().contains("step 1"));
    assert_eq!(launcher.launch_count(), 0);
}

#[test]
fn test_session_failure_aborts_each_run() {
    let dir = TempDir::new().unwrap();
    let launcher = MockLauncher::failing("chrome not found");
    let plan = r##"{"steps": [{"action": "navigate", "value": "https://x"}, {"action": "click", "selector": "#a"}]}"##;
    let (runner, _) = scripted_runner(&dir, vec![Ok(plan.to_string()), Ok(plan.to_string())], &launcher);

    let batch = runner.run_many(&["one", "two"], &TestContext::default());

    assert_eq!(batch.successful, 0);
    for run in &batch.results {
        match &run.outcome {
            RunOutcome::Aborted { error, steps } => {
                assert!(error.contains("chrome not found"), "{}", error);
                assert_eq!(*steps, 2);
            }
            other => panic!("expected aborted run, got {:?}", other),
        }
    }
}

#[test]
fn test_saved_summary_round_trips() {
    let dir = TempDir::new().unwrap();
    let launcher = MockLauncher::new(saucedemo_page());
    let (runner, _) = scripted_runner(
        &dir,
        vec![Ok(r#"{"steps": [{"action": "wait", "value": 10}]}"#.to_string())],
        &launcher,
    );

    let summary = runner.run_one("wait a bit", &TestContext::default());
    let saved = runner.artifacts().list_results().unwrap();
    assert_eq!(saved.len(), 1);

    let name = saved[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("test-result-") && name.ends_with(".json"), "{}", name);
    assert_eq!(runner.artifacts().load_summary(&saved[0]).unwrap(), summary);
}
