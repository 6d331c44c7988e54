//! nl-webtest - natural-language web testing.
//!
//! A test description in plain language goes to a text-generation service,
//! which answers with an action plan. The plan is executed step by step in a
//! browser session, and the outcome is summarized per run and per batch.
//!
//! This crate provides:
//! - Plan generation with tolerant parsing of model output ([`plan`])
//! - Ollama and OpenAI-compatible inference clients ([`inference`])
//! - Step execution against a [`browser::BrowserSession`] ([`executor`])
//! - An in-memory browser for tests and a Chromium backend (`chromium` feature)
//! - Run and batch coordination with persisted results ([`runner`], [`artifacts`])
//!
//! # Example
//!
//! ```rust,no_run
//! use nl_webtest::{Config, HttpInferenceClient, MockLauncher, MockPage, PlanGenerator, TestContext, TestRunner};
//!
//! let config = Config::from_env();
//! let client = HttpInferenceClient::new(&config.inference).unwrap();
//! let generator = PlanGenerator::new(Box::new(client), &config.inference, &config.planner);
//! let runner = TestRunner::new(generator, Box::new(MockLauncher::new(MockPage::new())), &config);
//!
//! let summary = runner.run_one("log in and check the product list", &TestContext::default());
//! println!("{}", summary);
//! ```

pub mod artifacts;
pub mod browser;
pub mod config;
pub mod executor;
pub mod inference;
pub mod plan;
pub mod report;
pub mod runner;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use browser::{BrowserError, BrowserLauncher, BrowserSession, MockLauncher, MockPage};
pub use config::Config;
pub use executor::{StepError, StepExecutor};
pub use inference::{HttpInferenceClient, InferenceClient, InferenceError};
pub use plan::{ActionPlan, ActionStep, PlanGenerator, TestContext};
pub use report::{BatchSummary, ExecutionReport, RunSummary, StepResult};
pub use runner::{RunError, TestRunner};

#[cfg(feature = "chromium")]
pub use browser::ChromiumLauncher;
