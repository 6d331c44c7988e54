//! Action plans and their generation.
//!
//! - [`types`]: wire steps, the typed [`Action`] vocabulary and test context
//! - [`generator`]: prompt building and tolerant parsing of model output

pub mod generator;
pub mod types;

pub use generator::{PlanGenerator, build_prompt, fallback_plan, parse_plan_response};
pub use types::{
    Action, ActionError, ActionKind, ActionPlan, ActionStep, Credentials, SAMPLE_DESCRIPTIONS, StepOptions, StepSequence,
    TestContext, TextOption, Verification, WaitTarget,
};
