//! Plan generation: prompt construction, one inference call, and tolerant
//! parsing of whatever text comes back.

use std::fmt::Write as _;

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::types::{ActionKind, ActionPlan, ActionStep, StepSequence, TestContext};
use crate::config::{InferenceSettings, PlannerSettings};
use crate::inference::{InferenceClient, InferenceRequest, InferenceResult};

/// Reasoning used when the model gives none
pub const DEFAULT_REASONING: &str = "Test steps generated";

/// Screenshot label of the fallback plan when the response holds no JSON object
pub const NO_JSON_LABEL: &str = "fallback-test";

/// Screenshot label of the fallback plan when no JSON object could be parsed
pub const PARSE_ERROR_LABEL: &str = "error-fallback";

/// Turns natural-language test descriptions into action plans
pub struct PlanGenerator {
    client: Box<dyn InferenceClient>,
    settings: InferenceSettings,
    default_base_url: String,
}

impl PlanGenerator {
    pub fn new(client: Box<dyn InferenceClient>, inference: &InferenceSettings, planner: &PlannerSettings) -> Self {
        Self {
            client,
            settings: inference.clone(),
            default_base_url: planner.default_base_url.clone(),
        }
    }

    /// Model identifier sent with every request
    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Generate a plan for `description`.
    ///
    /// Only transport failures are errors; unusable model output yields the
    /// fallback plan.
    pub fn generate(&self, description: &str, context: &TestContext) -> InferenceResult<ActionPlan> {
        let prompt = build_prompt(description, context);
        let request = InferenceRequest::from_settings(&self.settings, prompt);

        info!(model = %request.model, description, "requesting action plan");
        let raw = self.client.complete(&request)?;
        debug!(response_len = raw.len(), "received model response");

        Ok(parse_plan_response(&raw, &self.settings.model, &self.default_base_url))
    }
}

/// Prompt for one test description
pub fn build_prompt(description: &str, context: &TestContext) -> String {
    let mut prompt = String::new();
    let creds = &context.credentials;

    let _ = writeln!(
        prompt,
        "You are an expert in automated web testing. Turn the test description below into \
         browser actions for the site at {}.",
        context.base_url
    );
    prompt.push_str("\nCONTEXT:\n");
    let _ = writeln!(prompt, "- Base URL: {}", context.base_url);
    let _ = writeln!(prompt, "- Username: {}", creds.username);
    let _ = writeln!(prompt, "- Password: {}", creds.password);

    let _ = writeln!(prompt, "\nTEST DESCRIPTION: \"{}\"", description);
    prompt.push_str("\nIMPORTANT: answer ONLY with valid JSON, no extra text.\n");

    prompt.push_str("\nResponse format:\n");
    prompt.push_str(&example_plan(context));
    prompt.push('\n');

    prompt.push_str("\nAvailable actions:\n");
    for kind in ActionKind::all() {
        let _ = writeln!(prompt, "- {}: {}", kind, action_usage(*kind));
    }
    prompt.push_str(
        "\nEvery step may set \"critical\": false when the test should continue if that step fails.\n",
    );

    if !context.selector_hints.is_empty() {
        prompt.push_str("\nKnown selectors:\n");
        for (name, selector) in &context.selector_hints {
            let _ = writeln!(prompt, "- {}: {}", name, selector);
        }
    }

    prompt.push_str("\nGenerate ONLY the JSON for this test:");
    prompt
}

fn action_usage(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Navigate => "open a URL (value: URL)",
        ActionKind::Click => "click an element (selector)",
        ActionKind::Fill => "type into a text field (selector, value: text)",
        ActionKind::Press => "press a key (value: key name, optional selector)",
        ActionKind::Wait => "wait for an element (selector) or a time (value: milliseconds)",
        ActionKind::Screenshot => "capture the page (optional value: label)",
        ActionKind::Scroll => "scroll an element into view (selector) or scroll the page down",
        ActionKind::Verify => {
            "check an element (selector, options: {\"visible\": bool} | {\"enabled\": bool} | {\"text\": \"expected\"})"
        }
        ActionKind::Select => "choose a dropdown option (selector, value: option)",
        ActionKind::Hover => "move the mouse over an element (selector)",
    }
}

/// Worked login example using the context's own selectors where known
fn example_plan(context: &TestContext) -> String {
    let hint = |name: &str, fallback: &str| {
        context
            .selector_hints
            .get(name)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };

    let example = json!({
        "reasoning": "short explanation of what the test does",
        "steps": [
            {"action": "navigate", "value": context.base_url},
            {"action": "fill", "selector": hint("Username", "#username"), "value": context.credentials.username},
            {"action": "fill", "selector": hint("Password", "#password"), "value": context.credentials.password},
            {"action": "click", "selector": hint("Login button", "button[type=\"submit\"]")},
            {"action": "verify", "selector": hint("Inventory", "main"), "options": {"visible": true}}
        ]
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

/// Turn raw model text into a plan. Never fails.
///
/// The first top-level balanced `{...}` block that parses as a JSON object wins,
/// preferring one that carries `steps` or `reasoning`.
pub fn parse_plan_response(raw: &str, model: &str, fallback_url: &str) -> ActionPlan {
    let mut first_error = None;
    let mut first_object = None;
    let mut candidates = 0usize;

    for candidate in json_candidates(raw) {
        candidates += 1;
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(object)) => {
                if object.contains_key("steps") || object.contains_key("reasoning") {
                    first_object = Some(object);
                    break;
                }
                first_object.get_or_insert(object);
            }
            Ok(_) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    let mut plan = match (first_object, first_error) {
        (Some(object), _) => plan_from_object(object, model),
        (None, Some(e)) => {
            warn!(error = %e, candidates, "model response did not parse, using fallback plan");
            fallback_plan(
                fallback_url,
                PARSE_ERROR_LABEL,
                format!("Fallback plan: could not parse the model response ({})", e),
                model,
            )
        }
        (None, None) => {
            warn!("no JSON object in model response, using fallback plan");
            fallback_plan(
                fallback_url,
                NO_JSON_LABEL,
                "Fallback plan: the model response contained no JSON object",
                model,
            )
        }
    };
    plan.raw_response = Some(raw.to_string());
    plan
}

/// Navigate to `url`, then take one screenshot labelled `label`
pub fn fallback_plan(url: &str, label: &str, reasoning: impl Into<String>, model: &str) -> ActionPlan {
    ActionPlan::new(
        vec![ActionStep::new("navigate").value(url), ActionStep::new("screenshot").value(label)],
        reasoning,
        model,
    )
}

fn plan_from_object(mut object: Map<String, Value>, model: &str) -> ActionPlan {
    let reasoning = match object.remove("reasoning") {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        _ => DEFAULT_REASONING.to_string(),
    };

    let steps = read_steps(object.remove("steps"));
    if let StepSequence::Invalid { reason } = &steps {
        warn!(reason = %reason, "model returned a malformed step list");
    }

    ActionPlan {
        steps,
        reasoning,
        model: model.to_string(),
        raw_response: None,
    }
}

fn read_steps(steps: Option<Value>) -> StepSequence {
    let items = match steps {
        None | Some(Value::Null) => return StepSequence::Valid(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return StepSequence::Invalid {
                reason: format!("'steps' is not an array: {}", other),
            };
        }
    };

    let mut parsed = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        if !item.get("action").is_some_and(Value::is_string) {
            return StepSequence::Invalid {
                reason: format!("step {} has no string 'action': {}", i + 1, item),
            };
        }
        match serde_json::from_value::<ActionStep>(item) {
            Ok(step) => parsed.push(step),
            Err(e) => {
                return StepSequence::Invalid {
                    reason: format!("step {} is malformed: {}", i + 1, e),
                };
            }
        }
    }
    StepSequence::Valid(parsed)
}

/// Balanced-brace substrings in order of their opening brace.
///
/// Braces inside JSON string literals (with escapes) do not count. Openings
/// without a matching close yield nothing.
fn json_candidates(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = 0usize;
    std::iter::from_fn(move || {
        let start = rest + text[rest..].find('{')?;
        // An unclosed brace swallows the rest of the text, nested blocks included
        let len = balanced_end(&text[start..])?;
        rest = start + len;
        Some(&text[start..rest])
    })
}

/// Byte length of the balanced block at the start of `text`
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
