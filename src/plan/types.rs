use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::DEFAULT_BASE_URL;

/// One instruction as emitted by the plan generator
///
/// The action kind stays a plain string here: an unknown kind only fails
/// when the step is reached, see [`Action::from_step`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    /// Action kind (case-insensitive, aliases allowed)
    pub action: String,

    /// CSS selector of the target element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// URL, text, key, duration or label depending on the action
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,

    /// Verification modifiers
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "StepOptions::is_empty"
    )]
    pub options: StepOptions,

    /// `Some(false)` lets the plan continue after this step fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,
}

impl ActionStep {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            selector: None,
            value: None,
            options: StepOptions::default(),
            critical: None,
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = Some(critical);
        self
    }

    pub fn options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether a failure of this step halts the plan
    pub fn is_critical(&self, default: bool) -> bool {
        self.critical.unwrap_or(default)
    }

    /// Short one-line description (action plus selector or value)
    pub fn describe(&self) -> String {
        match (&self.selector, &self.value) {
            (Some(selector), _) => format!("{} {}", self.action, selector),
            (None, Some(value)) => format!("{} {}", self.action, value),
            (None, None) => self.action.clone(),
        }
    }
}

/// Verification modifiers; unknown keys are kept in `extra` and ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOptions {
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOption>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StepOptions {
    pub fn is_empty(&self) -> bool {
        self.visible.is_none() && self.enabled.is_none() && self.text.is_none() && self.extra.is_empty()
    }

    pub fn visible(visible: bool) -> Self {
        Self {
            visible: Some(visible),
            ..Self::default()
        }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn text(expected: impl Into<String>) -> Self {
        Self {
            text: Some(TextOption::Expected(expected.into())),
            ..Self::default()
        }
    }
}

/// `options.text`: either the expected substring, or `true` to use the step value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOption {
    Flag(bool),
    Expected(String),
}

/// Closed set of action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    Press,
    Wait,
    Screenshot,
    Scroll,
    Verify,
    Select,
    Hover,
}

impl ActionKind {
    /// Resolve a raw kind, case-insensitively, including aliases
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "navigate" | "goto" => Some(ActionKind::Navigate),
            "click" => Some(ActionKind::Click),
            "fill" | "type" => Some(ActionKind::Fill),
            "press" => Some(ActionKind::Press),
            "wait" => Some(ActionKind::Wait),
            "screenshot" => Some(ActionKind::Screenshot),
            "scroll" => Some(ActionKind::Scroll),
            "verify" | "assert" => Some(ActionKind::Verify),
            "select" => Some(ActionKind::Select),
            "hover" => Some(ActionKind::Hover),
            _ => None,
        }
    }

    /// Returns all action kinds.
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Navigate,
            ActionKind::Click,
            ActionKind::Fill,
            ActionKind::Press,
            ActionKind::Wait,
            ActionKind::Screenshot,
            ActionKind::Scroll,
            ActionKind::Verify,
            ActionKind::Select,
            ActionKind::Hover,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Press => "press",
            ActionKind::Wait => "wait",
            ActionKind::Screenshot => "screenshot",
            ActionKind::Scroll => "scroll",
            ActionKind::Verify => "verify",
            ActionKind::Select => "select",
            ActionKind::Hover => "hover",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step could not be turned into an [`Action`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("{action} requires a {field}")]
    MissingField { action: ActionKind, field: &'static str },
}

/// `wait` either polls for a selector or sleeps
#[derive(Debug, Clone, PartialEq)]
pub enum WaitTarget {
    Selector(String),
    /// Milliseconds; `None` means the configured default
    Sleep(Option<u64>),
}

/// What a `verify` step checks, in priority order
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Element text contains the substring
    Text(String),
    Visible(bool),
    Enabled(bool),
    /// Element exists
    Present,
}

/// A validated step, carrying exactly the fields its kind needs
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate { url: String },
    Click { selector: String },
    Fill { selector: String, value: String },
    Press { selector: Option<String>, key: String },
    Wait(WaitTarget),
    Screenshot { label: Option<String> },
    Scroll { selector: Option<String> },
    Select { selector: String, value: String },
    Hover { selector: String },
    Verify { selector: String, check: Verification },
}

impl Action {
    /// Validate a wire step
    pub fn from_step(step: &ActionStep) -> Result<Self, ActionError> {
        let kind = ActionKind::parse(&step.action)
            .ok_or_else(|| ActionError::UnknownAction(step.action.clone()))?;

        let selector = non_empty(step.selector.as_deref());
        let value = non_empty(step.value.as_deref());
        // Typed text and option labels are passed through untouched
        let verbatim = step.value.clone();
        let require = |field: Option<String>, name: &'static str| {
            field.ok_or(ActionError::MissingField { action: kind, field: name })
        };

        let action = match kind {
            ActionKind::Navigate => Action::Navigate {
                // Generators sometimes put the URL in the selector slot
                url: require(value.or(selector), "URL value")?,
            },
            ActionKind::Click => Action::Click {
                selector: require(selector, "selector")?,
            },
            ActionKind::Fill => Action::Fill {
                selector: require(selector, "selector")?,
                value: require(verbatim, "value")?,
            },
            ActionKind::Press => Action::Press {
                selector,
                key: require(value, "key value")?,
            },
            ActionKind::Wait => match selector {
                Some(selector) => Action::Wait(WaitTarget::Selector(selector)),
                None => Action::Wait(WaitTarget::Sleep(value.as_deref().and_then(parse_millis))),
            },
            ActionKind::Screenshot => Action::Screenshot { label: value },
            ActionKind::Scroll => Action::Scroll { selector },
            ActionKind::Select => Action::Select {
                selector: require(selector, "selector")?,
                value: require(verbatim, "value")?,
            },
            ActionKind::Hover => Action::Hover {
                selector: require(selector, "selector")?,
            },
            ActionKind::Verify => {
                let selector = require(selector, "selector")?;
                let check = match &step.options.text {
                    Some(TextOption::Expected(text)) if !text.is_empty() => Verification::Text(text.clone()),
                    Some(TextOption::Flag(true)) => Verification::Text(require(
                        verbatim.filter(|v| !v.is_empty()),
                        "value with the expected text",
                    )?),
                    _ => match (step.options.visible, step.options.enabled) {
                        (Some(visible), _) => Verification::Visible(visible),
                        (None, Some(enabled)) => Verification::Enabled(enabled),
                        (None, None) => Verification::Present,
                    },
                };
                Action::Verify { selector, check }
            }
        };
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Click { .. } => ActionKind::Click,
            Action::Fill { .. } => ActionKind::Fill,
            Action::Press { .. } => ActionKind::Press,
            Action::Wait(_) => ActionKind::Wait,
            Action::Screenshot { .. } => ActionKind::Screenshot,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::Select { .. } => ActionKind::Select,
            Action::Hover { .. } => ActionKind::Hover,
            Action::Verify { .. } => ActionKind::Verify,
        }
    }
}

fn non_empty(field: Option<&str>) -> Option<String> {
    field.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Leading digits of `raw` ("1500", "1500ms"); zero counts as unset
fn parse_millis(raw: &str) -> Option<u64> {
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|ms| *ms > 0)
}

/// Steps of a plan, or the reason the generator output had none usable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepSequence {
    Valid(Vec<ActionStep>),
    Invalid { reason: String },
}

/// Ordered action plan produced by the plan generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub steps: StepSequence,
    pub reasoning: String,
    pub model: String,
    /// Unparsed service output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl ActionPlan {
    /// Plan with a valid step list
    pub fn new(steps: Vec<ActionStep>, reasoning: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            steps: StepSequence::Valid(steps),
            reasoning: reasoning.into(),
            model: model.into(),
            raw_response: None,
        }
    }

    /// The steps, if the sequence is valid
    pub fn steps(&self) -> Option<&[ActionStep]> {
        match &self.steps {
            StepSequence::Valid(steps) => Some(steps),
            StepSequence::Invalid { .. } => None,
        }
    }

    /// Number of usable steps (zero for an invalid sequence)
    pub fn len(&self) -> usize {
        self.steps().map(<[ActionStep]>::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Login credentials of the application under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where and as whom a test runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestContext {
    pub base_url: String,
    pub credentials: Credentials,
    /// Named selectors the generator should prefer
    #[serde(default)]
    pub selector_hints: BTreeMap<String, String>,
}

impl TestContext {
    /// Context with no selector hints
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: Credentials {
                username: username.into(),
                password: password.into(),
            },
            selector_hints: BTreeMap::new(),
        }
    }

    pub fn with_hint(mut self, name: impl Into<String>, selector: impl Into<String>) -> Self {
        self.selector_hints.insert(name.into(), selector.into());
        self
    }
}

impl Default for TestContext {
    /// The SauceDemo storefront with its standard user
    fn default() -> Self {
        [
            ("Username", "[data-test=\"username\"]"),
            ("Password", "[data-test=\"password\"]"),
            ("Login button", "[data-test=\"login-button\"]"),
            ("Inventory", ".inventory_list"),
            ("Product items", ".inventory_item"),
            ("Add to cart buttons", "[data-test^=\"add-to-cart\"]"),
            ("Cart icon", ".shopping_cart_link"),
            ("Cart badge", ".shopping_cart_badge"),
            ("Checkout button", "[data-test=\"checkout\"]"),
            ("First name", "[data-test=\"firstName\"]"),
            ("Last name", "[data-test=\"lastName\"]"),
            ("Postal code", "[data-test=\"postalCode\"]"),
            ("Continue button", "[data-test=\"continue\"]"),
            ("Finish button", "[data-test=\"finish\"]"),
            ("Menu button", "#react-burger-menu-btn"),
            ("Logout link", "#logout_sidebar_link"),
        ]
        .into_iter()
        .fold(
            TestContext::new(DEFAULT_BASE_URL, "standard_user", "secret_sauce"),
            |ctx, (name, selector)| ctx.with_hint(name, selector),
        )
    }
}

/// Sample descriptions for the default context, grouped by area
pub const SAMPLE_DESCRIPTIONS: &[(&str, &[&str])] = &[
    (
        "Authentication",
        &["login to saucedemo", "login with standard user credentials", "logout from the application"],
    ),
    (
        "Shopping cart",
        &["add backpack to cart", "add 3 items to cart", "remove item from cart", "verify cart has 2 items"],
    ),
    (
        "Checkout",
        &[
            "complete checkout process",
            "fill checkout form with fake data",
            "complete purchase with John Doe info",
        ],
    ),
    (
        "Verification",
        &[
            "verify login page loads correctly",
            "check inventory page shows 6 products",
            "verify user is logged in",
        ],
    ),
    (
        "Navigation",
        &["go to inventory page", "open product details for backpack", "navigate to cart page"],
    ),
    (
        "Combined",
        &[
            "login and add backpack to cart",
            "complete full purchase flow with test data",
            "login, add 2 items, and checkout",
        ],
    ),
];

/// Accept strings, numbers and booleans; stringify the latter two
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string, number or boolean, got {}",
            other
        ))),
    }
}

/// Accept booleans and their string spellings
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(serde::de::Error::custom(format!("expected a boolean, got \"{}\"", s))),
        },
        Some(other) => Err(serde::de::Error::custom(format!("expected a boolean, got {}", other))),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn step(value: Value) -> ActionStep {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_action_kind_aliases_case_insensitive() {
        assert_eq!(ActionKind::parse("GoTo"), Some(ActionKind::Navigate));
        assert_eq!(ActionKind::parse("type"), Some(ActionKind::Fill));
        assert_eq!(ActionKind::parse("ASSERT"), Some(ActionKind::Verify));
        assert_eq!(ActionKind::parse(" hover "), Some(ActionKind::Hover));
        assert_eq!(ActionKind::parse("drag"), None);
        assert_eq!(ActionKind::all().len(), 10);
    }

    #[test]
    fn test_step_deserializes_numeric_value_and_null_options() {
        let s = step(json!({"action": "wait", "value": 1500, "options": null}));
        assert_eq!(s.value.as_deref(), Some("1500"));
        assert!(s.options.is_empty());
        assert_eq!(Action::from_step(&s).unwrap(), Action::Wait(WaitTarget::Sleep(Some(1500))));
    }

    #[test]
    fn test_options_keep_unknown_keys() {
        let s = step(json!({
            "action": "verify",
            "selector": ".inventory_list",
            "options": {"visible": "true", "timeout": 500}
        }));
        assert_eq!(s.options.visible, Some(true));
        assert_eq!(s.options.extra.get("timeout"), Some(&json!(500)));
    }

    #[test]
    fn test_unknown_action_is_lazy() {
        let s = step(json!({"action": "teleport", "selector": "#x"}));
        assert_eq!(
            Action::from_step(&s),
            Err(ActionError::UnknownAction("teleport".to_string()))
        );
    }

    #[test]
    fn test_fill_without_value_is_rejected() {
        let s = ActionStep::new("fill").selector("#user");
        let err = Action::from_step(&s).unwrap_err();
        assert_eq!(err.to_string(), "fill requires a value");
    }

    #[test]
    fn test_fill_value_is_verbatim() {
        let padded = ActionStep::new("fill").selector("#q").value("  two words  ");
        assert_eq!(
            Action::from_step(&padded).unwrap(),
            Action::Fill { selector: "#q".into(), value: "  two words  ".into() }
        );

        // An empty value clears the field
        let empty = ActionStep::new("fill").selector("#q").value("");
        assert_eq!(
            Action::from_step(&empty).unwrap(),
            Action::Fill { selector: "#q".into(), value: String::new() }
        );
    }

    #[test]
    fn test_navigate_falls_back_to_selector() {
        let s = ActionStep::new("goto").selector("https://x");
        assert_eq!(
            Action::from_step(&s).unwrap(),
            Action::Navigate { url: "https://x".to_string() }
        );
    }

    #[test]
    fn test_wait_duration_parsing() {
        assert_eq!(parse_millis("2500ms"), Some(2500));
        assert_eq!(parse_millis("abc"), None);
        assert_eq!(parse_millis("0"), None);
        assert_eq!(
            Action::from_step(&ActionStep::new("wait")).unwrap(),
            Action::Wait(WaitTarget::Sleep(None))
        );
        assert_eq!(
            Action::from_step(&ActionStep::new("wait").selector(".cart")).unwrap(),
            Action::Wait(WaitTarget::Selector(".cart".to_string()))
        );
    }

    #[test]
    fn test_verification_priority() {
        let text_and_visible = ActionStep::new("verify").selector(".title").options(StepOptions {
            text: Some(TextOption::Expected("Products".into())),
            visible: Some(false),
            ..StepOptions::default()
        });
        assert_eq!(
            Action::from_step(&text_and_visible).unwrap(),
            Action::Verify {
                selector: ".title".into(),
                check: Verification::Text("Products".into())
            }
        );

        let text_flag = step(json!({
            "action": "assert", "selector": ".title", "value": "Products", "options": {"text": true}
        }));
        assert!(matches!(
            Action::from_step(&text_flag).unwrap(),
            Action::Verify { check: Verification::Text(t), .. } if t == "Products"
        ));

        let visible_and_enabled = step(json!({
            "action": "verify", "selector": "#b", "options": {"visible": true, "enabled": false}
        }));
        assert!(matches!(
            Action::from_step(&visible_and_enabled).unwrap(),
            Action::Verify { check: Verification::Visible(true), .. }
        ));

        let bare = ActionStep::new("verify").selector("#b");
        assert!(matches!(
            Action::from_step(&bare).unwrap(),
            Action::Verify { check: Verification::Present, .. }
        ));
    }

    #[test]
    fn test_critical_default() {
        assert!(ActionStep::new("click").is_critical(true));
        assert!(!ActionStep::new("click").is_critical(false));
        assert!(!ActionStep::new("click").critical(false).is_critical(true));
    }

    #[test]
    fn test_step_serialization_skips_empty_fields() {
        let s = ActionStep::new("click").selector("#login");
        assert_eq!(serde_json::to_value(&s).unwrap(), json!({"action": "click", "selector": "#login"}));
    }

    #[test]
    fn test_sample_descriptions() {
        assert!(SAMPLE_DESCRIPTIONS.iter().all(|(_, samples)| !samples.is_empty()));
        assert_eq!(SAMPLE_DESCRIPTIONS[0].1[0], "login to saucedemo");
        assert_eq!(SAMPLE_DESCRIPTIONS.iter().map(|(_, s)| s.len()).sum::<usize>(), 19);
    }

    #[test]
    fn test_default_context_is_saucedemo() {
        let ctx = TestContext::default();
        assert_eq!(ctx.base_url, "https://www.saucedemo.com");
        assert_eq!(ctx.credentials.username, "standard_user");
        assert_eq!(ctx.selector_hints.get("Cart badge").map(String::as_str), Some(".shopping_cart_badge"));
    }
}
