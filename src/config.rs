//! Configuration management with environment variable support.
//!
//! Every tunable of the pipeline lives here and is passed explicitly to the
//! component that needs it; nothing reads the environment after start-up.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `NL_WEBTEST_LLM_ENDPOINT` | Inference service base URL | `http://localhost:11434` |
//! | `NL_WEBTEST_LLM_API` | API flavour (`ollama` or `openai`) | `ollama` |
//! | `NL_WEBTEST_LLM_MODEL` | Model name | `llama3.1:8b` |
//! | `NL_WEBTEST_LLM_TEMPERATURE` | Sampling temperature | `0.1` |
//! | `NL_WEBTEST_LLM_TOP_P` | Nucleus sampling threshold | `0.9` |
//! | `NL_WEBTEST_LLM_MAX_TOKENS` | Maximum output tokens | `1000` |
//! | `NL_WEBTEST_LLM_TIMEOUT` | Request timeout (seconds) | `120` |
//! | `NL_WEBTEST_BASE_URL` | Default base URL, also used by the fallback plan | `https://www.saucedemo.com` |
//! | `NL_WEBTEST_HEADLESS` | Run the browser headless | `false` |
//! | `NL_WEBTEST_STEP_DELAY` | Pause between steps (ms) | `1500` |
//! | `NL_WEBTEST_RUN_PACING` | Pause between batch runs (ms) | `3000` |
//! | `NL_WEBTEST_SCREENSHOT_DIR` | Screenshot directory | `./screenshots` |
//! | `NL_WEBTEST_RESULTS_DIR` | Run result directory | `./test-results` |
//! | `NL_WEBTEST_SAVE_RESULTS` | Persist run summaries | `true` |
//!
//! # Example
//!
//! ```bash
//! # Talk to an OpenAI-compatible server instead of Ollama
//! export NL_WEBTEST_LLM_API=openai
//! export NL_WEBTEST_LLM_ENDPOINT="http://127.0.0.1:8080/v1/chat/completions"
//! export NL_WEBTEST_LLM_MODEL="qwen3"
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default inference endpoint (Ollama)
pub const DEFAULT_LLM_ENDPOINT: &str = "http://localhost:11434";

/// Default model name
pub const DEFAULT_LLM_MODEL: &str = "llama3.1:8b";

/// Default sampling temperature
pub const DEFAULT_LLM_TEMPERATURE: f32 = 0.1;

/// Default nucleus sampling threshold
pub const DEFAULT_LLM_TOP_P: f32 = 0.9;

/// Default output token budget
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 1000;

/// Default inference request timeout (seconds)
pub const DEFAULT_LLM_TIMEOUT: u64 = 120;

/// Default base URL of the application under test
pub const DEFAULT_BASE_URL: &str = "https://www.saucedemo.com";

/// Default navigation timeout (milliseconds)
pub const DEFAULT_NAVIGATION_TIMEOUT: u64 = 30_000;

/// Default element wait timeout for click/fill/select/hover (milliseconds)
pub const DEFAULT_ELEMENT_TIMEOUT: u64 = 10_000;

/// Default timeout for explicit `wait` steps with a selector (milliseconds)
pub const DEFAULT_WAIT_SELECTOR_TIMEOUT: u64 = 15_000;

/// Default timeout for verification reads (milliseconds)
pub const DEFAULT_VERIFY_TIMEOUT: u64 = 5_000;

/// Default sleep for `wait` steps without a selector (milliseconds)
pub const DEFAULT_WAIT_DURATION: u64 = 2_000;

/// Default page scroll offset in pixels
pub const DEFAULT_SCROLL_OFFSET: i64 = 500;

/// Default pause between steps (milliseconds)
pub const DEFAULT_STEP_DELAY: u64 = 1_500;

/// Default pause between batch runs (milliseconds)
pub const DEFAULT_RUN_PACING: u64 = 3_000;

/// Default screenshot directory
pub const DEFAULT_SCREENSHOT_DIR: &str = "./screenshots";

/// Default run result directory
pub const DEFAULT_RESULTS_DIR: &str = "./test-results";

/// Default browser viewport width
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

/// Default browser viewport height
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_LLM_ENDPOINT: &str = "NL_WEBTEST_LLM_ENDPOINT";
pub const ENV_LLM_API: &str = "NL_WEBTEST_LLM_API";
pub const ENV_LLM_MODEL: &str = "NL_WEBTEST_LLM_MODEL";
pub const ENV_LLM_TEMPERATURE: &str = "NL_WEBTEST_LLM_TEMPERATURE";
pub const ENV_LLM_TOP_P: &str = "NL_WEBTEST_LLM_TOP_P";
pub const ENV_LLM_MAX_TOKENS: &str = "NL_WEBTEST_LLM_MAX_TOKENS";
pub const ENV_LLM_TIMEOUT: &str = "NL_WEBTEST_LLM_TIMEOUT";
pub const ENV_BASE_URL: &str = "NL_WEBTEST_BASE_URL";
pub const ENV_HEADLESS: &str = "NL_WEBTEST_HEADLESS";
pub const ENV_STEP_DELAY: &str = "NL_WEBTEST_STEP_DELAY";
pub const ENV_RUN_PACING: &str = "NL_WEBTEST_RUN_PACING";
pub const ENV_SCREENSHOT_DIR: &str = "NL_WEBTEST_SCREENSHOT_DIR";
pub const ENV_RESULTS_DIR: &str = "NL_WEBTEST_RESULTS_DIR";
pub const ENV_SAVE_RESULTS: &str = "NL_WEBTEST_SAVE_RESULTS";

/// Legacy variable honoured for the endpoint (Ollama's own client convention)
pub const ENV_OLLAMA_HOST_LEGACY: &str = "OLLAMA_HOST";

// ============================================================================
// Configuration
// ============================================================================

/// Which wire protocol the inference service speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceApi {
    /// Ollama `/api/generate`
    #[default]
    Ollama,
    /// OpenAI-compatible `/v1/chat/completions`
    OpenAi,
}

impl FromStr for InferenceApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(InferenceApi::Ollama),
            "openai" | "open-ai" | "chat" => Ok(InferenceApi::OpenAi),
            other => Err(format!("unknown inference API '{}' (expected ollama or openai)", other)),
        }
    }
}

impl std::fmt::Display for InferenceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceApi::Ollama => write!(f, "ollama"),
            InferenceApi::OpenAi => write!(f, "openai"),
        }
    }
}

/// Centralized configuration for the whole pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Inference service settings
    pub inference: InferenceSettings,
    /// Plan generator settings
    pub planner: PlannerSettings,
    /// Step executor settings
    pub executor: ExecutorSettings,
    /// Run coordinator settings
    pub runner: RunnerSettings,
    /// Artifact locations
    pub artifacts: ArtifactSettings,
}

/// Inference service settings
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    /// Base URL (Ollama) or full chat-completions URL (OpenAI flavour)
    pub endpoint: String,
    /// Wire protocol
    pub api: InferenceApi,
    /// Model name
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling threshold
    pub top_p: f32,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Whole-request timeout (seconds)
    pub timeout: u64,
}

/// Plan generator settings
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Target of the fallback plan's navigation step
    pub default_base_url: String,
}

/// Step executor settings
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Run the browser without a visible window
    pub headless: bool,
    /// Viewport size in pixels
    pub viewport: (u32, u32),
    /// Navigation timeout
    pub navigation_timeout: Duration,
    /// Wait before click/fill/select/hover
    pub element_timeout: Duration,
    /// Explicit `wait` steps with a selector
    pub wait_selector_timeout: Duration,
    /// Verification reads
    pub verify_timeout: Duration,
    /// Sleep for `wait` steps without selector or value
    pub default_wait: Duration,
    /// Vertical page scroll for `scroll` without selector
    pub scroll_offset: i64,
    /// Pause after every step except the last
    pub step_delay: Duration,
    /// Whether steps without an explicit `critical` flag halt the plan on failure
    pub critical_by_default: bool,
}

/// Run coordinator settings
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Pause between runs of a batch
    pub run_pacing: Duration,
    /// Persist each run summary as JSON
    pub save_results: bool,
}

/// Artifact directories
#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub screenshot_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            inference: InferenceSettings::from_env(),
            planner: PlannerSettings::from_env(),
            executor: ExecutorSettings::from_env(),
            runner: RunnerSettings::from_env(),
            artifacts: ArtifactSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            inference: InferenceSettings::defaults(),
            planner: PlannerSettings::defaults(),
            executor: ExecutorSettings::defaults(),
            runner: RunnerSettings::defaults(),
            artifacts: ArtifactSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl InferenceSettings {
    pub fn from_env() -> Self {
        let defaults = Self::defaults();
        Self {
            endpoint: env::var(ENV_LLM_ENDPOINT)
                .or_else(|_| env::var(ENV_OLLAMA_HOST_LEGACY))
                .unwrap_or(defaults.endpoint),
            api: env_parse(ENV_LLM_API).unwrap_or(defaults.api),
            model: env::var(ENV_LLM_MODEL).unwrap_or(defaults.model),
            temperature: env_parse(ENV_LLM_TEMPERATURE).unwrap_or(defaults.temperature),
            top_p: env_parse(ENV_LLM_TOP_P).unwrap_or(defaults.top_p),
            max_tokens: env_parse(ENV_LLM_MAX_TOKENS).unwrap_or(defaults.max_tokens),
            timeout: env_parse(ENV_LLM_TIMEOUT).unwrap_or(defaults.timeout),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            api: InferenceApi::Ollama,
            model: DEFAULT_LLM_MODEL.to_string(),
            temperature: DEFAULT_LLM_TEMPERATURE,
            top_p: DEFAULT_LLM_TOP_P,
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    /// Point at a different endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn api(mut self, api: InferenceApi) -> Self {
        self.api = api;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

impl PlannerSettings {
    pub fn from_env() -> Self {
        Self {
            default_base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            default_base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl ExecutorSettings {
    pub fn from_env() -> Self {
        let defaults = Self::defaults();
        Self {
            headless: env_parse_bool(ENV_HEADLESS).unwrap_or(defaults.headless),
            step_delay: env_parse(ENV_STEP_DELAY)
                .map(Duration::from_millis)
                .unwrap_or(defaults.step_delay),
            ..defaults
        }
    }

    pub fn defaults() -> Self {
        Self {
            headless: false,
            viewport: (DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT),
            navigation_timeout: Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT),
            element_timeout: Duration::from_millis(DEFAULT_ELEMENT_TIMEOUT),
            wait_selector_timeout: Duration::from_millis(DEFAULT_WAIT_SELECTOR_TIMEOUT),
            verify_timeout: Duration::from_millis(DEFAULT_VERIFY_TIMEOUT),
            default_wait: Duration::from_millis(DEFAULT_WAIT_DURATION),
            scroll_offset: DEFAULT_SCROLL_OFFSET,
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY),
            critical_by_default: true,
        }
    }

    /// Set the pause between steps
    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

impl RunnerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::defaults();
        Self {
            run_pacing: env_parse(ENV_RUN_PACING)
                .map(Duration::from_millis)
                .unwrap_or(defaults.run_pacing),
            save_results: env_parse_bool(ENV_SAVE_RESULTS).unwrap_or(defaults.save_results),
        }
    }

    pub fn defaults() -> Self {
        Self {
            run_pacing: Duration::from_millis(DEFAULT_RUN_PACING),
            save_results: true,
        }
    }

    /// Set the pause between batch runs
    pub fn run_pacing(mut self, pacing: Duration) -> Self {
        self.run_pacing = pacing;
        self
    }

    pub fn save_results(mut self, save: bool) -> Self {
        self.save_results = save;
        self
    }
}

impl ArtifactSettings {
    pub fn from_env() -> Self {
        Self {
            screenshot_dir: env::var(ENV_SCREENSHOT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            results_dir: env::var(ENV_RESULTS_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_RESULTS_DIR)),
        }
    }

    pub fn defaults() -> Self {
        Self {
            screenshot_dir: PathBuf::from(DEFAULT_SCREENSHOT_DIR),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
        }
    }

    /// Both directories below `root` (`screenshots/` and `test-results/`)
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            screenshot_dir: root.join("screenshots"),
            results_dir: root.join("test-results"),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Accepts 1/0, true/false, yes/no, on/off
fn env_parse_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| parse_bool(&s))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_inference_api_from_str() {
        assert_eq!("ollama".parse::<InferenceApi>(), Ok(InferenceApi::Ollama));
        assert_eq!("OpenAI".parse::<InferenceApi>(), Ok(InferenceApi::OpenAi));
        assert!("grpc".parse::<InferenceApi>().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.inference.endpoint, DEFAULT_LLM_ENDPOINT);
        assert_eq!(config.inference.model, DEFAULT_LLM_MODEL);
        assert_eq!(config.inference.max_tokens, 1000);
        assert_eq!(config.planner.default_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.executor.navigation_timeout, Duration::from_secs(30));
        assert_eq!(config.executor.element_timeout, Duration::from_secs(10));
        assert_eq!(config.executor.wait_selector_timeout, Duration::from_secs(15));
        assert_eq!(config.executor.verify_timeout, Duration::from_secs(5));
        assert!(config.executor.critical_by_default);
        assert_eq!(config.runner.run_pacing, Duration::from_secs(3));
        assert_eq!(config.artifacts.results_dir, PathBuf::from("./test-results"));
    }

    #[test]
    fn test_runner_settings_from_env() {
        // SAFETY: no other test reads these variables
        unsafe {
            env::set_var(ENV_RUN_PACING, "250");
            env::set_var(ENV_SAVE_RESULTS, "no");
        }
        let settings = RunnerSettings::from_env();
        unsafe {
            env::remove_var(ENV_RUN_PACING);
            env::remove_var(ENV_SAVE_RESULTS);
        }

        assert_eq!(settings.run_pacing, Duration::from_millis(250));
        assert!(!settings.save_results);
    }

    #[test]
    fn test_default_ignores_environment() {
        // SAFETY: no other test reads this variable
        unsafe { env::set_var(ENV_LLM_MODEL, "from-env") };
        let config = Config::default();
        unsafe { env::remove_var(ENV_LLM_MODEL) };

        assert_eq!(config.inference.model, DEFAULT_LLM_MODEL);
    }

    #[test]
    fn test_artifact_settings_under_root() {
        let settings = ArtifactSettings::under("/tmp/run");
        assert_eq!(settings.screenshot_dir, PathBuf::from("/tmp/run/screenshots"));
        assert_eq!(settings.results_dir, PathBuf::from("/tmp/run/test-results"));
    }

    #[test]
    fn test_inference_settings_builder() {
        let settings = InferenceSettings::defaults()
            .endpoint("http://127.0.0.1:8080/v1/chat/completions")
            .api(InferenceApi::OpenAi)
            .model("qwen3")
            .max_tokens(200);

        assert_eq!(settings.endpoint, "http://127.0.0.1:8080/v1/chat/completions");
        assert_eq!(settings.api, InferenceApi::OpenAi);
        assert_eq!(settings.model, "qwen3");
        assert_eq!(settings.max_tokens, 200);
    }
}
