//! Inference service client.
//!
//! The plan generator talks to a text-generation service through the
//! [`InferenceClient`] trait. [`HttpInferenceClient`] implements it over HTTP
//! for two wire protocols:
//! - Ollama `POST /api/generate` (non-streaming)
//! - OpenAI-compatible `POST /v1/chat/completions` (non-streaming)
//!
//! Every call is a single blocking request/response exchange. Streaming is
//! never requested, even when the server offers it.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::{InferenceApi, InferenceSettings};

/// Result type for inference operations
pub type InferenceResult<T> = Result<T, InferenceError>;

/// Errors that can occur while talking to the inference service
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The endpoint could not be reached (DNS, refused, timeout)
    #[error("connection failed: {0}")]
    Connection(String),

    /// The service answered with a non-success status
    #[error("inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not what the protocol promises
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            InferenceError::InvalidResponse(e.to_string())
        } else {
            InferenceError::Connection(e.to_string())
        }
    }
}

/// One completion request
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl InferenceRequest {
    /// Build a request for `prompt` using the sampling parameters in `settings`
    pub fn from_settings(settings: &InferenceSettings, prompt: impl Into<String>) -> Self {
        Self {
            model: settings.model.clone(),
            prompt: prompt.into(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
        }
    }
}

/// A text-generation backend
pub trait InferenceClient {
    /// Submit `request` and return the raw generated text
    fn complete(&self, request: &InferenceRequest) -> InferenceResult<String>;
}

impl<F> InferenceClient for F
where
    F: Fn(&InferenceRequest) -> InferenceResult<String>,
{
    fn complete(&self, request: &InferenceRequest) -> InferenceResult<String> {
        self(request)
    }
}

/// HTTP client for Ollama or OpenAI-compatible servers
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: Client,
    endpoint: String,
    api: InferenceApi,
}

impl HttpInferenceClient {
    /// Create a client from settings
    pub fn new(settings: &InferenceSettings) -> InferenceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .build()
            .map_err(|e| InferenceError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: normalize_endpoint(&settings.endpoint),
            api: settings.api,
        })
    }

    /// URL the completion request is posted to
    pub fn completion_url(&self) -> String {
        match self.api {
            InferenceApi::Ollama => format!("{}/api/generate", self.endpoint),
            InferenceApi::OpenAi => self.endpoint.clone(),
        }
    }

    /// Check that the service is reachable.
    ///
    /// For Ollama this lists the installed models via `GET /api/tags`. For
    /// OpenAI-compatible servers any HTTP answer from the host counts as
    /// reachable (an empty list is returned).
    pub fn check_health(&self) -> InferenceResult<Vec<String>> {
        match self.api {
            InferenceApi::Ollama => {
                let url = format!("{}/api/tags", self.endpoint);
                let response = self.client.get(&url).send()?;
                let status = response.status();
                if !status.is_success() {
                    return Err(InferenceError::Status {
                        status: status.as_u16(),
                        body: response.text().unwrap_or_default(),
                    });
                }
                let body: Value = response.json()?;
                Ok(model_names(&body))
            }
            InferenceApi::OpenAi => {
                let url = reqwest::Url::parse(&self.endpoint)
                    .map_err(|e| InferenceError::Connection(format!("bad endpoint: {}", e)))?;
                // Any response (even 4xx/5xx) means the server is up
                self.client.head(url.origin().ascii_serialization()).send()?;
                Ok(Vec::new())
            }
        }
    }
}

impl InferenceClient for HttpInferenceClient {
    fn complete(&self, request: &InferenceRequest) -> InferenceResult<String> {
        let url = self.completion_url();
        let body = match self.api {
            InferenceApi::Ollama => ollama_body(request),
            InferenceApi::OpenAi => openai_body(request),
        };

        debug!(url = %url, model = %request.model, prompt_len = request.prompt.len(), "sending completion request");

        let response = self.client.post(&url).json(&body).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let payload: Value = response.json()?;
        match self.api {
            InferenceApi::Ollama => extract_ollama_text(&payload),
            InferenceApi::OpenAi => extract_chat_text(&payload),
        }
    }
}

/// Request body for Ollama `/api/generate`
fn ollama_body(request: &InferenceRequest) -> Value {
    json!({
        "model": request.model,
        "prompt": request.prompt,
        "stream": false,
        "options": {
            "temperature": request.temperature,
            "top_p": request.top_p,
            "num_predict": request.max_tokens
        }
    })
}

/// Request body for chat completions
fn openai_body(request: &InferenceRequest) -> Value {
    json!({
        "model": request.model,
        "messages": [{
            "role": "user",
            "content": request.prompt
        }],
        "temperature": request.temperature,
        "top_p": request.top_p,
        "max_tokens": request.max_tokens,
        "stream": false
    })
}

fn extract_ollama_text(payload: &Value) -> InferenceResult<String> {
    payload["response"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| InferenceError::InvalidResponse("missing 'response' field".to_string()))
}

fn extract_chat_text(payload: &Value) -> InferenceResult<String> {
    let message = &payload["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("");

    // Thinking models may put everything in reasoning_content
    let text = if content.is_empty() {
        message["reasoning_content"].as_str().unwrap_or("")
    } else {
        content
    };

    if text.is_empty() && message.is_null() {
        return Err(InferenceError::InvalidResponse(
            "missing 'choices[0].message'".to_string(),
        ));
    }
    Ok(text.to_string())
}

fn model_names(tags: &Value) -> Vec<String> {
    tags["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Strip trailing slashes and default to http:// for bare host:port values
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InferenceRequest {
        InferenceRequest {
            model: "llama3.1:8b".to_string(),
            prompt: "hello".to_string(),
            temperature: 0.1,
            top_p: 0.9,
            max_tokens: 1000,
        }
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("http://localhost:11434/"), "http://localhost:11434");
        assert_eq!(normalize_endpoint("127.0.0.1:11434"), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_ollama_body_disables_streaming() {
        let body = ollama_body(&request());
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 1000);
        assert_eq!(body["prompt"], "hello");
    }

    #[test]
    fn test_openai_body_shape() {
        let body = openai_body(&request());
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_extract_chat_text_prefers_content() {
        let payload = json!({"choices": [{"message": {"content": "a", "reasoning_content": "b"}}]});
        assert_eq!(extract_chat_text(&payload).unwrap(), "a");

        let thinking = json!({"choices": [{"message": {"content": "", "reasoning_content": "b"}}]});
        assert_eq!(extract_chat_text(&thinking).unwrap(), "b");

        assert!(extract_chat_text(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_extract_ollama_text_requires_response() {
        assert_eq!(extract_ollama_text(&json!({"response": "ok"})).unwrap(), "ok");
        assert!(extract_ollama_text(&json!({"done": true})).is_err());
    }

    #[test]
    fn test_model_names() {
        let tags = json!({"models": [{"name": "llama3.1:8b"}, {"name": "qwen3"}]});
        assert_eq!(model_names(&tags), vec!["llama3.1:8b", "qwen3"]);
        assert!(model_names(&json!({})).is_empty());
    }

    #[test]
    fn test_closure_client() {
        let client = |req: &InferenceRequest| -> InferenceResult<String> { Ok(req.prompt.to_uppercase()) };
        assert_eq!(client.complete(&request()).unwrap(), "HELLO");
    }
}
