//! Text-generation client
//!
//! `GeminiClient` speaks the Google Generative Language REST API. The request
//! carries a system instruction, the user input, optional chat history, and a
//! response MIME hint so JSON-schema answers can be parsed reliably.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Expected shape of the collaborator's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Free-form prose
    Text,
    /// A single JSON value
    Json,
}

impl ResponseFormat {
    fn mime_type(self) -> &'static str {
        match self {
            ResponseFormat::Text => "text/plain",
            ResponseFormat::Json => "application/json",
        }
    }
}

/// A single request to the text-generation collaborator
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System instruction (persona, memory block, schema description)
    pub system: String,
    /// The user-turn input
    pub input: String,
    /// Prior (user, assistant) turns, oldest first
    pub history: Vec<(String, String)>,
    /// Expected response shape
    pub format: ResponseFormat,
}

impl GenerationRequest {
    /// Build a request with no history
    pub fn new(system: impl Into<String>, input: impl Into<String>, format: ResponseFormat) -> Self {
        Self {
            system: system.into(),
            input: input.into(),
            history: Vec::new(),
            format,
        }
    }

    /// Attach prior conversation turns
    pub fn with_history(mut self, history: Vec<(String, String)>) -> Self {
        self.history = history;
        self
    }
}

/// The external text-generation collaborator.
///
/// Implementations must treat the request as the complete context; the
/// engine never relies on server-side conversation state.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply for the given request
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

/// Invoke the collaborator with a deadline.
///
/// On timeout the call maps to [`Error::CollaboratorTimeout`]; callers fall
/// back to their no-op behavior (empty candidate list, no merge, no context)
/// rather than failing the turn.
pub async fn generate_with_timeout(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
    timeout_secs: u64,
) -> Result<String> {
    match tokio::time::timeout(Duration::from_secs(timeout_secs), generator.generate(request)).await
    {
        Ok(result) => result,
        Err(_) => Err(Error::CollaboratorTimeout(timeout_secs)),
    }
}

/// Gemini REST API client
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model_name: String,
    max_output_tokens: u32,
}

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

impl GeminiClient {
    /// Create a client for the given model
    pub fn new(api_key: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model_name: model_name.into(),
            max_output_tokens: 8192,
        }
    }

    /// Override the output token cap
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }
}

#[derive(Serialize)]
struct ApiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiClient {
    fn build_body(&self, request: &GenerationRequest) -> ApiRequest {
        let mut contents = Vec::with_capacity(request.history.len() * 2 + 1);
        for (user, model) in &request.history {
            contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: user.clone() }],
            });
            contents.push(Content {
                role: Some("model".to_string()),
                parts: vec![Part { text: model.clone() }],
            });
        }
        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: request.input.clone(),
            }],
        });

        ApiRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system.clone(),
                }],
            },
            contents,
            generation_config: GenerationConfig {
                temperature: 1.0,
                top_p: 0.95,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: request.format.mime_type().to_string(),
            },
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            API_BASE, self.model_name, self.api_key
        );
        let body = self.build_body(&request);

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Collaborator(format!(
                "generation API returned {}: {}",
                status, detail
            )));
        }

        let parsed: ApiResponse = response.json().await?;
        let text = parsed
            .candidates
            .and_then(|mut c| if c.is_empty() { None } else { Some(c.remove(0)) })
            .and_then(|c| c.content)
            .and_then(|mut c| {
                if c.parts.is_empty() {
                    None
                } else {
                    Some(c.parts.remove(0).text)
                }
            })
            .ok_or_else(|| Error::Collaborator("empty generation response".to_string()))?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowGenerator;

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            Ok(request.input)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_collaborator_timeout() {
        let generator = SlowGenerator;
        let request = GenerationRequest::new("system", "input", ResponseFormat::Text);

        let result = generate_with_timeout(&generator, request, 5).await;
        assert!(matches!(result, Err(Error::CollaboratorTimeout(5))));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let generator = EchoGenerator;
        let request = GenerationRequest::new("system", "hello", ResponseFormat::Text);

        let result = generate_with_timeout(&generator, request, 5).await.unwrap();
        assert_eq!(result, "hello");
    }

    #[test]
    fn test_request_body_shape() {
        let client = GeminiClient::new("key", "gemini-1.5-flash");
        let request = GenerationRequest::new("sys", "question", ResponseFormat::Json)
            .with_history(vec![("hi".to_string(), "hello".to_string())]);

        let body = client.build_body(&request);
        assert_eq!(body.contents.len(), 3);
        assert_eq!(body.contents[0].role.as_deref(), Some("user"));
        assert_eq!(body.contents[1].role.as_deref(), Some("model"));
        assert_eq!(body.contents[2].parts[0].text, "question");
        assert_eq!(
            body.generation_config.response_mime_type,
            "application/json"
        );
    }
}
