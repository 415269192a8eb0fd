//! Chat-completions client used as the `LanguageModel` in production.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ClassifierError, LanguageModel};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct OpenAiModel {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiModel {
    pub fn new(config: OpenAiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<String, ClassifierError> {
        let request = ChatRequest {
            model: &self.config.model,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_text,
                },
            ],
        };

        log::debug!(
            "Sending classification request to {} (model {}, {} chars)",
            self.config.base_url,
            self.config.model,
            user_text.chars().count()
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Unavailable(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(request_error)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ClassifierError::EmptyResponse)
    }
}

fn request_error(err: reqwest::Error) -> ClassifierError {
    if err.is_timeout() {
        ClassifierError::Timeout
    } else {
        ClassifierError::Unavailable(err.to_string())
    }
}
