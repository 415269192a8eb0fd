//! Turns one free-text message into a validated `Intent`.
//!
//! The adapter never touches the ledger and never computes totals. Any
//! failure (model unreachable, unparsable output, schema violation) ends
//! as an `Intent::Conversation` carrying a cause-specific message.

pub mod openai;
pub mod prompt;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::intent::{Intent, ValidationError};
pub use prompt::PromptContext;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("language model unavailable: {0}")]
    Unavailable(String),
    #[error("language model timed out")]
    Timeout,
    #[error("language model returned no content")]
    EmptyResponse,
    #[error("model output is not valid JSON: {0}")]
    Malformed(String),
    #[error("model output failed validation: {0}")]
    Invalid(#[from] ValidationError),
}

impl ClassifierError {
    /// User-facing text for this failure
    pub fn user_message(&self) -> &'static str {
        match self {
            ClassifierError::Unavailable(_) | ClassifierError::Timeout => {
                "⚠️ المساعد الذكي غير متاح حالياً. حاول مرة ثانية بعد قليل."
            }
            ClassifierError::EmptyResponse | ClassifierError::Malformed(_) => {
                "❓ ما فهمت الرسالة. حاول تعيد صياغتها، مثلاً: \"بعت بيض بـ 200\" أو اكتب /help"
            }
            ClassifierError::Invalid(_) => {
                "❓ الرسالة ناقصة. حدد البند والمبلغ بوضوح، مثلاً: \"صرفنا على الأعلاف 800\""
            }
        }
    }
}

/// External language model: system prompt + user text in, JSON text out
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_json(&self, system_prompt: &str, user_text: &str)
    -> Result<String, ClassifierError>;
}

pub struct Classifier {
    model: Arc<dyn LanguageModel>,
}

impl Classifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Classify a message; never fails, falls back to a conversation reply
    pub async fn classify(&self, text: &str, context: &PromptContext<'_>) -> Intent {
        match self.try_classify(text, context).await {
            Ok(intent) => intent,
            Err(err) => {
                log::warn!("Classification fell back to conversation: {}", err);
                Intent::Conversation {
                    reply: err.user_message().to_string(),
                }
            }
        }
    }

    pub async fn try_classify(
        &self,
        text: &str,
        context: &PromptContext<'_>,
    ) -> Result<Intent, ClassifierError> {
        let raw = self
            .model
            .complete_json(&context.system_prompt(), text)
            .await?;
        log::debug!("Model output: {}", raw);
        parse_intent(&raw)
    }
}

/// Strict parse first, then the first balanced top-level `{...}` span
pub fn parse_intent(raw: &str) -> Result<Intent, ClassifierError> {
    if raw.trim().is_empty() {
        return Err(ClassifierError::EmptyResponse);
    }
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(strict_err) => {
            let span = first_object_span(raw)
                .ok_or_else(|| ClassifierError::Malformed(strict_err.to_string()))?;
            serde_json::from_str::<Value>(span)
                .map_err(|e| ClassifierError::Malformed(e.to_string()))?
        }
    };
    Ok(Intent::from_json(&value)?)
}

/// Locate the first balanced `{...}` in `raw`, skipping braces inside strings
fn first_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in raw[start..].char_indices() {
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
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use super::*;
    use crate::{intent::Metric, period::Period};

    /// Returns canned responses in order and records what it was asked
    pub struct ScriptedModel {
        responses: Mutex<Vec<Result<String, ClassifierError>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(responses: Vec<Result<String, ClassifierError>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(responses: &[&str]) -> Self {
            Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete_json(
            &self,
            _system_prompt: &str,
            user_text: &str,
        ) -> Result<String, ClassifierError> {
            self.calls.lock().unwrap().push(user_text.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(ClassifierError::EmptyResponse))
        }
    }

    fn context() -> PromptContext<'static> {
        PromptContext {
            today: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            recent: Vec::new(),
        }
    }

    #[test]
    fn test_parse_strict_json() {
        let intent = parse_intent(r#"{"intent":"report","period":"all","metric":"income"}"#).unwrap();
        assert_eq!(
            intent,
            Intent::Report {
                period: Period::All,
                metric: Metric::Income,
                filter: None
            }
        );
    }

    #[test]
    fn test_parse_embedded_object() {
        let raw = "Sure! Here is the JSON:\n```json\n{\"intent\":\"inventory\",\"note\":\"a } in a string\"}\n```";
        assert_eq!(parse_intent(raw).unwrap(), Intent::Inventory);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_intent("I cannot help with that"),
            Err(ClassifierError::Malformed(_))
        ));
        assert!(matches!(
            parse_intent("{\"intent\": \"report\""),
            Err(ClassifierError::Malformed(_))
        ));
        assert!(matches!(parse_intent("   "), Err(ClassifierError::EmptyResponse)));
    }

    #[test]
    fn test_parse_missing_required_field() {
        assert!(matches!(
            parse_intent(r#"{"intent":"record_transaction","direction":"income","item":"بيض"}"#),
            Err(ClassifierError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_falls_back_on_malformed_output() {
        let model = Arc::new(ScriptedModel::replying(&["not json at all"]));
        let classifier = Classifier::new(model.clone());
        let intent = classifier.classify("بعت بيض", &context()).await;
        match intent {
            Intent::Conversation { reply } => assert!(reply.contains("ما فهمت")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_classify_falls_back_on_model_failure() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ClassifierError::Timeout)]));
        let classifier = Classifier::new(model);
        let intent = classifier.classify("كم الربح؟", &context()).await;
        match intent {
            Intent::Conversation { reply } => assert!(reply.contains("غير متاح")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_classify_falls_back_on_invalid_intent() {
        let model = Arc::new(ScriptedModel::replying(&[
            r#"{"intent":"record_transaction","direction":"income","item":"بيض","amount":-3}"#,
        ]));
        let classifier = Classifier::new(model);
        let intent = classifier.classify("بعت بيض", &context()).await;
        assert!(matches!(intent, Intent::Conversation { .. }));
    }
}
