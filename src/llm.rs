use crate::error::AppError;
use crate::openai_types::{
    OpenAIBatchResponse, OpenAIErrorResponse, OpenAIMessage, OpenAIPayload, ResponseFormat,
};

use async_trait::async_trait;
use tracing::{debug, error};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const REPLY_MAX_TOKENS: u32 = 150;

pub const EXTRACTION_INSTRUCTION: &str = "Extract key information from the customer response. \
Return a JSON with these fields if present: interest_level (high/medium/low), objections, \
questions, contact_preference (email/phone/none), email, callback_time.";

/// Text generation backend used by the conversation engine.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce the next assistant reply for the given prompt.
    async fn generate(&self, messages: Vec<OpenAIMessage>) -> Result<String, AppError>;

    /// Ask for the structured fields in a single caller utterance; returns the raw
    /// model output, which is expected (but not guaranteed) to be a JSON object.
    async fn extract(&self, utterance: &str) -> Result<String, AppError>;
}

pub struct OpenAIClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl OpenAIClient {
    pub fn new(http_client: reqwest::Client, api_key: Option<String>, model: String) -> Self {
        Self {
            http_client,
            api_key,
            model,
        }
    }

    async fn complete(&self, payload: OpenAIPayload) -> Result<String, AppError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(AppError::Config("OPENAI_API_KEY"))?;
        let resp = self
            .http_client
            .post(OPENAI_CHAT_URL)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send request to OpenAI");
                AppError::Generation(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<OpenAIErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => status.to_string(),
            };
            error!(status=%status, message=%message, "OpenAI returned an error");
            return Err(AppError::Generation(message));
        }

        let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize OpenAI response");
            AppError::Generation(e.to_string())
        })?;
        match &resp.usage {
            Some(usage) => debug!(
                id=%resp.id,
                model=%resp.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "openai completion"
            ),
            None => debug!(id=%resp.id, model=%resp.model, "openai completion"),
        }

        resp.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AppError::Generation("response contained no choices".to_string()))
    }
}

#[async_trait]
impl TextGenerator for OpenAIClient {
    async fn generate(&self, messages: Vec<OpenAIMessage>) -> Result<String, AppError> {
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages,
            max_tokens: Some(REPLY_MAX_TOKENS),
            ..Default::default()
        };
        self.complete(payload).await
    }

    async fn extract(&self, utterance: &str) -> Result<String, AppError> {
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage::new("system", EXTRACTION_INSTRUCTION),
                OpenAIMessage::new("user", utterance),
            ],
            response_format: Some(ResponseFormat::json_object()),
            ..Default::default()
        };
        self.complete(payload).await
    }
}
