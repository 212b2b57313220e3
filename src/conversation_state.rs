use crate::consts::{FALLBACK_APOLOGY, HANGUP_PHRASES};
use crate::db_types::{Call, CallOutcome};
use crate::error::AppError;
use crate::llm::TextGenerator;
use crate::openai_types::OpenAIMessage;
use crate::types::ChatTurn;

use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded retry for text generation.  Delays double after every failed attempt.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// What came back from the extraction request for one utterance.
#[derive(Debug, PartialEq)]
pub enum ExtractionResult {
    Fields(Map<String, Value>),
    ParseFailure,
}

impl ExtractionResult {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(Value::Object(fields)) => Self::Fields(fields),
            _ => Self::ParseFailure,
        }
    }
}

/// Hangup policy: the call ends on the turn the reply says goodbye.
pub fn should_hang_up(reply: &str) -> bool {
    let reply = reply.to_lowercase();
    HANGUP_PHRASES.iter().any(|phrase| reply.contains(phrase))
}

/// Product pitch given to the model ahead of the transcript.
pub fn system_prompt() -> String {
    let product_info = serde_json::json!({
        "name": "Call Worklog AI",
        "description": "An AI tool that automatically generates work logs based on your activities",
        "benefits": [
            "Save time by automating work log creation",
            "Ensure accurate documentation of work activities",
            "Improve productivity by focusing on work instead of reporting",
            "Easy integration with existing workflow systems"
        ],
        "pricing": {
            "basic": "$9.99/month",
            "pro": "$19.99/month",
            "enterprise": "Custom pricing"
        }
    });
    format!(
        "You are an AI sales agent for Call Worklog AI, a tool that automatically generates \
work logs based on user activities. Your goal is to introduce the product, explain its \
benefits, answer any questions, and try to make a sale. Be friendly, professional, and \
concise. Don't be pushy but guide the conversation towards a sale.\n\
Product information: {product_info}\n\n\
If the customer shows interest, ask if they'd like to sign up for a free trial. \
If the customer declines or wants to end the call, be polite and end the conversation. \
If the customer asks a question you can't answer, offer to have a product specialist contact them."
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub text: String,
    pub should_end: bool,
}

/// Per-call conversation held for the duration of one turn.  The record store is the
/// source of truth between turns.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub call_sid: String,
    pub customer_id: Option<Uuid>,
    pub conversation_history: Vec<ChatTurn>,
    pub customer_responses: Map<String, Value>,
    pub should_end: bool,
}

impl ConversationState {
    pub fn begin(call_sid: &str, customer_id: Option<Uuid>) -> Self {
        Self {
            call_sid: call_sid.to_string(),
            customer_id,
            conversation_history: vec![],
            customer_responses: Map::new(),
            should_end: false,
        }
    }

    pub fn from_call(call: Call) -> Self {
        Self {
            call_sid: call.call_sid,
            customer_id: call.customer_id,
            conversation_history: call.conversation_history,
            customer_responses: call.customer_responses,
            should_end: call.should_end,
        }
    }

    /// System prompt followed by the whole transcript so far.
    pub fn get_conversation_context(&self) -> Vec<OpenAIMessage> {
        let mut conversation = vec![OpenAIMessage::new("system", system_prompt())];
        conversation.extend(
            self.conversation_history
                .iter()
                .map(|turn| OpenAIMessage::new(turn.role.as_str(), turn.content.clone())),
        );
        conversation
    }

    /// Run one responding step: record the caller's words, refresh the extracted fields,
    /// generate the reply and apply the hangup policy.
    pub async fn advance(
        &mut self,
        generator: &dyn TextGenerator,
        retry_policy: &RetryPolicy,
        utterance: Option<&str>,
    ) -> TurnReply {
        if let Some(utterance) = utterance {
            self.conversation_history.push(ChatTurn::user(utterance));
            let extraction = match generator.extract(utterance).await {
                Ok(raw) => ExtractionResult::parse(&raw),
                Err(e) => {
                    warn!(call_sid=%self.call_sid, error=%e, "extraction request failed");
                    ExtractionResult::ParseFailure
                }
            };
            self.merge_responses(extraction);
        }

        let (text, should_end) = match self.generate_with_retry(generator, retry_policy).await {
            Ok(reply) => {
                let should_end = should_hang_up(&reply);
                (reply, should_end)
            }
            Err(e) => {
                warn!(call_sid=%self.call_sid, error=%e, "giving up on reply generation");
                (FALLBACK_APOLOGY.to_string(), true)
            }
        };
        self.conversation_history.push(ChatTurn::assistant(text.clone()));
        self.should_end = self.should_end || should_end;

        TurnReply { text, should_end }
    }

    pub fn merge_responses(&mut self, extraction: ExtractionResult) {
        match extraction {
            ExtractionResult::Fields(fields) => {
                for (key, value) in fields {
                    if !value.is_null() {
                        self.customer_responses.insert(key, value);
                    }
                }
            }
            ExtractionResult::ParseFailure => {
                debug!(call_sid=%self.call_sid, "extraction unparseable; keeping prior fields");
            }
        }
    }

    async fn generate_with_retry(
        &self,
        generator: &dyn TextGenerator,
        retry_policy: &RetryPolicy,
    ) -> Result<String, AppError> {
        let mut attempt = 1;
        loop {
            match generator.generate(self.get_conversation_context()).await {
                Ok(reply) => break Ok(reply),
                // config errors are not transient
                Err(e @ AppError::Config(_)) => break Err(e),
                Err(e) if attempt < retry_policy.max_attempts => {
                    let delay = retry_policy.delay_after(attempt);
                    warn!(call_sid=%self.call_sid, attempt, error=%e, ?delay, "reply generation failed; retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        }
    }

    pub fn outcome(&self) -> CallOutcome {
        CallOutcome::from_responses(&self.customer_responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;
    use crate::types::Role;
    use serde_json::json;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn hangup_policy_matches_goodbye_phrases() {
        assert!(should_hang_up("Goodbye, thank you for your time!"));
        assert!(should_hang_up("Well, THANK YOU FOR YOUR TIME."));
        assert!(!should_hang_up("Would you like to hear more?"));
    }

    #[test]
    fn retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2_000));
    }

    #[test]
    fn extraction_parse_requires_object() {
        assert_eq!(
            ExtractionResult::parse(r#"{"interest_level": "high"}"#),
            ExtractionResult::Fields(json!({"interest_level": "high"}).as_object().cloned().unwrap())
        );
        assert_eq!(ExtractionResult::parse("not json"), ExtractionResult::ParseFailure);
        assert_eq!(ExtractionResult::parse("[1, 2]"), ExtractionResult::ParseFailure);
    }

    #[test]
    fn begin_starts_empty() {
        let state = ConversationState::begin("CA1", None);
        assert!(state.conversation_history.is_empty());
        assert!(state.customer_responses.is_empty());
        assert!(!state.should_end);
        assert_eq!(state.outcome(), CallOutcome::Unknown);
        // Only the system prompt goes to the model for a fresh call.
        assert_eq!(state.get_conversation_context().len(), 1);
    }

    #[tokio::test]
    async fn advance_appends_user_then_assistant() {
        let generator = ScriptedGenerator::new()
            .reply("Great! Would you like to hear more?")
            .extraction(r#"{"interest_level": "high"}"#);
        let mut state = ConversationState::begin("CA1", None);

        let reply = state
            .advance(&generator, &quick_retry(), Some("I'm interested"))
            .await;

        assert_eq!(reply.text, "Great! Would you like to hear more?");
        assert!(!reply.should_end);
        assert_eq!(
            state.conversation_history,
            vec![
                ChatTurn::user("I'm interested"),
                ChatTurn::assistant("Great! Would you like to hear more?"),
            ]
        );
        assert_eq!(state.outcome(), CallOutcome::PotentialSale);

        // The model saw the system prompt plus the caller's words.
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0][0].role, "system");
        assert_eq!(prompts[0][1].content, "I'm interested");
    }

    #[tokio::test]
    async fn goodbye_reply_sets_termination() {
        let generator = ScriptedGenerator::new()
            .reply("Goodbye, thank you for your time!")
            .extraction(r#"{"interest_level": "low"}"#);
        let mut state = ConversationState::begin("CA1", None);

        let reply = state
            .advance(&generator, &quick_retry(), Some("Not for me"))
            .await;

        assert!(reply.should_end);
        assert!(state.should_end);
        assert_eq!(state.outcome(), CallOutcome::NotInterested);
    }

    #[tokio::test]
    async fn failed_extraction_keeps_earlier_fields() {
        let generator = ScriptedGenerator::new()
            .reply("Happy to help.")
            .reply("Sure thing.")
            .extraction(r#"{"interest_level": "medium", "email": "pat@example.com"}"#)
            .extraction("I could not find anything useful");
        let mut state = ConversationState::begin("CA1", None);

        state
            .advance(&generator, &quick_retry(), Some("Maybe, email me"))
            .await;
        state
            .advance(&generator, &quick_retry(), Some("Uh huh"))
            .await;

        assert_eq!(state.customer_responses["interest_level"], json!("medium"));
        assert_eq!(state.customer_responses["email"], json!("pat@example.com"));
        assert_eq!(state.outcome(), CallOutcome::FollowUp);
        assert_eq!(state.conversation_history.len(), 4);
    }

    #[tokio::test]
    async fn later_extraction_wins_per_field() {
        let generator = ScriptedGenerator::new()
            .reply("Okay.")
            .reply("Understood.")
            .extraction(r#"{"interest_level": "medium", "questions": "pricing"}"#)
            .extraction(r#"{"interest_level": "high", "email": null}"#);
        let mut state = ConversationState::begin("CA1", None);

        state.advance(&generator, &quick_retry(), Some("How much?")).await;
        state.advance(&generator, &quick_retry(), Some("Sign me up")).await;

        assert_eq!(state.customer_responses["interest_level"], json!("high"));
        assert_eq!(state.customer_responses["questions"], json!("pricing"));
        assert!(!state.customer_responses.contains_key("email"));
    }

    #[tokio::test]
    async fn transient_generation_failure_is_retried() {
        let generator = ScriptedGenerator::new()
            .generation_failure()
            .reply("Sorry about that, where were we?")
            .extraction("{}");
        let mut state = ConversationState::begin("CA1", None);

        let reply = state.advance(&generator, &quick_retry(), Some("Hello?")).await;

        assert_eq!(reply.text, "Sorry about that, where were we?");
        assert!(!reply.should_end);
        assert_eq!(generator.prompts().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_apologize_and_end() {
        let generator = ScriptedGenerator::new()
            .generation_failure()
            .generation_failure()
            .generation_failure()
            .extraction("{}");
        let mut state = ConversationState::begin("CA1", None);

        let reply = state.advance(&generator, &quick_retry(), Some("Hello?")).await;

        assert_eq!(reply.text, FALLBACK_APOLOGY);
        assert!(reply.should_end);
        assert_eq!(generator.prompts().len(), 3);
        let last = state.conversation_history.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, FALLBACK_APOLOGY);
    }

    #[tokio::test]
    async fn missing_generator_settings_are_not_retried() {
        let generator = ScriptedGenerator::new()
            .failure(AppError::Config("OPENAI_API_KEY"))
            .reply("never used")
            .extraction("{}");
        let mut state = ConversationState::begin("CA1", None);

        let reply = state.advance(&generator, &quick_retry(), Some("Hello?")).await;

        assert_eq!(reply.text, FALLBACK_APOLOGY);
        assert!(reply.should_end);
        assert_eq!(generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn from_call_resumes_stored_transcript() {
        let mut call = Call::new("CA9", time::OffsetDateTime::now_utc());
        call.conversation_history = vec![
            ChatTurn::user("Hi"),
            ChatTurn::assistant("Hello! Interested in saving time?"),
        ];
        let generator = ScriptedGenerator::new().reply("Great.").extraction("{}");
        let mut state = ConversationState::from_call(call);

        state.advance(&generator, &quick_retry(), Some("Yes")).await;

        assert_eq!(state.conversation_history.len(), 4);
        assert_eq!(generator.prompts()[0].len(), 4);
    }
}
