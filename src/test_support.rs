//! Fakes shared by the unit tests.

use crate::config::Config;
use crate::conversation_state::RetryPolicy;
use crate::db_types::{Call, CallOutcome, CallStatus, CallSummary, Customer};
use crate::error::AppError;
use crate::llm::TextGenerator;
use crate::openai_types::OpenAIMessage;
use crate::orchestrator::CallLocks;
use crate::store::{MemoryStore, RecordStore};
use crate::tts::SpeechRenderer;
use crate::twilio::VoiceGateway;
use crate::types::{AppState, ChatTurn};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

pub fn customer(phone: &str, last_called: Option<OffsetDateTime>) -> Customer {
    let now = OffsetDateTime::now_utc();
    Customer {
        id: Uuid::new_v4(),
        phone_number: phone.to_string(),
        last_called,
        last_call_outcome: None,
        call_history: vec![],
        updated_at: now,
    }
}

/// Text generator that plays back queued replies and extractions in order.  An empty
/// queue answers with an error.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, AppError>>>,
    extractions: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Vec<OpenAIMessage>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn generation_failure(self) -> Self {
        self.failure(AppError::Generation("rate limited".to_string()))
    }

    pub fn failure(self, e: AppError) -> Self {
        self.replies.lock().unwrap().push_back(Err(e));
        self
    }

    pub fn extraction(self, raw: &str) -> Self {
        self.extractions.lock().unwrap().push_back(raw.to_string());
        self
    }

    /// Every prompt passed to `generate`, in call order.
    pub fn prompts(&self) -> Vec<Vec<OpenAIMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, messages: Vec<OpenAIMessage>) -> Result<String, AppError> {
        self.prompts.lock().unwrap().push(messages);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Generation("no scripted reply".to_string())))
    }

    async fn extract(&self, _utterance: &str) -> Result<String, AppError> {
        self.extractions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::Generation("no scripted extraction".to_string()))
    }
}

/// Gateway that records every number dialed and hands out `CA{n}` ids.
#[derive(Default)]
pub struct RecordingGateway {
    failing: Vec<String>,
    dialed: Mutex<Vec<(String, String)>>,
}

impl RecordingGateway {
    pub fn failing_for(numbers: &[&str]) -> Self {
        Self {
            failing: numbers.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    /// `(to, webhook_base)` for every attempted call.
    pub fn dialed(&self) -> Vec<(String, String)> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceGateway for RecordingGateway {
    async fn place_call(&self, to: &str, webhook_base: &str) -> Result<String, AppError> {
        let mut dialed = self.dialed.lock().unwrap();
        dialed.push((to.to_string(), webhook_base.to_string()));
        if self.failing.iter().any(|n| n == to) {
            return Err(AppError::Gateway(format!("cannot reach {to}")));
        }
        Ok(format!("CA{}", dialed.len() - 1))
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

fn unavailable<T>() -> Result<T, AppError> {
    Err(AppError::Store("connection refused".to_string()))
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn find_call(&self, _call_sid: &str) -> Result<Option<Call>, AppError> {
        unavailable()
    }

    async fn record_initiation(
        &self,
        _call_sid: &str,
        _customer_id: Option<Uuid>,
        _phone_number: &str,
    ) -> Result<(), AppError> {
        unavailable()
    }

    async fn update_call_status(&self, _call_sid: &str, _status: CallStatus) -> Result<(), AppError> {
        unavailable()
    }

    async fn save_conversation(
        &self,
        _call_sid: &str,
        _conversation_history: &[ChatTurn],
        _customer_responses: &Map<String, Value>,
        _should_end: bool,
    ) -> Result<(), AppError> {
        unavailable()
    }

    async fn complete_call(
        &self,
        _call_sid: &str,
        _customer_id: Option<Uuid>,
        _outcome: CallOutcome,
    ) -> Result<bool, AppError> {
        unavailable()
    }

    async fn find_customer(&self, _id: Uuid) -> Result<Option<Customer>, AppError> {
        unavailable()
    }

    async fn find_customer_by_phone(
        &self,
        _phone_number: &str,
    ) -> Result<Option<Customer>, AppError> {
        unavailable()
    }

    async fn insert_customer(&self, _phone_number: &str) -> Result<Customer, AppError> {
        unavailable()
    }

    async fn record_call_result(
        &self,
        _customer_id: Uuid,
        _summary: CallSummary,
    ) -> Result<(), AppError> {
        unavailable()
    }

    async fn customers_due(
        &self,
        _cutoff: OffsetDateTime,
        _limit: usize,
    ) -> Result<Vec<Customer>, AppError> {
        unavailable()
    }
}

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "BASE_URL" => Some("https://calls.example.com".to_string()),
        "TWILIO_ACCOUNT_SID" => Some("AC0000".to_string()),
        "TWILIO_AUTH_TOKEN" => Some("token".to_string()),
        "TWILIO_PHONE_NUMBER" => Some("+15559990000".to_string()),
        _ => None,
    })
}

/// App state over a fresh memory store and a recording gateway.
pub fn test_state(generator: Arc<ScriptedGenerator>) -> (AppState, Arc<MemoryStore>) {
    test_state_with(generator, Arc::new(RecordingGateway::default()), test_config())
}

pub fn test_state_with(
    generator: Arc<ScriptedGenerator>,
    gateway: Arc<RecordingGateway>,
    config: Config,
) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let http_client = reqwest::Client::new();
    let renderer = SpeechRenderer::new(
        http_client,
        None,
        config.tts_voice.clone(),
        config.tts_output_dir.clone(),
    );
    let app_state = AppState {
        config,
        store: store.clone(),
        generator,
        gateway,
        renderer,
        retry_policy: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        },
        call_locks: CallLocks::default(),
    };
    (app_state, store)
}
