use crate::config::Config;
use crate::conversation_state::RetryPolicy;
use crate::llm::TextGenerator;
use crate::orchestrator::CallLocks;
use crate::store::RecordStore;
use crate::tts::SpeechRenderer;
use crate::twilio::VoiceGateway;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One utterance of the transcript, in the order it was spoken.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub gateway: Arc<dyn VoiceGateway>,
    pub renderer: SpeechRenderer,
    pub retry_policy: RetryPolicy,
    // call sid => turn lock
    pub call_locks: CallLocks,
}
