mod campaign;
mod config;
mod conversation_state;
mod db_types;
mod error;
mod handlers;
mod llm;
mod openai_types;
mod orchestrator;
mod pg_store;
mod store;
#[cfg(test)]
mod test_support;
mod tts;
mod tts_types;
mod twilio;
mod twilio_types;
mod types;
mod utils;

use crate::config::Config;
use crate::conversation_state::RetryPolicy;
use crate::llm::OpenAIClient;
use crate::orchestrator::CallLocks;
use crate::pg_store::PgStore;
use crate::store::{MemoryStore, RecordStore};
use crate::tts::SpeechRenderer;
use crate::twilio::TwilioClient;
use crate::types::AppState;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const APP_GREETING: &str = "Hello! This is Call Worklog AI. I'm calling to introduce \
        you to our product that automatically generates work logs based on your activities. \
        Would you be interested in learning more about how it can save you time?";
    pub const FALLBACK_APOLOGY: &str =
        "I apologize, but I'm having trouble processing your response. Let me have someone call you back.";
    /// Lowercased phrases that end the call when they appear in an assistant reply.
    pub const HANGUP_PHRASES: &[&str] = &["goodbye", "thank you for your time"];
    pub const GATHER_TIMEOUT_SECS: u16 = 5;
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("no .env file loaded: {e}");
    }
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("sqlx", tracing_subscriber::filter::LevelFilter::WARN),
            (
                "sales_caller_rs",
                tracing_subscriber::filter::LevelFilter::DEBUG,
            ),
        ]));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }

    let config = Config::from_env();
    config.log_summary();

    let store: Arc<dyn RecordStore> = match config.database_url.as_deref() {
        Some(url) => match PgStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error=%e, "failed to open record store");
                return;
            }
        },
        None => Arc::new(MemoryStore::new()),
    };

    let http_client = reqwest::Client::new();
    let credentials = match config.twilio_credentials() {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            warn!(error=%e, "outbound calls will fail until twilio is configured");
            None
        }
    };
    let app_state = Arc::new(AppState {
        store,
        generator: Arc::new(OpenAIClient::new(
            http_client.clone(),
            config.openai_api_key.clone(),
            config.openai_model.clone(),
        )),
        gateway: Arc::new(TwilioClient::new(http_client.clone(), credentials)),
        renderer: SpeechRenderer::new(
            http_client,
            config.google_api_key.clone(),
            config.tts_voice.clone(),
            &config.tts_output_dir,
        ),
        retry_policy: RetryPolicy::default(),
        call_locks: CallLocks::default(),
        config,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], app_state.config.port));
    info!(%addr, voice = app_state.renderer.voice(), "listening");
    let app = handlers::router(app_state);
    if let Err(e) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
    {
        error!(error=%e, "server exited");
    }
}
