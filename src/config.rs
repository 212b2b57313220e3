use crate::error::AppError;

use std::path::PathBuf;
use tracing::{info, warn};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TTS_VOICE: &str = "en-US-Standard-E";
pub const DEFAULT_TTS_OUTPUT_DIR: &str = "/tmp";
pub const DEFAULT_PORT: u16 = 5000;

/// Credentials and caller id used to place outbound calls.
#[derive(Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

impl std::fmt::Debug for TwilioCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioCredentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("phone_number", &self.phone_number)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct Config {
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub database_url: Option<String>,
    /// Public URL the gateway uses to reach our webhooks.
    pub base_url: Option<String>,
    pub google_api_key: Option<String>,
    pub tts_voice: String,
    pub tts_output_dir: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let port = match get("PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(port=%raw, "PORT is not a valid port number; using default");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        Self {
            twilio_account_sid: get("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: get("TWILIO_AUTH_TOKEN"),
            twilio_phone_number: get("TWILIO_PHONE_NUMBER"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            database_url: get("DATABASE_URL"),
            base_url: get("BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            google_api_key: get("GOOGLE_API_KEY"),
            tts_voice: get("TTS_VOICE").unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string()),
            tts_output_dir: get("TTS_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TTS_OUTPUT_DIR)),
            port,
        }
    }

    pub fn twilio_credentials(&self) -> Result<TwilioCredentials, AppError> {
        Ok(TwilioCredentials {
            account_sid: self
                .twilio_account_sid
                .clone()
                .ok_or(AppError::Config("TWILIO_ACCOUNT_SID"))?,
            auth_token: self
                .twilio_auth_token
                .clone()
                .ok_or(AppError::Config("TWILIO_AUTH_TOKEN"))?,
            phone_number: self
                .twilio_phone_number
                .clone()
                .ok_or(AppError::Config("TWILIO_PHONE_NUMBER"))?,
        })
    }

    pub fn base_url(&self) -> Result<&str, AppError> {
        self.base_url.as_deref().ok_or(AppError::Config("BASE_URL"))
    }

    /// Log which settings are present.  Values are never printed.
    pub fn log_summary(&self) {
        let settings = [
            ("TWILIO_ACCOUNT_SID", self.twilio_account_sid.is_some()),
            ("TWILIO_AUTH_TOKEN", self.twilio_auth_token.is_some()),
            ("TWILIO_PHONE_NUMBER", self.twilio_phone_number.is_some()),
            ("OPENAI_API_KEY", self.openai_api_key.is_some()),
            ("BASE_URL", self.base_url.is_some()),
            ("GOOGLE_API_KEY", self.google_api_key.is_some()),
        ];
        for (name, present) in settings {
            if present {
                info!(setting = name, "configured");
            } else {
                warn!(setting = name, "not configured");
            }
        }
        if self.database_url.is_none() {
            warn!("DATABASE_URL not set; records are kept in memory and lost on restart");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.openai_model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.tts_voice, DEFAULT_TTS_VOICE);
        assert_eq!(config.tts_output_dir, PathBuf::from("/tmp"));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn placement_settings_fail_with_the_missing_name() {
        let config = config_from(&[
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
        ]);
        match config.twilio_credentials() {
            Err(AppError::Config(name)) => assert_eq!(name, "TWILIO_PHONE_NUMBER"),
            other => panic!("expected config error, got {other:?}"),
        }
        assert!(matches!(config.base_url(), Err(AppError::Config("BASE_URL"))));
    }

    #[test]
    fn blank_values_count_as_missing_and_base_url_is_normalized() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "  "),
            ("BASE_URL", "https://calls.example.com/"),
            ("PORT", "8080"),
        ]);
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.base_url().unwrap(), "https://calls.example.com");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = TwilioCredentials {
            account_sid: "AC123".to_string(),
            auth_token: "hunter2".to_string(),
            phone_number: "+15550001111".to_string(),
        };
        let printed = format!("{creds:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
    }
}
