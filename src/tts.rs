use crate::error::AppError;
use crate::tts_types::{
    AudioConfig, AudioEncoding, GoogleErrorResponse, SynthesisInput, SynthesizeSpeechRequest,
    SynthesizeSpeechResponse, VoiceSelectionParams,
};
use crate::utils::b64_decode_to_buf;

use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Renders text to MP3 audio.  The whole text is synthesized before any audio is
/// returned.
pub struct SpeechRenderer {
    http_client: reqwest::Client,
    api_key: Option<String>,
    voice: String,
    output_dir: PathBuf,
}

/// Google voice names start with their language code, e.g. `en-US-Standard-E`.
pub fn language_code(voice: &str) -> String {
    voice.splitn(3, '-').take(2).collect::<Vec<_>>().join("-")
}

impl SpeechRenderer {
    pub fn new(
        http_client: reqwest::Client,
        api_key: Option<String>,
        voice: String,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            http_client,
            api_key,
            voice,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, AppError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(AppError::Config("GOOGLE_API_KEY"))?;
        let request = SynthesizeSpeechRequest {
            input: SynthesisInput {
                text: text.to_string(),
            },
            voice: VoiceSelectionParams {
                language_code: language_code(voice),
                name: voice.to_string(),
            },
            audio_config: AudioConfig {
                audio_encoding: AudioEncoding::Mp3,
                sample_rate_hertz: None,
            },
        };
        let resp = self
            .http_client
            .post(GOOGLE_TTS_URL)
            .query(&[("key", key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send synthesis request");
                AppError::Synthesis(e.to_string())
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<GoogleErrorResponse>().await {
                Ok(body) => format!("{} {}", body.error.code, body.error.message),
                Err(_) => status.to_string(),
            };
            error!(status=%status, message=%message, "synthesis rejected");
            return Err(AppError::Synthesis(message));
        }

        let resp = resp.json::<SynthesizeSpeechResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize synthesis response");
            AppError::Synthesis(e.to_string())
        })?;
        let mut audio = Vec::new();
        b64_decode_to_buf(resp.audio_content, &mut audio).map_err(|e| {
            error!(error=%e, "synthesis returned invalid base64 audio");
            AppError::Synthesis(e.to_string())
        })?;
        debug!(bytes = audio.len(), voice, "synthesized speech");
        Ok(audio)
    }

    /// Render `text` into a fresh MP3 file in the output directory.
    pub async fn render_to_file(&self, text: &str, voice: Option<&str>) -> Result<PathBuf, AppError> {
        let voice = voice.unwrap_or(&self.voice);
        let audio = self.synthesize(text, voice).await?;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                error!(error=%e, dir=?self.output_dir, "failed to create tts output dir");
                AppError::Synthesis(e.to_string())
            })?;
        let output_file = self.output_dir.join(format!("{}.mp3", Uuid::new_v4()));
        tokio::fs::write(&output_file, audio).await.map_err(|e| {
            error!(error=%e, file=?output_file, "failed to write rendered speech");
            AppError::Synthesis(e.to_string())
        })?;
        Ok(output_file)
    }

    /// Render `text` and return the audio bytes; the intermediate file is removed.
    pub async fn render(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, AppError> {
        let output_file = self.render_to_file(text, voice).await?;
        let audio = tokio::fs::read(&output_file).await.map_err(|e| {
            error!(error=%e, file=?output_file, "failed to read rendered speech");
            AppError::Synthesis(e.to_string())
        })?;
        if let Err(e) = tokio::fs::remove_file(&output_file).await {
            warn!(error=%e, file=?output_file, "failed to remove rendered speech file");
        }
        Ok(audio)
    }
}
