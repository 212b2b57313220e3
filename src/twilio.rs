use crate::config::TwilioCredentials;
use crate::error::AppError;
use crate::twilio_types::{TwilioCallResource, TwilioErrorResponse};

use async_trait::async_trait;
use tracing::{debug, error, info};

const STATUS_CALLBACK_EVENTS: &[&str] = &["initiated", "ringing", "answered", "completed"];

/// Outbound side of the voice gateway.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Place a call to `to`; the gateway will drive it through our webhooks under
    /// `webhook_base`.  Returns the gateway's call id.
    async fn place_call(&self, to: &str, webhook_base: &str) -> Result<String, AppError>;
}

pub struct TwilioClient {
    http_client: reqwest::Client,
    credentials: Option<TwilioCredentials>,
}

impl TwilioClient {
    pub fn new(http_client: reqwest::Client, credentials: Option<TwilioCredentials>) -> Self {
        Self {
            http_client,
            credentials,
        }
    }
}

/// Form fields for the Calls resource.
pub fn call_form(to: &str, from: &str, webhook_base: &str) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("To", to.to_string()),
        ("From", from.to_string()),
        ("Url", format!("{webhook_base}/handle-call")),
        ("Method", "POST".to_string()),
        ("StatusCallback", format!("{webhook_base}/call-status")),
        ("StatusCallbackMethod", "POST".to_string()),
    ];
    form.extend(
        STATUS_CALLBACK_EVENTS
            .iter()
            .map(|event| ("StatusCallbackEvent", event.to_string())),
    );
    form
}

#[async_trait]
impl VoiceGateway for TwilioClient {
    async fn place_call(&self, to: &str, webhook_base: &str) -> Result<String, AppError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            error!("twilio credentials missing; cannot place call");
            AppError::Config("TWILIO_ACCOUNT_SID")
        })?;
        let account_sid = &credentials.account_sid;
        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Calls.json");
        let form = call_form(to, &credentials.phone_number, webhook_base);
        let resp = self
            .http_client
            .post(url)
            .basic_auth(account_sid, Some(&credentials.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send call request to twilio");
                AppError::Gateway(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<TwilioErrorResponse>().await {
                Ok(body) => {
                    error!(status=%status, code=?body.code, message=%body.message, "twilio rejected call");
                    body.message
                }
                Err(_) => {
                    error!(status=%status, "twilio rejected call");
                    status.to_string()
                }
            };
            return Err(AppError::Gateway(message));
        }

        let call = resp.json::<TwilioCallResource>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize twilio call resource");
            AppError::Gateway(e.to_string())
        })?;
        debug!(call_status=%call.status, "twilio call resource");
        info!(call_sid=%call.sid, "placed outbound call");
        Ok(call.sid)
    }
}
