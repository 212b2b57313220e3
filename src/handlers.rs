use crate::campaign::{self, DEFAULT_BATCH_SIZE};
use crate::db_types::CallStatus;
use crate::error::AppError;
use crate::orchestrator::{handle_status, handle_turn, TurnResponse};
use crate::twilio_types::{StatusCallbackPayload, TurnPayload};
use crate::types::AppState;
use crate::utils::{mask_phone, non_blank};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, trace, warn};
use uuid::Uuid;

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/outbound-call", post(outbound_call))
        .route("/call-status", post(call_status))
        .route("/handle-call", post(handle_call))
        .route("/initiate-calls", post(initiate_calls))
        .route("/speech", get(speech))
        .route("/", get(|| async { "Sales caller is running" }))
        .with_state(app_state)
}

#[derive(Deserialize, Debug, Default)]
struct OutboundCallForm {
    phone_number: Option<String>,
    customer_id: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct InitiateCallsForm {
    limit: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct SpeechQuery {
    text: String,
    voice: Option<String>,
}

fn parse_form<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, AppError> {
    serde_urlencoded::from_str(body).map_err(|e| {
        warn!(error=%e, "failed to deserialize form body");
        AppError::BadRequest(e.to_string())
    })
}

pub async fn outbound_call(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let form: OutboundCallForm = parse_form(&body)?;
    let phone_number = non_blank(form.phone_number.as_deref())
        .ok_or_else(|| AppError::BadRequest("Phone number is required".to_string()))?;
    let customer_id = match non_blank(form.customer_id.as_deref()) {
        Some(raw) => Some(Uuid::parse_str(raw).map_err(|e| {
            warn!(customer_id=%raw, error=%e, "customer_id is not a uuid");
            AppError::BadRequest(format!("Invalid customer_id: {raw}"))
        })?),
        None => None,
    };
    let webhook_base = app_state.config.base_url()?;

    let call_sid = app_state
        .gateway
        .place_call(phone_number, webhook_base)
        .await?;
    if let Err(e) = app_state
        .store
        .record_initiation(&call_sid, customer_id, phone_number)
        .await
    {
        error!(call_sid=%call_sid, error=%e, "call placed but not recorded");
    }
    info!(call_sid=%call_sid, phone=%mask_phone(phone_number), "outbound call initiated");

    Ok(Json(json!({
        "status": "success",
        "call_sid": call_sid,
    })))
}

pub async fn call_status(State(app_state): State<Arc<AppState>>, body: String) -> StatusCode {
    trace!(body=%body, "status callback body");
    let payload = match serde_urlencoded::from_str::<StatusCallbackPayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error=%e, "ignoring unreadable status callback");
            return StatusCode::OK;
        }
    };
    let (Some(call_sid), Some(call_status)) = (payload.call_sid, payload.call_status) else {
        warn!("status callback without CallSid or CallStatus");
        return StatusCode::OK;
    };

    let status = CallStatus::from(call_status);
    info!(call_sid=%call_sid, gateway_status=?call_status, %status, duration=?payload.call_duration, "call status");
    if let Err(e) = handle_status(&app_state, &call_sid, status).await {
        error!(call_sid=%call_sid, error=%e, "failed to record call status");
    }
    StatusCode::OK
}

pub async fn handle_call(State(app_state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    trace!(body=%body, "turn webhook body");
    let response = match serde_urlencoded::from_str::<TurnPayload>(&body) {
        Ok(TurnPayload {
            call_sid: Some(call_sid),
            speech_result,
            confidence,
        }) => {
            trace!(call_sid=%call_sid, ?confidence, "turn");
            handle_turn(&app_state, &call_sid, speech_result.as_deref()).await
        }
        Ok(_) => {
            warn!("turn webhook without CallSid");
            TurnResponse::apology()
        }
        Err(e) => {
            warn!(error=%e, "failed to deserialize turn webhook");
            TurnResponse::apology()
        }
    };

    let twiml = response.to_twiml();
    trace!("twiml: '{}'", twiml);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/xml"),
    );
    (StatusCode::OK, headers, twiml)
}

pub async fn initiate_calls(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let form: InitiateCallsForm = parse_form(&body)?;
    let limit = form.limit.unwrap_or(DEFAULT_BATCH_SIZE);
    let webhook_base = app_state.config.base_url()?;

    let candidates =
        campaign::select_candidates(app_state.store.as_ref(), limit, OffsetDateTime::now_utc())
            .await?;
    let calls_initiated = campaign::launch(
        app_state.store.as_ref(),
        app_state.gateway.as_ref(),
        webhook_base,
        &candidates,
    )
    .await;

    Ok(Json(json!({
        "status": "success",
        "calls_initiated": calls_initiated,
    })))
}

pub async fn speech(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<SpeechQuery>,
) -> Result<impl IntoResponse, AppError> {
    let text = non_blank(Some(&query.text))
        .ok_or_else(|| AppError::BadRequest("text is required".to_string()))?;
    let audio = app_state
        .renderer
        .render(text, query.voice.as_deref())
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("audio/mpeg"),
    );
    Ok((headers, audio))
}
