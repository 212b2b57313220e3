use crate::consts::{APP_GREETING, FALLBACK_APOLOGY, GATHER_TIMEOUT_SECS};
use crate::conversation_state::ConversationState;
use crate::db_types::{Call, CallStatus, CallSummary, Customer};
use crate::error::AppError;
use crate::twilio_types::{
    wrap_twiml, GatherAction, HangupAction, Response, ResponseAction, SayAction,
};
use crate::types::AppState;
use crate::utils::non_blank;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Per-call turn locks, so two webhook deliveries for the same call never interleave
/// their read-modify-write of the call record.  An entry lives only while some request
/// holds or waits for it.
#[derive(Default)]
pub struct CallLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one request; dropping it unlocks the call.
pub struct CallGuard<'a> {
    locks: &'a CallLocks,
    call_sid: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_idle(&self.call_sid);
    }
}

impl CallLocks {
    pub async fn lock(&self, call_sid: &str) -> CallGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(call_sid.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        CallGuard {
            locks: self,
            call_sid: call_sid.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Remove the entry unless another request still holds a handle to it.  Handles are
    /// only cloned under the map lock, so a count of one means nobody is waiting.
    fn remove_idle(&self, call_sid: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(call_sid)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(call_sid);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// What to ask the gateway to do after speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirective {
    Gather,
    Hangup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnResponse {
    pub speech: Option<String>,
    pub directive: TurnDirective,
}

impl TurnResponse {
    pub fn greeting() -> Self {
        Self {
            speech: Some(APP_GREETING.to_string()),
            directive: TurnDirective::Gather,
        }
    }

    pub fn apology() -> Self {
        Self {
            speech: Some(FALLBACK_APOLOGY.to_string()),
            directive: TurnDirective::Hangup,
        }
    }

    pub fn hangup() -> Self {
        Self {
            speech: None,
            directive: TurnDirective::Hangup,
        }
    }

    pub fn to_twiml(&self) -> String {
        let mut actions = vec![];
        if let Some(text) = &self.speech {
            actions.push(ResponseAction::Say(SayAction {
                text: text.to_string(),
                ..Default::default()
            }));
        }
        match self.directive {
            TurnDirective::Gather => actions.push(ResponseAction::Gather(GatherAction {
                input: Some("speech".to_string()),
                action: Some("/handle-call".to_string()),
                method: Some("POST".to_string()),
                speech_timeout: Some("auto".to_string()),
                timeout: Some(GATHER_TIMEOUT_SECS),
            })),
            TurnDirective::Hangup => actions.push(ResponseAction::Hangup(HangupAction {})),
        }
        wrap_twiml(xmlserde::xml_serialize(Response { actions }))
    }
}

/// Handle one turn webhook.  Never fails: anything that goes wrong becomes a spoken
/// apology and a hangup.
pub async fn handle_turn(
    app_state: &AppState,
    call_sid: &str,
    speech_result: Option<&str>,
) -> TurnResponse {
    let _turn_guard = app_state.call_locks.lock(call_sid).await;

    let call = match app_state.store.find_call(call_sid).await {
        Ok(call) => call,
        Err(e) => {
            error!(call_sid, error=%e, "failed to load call; apologizing");
            return TurnResponse::apology();
        }
    };
    if call.as_ref().map_or(false, |c| c.should_end || c.is_finished()) {
        warn!(call_sid, "turn for a call that already ended; hanging up");
        return TurnResponse::hangup();
    }

    let utterance = match non_blank(speech_result) {
        Some(utterance) => utterance,
        None => {
            debug!(call_sid, "no speech yet; greeting");
            return TurnResponse::greeting();
        }
    };

    let mut state = match call {
        Some(call) => ConversationState::from_call(call),
        None => ConversationState::begin(call_sid, None),
    };
    let reply = state
        .advance(
            app_state.generator.as_ref(),
            &app_state.retry_policy,
            Some(utterance),
        )
        .await;

    if let Err(e) = app_state
        .store
        .save_conversation(
            call_sid,
            &state.conversation_history,
            &state.customer_responses,
            state.should_end,
        )
        .await
    {
        error!(call_sid, error=%e, "failed to persist conversation");
    }

    info!(
        call_sid,
        customer_id = ?state.customer_id,
        turns = state.conversation_history.len(),
        outcome = %state.outcome(),
        should_end = reply.should_end,
        "turn complete"
    );
    TurnResponse {
        speech: Some(reply.text),
        directive: if reply.should_end {
            TurnDirective::Hangup
        } else {
            TurnDirective::Gather
        },
    }
}

/// Handle a gateway status callback: upsert the status, then finalize terminal calls.
pub async fn handle_status(
    app_state: &AppState,
    call_sid: &str,
    status: CallStatus,
) -> Result<(), AppError> {
    let _turn_guard = app_state.call_locks.lock(call_sid).await;
    app_state.store.update_call_status(call_sid, status).await?;
    if status.is_terminal() {
        finalize_call(app_state, call_sid).await?;
    }
    Ok(())
}

async fn resolve_customer(app_state: &AppState, call: &Call) -> Result<Option<Customer>, AppError> {
    if let Some(id) = call.customer_id {
        if let Some(customer) = app_state.store.find_customer(id).await? {
            return Ok(Some(customer));
        }
        warn!(call_sid=%call.call_sid, customer_id=%id, "call references unknown customer");
    }
    let Some(phone_number) = call.phone_number.as_deref() else {
        return Ok(None);
    };
    match app_state.store.find_customer_by_phone(phone_number).await? {
        Some(customer) => Ok(Some(customer)),
        None => Ok(Some(app_state.store.insert_customer(phone_number).await?)),
    }
}

/// Stamp the customer with the call's outcome, then write the outcome onto the call.
/// The customer goes first: until `complete_call` succeeds a later terminal callback
/// repeats the whole step, and the customer's history skips a summary it already has.
async fn finalize_call(app_state: &AppState, call_sid: &str) -> Result<(), AppError> {
    let Some(call) = app_state.store.find_call(call_sid).await? else {
        return Ok(());
    };
    if call.completed_at.is_some() {
        debug!(call_sid, "call already finalized");
        return Ok(());
    }

    let outcome = call.outcome();
    let now = OffsetDateTime::now_utc();
    let customer = resolve_customer(app_state, &call).await?;
    let customer_id = customer.as_ref().map(|c| c.id);
    if let Some(customer_id) = customer_id {
        let summary = CallSummary {
            call_sid: call_sid.to_string(),
            timestamp: now,
            outcome,
            responses: call.customer_responses.clone(),
        };
        if let Err(e) = app_state
            .store
            .record_call_result(customer_id, summary)
            .await
        {
            error!(call_sid, customer_id=%customer_id, error=%e, "failed to record call result; call left open");
            return Err(e);
        }
    }

    if !app_state
        .store
        .complete_call(call_sid, customer_id, outcome)
        .await?
    {
        return Ok(());
    }
    info!(
        call_sid,
        customer_id = ?customer_id,
        %outcome,
        lasted_secs = (now - call.created_at).whole_seconds(),
        "call finalized"
    );
    Ok(())
}
