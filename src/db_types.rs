use crate::types::ChatTurn;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle of a call as reported by the telephony gateway.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses trigger finalization of the call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "ringing" => Ok(Self::Ringing),
            "answered" => Ok(Self::Answered),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown call status '{other}'")),
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    PotentialSale,
    FollowUp,
    NotInterested,
    Unknown,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PotentialSale => "potential_sale",
            Self::FollowUp => "follow_up",
            Self::NotInterested => "not_interested",
            Self::Unknown => "unknown",
        }
    }

    /// Pure mapping from the extracted `interest_level` field.
    pub fn from_responses(responses: &Map<String, Value>) -> Self {
        match responses.get("interest_level") {
            None => Self::Unknown,
            Some(Value::String(level)) => match level.trim().to_lowercase().as_str() {
                "high" => Self::PotentialSale,
                "medium" => Self::FollowUp,
                _ => Self::NotInterested,
            },
            Some(_) => Self::NotInterested,
        }
    }
}

impl FromStr for CallOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "potential_sale" => Ok(Self::PotentialSale),
            "follow_up" => Ok(Self::FollowUp),
            "not_interested" => Ok(Self::NotInterested),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown call outcome '{other}'")),
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a customer's append-only call history.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct CallSummary {
    pub call_sid: String,
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
    pub outcome: CallOutcome,
    pub responses: Map<String, Value>,
}

#[derive(Clone, Debug)]
pub struct Customer {
    pub id: Uuid,
    pub phone_number: String,
    pub last_called: Option<OffsetDateTime>,
    pub last_call_outcome: Option<CallOutcome>,
    pub call_history: Vec<CallSummary>,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub call_sid: String,
    pub customer_id: Option<Uuid>,
    pub phone_number: Option<String>,
    pub status: Option<CallStatus>,
    pub conversation_history: Vec<ChatTurn>,
    pub customer_responses: Map<String, Value>,
    /// Set the turn the hangup policy fires; no further turns are generated afterwards.
    pub should_end: bool,
    /// Outcome written once at completion.
    pub final_outcome: Option<CallOutcome>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl Call {
    /// Empty record for a call the store has not seen yet.
    pub fn new(call_sid: &str, now: OffsetDateTime) -> Self {
        Self {
            call_sid: call_sid.to_string(),
            customer_id: None,
            phone_number: None,
            status: None,
            conversation_history: vec![],
            customer_responses: Map::new(),
            should_end: false,
            final_outcome: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Completed by finalization, or reported finished by the gateway.
    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some() || self.status.map_or(false, |s| s.is_terminal())
    }

    /// Always recomputed from the latest responses, never cached.
    pub fn outcome(&self) -> CallOutcome {
        CallOutcome::from_responses(&self.customer_responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn responses(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn outcome_follows_interest_level() {
        let high = responses(json!({"interest_level": "high"}));
        let medium = responses(json!({"interest_level": "medium"}));
        let low = responses(json!({"interest_level": "low"}));
        assert_eq!(CallOutcome::from_responses(&high), CallOutcome::PotentialSale);
        assert_eq!(CallOutcome::from_responses(&medium), CallOutcome::FollowUp);
        assert_eq!(CallOutcome::from_responses(&low), CallOutcome::NotInterested);
        assert_eq!(CallOutcome::from_responses(&Map::new()), CallOutcome::Unknown);
    }

    #[test]
    fn unrelated_fields_do_not_change_outcome() {
        let mut call = Call::new("CA1", OffsetDateTime::now_utc());
        call.customer_responses = responses(json!({"interest_level": "high"}));
        assert_eq!(call.outcome(), CallOutcome::PotentialSale);

        call.customer_responses
            .insert("email".to_string(), json!("pat@example.com"));
        call.customer_responses
            .insert("objections".to_string(), json!(["price"]));
        assert_eq!(call.outcome(), CallOutcome::PotentialSale);

        call.customer_responses
            .insert("interest_level".to_string(), json!("medium"));
        assert_eq!(call.outcome(), CallOutcome::FollowUp);
    }

    #[test]
    fn non_string_interest_counts_as_not_interested() {
        let r = responses(json!({"interest_level": 3}));
        assert_eq!(CallOutcome::from_responses(&r), CallOutcome::NotInterested);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::Answered,
            CallStatus::Completed,
            CallStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CallStatus>(), Ok(status));
        }
        assert!("busy".parse::<CallStatus>().is_err());
    }
}
