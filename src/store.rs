use crate::db_types::{Call, CallOutcome, CallStatus, CallSummary, Customer};
use crate::error::AppError;
use crate::types::ChatTurn;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

/// Shared record store for calls and customers.  Every call write is an upsert keyed by
/// `call_sid`; nothing spans more than one key.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_call(&self, call_sid: &str) -> Result<Option<Call>, AppError>;

    /// Upsert a freshly placed call.  A status already written by a gateway callback is
    /// kept.
    async fn record_initiation(
        &self,
        call_sid: &str,
        customer_id: Option<Uuid>,
        phone_number: &str,
    ) -> Result<(), AppError>;

    /// Upsert the gateway status.  A completed call keeps the status it finished with.
    async fn update_call_status(&self, call_sid: &str, status: CallStatus) -> Result<(), AppError>;

    /// Upsert the transcript and extracted fields.  Ignored once the call is completed.
    async fn save_conversation(
        &self,
        call_sid: &str,
        conversation_history: &[ChatTurn],
        customer_responses: &Map<String, Value>,
        should_end: bool,
    ) -> Result<(), AppError>;

    /// Write the final outcome once.  Returns `false` when the call was already completed
    /// or does not exist.
    async fn complete_call(
        &self,
        call_sid: &str,
        customer_id: Option<Uuid>,
        outcome: CallOutcome,
    ) -> Result<bool, AppError>;

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError>;

    async fn find_customer_by_phone(&self, phone_number: &str)
        -> Result<Option<Customer>, AppError>;

    async fn insert_customer(&self, phone_number: &str) -> Result<Customer, AppError>;

    /// Stamp the customer with the call's result and append it to their history.  A
    /// summary whose `call_sid` is already in the history is not appended again, so a
    /// finalization that failed halfway can be repeated.
    async fn record_call_result(
        &self,
        customer_id: Uuid,
        summary: CallSummary,
    ) -> Result<(), AppError>;

    /// Customers never called, or last called before `cutoff`, in store order.
    async fn customers_due(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<Customer>, AppError>;
}

/// In-process store.  Records live as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    calls: Mutex<HashMap<String, Call>>,
    // insertion order stands in for store-native order
    customers: Mutex<Vec<Customer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_call<T>(&self, call_sid: &str, f: impl FnOnce(&mut Call) -> T) -> Result<T, AppError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| AppError::Store("call map poisoned".to_string()))?;
        let now = OffsetDateTime::now_utc();
        let call = calls
            .entry(call_sid.to_string())
            .or_insert_with(|| Call::new(call_sid, now));
        let res = f(call);
        call.updated_at = now;
        Ok(res)
    }

    fn customers(&self) -> Result<std::sync::MutexGuard<'_, Vec<Customer>>, AppError> {
        self.customers
            .lock()
            .map_err(|_| AppError::Store("customer list poisoned".to_string()))
    }

    #[cfg(test)]
    pub fn add_customer(&self, customer: Customer) {
        self.customers.lock().unwrap().push(customer);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_call(&self, call_sid: &str) -> Result<Option<Call>, AppError> {
        let calls = self
            .calls
            .lock()
            .map_err(|_| AppError::Store("call map poisoned".to_string()))?;
        Ok(calls.get(call_sid).cloned())
    }

    async fn record_initiation(
        &self,
        call_sid: &str,
        customer_id: Option<Uuid>,
        phone_number: &str,
    ) -> Result<(), AppError> {
        self.with_call(call_sid, |call| {
            call.customer_id = customer_id;
            call.phone_number = Some(phone_number.to_string());
            call.status.get_or_insert(CallStatus::Initiated);
        })
    }

    async fn update_call_status(&self, call_sid: &str, status: CallStatus) -> Result<(), AppError> {
        self.with_call(call_sid, |call| {
            if call.completed_at.is_none() {
                call.status = Some(status);
            }
        })
    }

    async fn save_conversation(
        &self,
        call_sid: &str,
        conversation_history: &[ChatTurn],
        customer_responses: &Map<String, Value>,
        should_end: bool,
    ) -> Result<(), AppError> {
        self.with_call(call_sid, |call| {
            if call.completed_at.is_some() {
                return;
            }
            call.conversation_history = conversation_history.to_vec();
            call.customer_responses = customer_responses.clone();
            call.should_end = should_end;
        })
    }

    async fn complete_call(
        &self,
        call_sid: &str,
        customer_id: Option<Uuid>,
        outcome: CallOutcome,
    ) -> Result<bool, AppError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| AppError::Store("call map poisoned".to_string()))?;
        match calls.get_mut(call_sid) {
            Some(call) if call.completed_at.is_none() => {
                let now = OffsetDateTime::now_utc();
                if customer_id.is_some() {
                    call.customer_id = customer_id;
                }
                call.final_outcome = Some(outcome);
                call.completed_at = Some(now);
                call.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        Ok(self.customers()?.iter().find(|c| c.id == id).cloned())
    }

    async fn find_customer_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Customer>, AppError> {
        Ok(self
            .customers()?
            .iter()
            .find(|c| c.phone_number == phone_number)
            .cloned())
    }

    async fn insert_customer(&self, phone_number: &str) -> Result<Customer, AppError> {
        let mut customers = self.customers()?;
        if customers.iter().any(|c| c.phone_number == phone_number) {
            return Err(AppError::Store(format!(
                "customer with phone number {phone_number} already exists"
            )));
        }
        let now = OffsetDateTime::now_utc();
        let customer = Customer {
            id: Uuid::new_v4(),
            phone_number: phone_number.to_string(),
            last_called: None,
            last_call_outcome: None,
            call_history: vec![],
            updated_at: now,
        };
        customers.push(customer.clone());
        Ok(customer)
    }

    async fn record_call_result(
        &self,
        customer_id: Uuid,
        summary: CallSummary,
    ) -> Result<(), AppError> {
        let mut customers = self.customers()?;
        let customer = customers
            .iter_mut()
            .find(|c| c.id == customer_id)
            .ok_or_else(|| AppError::Store(format!("customer {customer_id} not found")))?;
        customer.last_called = Some(summary.timestamp);
        customer.last_call_outcome = Some(summary.outcome);
        customer.updated_at = summary.timestamp;
        if !customer
            .call_history
            .iter()
            .any(|s| s.call_sid == summary.call_sid)
        {
            customer.call_history.push(summary);
        }
        Ok(())
    }

    async fn customers_due(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<Customer>, AppError> {
        Ok(self
            .customers()?
            .iter()
            .filter(|c| c.last_called.map_or(true, |at| at < cutoff))
            .take(limit)
            .cloned()
            .collect())
    }
}
