use crate::db_types::Customer;
use crate::error::AppError;
use crate::store::RecordStore;
use crate::twilio::VoiceGateway;
use crate::utils::mask_phone;

use time::{Duration, OffsetDateTime};
use tracing::{error, info};

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Customers called more recently than this are left alone.
pub const RECALL_INTERVAL: Duration = Duration::days(30);

/// Customers never called or not called within the recall interval, at most `limit` of
/// them.  Order is whatever the store returns and may differ between runs.
pub async fn select_candidates(
    store: &dyn RecordStore,
    limit: usize,
    now: OffsetDateTime,
) -> Result<Vec<Customer>, AppError> {
    store.customers_due(now - RECALL_INTERVAL, limit).await
}

/// Place a call to every candidate.  A failure for one customer is logged and the batch
/// moves on.  Returns the number of calls the gateway accepted.
pub async fn launch(
    store: &dyn RecordStore,
    gateway: &dyn VoiceGateway,
    webhook_base: &str,
    candidates: &[Customer],
) -> usize {
    let mut calls_initiated = 0;
    for customer in candidates {
        let phone = mask_phone(&customer.phone_number);
        let call_sid = match gateway
            .place_call(&customer.phone_number, webhook_base)
            .await
        {
            Ok(call_sid) => call_sid,
            Err(e) => {
                error!(customer_id=%customer.id, phone=%phone, error=%e, "failed to initiate call");
                continue;
            }
        };
        calls_initiated += 1;

        if let Err(e) = store
            .record_initiation(&call_sid, Some(customer.id), &customer.phone_number)
            .await
        {
            error!(call_sid=%call_sid, customer_id=%customer.id, error=%e, "call placed but not recorded");
        }
    }
    info!(candidates = candidates.len(), calls_initiated, "campaign batch done");
    calls_initiated
}
