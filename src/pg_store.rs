use crate::db_types::{Call, CallOutcome, CallStatus, CallSummary, Customer};
use crate::error::AppError;
use crate::store::RecordStore;
use crate::types::ChatTurn;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, Pool, Postgres};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(FromRow)]
struct CallRow {
    call_sid: String,
    customer_id: Option<Uuid>,
    phone_number: Option<String>,
    status: Option<String>,
    conversation_history: Json<Vec<ChatTurn>>,
    customer_responses: Json<Map<String, Value>>,
    should_end: bool,
    final_outcome: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl From<CallRow> for Call {
    fn from(row: CallRow) -> Self {
        let status = row.status.and_then(|s| {
            s.parse::<CallStatus>()
                .map_err(|e| warn!(call_sid=%row.call_sid, error=%e, "ignoring stored status"))
                .ok()
        });
        let final_outcome = row.final_outcome.and_then(|s| s.parse::<CallOutcome>().ok());
        Call {
            call_sid: row.call_sid,
            customer_id: row.customer_id,
            phone_number: row.phone_number,
            status,
            conversation_history: row.conversation_history.0,
            customer_responses: row.customer_responses.0,
            should_end: row.should_end,
            final_outcome,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(FromRow)]
struct CustomerRow {
    id: Uuid,
    phone_number: String,
    last_called: Option<OffsetDateTime>,
    last_call_outcome: Option<String>,
    call_history: Json<Vec<CallSummary>>,
    updated_at: OffsetDateTime,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            phone_number: row.phone_number,
            last_called: row.last_called,
            last_call_outcome: row.last_call_outcome.and_then(|s| s.parse().ok()),
            call_history: row.call_history.0,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL-backed record store.  JSONB columns hold the document-shaped fields.
pub struct PgStore {
    db_pool: Pool<Postgres>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(error=%e, "failed to connect to database");
                AppError::from(e)
            })?;
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        info!("database migrations applied");
        Ok(Self { db_pool })
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_call(&self, call_sid: &str) -> Result<Option<Call>, AppError> {
        let row = sqlx::query_as::<_, CallRow>(
            "
            select *
            from calls
            where call_sid = $1
            ",
        )
        .bind(call_sid)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid, "failed to fetch call row");
            AppError::from(e)
        })?;
        Ok(row.map(Call::from))
    }

    async fn record_initiation(
        &self,
        call_sid: &str,
        customer_id: Option<Uuid>,
        phone_number: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "
            insert into calls (
              call_sid,
              customer_id,
              phone_number,
              status,
              created_at,
              updated_at
            ) values (
              $1,
              $2,
              $3,
              $4,
              $5,
              $5
            )
            on conflict (call_sid) do update set
              customer_id = excluded.customer_id,
              phone_number = excluded.phone_number,
              status = coalesce(calls.status, excluded.status),
              updated_at = excluded.updated_at
            ",
        )
        .bind(call_sid)
        .bind(customer_id)
        .bind(phone_number)
        .bind(CallStatus::Initiated.as_str())
        .bind(OffsetDateTime::now_utc())
        .execute(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid, "failed to upsert call initiation");
            AppError::from(e)
        })?;
        Ok(())
    }

    async fn update_call_status(&self, call_sid: &str, status: CallStatus) -> Result<(), AppError> {
        sqlx::query(
            "
            insert into calls (call_sid, status, updated_at)
            values ($1, $2, $3)
            on conflict (call_sid) do update set
              status = case
                when calls.completed_at is not null then calls.status
                else excluded.status
              end,
              updated_at = excluded.updated_at
            ",
        )
        .bind(call_sid)
        .bind(status.as_str())
        .bind(OffsetDateTime::now_utc())
        .execute(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid, "failed to upsert call status");
            AppError::from(e)
        })?;
        Ok(())
    }

    async fn save_conversation(
        &self,
        call_sid: &str,
        conversation_history: &[ChatTurn],
        customer_responses: &Map<String, Value>,
        should_end: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            "
            insert into calls (
              call_sid,
              conversation_history,
              customer_responses,
              should_end,
              updated_at
            ) values (
              $1,
              $2,
              $3,
              $4,
              $5
            )
            on conflict (call_sid) do update set
              conversation_history = excluded.conversation_history,
              customer_responses = excluded.customer_responses,
              should_end = excluded.should_end,
              updated_at = excluded.updated_at
            where calls.completed_at is null
            ",
        )
        .bind(call_sid)
        .bind(Json(conversation_history))
        .bind(Json(customer_responses))
        .bind(should_end)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid, "failed to upsert conversation");
            AppError::from(e)
        })?;
        Ok(())
    }

    async fn complete_call(
        &self,
        call_sid: &str,
        customer_id: Option<Uuid>,
        outcome: CallOutcome,
    ) -> Result<bool, AppError> {
        let now = OffsetDateTime::now_utc();
        let res = sqlx::query(
            "
            update calls set
              customer_id = coalesce($2, customer_id),
              final_outcome = $3,
              completed_at = $4,
              updated_at = $4
            where call_sid = $1
              and completed_at is null
            ",
        )
        .bind(call_sid)
        .bind(customer_id)
        .bind(outcome.as_str())
        .bind(now)
        .execute(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid, "failed to complete call");
            AppError::from(e)
        })?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "
            select *
            from customers
            where id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, customer_id=%id, "failed to fetch customer row");
            AppError::from(e)
        })?;
        Ok(row.map(Customer::from))
    }

    async fn find_customer_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Customer>, AppError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "
            select *
            from customers
            where phone_number = $1
            ",
        )
        .bind(phone_number)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, "failed to fetch customer by phone");
            AppError::from(e)
        })?;
        Ok(row.map(Customer::from))
    }

    async fn insert_customer(&self, phone_number: &str) -> Result<Customer, AppError> {
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, CustomerRow>(
            "
            insert into customers (
              id,
              phone_number,
              created_at,
              updated_at
            ) values (
              $1,
              $2,
              $3,
              $3
            )
            returning *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(phone_number)
        .bind(now)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, "failed to insert customer row");
            AppError::from(e)
        })?;
        Ok(row.into())
    }

    async fn record_call_result(
        &self,
        customer_id: Uuid,
        summary: CallSummary,
    ) -> Result<(), AppError> {
        let res = sqlx::query(
            "
            update customers set
              last_called = $2,
              last_call_outcome = $3,
              updated_at = $2,
              call_history = case
                when call_history @> jsonb_build_array(jsonb_build_object('call_sid', $5::text))
                  then call_history
                else call_history || $4
              end
            where id = $1
            ",
        )
        .bind(customer_id)
        .bind(summary.timestamp)
        .bind(summary.outcome.as_str())
        .bind(Json(vec![&summary]))
        .bind(&summary.call_sid)
        .execute(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, customer_id=%customer_id, "failed to record call result");
            AppError::from(e)
        })?;
        if res.rows_affected() == 0 {
            return Err(AppError::Store(format!("customer {customer_id} not found")));
        }
        Ok(())
    }

    async fn customers_due(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<Customer>, AppError> {
        let rows = sqlx::query_as::<_, CustomerRow>(
            "
            select *
            from customers
            where last_called is null
               or last_called < $1
            limit $2
            ",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| {
            error!(error=%e, "failed to select customers due for a call");
            AppError::from(e)
        })?;
        Ok(rows.into_iter().map(Customer::from).collect())
    }
}
