// libs/scheduling-cell/src/services/locks.rs
//
// Database-backed advisory locks for the check-then-act sections of
// booking and schedule registration. A lock is a row in the
// scheduling_locks table; the unique key on lock_key makes acquisition
// atomic even across multiple API instances.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::SchedulingError;

pub struct SchedulingLockService {
    supabase: Arc<SupabaseClient>,
    lock_timeout_seconds: u64,
}

impl SchedulingLockService {
    pub fn new(supabase: Arc<SupabaseClient>, lock_timeout_seconds: u64) -> Self {
        Self { supabase, lock_timeout_seconds }
    }

    /// Try to take the lock. Returns false when another holder has it
    /// and it has not expired yet.
    pub async fn acquire(&self, lock_key: &str) -> Result<bool, SchedulingError> {
        if self.try_insert_lock(lock_key).await? {
            debug!("Scheduling lock acquired: {}", lock_key);
            return Ok(true);
        }

        // Lock row exists; a crashed holder may have left it behind.
        if self.cleanup_if_expired(lock_key).await? {
            let acquired = self.try_insert_lock(lock_key).await?;
            if acquired {
                debug!("Scheduling lock acquired after cleanup: {}", lock_key);
            }
            return Ok(acquired);
        }

        Ok(false)
    }

    pub async fn release(&self, lock_key: &str) -> Result<(), SchedulingError> {
        let _: Vec<Value> = self.supabase.request_with_headers(
            reqwest::Method::DELETE,
            &format!("/rest/v1/scheduling_locks?lock_key=eq.{}", lock_key),
            None,
            None,
            Some(representation_headers()),
        ).await.map_err(|e| SchedulingError::DatabaseError(format!("Lock release failed: {}", e)))?;

        debug!("Scheduling lock released: {}", lock_key);
        Ok(())
    }

    async fn try_insert_lock(&self, lock_key: &str) -> Result<bool, SchedulingError> {
        let now = Utc::now();
        let lock_data = json!({
            "lock_key": lock_key,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + Duration::seconds(self.lock_timeout_seconds as i64)).to_rfc3339(),
            "holder": format!("scheduler_{}", Uuid::new_v4())
        });

        // The unique index on lock_key turns a concurrent insert into a
        // conflict response, which we read as "somebody else holds it".
        match self.supabase
            .request_with_headers::<Value>(
                reqwest::Method::POST,
                "/rest/v1/scheduling_locks",
                None,
                Some(lock_data),
                Some(representation_headers()),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Delete the lock row if its expiry has passed. Returns true when a
    /// stale row was removed and acquisition is worth retrying.
    async fn cleanup_if_expired(&self, lock_key: &str) -> Result<bool, SchedulingError> {
        let response: Value = self.supabase
            .request::<Value>(
                reqwest::Method::GET,
                &format!("/rest/v1/scheduling_locks?lock_key=eq.{}&select=*", lock_key),
                None,
                None,
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(format!("Lock check failed: {}", e)))?;

        if let Some(lock) = response.as_array().and_then(|locks| locks.first()) {
            if let Some(expires_at_str) = lock.get("expires_at").and_then(|v| v.as_str()) {
                if let Ok(expires_at) = DateTime::parse_from_rfc3339(expires_at_str) {
                    if expires_at.with_timezone(&Utc) < Utc::now() {
                        self.release(lock_key).await?;
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));
    headers
}

pub fn booking_lock_key(doctor_id: Uuid, date: chrono::NaiveDate) -> String {
    format!("booking_{}_{}", doctor_id, date)
}

pub fn schedule_lock_key(employee_id: Uuid, week_start: chrono::NaiveDate) -> String {
    format!("schedule_{}_{}", employee_id, week_start)
}
