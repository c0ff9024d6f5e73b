use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, SchedulingError, TimeSlot};

/// Statuses that keep a claim on the doctor's calendar, as a PostgREST
/// `in.` filter.
pub const ACTIVE_STATUS_FILTER: &str = "in.(PENDING,CONFIRMED,IN_PROCESS)";

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// All active appointments of the doctor that overlap the slot.
    /// The database narrows with the half-open comparison; the result is
    /// re-checked here so filter drift cannot produce false positives.
    pub async fn find_overlapping(
        &self,
        doctor_id: Uuid,
        slot: &TimeSlot,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        debug!("Checking conflicts for doctor {} at {}", doctor_id, slot);

        let mut query_parts = vec![
            format!("doctor_id=eq.{}", doctor_id),
            format!("date=eq.{}", slot.date),
            format!("status={}", ACTIVE_STATUS_FILTER),
            format!("start_time=lt.{}", slot.end_time.format("%H:%M:%S")),
            format!("end_time=gt.{}", slot.start_time.format("%H:%M:%S")),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}&order=start_time.asc",
                           query_parts.join("&"));

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        Ok(appointments.into_iter()
            .filter(|apt| apt.status.is_active() && apt.time_slot().overlaps(slot))
            .collect())
    }

    /// Verdict form of the overlap check used on the booking path.
    pub async fn ensure_slot_free(
        &self,
        doctor_id: Uuid,
        slot: &TimeSlot,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let conflicting = self.find_overlapping(doctor_id, slot, None, auth_token).await?;

        if let Some(existing) = conflicting.first() {
            warn!("Conflict detected for doctor {}: requested {} collides with appointment {}",
                  doctor_id, slot, existing.id);
            return Err(SchedulingError::DoctorTimeConflict {
                date: slot.date,
                start_time: slot.start_time,
                end_time: slot.end_time,
            });
        }

        Ok(())
    }
}
