// libs/scheduling-cell/src/services/booking.rs
use chrono::{Duration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use notification_cell::models::{AppointmentEvent, AppointmentEventContext};
use notification_cell::service::NotificationService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentDetail, AppointmentSearchQuery, AppointmentStatus,
    CreateAppointmentRequest, MedicalService, SchedulingError, SchedulingPolicy, TimeSlot,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::locks::{SchedulingLockService, booking_lock_key};
use crate::services::pricing::PricingService;
use crate::services::schedule::WeekScheduleService;

pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    pricing: PricingService,
    schedule: WeekScheduleService,
    conflict: ConflictDetectionService,
    locks: SchedulingLockService,
    policy: SchedulingPolicy,
    config: Arc<AppConfig>,
}

impl BookingService {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(&config));
        let policy = SchedulingPolicy::default();

        Self {
            pricing: PricingService::new(Arc::clone(&supabase)),
            schedule: WeekScheduleService::new(&config),
            conflict: ConflictDetectionService::new(Arc::clone(&supabase)),
            locks: SchedulingLockService::new(Arc::clone(&supabase), policy.lock_timeout_seconds),
            supabase,
            policy,
            config,
        }
    }

    /// Book a patient into a doctor's published availability.
    ///
    /// The overlap check and the insert run under a per-(doctor, date)
    /// advisory lock so two concurrent requests for the same slot
    /// cannot both pass the check. Lock contention is retried a bounded
    /// number of times before giving up.
    pub async fn create_booking(
        &self,
        patient_id: Uuid,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        info!("Booking appointment for patient {} with doctor {}",
              patient_id, request.doctor_id);

        let today = Utc::now().date_naive();
        let latest = self.policy.booking_window_end(today);
        if request.date < today || request.date > latest {
            return Err(SchedulingError::DateOutOfBookingWindow {
                date: request.date,
                latest,
            });
        }

        let quote = self.pricing.quote(&request.service_ids, auth_token).await?;

        let (end_time, wrapped) = request.start_time
            .overflowing_add_signed(Duration::minutes(quote.total_duration_minutes));
        if wrapped != 0 {
            return Err(SchedulingError::InvalidInterval(format!(
                "appointment starting {} with {} minutes of services would run past midnight",
                request.start_time, quote.total_duration_minutes
            )));
        }

        let slot = TimeSlot::new(request.date, request.start_time, end_time)?;

        let shift = self.schedule
            .bookable_window(request.doctor_id, &slot, auth_token)
            .await?;

        let lock_key = booking_lock_key(request.doctor_id, request.date);

        for attempt in 1..=self.policy.max_booking_attempts {
            if self.locks.acquire(&lock_key).await? {
                let result = async {
                    self.conflict
                        .ensure_slot_free(request.doctor_id, &slot, auth_token)
                        .await?;
                    self.insert_appointment(patient_id, &request, &slot, shift.id, &quote.services,
                                            quote.total_price, auth_token)
                        .await
                }.await;

                if let Err(e) = self.locks.release(&lock_key).await {
                    warn!("Failed to release booking lock {}: {}", lock_key, e);
                }

                let appointment = result?;

                NotificationService::dispatch(
                    Arc::clone(&self.config),
                    AppointmentEvent::Created,
                    AppointmentEventContext {
                        appointment_id: appointment.id,
                        doctor_id: appointment.doctor_id,
                        patient_id: appointment.patient_id,
                        date: appointment.date,
                        start_time: appointment.start_time,
                        end_time: appointment.end_time,
                    },
                    auth_token.to_string(),
                );

                info!("Appointment {} booked for patient {} at {}",
                      appointment.id, patient_id, slot);
                return Ok(appointment);
            }

            debug!("Booking lock busy for doctor {} on {} (attempt {}/{})",
                   request.doctor_id, request.date, attempt, self.policy.max_booking_attempts);
            tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
        }

        Err(SchedulingError::ConcurrencyConflict)
    }

    async fn insert_appointment(
        &self,
        patient_id: Uuid,
        request: &CreateAppointmentRequest,
        slot: &TimeSlot,
        work_schedule_id: Uuid,
        services: &[MedicalService],
        total_price: f64,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let now = Utc::now();

        let appointment_data = json!({
            "doctor_id": request.doctor_id,
            "patient_id": patient_id,
            "date": slot.date.to_string(),
            "start_time": slot.start_time.format("%H:%M:%S").to_string(),
            "end_time": slot.end_time.format("%H:%M:%S").to_string(),
            "kind": request.kind.to_string(),
            "status": AppointmentStatus::Pending.to_string(),
            "patient_note": request.patient_note,
            "total_price": total_price,
            "work_schedule_id": work_schedule_id,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            Some(auth_token),
            Some(appointment_data),
            Some(representation_headers()),
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let appointment: Appointment = result.into_iter().next()
            .ok_or_else(|| SchedulingError::DatabaseError("Failed to create appointment".to_string()))
            .and_then(|row| serde_json::from_value(row)
                .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse created appointment: {}", e))))?;

        let junction_rows: Vec<Value> = services.iter()
            .map(|service| json!({
                "appointment_id": appointment.id,
                "service_id": service.id
            }))
            .collect();

        let _: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointment_services",
            Some(auth_token),
            Some(Value::Array(junction_rows)),
            Some(representation_headers()),
        ).await.map_err(|e| SchedulingError::DatabaseError(format!("Failed to attach services: {}", e)))?;

        Ok(appointment)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let first = result.into_iter().next().ok_or(SchedulingError::NotFound)?;

        serde_json::from_value(first)
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    pub async fn get_appointment_detail(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<AppointmentDetail, SchedulingError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;
        let services = self.appointment_services(appointment_id, auth_token).await?;

        Ok(AppointmentDetail { appointment, services })
    }

    /// Appointments visible to a user: the ones they booked or the ones
    /// on their own calendar.
    pub async fn search_appointments(
        &self,
        user_id: Uuid,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        debug!("Searching appointments for user {} with filters: {:?}", user_id, query);

        let mut query_parts = vec![
            format!("or=(doctor_id.eq.{},patient_id.eq.{})", user_id, user_id),
        ];

        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("date=gte.{}", from_date));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("date=lte.{}", to_date));
        }

        let mut path = format!("/rest/v1/appointments?{}&order=created_at.desc",
                               query_parts.join("&"));

        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    /// The service lines snapshotted onto an appointment at booking
    /// time. No active filter: services retired since then still belong
    /// to the historical record.
    async fn appointment_services(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<MedicalService>, SchedulingError> {
        let path = format!("/rest/v1/appointment_services?appointment_id=eq.{}&select=service_id",
                           appointment_id);
        let junction: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let service_ids: Vec<String> = junction.iter()
            .filter_map(|row| row.get("service_id").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect();

        if service_ids.is_empty() {
            return Ok(vec![]);
        }

        let path = format!("/rest/v1/services?id=in.({})", service_ids.join(","));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<MedicalService>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse services: {}", e)))
    }
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));
    headers
}
