// libs/scheduling-cell/src/services/lifecycle.rs
//
// The appointment state machine. Transition planning is a pure function
// over (current appointment, requested transition): it returns the new
// status, the row updates, the follow-up effects, and the notification
// event. Applying a plan is a compare-and-swap on the stored status, so
// two writers racing the same appointment cannot both advance it.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use notification_cell::models::{AppointmentEvent, AppointmentEventContext};
use notification_cell::service::NotificationService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentKind, AppointmentStatus, SchedulingError, SchedulingPolicy,
};
use crate::services::rooms::RoomAllocationService;

#[derive(Debug, Clone)]
pub enum TransitionRequest {
    Confirm {
        room_id: Option<Uuid>,
        doctor_note: Option<String>,
    },
    Start,
    Complete,
    Cancel {
        reason: String,
    },
}

impl TransitionRequest {
    pub fn target_status(&self) -> AppointmentStatus {
        match self {
            TransitionRequest::Confirm { .. } => AppointmentStatus::Confirmed,
            TransitionRequest::Start => AppointmentStatus::InProcess,
            TransitionRequest::Complete => AppointmentStatus::Completed,
            TransitionRequest::Cancel { .. } => AppointmentStatus::Cancelled,
        }
    }
}

/// Work the state machine schedules to run right after the status write
/// lands.
#[derive(Debug, Clone, PartialEq)]
pub enum PostTransitionEffect {
    EnsureMedicalRecord {
        appointment_id: Uuid,
    },
    IncrementCompletedPatients {
        doctor_id: Uuid,
    },
    CreatePaymentRecord {
        appointment_id: Uuid,
        patient_id: Option<Uuid>,
        amount: f64,
    },
}

#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub expected_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
    pub updates: Map<String, Value>,
    pub effects: Vec<PostTransitionEffect>,
    pub event: AppointmentEvent,
}

/// Decide what a transition does, without touching storage. The prior
/// state comes in explicitly and the outcome is returned; nothing is
/// smuggled through instance fields or persistence hooks.
pub fn plan_transition(
    appointment: &Appointment,
    request: &TransitionRequest,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, SchedulingError> {
    let from = appointment.status;
    let to = request.target_status();

    let legal = matches!(
        (from, request),
        (AppointmentStatus::Pending, TransitionRequest::Confirm { .. })
            | (AppointmentStatus::Pending, TransitionRequest::Cancel { .. })
            | (AppointmentStatus::Confirmed, TransitionRequest::Start)
            | (AppointmentStatus::InProcess, TransitionRequest::Complete)
    );

    if !legal {
        return Err(SchedulingError::InvalidStateTransition { from, to });
    }

    let mut updates = Map::new();
    updates.insert("status".to_string(), json!(to.to_string()));
    updates.insert("updated_at".to_string(), json!(now.to_rfc3339()));

    let mut effects = Vec::new();

    let event = match request {
        TransitionRequest::Confirm { room_id, doctor_note } => {
            if appointment.date < today {
                return Err(SchedulingError::AppointmentDatePassed { date: appointment.date });
            }

            updates.insert("confirmed_at".to_string(), json!(now.to_rfc3339()));
            if let Some(note) = doctor_note {
                updates.insert("doctor_note".to_string(), json!(note));
            }

            match appointment.kind {
                AppointmentKind::Offline => {
                    let room_id = room_id.ok_or(SchedulingError::RoomRequiredForOfflineConfirmation)?;
                    updates.insert("room_id".to_string(), json!(room_id));
                    updates.insert("meeting_link".to_string(), Value::Null);
                }
                AppointmentKind::Online => {
                    updates.insert("room_id".to_string(), Value::Null);
                    updates.insert(
                        "meeting_link".to_string(),
                        json!(format!("https://meet.clinic.local/{}", appointment.id)),
                    );
                }
            }

            AppointmentEvent::Confirmed
        }
        TransitionRequest::Cancel { reason } => {
            updates.insert("cancelled_at".to_string(), json!(now.to_rfc3339()));
            updates.insert("cancellation_reason".to_string(), json!(reason));
            AppointmentEvent::Cancelled
        }
        TransitionRequest::Start => {
            effects.push(PostTransitionEffect::EnsureMedicalRecord {
                appointment_id: appointment.id,
            });
            AppointmentEvent::Started
        }
        TransitionRequest::Complete => {
            updates.insert("completed_at".to_string(), json!(now.to_rfc3339()));
            effects.push(PostTransitionEffect::IncrementCompletedPatients {
                doctor_id: appointment.doctor_id,
            });
            effects.push(PostTransitionEffect::CreatePaymentRecord {
                appointment_id: appointment.id,
                patient_id: appointment.patient_id,
                amount: appointment.total_price,
            });
            AppointmentEvent::Completed
        }
    };

    Ok(TransitionPlan {
        expected_status: from,
        new_status: to,
        updates,
        effects,
        event,
    })
}

pub struct AppointmentLifecycleService {
    supabase: Arc<SupabaseClient>,
    rooms: RoomAllocationService,
    policy: SchedulingPolicy,
    config: Arc<AppConfig>,
}

impl AppointmentLifecycleService {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(&config));
        let rooms = RoomAllocationService::new(Arc::clone(&supabase));

        Self {
            supabase,
            rooms,
            policy: SchedulingPolicy::default(),
            config,
        }
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

    /// Drive an appointment through one transition. Re-plans and retries
    /// when a concurrent writer moves the row first; after the bounded
    /// attempts the caller gets a conflict.
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        request: TransitionRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        for _attempt in 1..=self.policy.max_transition_attempts {
            let appointment = self.get_appointment(appointment_id, auth_token).await?;

            let now = Utc::now();
            let plan = plan_transition(&appointment, &request, now.date_naive(), now)?;

            // Room occupancy is storage state, so the pure planner cannot
            // check it; guard here before committing.
            if let TransitionRequest::Confirm { room_id: Some(room_id), .. } = &request {
                if appointment.kind == AppointmentKind::Offline {
                    self.rooms.ensure_available(*room_id, &appointment, auth_token).await?;
                }
            }

            match self.apply_plan(appointment_id, &plan, auth_token).await? {
                Some(updated) => {
                    self.run_effects(&plan.effects, auth_token).await?;
                    self.dispatch_event(plan.event, &updated, auth_token);

                    info!("Appointment {} transitioned {} -> {}",
                          appointment_id, plan.expected_status, plan.new_status);
                    return Ok(updated);
                }
                None => {
                    debug!("Appointment {} changed under us, re-planning", appointment_id);
                    continue;
                }
            }
        }

        Err(SchedulingError::ConcurrencyConflict)
    }

    /// Compare-and-swap status update. Returns None when no row matched
    /// the expected status, i.e. a concurrent transition won.
    async fn apply_plan(
        &self,
        appointment_id: Uuid,
        plan: &TransitionPlan,
        auth_token: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id, plan.expected_status,
        );

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(plan.updates.clone())),
            Some(representation_headers()),
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => {
                let updated = serde_json::from_value(row)
                    .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointment: {}", e)))?;
                Ok(Some(updated))
            }
            None => Ok(None),
        }
    }

    async fn run_effects(
        &self,
        effects: &[PostTransitionEffect],
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        for effect in effects {
            match effect {
                PostTransitionEffect::EnsureMedicalRecord { appointment_id } => {
                    self.ensure_medical_record(*appointment_id, auth_token).await?;
                }
                PostTransitionEffect::IncrementCompletedPatients { doctor_id } => {
                    self.increment_completed_patients(*doctor_id, auth_token).await?;
                }
                PostTransitionEffect::CreatePaymentRecord { appointment_id, patient_id, amount } => {
                    // Billing is downstream; its failure must not undo a
                    // completed consultation.
                    if let Err(e) = self
                        .create_payment_record(*appointment_id, *patient_id, *amount, auth_token)
                        .await
                    {
                        warn!("Payment record creation failed for appointment {}: {}",
                              appointment_id, e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Idempotent shell creation: re-running the Start transition's
    /// effect never duplicates the record.
    async fn ensure_medical_record(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static(
            "resolution=ignore-duplicates,return=representation"));

        let _: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/medical_records?on_conflict=appointment_id",
            Some(auth_token),
            Some(json!([{ "appointment_id": appointment_id }])),
            Some(headers),
        ).await.map_err(|e| SchedulingError::DatabaseError(format!("Medical record creation failed: {}", e)))?;

        debug!("Medical record ensured for appointment {}", appointment_id);
        Ok(())
    }

    async fn increment_completed_patients(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let _: Value = self.supabase.rpc(
            "increment_completed_patients",
            Some(auth_token),
            json!({ "p_doctor_id": doctor_id }),
        ).await.map_err(|e| SchedulingError::DatabaseError(format!("Counter update failed: {}", e)))?;

        Ok(())
    }

    async fn create_payment_record(
        &self,
        appointment_id: Uuid,
        patient_id: Option<Uuid>,
        amount: f64,
        auth_token: &str,
    ) -> anyhow::Result<()> {
        let _: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/payments",
            Some(auth_token),
            Some(json!({
                "appointment_id": appointment_id,
                "patient_id": patient_id,
                "amount": amount,
                "status": "UNPAID"
            })),
            Some(representation_headers()),
        ).await?;

        debug!("Payment record created for appointment {} ({})", appointment_id, amount);
        Ok(())
    }

    fn dispatch_event(&self, event: AppointmentEvent, appointment: &Appointment, auth_token: &str) {
        NotificationService::dispatch(
            Arc::clone(&self.config),
            event,
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
    }
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));
    headers
}
