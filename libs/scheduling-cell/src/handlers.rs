// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentSearchQuery, CancelAppointmentRequest, ConfirmAppointmentRequest,
    CreateAppointmentRequest, RegisterWeekRequest, SchedulingError,
};
use crate::services::booking::BookingService;
use crate::services::lifecycle::{AppointmentLifecycleService, TransitionRequest};
use crate::services::rooms::RoomAllocationService;
use crate::services::schedule::WeekScheduleService;

use shared_database::supabase::SupabaseClient;

fn map_scheduling_error(e: SchedulingError) -> AppError {
    let message = e.to_string();
    match e {
        SchedulingError::NotFound => AppError::NotFound(message),
        SchedulingError::DoctorTimeConflict { .. }
        | SchedulingError::ConcurrencyConflict
        | SchedulingError::RoomNotAvailable { .. } => AppError::Conflict(message),
        SchedulingError::DatabaseError(_) => AppError::Database(message),
        _ => AppError::ValidationError(message),
    }
}

fn user_uuid(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Invalid user identifier".to_string()))
}

fn ensure_appointment_owner(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    let is_doctor = appointment.doctor_id.to_string() == user.id;
    let is_patient = appointment.patient_id
        .map(|patient_id| patient_id.to_string() == user.id)
        .unwrap_or(false);

    if !is_doctor && !is_patient {
        return Err(AppError::Auth("Not authorized to access this appointment".to_string()));
    }

    Ok(())
}

fn ensure_appointment_doctor(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if !user.is_doctor() || appointment.doctor_id.to_string() != user.id {
        return Err(AppError::Auth("Only the appointment's doctor may do this".to_string()));
    }

    Ok(())
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_patient() {
        return Err(AppError::Auth("Only patients can book appointments".to_string()));
    }

    let patient_id = user_uuid(&user)?;
    let booking_service = BookingService::new(Arc::clone(&state));

    let appointment = booking_service
        .create_booking(patient_id, request, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let user_id = user_uuid(&user)?;
    let booking_service = BookingService::new(Arc::clone(&state));

    let appointments = booking_service
        .search_appointments(user_id, query, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "count": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(Arc::clone(&state));

    let detail = booking_service
        .get_appointment_detail(appointment_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    ensure_appointment_owner(&user, &detail.appointment)?;

    Ok(Json(json!({ "appointment": detail })))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ConfirmAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let lifecycle_service = AppointmentLifecycleService::new(Arc::clone(&state));

    let appointment = lifecycle_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;
    ensure_appointment_doctor(&user, &appointment)?;

    let updated = lifecycle_service
        .transition(
            appointment_id,
            TransitionRequest::Confirm {
                room_id: request.room_id,
                doctor_note: request.doctor_note,
            },
            auth.token(),
        )
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "appointment": updated })))
}

#[axum::debug_handler]
pub async fn start_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let lifecycle_service = AppointmentLifecycleService::new(Arc::clone(&state));

    let appointment = lifecycle_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;
    ensure_appointment_doctor(&user, &appointment)?;

    let updated = lifecycle_service
        .transition(appointment_id, TransitionRequest::Start, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "appointment": updated })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let lifecycle_service = AppointmentLifecycleService::new(Arc::clone(&state));

    let appointment = lifecycle_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;
    ensure_appointment_doctor(&user, &appointment)?;

    let updated = lifecycle_service
        .transition(appointment_id, TransitionRequest::Complete, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "appointment": updated })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let lifecycle_service = AppointmentLifecycleService::new(Arc::clone(&state));

    let appointment = lifecycle_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;
    ensure_appointment_owner(&user, &appointment)?;

    let updated = lifecycle_service
        .transition(
            appointment_id,
            TransitionRequest::Cancel { reason: request.reason },
            auth.token(),
        )
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "appointment": updated })))
}

#[axum::debug_handler]
pub async fn available_rooms(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(Arc::clone(&state));

    let appointment = booking_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;
    ensure_appointment_doctor(&user, &appointment)?;

    let room_service = RoomAllocationService::new(Arc::new(SupabaseClient::new(&state)));
    let rooms = room_service
        .available_rooms(&appointment, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "rooms": rooms })))
}

// ==============================================================================
// WORK SCHEDULE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn current_week_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_employee() {
        return Err(AppError::Auth("Only clinic employees have work schedules".to_string()));
    }

    let employee_id = user_uuid(&user)?;
    let schedule_service = WeekScheduleService::new(&state);

    let week = schedule_service
        .current_week(employee_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!(week)))
}

#[axum::debug_handler]
pub async fn next_week_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_employee() {
        return Err(AppError::Auth("Only clinic employees have work schedules".to_string()));
    }

    let employee_id = user_uuid(&user)?;
    let schedule_service = WeekScheduleService::new(&state);

    let week = schedule_service
        .next_week(employee_id, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!(week)))
}

#[axum::debug_handler]
pub async fn register_week_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RegisterWeekRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_employee() {
        return Err(AppError::Auth("Only clinic employees can register schedules".to_string()));
    }

    let employee_id = user_uuid(&user)?;
    let week_start = request.week_start;
    let schedule_service = WeekScheduleService::new(&state);

    let schedules = schedule_service
        .register_week(employee_id, request, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "mode": "edit",
        "week_start": week_start,
        "week_end": week_start + chrono::Duration::days(6),
        "schedules": schedules
    })))
}
