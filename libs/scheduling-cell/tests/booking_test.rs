use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiremock::matchers::{method, path, query_param};

use scheduling_cell::models::{
    AppointmentKind, AppointmentStatus, CreateAppointmentRequest, SchedulingError, monday_of_week,
};
use scheduling_cell::services::booking::BookingService;
use shared_config::AppConfig;
use shared_utils::test_utils::{MockClinicRows, TestConfig};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn config_for(mock_server: &MockServer) -> Arc<AppConfig> {
    TestConfig::with_supabase_url(&mock_server.uri()).to_arc()
}

/// A Monday that is always inside the booking window, whatever today is.
fn next_monday() -> chrono::NaiveDate {
    monday_of_week(Utc::now().date_naive()) + Duration::days(7)
}

fn booking_request(doctor_id: Uuid, service_ids: Vec<Uuid>, start: NaiveTime) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        doctor_id,
        service_ids,
        date: next_monday(),
        start_time: start,
        kind: AppointmentKind::Offline,
        patient_note: Some("first visit".to_string()),
    }
}

async fn mount_lock_mocks(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;
}

async fn mount_shift_mock(mock_server: &MockServer, doctor_id: &Uuid, shift_id: &Uuid) {
    let date = next_monday();
    let week_start = date.to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/work_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::work_shift(
                shift_id, doctor_id, &week_start, 0, &date.to_string(),
                "08:00:00", "12:00:00", "OTHER",
            )
        ])))
        .mount(mock_server)
        .await;
}

async fn mount_notification_sink(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn booking_inside_shift_succeeds_with_derived_end_time() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let shift_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let date = next_monday();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::service(&service_id, "General examination", 150_000.0, 30)
        ])))
        .mount(&mock_server)
        .await;

    mount_shift_mock(&mock_server, &doctor_id, &shift_id).await;
    mount_lock_mocks(&mock_server).await;
    mount_notification_sink(&mock_server).await;

    // No competing appointments on the day.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let created_id = Uuid::new_v4();
    let mut created = MockClinicRows::appointment(
        &created_id, &doctor_id, &patient_id, &date.to_string(),
        "09:00:00", "09:30:00", "PENDING", "OFFLINE",
    );
    created["work_schedule_id"] = json!(shift_id);

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([created])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_services"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = BookingService::new(config_for(&mock_server));
    let appointment = service
        .create_booking(patient_id, booking_request(doctor_id, vec![service_id], t(9, 0)), "token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.start_time, t(9, 0));
    assert_eq!(appointment.end_time, t(9, 30));
    assert_eq!(appointment.work_schedule_id, Some(shift_id));
}

#[tokio::test]
async fn overlapping_booking_is_rejected() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let shift_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let date = next_monday();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::service(&service_id, "General examination", 150_000.0, 30)
        ])))
        .mount(&mock_server)
        .await;

    mount_shift_mock(&mock_server, &doctor_id, &shift_id).await;
    mount_lock_mocks(&mock_server).await;

    // An active appointment already sits at 09:00-09:30; the requested
    // 09:15-09:45 strictly overlaps it.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::appointment(
                &Uuid::new_v4(), &doctor_id, &Uuid::new_v4(), &date.to_string(),
                "09:00:00", "09:30:00", "PENDING", "OFFLINE",
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = BookingService::new(config_for(&mock_server));
    let err = service
        .create_booking(patient_id, booking_request(doctor_id, vec![service_id], t(9, 15)), "token")
        .await
        .unwrap_err();

    assert_matches!(err, SchedulingError::DoctorTimeConflict { .. });
}

#[tokio::test]
async fn second_booking_for_same_slot_sees_the_first() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let shift_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let date = next_monday();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::service(&service_id, "General examination", 150_000.0, 30)
        ])))
        .mount(&mock_server)
        .await;

    mount_shift_mock(&mock_server, &doctor_id, &shift_id).await;
    mount_lock_mocks(&mock_server).await;
    mount_notification_sink(&mock_server).await;

    // Under the lock the first caller sees a clear calendar; once its
    // insert lands, every later overlap check returns the created row.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    let winner_id = Uuid::new_v4();
    let winner = MockClinicRows::appointment(
        &winner_id, &doctor_id, &patient_id, &date.to_string(),
        "09:00:00", "09:30:00", "PENDING", "OFFLINE",
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([winner.clone()])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([winner])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_services"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = BookingService::new(config_for(&mock_server));

    let first = service
        .create_booking(patient_id, booking_request(doctor_id, vec![service_id], t(9, 0)), "token")
        .await;
    assert!(first.is_ok());

    let second = service
        .create_booking(patient_id, booking_request(doctor_id, vec![service_id], t(9, 0)), "token")
        .await;
    assert_matches!(second.unwrap_err(), SchedulingError::DoctorTimeConflict { .. });
}

#[tokio::test]
async fn dates_outside_the_booking_window_are_rejected() {
    let mock_server = MockServer::start().await;
    let service = BookingService::new(config_for(&mock_server));
    let patient_id = Uuid::new_v4();

    let mut too_far = booking_request(Uuid::new_v4(), vec![Uuid::new_v4()], t(9, 0));
    too_far.date = Utc::now().date_naive() + Duration::days(20);

    assert_matches!(
        service.create_booking(patient_id, too_far, "token").await.unwrap_err(),
        SchedulingError::DateOutOfBookingWindow { .. }
    );

    let mut in_the_past = booking_request(Uuid::new_v4(), vec![Uuid::new_v4()], t(9, 0));
    in_the_past.date = Utc::now().date_naive() - Duration::days(1);

    assert_matches!(
        service.create_booking(patient_id, in_the_past, "token").await.unwrap_err(),
        SchedulingError::DateOutOfBookingWindow { .. }
    );
}

#[tokio::test]
async fn unknown_or_inactive_services_are_rejected() {
    let mock_server = MockServer::start().await;

    // The catalog resolves nothing for the requested ids.
    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = BookingService::new(config_for(&mock_server));
    let err = service
        .create_booking(
            Uuid::new_v4(),
            booking_request(Uuid::new_v4(), vec![Uuid::new_v4()], t(9, 0)),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, SchedulingError::InvalidService);
}

#[tokio::test]
async fn empty_service_selection_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = BookingService::new(config_for(&mock_server));

    let err = service
        .create_booking(
            Uuid::new_v4(),
            booking_request(Uuid::new_v4(), vec![], t(9, 0)),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, SchedulingError::InvalidService);
}

#[tokio::test]
async fn booking_without_covering_shift_is_rejected() {
    let mock_server = MockServer::start().await;
    let service_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::service(&service_id, "General examination", 150_000.0, 30)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/work_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = BookingService::new(config_for(&mock_server));
    let err = service
        .create_booking(
            Uuid::new_v4(),
            booking_request(Uuid::new_v4(), vec![service_id], t(9, 0)),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, SchedulingError::NoAvailableSchedule);
}

#[tokio::test]
async fn booking_running_past_midnight_is_rejected() {
    let mock_server = MockServer::start().await;
    let service_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::service(&service_id, "Extended assessment", 500_000.0, 90)
        ])))
        .mount(&mock_server)
        .await;

    let service = BookingService::new(config_for(&mock_server));
    let err = service
        .create_booking(
            Uuid::new_v4(),
            booking_request(Uuid::new_v4(), vec![service_id], t(23, 0)),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, SchedulingError::InvalidInterval(_));
}

#[tokio::test]
async fn held_lock_bounds_retries_then_conflicts() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let shift_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::service(&service_id, "General examination", 150_000.0, 30)
        ])))
        .mount(&mock_server)
        .await;

    mount_shift_mock(&mock_server, &doctor_id, &shift_id).await;

    // Another instance holds the lock and it is nowhere near expiry.
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "message": "duplicate key value violates unique constraint"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "lock_key": "whatever",
            "expires_at": (Utc::now() + Duration::minutes(5)).to_rfc3339()
        }])))
        .mount(&mock_server)
        .await;

    let service = BookingService::new(config_for(&mock_server));
    let err = service
        .create_booking(
            Uuid::new_v4(),
            booking_request(doctor_id, vec![service_id], t(9, 0)),
            "token",
        )
        .await
        .unwrap_err();

    assert_matches!(err, SchedulingError::ConcurrencyConflict);
}
