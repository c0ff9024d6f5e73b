use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiremock::matchers::{body_partial_json, method, path};

use notification_cell::models::{AppointmentEvent, AppointmentEventContext};
use notification_cell::service::NotificationService;
use shared_utils::test_utils::TestConfig;

fn context() -> AppointmentEventContext {
    AppointmentEventContext {
        appointment_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        patient_id: Some(Uuid::new_v4()),
        date: NaiveDate::from_ymd_opt(2026, 9, 7).unwrap(),
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
    }
}

#[tokio::test]
async fn created_event_notifies_doctor_and_patient() {
    let mock_server = MockServer::start().await;
    let ctx = context();

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(body_partial_json(json!([
            { "recipient_id": ctx.doctor_id, "type": "appointment_created" },
            { "recipient_id": ctx.patient_id, "type": "appointment_created" }
        ])))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = NotificationService::new(&config);

    service.deliver(AppointmentEvent::Created, &ctx, "token").await.unwrap();
}

#[tokio::test]
async fn confirmed_event_notifies_the_patient_only() {
    let mock_server = MockServer::start().await;
    let ctx = context();

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(body_partial_json(json!([
            { "recipient_id": ctx.patient_id, "type": "appointment_confirmed" }
        ])))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = NotificationService::new(&config);

    service.deliver(AppointmentEvent::Confirmed, &ctx, "token").await.unwrap();
}

#[tokio::test]
async fn walk_in_appointments_without_patient_still_notify_the_doctor() {
    let mock_server = MockServer::start().await;
    let mut ctx = context();
    ctx.patient_id = None;

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(body_partial_json(json!([
            { "recipient_id": ctx.doctor_id }
        ])))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = NotificationService::new(&config);

    service.deliver(AppointmentEvent::Created, &ctx, "token").await.unwrap();
}
