use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiremock::matchers::{method, path};

use scheduling_cell::models::monday_of_week;
use scheduling_cell::router::scheduling_routes;
use shared_utils::test_utils::{JwtTestUtils, MockClinicRows, TestConfig};

fn test_app(test_config: &TestConfig) -> Router {
    scheduling_routes(test_config.to_arc())
}

fn next_monday() -> chrono::NaiveDate {
    monday_of_week(Utc::now().date_naive()) + Duration::days(7)
}

fn booking_payload(doctor_id: &Uuid, service_id: &Uuid) -> String {
    json!({
        "doctor_id": doctor_id,
        "service_ids": [service_id],
        "date": next_monday().to_string(),
        "start_time": "09:00:00",
        "kind": "OFFLINE",
        "patient_note": "first visit"
    }).to_string()
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let test_config = TestConfig::default();
    let app = test_app(&test_config);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/appointments")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn doctors_cannot_book_appointments() {
    let test_config = TestConfig::default();
    let app = test_app(&test_config);

    let doctor = shared_utils::test_utils::TestUser::doctor("doc@clinic.example");
    let token = JwtTestUtils::create_test_token(&doctor, &test_config.jwt_secret, None);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/appointments")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(Body::from(booking_payload(&Uuid::new_v4(), &Uuid::new_v4())))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_tokens_are_rejected() {
    let test_config = TestConfig::default();
    let app = test_app(&test_config);

    let patient = shared_utils::test_utils::TestUser::patient("pat@clinic.example");
    let token = JwtTestUtils::create_expired_token(&patient, &test_config.jwt_secret);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/appointments")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn patients_can_book_through_the_api() {
    let mock_server = MockServer::start().await;
    let test_config = TestConfig::with_supabase_url(&mock_server.uri());
    let app = test_app(&test_config);

    let patient = shared_utils::test_utils::TestUser::patient("pat@clinic.example");
    let patient_id = Uuid::parse_str(&patient.id).unwrap();
    let doctor_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let shift_id = Uuid::new_v4();
    let date = next_monday();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::service(&service_id, "General examination", 150_000.0, 30)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/work_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockClinicRows::work_shift(
                &shift_id, &doctor_id, &date.to_string(), 0, &date.to_string(),
                "08:00:00", "12:00:00", "OTHER")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockClinicRows::appointment(
                &Uuid::new_v4(), &doctor_id, &patient_id, &date.to_string(),
                "09:00:00", "09:30:00", "PENDING", "OFFLINE")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_services"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let token = JwtTestUtils::create_test_token(&patient, &test_config.jwt_secret, None);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/appointments")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(Body::from(booking_payload(&doctor_id, &service_id)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn patients_cannot_register_work_schedules() {
    let test_config = TestConfig::default();
    let app = test_app(&test_config);

    let patient = shared_utils::test_utils::TestUser::patient("pat@clinic.example");
    let token = JwtTestUtils::create_test_token(&patient, &test_config.jwt_secret, None);

    let payload = json!({
        "week_start": next_monday().to_string(),
        "schedules": [{ "day_of_week": 0, "shift_kind": "MORNING" }]
    }).to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/schedules/register")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
