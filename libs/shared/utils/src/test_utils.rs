use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn nurse(email: &str) -> Self {
        Self::new(email, "nurse")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }
}

/// Row builders matching the PostgREST JSON shapes the cells read back.
pub struct MockClinicRows;

impl MockClinicRows {
    pub fn work_shift(
        id: &Uuid,
        employee_id: &Uuid,
        week_start: &str,
        day_of_week: u8,
        date: &str,
        start_time: &str,
        end_time: &str,
        shift_kind: &str,
    ) -> Value {
        json!({
            "id": id,
            "employee_id": employee_id,
            "week_start": week_start,
            "week_end": Self::week_end_of(week_start),
            "date": date,
            "day_of_week": day_of_week,
            "start_time": start_time,
            "end_time": end_time,
            "shift_kind": shift_kind,
            "is_appointable": true,
            "active": true
        })
    }

    pub fn appointment(
        id: &Uuid,
        doctor_id: &Uuid,
        patient_id: &Uuid,
        date: &str,
        start_time: &str,
        end_time: &str,
        status: &str,
        kind: &str,
    ) -> Value {
        let now = Utc::now().to_rfc3339();
        json!({
            "id": id,
            "doctor_id": doctor_id,
            "patient_id": patient_id,
            "date": date,
            "start_time": start_time,
            "end_time": end_time,
            "kind": kind,
            "status": status,
            "room_id": null,
            "meeting_link": null,
            "patient_note": null,
            "doctor_note": null,
            "total_price": 150000.0,
            "work_schedule_id": null,
            "confirmed_at": null,
            "completed_at": null,
            "cancelled_at": null,
            "cancellation_reason": null,
            "created_at": now,
            "updated_at": now
        })
    }

    pub fn service(id: &Uuid, name: &str, price: f64, duration: i32) -> Value {
        json!({
            "id": id,
            "specialty_id": Uuid::new_v4(),
            "name": name,
            "price": price,
            "duration": duration,
            "active": true
        })
    }

    pub fn room(id: &Uuid, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "active": true
        })
    }

    fn week_end_of(week_start: &str) -> String {
        chrono::NaiveDate::parse_from_str(week_start, "%Y-%m-%d")
            .map(|d| (d + Duration::days(6)).format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| week_start.to_string())
    }
}
