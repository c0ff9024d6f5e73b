use std::sync::Arc;

use anyhow::Result;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AppointmentEvent, AppointmentEventContext};

pub struct NotificationService {
    supabase: Arc<SupabaseClient>,
}

impl NotificationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Fire-and-forget dispatch. Delivery runs on its own task after the
    /// triggering transition has committed; failures are logged and
    /// never reach the caller.
    pub fn dispatch(
        config: Arc<AppConfig>,
        event: AppointmentEvent,
        context: AppointmentEventContext,
        auth_token: String,
    ) {
        tokio::spawn(async move {
            let service = NotificationService::new(&config);
            if let Err(e) = service.deliver(event, &context, &auth_token).await {
                warn!("Notification delivery failed for appointment {} ({}): {}",
                      context.appointment_id, event, e);
            }
        });
    }

    pub async fn deliver(
        &self,
        event: AppointmentEvent,
        context: &AppointmentEventContext,
        auth_token: &str,
    ) -> Result<()> {
        let rows = self.build_rows(event, context);
        if rows.is_empty() {
            return Ok(());
        }

        debug!("Delivering {} notification(s) for appointment {} ({})",
               rows.len(), context.appointment_id, event);

        let _: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/notifications",
            Some(auth_token),
            Some(Value::Array(rows)),
            Some(representation_headers()),
        ).await?;

        Ok(())
    }

    fn build_rows(&self, event: AppointmentEvent, context: &AppointmentEventContext) -> Vec<Value> {
        let when = format!("{} {}-{}", context.date, context.start_time, context.end_time);

        let mut recipients: Vec<(Uuid, String, String)> = Vec::new();

        match event {
            AppointmentEvent::Created => {
                recipients.push((
                    context.doctor_id,
                    "New appointment".to_string(),
                    format!("A patient booked you for {}", when),
                ));
                if let Some(patient_id) = context.patient_id {
                    recipients.push((
                        patient_id,
                        "Booking received".to_string(),
                        format!("Your appointment on {} is awaiting confirmation", when),
                    ));
                }
            }
            AppointmentEvent::Confirmed => {
                if let Some(patient_id) = context.patient_id {
                    recipients.push((
                        patient_id,
                        "Appointment confirmed".to_string(),
                        format!("Your appointment on {} has been confirmed", when),
                    ));
                }
            }
            AppointmentEvent::Started => {
                if let Some(patient_id) = context.patient_id {
                    recipients.push((
                        patient_id,
                        "Consultation started".to_string(),
                        format!("Your consultation on {} is underway", when),
                    ));
                }
            }
            AppointmentEvent::Completed => {
                if let Some(patient_id) = context.patient_id {
                    recipients.push((
                        patient_id,
                        "Consultation completed".to_string(),
                        format!("Your appointment on {} is complete", when),
                    ));
                }
            }
            AppointmentEvent::Cancelled => {
                recipients.push((
                    context.doctor_id,
                    "Appointment cancelled".to_string(),
                    format!("The appointment on {} was cancelled", when),
                ));
                if let Some(patient_id) = context.patient_id {
                    recipients.push((
                        patient_id,
                        "Appointment cancelled".to_string(),
                        format!("Your appointment on {} was cancelled", when),
                    ));
                }
            }
        }

        recipients.into_iter()
            .map(|(recipient_id, title, message)| json!({
                "recipient_id": recipient_id,
                "type": event.to_string(),
                "title": title,
                "message": message,
                "data": {
                    "appointment_id": context.appointment_id,
                    "screen": "AppointmentDetail"
                }
            }))
            .collect()
    }
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));
    headers
}
