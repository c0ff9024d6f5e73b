use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEvent {
    Created,
    Confirmed,
    Started,
    Completed,
    Cancelled,
}

impl fmt::Display for AppointmentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentEvent::Created => write!(f, "appointment_created"),
            AppointmentEvent::Confirmed => write!(f, "appointment_confirmed"),
            AppointmentEvent::Started => write!(f, "appointment_started"),
            AppointmentEvent::Completed => write!(f, "appointment_completed"),
            AppointmentEvent::Cancelled => write!(f, "appointment_cancelled"),
        }
    }
}

/// The slice of an appointment the sink needs to address and describe
/// the event. The scheduling cell hands this over so the sink never has
/// to read the appointment table itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentEventContext {
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}
