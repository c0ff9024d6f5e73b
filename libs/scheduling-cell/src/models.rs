// libs/scheduling-cell/src/models.rs
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday, DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// TIME SLOT
// ==============================================================================

/// A half-open time range on a concrete date. Touching endpoints do not
/// count as an overlap, so a 09:00-09:30 visit and a 09:30-10:00 visit
/// can share a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl TimeSlot {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Result<Self, SchedulingError> {
        if start_time >= end_time {
            return Err(SchedulingError::InvalidInterval(format!(
                "start {} must be before end {}", start_time, end_time
            )));
        }
        Ok(Self { date, start_time, end_time })
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.date == other.date
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }

    pub fn contains(&self, inner: &TimeSlot) -> bool {
        self.date == inner.date
            && self.start_time <= inner.start_time
            && self.end_time >= inner.end_time
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.date, self.start_time, self.end_time)
    }
}

// ==============================================================================
// WORK SHIFTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftKind {
    Morning,
    Afternoon,
    Evening,
    Night,
    Other,
}

impl ShiftKind {
    /// The fixed clock range a named shift always occupies. `Other` is
    /// free-form and carries its own times.
    pub fn canonical_range(&self) -> Option<(NaiveTime, NaiveTime)> {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        match self {
            ShiftKind::Morning => Some((t(6, 0), t(12, 0))),
            ShiftKind::Afternoon => Some((t(12, 0), t(18, 0))),
            ShiftKind::Evening => Some((t(18, 0), t(23, 0))),
            ShiftKind::Night => Some((t(0, 0), t(6, 0))),
            ShiftKind::Other => None,
        }
    }
}

impl fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftKind::Morning => write!(f, "MORNING"),
            ShiftKind::Afternoon => write!(f, "AFTERNOON"),
            ShiftKind::Evening => write!(f, "EVENING"),
            ShiftKind::Night => write!(f, "NIGHT"),
            ShiftKind::Other => write!(f, "OTHER"),
        }
    }
}

/// One recurring block of availability, scoped to a single week.
/// `day_of_week` is Monday-anchored: 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkShift {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub date: NaiveDate,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub shift_kind: ShiftKind,
    pub is_appointable: bool,
    pub active: bool,
}

impl WorkShift {
    pub fn time_slot(&self) -> TimeSlot {
        TimeSlot {
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// One entry of a weekly registration request. Named kinds ignore any
/// supplied times; `Other` must carry both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftEntry {
    pub day_of_week: u8,
    pub shift_kind: ShiftKind,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

impl ShiftEntry {
    /// Resolve the concrete clock range for this entry.
    pub fn resolve_times(&self) -> Result<(NaiveTime, NaiveTime), SchedulingError> {
        if let Some(range) = self.shift_kind.canonical_range() {
            return Ok(range);
        }

        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start < end => Ok((start, end)),
            (Some(start), Some(end)) => Err(SchedulingError::InvalidInterval(format!(
                "start {} must be before end {}", start, end
            ))),
            _ => Err(SchedulingError::InvalidInterval(
                "custom shifts require explicit start and end times".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterWeekRequest {
    pub week_start: NaiveDate,
    pub schedules: Vec<ShiftEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    View,
    Edit,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekScheduleResponse {
    pub mode: ScheduleMode,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub schedules: Vec<WorkShift>,
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProcess,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that hold a claim on the doctor's time.
    pub fn is_active(&self) -> bool {
        matches!(self,
            AppointmentStatus::Pending |
            AppointmentStatus::Confirmed |
            AppointmentStatus::InProcess
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "PENDING"),
            AppointmentStatus::Confirmed => write!(f, "CONFIRMED"),
            AppointmentStatus::InProcess => write!(f, "IN_PROCESS"),
            AppointmentStatus::Completed => write!(f, "COMPLETED"),
            AppointmentStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentKind {
    Online,
    Offline,
}

impl fmt::Display for AppointmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentKind::Online => write!(f, "ONLINE"),
            AppointmentKind::Offline => write!(f, "OFFLINE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub kind: AppointmentKind,
    pub status: AppointmentStatus,
    pub room_id: Option<Uuid>,
    pub meeting_link: Option<String>,
    pub patient_note: Option<String>,
    pub doctor_note: Option<String>,
    pub total_price: f64,
    pub work_schedule_id: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn time_slot(&self) -> TimeSlot {
        TimeSlot {
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub service_ids: Vec<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub kind: AppointmentKind,
    pub patient_note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentSearchQuery {
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmAppointmentRequest {
    pub room_id: Option<Uuid>,
    pub doctor_note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

/// Appointment plus its resolved service lines.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetail {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub services: Vec<MedicalService>,
}

// ==============================================================================
// SERVICES AND ROOMS
// ==============================================================================

/// A billable clinic service; the pricing source for bookings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalService {
    pub id: Uuid,
    pub specialty_id: Uuid,
    pub name: String,
    pub price: f64,
    /// Minutes this service adds to the appointment span.
    pub duration: i32,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

// ==============================================================================
// POLICY
// ==============================================================================

/// Clinic booking and registration policy. The window boundaries come
/// from clinic administration; both edges are inclusive.
#[derive(Debug, Clone)]
pub struct SchedulingPolicy {
    /// Last weekday (Monday-anchored) on which next week's schedule may
    /// still be registered.
    pub registration_close_weekday: Weekday,
    pub max_booking_attempts: u32,
    pub max_transition_attempts: u32,
    pub lock_timeout_seconds: u64,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            registration_close_weekday: Weekday::Fri,
            max_booking_attempts: 3,
            max_transition_attempts: 3,
            lock_timeout_seconds: 30,
        }
    }
}

impl SchedulingPolicy {
    pub fn registration_open(&self, today: NaiveDate) -> bool {
        today.weekday().num_days_from_monday()
            <= self.registration_close_weekday.num_days_from_monday()
    }

    /// Patients may book up to and including the Sunday that closes the
    /// week after the current one.
    pub fn booking_window_end(&self, today: NaiveDate) -> NaiveDate {
        let days_to_sunday = 6 - today.weekday().num_days_from_monday() as i64;
        today + Duration::days(days_to_sunday + 7)
    }
}

pub fn monday_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Serialize, thiserror::Error)]
pub enum SchedulingError {
    #[error("Invalid time interval: {0}")]
    InvalidInterval(String),

    #[error("Schedule registration for next week has closed")]
    RegistrationWindowClosed,

    #[error("Weekday index {day_of_week} is out of range (0 = Monday .. 6 = Sunday)")]
    InvalidDayOfWeek { day_of_week: u8 },

    #[error("Overlapping shifts on weekday {day_of_week}: {first_kind} ({first_start}-{first_end}) collides with {second_kind} ({second_start}-{second_end})")]
    OverlappingShift {
        day_of_week: u8,
        first_kind: ShiftKind,
        first_start: NaiveTime,
        first_end: NaiveTime,
        second_kind: ShiftKind,
        second_start: NaiveTime,
        second_end: NaiveTime,
    },

    #[error("New schedule for weekday {day_of_week} no longer covers appointment {appointment_id} ({start_time}-{end_time})")]
    ScheduleViolatesExistingBooking {
        day_of_week: u8,
        appointment_id: Uuid,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },

    #[error("Doctor has no appointable work schedule covering the requested time")]
    NoAvailableSchedule,

    #[error("Date {date} is outside the booking window (today through {latest})")]
    DateOutOfBookingWindow { date: NaiveDate, latest: NaiveDate },

    #[error("One or more selected services are unknown or inactive")]
    InvalidService,

    #[error("Doctor already has an appointment overlapping {date} {start_time}-{end_time}")]
    DoctorTimeConflict {
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },

    #[error("Cannot transition appointment from {from} to {to}")]
    InvalidStateTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment date {date} has already passed")]
    AppointmentDatePassed { date: NaiveDate },

    #[error("Offline appointments need a consultation room to be confirmed")]
    RoomRequiredForOfflineConfirmation,

    #[error("Room {room_id} is occupied during the requested time")]
    RoomNotAvailable { room_id: Uuid },

    #[error("Appointment not found")]
    NotFound,

    #[error("Concurrent scheduling update detected, please retry")]
    ConcurrencyConflict,

    #[error("Database error: {0}")]
    DatabaseError(String),
}
