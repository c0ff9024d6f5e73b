// libs/scheduling-cell/src/services/schedule.rs
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, RegisterWeekRequest, ScheduleMode, SchedulingError, SchedulingPolicy,
    ShiftEntry, ShiftKind, TimeSlot, WeekScheduleResponse, WorkShift, monday_of_week,
};
use crate::services::conflict::ACTIVE_STATUS_FILTER;
use crate::services::locks::{SchedulingLockService, schedule_lock_key};

/// A registration entry with its clock range resolved from the shift
/// kind, ready for overlap checks and insertion.
#[derive(Debug, Clone)]
pub struct ResolvedShiftEntry {
    pub day_of_week: u8,
    pub shift_kind: ShiftKind,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl ResolvedShiftEntry {
    pub fn covers(&self, day_of_week: u8, start: NaiveTime, end: NaiveTime) -> bool {
        self.day_of_week == day_of_week
            && self.start_time <= start
            && self.end_time >= end
    }
}

/// Resolve and validate an incoming week of shift entries: every day
/// index in range, every range well-formed, and no two same-day entries
/// overlapping. Returns the entries sorted by (day, start).
pub fn validate_week_entries(entries: &[ShiftEntry]) -> Result<Vec<ResolvedShiftEntry>, SchedulingError> {
    let mut resolved = entries.iter()
        .map(|entry| {
            if entry.day_of_week > 6 {
                return Err(SchedulingError::InvalidDayOfWeek { day_of_week: entry.day_of_week });
            }
            let (start_time, end_time) = entry.resolve_times()?;
            Ok(ResolvedShiftEntry {
                day_of_week: entry.day_of_week,
                shift_kind: entry.shift_kind,
                start_time,
                end_time,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    resolved.sort_by(|a, b| (a.day_of_week, a.start_time).cmp(&(b.day_of_week, b.start_time)));

    for pair in resolved.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if current.day_of_week == next.day_of_week && current.end_time > next.start_time {
            return Err(SchedulingError::OverlappingShift {
                day_of_week: current.day_of_week,
                first_kind: current.shift_kind,
                first_start: current.start_time,
                first_end: current.end_time,
                second_kind: next.shift_kind,
                second_start: next.start_time,
                second_end: next.end_time,
            });
        }
    }

    Ok(resolved)
}

/// Gate for editing a week: only a future Monday-anchored week, and only
/// while the current week has not passed the registration cutoff.
pub fn registration_preconditions(
    week_start: NaiveDate,
    today: NaiveDate,
    policy: &SchedulingPolicy,
) -> Result<(), SchedulingError> {
    if week_start < today
        || week_start.weekday().num_days_from_monday() != 0
        || !policy.registration_open(today)
    {
        return Err(SchedulingError::RegistrationWindowClosed);
    }

    Ok(())
}

pub struct WeekScheduleService {
    supabase: Arc<SupabaseClient>,
    locks: SchedulingLockService,
    policy: SchedulingPolicy,
}

impl WeekScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_policy(config, SchedulingPolicy::default())
    }

    pub fn with_policy(config: &AppConfig, policy: SchedulingPolicy) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let locks = SchedulingLockService::new(Arc::clone(&supabase), policy.lock_timeout_seconds);

        Self { supabase, locks, policy }
    }

    /// Replace an employee's shifts for one week with a new set.
    ///
    /// The whole operation is all-or-nothing: every validation runs
    /// before any row changes, and the delete+insert itself happens in
    /// one database transaction. Bookings that the old shifts licensed
    /// must stay covered by the new set.
    pub async fn register_week(
        &self,
        employee_id: Uuid,
        request: RegisterWeekRequest,
        auth_token: &str,
    ) -> Result<Vec<WorkShift>, SchedulingError> {
        let today = Utc::now().date_naive();
        registration_preconditions(request.week_start, today, &self.policy)?;

        let resolved = validate_week_entries(&request.schedules)?;

        info!("Registering {} shift(s) for employee {} week {}",
              resolved.len(), employee_id, request.week_start);

        let lock_key = schedule_lock_key(employee_id, request.week_start);

        for attempt in 1..=self.policy.max_booking_attempts {
            if self.locks.acquire(&lock_key).await? {
                let result = self
                    .register_week_locked(employee_id, request.week_start, &resolved, auth_token)
                    .await;

                if let Err(e) = self.locks.release(&lock_key).await {
                    warn!("Failed to release schedule lock {}: {}", lock_key, e);
                }

                return result;
            }

            debug!("Schedule lock busy for employee {} (attempt {}/{})",
                   employee_id, attempt, self.policy.max_booking_attempts);
            tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
        }

        Err(SchedulingError::ConcurrencyConflict)
    }

    async fn register_week_locked(
        &self,
        employee_id: Uuid,
        week_start: NaiveDate,
        entries: &[ResolvedShiftEntry],
        auth_token: &str,
    ) -> Result<Vec<WorkShift>, SchedulingError> {
        let old_shifts = self.week_shifts(employee_id, week_start, auth_token).await?;

        // Only bookings the old shift actually licensed are protected:
        // the appointment must sit fully inside the old shift, not just
        // touch it.
        for old_shift in &old_shifts {
            let protected = self
                .appointments_inside_shift(employee_id, old_shift, auth_token)
                .await?;

            for appointment in &protected {
                let covered = entries.iter().any(|entry| {
                    entry.covers(old_shift.day_of_week, appointment.start_time, appointment.end_time)
                });

                if !covered {
                    warn!("Schedule change for employee {} would orphan appointment {}",
                          employee_id, appointment.id);
                    return Err(SchedulingError::ScheduleViolatesExistingBooking {
                        day_of_week: old_shift.day_of_week,
                        appointment_id: appointment.id,
                        start_time: appointment.start_time,
                        end_time: appointment.end_time,
                    });
                }
            }
        }

        self.replace_week(employee_id, week_start, entries, auth_token).await
    }

    /// Swap the week's rows in a single transaction via the
    /// replace_week_schedules database function.
    async fn replace_week(
        &self,
        employee_id: Uuid,
        week_start: NaiveDate,
        entries: &[ResolvedShiftEntry],
        auth_token: &str,
    ) -> Result<Vec<WorkShift>, SchedulingError> {
        let week_end = week_start + Duration::days(6);

        let rows: Vec<Value> = entries.iter()
            .map(|entry| json!({
                "day_of_week": entry.day_of_week,
                "date": (week_start + Duration::days(entry.day_of_week as i64)).to_string(),
                "start_time": entry.start_time.format("%H:%M:%S").to_string(),
                "end_time": entry.end_time.format("%H:%M:%S").to_string(),
                "shift_kind": entry.shift_kind.to_string(),
                "is_appointable": true
            }))
            .collect();

        let result: Vec<Value> = self.supabase.rpc(
            "replace_week_schedules",
            Some(auth_token),
            json!({
                "p_employee_id": employee_id,
                "p_week_start": week_start.to_string(),
                "p_week_end": week_end.to_string(),
                "p_schedules": rows
            }),
        ).await.map_err(|e| SchedulingError::DatabaseError(format!("Week replacement failed: {}", e)))?;

        let shifts: Vec<WorkShift> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<WorkShift>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse shifts: {}", e)))?;

        info!("Week {} registered for employee {}: {} shift(s)",
              week_start, employee_id, shifts.len());

        Ok(shifts)
    }

    pub async fn current_week(
        &self,
        employee_id: Uuid,
        auth_token: &str,
    ) -> Result<WeekScheduleResponse, SchedulingError> {
        let today = Utc::now().date_naive();
        let week_start = monday_of_week(today);
        let schedules = self.week_shifts(employee_id, week_start, auth_token).await?;

        Ok(WeekScheduleResponse {
            mode: ScheduleMode::View,
            week_start,
            week_end: week_start + Duration::days(6),
            schedules,
        })
    }

    pub async fn next_week(
        &self,
        employee_id: Uuid,
        auth_token: &str,
    ) -> Result<WeekScheduleResponse, SchedulingError> {
        let today = Utc::now().date_naive();
        let week_start = monday_of_week(today) + Duration::days(7);
        let schedules = self.week_shifts(employee_id, week_start, auth_token).await?;

        let mode = if self.policy.registration_open(today) {
            ScheduleMode::Edit
        } else {
            ScheduleMode::View
        };

        Ok(WeekScheduleResponse {
            mode,
            week_start,
            week_end: week_start + Duration::days(6),
            schedules,
        })
    }

    /// The one active, appointable shift that fully contains the slot,
    /// if the employee published any for that week.
    pub async fn bookable_window(
        &self,
        employee_id: Uuid,
        slot: &TimeSlot,
        auth_token: &str,
    ) -> Result<WorkShift, SchedulingError> {
        let day_of_week = slot.date.weekday().num_days_from_monday() as u8;

        let path = format!(
            "/rest/v1/work_schedules?employee_id=eq.{}&week_start=lte.{}&week_end=gte.{}&day_of_week=eq.{}&start_time=lte.{}&end_time=gte.{}&is_appointable=eq.true&active=eq.true",
            employee_id,
            slot.date,
            slot.date,
            day_of_week,
            slot.start_time.format("%H:%M:%S"),
            slot.end_time.format("%H:%M:%S"),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let shifts: Vec<WorkShift> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<WorkShift>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse shifts: {}", e)))?;

        shifts.into_iter()
            .find(|shift| shift.time_slot().contains(slot))
            .ok_or(SchedulingError::NoAvailableSchedule)
    }

    async fn week_shifts(
        &self,
        employee_id: Uuid,
        week_start: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<WorkShift>, SchedulingError> {
        let path = format!(
            "/rest/v1/work_schedules?employee_id=eq.{}&week_start=eq.{}&active=eq.true&order=day_of_week.asc,start_time.asc",
            employee_id, week_start,
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<WorkShift>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse shifts: {}", e)))
    }

    /// Active appointments on the shift's date that sit fully inside its
    /// range.
    async fn appointments_inside_shift(
        &self,
        employee_id: Uuid,
        shift: &WorkShift,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status={}&start_time=gte.{}&end_time=lte.{}",
            employee_id,
            shift.date,
            ACTIVE_STATUS_FILTER,
            shift.start_time.format("%H:%M:%S"),
            shift.end_time.format("%H:%M:%S"),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        let shift_slot = shift.time_slot();
        Ok(appointments.into_iter()
            .filter(|apt| apt.status.is_active() && shift_slot.contains(&apt.time_slot()))
            .collect())
    }
}
