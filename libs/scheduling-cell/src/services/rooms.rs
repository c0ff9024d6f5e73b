use reqwest::Method;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentKind, Room, SchedulingError};

pub struct RoomAllocationService {
    supabase: Arc<SupabaseClient>,
}

impl RoomAllocationService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Rooms that can host the appointment: every active room without a
    /// time-overlapping Confirmed/InProcess booking on the same date.
    /// Online consultations never occupy a room.
    pub async fn available_rooms(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<Vec<Room>, SchedulingError> {
        if appointment.kind == AppointmentKind::Online {
            return Ok(vec![]);
        }

        let busy = self.busy_room_ids(appointment, auth_token).await?;
        let rooms = self.active_rooms(auth_token).await?;

        Ok(rooms.into_iter()
            .filter(|room| !busy.contains(&room.id))
            .collect())
    }

    /// Confirm-time guard: the chosen room must be active and free for
    /// the appointment's slot.
    pub async fn ensure_available(
        &self,
        room_id: Uuid,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let rooms = self.active_rooms(auth_token).await?;
        if !rooms.iter().any(|room| room.id == room_id) {
            return Err(SchedulingError::RoomNotAvailable { room_id });
        }

        let busy = self.busy_room_ids(appointment, auth_token).await?;
        if busy.contains(&room_id) {
            return Err(SchedulingError::RoomNotAvailable { room_id });
        }

        Ok(())
    }

    async fn busy_room_ids(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<HashSet<Uuid>, SchedulingError> {
        let slot = appointment.time_slot();

        let path = format!(
            "/rest/v1/appointments?date=eq.{}&status=in.(CONFIRMED,IN_PROCESS)&room_id=not.is.null&start_time=lt.{}&end_time=gt.{}&id=neq.{}",
            slot.date,
            slot.end_time.format("%H:%M:%S"),
            slot.start_time.format("%H:%M:%S"),
            appointment.id,
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let occupying: Vec<Appointment> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        let busy: HashSet<Uuid> = occupying.iter()
            .filter(|apt| apt.time_slot().overlaps(&slot))
            .filter_map(|apt| apt.room_id)
            .collect();

        debug!("{} room(s) busy around {}", busy.len(), slot);
        Ok(busy)
    }

    async fn active_rooms(&self, auth_token: &str) -> Result<Vec<Room>, SchedulingError> {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            "/rest/v1/rooms?active=eq.true&order=name.asc",
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Room>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse rooms: {}", e)))
    }
}
