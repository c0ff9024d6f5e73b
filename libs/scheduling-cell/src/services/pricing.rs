use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{MedicalService, SchedulingError};

/// The price and time span a set of selected services adds up to.
#[derive(Debug, Clone)]
pub struct BookingQuote {
    pub services: Vec<MedicalService>,
    pub total_duration_minutes: i64,
    pub total_price: f64,
}

impl BookingQuote {
    pub fn from_services(services: Vec<MedicalService>) -> Self {
        let total_duration_minutes = services.iter().map(|s| s.duration as i64).sum();
        let total_price = services.iter().map(|s| s.price).sum();
        Self { services, total_duration_minutes, total_price }
    }
}

pub struct PricingService {
    supabase: Arc<SupabaseClient>,
}

impl PricingService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Resolve the selected service ids against the active catalog and
    /// aggregate their durations and prices. Every id must resolve.
    pub async fn quote(
        &self,
        service_ids: &[Uuid],
        auth_token: &str,
    ) -> Result<BookingQuote, SchedulingError> {
        if service_ids.is_empty() {
            return Err(SchedulingError::InvalidService);
        }

        let services = self.fetch_services(service_ids, auth_token).await?;

        if services.len() != service_ids.len() {
            return Err(SchedulingError::InvalidService);
        }

        let quote = BookingQuote::from_services(services);
        debug!("Quoted {} service(s): {} minutes, total {}",
               quote.services.len(), quote.total_duration_minutes, quote.total_price);

        Ok(quote)
    }

    pub async fn fetch_services(
        &self,
        service_ids: &[Uuid],
        auth_token: &str,
    ) -> Result<Vec<MedicalService>, SchedulingError> {
        let id_list = service_ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let path = format!("/rest/v1/services?id=in.({})&active=eq.true", id_list);

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<MedicalService>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse services: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(price: f64, duration: i32) -> MedicalService {
        MedicalService {
            id: Uuid::new_v4(),
            specialty_id: Uuid::new_v4(),
            name: "General examination".to_string(),
            price,
            duration,
            active: true,
        }
    }

    #[test]
    fn quote_sums_durations_and_prices() {
        let quote = BookingQuote::from_services(vec![
            service(150_000.0, 20),
            service(80_000.0, 10),
        ]);

        assert_eq!(quote.total_duration_minutes, 30);
        assert_eq!(quote.total_price, 230_000.0);
    }

    #[test]
    fn single_service_quote() {
        let quote = BookingQuote::from_services(vec![service(99_000.0, 45)]);
        assert_eq!(quote.total_duration_minutes, 45);
        assert_eq!(quote.total_price, 99_000.0);
    }
}
