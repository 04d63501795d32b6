//! Trip store, in-memory implementation
//!
//! Mirrors the conditional-update semantics of the PostgreSQL store behind a
//! single mutex, so every check-and-set is atomic. Used by tests and by the
//! `--mem-store` demo mode; state is lost on restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::error::TripError;
use super::store::TripStore;
use super::types::{CreateTrip, Invoice, Position, Trip, TripId, TripStatus};

#[derive(Default)]
struct Inner {
    trips: HashMap<TripId, Trip>,
    invoices: HashMap<TripId, Invoice>,
    drivers_online: HashMap<i64, bool>,
    driver_positions: HashMap<i64, Position>,
    driver_position_writes: HashMap<i64, u64>,
}

/// In-memory trip store
#[derive(Default)]
pub struct MemTripStore {
    inner: Mutex<Inner>,
}

impl MemTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trip records held (test helper)
    pub fn trip_count(&self) -> usize {
        self.inner.lock().unwrap().trips.len()
    }

    /// Number of invoices held (test helper)
    pub fn invoice_count(&self) -> usize {
        self.inner.lock().unwrap().invoices.len()
    }

    /// Number of position writes recorded for a driver (test helper for
    /// throttle verification)
    pub fn driver_position_writes(&self, driver_id: i64) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .driver_position_writes
            .get(&driver_id)
            .copied()
            .unwrap_or(0)
    }

    /// Backdate a trip's created_at (test helper for sweeper staleness)
    pub fn age_trip(&self, id: TripId, by: Duration) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(trip) = inner.trips.get_mut(&id) {
            trip.created_at -= chrono::Duration::from_std(by).unwrap_or_default();
        }
    }
}

#[async_trait]
impl TripStore for MemTripStore {
    async fn insert(&self, req: &CreateTrip) -> Result<Trip, TripError> {
        let trip = Trip {
            id: TripId::new(),
            client_id: req.client_id,
            driver_id: None,
            status: TripStatus::Requested,
            origin_address: req.origin_address.clone(),
            origin: req.origin,
            destination_address: req.destination_address.clone(),
            destination: req.destination,
            estimated_fare: req.estimated_fare,
            current_fare: None,
            final_fare: None,
            category: req.category,
            delivery: req.delivery.clone(),
            last_position: None,
            created_at: Utc::now(),
            accepted_at: None,
            started_at: None,
            completed_at: None,
        };

        self.inner
            .lock()
            .unwrap()
            .trips
            .insert(trip.id, trip.clone());
        Ok(trip)
    }

    async fn get(&self, id: TripId) -> Result<Option<Trip>, TripError> {
        Ok(self.inner.lock().unwrap().trips.get(&id).cloned())
    }

    async fn find_active_for_client(&self, client_id: i64) -> Result<Option<Trip>, TripError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .trips
            .values()
            .filter(|t| t.client_id == client_id && t.status.is_active())
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn find_latest_for_client(&self, client_id: i64) -> Result<Option<Trip>, TripError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .trips
            .values()
            .filter(|t| t.client_id == client_id)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn find_active_for_driver(&self, driver_id: i64) -> Result<Option<Trip>, TripError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .trips
            .values()
            .filter(|t| {
                t.driver_id == Some(driver_id)
                    && matches!(t.status, TripStatus::Accepted | TripStatus::Ongoing)
            })
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn list_requested(&self) -> Result<Vec<Trip>, TripError> {
        let inner = self.inner.lock().unwrap();
        let mut trips: Vec<Trip> = inner
            .trips
            .values()
            .filter(|t| t.status == TripStatus::Requested)
            .cloned()
            .collect();
        trips.sort_by_key(|t| t.created_at);
        Ok(trips)
    }

    async fn try_assign_driver(&self, id: TripId, driver_id: i64) -> Result<bool, TripError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.trips.get_mut(&id) {
            Some(trip) if trip.status == TripStatus::Requested => {
                trip.driver_id = Some(driver_id);
                trip.status = TripStatus::Accepted;
                trip.accepted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status_if(
        &self,
        id: TripId,
        expected: TripStatus,
        new: TripStatus,
    ) -> Result<bool, TripError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.trips.get_mut(&id) {
            Some(trip) if trip.status == expected => {
                trip.status = new;
                if new == TripStatus::Ongoing {
                    trip.started_at = Some(Utc::now());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_if_cancellable(&self, id: TripId) -> Result<bool, TripError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.trips.get_mut(&id) {
            Some(trip)
                if matches!(trip.status, TripStatus::Requested | TripStatus::Accepted) =>
            {
                trip.status = TripStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_progress(
        &self,
        id: TripId,
        fare: Decimal,
        position: Position,
    ) -> Result<bool, TripError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.trips.get_mut(&id) {
            Some(trip) if trip.status == TripStatus::Ongoing => {
                trip.current_fare = Some(fare);
                trip.last_position = Some(position);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, id: TripId, final_fare: Decimal) -> Result<bool, TripError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.trips.get_mut(&id) {
            Some(trip) if trip.status == TripStatus::Ongoing => {
                trip.status = TripStatus::Completed;
                trip.final_fare = Some(final_fare);
                trip.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_stale_requested(&self, older_than: Duration) -> Result<Vec<Trip>, TripError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_default();
        let mut inner = self.inner.lock().unwrap();

        // Snapshot the ids first, then mutate, to keep iteration safe.
        let stale: Vec<TripId> = inner
            .trips
            .values()
            .filter(|t| t.status == TripStatus::Requested && t.created_at < cutoff)
            .map(|t| t.id)
            .collect();

        let mut swept = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(trip) = inner.trips.get_mut(&id) {
                trip.status = TripStatus::Cancelled;
                swept.push(trip.clone());
            }
        }
        Ok(swept)
    }

    async fn insert_invoice(&self, trip_id: TripId, amount: Decimal) -> Result<Invoice, TripError> {
        let mut inner = self.inner.lock().unwrap();
        let invoice = inner.invoices.entry(trip_id).or_insert_with(|| Invoice {
            id: ulid::Ulid::new().to_string(),
            trip_id,
            amount,
            created_at: Utc::now(),
        });
        Ok(invoice.clone())
    }

    async fn set_driver_position(
        &self,
        driver_id: i64,
        position: Position,
    ) -> Result<(), TripError> {
        let mut inner = self.inner.lock().unwrap();
        inner.driver_positions.insert(driver_id, position);
        *inner.driver_position_writes.entry(driver_id).or_default() += 1;
        Ok(())
    }

    async fn driver_is_online(&self, driver_id: i64) -> Result<bool, TripError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .drivers_online
            .get(&driver_id)
            .copied()
            .unwrap_or(false))
    }

    async fn set_driver_online(&self, driver_id: i64, online: bool) -> Result<(), TripError> {
        self.inner
            .lock()
            .unwrap()
            .drivers_online
            .insert(driver_id, online);
        Ok(())
    }
}
