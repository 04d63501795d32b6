//! Trip Lifecycle Engine
//!
//! Owns every status-changing operation. All transitions are driven through
//! the store's conditional updates; a lost race surfaces as a typed failure
//! and never as a partial mutation.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use super::error::TripError;
use super::store::TripStore;
use super::types::{CreateTrip, Invoice, Position, Role, Trip, TripId, TripStatus};

/// Result of a successful cancellation, with enough context for the
/// dispatcher to notify both sides with the right framing.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub trip: Trip,
    /// Who asked for the cancellation ("you cancelled" vs "the other side
    /// cancelled" rendering)
    pub by: Role,
}

/// Join-restoration payload for a driver
#[derive(Debug, Clone)]
pub struct DriverRestore {
    /// Availability flag as stored, never assumed
    pub is_online: bool,
    /// Trip with status accepted/ongoing bound to this driver, if any
    pub active: Option<Trip>,
    /// Requested trips, populated only when online and no active trip
    pub pending: Vec<Trip>,
}

/// Trip lifecycle engine over a durable store
pub struct TripEngine {
    store: Arc<dyn TripStore>,
}

impl TripEngine {
    pub fn new(store: Arc<dyn TripStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TripStore> {
        &self.store
    }

    /// Create a new trip with status = requested.
    ///
    /// Idempotent duplicate-submission guard: if the client already has a
    /// trip in {requested, accepted, ongoing}, that trip is returned
    /// unchanged. Returns `(trip, created)`.
    pub async fn create(&self, req: &CreateTrip) -> Result<(Trip, bool), TripError> {
        if let Some(existing) = self.store.find_active_for_client(req.client_id).await? {
            tracing::info!(
                trip_id = %existing.id,
                client_id = req.client_id,
                status = %existing.status,
                "Duplicate trip request - returning existing trip"
            );
            return Ok((existing, false));
        }

        let trip = self.store.insert(req).await?;
        tracing::info!(trip_id = %trip.id, client_id = trip.client_id, "Trip created");
        Ok((trip, true))
    }

    /// Atomic accept arbitration: exactly one concurrent caller succeeds.
    pub async fn accept(&self, trip_id: TripId, driver_id: i64) -> Result<Trip, TripError> {
        if self.store.try_assign_driver(trip_id, driver_id).await? {
            let trip = self
                .store
                .get(trip_id)
                .await?
                .ok_or(TripError::NotFound)?;
            tracing::info!(trip_id = %trip_id, driver_id, "Trip accepted");
            return Ok(trip);
        }

        // Conditional update matched nothing: distinguish a lost race from a
        // bad id for the caller.
        match self.store.get(trip_id).await? {
            Some(_) => {
                tracing::info!(trip_id = %trip_id, driver_id, "Accept race lost");
                Err(TripError::Unavailable)
            }
            None => Err(TripError::NotFound),
        }
    }

    /// Cancel a trip. Legal from requested and accepted; ongoing, completed
    /// and cancelled trips reject with `InvalidTransition`. One conditional
    /// update covers both cancellable statuses, so an accept landing
    /// concurrently never turns a legal cancel into a rejection.
    pub async fn cancel(&self, trip_id: TripId, by: Role) -> Result<CancelOutcome, TripError> {
        if self.store.cancel_if_cancellable(trip_id).await? {
            // Re-read for the post-cancel record: a racing accept may have
            // bound a driver the caller's view predates.
            let trip = self
                .store
                .get(trip_id)
                .await?
                .ok_or(TripError::NotFound)?;
            tracing::info!(trip_id = %trip_id, by = %by, "Trip cancelled");
            return Ok(CancelOutcome { trip, by });
        }

        match self.store.get(trip_id).await? {
            Some(t) => Err(TripError::InvalidTransition { status: t.status }),
            None => Err(TripError::NotFound),
        }
    }

    /// accepted -> ongoing
    pub async fn start(&self, trip_id: TripId) -> Result<Trip, TripError> {
        if self
            .store
            .update_status_if(trip_id, TripStatus::Accepted, TripStatus::Ongoing)
            .await?
        {
            let trip = self
                .store
                .get(trip_id)
                .await?
                .ok_or(TripError::NotFound)?;
            tracing::info!(trip_id = %trip_id, "Ride started");
            return Ok(trip);
        }

        self.rejection(trip_id).await
    }

    /// Persist current fare and position; legal only while ongoing.
    /// Designed for high call frequency - a single conditional UPDATE.
    pub async fn update_fare(
        &self,
        trip_id: TripId,
        fare: Decimal,
        position: Position,
    ) -> Result<Trip, TripError> {
        if self.store.set_progress(trip_id, fare, position).await? {
            return self
                .store
                .get(trip_id)
                .await?
                .ok_or(TripError::NotFound);
        }

        self.rejection(trip_id).await
    }

    /// ongoing -> completed, records the final fare
    pub async fn finish(&self, trip_id: TripId, final_fare: Decimal) -> Result<Trip, TripError> {
        if self.store.complete(trip_id, final_fare).await? {
            let trip = self
                .store
                .get(trip_id)
                .await?
                .ok_or(TripError::NotFound)?;
            tracing::info!(trip_id = %trip_id, %final_fare, "Ride finished");
            return Ok(trip);
        }

        self.rejection(trip_id).await
    }

    /// Record the payment receipt as an invoice (at most one per trip)
    pub async fn record_receipt(
        &self,
        trip_id: TripId,
        amount: Decimal,
    ) -> Result<Invoice, TripError> {
        // Invoices reference a real trip; existence is the only precondition.
        self.store
            .get(trip_id)
            .await?
            .ok_or(TripError::NotFound)?;

        let invoice = self.store.insert_invoice(trip_id, amount).await?;
        tracing::info!(trip_id = %trip_id, invoice_id = %invoice.id, "Payment recorded");
        Ok(invoice)
    }

    /// Cancel every requested trip older than the threshold; returns the
    /// trips actually swept by this caller.
    pub async fn sweep_orphans(&self, older_than: Duration) -> Result<Vec<Trip>, TripError> {
        self.store.sweep_stale_requested(older_than).await
    }

    /// Join restoration for a driver. Read-only.
    pub async fn restore_driver(&self, driver_id: i64) -> Result<DriverRestore, TripError> {
        let is_online = self.store.driver_is_online(driver_id).await?;

        if let Some(active) = self.store.find_active_for_driver(driver_id).await? {
            return Ok(DriverRestore {
                is_online,
                active: Some(active),
                pending: Vec::new(),
            });
        }

        let pending = if is_online {
            self.store.list_requested().await?
        } else {
            Vec::new()
        };

        Ok(DriverRestore {
            is_online,
            active: None,
            pending,
        })
    }

    /// Join restoration for a client: only a still-active latest trip is
    /// restored; a completed/cancelled last trip leaves the client idle.
    pub async fn restore_client(&self, client_id: i64) -> Result<Option<Trip>, TripError> {
        Ok(self
            .store
            .find_latest_for_client(client_id)
            .await?
            .filter(|t| t.status.is_active()))
    }

    pub async fn set_driver_online(&self, driver_id: i64, online: bool) -> Result<(), TripError> {
        self.store.set_driver_online(driver_id, online).await?;
        tracing::info!(driver_id, online, "Driver availability updated");
        Ok(())
    }

    /// Map a failed conditional update to NotFound/InvalidTransition
    async fn rejection(&self, trip_id: TripId) -> Result<Trip, TripError> {
        match self.store.get(trip_id).await? {
            Some(t) => Err(TripError::InvalidTransition { status: t.status }),
            None => Err(TripError::NotFound),
        }
    }
}
