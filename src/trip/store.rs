//! Durable store seam for trips and invoices
//!
//! The store is the only cross-instance source of truth: every status change
//! goes through a conditional update ("apply only if still in the expected
//! state") so correctness holds with multiple service instances, never through
//! a read-then-write pair.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::TripError;
use super::types::{CreateTrip, Invoice, Position, Trip, TripId, TripStatus};

/// Trip/invoice persistence operations.
///
/// Implemented by [`PgTripStore`](super::pg_store::PgTripStore) for production
/// and [`MemTripStore`](super::mem_store::MemTripStore) for tests and the
/// no-database demo mode. The conditional-update methods return `false` when
/// the record was not in the expected state (lost race), `Err` only on store
/// failure.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Persist a new trip with status = requested
    async fn insert(&self, req: &CreateTrip) -> Result<Trip, TripError>;

    /// Fetch a trip by id
    async fn get(&self, id: TripId) -> Result<Option<Trip>, TripError>;

    /// The client's trip with status in {requested, accepted, ongoing}, if any
    async fn find_active_for_client(&self, client_id: i64) -> Result<Option<Trip>, TripError>;

    /// The client's single most recent trip regardless of status
    async fn find_latest_for_client(&self, client_id: i64) -> Result<Option<Trip>, TripError>;

    /// The driver's trip with status in {accepted, ongoing}, if any
    async fn find_active_for_driver(&self, driver_id: i64) -> Result<Option<Trip>, TripError>;

    /// All trips still waiting for a driver
    async fn list_requested(&self) -> Result<Vec<Trip>, TripError>;

    /// Atomic accept: set driver_id, status = accepted, accepted_at, only if
    /// status is still requested. Returns false if another driver won.
    async fn try_assign_driver(&self, id: TripId, driver_id: i64) -> Result<bool, TripError>;

    /// Atomic CAS on status. Sets the matching timestamp column as a side
    /// effect (started_at when moving to ongoing).
    async fn update_status_if(
        &self,
        id: TripId,
        expected: TripStatus,
        new: TripStatus,
    ) -> Result<bool, TripError>;

    /// Atomic cancellation: requested|accepted -> cancelled in a single
    /// conditional update, so an accept landing just before never turns a
    /// legal cancel into a rejection. Returns false if the trip was not in
    /// a cancellable state.
    async fn cancel_if_cancellable(&self, id: TripId) -> Result<bool, TripError>;

    /// Persist current fare and last position, only while ongoing
    async fn set_progress(
        &self,
        id: TripId,
        fare: Decimal,
        position: Position,
    ) -> Result<bool, TripError>;

    /// Atomic completion: status ongoing -> completed, final_fare, completed_at
    async fn complete(&self, id: TripId, final_fare: Decimal) -> Result<bool, TripError>;

    /// Cancel every requested trip older than `older_than`, returning the
    /// trips this caller actually transitioned. Trips accepted concurrently
    /// are left alone by the conditional update.
    async fn sweep_stale_requested(&self, older_than: Duration) -> Result<Vec<Trip>, TripError>;

    /// Record the payment receipt. At most one invoice exists per trip; a
    /// duplicate confirmation returns the existing invoice unchanged.
    async fn insert_invoice(&self, trip_id: TripId, amount: Decimal) -> Result<Invoice, TripError>;

    /// Persist a driver's standalone position ping. Call frequency is gated
    /// by the location throttle, not here.
    async fn set_driver_position(&self, driver_id: i64, position: Position)
        -> Result<(), TripError>;

    /// Driver availability flag, read from the store, never assumed
    async fn driver_is_online(&self, driver_id: i64) -> Result<bool, TripError>;

    /// Flip the driver availability flag
    async fn set_driver_online(&self, driver_id: i64, online: bool) -> Result<(), TripError>;
}
