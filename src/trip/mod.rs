//! Trip dispatch domain: types, store seam, lifecycle engine

pub mod engine;
pub mod error;
pub mod mem_store;
pub mod pg_store;
pub mod store;
pub mod types;

pub use engine::{CancelOutcome, DriverRestore, TripEngine};
pub use error::TripError;
pub use mem_store::MemTripStore;
pub use pg_store::PgTripStore;
pub use store::TripStore;
pub use types::{
    CreateTrip, DeliveryInfo, Invoice, Position, Role, Trip, TripCategory, TripId, TripStatus,
};
