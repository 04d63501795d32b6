//! Ridelink - Real-time trip dispatch engine
//!
//! Coordinates ride/delivery matching between clients and drivers over
//! persistent WebSocket connections, with a durable store as the only
//! cross-instance source of truth.
//!
//! # Modules
//!
//! - [`trip`] - Trip types, durable store seam, lifecycle engine
//! - [`websocket`] - Session registry, wire protocol, socket handler
//! - [`dispatch`] - Event-to-audience fan-out
//! - [`sweeper`] - Orphan trip sweeping
//! - [`throttle`] - Location persistence throttling
//! - [`gateway`] - HTTP/WS router and admin surface
//! - [`config`] / [`logging`] / [`db`] - Service plumbing

pub mod config;
pub mod db;
pub mod dispatch;
pub mod gateway;
pub mod logging;
pub mod sweeper;
pub mod throttle;
pub mod trip;
pub mod websocket;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use dispatch::Dispatcher;
pub use sweeper::OrphanSweeper;
pub use throttle::LocationThrottle;
pub use trip::{
    CreateTrip, Invoice, MemTripStore, PgTripStore, Position, Role, Trip, TripEngine, TripError,
    TripId, TripStatus, TripStore,
};
pub use websocket::{ClientEvent, ServerEvent, SessionRegistry};
