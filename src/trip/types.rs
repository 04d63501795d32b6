//! Trip core types
//!
//! Type definitions for the trip lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trip ID type - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed across service instances
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(ulid::Ulid);

impl TripId {
    /// Generate a new unique TripId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TripId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TripId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Trip lifecycle state
///
/// ```text
/// requested -> accepted -> ongoing -> completed
///     |            |
///     +-> cancelled +-> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Waiting for a driver to accept
    Requested = 1,
    /// A driver won the accept race
    Accepted = 2,
    /// Ride/delivery in progress
    Ongoing = 3,
    /// Terminal: finished and final fare recorded
    Completed = 4,
    /// Terminal: cancelled by either side or swept as an orphan
    Cancelled = 5,
}

impl TripStatus {
    /// Get numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TripStatus::Requested),
            2 => Some(TripStatus::Accepted),
            3 => Some(TripStatus::Ongoing),
            4 => Some(TripStatus::Completed),
            5 => Some(TripStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Active = the client is still bound to this trip
    /// (requested, accepted, ongoing)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Get human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "REQUESTED",
            TripStatus::Accepted => "ACCEPTED",
            TripStatus::Ongoing => "ONGOING",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trip category (ride vs delivery)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum TripCategory {
    Ride = 1,
    Delivery = 2,
}

impl TripCategory {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TripCategory::Ride),
            2 => Some(TripCategory::Delivery),
            _ => None,
        }
    }
}

/// Connected party role, also the room-name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Driver,
}

impl Role {
    /// Get room-name prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Driver => "driver",
        }
    }

    /// The counterpart on the other side of a trip
    pub fn counterpart(&self) -> Role {
        match self {
            Role::Client => Role::Driver,
            Role::Driver => Role::Client,
        }
    }

    /// Per-identity room name, e.g. `driver_42`
    pub fn room(&self, user_id: i64) -> String {
        format!("{}_{}", self.as_str(), user_id)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Geographic coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

/// Delivery-specific metadata (set when category = delivery)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub recipient_name: String,
    pub recipient_phone: String,
    pub description: String,
}

/// End-to-end ride/delivery request entity
///
/// Invariants maintained by the store layer:
/// - `driver_id` is non-null iff status has passed `accepted`
/// - `final_fare` is non-null iff status = `completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub client_id: i64,
    pub driver_id: Option<i64>,
    pub status: TripStatus,
    pub origin_address: String,
    pub origin: Position,
    pub destination_address: String,
    pub destination: Position,
    pub estimated_fare: Decimal,
    pub current_fare: Option<Decimal>,
    pub final_fare: Option<Decimal>,
    pub category: TripCategory,
    pub delivery: Option<DeliveryInfo>,
    pub last_position: Option<Position>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payment record, created once per paid trip. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub trip_id: TripId,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Fields a client submits when requesting a trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTrip {
    pub client_id: i64,
    pub origin_address: String,
    pub origin: Position,
    pub destination_address: String,
    pub destination: Position,
    pub estimated_fare: Decimal,
    pub category: TripCategory,
    #[serde(default)]
    pub delivery: Option<DeliveryInfo>,
}
