//! Wire protocol for the real-time dispatch channel
//!
//! Inbound and outbound events are externally tagged JSON:
//! `{"event": "...", "data": {...}}`. Malformed inbound payloads are logged
//! and ignored, never fatal to the connection.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trip::{CreateTrip, Position, Role, Trip, TripId};

/// Events a connected client or driver may send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Register this connection and receive restoration state
    Join { user_id: i64, role: Role },
    /// Create a trip (idempotent while a prior trip is active)
    RequestTrip(CreateTrip),
    /// Race-safe accept
    AcceptTrip {
        trip_id: TripId,
        driver_id: i64,
        driver_name: String,
    },
    /// Cancel per the state-machine rules
    CancelTrip { trip_id: TripId, role: Role },
    /// accepted -> ongoing
    StartRide { trip_id: TripId },
    /// Live fare/location update while ongoing
    TripProgress {
        trip_id: TripId,
        fare: Decimal,
        position: Position,
    },
    /// ongoing -> completed
    FinishRide { trip_id: TripId, final_fare: Decimal },
    /// Record the payment receipt
    ConfirmPayment { trip_id: TripId, amount: Decimal },
    /// Driver availability flip
    ToggleOnline { driver_id: i64, is_online: bool },
    /// Standalone position ping, forwarded live, persisted throttled
    UpdateLocation { driver_id: i64, position: Position },
}

/// Events pushed to connected parties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Join response for drivers: stored availability flag
    LoginStatus { is_online: bool },
    /// Join response: the trip to resume, both roles
    RestoreTrip { trip: Trip },
    /// Join response for online drivers with no active trip
    PendingTrips { trips: Vec<Trip> },
    /// Broadcast to all drivers on create
    NewTripAvailable { trip: Trip },
    /// Ack to the requesting client, carries the assigned id
    TripCreated { trip_id: TripId },
    /// To the client's room on accept
    TripAccepted {
        trip_id: TripId,
        driver_id: i64,
        driver_name: String,
    },
    /// To all drivers: offer revoked
    TripTaken { trip_id: TripId },
    /// Counterpart framing: the other side cancelled
    TripCancelled { trip_id: TripId },
    /// Originator framing, useful for multi-device sessions
    TripCancelledConfirmed { trip_id: TripId },
    /// Global pending-list removal
    TripCancelledGlobal { trip_id: TripId },
    RideStarted { trip_id: TripId },
    TripUpdate {
        trip_id: TripId,
        fare: Decimal,
        position: Position,
    },
    RideFinished { trip_id: TripId, final_fare: Decimal },
    PaymentConfirmed {
        trip_id: TripId,
        invoice_id: String,
        amount: Decimal,
    },
    /// Live forward of a standalone driver position ping
    DriverLocation { driver_id: i64, position: Position },
    /// Administrative pushes to the affected driver
    AccountSuspended { message: String },
    AccountActivated { message: String },
    /// Orphan sweep result, distinct from a generic cancellation
    TripTimeout { trip_id: TripId, message: String },
    /// Typed rejection back to the caller
    DispatchError { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_event_tagging() {
        let json = r#"{"event":"join","data":{"user_id":42,"role":"driver"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            ClientEvent::Join {
                user_id: 42,
                role: Role::Driver
            }
        ));
    }

    #[test]
    fn test_accept_payload() {
        let trip_id = TripId::new();
        let json = format!(
            r#"{{"event":"accept_trip","data":{{"trip_id":"{trip_id}","driver_id":7,"driver_name":"Dana"}}}}"#
        );
        let event: ClientEvent = serde_json::from_str(&json).unwrap();
        match event {
            ClientEvent::AcceptTrip {
                trip_id: id,
                driver_id,
                driver_name,
            } => {
                assert_eq!(id, trip_id);
                assert_eq!(driver_id, 7);
                assert_eq!(driver_name, "Dana");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_outbound_event_names() {
        let msg = ServerEvent::LoginStatus { is_online: false };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""event":"login_status""#));
        assert!(json.contains(r#""is_online":false"#));

        let msg = ServerEvent::TripTaken {
            trip_id: TripId::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""event":"trip_taken""#));
    }

    #[test]
    fn test_malformed_payload_is_err_not_panic() {
        let json = r#"{"event":"join","data":{"user_id":"not-a-number"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }
}
