//! Dispatch Broadcaster
//!
//! Routes each lifecycle event to its audience: global driver broadcasts,
//! per-client rooms, per-driver rooms. Every fan-out happens only after the
//! corresponding store mutation succeeded, so a notified party re-reading the
//! store immediately observes the new state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::throttle::LocationThrottle;
use crate::trip::{CreateTrip, Position, Role, TripEngine, TripError, TripId, TripStore};
use crate::websocket::connection::SessionRegistry;
use crate::websocket::messages::{ClientEvent, ServerEvent};

/// Event router over the lifecycle engine and the session registry
pub struct Dispatcher {
    engine: Arc<TripEngine>,
    registry: Arc<SessionRegistry>,
    throttle: LocationThrottle,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<TripEngine>,
        registry: Arc<SessionRegistry>,
        persist_window: Duration,
    ) -> Self {
        Self {
            engine,
            registry,
            throttle: LocationThrottle::new(persist_window),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<TripEngine> {
        &self.engine
    }

    /// Route one inbound event. `caller` is the joined identity of the
    /// sending connection, used for typed rejection delivery.
    pub async fn dispatch(&self, caller: Option<(Role, i64)>, event: ClientEvent) {
        match event {
            // Join is handled by the socket layer (it owns registration)
            ClientEvent::Join { .. } => {}
            ClientEvent::RequestTrip(req) => self.request_trip(req).await,
            ClientEvent::AcceptTrip {
                trip_id,
                driver_id,
                driver_name,
            } => self.accept_trip(trip_id, driver_id, &driver_name).await,
            ClientEvent::CancelTrip { trip_id, role } => {
                self.cancel_trip(caller, trip_id, role).await
            }
            ClientEvent::StartRide { trip_id } => self.start_ride(caller, trip_id).await,
            ClientEvent::TripProgress {
                trip_id,
                fare,
                position,
            } => self.trip_progress(caller, trip_id, fare, position).await,
            ClientEvent::FinishRide {
                trip_id,
                final_fare,
            } => self.finish_ride(caller, trip_id, final_fare).await,
            ClientEvent::ConfirmPayment { trip_id, amount } => {
                self.confirm_payment(caller, trip_id, amount).await
            }
            ClientEvent::ToggleOnline {
                driver_id,
                is_online,
            } => self.toggle_online(driver_id, is_online).await,
            ClientEvent::UpdateLocation {
                driver_id,
                position,
            } => self.update_location(driver_id, position).await,
        }
    }

    /// Join restoration payload. Pure read; the only side effect of a join
    /// is the registry write done by the socket layer.
    pub async fn restore_session(&self, user_id: i64, role: Role) -> Vec<ServerEvent> {
        let result = match role {
            Role::Driver => self.restore_driver(user_id).await,
            Role::Client => self.restore_client(user_id).await,
        };

        match result {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(user_id, role = %role, error = %e, "Join restoration failed");
                vec![ServerEvent::DispatchError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                }]
            }
        }
    }

    async fn restore_driver(&self, driver_id: i64) -> Result<Vec<ServerEvent>, TripError> {
        let restore = self.engine.restore_driver(driver_id).await?;
        let mut events = vec![ServerEvent::LoginStatus {
            is_online: restore.is_online,
        }];

        if let Some(trip) = restore.active {
            events.push(ServerEvent::RestoreTrip { trip });
        } else if restore.is_online {
            events.push(ServerEvent::PendingTrips {
                trips: restore.pending,
            });
        }

        Ok(events)
    }

    async fn restore_client(&self, client_id: i64) -> Result<Vec<ServerEvent>, TripError> {
        Ok(match self.engine.restore_client(client_id).await? {
            Some(trip) => vec![ServerEvent::RestoreTrip { trip }],
            // Last trip terminal or absent: the client enters idle state
            None => Vec::new(),
        })
    }

    /// new request -> ack to the requester, broadcast to all drivers.
    /// A duplicate submission acks with the existing id and is not
    /// re-broadcast.
    pub async fn request_trip(&self, req: CreateTrip) {
        let client_id = req.client_id;
        match self.engine.create(&req).await {
            Ok((trip, created)) => {
                self.registry.send_to(
                    Role::Client,
                    client_id,
                    ServerEvent::TripCreated { trip_id: trip.id },
                );
                if created {
                    self.registry
                        .broadcast_role(Role::Driver, ServerEvent::NewTripAvailable { trip });
                }
            }
            Err(e) => self.report(Some((Role::Client, client_id)), &e),
        }
    }

    /// accept success -> "accepted" to the client's room, removal signal to
    /// every other driver; the winner already knows its own action. The
    /// losing driver gets a typed rejection plus the same removal signal.
    pub async fn accept_trip(&self, trip_id: TripId, driver_id: i64, driver_name: &str) {
        match self.engine.accept(trip_id, driver_id).await {
            Ok(trip) => {
                self.registry.send_to(
                    Role::Client,
                    trip.client_id,
                    ServerEvent::TripAccepted {
                        trip_id,
                        driver_id,
                        driver_name: driver_name.to_string(),
                    },
                );
                self.registry.broadcast_role_except(
                    Role::Driver,
                    Some(driver_id),
                    ServerEvent::TripTaken { trip_id },
                );
            }
            Err(e) => {
                if matches!(e, TripError::Unavailable) {
                    self.registry
                        .send_to(Role::Driver, driver_id, ServerEvent::TripTaken { trip_id });
                }
                self.report(Some((Role::Driver, driver_id)), &e);
            }
        }
    }

    /// cancellation -> counterpart gets "cancelled", originator gets
    /// "cancelled-confirmed", all drivers get the pending-list removal.
    pub async fn cancel_trip(&self, caller: Option<(Role, i64)>, trip_id: TripId, by: Role) {
        match self.engine.cancel(trip_id, by).await {
            Ok(outcome) => {
                let trip = outcome.trip;
                // The caller identity names the originator; the trip record
                // has no driver_id when a driver cancels a requested trip.
                let (originator, counterpart) = match by {
                    Role::Client => (Some(trip.client_id), trip.driver_id),
                    Role::Driver => (
                        caller.map(|(_, user_id)| user_id).or(trip.driver_id),
                        Some(trip.client_id),
                    ),
                };

                if let Some(id) = counterpart {
                    self.registry.send_to(
                        by.counterpart(),
                        id,
                        ServerEvent::TripCancelled { trip_id },
                    );
                }
                if let Some(id) = originator {
                    self.registry
                        .send_to(by, id, ServerEvent::TripCancelledConfirmed { trip_id });
                }
                self.registry
                    .broadcast_role(Role::Driver, ServerEvent::TripCancelledGlobal { trip_id });
            }
            Err(e) => self.report(caller, &e),
        }
    }

    /// start -> unicast to the client's room (the triggering driver knows)
    pub async fn start_ride(&self, caller: Option<(Role, i64)>, trip_id: TripId) {
        match self.engine.start(trip_id).await {
            Ok(trip) => self.registry.send_to(
                Role::Client,
                trip.client_id,
                ServerEvent::RideStarted { trip_id },
            ),
            Err(e) => self.report(caller, &e),
        }
    }

    /// progress -> persist, then unicast the fare/position to the client
    pub async fn trip_progress(
        &self,
        caller: Option<(Role, i64)>,
        trip_id: TripId,
        fare: Decimal,
        position: Position,
    ) {
        match self.engine.update_fare(trip_id, fare, position).await {
            Ok(trip) => self.registry.send_to(
                Role::Client,
                trip.client_id,
                ServerEvent::TripUpdate {
                    trip_id,
                    fare,
                    position,
                },
            ),
            Err(e) => self.report(caller, &e),
        }
    }

    /// finish -> unicast to the client's room
    pub async fn finish_ride(
        &self,
        caller: Option<(Role, i64)>,
        trip_id: TripId,
        final_fare: Decimal,
    ) {
        match self.engine.finish(trip_id, final_fare).await {
            Ok(trip) => self.registry.send_to(
                Role::Client,
                trip.client_id,
                ServerEvent::RideFinished {
                    trip_id,
                    final_fare,
                },
            ),
            Err(e) => self.report(caller, &e),
        }
    }

    /// payment -> record the invoice, confirm to the client's room
    pub async fn confirm_payment(
        &self,
        caller: Option<(Role, i64)>,
        trip_id: TripId,
        amount: Decimal,
    ) {
        let result = async {
            let invoice = self.engine.record_receipt(trip_id, amount).await?;
            let trip = self
                .engine
                .store()
                .get(trip_id)
                .await?
                .ok_or(TripError::NotFound)?;
            Ok::<_, TripError>((invoice, trip))
        }
        .await;

        match result {
            Ok((invoice, trip)) => self.registry.send_to(
                Role::Client,
                trip.client_id,
                ServerEvent::PaymentConfirmed {
                    trip_id,
                    invoice_id: invoice.id,
                    amount: invoice.amount,
                },
            ),
            Err(e) => self.report(caller, &e),
        }
    }

    /// Driver availability flip; persisted, no fan-out
    pub async fn toggle_online(&self, driver_id: i64, is_online: bool) {
        if let Err(e) = self.engine.set_driver_online(driver_id, is_online).await {
            self.report(Some((Role::Driver, driver_id)), &e);
        }
    }

    /// Standalone position ping: always forwarded live to the client of the
    /// driver's active trip; persisted at most once per throttle window.
    pub async fn update_location(&self, driver_id: i64, position: Position) {
        match self.engine.store().find_active_for_driver(driver_id).await {
            Ok(Some(trip)) => self.registry.send_to(
                Role::Client,
                trip.client_id,
                ServerEvent::DriverLocation {
                    driver_id,
                    position,
                },
            ),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(driver_id, error = %e, "Location forward lookup failed");
            }
        }

        if self
            .throttle
            .should_persist(driver_id, Utc::now().timestamp_millis())
        {
            if let Err(e) = self
                .engine
                .store()
                .set_driver_position(driver_id, position)
                .await
            {
                tracing::error!(driver_id, error = %e, "Location persist failed");
            }
        }
    }

    /// Administrative account status change, forwarded to the affected
    /// driver's live session regardless of the administrative origin
    pub fn notify_account_status(&self, driver_id: i64, active: bool) {
        let event = if active {
            ServerEvent::AccountActivated {
                message: "Your account has been activated".to_string(),
            }
        } else {
            ServerEvent::AccountSuspended {
                message: "Your account has been suspended".to_string(),
            }
        };
        self.registry.send_to(Role::Driver, driver_id, event);
    }

    fn report(&self, caller: Option<(Role, i64)>, err: &TripError) {
        if let TripError::Database(e) = err {
            tracing::error!(error = %e, "Store failure during dispatch");
        }
        if let Some((role, user_id)) = caller {
            self.registry.send_to(
                role,
                user_id,
                ServerEvent::DispatchError {
                    code: err.code().to_string(),
                    message: err.to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trip::{MemTripStore, TripCategory, TripStatus};
    use tokio::sync::mpsc;

    fn dispatcher() -> Dispatcher {
        let store = Arc::new(MemTripStore::new());
        let engine = Arc::new(TripEngine::new(store));
        let registry = Arc::new(SessionRegistry::new());
        Dispatcher::new(engine, registry, Duration::from_secs(30))
    }

    fn connect(
        d: &Dispatcher,
        role: Role,
        user_id: i64,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        d.registry().register(user_id, role, tx);
        rx
    }

    fn request(client_id: i64) -> CreateTrip {
        CreateTrip {
            client_id,
            origin_address: "1 Origin St".to_string(),
            origin: Position { lat: 0.0, lng: 0.0 },
            destination_address: "2 Dest Ave".to_string(),
            destination: Position { lat: 1.0, lng: 1.0 },
            estimated_fare: Decimal::new(1550, 2),
            category: TripCategory::Ride,
            delivery: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_request_acks_client_and_broadcasts_to_drivers() {
        let d = dispatcher();
        let mut client = connect(&d, Role::Client, 1);
        let mut driver = connect(&d, Role::Driver, 10);

        d.request_trip(request(1)).await;

        let client_events = drain(&mut client);
        assert!(matches!(client_events[..], [ServerEvent::TripCreated { .. }]));
        let driver_events = drain(&mut driver);
        assert!(matches!(
            driver_events[..],
            [ServerEvent::NewTripAvailable { .. }]
        ));
    }

    #[tokio::test]
    async fn test_duplicate_request_is_not_rebroadcast() {
        let d = dispatcher();
        let mut client = connect(&d, Role::Client, 1);
        let mut driver = connect(&d, Role::Driver, 10);

        d.request_trip(request(1)).await;
        d.request_trip(request(1)).await;

        // Two acks, same id
        let acks = drain(&mut client);
        let ids: Vec<_> = acks
            .iter()
            .map(|e| match e {
                ServerEvent::TripCreated { trip_id } => *trip_id,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);

        // But only one driver broadcast
        assert_eq!(drain(&mut driver).len(), 1);
    }

    #[tokio::test]
    async fn test_accept_notifies_client_and_revokes_elsewhere() {
        let d = dispatcher();
        let mut client = connect(&d, Role::Client, 1);
        let mut winner = connect(&d, Role::Driver, 10);
        let mut other = connect(&d, Role::Driver, 11);

        let (trip, _) = d.engine().create(&request(1)).await.unwrap();
        d.accept_trip(trip.id, 10, "Dana").await;

        let client_events = drain(&mut client);
        assert!(matches!(
            client_events[..],
            [ServerEvent::TripAccepted { driver_id: 10, .. }]
        ));
        // The accepting driver already knows; only the others are revoked
        assert!(drain(&mut winner).is_empty());
        assert!(matches!(
            drain(&mut other)[..],
            [ServerEvent::TripTaken { .. }]
        ));
    }

    #[tokio::test]
    async fn test_losing_driver_gets_taken_and_rejection() {
        let d = dispatcher();
        connect(&d, Role::Client, 1);
        let mut loser = connect(&d, Role::Driver, 11);

        let (trip, _) = d.engine().create(&request(1)).await.unwrap();
        d.engine().accept(trip.id, 10).await.unwrap();

        d.accept_trip(trip.id, 11, "Lee").await;

        let events = drain(&mut loser);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::TripTaken { .. })));
        assert!(events.iter().any(
            |e| matches!(e, ServerEvent::DispatchError { code, .. } if code == "TRIP_UNAVAILABLE")
        ));
    }

    #[tokio::test]
    async fn test_cancel_framing_both_sides() {
        let d = dispatcher();
        let mut client = connect(&d, Role::Client, 1);
        let mut driver = connect(&d, Role::Driver, 10);

        let (trip, _) = d.engine().create(&request(1)).await.unwrap();
        d.engine().accept(trip.id, 10).await.unwrap();
        drain(&mut client);
        drain(&mut driver);

        d.cancel_trip(Some((Role::Client, 1)), trip.id, Role::Client)
            .await;

        let client_events = drain(&mut client);
        assert!(matches!(
            client_events[..],
            [ServerEvent::TripCancelledConfirmed { .. }]
        ));

        let driver_events = drain(&mut driver);
        assert!(driver_events
            .iter()
            .any(|e| matches!(e, ServerEvent::TripCancelled { .. })));
        assert!(driver_events
            .iter()
            .any(|e| matches!(e, ServerEvent::TripCancelledGlobal { .. })));
    }

    #[tokio::test]
    async fn test_driver_cancel_of_requested_trip_confirms_to_caller() {
        let d = dispatcher();
        let mut client = connect(&d, Role::Client, 1);
        let mut driver = connect(&d, Role::Driver, 10);

        // No driver bound yet; the confirmation must route by caller identity
        let (trip, _) = d.engine().create(&request(1)).await.unwrap();
        d.cancel_trip(Some((Role::Driver, 10)), trip.id, Role::Driver)
            .await;

        let driver_events = drain(&mut driver);
        assert!(driver_events
            .iter()
            .any(|e| matches!(e, ServerEvent::TripCancelledConfirmed { .. })));
        assert!(drain(&mut client)
            .iter()
            .any(|e| matches!(e, ServerEvent::TripCancelled { .. })));
    }

    #[tokio::test]
    async fn test_progress_and_finish_unicast_to_client() {
        let d = dispatcher();
        let mut client = connect(&d, Role::Client, 1);

        let (trip, _) = d.engine().create(&request(1)).await.unwrap();
        d.engine().accept(trip.id, 10).await.unwrap();
        drain(&mut client);

        d.start_ride(Some((Role::Driver, 10)), trip.id).await;
        d.trip_progress(
            Some((Role::Driver, 10)),
            trip.id,
            Decimal::new(900, 2),
            Position { lat: 0.5, lng: 0.5 },
        )
        .await;
        d.finish_ride(Some((Role::Driver, 10)), trip.id, Decimal::new(1700, 2))
            .await;
        d.confirm_payment(Some((Role::Driver, 10)), trip.id, Decimal::new(1700, 2))
            .await;

        let events = drain(&mut client);
        assert!(matches!(events[0], ServerEvent::RideStarted { .. }));
        assert!(matches!(events[1], ServerEvent::TripUpdate { .. }));
        assert!(matches!(events[2], ServerEvent::RideFinished { .. }));
        assert!(matches!(events[3], ServerEvent::PaymentConfirmed { .. }));

        let stored = d.engine().store().get(trip.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TripStatus::Completed);
    }

    #[tokio::test]
    async fn test_account_status_push() {
        let d = dispatcher();
        let mut driver = connect(&d, Role::Driver, 10);

        d.notify_account_status(10, false);
        d.notify_account_status(10, true);

        let events = drain(&mut driver);
        assert!(matches!(events[0], ServerEvent::AccountSuspended { .. }));
        assert!(matches!(events[1], ServerEvent::AccountActivated { .. }));
    }

    #[tokio::test]
    async fn test_restore_offline_driver_gets_no_pending() {
        let d = dispatcher();
        d.engine().create(&request(1)).await.unwrap();

        let events = d.restore_session(10, Role::Driver).await;
        assert!(matches!(
            events[..],
            [ServerEvent::LoginStatus { is_online: false }]
        ));
    }

    #[tokio::test]
    async fn test_restore_online_driver_gets_pending() {
        let d = dispatcher();
        d.engine().create(&request(1)).await.unwrap();
        d.engine().create(&request(2)).await.unwrap();
        d.engine().set_driver_online(10, true).await.unwrap();

        let events = d.restore_session(10, Role::Driver).await;
        assert!(matches!(
            events[0],
            ServerEvent::LoginStatus { is_online: true }
        ));
        match &events[1] {
            ServerEvent::PendingTrips { trips } => assert_eq!(trips.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
