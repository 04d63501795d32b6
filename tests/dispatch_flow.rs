//! End-to-end dispatch flow tests over the in-memory store.
//!
//! These drive the dispatcher the way the socket layer does: sessions are
//! registered with channel senders and fan-out is asserted on the receiving
//! ends.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;

use ridelink::dispatch::Dispatcher;
use ridelink::sweeper::OrphanSweeper;
use ridelink::trip::{
    CreateTrip, MemTripStore, Position, Role, TripCategory, TripEngine, TripError, TripStatus,
    TripStore,
};
use ridelink::websocket::{ServerEvent, SessionRegistry};

struct Harness {
    store: Arc<MemTripStore>,
    engine: Arc<TripEngine>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
}

fn harness() -> Harness {
    let store = Arc::new(MemTripStore::new());
    let engine = Arc::new(TripEngine::new(store.clone() as Arc<dyn TripStore>));
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(
        engine.clone(),
        registry.clone(),
        Duration::from_secs(30),
    ));
    Harness {
        store,
        engine,
        registry,
        dispatcher,
    }
}

fn connect(h: &Harness, role: Role, user_id: i64) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    h.registry.register(user_id, role, tx);
    rx
}

fn request(client_id: i64) -> CreateTrip {
    CreateTrip {
        client_id,
        origin_address: "12 Pickup Rd".to_string(),
        origin: Position {
            lat: -23.55,
            lng: -46.63,
        },
        destination_address: "99 Dropoff Ln".to_string(),
        destination: Position {
            lat: -23.56,
            lng: -46.66,
        },
        estimated_fare: Decimal::new(2350, 2),
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
async fn concurrent_accepts_have_exactly_one_winner() {
    let h = harness();
    let (trip, _) = h.engine.create(&request(1)).await.unwrap();
    let trip_id = trip.id;

    let mut handles = Vec::new();
    for driver_id in 1..=20i64 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.accept(trip_id, driver_id).await
        }));
    }

    let mut winners = Vec::new();
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(accepted) => winners.push(accepted.driver_id.unwrap()),
            Err(TripError::Unavailable) => lost += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(lost, 19);

    // The stored driver equals the sole winner
    let stored = h.store.get(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::Accepted);
    assert_eq!(stored.driver_id, Some(winners[0]));
}

#[tokio::test]
async fn duplicate_request_returns_same_trip_and_single_record() {
    let h = harness();
    let mut client = connect(&h, Role::Client, 1);

    h.dispatcher.request_trip(request(1)).await;
    h.dispatcher.request_trip(request(1)).await;

    let ids: Vec<_> = drain(&mut client)
        .into_iter()
        .map(|e| match e {
            ServerEvent::TripCreated { trip_id } => trip_id,
            other => panic!("unexpected event: {other:?}"),
        })
        .collect();

    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
    assert_eq!(h.store.trip_count(), 1);
}

#[tokio::test]
async fn cancel_in_ongoing_or_terminal_always_rejects() {
    let h = harness();
    let (trip, _) = h.engine.create(&request(1)).await.unwrap();
    h.engine.accept(trip.id, 10).await.unwrap();
    h.engine.start(trip.id).await.unwrap();

    for role in [Role::Client, Role::Driver] {
        let err = h.engine.cancel(trip.id, role).await.unwrap_err();
        assert!(matches!(err, TripError::InvalidTransition { .. }));
    }

    h.engine
        .finish(trip.id, Decimal::new(2000, 2))
        .await
        .unwrap();
    let err = h.engine.cancel(trip.id, Role::Client).await.unwrap_err();
    assert!(matches!(
        err,
        TripError::InvalidTransition {
            status: TripStatus::Completed
        }
    ));

    // Still completed, not silently no-op'd into anything else
    let stored = h.store.get(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::Completed);
}

#[tokio::test]
async fn ten_rapid_location_pings_forward_ten_persist_one() {
    let h = harness();
    let mut client = connect(&h, Role::Client, 1);

    // Driver 10 has an ongoing trip with client 1
    let (trip, _) = h.engine.create(&request(1)).await.unwrap();
    h.engine.accept(trip.id, 10).await.unwrap();
    h.engine.start(trip.id).await.unwrap();

    for i in 0..10 {
        h.dispatcher
            .update_location(
                10,
                Position {
                    lat: -23.55 + f64::from(i) * 0.001,
                    lng: -46.63,
                },
            )
            .await;
    }

    let forwarded = drain(&mut client)
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::DriverLocation { driver_id: 10, .. }))
        .count();
    assert_eq!(forwarded, 10);
    assert_eq!(h.store.driver_position_writes(10), 1);
}

#[tokio::test]
async fn offline_driver_join_gets_flag_only_online_gets_pending() {
    let h = harness();
    h.engine.create(&request(1)).await.unwrap();
    h.engine.create(&request(2)).await.unwrap();
    h.engine.create(&request(3)).await.unwrap();

    // Offline: login_status false, no pending list even though requests exist
    let events = h.dispatcher.restore_session(10, Role::Driver).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        ServerEvent::LoginStatus { is_online: false }
    ));

    // Online with 0 active and 3 pending: exactly 3
    h.engine.set_driver_online(10, true).await.unwrap();
    let events = h.dispatcher.restore_session(10, Role::Driver).await;
    assert!(matches!(
        events[0],
        ServerEvent::LoginStatus { is_online: true }
    ));
    match &events[1] {
        ServerEvent::PendingTrips { trips } => assert_eq!(trips.len(), 3),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn sweep_times_out_stale_trip_once_and_spares_accepted() {
    let h = harness();
    let sweeper = OrphanSweeper::new(
        h.engine.clone(),
        h.registry.clone(),
        Duration::from_secs(60),
        Duration::from_secs(120),
    );

    let mut client1 = connect(&h, Role::Client, 1);
    let mut client2 = connect(&h, Role::Client, 2);

    let (orphan, _) = h.engine.create(&request(1)).await.unwrap();
    let (rescued, _) = h.engine.create(&request(2)).await.unwrap();
    h.store.age_trip(orphan.id, Duration::from_secs(600));
    h.store.age_trip(rescued.id, Duration::from_secs(600));

    // Accepted one tick before the sweep considers it
    h.engine.accept(rescued.id, 10).await.unwrap();

    let pairs = sweeper.sweep_once().await.unwrap();
    assert_eq!(pairs, vec![(orphan.id, 1)]);

    let events = drain(&mut client1);
    let timeouts = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::TripTimeout { .. }))
        .count();
    assert_eq!(timeouts, 1);

    assert!(drain(&mut client2).is_empty());
    assert_eq!(
        h.store.get(rescued.id).await.unwrap().unwrap().status,
        TripStatus::Accepted
    );

    // A second pass finds nothing: the orphan is already terminal
    assert!(sweeper.sweep_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn full_trip_flow_with_accept_race() {
    let h = harness();
    let mut client = connect(&h, Role::Client, 1);
    let mut d1 = connect(&h, Role::Driver, 10);
    let mut d2 = connect(&h, Role::Driver, 11);

    // Client requests; both drivers see the offer
    h.dispatcher.request_trip(request(1)).await;
    let trip_id = match &drain(&mut client)[..] {
        [ServerEvent::TripCreated { trip_id }] => *trip_id,
        other => panic!("unexpected events: {other:?}"),
    };
    assert!(matches!(
        drain(&mut d1)[..],
        [ServerEvent::NewTripAvailable { .. }]
    ));
    assert!(matches!(
        drain(&mut d2)[..],
        [ServerEvent::NewTripAvailable { .. }]
    ));

    // Both race to accept
    tokio::join!(
        h.dispatcher.accept_trip(trip_id, 10, "Dana"),
        h.dispatcher.accept_trip(trip_id, 11, "Lee"),
    );

    let winner_id = h
        .store
        .get(trip_id)
        .await
        .unwrap()
        .unwrap()
        .driver_id
        .unwrap();
    let (mut winner, mut loser) = if winner_id == 10 { (d1, d2) } else { (d2, d1) };

    // Client learned the winner
    let client_events = drain(&mut client);
    assert!(client_events
        .iter()
        .any(|e| matches!(e, ServerEvent::TripAccepted { driver_id, .. } if *driver_id == winner_id)));

    // Only the loser saw the removal; the winner is not re-notified of its
    // own accept. The loser also got the typed rejection.
    assert!(!drain(&mut winner)
        .iter()
        .any(|e| matches!(e, ServerEvent::TripTaken { .. })));
    let loser_events = drain(&mut loser);
    assert!(loser_events
        .iter()
        .any(|e| matches!(e, ServerEvent::TripTaken { .. })));
    assert!(loser_events.iter().any(
        |e| matches!(e, ServerEvent::DispatchError { code, .. } if code == "TRIP_UNAVAILABLE")
    ));

    // Winner drives the trip to completion
    h.dispatcher
        .start_ride(Some((Role::Driver, winner_id)), trip_id)
        .await;
    for fare in [500i64, 900, 1400] {
        h.dispatcher
            .trip_progress(
                Some((Role::Driver, winner_id)),
                trip_id,
                Decimal::new(fare, 2),
                Position {
                    lat: -23.55,
                    lng: -46.64,
                },
            )
            .await;
    }
    h.dispatcher
        .finish_ride(Some((Role::Driver, winner_id)), trip_id, Decimal::new(2100, 2))
        .await;
    h.dispatcher
        .confirm_payment(Some((Role::Driver, winner_id)), trip_id, Decimal::new(2100, 2))
        .await;

    let events = drain(&mut client);
    assert!(matches!(events[0], ServerEvent::RideStarted { .. }));
    let updates = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::TripUpdate { .. }))
        .count();
    assert_eq!(updates, 3);
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::RideFinished { final_fare, .. } if *final_fare == Decimal::new(2100, 2))));
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::PaymentConfirmed { .. })));

    // Exactly one trip, exactly one invoice
    let stored = h.store.get(trip_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::Completed);
    assert_eq!(stored.final_fare, Some(Decimal::new(2100, 2)));
    assert_eq!(h.store.trip_count(), 1);
    assert_eq!(h.store.invoice_count(), 1);

    // Duplicate payment confirmation stays at one invoice
    h.dispatcher
        .confirm_payment(Some((Role::Driver, winner_id)), trip_id, Decimal::new(2100, 2))
        .await;
    assert_eq!(h.store.invoice_count(), 1);
}

#[tokio::test]
async fn reconnecting_client_restores_active_trip_but_not_terminal() {
    let h = harness();
    let (trip, _) = h.engine.create(&request(1)).await.unwrap();
    h.engine.accept(trip.id, 10).await.unwrap();

    let events = h.dispatcher.restore_session(1, Role::Client).await;
    match &events[..] {
        [ServerEvent::RestoreTrip { trip: restored }] => {
            assert_eq!(restored.id, trip.id);
            assert_eq!(restored.status, TripStatus::Accepted);
        }
        other => panic!("unexpected events: {other:?}"),
    }

    // After completion the client comes back to an idle state
    h.engine.start(trip.id).await.unwrap();
    h.engine
        .finish(trip.id, Decimal::new(2000, 2))
        .await
        .unwrap();
    assert!(h.dispatcher.restore_session(1, Role::Client).await.is_empty());
}

#[tokio::test]
async fn reconnecting_driver_restores_active_trip() {
    let h = harness();
    let (trip, _) = h.engine.create(&request(1)).await.unwrap();
    h.engine.set_driver_online(10, true).await.unwrap();
    h.engine.accept(trip.id, 10).await.unwrap();

    let events = h.dispatcher.restore_session(10, Role::Driver).await;
    assert!(matches!(
        events[0],
        ServerEvent::LoginStatus { is_online: true }
    ));
    match &events[1] {
        ServerEvent::RestoreTrip { trip: restored } => assert_eq!(restored.id, trip.id),
        other => panic!("unexpected event: {other:?}"),
    }
}
