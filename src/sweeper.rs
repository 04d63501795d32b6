//! Orphan Sweeper
//!
//! Periodic background task that cancels requested trips no driver accepted
//! within the staleness window. The store's conditional update guarantees
//! that of {sweep-cancel, concurrent accept} exactly one wins per trip; the
//! loser observes a rejection and takes no further action. Nothing here
//! retries beyond the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::trip::{Role, TripEngine, TripError, TripId};
use crate::websocket::connection::SessionRegistry;
use crate::websocket::messages::ServerEvent;

/// Background task cancelling stale unaccepted trips
pub struct OrphanSweeper {
    engine: Arc<TripEngine>,
    registry: Arc<SessionRegistry>,
    interval: Duration,
    stale_after: Duration,
}

impl OrphanSweeper {
    pub fn new(
        engine: Arc<TripEngine>,
        registry: Arc<SessionRegistry>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            engine,
            registry,
            interval,
            stale_after,
        }
    }

    /// Run the sweep loop. Runs in a tokio task for the process lifetime.
    pub async fn run(self) {
        let mut tick = interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.as_secs(),
            "[OrphanSweeper] Started"
        );

        loop {
            tick.tick().await;
            match self.sweep_once().await {
                Ok(swept) if !swept.is_empty() => {
                    tracing::info!(count = swept.len(), "[OrphanSweeper] Cancelled stale trips");
                }
                Ok(_) => {}
                // Transient store failure: skip this tick, the next one retries
                Err(e) => tracing::error!(error = %e, "[OrphanSweeper] Sweep failed"),
            }
        }
    }

    /// One sweep pass. Returns the (trip, client) pairs this pass actually
    /// cancelled, after notifying them.
    pub async fn sweep_once(&self) -> Result<Vec<(TripId, i64)>, TripError> {
        let swept = self.engine.sweep_orphans(self.stale_after).await?;

        let mut pairs = Vec::with_capacity(swept.len());
        for trip in swept {
            // Distinct timeout notification, not a generic cancellation
            self.registry.send_to(
                Role::Client,
                trip.client_id,
                ServerEvent::TripTimeout {
                    trip_id: trip.id,
                    message: "No driver accepted your trip in time".to_string(),
                },
            );
            self.registry.broadcast_role(
                Role::Driver,
                ServerEvent::TripCancelledGlobal { trip_id: trip.id },
            );
            pairs.push((trip.id, trip.client_id));
        }

        Ok(pairs)
    }
}
