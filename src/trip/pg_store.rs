//! Trip store, PostgreSQL implementation
//!
//! All state updates use atomic conditional UPDATEs checked via
//! `rows_affected()`. No status ever changes through a read-then-write pair.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use super::error::TripError;
use super::store::TripStore;
use super::types::{
    CreateTrip, DeliveryInfo, Invoice, Position, Trip, TripCategory, TripId, TripStatus,
};

const TRIP_COLUMNS: &str = "id, client_id, driver_id, status, origin_address, origin_lat, \
     origin_lng, destination_address, destination_lat, destination_lng, estimated_fare, \
     current_fare, final_fare, category, delivery_json, last_lat, last_lng, created_at, \
     accepted_at, started_at, completed_at";

/// PostgreSQL-backed trip store
pub struct PgTripStore {
    pool: PgPool,
}

impl PgTripStore {
    /// Create a new PgTripStore with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert a database row to a Trip
    fn row_to_trip(row: &sqlx::postgres::PgRow) -> Result<Trip, TripError> {
        let id_str: String = row.try_get("id")?;
        let id: TripId = id_str
            .parse()
            .map_err(|_| sqlx::Error::Decode(format!("invalid trip id: {id_str}").into()))?;

        let status_id: i16 = row.try_get("status")?;
        let status = TripStatus::from_id(status_id)
            .ok_or_else(|| sqlx::Error::Decode(format!("invalid status id: {status_id}").into()))?;

        let category_id: i16 = row.try_get("category")?;
        let category = TripCategory::from_id(category_id).ok_or_else(|| {
            sqlx::Error::Decode(format!("invalid category id: {category_id}").into())
        })?;

        let delivery: Option<DeliveryInfo> = match row.try_get::<Option<String>, _>("delivery_json")? {
            Some(json) => Some(
                serde_json::from_str(&json)
                    .map_err(|e| sqlx::Error::Decode(format!("delivery_json: {e}").into()))?,
            ),
            None => None,
        };

        let last_lat: Option<f64> = row.try_get("last_lat")?;
        let last_lng: Option<f64> = row.try_get("last_lng")?;
        let last_position = match (last_lat, last_lng) {
            (Some(lat), Some(lng)) => Some(Position { lat, lng }),
            _ => None,
        };

        Ok(Trip {
            id,
            client_id: row.try_get("client_id")?,
            driver_id: row.try_get("driver_id")?,
            status,
            origin_address: row.try_get("origin_address")?,
            origin: Position {
                lat: row.try_get("origin_lat")?,
                lng: row.try_get("origin_lng")?,
            },
            destination_address: row.try_get("destination_address")?,
            destination: Position {
                lat: row.try_get("destination_lat")?,
                lng: row.try_get("destination_lng")?,
            },
            estimated_fare: row.try_get("estimated_fare")?,
            current_fare: row.try_get("current_fare")?,
            final_fare: row.try_get("final_fare")?,
            category,
            delivery,
            last_position,
            created_at: row.try_get("created_at")?,
            accepted_at: row.try_get("accepted_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn rows_to_trips(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Trip>, TripError> {
        let mut trips = Vec::with_capacity(rows.len());
        for row in &rows {
            trips.push(Self::row_to_trip(row)?);
        }
        Ok(trips)
    }
}

#[async_trait]
impl TripStore for PgTripStore {
    async fn insert(&self, req: &CreateTrip) -> Result<Trip, TripError> {
        let id = TripId::new();
        let created_at = Utc::now();
        let delivery_json = match &req.delivery {
            Some(info) => Some(
                serde_json::to_string(info)
                    .map_err(|e| sqlx::Error::Encode(format!("delivery_json: {e}").into()))?,
            ),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO trips_tb
                (id, client_id, status, origin_address, origin_lat, origin_lng,
                 destination_address, destination_lat, destination_lng,
                 estimated_fare, category, delivery_json, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id.to_string())
        .bind(req.client_id)
        .bind(TripStatus::Requested.id())
        .bind(&req.origin_address)
        .bind(req.origin.lat)
        .bind(req.origin.lng)
        .bind(&req.destination_address)
        .bind(req.destination.lat)
        .bind(req.destination.lng)
        .bind(req.estimated_fare)
        .bind(req.category.id())
        .bind(&delivery_json)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Trip {
            id,
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
            created_at,
            accepted_at: None,
            started_at: None,
            completed_at: None,
        })
    }

    async fn get(&self, id: TripId) -> Result<Option<Trip>, TripError> {
        let row = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips_tb WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_trip(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_active_for_client(&self, client_id: i64) -> Result<Option<Trip>, TripError> {
        let row = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips_tb \
             WHERE client_id = $1 AND status IN ($2, $3, $4) \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(client_id)
        .bind(TripStatus::Requested.id())
        .bind(TripStatus::Accepted.id())
        .bind(TripStatus::Ongoing.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_trip(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_latest_for_client(&self, client_id: i64) -> Result<Option<Trip>, TripError> {
        let row = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips_tb \
             WHERE client_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_trip(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_active_for_driver(&self, driver_id: i64) -> Result<Option<Trip>, TripError> {
        let row = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips_tb \
             WHERE driver_id = $1 AND status IN ($2, $3) \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(driver_id)
        .bind(TripStatus::Accepted.id())
        .bind(TripStatus::Ongoing.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_trip(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_requested(&self) -> Result<Vec<Trip>, TripError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips_tb \
             WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(TripStatus::Requested.id())
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_trips(rows)
    }

    async fn try_assign_driver(&self, id: TripId, driver_id: i64) -> Result<bool, TripError> {
        let result = sqlx::query(
            r#"
            UPDATE trips_tb
            SET driver_id = $1, status = $2, accepted_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(driver_id)
        .bind(TripStatus::Accepted.id())
        .bind(id.to_string())
        .bind(TripStatus::Requested.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status_if(
        &self,
        id: TripId,
        expected: TripStatus,
        new: TripStatus,
    ) -> Result<bool, TripError> {
        // Moving into `ongoing` stamps started_at; other transitions have
        // dedicated store methods for their timestamp columns.
        let sql = if new == TripStatus::Ongoing {
            "UPDATE trips_tb SET status = $1, started_at = NOW() WHERE id = $2 AND status = $3"
        } else {
            "UPDATE trips_tb SET status = $1 WHERE id = $2 AND status = $3"
        };

        let result = sqlx::query(sql)
            .bind(new.id())
            .bind(id.to_string())
            .bind(expected.id())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_if_cancellable(&self, id: TripId) -> Result<bool, TripError> {
        let result = sqlx::query(
            "UPDATE trips_tb SET status = $1 WHERE id = $2 AND status IN ($3, $4)",
        )
        .bind(TripStatus::Cancelled.id())
        .bind(id.to_string())
        .bind(TripStatus::Requested.id())
        .bind(TripStatus::Accepted.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_progress(
        &self,
        id: TripId,
        fare: Decimal,
        position: Position,
    ) -> Result<bool, TripError> {
        let result = sqlx::query(
            r#"
            UPDATE trips_tb
            SET current_fare = $1, last_lat = $2, last_lng = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(fare)
        .bind(position.lat)
        .bind(position.lng)
        .bind(id.to_string())
        .bind(TripStatus::Ongoing.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: TripId, final_fare: Decimal) -> Result<bool, TripError> {
        let result = sqlx::query(
            r#"
            UPDATE trips_tb
            SET status = $1, final_fare = $2, completed_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(TripStatus::Completed.id())
        .bind(final_fare)
        .bind(id.to_string())
        .bind(TripStatus::Ongoing.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn sweep_stale_requested(&self, older_than: Duration) -> Result<Vec<Trip>, TripError> {
        let threshold_secs = older_than.as_secs() as i64;

        // Single atomic statement: only trips still requested at execution
        // time are cancelled, so a concurrent accept wins cleanly.
        let rows = sqlx::query(&format!(
            "UPDATE trips_tb SET status = $1 \
             WHERE status = $2 AND created_at < NOW() - INTERVAL '1 second' * $3 \
             RETURNING {TRIP_COLUMNS}"
        ))
        .bind(TripStatus::Cancelled.id())
        .bind(TripStatus::Requested.id())
        .bind(threshold_secs)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_trips(rows)
    }

    async fn insert_invoice(&self, trip_id: TripId, amount: Decimal) -> Result<Invoice, TripError> {
        let id = ulid::Ulid::new().to_string();

        // One invoice per trip: the unique trip_id constraint plus
        // DO NOTHING makes duplicate confirmations a no-op.
        let inserted = sqlx::query(
            r#"
            INSERT INTO invoices_tb (id, trip_id, amount, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (trip_id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(trip_id.to_string())
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            tracing::info!(trip_id = %trip_id, "Invoice already exists - returning existing record");
        }

        let row = sqlx::query(
            "SELECT id, trip_id, amount, created_at FROM invoices_tb WHERE trip_id = $1",
        )
        .bind(trip_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(Invoice {
            id: row.try_get("id")?,
            trip_id,
            amount: row.try_get("amount")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn set_driver_position(
        &self,
        driver_id: i64,
        position: Position,
    ) -> Result<(), TripError> {
        sqlx::query(
            r#"
            INSERT INTO drivers_tb (id, is_online, last_lat, last_lng, updated_at)
            VALUES ($1, FALSE, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE SET last_lat = $2, last_lng = $3, updated_at = NOW()
            "#,
        )
        .bind(driver_id)
        .bind(position.lat)
        .bind(position.lng)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn driver_is_online(&self, driver_id: i64) -> Result<bool, TripError> {
        let row = sqlx::query("SELECT is_online FROM drivers_tb WHERE id = $1")
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => row.try_get("is_online")?,
            None => false,
        })
    }

    async fn set_driver_online(&self, driver_id: i64, online: bool) -> Result<(), TripError> {
        sqlx::query(
            r#"
            INSERT INTO drivers_tb (id, is_online, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (id) DO UPDATE SET is_online = $2, updated_at = NOW()
            "#,
        )
        .bind(driver_id)
        .bind(online)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
