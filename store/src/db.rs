use crate::errors::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::future::Future;
use std::time::Duration;
use telemetry::{Position, StoredRecord, TelemetryRecord};
use tracing::info;

/// Durable destination for accepted records
pub trait RecordLog: Send + Sync + 'static {
    fn append(&self, batch: &[StoredRecord]) -> impl Future<Output = Result<()>> + Send;
}

impl RecordLog for PgPool {
    fn append(&self, batch: &[StoredRecord]) -> impl Future<Output = Result<()>> + Send {
        insert_batch(self, batch)
    }
}

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established, running migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

pub async fn insert_batch(pool: &PgPool, batch: &[StoredRecord]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let drone_ids: Vec<&str> = batch.iter().map(|r| r.emitter_id()).collect();
    let positions: Vec<Json<Position>> = batch.iter().map(|r| Json(r.record.position)).collect();
    let batteries: Vec<i32> = batch
        .iter()
        .map(|r| i32::from(r.record.battery_level))
        .collect();
    let received: Vec<DateTime<Utc>> = batch.iter().map(|r| r.received_at).collect();

    sqlx::query(
        r#"
        INSERT INTO drone_data (drone_id, position, battery_level, received_at)
        SELECT * FROM UNNEST($1::text[], $2::jsonb[], $3::int4[], $4::timestamptz[])
        "#,
    )
    .bind(&drone_ids)
    .bind(&positions)
    .bind(&batteries)
    .bind(&received)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct LatestRow {
    drone_id: String,
    position: Json<Position>,
    battery_level: i32,
    received_at: DateTime<Utc>,
}

/// Latest row per drone, used to warm the cache on startup
pub async fn load_latest(pool: &PgPool) -> Result<Vec<StoredRecord>> {
    let rows = sqlx::query_as::<_, LatestRow>(
        r#"
        SELECT DISTINCT ON (drone_id) drone_id, position, battery_level, received_at
        FROM drone_data
        ORDER BY drone_id, received_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            StoredRecord::new(
                TelemetryRecord {
                    emitter_id: row.drone_id,
                    position: row.position.0,
                    battery_level: row.battery_level.clamp(0, 100) as u8,
                },
                row.received_at,
            )
        })
        .collect())
}
