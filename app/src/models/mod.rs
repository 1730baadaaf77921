use crate::error::DBError;
use async_trait::async_trait;
use soilsense_core::{NewReading, SensorDefaults};

pub mod memory;
pub mod reading;
pub mod sensor;


pub use memory::MemoryGateway;

/// Storage operations the ingestion pipeline depends on.
///
/// Nothing behind this trait is ever updated or deleted by ingestion.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn sensor_exists(&self, sensor_id: &str) -> Result<bool, DBError>;

    /// Creates the sensor unless it already exists.
    async fn create_sensor(&self, sensor_id: &str, defaults: &SensorDefaults)
        -> Result<(), DBError>;

    /// Fails with [`DBError::ForeignKey`] if the sensor does not exist.
    async fn insert_reading(&self, reading: &NewReading) -> Result<(), DBError>;
}

pub async fn establish_db_connection(
    database_url: &str,
    max_connections: u32,
) -> Result<sqlx::PgPool, DBError> {
    Ok(sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?)
}

pub async fn create_schema(conn: &sqlx::PgPool) -> Result<(), DBError> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS sensors (
            sensor_id TEXT PRIMARY KEY,
            location TEXT NOT NULL,
            type TEXT NOT NULL,
            calibration_min DOUBLE PRECISION NOT NULL DEFAULT 0,
            calibration_max DOUBLE PRECISION NOT NULL DEFAULT 100,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(conn)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS moisture_data (
            id BIGSERIAL PRIMARY KEY,
            sensor_id TEXT NOT NULL REFERENCES sensors (sensor_id),
            moisture_value DOUBLE PRECISION NOT NULL,
            temperature DOUBLE PRECISION,
            humidity DOUBLE PRECISION,
            timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(conn)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS moisture_data_sensor_time ON moisture_data (sensor_id, timestamp)",
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// [`PersistenceGateway`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgGateway {
    conn: sqlx::PgPool,
}

impl PgGateway {
    pub fn new(conn: sqlx::PgPool) -> Self {
        PgGateway { conn }
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn sensor_exists(&self, sensor_id: &str) -> Result<bool, DBError> {
        sensor::exists(&self.conn, sensor_id).await
    }

    async fn create_sensor(
        &self,
        sensor_id: &str,
        defaults: &SensorDefaults,
    ) -> Result<(), DBError> {
        sensor::insert_if_absent(&self.conn, sensor_id, defaults).await
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<(), DBError> {
        reading::insert(&self.conn, reading).await
    }
}
