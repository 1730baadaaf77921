use crate::error::DBError;
use soilsense_core::SensorDefaults;

pub async fn exists(conn: &sqlx::PgPool, sensor_id: &str) -> Result<bool, DBError> {
    Ok(
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM sensors WHERE sensor_id = $1)")
            .bind(sensor_id)
            .fetch_one(conn)
            .await?,
    )
}

/// Concurrent duplicates are absorbed by the primary key.
pub async fn insert_if_absent(
    conn: &sqlx::PgPool,
    sensor_id: &str,
    defaults: &SensorDefaults,
) -> Result<(), DBError> {
    sqlx::query(
        r#"INSERT INTO sensors (sensor_id, location, type, calibration_min, calibration_max, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sensor_id) DO NOTHING"#,
    )
    .bind(sensor_id)
    .bind(&defaults.location)
    .bind(&defaults.sensor_type)
    .bind(defaults.calibration_min)
    .bind(defaults.calibration_max)
    .bind(defaults.status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}
