use crate::error::DBError;
use soilsense_core::NewReading;

pub async fn insert(conn: &sqlx::PgPool, reading: &NewReading) -> Result<(), DBError> {
    sqlx::query(
        r#"INSERT INTO moisture_data (sensor_id, moisture_value, temperature, humidity, timestamp)
            VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(&reading.sensor_id)
    .bind(reading.moisture_value)
    .bind(reading.temperature)
    .bind(reading.humidity)
    .bind(reading.timestamp)
    .execute(conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_foreign_key_violation() {
                return DBError::ForeignKey(reading.sensor_id.clone());
            }
        }
        DBError::SQLError(e)
    })?;
    Ok(())
}
