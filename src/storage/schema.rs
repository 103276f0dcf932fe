//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Weather logs table schema.
#[derive(Iden)]
pub enum WeatherLogs {
    Table,
    #[iden = "station_id"]
    StationId,
    #[iden = "timestamp"]
    Timestamp,
    #[iden = "temperature"]
    Temperature,
    #[iden = "humidity"]
    Humidity,
    #[iden = "pressure"]
    Pressure,
    #[iden = "status"]
    Status,
    #[iden = "error_message"]
    ErrorMessage,
    #[iden = "raw_payload"]
    RawPayload,
}

/// SQL for creating the weather logs table.
///
/// The `status`/`error_message` check mirrors the row invariant enforced by
/// `PersistedLog`.
pub const CREATE_WEATHER_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS weather_logs (
    id BIGSERIAL PRIMARY KEY,
    station_id TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    temperature DOUBLE PRECISION,
    humidity DOUBLE PRECISION,
    pressure DOUBLE PRECISION,
    status TEXT NOT NULL CHECK (status IN ('ok', 'error')),
    error_message TEXT,
    raw_payload JSONB NOT NULL,
    received_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CHECK ((status = 'error') = (error_message IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_weather_logs_station_ts ON weather_logs(station_id, timestamp);
"#;
