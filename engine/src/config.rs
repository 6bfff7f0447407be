//! Process-wide configuration, loaded once at start-up from the environment
//! (optionally seeded by a `.env` file via `dotenvy`). This is deliberately a
//! flat struct with one `from_env()` constructor rather than a generic
//! config-loading framework — the spec treats "process-wide configuration
//! loader" as an external collaborator; we still need *some* concrete values.

use std::net::SocketAddr;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string, the DB pool's (component A) sole input.
    pub database_url: String,
    /// Size of the fixed DB connection pool.
    pub db_pool_size: usize,
    /// `SLOTS_IN_MEM_POOL` — capacity of each memory pool (component B).
    pub mem_pool_slots: usize,
    /// Worker pool size (`number_worker_threads`).
    pub number_worker_threads: usize,
    /// Depth of the bounded submit queue feeding the worker pool.
    pub worker_queue_depth: usize,
    /// UDP port the packet receiver binds (`recv_port` / `api_recv_port`
    /// collapsed to one port — this engine only exposes one ingest port).
    pub recv_addr: SocketAddr,
    /// HTTP port for the observability surface (component J).
    pub observability_addr: SocketAddr,
    /// dBm threshold above which an RSSI sample counts as "inside" a fence.
    pub decision_threshold: i32,
    /// Dwell window for a (MAC,UUID) pair's rolling RSSI state before GC.
    pub geofence_dwell_window: Duration,
    /// Age cutoff for tracking rows & notifications.
    pub retention_hours: i64,
    /// Summarizer windows.
    pub database_pre_filter_time_window_in_sec: i64,
    pub time_interval_in_sec: i64,
    pub rssi_difference_of_location_accuracy_tolerance: i32,
    pub base_location_tolerance_in_millimeter: i32,
    /// Movement detector.
    pub time_interval_in_min: i64,
    pub each_time_slot_in_min: i64,
    pub rssi_delta: i32,
    /// Dedup window shared by every monitor type's H5 materialization.
    pub granularity_for_continuous_violations_in_sec: i64,
    /// Hour offset applied when evaluating rule-table activation windows.
    pub server_localtime_against_utc_in_hour: i64,
    pub is_enabled_panic_monitoring: bool,
    /// Cadence of the three periodic control-loop jobs.
    pub summarizer_interval: Duration,
    pub violation_interval: Duration,
    pub retention_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let recv_addr: SocketAddr = std::env::var("RECV_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8888".to_string())
            .parse()?;
        let observability_addr: SocketAddr = std::env::var("OBSERVABILITY_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/beacon_sentry".to_string()),
            db_pool_size: env_or("DB_POOL_SIZE", 16),
            mem_pool_slots: env_or("MEM_POOL_SLOTS", 4096),
            number_worker_threads: env_or("NUMBER_WORKER_THREADS", 8),
            worker_queue_depth: env_or("WORKER_QUEUE_DEPTH", 4096),
            recv_addr,
            observability_addr,
            decision_threshold: env_or("DECISION_THRESHOLD", -70),
            geofence_dwell_window: Duration::from_secs(env_or("GEOFENCE_DWELL_WINDOW_SEC", 30)),
            retention_hours: env_or("RETENTION_HOURS", 72),
            database_pre_filter_time_window_in_sec: env_or(
                "DATABASE_PRE_FILTER_TIME_WINDOW_IN_SEC",
                60,
            ),
            time_interval_in_sec: env_or("TIME_INTERVAL_IN_SEC", 300),
            rssi_difference_of_location_accuracy_tolerance: env_or(
                "RSSI_DIFFERENCE_OF_LOCATION_ACCURACY_TOLERANCE",
                5,
            ),
            base_location_tolerance_in_millimeter: env_or(
                "BASE_LOCATION_TOLERANCE_IN_MILLIMETER",
                300,
            ),
            time_interval_in_min: env_or("TIME_INTERVAL_IN_MIN", 30),
            each_time_slot_in_min: env_or("EACH_TIME_SLOT_IN_MIN", 5),
            rssi_delta: env_or("RSSI_DELTA", 8),
            granularity_for_continuous_violations_in_sec: env_or(
                "GRANULARITY_FOR_CONTINUOUS_VIOLATIONS_IN_SEC",
                60,
            ),
            server_localtime_against_utc_in_hour: env_or(
                "SERVER_LOCALTIME_AGAINST_UTC_IN_HOUR",
                0,
            ),
            is_enabled_panic_monitoring: env_or("IS_ENABLED_PANIC_MONITORING", true),
            summarizer_interval: Duration::from_secs(env_or("SUMMARIZER_INTERVAL_SEC", 10)),
            violation_interval: Duration::from_secs(env_or("VIOLATION_INTERVAL_SEC", 15)),
            retention_interval: Duration::from_secs(env_or("RETENTION_INTERVAL_SEC", 3600)),
        })
    }
}
