//! Entry point. Grounded in the teacher's `main.rs` shutdown/listener
//! wiring and `Geo-Fencing.c`'s `geo_fence_initial`/`geo_fence_free`
//! lifecycle (construct pools -> spawn receiver -> spawn periodic G/H/I
//! jobs -> spawn observability server -> wait for signal -> drain).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use beacon_sentry::config::Config;
use beacon_sentry::db_pool::DbPool;
use beacon_sentry::geofence::{GeoFenceEvaluator, GeoFenceLoader};
use beacon_sentry::mem_pool::Pool;
use beacon_sentry::metrics::EngineMetrics;
use beacon_sentry::observability::{self, ObservabilityState};
use beacon_sentry::persister::Persister;
use beacon_sentry::protocol::parse_envelope;
use beacon_sentry::receiver::{PacketContent, Receiver};
use beacon_sentry::retention::Retention;
use beacon_sentry::summarizer::{Summarizer, SummarizerConfig};
use beacon_sentry::violations::{ViolationConfig, ViolationIdentifier};
use beacon_sentry::worker_pool::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "beacon_sentry=info,tower_http=info".into()),
        )
        .json()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "beacon-sentry starting");

    let running = Arc::new(AtomicBool::new(true));

    let db_pool = Arc::new(
        DbPool::<sqlx::PgConnection>::connect(&config.database_url, config.db_pool_size).await?,
    );
    let packet_pool = Arc::new(Pool::<PacketContent>::new(config.mem_pool_slots));
    let workers = Arc::new(WorkerPool::new(
        config.number_worker_threads,
        config.worker_queue_depth,
    ));

    let geofence = Arc::new(GeoFenceEvaluator::new(
        config.decision_threshold,
        config.geofence_dwell_window,
        16,
    ));
    let geofence_loader = GeoFenceLoader::new(db_pool.clone(), geofence.clone());
    if let Err(e) = geofence_loader.run().await {
        error!(error = %e, "initial geo-fence load failed, starting with empty fence state");
    }

    let metrics = Arc::new(EngineMetrics::new());

    let persister = Arc::new(Persister::new(
        db_pool.clone(),
        geofence.clone(),
        metrics.clone(),
        config.is_enabled_panic_monitoring,
    ));

    let receiver = Receiver::bind(
        config.recv_addr,
        packet_pool.clone(),
        workers.clone(),
        running.clone(),
    )
    .await?;

    let receiver_task = {
        let persister = persister.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            receiver
                .run(move |packet: PacketContent| {
                    let persister = persister.clone();
                    let metrics = metrics.clone();
                    async move {
                        metrics.record_packet();
                        let envelope = match parse_envelope(&packet.payload) {
                            Ok(e) => e,
                            Err(e) => {
                                metrics.record_parse_failure();
                                tracing::debug!(error = %e, sender = ?packet.sender, "dropping malformed datagram");
                                return;
                            }
                        };
                        if let Err(e) = persister.persist(envelope).await {
                            error!(error = %e, sender = ?packet.sender, "failed to persist report");
                        }
                    }
                })
                .await;
        })
    };

    let summarizer = Summarizer::new(
        db_pool.clone(),
        SummarizerConfig {
            database_pre_filter_time_window_in_sec: config.database_pre_filter_time_window_in_sec,
            time_interval_in_sec: config.time_interval_in_sec,
            rssi_difference_of_location_accuracy_tolerance: config
                .rssi_difference_of_location_accuracy_tolerance
                as i64,
            base_location_tolerance_in_millimeter: config.base_location_tolerance_in_millimeter
                as i64,
        },
    );
    let summarizer_task = {
        let running = running.clone();
        let interval = config.summarizer_interval;
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if let Err(e) = summarizer.run().await {
                    error!(error = %e, "summarizer pass failed");
                }
            }
        })
    };

    let violations = ViolationIdentifier::new(
        db_pool.clone(),
        metrics.clone(),
        ViolationConfig {
            server_localtime_against_utc_in_hour: config.server_localtime_against_utc_in_hour as i32,
            time_interval_in_sec: config.time_interval_in_sec,
            granularity_for_continuous_violations_in_sec: config
                .granularity_for_continuous_violations_in_sec,
            time_interval_in_min: config.time_interval_in_min,
            each_time_slot_in_min: config.each_time_slot_in_min,
            rssi_delta: config.rssi_delta,
        },
    );
    let violations_task = {
        let running = running.clone();
        let interval = config.violation_interval;
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if let Err(e) = violations.run().await {
                    error!(error = %e, "violation identifier pass failed");
                }
            }
        })
    };

    // Same cadence as H1 (`violations.run()`'s rule-table reload) since both
    // re-derive in-memory/SQL state from the same `geo_fence_config` /
    // `object_table` rows.
    let geofence_reload_task = {
        let running = running.clone();
        let interval = config.violation_interval;
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if let Err(e) = geofence_loader.run().await {
                    error!(error = %e, "geo-fence reload pass failed");
                }
            }
        })
    };

    let retention = Retention::new(db_pool.clone(), config.retention_hours);
    let retention_task = {
        let running = running.clone();
        let interval = config.retention_interval;
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if let Err(e) = retention.run().await {
                    error!(error = %e, "retention pass failed");
                }
            }
        })
    };

    let observability_state = ObservabilityState {
        db_pool_size: db_pool.size(),
        db_in_use: {
            let db_pool = db_pool.clone();
            Arc::new(move || db_pool.in_use())
        },
        workers: workers.clone(),
        mem_pool_in_use: {
            let packet_pool = packet_pool.clone();
            Arc::new(move || packet_pool.in_use())
        },
        mem_pool_capacity: packet_pool.capacity(),
        metrics: metrics.clone(),
    };
    let observability_app = observability::router(observability_state);
    let observability_listener = tokio::net::TcpListener::bind(config.observability_addr).await?;
    info!(addr = %config.observability_addr, "observability endpoints listening");
    let observability_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(observability_listener, observability_app)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await
        {
            error!(error = %e, "observability server failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    running.store(false, Ordering::SeqCst);

    // Brief grace period for in-flight work, matching `geo_fence_free`'s
    // `Sleep(WAITING_TIME)` before the UDP socket and pools are torn down.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    receiver_task.abort();
    summarizer_task.abort();
    violations_task.abort();
    geofence_reload_task.abort();
    retention_task.abort();
    observability_task.abort();

    info!("beacon-sentry stopped");
    Ok(())
}
