//! Violation identifier (component H, spec §4.H). Grounded in
//! `SqlWrapper.c`'s `SQL_reload_monitor_config` (H1), `SQL_identify_location_not_stay_room`
//! (H2), `SQL_identify_location_long_stay_in_danger` (H3), the movement
//! detector's windowed-delta query (H4), and `SQL_collect_violation_events`
//! (H5).
//!
//! Design Note (spec §9, "Dedup sub-query"): the source's H5 dedup clause
//! reads `WHERE monitor_type = %d AND mac_address = mac_address AND uuid =
//! uuid` — both sides of the MAC/UUID comparisons are the *same* column, a
//! tautology that defeats the dedup entirely. Below the notification
//! subquery is correlated against the outer `object_summary_table` row by
//! alias, which is the fix this spec's Design Notes call for.

use tracing::warn;

use crate::db_pool::{Connect, DbPool};
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::model::MonitorType;

const RULE_TABLES: [&str; 4] = [
    "geo_fence_config",
    "location_not_stay_room_config",
    "location_long_stay_in_danger_config",
    "movement_config",
];

pub struct ViolationConfig {
    pub server_localtime_against_utc_in_hour: i32,
    pub time_interval_in_sec: i64,
    pub granularity_for_continuous_violations_in_sec: i64,
    pub time_interval_in_min: i64,
    pub each_time_slot_in_min: i64,
    pub rssi_delta: i32,
}

pub struct ViolationIdentifier<C> {
    db: std::sync::Arc<DbPool<C>>,
    metrics: std::sync::Arc<EngineMetrics>,
    config: ViolationConfig,
}

impl<C> ViolationIdentifier<C>
where
    C: Connect,
{
    pub fn new(
        db: std::sync::Arc<DbPool<C>>,
        metrics: std::sync::Arc<EngineMetrics>,
        config: ViolationConfig,
    ) -> Self {
        Self { db, metrics, config }
    }
}

impl ViolationIdentifier<sqlx::PgConnection> {
    /// H1: reloads `is_active` on every rule table against the current
    /// wall clock, handling the midnight-wraparound window split.
    pub async fn reload_active_rules(&self) -> Result<()> {
        let offset = self.config.server_localtime_against_utc_in_hour;
        let mut lease = self.db.acquire().await?;
        for table in RULE_TABLES {
            let sql = format!(
                "UPDATE {table} \
                 SET is_active = CASE \
                     WHEN enable = 1 AND start_time < end_time \
                          AND CURRENT_TIME + INTERVAL '{offset} hours' >= start_time \
                          AND CURRENT_TIME + INTERVAL '{offset} hours' < end_time \
                     THEN 1 \
                     WHEN enable = 1 AND start_time > end_time \
                          AND ( \
                              (CURRENT_TIME + INTERVAL '{offset} hours' >= start_time \
                               AND CURRENT_TIME + INTERVAL '{offset} hours' <= '23:59:59') \
                              OR \
                              (CURRENT_TIME + INTERVAL '{offset} hours' >= '00:00:00' \
                               AND CURRENT_TIME + INTERVAL '{offset} hours' < end_time) \
                          ) \
                     THEN 1 \
                     ELSE 0 \
                 END"
            );
            if let Err(e) = sqlx::query(&sql).execute(&mut *lease).await {
                warn!(error = %e, table, "H1 rule reload failed for table, continuing");
            }
        }
        Ok(())
    }

    /// H2: wrong-room location violation.
    pub async fn identify_wrong_room(&self) -> Result<()> {
        let mut lease = self.db.acquire().await?;
        sqlx::query(
            "UPDATE object_summary_table \
             SET location_violation_timestamp = NOW() \
             FROM ( \
                 SELECT object_summary_table.mac_address AS mac_address \
                 FROM object_summary_table \
                 INNER JOIN object_table \
                     ON object_summary_table.mac_address = object_table.mac_address \
                 INNER JOIN lbeacon_table \
                     ON object_summary_table.uuid = lbeacon_table.uuid \
                 INNER JOIN location_not_stay_room_config \
                     ON object_table.area_id = location_not_stay_room_config.area_id \
                 WHERE location_not_stay_room_config.is_active = 1 \
                   AND (object_table.monitor_type & $1) = $1 \
                   AND lbeacon_table.room <> object_table.room \
             ) location_information \
             WHERE object_summary_table.mac_address = location_information.mac_address",
        )
        .bind(MonitorType::LOCATION.bits())
        .execute(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)
        .map(|res| self.metrics.record_violations(MonitorType::LOCATION, res.rows_affected()))?;
        Ok(())
    }

    /// H3: prolonged stay in a danger area.
    pub async fn identify_long_stay_in_danger(&self) -> Result<()> {
        let mut lease = self.db.acquire().await?;
        sqlx::query(
            "UPDATE object_summary_table \
             SET location_violation_timestamp = NOW() \
             FROM ( \
                 SELECT object_summary_table.mac_address AS mac_address \
                 FROM object_summary_table \
                 INNER JOIN object_table \
                     ON object_summary_table.mac_address = object_table.mac_address \
                 INNER JOIN lbeacon_table \
                     ON object_summary_table.uuid = lbeacon_table.uuid \
                 INNER JOIN location_long_stay_in_danger_config \
                     ON object_table.area_id = location_long_stay_in_danger_config.area_id \
                 WHERE location_long_stay_in_danger_config.is_active = 1 \
                   AND (object_table.monitor_type & $1) = $1 \
                   AND object_table.danger_area \
                   AND EXTRACT(EPOCH FROM ( \
                           object_summary_table.last_seen_timestamp \
                           - object_summary_table.first_seen_timestamp \
                       )) > location_long_stay_in_danger_config.stay_duration_minutes * 60 \
             ) location_information \
             WHERE object_summary_table.mac_address = location_information.mac_address",
        )
        .bind(MonitorType::LOCATION.bits())
        .execute(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)
        .map(|res| self.metrics.record_violations(MonitorType::LOCATION, res.rows_affected()))?;
        Ok(())
    }

    /// H4: time-bucketed RSSI deltas at the object's current beacon. No
    /// slot-to-slot delta exceeding `rssi_delta` means the object is static.
    pub async fn identify_no_movement(&self) -> Result<()> {
        let interval_min = self.config.time_interval_in_min;
        let slot_min = self.config.each_time_slot_in_min;
        let delta = self.config.rssi_delta;
        let mut lease = self.db.acquire().await?;
        sqlx::query(
            "UPDATE object_summary_table \
             SET movement_violation_timestamp = NOW() \
             FROM ( \
                 SELECT slot_table.object_mac_address AS mac_address \
                 FROM ( \
                     SELECT t.object_mac_address, \
                            TIME_BUCKET(($2 || ' minutes')::INTERVAL, t.final_timestamp) AS slot, \
                            ROUND(AVG(t.rssi), 0) AS slot_avg_rssi \
                     FROM tracking_table t \
                     INNER JOIN object_summary_table os \
                         ON t.object_mac_address = os.mac_address AND t.lbeacon_uuid = os.uuid \
                     INNER JOIN object_table ot ON ot.mac_address = os.mac_address \
                     WHERE t.final_timestamp >= NOW() - ($1 || ' minutes')::INTERVAL \
                       AND (ot.monitor_type & $3) = $3 \
                     GROUP BY t.object_mac_address, slot \
                 ) slot_table \
                 GROUP BY slot_table.object_mac_address \
                 HAVING MAX(ABS(slot_table.slot_avg_rssi \
                                - LAG(slot_table.slot_avg_rssi) OVER ( \
                                      PARTITION BY slot_table.object_mac_address \
                                      ORDER BY slot_table.slot \
                                  ))) IS NULL \
                     OR MAX(ABS(slot_table.slot_avg_rssi \
                                - LAG(slot_table.slot_avg_rssi) OVER ( \
                                      PARTITION BY slot_table.object_mac_address \
                                      ORDER BY slot_table.slot \
                                  ))) <= $4 \
             ) stationary \
             WHERE object_summary_table.mac_address = stationary.mac_address",
        )
        .bind(interval_min)
        .bind(slot_min)
        .bind(MonitorType::MOVEMENT.bits())
        .bind(delta)
        .execute(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)
        .map(|res| self.metrics.record_violations(MonitorType::MOVEMENT, res.rows_affected()))?;
        Ok(())
    }

    /// H5: materializes one notification per qualifying `(mac, uuid,
    /// violation_ts)`, deduped against a prior notification of the same
    /// `(monitor_type, mac, uuid)` within the dedup window.
    pub async fn materialize_notifications(&self) -> Result<()> {
        let time_interval = self.config.time_interval_in_sec;
        let dedup_window = self.config.granularity_for_continuous_violations_in_sec;

        for (monitor_type, column) in [
            (MonitorType::GEO_FENCE, "geofence_violation_timestamp"),
            (MonitorType::PANIC, "panic_violation_timestamp"),
            (MonitorType::MOVEMENT, "movement_violation_timestamp"),
            (MonitorType::LOCATION, "location_violation_timestamp"),
        ] {
            let mut lease = self.db.acquire().await?;

            let candidate_sql = format!(
                "SELECT COUNT(*) FROM object_summary_table os \
                 WHERE os.{column} >= NOW() - ($1 || ' seconds')::INTERVAL"
            );
            let candidates: i64 = match sqlx::query_scalar(&candidate_sql)
                .bind(time_interval)
                .fetch_one(&mut *lease)
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, monitor_type = monitor_type.bits(), "H5 candidate count failed");
                    return Err(EngineError::SqlExecute(e));
                }
            };

            let sql = format!(
                "INSERT INTO notification_table \
                     (monitor_type, mac_address, uuid, violation_timestamp, processed) \
                 SELECT $1, os.mac_address, os.uuid, os.{column}, 0 \
                 FROM object_summary_table os \
                 WHERE os.{column} >= NOW() - ($2 || ' seconds')::INTERVAL \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM notification_table nt \
                       WHERE nt.monitor_type = $1 \
                         AND nt.mac_address = os.mac_address \
                         AND nt.uuid = os.uuid \
                         AND EXTRACT(EPOCH FROM (os.{column} - nt.violation_timestamp)) < $3 \
                   )"
            );
            match sqlx::query(&sql)
                .bind(monitor_type.bits())
                .bind(time_interval)
                .bind(dedup_window)
                .execute(&mut *lease)
                .await
            {
                Ok(res) => {
                    let inserted = res.rows_affected();
                    let deduped = (candidates as u64).saturating_sub(inserted);
                    self.metrics.record_notifications(inserted, deduped);
                }
                Err(e) => {
                    warn!(error = %e, monitor_type = monitor_type.bits(), "H5 materialization failed");
                    return Err(EngineError::SqlExecute(e));
                }
            }
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<()> {
        self.reload_active_rules().await?;
        self.identify_wrong_room().await?;
        self.identify_long_stay_in_danger().await?;
        self.identify_no_movement().await?;
        self.materialize_notifications().await?;
        Ok(())
    }
}
