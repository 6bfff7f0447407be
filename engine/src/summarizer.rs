//! Periodic summarizer (component G, spec §4.G). Grounded in
//! `SqlWrapper.c`'s `SQL_summarize_object_location` — G1/G2/G3/G4 below are
//! direct translations of that function's four literal SQL templates
//! (reset, stable-tag join, moving-tag window-function join, weighted
//! centroid), run here under one `sqlx::Transaction` instead of four
//! separately acquired/released connections so the sequence is atomic
//! with respect to concurrent readers.
//!
//! Ordering is load-bearing: G1 must run before G2/G3 read
//! `is_location_updated`, and G3 must only touch rows G2 left untouched.

use sqlx::Connection;
use tracing::{debug, warn};

use crate::db_pool::{Connect, DbPool};
use crate::error::{EngineError, Result};

pub struct SummarizerConfig {
    pub database_pre_filter_time_window_in_sec: i64,
    pub time_interval_in_sec: i64,
    pub rssi_difference_of_location_accuracy_tolerance: i64,
    pub base_location_tolerance_in_millimeter: i64,
}

pub struct Summarizer<C> {
    db: std::sync::Arc<DbPool<C>>,
    config: SummarizerConfig,
}

impl<C> Summarizer<C>
where
    C: Connect,
{
    pub fn new(db: std::sync::Arc<DbPool<C>>, config: SummarizerConfig) -> Self {
        Self { db, config }
    }
}

impl Summarizer<sqlx::PgConnection> {
    /// Runs G1 -> G2 -> G3 -> G4 under one acquired connection's
    /// transaction; any failure rolls back and propagates.
    pub async fn run(&self) -> Result<()> {
        let mut lease = self.db.acquire().await?;
        let mut tx = lease.begin().await.map_err(EngineError::SqlExecute)?;

        self.reset_location_updated_flag(&mut tx).await?;
        self.update_stable_tags(&mut tx).await?;
        self.update_moving_tags(&mut tx).await?;
        self.update_base_coordinates(&mut tx).await?;

        tx.commit().await.map_err(EngineError::SqlExecute)?;
        debug!("summarizer pass complete");
        Ok(())
    }

    async fn reset_location_updated_flag(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<()> {
        sqlx::query("UPDATE object_summary_table SET is_location_updated = 0 WHERE id > 0")
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                warn!(error = %e, "G1 reset failed");
                EngineError::SqlExecute(e)
            })?;
        Ok(())
    }

    /// G2: objects whose current beacon remains the strongest-average-RSSI
    /// beacon within tolerance are "stable" — refresh rssi/battery/last_seen
    /// in place without reassigning `uuid` or `first_seen_timestamp`.
    async fn update_stable_tags(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<()> {
        let window = self.config.database_pre_filter_time_window_in_sec;
        let interval = self.config.time_interval_in_sec;
        let tolerance = self.config.rssi_difference_of_location_accuracy_tolerance;

        sqlx::query(
            "UPDATE object_summary_table \
             SET rssi = stable_table.avg_rssi, \
                 last_seen_timestamp = stable_table.final_timestamp, \
                 battery_voltage = stable_table.battery_voltage, \
                 is_location_updated = 1 \
             FROM ( \
                 SELECT recent_table.mac_address AS mac_address, \
                        recent_table.uuid AS uuid, \
                        recent_table.avg_rssi AS avg_rssi, \
                        recent_table.final_timestamp AS final_timestamp, \
                        recent_table.battery_voltage AS battery_voltage \
                 FROM ( \
                     SELECT object_mac_address AS mac_address, \
                            lbeacon_uuid AS uuid, \
                            ROUND(AVG(rssi), 0) AS avg_rssi, \
                            MAX(final_timestamp) AS final_timestamp, \
                            MIN(battery_voltage) AS battery_voltage \
                     FROM tracking_table \
                     WHERE final_timestamp > NOW() - ($1 || ' seconds')::INTERVAL \
                       AND final_timestamp >= NOW() - (server_time_offset || ' seconds')::INTERVAL \
                                              - ($2 || ' seconds')::INTERVAL \
                     GROUP BY object_mac_address, lbeacon_uuid \
                 ) recent_table \
                 INNER JOIN ( \
                     SELECT * FROM ( \
                         SELECT ROW_NUMBER() OVER ( \
                                    PARTITION BY object_mac_address \
                                    ORDER BY object_mac_address ASC, average_rssi DESC \
                                ) AS rank, \
                                object_beacon_rssi_table.* \
                         FROM ( \
                             SELECT t.object_mac_address AS object_mac_address, \
                                    t.lbeacon_uuid AS lbeacon_uuid, \
                                    ROUND(AVG(rssi), 0) AS average_rssi \
                             FROM tracking_table t \
                             WHERE final_timestamp >= NOW() - ($1 || ' seconds')::INTERVAL \
                               AND final_timestamp >= NOW() - (server_time_offset || ' seconds')::INTERVAL \
                                                      - ($2 || ' seconds')::INTERVAL \
                             GROUP BY t.object_mac_address, t.lbeacon_uuid \
                             HAVING AVG(rssi) > -100 \
                         ) object_beacon_rssi_table \
                     ) object_location_table \
                     WHERE object_location_table.rank <= 1 \
                 ) location_information \
                 ON recent_table.mac_address = location_information.object_mac_address \
                 AND ABS(recent_table.avg_rssi - location_information.average_rssi) < $3 \
             ) stable_table \
             WHERE object_summary_table.mac_address = stable_table.mac_address \
               AND object_summary_table.uuid = stable_table.uuid",
        )
        .bind(window)
        .bind(interval)
        .bind(tolerance)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            warn!(error = %e, "G2 stable-tag update failed");
            EngineError::SqlExecute(e)
        })?;
        Ok(())
    }

    /// G3: for every object G2 left untouched, reassign to the
    /// strongest-average-RSSI beacon. `first_seen_timestamp` only moves
    /// forward when the beacon actually changed (or was never set) so a
    /// tag's dwell start survives repeated hand-offs back to itself.
    async fn update_moving_tags(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<()> {
        let window = self.config.database_pre_filter_time_window_in_sec;
        let interval = self.config.time_interval_in_sec;

        sqlx::query(
            "UPDATE object_summary_table \
             SET first_seen_timestamp = CASE \
                     WHEN first_seen_timestamp IS NULL \
                       OR object_summary_table.uuid != location_information.uuid \
                     THEN location_information.initial_timestamp \
                     ELSE first_seen_timestamp \
                 END, \
                 rssi = location_information.avg_rssi, \
                 battery_voltage = location_information.battery_voltage, \
                 last_seen_timestamp = location_information.final_timestamp, \
                 uuid = location_information.uuid, \
                 is_location_updated = 1 \
             FROM ( \
                 SELECT object_mac_address, uuid, avg_rssi, battery_voltage, \
                        initial_timestamp, final_timestamp \
                 FROM ( \
                     SELECT ROW_NUMBER() OVER ( \
                                PARTITION BY object_mac_address \
                                ORDER BY object_mac_address ASC, avg_rssi DESC \
                            ) AS rank, \
                            object_beacon_rssi_table.* \
                     FROM ( \
                         SELECT t.object_mac_address AS object_mac_address, \
                                t.lbeacon_uuid AS uuid, \
                                ROUND(AVG(rssi), 0) AS avg_rssi, \
                                MIN(battery_voltage) AS battery_voltage, \
                                MIN(initial_timestamp) AS initial_timestamp, \
                                MAX(final_timestamp) AS final_timestamp \
                         FROM tracking_table t \
                         WHERE final_timestamp >= NOW() - ($1 || ' seconds')::INTERVAL \
                           AND final_timestamp >= NOW() - (server_time_offset || ' seconds')::INTERVAL \
                                                  - ($2 || ' seconds')::INTERVAL \
                         GROUP BY t.object_mac_address, t.lbeacon_uuid \
                         HAVING AVG(rssi) > -100 \
                     ) object_beacon_rssi_table \
                 ) object_location_table \
                 WHERE object_location_table.rank <= 1 \
             ) location_information \
             WHERE object_summary_table.mac_address = location_information.object_mac_address \
               AND object_summary_table.is_location_updated = 0",
        )
        .bind(window)
        .bind(interval)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            warn!(error = %e, "G3 moving-tag update failed");
            EngineError::SqlExecute(e)
        })?;
        Ok(())
    }

    /// G4: weighted centroid of recent beacon observations, weights from
    /// `rssi_weight_table`; hysteresis avoids thrashing on tiny deltas.
    async fn update_base_coordinates(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<()> {
        let window = self.config.database_pre_filter_time_window_in_sec;
        let interval = self.config.time_interval_in_sec;
        let tolerance = self.config.base_location_tolerance_in_millimeter;

        sqlx::query(
            "UPDATE object_summary_table \
             SET base_x = tag_new_base.base_x, base_y = tag_new_base.base_y \
             FROM ( \
                 SELECT object_mac_address, \
                        ROUND(SUM(coordinate_x * weight) / SUM(weight), 0) AS base_x, \
                        ROUND(SUM(coordinate_y * weight) / SUM(weight), 0) AS base_y \
                 FROM ( \
                     SELECT object_mac_address, lbeacon_uuid, \
                            ROUND(AVG(rssi), 0) AS average_rssi, \
                            (SELECT weight FROM rssi_weight_table \
                             WHERE AVG(rssi) >= bottom_rssi AND AVG(rssi) < upper_rssi \
                             LIMIT 1) AS weight \
                     FROM tracking_table \
                     WHERE final_timestamp > NOW() - ($1 || ' seconds')::INTERVAL \
                       AND final_timestamp >= NOW() - (server_time_offset || ' seconds')::INTERVAL \
                                              - ($2 || ' seconds')::INTERVAL \
                     GROUP BY object_mac_address, lbeacon_uuid \
                     HAVING AVG(rssi) > -100 \
                 ) beacon_rssi_table \
                 INNER JOIN lbeacon_table \
                 ON beacon_rssi_table.lbeacon_uuid = lbeacon_table.uuid \
                 GROUP BY object_mac_address \
             ) tag_new_base \
             WHERE object_summary_table.mac_address = tag_new_base.object_mac_address \
               AND ( \
                     object_summary_table.base_x IS NULL \
                  OR object_summary_table.base_y IS NULL \
                  OR ABS(object_summary_table.base_x - tag_new_base.base_x) >= $3 \
                  OR ABS(object_summary_table.base_y - tag_new_base.base_y) >= $3 \
               )",
        )
        .bind(window)
        .bind(interval)
        .bind(tolerance)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            warn!(error = %e, "G4 base-coordinate update failed");
            EngineError::SqlExecute(e)
        })?;
        Ok(())
    }
}
