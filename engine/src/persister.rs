//! Ingestion persister (component F, spec §4.F). Grounded in
//! `SqlWrapper.c`'s `SQL_update_gateway_registration_status` /
//! `SQL_update_lbeacon_registration_status` (registration upserts),
//! the corresponding `_health` updates, and the tracking bulk-COPY path
//! around line 813 of that file.
//!
//! Design Note (spec §9, "Temp-file bulk-load"): rather than writing
//! `<install>/temp/track_<thread_id>` and issuing `COPY ... FROM '<path>'`,
//! we stream rows directly into Postgres with `PgConnection::copy_in_raw`
//! over one acquired connection — functionally equivalent, no shared
//! filesystem assumption between engine and database.

use std::fmt::Write as _;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::db_pool::{Connect, DbPool};
use crate::error::{EngineError, Result};
use crate::geofence::{Evaluation, GeoFenceEvaluator};
use crate::metrics::EngineMetrics;
use crate::model::MonitorType;
use crate::protocol::{
    BeaconHealth, BeaconRegistration, Envelope, GatewayHealth, GatewayRegistration, TrackingReport,
};
use crate::uuidcoord::extract_coordinates;

pub struct Persister<C> {
    db: std::sync::Arc<DbPool<C>>,
    geofence: std::sync::Arc<GeoFenceEvaluator>,
    metrics: std::sync::Arc<EngineMetrics>,
    panic_monitoring_enabled: bool,
}

impl<C> Persister<C>
where
    C: Connect,
{
    pub fn new(
        db: std::sync::Arc<DbPool<C>>,
        geofence: std::sync::Arc<GeoFenceEvaluator>,
        metrics: std::sync::Arc<EngineMetrics>,
        panic_monitoring_enabled: bool,
    ) -> Self {
        Self {
            db,
            geofence,
            metrics,
            panic_monitoring_enabled,
        }
    }
}

impl Persister<sqlx::PgConnection> {
    pub async fn persist(&self, envelope: Envelope) -> Result<()> {
        match envelope {
            Envelope::GatewayRegistration(r) => self.persist_gateway_registration(r).await,
            Envelope::GatewayHealth(r) => self.persist_gateway_health(r).await,
            Envelope::BeaconRegistration(r) => self.persist_beacon_registration(r).await,
            Envelope::BeaconHealth(r) => self.persist_beacon_health(r).await,
            Envelope::Tracking(r) => self.persist_tracking(r).await,
        }
    }

    async fn persist_gateway_registration(&self, reg: GatewayRegistration) -> Result<()> {
        let mut lease = self.db.acquire().await?;
        for ip in &reg.ips {
            let res = sqlx::query(
                "INSERT INTO gateway_table \
                 (ip_address, health_status, registered_timestamp, last_report_timestamp) \
                 VALUES ($1, 0, NOW(), NOW()) \
                 ON CONFLICT (ip_address) \
                 DO UPDATE SET health_status = 0, last_report_timestamp = NOW()",
            )
            .bind(ip)
            .execute(&mut *lease)
            .await;
            if let Err(e) = res {
                warn!(error = %e, ip = %ip, "gateway registration upsert failed");
                return Err(EngineError::SqlExecute(e));
            }
        }
        Ok(())
    }

    async fn persist_gateway_health(&self, h: GatewayHealth) -> Result<()> {
        let mut lease = self.db.acquire().await?;
        sqlx::query(
            "UPDATE gateway_table SET health_status = $1, last_report_timestamp = NOW() \
             WHERE ip_address = $2",
        )
        .bind(h.health_status)
        .bind(&h.ip)
        .execute(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)?;
        Ok(())
    }

    async fn persist_beacon_registration(&self, reg: BeaconRegistration) -> Result<()> {
        let mut lease = self.db.acquire().await?;
        for rec in &reg.records {
            let (x, y) = extract_coordinates(&rec.uuid)?;
            let registered_ts = Utc
                .timestamp_opt(rec.registered_timestamp, 0)
                .single()
                .ok_or_else(|| {
                    EngineError::SqlParse(format!(
                        "invalid registered_timestamp: {}",
                        rec.registered_timestamp
                    ))
                })?;
            let res = sqlx::query(
                "INSERT INTO lbeacon_table \
                 (uuid, ip_address, health_status, gateway_ip_address, \
                  registered_timestamp, last_report_timestamp, coordinate_x, coordinate_y) \
                 VALUES ($1, $2, 0, $3, $4, NOW(), $5, $6) \
                 ON CONFLICT (uuid) \
                 DO UPDATE SET ip_address = $2, health_status = 0, \
                 gateway_ip_address = $3, last_report_timestamp = NOW(), \
                 coordinate_x = $5, coordinate_y = $6",
            )
            .bind(&rec.uuid)
            .bind(&rec.lbeacon_ip)
            .bind(&reg.gateway_ip)
            .bind(registered_ts)
            .bind(x)
            .bind(y)
            .execute(&mut *lease)
            .await;
            if let Err(e) = res {
                warn!(error = %e, uuid = %rec.uuid, "beacon registration upsert failed");
                return Err(EngineError::SqlExecute(e));
            }
        }
        Ok(())
    }

    async fn persist_beacon_health(&self, h: BeaconHealth) -> Result<()> {
        let mut lease = self.db.acquire().await?;
        sqlx::query(
            "UPDATE lbeacon_table SET health_status = $1, gateway_ip_address = $2, \
             last_report_timestamp = NOW() WHERE uuid = $3",
        )
        .bind(h.health_status)
        .bind(&h.gateway_ip)
        .bind(&h.uuid)
        .execute(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)?;
        Ok(())
    }

    /// Bulk tracking path: streams rows as CSV into Postgres via
    /// `COPY tracking_table FROM STDIN`, stamping the inline panic
    /// violation per sub-record along the way (spec §4.F step 2).
    async fn persist_tracking(&self, report: TrackingReport) -> Result<()> {
        if report.records.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut lease = self.db.acquire().await?;

        let mut csv = String::new();
        for rec in &report.records {
            let init_ts = epoch_to_utc(rec.initial_timestamp)?;
            let final_ts = epoch_to_utc(rec.final_timestamp)?;
            let server_time_offset = now.timestamp() - rec.final_timestamp;

            writeln!(
                csv,
                "{},{},{},{},{},{},{},{}",
                rec.mac_address,
                report.beacon_uuid,
                rec.rssi,
                rec.panic as i32,
                rec.battery_mv,
                init_ts.format("%Y-%m-%d %H:%M:%S"),
                final_ts.format("%Y-%m-%d %H:%M:%S"),
                server_time_offset,
            )
            .expect("writing to an in-memory String cannot fail");

            if rec.panic && self.panic_monitoring_enabled {
                match sqlx::query(
                    "UPDATE object_summary_table SET panic_violation_timestamp = NOW() \
                     WHERE mac_address = $1 AND (monitor_type & 2) != 0",
                )
                .bind(&rec.mac_address)
                .execute(&mut *lease)
                .await
                {
                    Ok(res) if res.rows_affected() > 0 => {
                        self.metrics.record_violation(MonitorType::PANIC);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, mac = %rec.mac_address, "panic stamp failed"),
                }
            }

            if let Evaluation::Violation { mac, .. } =
                self.geofence
                    .evaluate(&rec.mac_address, &report.beacon_uuid, rec.rssi)
            {
                match sqlx::query(
                    "UPDATE object_summary_table SET geofence_violation_timestamp = NOW() \
                     WHERE mac_address = $1",
                )
                .bind(&mac)
                .execute(&mut *lease)
                .await
                {
                    Ok(res) if res.rows_affected() > 0 => {
                        self.metrics.record_violation(MonitorType::GEO_FENCE);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, mac = %mac, "geofence stamp failed"),
                }
            }
        }

        let mut copy = lease
            .copy_in_raw(
                "COPY tracking_table \
                 (object_mac_address, lbeacon_uuid, rssi, panic_flag, battery_voltage, \
                  initial_timestamp, final_timestamp, server_time_offset) \
                 FROM STDIN WITH (FORMAT csv)",
            )
            .await
            .map_err(EngineError::SqlExecute)?;
        copy.send(csv.as_bytes())
            .await
            .map_err(EngineError::SqlExecute)?;
        copy.finish().await.map_err(EngineError::SqlExecute)?;

        debug!(rows = report.records.len(), uuid = %report.beacon_uuid, "tracking batch persisted");
        Ok(())
    }
}

fn epoch_to_utc(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| EngineError::SqlParse(format!("invalid unix timestamp: {secs}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_conversion_round_trips() {
        let dt = epoch_to_utc(1_700_000_000).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }

    #[test]
    fn epoch_conversion_rejects_absurd_values() {
        assert!(epoch_to_utc(i64::MAX).is_err());
    }
}
