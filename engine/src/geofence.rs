//! In-memory geo-fence evaluator (component E, spec §4.E). Grounded in
//! `Geo-Fencing.c`'s `process_geo_fence_routine` — that function's
//! filtering/state-update body is left empty in the original (the spec's
//! Design Note at §9 calls this out explicitly and directs the implementer
//! to treat §4.E's prose as the contract). `fences_by_uuid` replaces the
//! original's `is_in_geo_fence` lookup, `monitored_by_area` replaces
//! `is_mac_in_geo_fence`, and the per-(MAC, UUID) RSSI window replaces the
//! unfinished `tracked_mac_list_head`/`rssi_list_node` linked lists with a
//! `DashMap` of `Vec<i32>` — same shape, lock-free concurrent reads.
//!
//! Dedup of repeated violations within `granularity_for_continuous_violations_in_sec`
//! is enforced downstream (component H); this evaluator only guards against
//! invoking the stamp more than once per dwell window per (MAC, UUID).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::db_pool::{Connect, DbPool};
use crate::error::{EngineError, Result};
use crate::model::MonitorType;

#[derive(Debug, Clone)]
pub struct FenceDefinition {
    pub area_id: i32,
    pub id: i32,
    pub name: String,
}

#[derive(Default)]
struct MacState {
    /// Recent RSSI samples per beacon UUID this MAC has been seen at.
    windows: HashMap<String, Vec<i32>>,
    /// Instant of the last stamp invocation per UUID, to enforce the dwell
    /// window without re-stamping every qualifying sample.
    last_stamped: HashMap<String, Instant>,
}

pub struct GeoFenceEvaluator {
    fences_by_uuid: DashMap<String, FenceDefinition>,
    monitored_by_area: DashMap<i32, HashSet<String>>,
    mac_state: DashMap<String, MacState>,
    decision_threshold: i32,
    dwell_window: Duration,
    rssi_window_len: usize,
}

pub enum Evaluation {
    /// Not a fence beacon, or the MAC isn't monitored here — ignored.
    Irrelevant,
    /// RSSI below threshold, or within an already-stamped dwell window.
    NoViolation,
    /// First qualifying sighting in this dwell window — caller should
    /// invoke `SQL_identify_geofence_violation` equivalent persistence.
    Violation { mac: String, uuid: String },
}

impl GeoFenceEvaluator {
    pub fn new(decision_threshold: i32, dwell_window: Duration, rssi_window_len: usize) -> Self {
        Self {
            fences_by_uuid: DashMap::new(),
            monitored_by_area: DashMap::new(),
            mac_state: DashMap::new(),
            decision_threshold,
            dwell_window,
            rssi_window_len,
        }
    }

    /// Replaces both maps wholesale and GCs any tracked MAC no longer in
    /// the monitored set, per spec §4.E ("GC'd on reload").
    pub fn reload(&self, fences: Vec<(String, FenceDefinition)>, monitored: HashMap<i32, HashSet<String>>) {
        self.fences_by_uuid.clear();
        for (uuid, def) in fences {
            self.fences_by_uuid.insert(uuid, def);
        }

        let still_monitored: HashSet<String> = monitored.values().flatten().cloned().collect();
        self.monitored_by_area.clear();
        for (area_id, macs) in monitored {
            self.monitored_by_area.insert(area_id, macs);
        }

        self.mac_state.retain(|mac, _| still_monitored.contains(mac));
    }

    pub fn evaluate(&self, mac: &str, uuid: &str, rssi: i32) -> Evaluation {
        let fence = match self.fences_by_uuid.get(uuid) {
            Some(f) => f.clone(),
            None => return Evaluation::Irrelevant,
        };

        let is_monitored = self
            .monitored_by_area
            .get(&fence.area_id)
            .map(|macs| macs.contains(mac))
            .unwrap_or(false);
        if !is_monitored {
            return Evaluation::Irrelevant;
        }

        let mut entry = self.mac_state.entry(mac.to_string()).or_default();
        let window = entry.windows.entry(uuid.to_string()).or_default();
        window.push(rssi);
        if window.len() > self.rssi_window_len {
            let excess = window.len() - self.rssi_window_len;
            window.drain(0..excess);
        }

        if rssi < self.decision_threshold {
            return Evaluation::NoViolation;
        }

        let now = Instant::now();
        let should_stamp = match entry.last_stamped.get(uuid) {
            Some(last) => now.duration_since(*last) >= self.dwell_window,
            None => true,
        };
        if !should_stamp {
            return Evaluation::NoViolation;
        }
        entry.last_stamped.insert(uuid.to_string(), now);

        Evaluation::Violation {
            mac: mac.to_string(),
            uuid: uuid.to_string(),
        }
    }

    pub fn tracked_mac_count(&self) -> usize {
        self.mac_state.len()
    }
}

/// Periodically repopulates a `GeoFenceEvaluator` from the database, the
/// in-process equivalent of `SqlWrapper.c`'s `SQL_dump_active_geo_fence_settings`
/// (active `geo_fence_config` rows, joined to the lbeacon covering each area)
/// and `SQL_dump_mac_address_under_geo_fence_monitor` (`object_table` MACs
/// with the `GEO_FENCE` monitor bit set, grouped by area). Without this, the
/// evaluator's maps never leave the empty state `main.rs` seeds them with at
/// start-up and every sighting falls through as `Evaluation::Irrelevant`.
pub struct GeoFenceLoader<C> {
    db: Arc<DbPool<C>>,
    evaluator: Arc<GeoFenceEvaluator>,
}

impl<C> GeoFenceLoader<C>
where
    C: Connect,
{
    pub fn new(db: Arc<DbPool<C>>, evaluator: Arc<GeoFenceEvaluator>) -> Self {
        Self { db, evaluator }
    }
}

impl GeoFenceLoader<sqlx::PgConnection> {
    pub async fn run(&self) -> Result<()> {
        let mut lease = self.db.acquire().await?;

        let fence_rows: Vec<(String, i32, i32, String)> = sqlx::query_as(
            "SELECT lbeacon_table.uuid, geo_fence_config.area_id, geo_fence_config.id, \
                    geo_fence_config.name \
             FROM geo_fence_config \
             INNER JOIN lbeacon_table ON lbeacon_table.area_id = geo_fence_config.area_id \
             WHERE geo_fence_config.is_active = 1",
        )
        .fetch_all(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)?;

        let fences: Vec<(String, FenceDefinition)> = fence_rows
            .into_iter()
            .map(|(uuid, area_id, id, name)| (uuid, FenceDefinition { area_id, id, name }))
            .collect();

        let monitored_rows: Vec<(i32, String)> = sqlx::query_as(
            "SELECT area_id, mac_address FROM object_table WHERE (monitor_type & $1) = $1",
        )
        .bind(MonitorType::GEO_FENCE.bits())
        .fetch_all(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)?;

        let mut monitored: HashMap<i32, HashSet<String>> = HashMap::new();
        for (area_id, mac) in monitored_rows {
            monitored.entry(area_id).or_default().insert(mac);
        }

        self.evaluator.reload(fences, monitored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> GeoFenceEvaluator {
        let eval = GeoFenceEvaluator::new(-70, Duration::from_secs(30), 8);
        eval.reload(
            vec![(
                "UUID1".to_string(),
                FenceDefinition {
                    area_id: 1,
                    id: 1,
                    name: "Zone A".to_string(),
                },
            )],
            HashMap::from([(1, HashSet::from(["aabbccddeeff".to_string()]))]),
        );
        eval
    }

    #[test]
    fn non_fence_uuid_is_irrelevant() {
        let eval = evaluator();
        assert!(matches!(
            eval.evaluate("aabbccddeeff", "UNKNOWN", -60),
            Evaluation::Irrelevant
        ));
    }

    #[test]
    fn unmonitored_mac_is_irrelevant() {
        let eval = evaluator();
        assert!(matches!(
            eval.evaluate("112233445566", "UUID1", -60),
            Evaluation::Irrelevant
        ));
    }

    #[test]
    fn weak_rssi_below_threshold_is_not_a_violation() {
        let eval = evaluator();
        assert!(matches!(
            eval.evaluate("aabbccddeeff", "UUID1", -90),
            Evaluation::NoViolation
        ));
    }

    #[test]
    fn first_qualifying_sighting_is_a_violation_then_deduped_within_dwell_window() {
        let eval = evaluator();
        assert!(matches!(
            eval.evaluate("aabbccddeeff", "UUID1", -60),
            Evaluation::Violation { .. }
        ));
        assert!(matches!(
            eval.evaluate("aabbccddeeff", "UUID1", -55),
            Evaluation::NoViolation
        ));
    }

    #[test]
    fn reload_gcs_macs_no_longer_monitored() {
        let eval = evaluator();
        eval.evaluate("aabbccddeeff", "UUID1", -60);
        assert_eq!(eval.tracked_mac_count(), 1);
        eval.reload(
            vec![(
                "UUID1".to_string(),
                FenceDefinition { area_id: 1, id: 1, name: "Zone A".to_string() },
            )],
            HashMap::from([(1, HashSet::new())]),
        );
        assert_eq!(eval.tracked_mac_count(), 0);
    }
}
