//! Data model (spec §3): `Sighting`, `Beacon`, `Gateway`, `Object`,
//! `ObjectSummary`, `Notification`, the four rule-config tables, and the
//! `rssi_weight_table` centroid-weight lookup.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Monitor bits — independent, any subset may be set on an `Object`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MonitorType: i32 {
        const GEO_FENCE = 0b0001;
        const PANIC     = 0b0010;
        const MOVEMENT  = 0b0100;
        const LOCATION  = 0b1000;
    }
}

/// Canonical, lowercase, colon-free MAC address representation.
pub fn canonical_mac(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != ':' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// One observation of an object at a beacon. Created by the persister
/// (component F), never mutated, destroyed by retention (component I).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Sighting {
    pub object_mac_address: String,
    pub lbeacon_uuid: String,
    pub rssi: i32,
    pub initial_timestamp: DateTime<Utc>,
    pub final_timestamp: DateTime<Utc>,
    pub panic_flag: i16,
    pub battery_voltage: i32,
    pub server_time_offset: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Beacon {
    pub uuid: String,
    pub ip_address: String,
    pub gateway_ip_address: String,
    pub coordinate_x: i32,
    pub coordinate_y: i32,
    pub room: String,
    pub area_id: i32,
    pub health_status: i32,
    pub registered_timestamp: DateTime<Utc>,
    pub last_report_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Gateway {
    pub ip_address: String,
    pub health_status: i32,
    pub registered_timestamp: DateTime<Utc>,
    pub last_report_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ObjectRow {
    pub mac_address: String,
    pub area_id: i32,
    pub room: String,
    pub monitor_type: i32,
    pub danger_area: bool,
}

/// Single row per object: the "current location" view maintained by the
/// summarizer and violation identifier.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ObjectSummary {
    pub mac_address: String,
    pub uuid: Option<String>,
    pub rssi: Option<i32>,
    pub first_seen_timestamp: Option<DateTime<Utc>>,
    pub last_seen_timestamp: Option<DateTime<Utc>>,
    pub base_x: Option<i32>,
    pub base_y: Option<i32>,
    pub battery_voltage: Option<i32>,
    pub is_location_updated: bool,
    pub geofence_violation_timestamp: Option<DateTime<Utc>>,
    pub panic_violation_timestamp: Option<DateTime<Utc>>,
    pub movement_violation_timestamp: Option<DateTime<Utc>>,
    pub location_violation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Notification {
    pub id: i64,
    pub monitor_type: i32,
    pub mac_address: String,
    pub uuid: String,
    pub violation_timestamp: DateTime<Utc>,
    pub processed: bool,
}

/// `is_active` is re-derived by the violation identifier (H1) from
/// `enable`, `start_time`, `end_time` and the current wall clock; the
/// column is persisted so other queries can filter on it directly.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RuleWindow {
    pub id: i32,
    pub area_id: i32,
    pub enable: bool,
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
    pub is_active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MovementConfigRow {
    pub id: i32,
    pub area_id: i32,
    pub enable: bool,
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
    pub is_active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LongStayConfigRow {
    pub id: i32,
    pub area_id: i32,
    pub enable: bool,
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
    pub is_active: bool,
    pub stay_duration_minutes: i32,
}

/// Centroid weight lookup for G4, keyed by RSSI bucket
/// (`rssi_weight_table`, referenced by `SqlWrapper.c`'s base-location join).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RssiWeightBucket {
    pub bottom_rssi: i32,
    pub upper_rssi: i32,
    pub weight: f64,
}

impl RssiWeightBucket {
    pub fn weight_for(buckets: &[RssiWeightBucket], rssi: f64) -> Option<f64> {
        buckets
            .iter()
            .find(|b| rssi >= b.bottom_rssi as f64 && rssi < b.upper_rssi as f64)
            .map(|b| b.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_mac() {
        assert_eq!(canonical_mac("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(canonical_mac("aa-bb-cc-dd-ee-ff"), "aabbccddeeff");
        assert_eq!(canonical_mac("aabbccddeeff"), "aabbccddeeff");
    }

    #[test]
    fn monitor_type_bits_are_independent() {
        let m = MonitorType::GEO_FENCE | MonitorType::PANIC;
        assert!(m.contains(MonitorType::GEO_FENCE));
        assert!(m.contains(MonitorType::PANIC));
        assert!(!m.contains(MonitorType::MOVEMENT));
    }

    #[test]
    fn weight_bucket_lookup() {
        let buckets = vec![
            RssiWeightBucket { bottom_rssi: -100, upper_rssi: -80, weight: 1.0 },
            RssiWeightBucket { bottom_rssi: -80, upper_rssi: -50, weight: 3.0 },
        ];
        assert_eq!(RssiWeightBucket::weight_for(&buckets, -90.0), Some(1.0));
        assert_eq!(RssiWeightBucket::weight_for(&buckets, -60.0), Some(3.0));
        assert_eq!(RssiWeightBucket::weight_for(&buckets, -10.0), None);
    }
}
