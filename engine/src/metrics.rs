//! Process-wide counters backing `/metrics` (component J, spec §4.J).
//! Plain `AtomicU64`s behind one `Arc`, incremented from the receiver,
//! persister, and violation identifier as packets and violations flow
//! through — no aggregation window, just monotonic totals since start-up,
//! matching the teacher's own `/metrics` shape (a flat counter snapshot,
//! not a histogram/timeseries).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::MonitorType;

#[derive(Default)]
pub struct EngineMetrics {
    pub packets_received: AtomicU64,
    pub parse_failures: AtomicU64,
    pub geo_fence_violations: AtomicU64,
    pub panic_violations: AtomicU64,
    pub movement_violations: AtomicU64,
    pub location_violations: AtomicU64,
    pub notifications_inserted: AtomicU64,
    pub notifications_deduped: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_violation(&self, monitor_type: MonitorType) {
        self.record_violations(monitor_type, 1);
    }

    pub fn record_violations(&self, monitor_type: MonitorType, count: u64) {
        if count == 0 {
            return;
        }
        let counter = if monitor_type.contains(MonitorType::GEO_FENCE) {
            &self.geo_fence_violations
        } else if monitor_type.contains(MonitorType::PANIC) {
            &self.panic_violations
        } else if monitor_type.contains(MonitorType::MOVEMENT) {
            &self.movement_violations
        } else if monitor_type.contains(MonitorType::LOCATION) {
            &self.location_violations
        } else {
            return;
        };
        counter.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_notifications(&self, inserted: u64, deduped: u64) {
        self.notifications_inserted.fetch_add(inserted, Ordering::Relaxed);
        self.notifications_deduped.fetch_add(deduped, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            geo_fence_violations: self.geo_fence_violations.load(Ordering::Relaxed),
            panic_violations: self.panic_violations.load(Ordering::Relaxed),
            movement_violations: self.movement_violations.load(Ordering::Relaxed),
            location_violations: self.location_violations.load(Ordering::Relaxed),
            notifications_inserted: self.notifications_inserted.load(Ordering::Relaxed),
            notifications_deduped: self.notifications_deduped.load(Ordering::Relaxed),
        }
    }
}

pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub parse_failures: u64,
    pub geo_fence_violations: u64,
    pub panic_violations: u64,
    pub movement_violations: u64,
    pub location_violations: u64,
    pub notifications_inserted: u64,
    pub notifications_deduped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MonitorType;

    #[test]
    fn counters_start_at_zero() {
        let m = EngineMetrics::new();
        let snap = m.snapshot();
        assert_eq!(snap.packets_received, 0);
        assert_eq!(snap.notifications_inserted, 0);
    }

    #[test]
    fn record_violation_routes_to_the_right_counter() {
        let m = EngineMetrics::new();
        m.record_violation(MonitorType::PANIC);
        m.record_violation(MonitorType::PANIC);
        m.record_violation(MonitorType::MOVEMENT);
        let snap = m.snapshot();
        assert_eq!(snap.panic_violations, 2);
        assert_eq!(snap.movement_violations, 1);
        assert_eq!(snap.geo_fence_violations, 0);
    }

    #[test]
    fn record_notifications_accumulates() {
        let m = EngineMetrics::new();
        m.record_notifications(5, 2);
        m.record_notifications(3, 0);
        let snap = m.snapshot();
        assert_eq!(snap.notifications_inserted, 8);
        assert_eq!(snap.notifications_deduped, 2);
    }
}
