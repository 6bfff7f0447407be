//! Retention / vacuum (component I, spec §4.I). Grounded in
//! `SqlWrapper.c`'s `SQL_delete_old_data` (notification delete + TimescaleDB
//! `drop_chunks`) and `SQL_vacuum_database` (per-table `VACUUM`).
//!
//! Each operation acquires and releases its own connection independently
//! and a failure on one table never aborts the rest — matching spec §7's
//! "rule-table iteration continues on per-table failure (retention/vacuum)".

use tracing::warn;

use crate::db_pool::{Connect, DbPool};
use crate::error::Result;

const VACUUM_TABLES: [&str; 5] = [
    "tracking_table",
    "lbeacon_table",
    "gateway_table",
    "object_table",
    "notification_table",
];

pub struct Retention<C> {
    db: std::sync::Arc<DbPool<C>>,
    retention_hours: i64,
}

impl<C> Retention<C>
where
    C: Connect,
{
    pub fn new(db: std::sync::Arc<DbPool<C>>, retention_hours: i64) -> Self {
        Self { db, retention_hours }
    }
}

impl Retention<sqlx::PgConnection> {
    pub async fn run(&self) -> Result<()> {
        self.delete_old_notifications().await;
        self.drop_old_tracking_chunks().await;
        self.vacuum_all().await;
        Ok(())
    }

    async fn delete_old_notifications(&self) {
        let lease = match self.db.acquire().await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "retention: could not acquire connection for notification delete");
                return;
            }
        };
        let mut lease = lease;
        let sql = format!(
            "DELETE FROM notification_table WHERE violation_timestamp < NOW() - INTERVAL '{} HOURS'",
            self.retention_hours
        );
        if let Err(e) = sqlx::query(&sql).execute(&mut *lease).await {
            warn!(error = %e, "retention: notification delete failed");
        }
    }

    async fn drop_old_tracking_chunks(&self) {
        let lease = match self.db.acquire().await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "retention: could not acquire connection for drop_chunks");
                return;
            }
        };
        let mut lease = lease;
        let sql = format!(
            "SELECT drop_chunks(interval '{} HOURS', 'tracking_table')",
            self.retention_hours
        );
        if let Err(e) = sqlx::query(&sql).execute(&mut *lease).await {
            warn!(error = %e, "retention: drop_chunks failed");
        }
    }

    async fn vacuum_all(&self) {
        for table in VACUUM_TABLES {
            let lease = match self.db.acquire().await {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, table, "retention: could not acquire connection for vacuum");
                    continue;
                }
            };
            let mut lease = lease;
            let sql = format!("VACUUM {table}");
            if let Err(e) = sqlx::query(&sql).execute(&mut *lease).await {
                warn!(error = %e, table, "retention: vacuum failed, continuing to next table");
            }
        }
    }
}
