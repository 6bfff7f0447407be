//! Outbound drain interface (spec §6, `get_and_update_violation_events`).
//! Grounded in `SqlWrapper.c`'s `SQL_get_and_update_violation_events`:
//! selects unprocessed notifications ordered by `id`, appends CSV-ish
//! lines while they fit the caller's buffer, and flips `processed = 1`
//! only for the rows actually included. Truncation at capacity is a
//! silent stop — the remaining rows are picked up on the next call.

use crate::db_pool::{Connect, DbPool};
use crate::error::{EngineError, Result};
use crate::model::Notification;

pub struct NotificationDrain<C> {
    db: std::sync::Arc<DbPool<C>>,
}

impl<C> NotificationDrain<C>
where
    C: Connect,
{
    pub fn new(db: std::sync::Arc<DbPool<C>>) -> Self {
        Self { db }
    }
}

impl NotificationDrain<sqlx::PgConnection> {
    /// Drains up to `buf_len` bytes worth of `id,monitor_type,mac,uuid,violation_ts;`
    /// lines, marking each included row `processed`. Returns the rendered buffer.
    pub async fn get_and_update_violation_events(&self, buf_len: usize) -> Result<String> {
        let mut lease = self.db.acquire().await?;
        let rows: Vec<Notification> = sqlx::query_as(
            "SELECT id, monitor_type, mac_address, uuid, violation_timestamp, processed \
             FROM notification_table WHERE processed = false ORDER BY id ASC",
        )
        .fetch_all(&mut *lease)
        .await
        .map_err(EngineError::SqlExecute)?;

        let mut buf = String::new();
        for row in rows {
            let line = format!(
                "{},{},{},{},{};",
                row.id,
                row.monitor_type,
                row.mac_address,
                row.uuid,
                row.violation_timestamp.format("%Y-%m-%d %H:%M:%S")
            );
            if buf.len() + line.len() > buf_len {
                break;
            }
            buf.push_str(&line);
            sqlx::query("UPDATE notification_table SET processed = true WHERE id = $1")
                .bind(row.id)
                .execute(&mut *lease)
                .await
                .map_err(EngineError::SqlExecute)?;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn line_rendering_matches_expected_csv_shape() {
        let row = Notification {
            id: 1,
            monitor_type: 1,
            mac_address: "aabbccddeeff".to_string(),
            uuid: "UUID1".to_string(),
            violation_timestamp: Utc::now(),
            processed: false,
        };
        let line = format!(
            "{},{},{},{},{};",
            row.id,
            row.monitor_type,
            row.mac_address,
            row.uuid,
            row.violation_timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        assert!(line.starts_with("1,1,aabbccddeeff,UUID1,"));
        assert!(line.ends_with(';'));
    }
}
