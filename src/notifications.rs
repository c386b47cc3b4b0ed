//! Notification Store
//!
//! TTL key-value recorder of prize and refund notices, keyed by
//! (network, winner, bet). Entries are observability for the claim UI, not
//! authoritative state.

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Network;
use crate::models::{BetId, WinnerNotification};

/// Where the scheduler writes notices. Failures are reported to the caller,
/// who decides they are non-fatal.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn record(&self, notification: &WinnerNotification, now: i64) -> Result<()>;

    /// Drop entries past their retention window; returns how many went.
    async fn purge_expired(&self, now: i64) -> Result<usize>;

    async fn health_check(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct NotificationStore {
    conn: Arc<Mutex<Connection>>,
    network: Network,
    retention_secs: i64,
}

impl NotificationStore {
    pub fn open(db_path: &str, network: Network, retention_secs: i64) -> Result<Self> {
        let conn = Connection::open(db_path).context("open notification db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS winner_notifications (
                network TEXT NOT NULL,
                winner_address TEXT NOT NULL,
                bet_id INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (network, winner_address, bet_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_winner_notifications_expires ON winner_notifications(expires_at)",
            [],
        )?;

        info!("📬 Notification store ready at {} ({})", db_path, network.as_str());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            network,
            retention_secs,
        })
    }

    /// Insert or replace; a rewrite refreshes the expiry.
    pub async fn add(&self, notification: &WinnerNotification, now: i64) -> Result<()> {
        let winner = notification.winner_address.to_ascii_lowercase();
        let payload = serde_json::to_string(notification).context("serialize notification")?;
        let expires_at = now.saturating_add(self.retention_secs);

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO winner_notifications
                (network, winner_address, bet_id, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(network, winner_address, bet_id) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![
                self.network.as_str(),
                winner,
                notification.bet_id as i64,
                payload,
                now,
                expires_at
            ],
        )
        .context("insert notification")?;

        debug!(
            bet_id = notification.bet_id,
            winner = %winner,
            kind = notification.kind.as_str(),
            "Notification stored"
        );
        Ok(())
    }

    /// Unexpired notices for an address, newest bet first
    pub async fn list_for(&self, address: &str, now: i64) -> Result<Vec<WinnerNotification>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload FROM winner_notifications
             WHERE network = ?1 AND winner_address = ?2 AND expires_at > ?3
             ORDER BY bet_id DESC",
        )?;
        let rows = stmt.query_map(
            params![self.network.as_str(), address.to_ascii_lowercase(), now],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for row in rows {
            let payload = row?;
            out.push(serde_json::from_str(&payload).context("decode notification payload")?);
        }
        Ok(out)
    }

    pub async fn get(
        &self,
        address: &str,
        bet_id: BetId,
        now: i64,
    ) -> Result<Option<WinnerNotification>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM winner_notifications
                 WHERE network = ?1 AND winner_address = ?2 AND bet_id = ?3 AND expires_at > ?4",
                params![
                    self.network.as_str(),
                    address.to_ascii_lowercase(),
                    bet_id as i64,
                    now
                ],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).context("decode notification payload"))
            .transpose()
    }

    /// Dismiss one entry; `false` if there was nothing to remove.
    pub async fn remove(&self, address: &str, bet_id: BetId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "DELETE FROM winner_notifications
             WHERE network = ?1 AND winner_address = ?2 AND bet_id = ?3",
            params![self.network.as_str(), address.to_ascii_lowercase(), bet_id as i64],
        )?;
        Ok(n > 0)
    }

    pub async fn count(&self, now: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM winner_notifications WHERE network = ?1 AND expires_at > ?2",
            params![self.network.as_str(), now],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }
}

#[async_trait::async_trait]
impl NotificationSink for NotificationStore {
    async fn record(&self, notification: &WinnerNotification, now: i64) -> Result<()> {
        self.add(notification, now).await
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "DELETE FROM winner_notifications WHERE network = ?1 AND expires_at <= ?2",
            params![self.network.as_str(), now],
        )?;
        Ok(n)
    }

    async fn health_check(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("notification store unreachable")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, NotificationKind};
    use tempfile::TempDir;

    const DAY: i64 = 24 * 60 * 60;

    fn store(dir: &TempDir, network: Network) -> NotificationStore {
        let path = dir.path().join("notifications.db");
        NotificationStore::open(path.to_str().unwrap(), network, 30 * DAY).unwrap()
    }

    fn notice(bet_id: BetId, winner: &str, amount: &str) -> WinnerNotification {
        WinnerNotification {
            bet_id,
            winner_address: winner.to_string(),
            bet_category: "gas_used".to_string(),
            bet_description: "Total gas used".to_string(),
            prize_amount: amount.to_string(),
            currency: Currency::Native,
            kind: NotificationKind::Prize,
            settled_at: "2024-01-01T00:00:00+00:00".to_string(),
            tx_hash: Some("0x01".to_string()),
        }
    }

    #[tokio::test]
    async fn test_add_list_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, Network::Mainnet);
        store.add(&notice(1, "0xAbC", "190"), 1_000).await.unwrap();
        store.add(&notice(2, "0xabc", "95"), 1_000).await.unwrap();

        let listed = store.list_for("0xABC", 1_001).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].bet_id, 2);
        assert_eq!(listed[1].prize_amount, "190");
    }

    #[tokio::test]
    async fn test_same_key_replaces_and_refreshes_ttl() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, Network::Mainnet);
        store.add(&notice(1, "0xabc", "100"), 0).await.unwrap();
        store.add(&notice(1, "0xabc", "150"), 10 * DAY).await.unwrap();

        // past the first expiry, inside the refreshed one
        let now = 31 * DAY;
        let listed = store.list_for("0xabc", now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].prize_amount, "150");
        assert_eq!(store.count(now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expiry_and_purge() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, Network::Mainnet);
        store.add(&notice(1, "0xabc", "1"), 0).await.unwrap();
        store.add(&notice(2, "0xabc", "2"), 5 * DAY).await.unwrap();

        let now = 30 * DAY;
        assert_eq!(store.list_for("0xabc", now).await.unwrap().len(), 1);
        assert!(store.get("0xabc", 1, now).await.unwrap().is_none());
        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert_eq!(store.purge_expired(now).await.unwrap(), 0);
        assert!(store.get("0xabc", 2, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_and_network_isolation() {
        let dir = TempDir::new().unwrap();
        let main = store(&dir, Network::Mainnet);
        let test = store(&dir, Network::Testnet);
        main.add(&notice(1, "0xabc", "1"), 0).await.unwrap();

        assert!(test.list_for("0xabc", 1).await.unwrap().is_empty());
        assert!(!test.remove("0xabc", 1).await.unwrap());
        assert!(main.remove("0xABC", 1).await.unwrap());
        assert!(main.list_for("0xabc", 1).await.unwrap().is_empty());
        main.health_check().await.unwrap();
    }
}
