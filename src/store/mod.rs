pub mod subscriptions;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Namespaced key-value store holding ordered string lists, backed by SQLite.
#[derive(Clone)]
pub struct PluginStore {
    conn: Arc<Mutex<Connection>>,
}

impl PluginStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Plugin store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS plugin_store_rows (
                plugin_name TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (plugin_name, key)
            );
            ",
        )
        .context("Failed to create plugin_store_rows table")?;
        Ok(())
    }

    /// Read the list stored under `(namespace, key)`, `None` when absent.
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<String>>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM plugin_store_rows WHERE plugin_name = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read {namespace}/{key}"))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Corrupt value stored under {namespace}/{key}"))
        })
        .transpose()
    }

    /// Overwrite the list stored under `(namespace, key)`.
    pub async fn set(&self, namespace: &str, key: &str, value: &[String]) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO plugin_store_rows (plugin_name, key, value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(plugin_name, key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')",
            rusqlite::params![namespace, key, json],
        )
        .with_context(|| format!("Failed to write {namespace}/{key}"))?;
        Ok(())
    }
}
