//! Upload-retention ledger for user datapacks.
//!
//! User uploads are not kept forever: every user datapack directory is
//! recorded here with its last-updated timestamp, and a periodic sweep
//! removes datapacks that have not been touched within the sunset
//! interval. Official, workshop, and temp datapacks are never registered.

use crate::{StoreError, StoreResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Days a user datapack survives without being updated.
pub const SUNSET_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetentionEntry {
    file_name: String,
    last_updated: DateTime<Utc>,
}

/// A JSON ledger mapping datapack directories to their retention records.
///
/// All mutations load, edit, and rewrite the whole file under an async
/// mutex; the ledger is small (one entry per live user datapack) and the
/// file is the single source of truth across restarts.
#[derive(Debug)]
pub struct RetentionLedger {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl RetentionLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Records (or refreshes) a datapack directory.
    pub async fn register(&self, directory: &Path, file_name: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(
            key_for(directory),
            RetentionEntry {
                file_name: file_name.to_owned(),
                last_updated: Utc::now(),
            },
        );
        self.save(&entries).await
    }

    /// Refreshes the last-updated timestamp of a registered directory.
    /// Unregistered directories are ignored.
    pub async fn touch(&self, directory: &Path) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if let Some(entry) = entries.get_mut(&key_for(directory)) {
            entry.last_updated = Utc::now();
            self.save(&entries).await?;
        }
        Ok(())
    }

    /// Re-keys an entry after a datapack directory rename.
    pub async fn change_key(&self, old_directory: &Path, new_directory: &Path) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if let Some(entry) = entries.remove(&key_for(old_directory)) {
            entries.insert(key_for(new_directory), entry);
            self.save(&entries).await?;
        }
        Ok(())
    }

    /// Drops the entry for a deleted datapack directory.
    pub async fn deregister(&self, directory: &Path) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(&key_for(directory)).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }

    /// Drops every entry under `root` (whole-namespace deletion).
    pub async fn deregister_under(&self, root: &Path) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let prefix = key_for(root);
        let before = entries.len();
        entries.retain(|key, _| !Path::new(key).starts_with(&prefix));
        if entries.len() != before {
            self.save(&entries).await?;
        }
        Ok(())
    }

    /// Returns the directories whose last update is older than the sunset
    /// interval as of `now`.
    pub async fn expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<PathBuf>> {
        let _guard = self.lock.lock().await;
        let entries = self.load().await?;
        let cutoff = now - Duration::days(SUNSET_DAYS);
        Ok(entries
            .iter()
            .filter(|(_, entry)| entry.last_updated < cutoff)
            .map(|(key, _)| PathBuf::from(key))
            .collect())
    }

    async fn load(&self) -> StoreResult<HashMap<String, RetentionEntry>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::from),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save(&self, entries: &HashMap<String, RetentionEntry>) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

fn key_for(directory: &Path) -> String {
    directory.to_string_lossy().into_owned()
}
