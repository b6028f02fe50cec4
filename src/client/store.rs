//! Persisted pairing and session state.
//!
//! The sign client writes its pairings and sessions here. Readers that have
//! no live client (for example `status`) go straight to the file.

use anyhow::{Context, Result};
use notify::{Config as WatcherConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::core::{Pairing, RequiredNamespaces, Session};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub pairings: Vec<Pairing>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl StoreSnapshot {
    pub fn sessions_matching(&self, required: &RequiredNamespaces) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| s.namespaces.satisfies(required))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct WcStore {
    path: PathBuf,
}

impl WcStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty store.
    pub async fn load(&self) -> Result<StoreSnapshot> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(StoreSnapshot::default()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store at {:?}", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreSnapshot::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read store at {:?}", self.path)),
        }
    }

    /// Write the snapshot through a temp file so readers never see a torn write.
    pub async fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            "Persisted {} pairings and {} sessions to {:?}",
            snapshot.pairings.len(),
            snapshot.sessions.len(),
            self.path
        );
        Ok(())
    }
}

/// Signals whenever the store file changes on disk, including writes from
/// other processes. Dropping the watcher stops the signals.
pub struct StoreWatcher {
    _watcher: RecommendedWatcher,
}

impl StoreWatcher {
    pub fn spawn(store: &WcStore) -> Result<(Self, mpsc::UnboundedReceiver<()>)> {
        let file_name = store
            .path()
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| anyhow::anyhow!("Store path has no file name: {:?}", store.path()))?;
        let dir = store
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let (change_tx, change_rx) = mpsc::unbounded_channel();

        let config = WatcherConfig::default().with_poll_interval(std::time::Duration::from_secs(2));
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if relevant {
                        let _ = change_tx.send(());
                    }
                }
                Err(e) => error!("Store watcher error: {:?}", e),
            },
            config,
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching store directory: {:?}", dir);

        Ok((Self { _watcher: watcher }, change_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Namespaces;

    fn session(topic: &str, namespaces: Namespaces) -> Session {
        Session {
            topic: topic.to_string(),
            pairing_topic: "p".to_string(),
            expiry: 10,
            acknowledged: true,
            namespaces,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = WcStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load().await.unwrap(), StoreSnapshot::default());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = WcStore::new(dir.path().join("nested").join("wc-store.json"));
        let snapshot = StoreSnapshot {
            pairings: vec![
                Pairing {
                    topic: "a".to_string(),
                    active: false,
                    expiry: 0,
                    created_at: None,
                    peer_metadata: None,
                },
                Pairing {
                    topic: "b".to_string(),
                    active: true,
                    expiry: 0,
                    created_at: Some(7),
                    peer_metadata: None,
                },
            ],
            sessions: vec![session("s1", Namespaces::zenon())],
        };

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_sessions_matching_filters_by_namespace() {
        let snapshot = StoreSnapshot {
            pairings: vec![],
            sessions: vec![
                session("other", Namespaces::default()),
                session("zenon", Namespaces::zenon()),
            ],
        };
        let matching = snapshot.sessions_matching(&Namespaces::zenon());
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].topic, "zenon");
    }
}
