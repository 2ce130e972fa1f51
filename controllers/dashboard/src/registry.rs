//! In-memory registry of applied dashboards.
//!
//! The registry remembers what was last pushed to Grafana: one entry per
//! `(namespace, name)` with its content hash and Grafana UID, plus the plugins
//! each dashboard needs. An entry exists exactly when the dashboard is
//! believed present in Grafana. Entries are only written after Grafana
//! confirmed the corresponding call.
//!
//! Data sits behind a short-held mutex. Passes additionally take a
//! per-namespace async lock so two passes over the same namespace never
//! interleave, while passes over different namespaces do not wait on each
//! other.

use chrono::{DateTime, Utc};
use crds::GrafanaPlugin;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// A dashboard believed present in Grafana
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub namespace: String,
    pub name: String,
    /// Content hash of the applied revision
    pub hash: String,
    /// Grafana UID of the dashboard
    pub uid: String,
    /// Folder the dashboard was submitted into
    pub folder_id: i64,
}

#[derive(Debug, Default)]
struct RegistryData {
    /// namespace -> name -> entry
    dashboards: HashMap<String, BTreeMap<String, RegistryEntry>>,
    /// (namespace, name) -> plugins
    plugins: HashMap<(String, String), Vec<GrafanaPlugin>>,
    /// namespace -> completion time of the last pass
    synced: HashMap<String, DateTime<Utc>>,
}

/// Catalog of applied dashboards, shared by all passes
#[derive(Debug, Default)]
pub struct Registry {
    data: Mutex<RegistryData>,
    pass_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, RegistryData> {
        // Every critical section leaves the data consistent, so a poisoned
        // lock still holds usable state.
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize passes over one namespace. Hold the guard for the whole pass.
    pub async fn lock_namespace(&self, namespace: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.pass_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(namespace.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the pass lock of a namespace with no entries left, unless a pass
    /// holds or awaits it.
    pub fn release_namespace(&self, namespace: &str) {
        if self.data().dashboards.contains_key(namespace) {
            return;
        }
        let mut locks = self.pass_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(namespace).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(namespace);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.pass_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// All entries of a namespace, ordered by name
    pub fn dashboards_in(&self, namespace: &str) -> Vec<RegistryEntry> {
        self.data()
            .dashboards
            .get(namespace)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored hash of a dashboard, if it was applied
    pub fn hash_of(&self, namespace: &str, name: &str) -> Option<String> {
        self.data()
            .dashboards
            .get(namespace)
            .and_then(|entries| entries.get(name))
            .map(|entry| entry.hash.clone())
    }

    /// Insert or replace an entry
    pub fn put(&self, entry: RegistryEntry) {
        self.data()
            .dashboards
            .entry(entry.namespace.clone())
            .or_default()
            .insert(entry.name.clone(), entry);
    }

    /// Forget a dashboard and its plugins
    pub fn remove(&self, namespace: &str, name: &str) {
        let mut data = self.data();
        if let Some(entries) = data.dashboards.get_mut(namespace) {
            entries.remove(name);
            if entries.is_empty() {
                data.dashboards.remove(namespace);
            }
        }
        data.plugins.remove(&(namespace.to_string(), name.to_string()));
    }

    /// Record the plugins a dashboard needs
    pub fn set_plugins(&self, namespace: &str, name: &str, plugins: &[GrafanaPlugin]) {
        let key = (namespace.to_string(), name.to_string());
        let mut data = self.data();
        if plugins.is_empty() {
            data.plugins.remove(&key);
        } else {
            data.plugins.insert(key, plugins.to_vec());
        }
    }

    /// Union of all plugins needed by known dashboards
    pub fn plugins(&self) -> BTreeSet<GrafanaPlugin> {
        self.data().plugins.values().flatten().cloned().collect()
    }

    /// Namespaces with at least one entry
    pub fn namespaces(&self) -> BTreeSet<String> {
        self.data().dashboards.keys().cloned().collect()
    }

    /// Record that a pass over `namespace` completed
    pub fn mark_synced(&self, namespace: &str) {
        self.data().synced.insert(namespace.to_string(), Utc::now());
    }

    /// Whether a pass over `namespace` has completed at least once
    pub fn is_synced(&self, namespace: &str) -> bool {
        self.data().synced.contains_key(namespace)
    }

    /// When the last pass over `namespace` completed
    pub fn synced_at(&self, namespace: &str) -> Option<DateTime<Utc>> {
        self.data().synced.get(namespace).copied()
    }
}
