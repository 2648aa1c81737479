//! Directory of named stores with a merged change feed.

use crate::error::{Result, StoreError};
use crate::guards::ReferenceGuard;
use crate::persistence::PersistenceArea;
use crate::store::{snapshot_from_value, RecordStore, StoreConfig};
use crate::subscriptions::{
    ChangeEvent, ListenerResult, ListenerSet, Subscription, SubscriptionHandle,
};
use crate::types::{
    BatchResult, RegistryImportReport, RegistrySnapshot, StoreSnapshot, Timestamp,
    EXPORT_VERSION,
};
use crate::validation::Validator;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Configuration for stores opened through `open_store`.
    pub store_defaults: StoreConfig,

    /// Flush dirty stores when the registry is dropped.
    pub flush_on_drop: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store_defaults: StoreConfig::default(),
            flush_on_drop: true,
        }
    }
}

struct Registered {
    store: Arc<RecordStore>,
    /// Forwards the store's events to the registry listeners.
    forward: Subscription,
}

/// Maps store names to stores.
///
/// Construct one per process and pass it by reference to whatever needs
/// store lookup. Stores are never unregistered; registering a name again
/// replaces the previous store.
pub struct Registry {
    config: RegistryConfig,

    /// Area used by `open_store`.
    area: Arc<dyn PersistenceArea>,

    /// Registered stores by name.
    stores: RwLock<BTreeMap<String, Registered>>,

    /// Global listeners.
    listeners: ListenerSet,
}

impl Registry {
    pub fn new(area: Arc<dyn PersistenceArea>, config: RegistryConfig) -> Self {
        Self {
            config,
            area,
            stores: RwLock::new(BTreeMap::new()),
            listeners: ListenerSet::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn area(&self) -> &Arc<dyn PersistenceArea> {
        &self.area
    }

    /// Bind `name` to `store`, replacing any previous binding.
    ///
    /// The store's events are re-emitted to the registry's listeners with
    /// `store` set to `name`.
    pub fn register(&self, name: impl Into<String>, store: Arc<RecordStore>) {
        let name = name.into();

        let global = self.listeners.clone();
        let forward_name = name.clone();
        let forward = store.subscribe(move |event| {
            if !global.is_empty() {
                let mut event = event.clone();
                event.store = forward_name.clone();
                global.notify(&event);
            }
            Ok(())
        });

        let previous = self
            .stores
            .write()
            .insert(name.clone(), Registered { store, forward });

        match previous {
            Some(old) => {
                old.forward.unsubscribe();
                debug!(store = %name, "store re-registered, previous instance detached");
            }
            None => debug!(store = %name, "store registered"),
        }
    }

    /// Open a store on the registry's area with the default config and
    /// register it.
    pub fn open_store(
        &self,
        name: &str,
        validator: Option<Arc<dyn Validator>>,
    ) -> Arc<RecordStore> {
        self.open_store_with(name, self.config.store_defaults.clone(), validator)
    }

    /// Open a store with an explicit config and register it.
    pub fn open_store_with(
        &self,
        name: &str,
        config: StoreConfig,
        validator: Option<Arc<dyn Validator>>,
    ) -> Arc<RecordStore> {
        let mut store = RecordStore::open(name, Arc::clone(&self.area), config);
        if let Some(validator) = validator {
            store = store.with_validator(validator);
        }
        let store = Arc::new(store);
        self.register(name, Arc::clone(&store));
        store
    }

    /// The store bound to `name`. Absent means the feature is unavailable.
    pub fn get(&self, name: &str) -> Option<Arc<RecordStore>> {
        self.stores.read().get(name).map(|r| Arc::clone(&r.store))
    }

    /// Like `get`, for callers that cannot proceed without the store.
    pub fn require(&self, name: &str) -> Result<Arc<RecordStore>> {
        self.get(name)
            .ok_or_else(|| StoreError::StoreNotRegistered(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.stores.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }

    /// Copy of the bindings, so no registry lock is held while stores run
    /// listeners.
    fn entries(&self) -> Vec<(String, Arc<RecordStore>)> {
        self.stores
            .read()
            .iter()
            .map(|(name, r)| (name.clone(), Arc::clone(&r.store)))
            .collect()
    }

    // --- Change feed ---

    /// Register a listener for every registered store's changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Receive every store's changes over a bounded channel.
    pub fn subscribe_channel(&self, buffer_size: usize) -> SubscriptionHandle {
        self.listeners.subscribe_channel(buffer_size)
    }

    // --- Whole-registry operations ---

    /// Export every store, keyed by registry name.
    pub fn export_all(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            version: EXPORT_VERSION.to_string(),
            exported_at: Timestamp::now(),
            storages: self
                .entries()
                .into_iter()
                .map(|(name, store)| (name, store.export()))
                .collect(),
        }
    }

    /// Import each registered store's entry from `snapshot`.
    ///
    /// Stores without an entry are untouched. A failing store does not stop
    /// the others; its error is reported.
    pub fn import_all(&self, snapshot: &RegistrySnapshot, merge: bool) -> RegistryImportReport {
        let entries = self.entries();
        let mut report = RegistryImportReport::default();

        for name in snapshot.storages.keys() {
            if !entries.iter().any(|(n, _)| n == name) {
                warn!(store = %name, "snapshot entry has no registered store, skipped");
                report.unknown.push(name.clone());
            }
        }

        for (name, store) in entries {
            let Some(entry) = snapshot.storages.get(&name) else {
                continue;
            };
            match store.import(entry, merge) {
                Ok(store_report) => {
                    report.imported.insert(name, store_report);
                }
                Err(e) => {
                    warn!(store = %name, error = %e, "store import failed");
                    report.errors.push((name, e.to_string()));
                }
            }
        }

        report
    }

    /// Import an untyped registry snapshot.
    ///
    /// The whole snapshot is checked before any store is touched.
    pub fn import_value(&self, snapshot: &Value, merge: bool) -> Result<RegistryImportReport> {
        let object = snapshot
            .as_object()
            .ok_or_else(|| StoreError::ImportFormat("snapshot is not an object".into()))?;
        let storages = object
            .get("storages")
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::ImportFormat("snapshot has no storages map".into()))?;

        let parsed = storages
            .iter()
            .map(|(name, entry)| {
                snapshot_from_value(entry, name)
                    .map(|s| (name.clone(), s))
                    .map_err(|e| StoreError::ImportFormat(format!("{}: {}", name, e)))
            })
            .collect::<Result<BTreeMap<String, StoreSnapshot>>>()?;

        let snapshot = RegistrySnapshot {
            version: object
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or(EXPORT_VERSION)
                .to_string(),
            exported_at: object
                .get("exportedAt")
                .and_then(Value::as_str)
                .and_then(Timestamp::parse)
                .unwrap_or_else(Timestamp::now),
            storages: parsed,
        };

        Ok(self.import_all(&snapshot, merge))
    }

    /// Clear every store, continuing past failures.
    pub fn clear_all(&self) -> BatchResult {
        self.for_each_store("clear", |store| store.clear())
    }

    /// Persist every store now, continuing past failures.
    pub fn flush_all(&self) -> BatchResult {
        self.for_each_store("flush", |store| store.flush())
    }

    fn for_each_store<F>(&self, op: &str, f: F) -> BatchResult
    where
        F: Fn(&RecordStore) -> Result<()>,
    {
        let mut result = BatchResult::default();
        for (name, store) in self.entries() {
            match f(&store) {
                Ok(()) => result.succeeded.push(name),
                Err(e) => {
                    warn!(store = %name, op, error = %e, "store operation failed");
                    result.errors.push((name, e.to_string()));
                }
            }
        }
        result
    }

    /// Guard refusing deletes while `dependent` records reference the
    /// target through `field`. `None` if `dependent` is not registered.
    pub fn reference_guard(&self, dependent: &str, field: &str) -> Option<ReferenceGuard> {
        self.get(dependent)
            .map(|store| ReferenceGuard::new(store, field))
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.config.flush_on_drop {
            return;
        }
        for (name, store) in self.entries() {
            if store.is_dirty() {
                if let Err(e) = store.flush() {
                    warn!(store = %name, error = %e, "flush on shutdown failed");
                }
            }
        }
    }
}
