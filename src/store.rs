//! Record store: one entity kind's records with validation, persistence and
//! change notification.

use crate::error::{Result, StoreError, ValidationError, Violation};
use crate::guards::RelationGuard;
use crate::persistence::{Codec, Lz4Codec, PassthroughCodec, Persistence, PersistenceArea};
use crate::subscriptions::{
    ChangeAction, ChangeEvent, ChangePayload, ListenerResult, ListenerSet, Subscription,
    SubscriptionHandle,
};
use crate::types::{
    Fields, ImportReport, Record, RecordId, StoreSnapshot, Timestamp, EXPORT_VERSION,
    SYSTEM_FIELDS,
};
use crate::validation::Validator;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default prefix of persistence keys.
pub const DEFAULT_KEY_PREFIX: &str = "store_";

/// Reversible encoding applied before the record set is persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Bare JSON array.
    #[default]
    None,
    /// Envelope around the unchanged JSON text.
    Passthrough,
    /// Envelope around checksummed LZ4.
    Lz4,
}

impl Encoding {
    pub fn codec(&self) -> Option<Box<dyn Codec>> {
        match self {
            Encoding::None => None,
            Encoding::Passthrough => Some(Box::new(PassthroughCodec)),
            Encoding::Lz4 => Some(Box::new(Lz4Codec)),
        }
    }
}

/// Store configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Prefix of the persistence key (`<prefix><name>`).
    pub key_prefix: String,

    /// Run the store's validator on every write.
    pub validate: bool,

    /// Persist after every mutation. When off, call `flush`.
    pub auto_persist: bool,

    /// Encoding of the persisted record set.
    pub encoding: Encoding,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            validate: true,
            auto_persist: true,
            encoding: Encoding::None,
        }
    }
}

/// An ordered, named collection of records of one entity kind.
///
/// Every mutating call runs validate → mutate → persist → notify before it
/// returns. Validation, not-found and duplicate-id failures leave the store
/// untouched. A persistence failure leaves the mutation applied in memory
/// (the store is then dirty) and skips notification.
///
/// Validators run while the store is write-locked and must not call back
/// into the same store. Listeners run after the lock is released and may.
pub struct RecordStore {
    /// Store name (registry key and persistence key suffix).
    name: String,

    /// Store configuration.
    config: StoreConfig,

    /// Entity rule, if any.
    validator: Option<Arc<dyn Validator>>,

    /// Where the record set is persisted.
    persistence: Persistence,

    /// Records in insertion order.
    records: RwLock<Vec<Record>>,

    /// Change listeners.
    listeners: ListenerSet,

    /// In-memory state is ahead of the persisted state.
    dirty: AtomicBool,
}

impl RecordStore {
    /// Open a store, hydrating it from `area`.
    ///
    /// Missing state starts empty. Unreadable or corrupt state is logged and
    /// also starts empty.
    pub fn open(
        name: impl Into<String>,
        area: Arc<dyn PersistenceArea>,
        config: StoreConfig,
    ) -> Self {
        let name = name.into();
        let key = format!("{}{}", config.key_prefix, name);
        let persistence = Persistence::new(area, key, config.encoding.codec());

        let records = match persistence.load() {
            Ok(Some(records)) => dedupe(&name, records),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(
                    store = %name,
                    key = %persistence.key(),
                    error = %e,
                    "persisted records unreadable, starting empty"
                );
                Vec::new()
            }
        };

        debug!(store = %name, count = records.len(), "store opened");

        Self {
            name,
            config,
            validator: None,
            persistence,
            records: RwLock::new(records),
            listeners: ListenerSet::new(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Attach the entity validator.
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Persistence key of this store.
    pub fn key(&self) -> &str {
        self.persistence.key()
    }

    /// Whether memory holds changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    // --- Reads ---

    /// All records, in insertion order.
    pub fn get_all(&self) -> Vec<Record> {
        self.records.read().clone()
    }

    /// The record with `id`, if any.
    pub fn get_by_id(&self, id: impl AsRef<str>) -> Option<Record> {
        let id = id.as_ref();
        self.records.read().iter().find(|r| r.id.as_str() == id).cloned()
    }

    /// Records matching `predicate`, in insertion order.
    pub fn get_where<F>(&self, predicate: F) -> Vec<Record>
    where
        F: Fn(&Record) -> bool,
    {
        self.records
            .read()
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.records.read().len()
    }

    pub fn exists(&self, id: impl AsRef<str>) -> bool {
        let id = id.as_ref();
        self.records.read().iter().any(|r| r.id.as_str() == id)
    }

    // --- Writes ---

    /// Create a record from entity fields.
    ///
    /// An `id` in `data` (string or number) is honored unless already taken;
    /// otherwise one is generated. `createdAt`/`updatedAt` in `data` are
    /// ignored.
    pub fn create(&self, mut data: Fields) -> Result<Record> {
        let requested = take_requested_id(&mut data)?;
        strip_system_fields(&mut data);

        let mut records = self.records.write();

        let now = Timestamp::now();
        let mut record = Record {
            id: requested.clone().unwrap_or_else(RecordId::generate),
            created_at: now,
            updated_at: now,
            fields: data,
        };
        self.check(&record)?;

        match requested {
            Some(id) if contains(&records, &id) => return Err(StoreError::DuplicateId(id)),
            Some(_) => {}
            None => {
                while contains(&records, &record.id) {
                    record.id = RecordId::generate();
                }
            }
        }

        records.push(record.clone());
        self.persist(&records)?;
        drop(records);

        debug!(store = %self.name, id = %record.id, "record created");
        self.emit(ChangeAction::Create, ChangePayload::Record(record.clone()));
        Ok(record)
    }

    /// Merge `partial` over the record with `id`.
    ///
    /// System fields in `partial` are ignored, so the id never changes.
    /// `updatedAt` always moves forward, even for an empty `partial`.
    pub fn update(&self, id: impl AsRef<str>, partial: Fields) -> Result<Record> {
        let id = id.as_ref();
        let mut records = self.records.write();

        let index = position(&records, id)
            .ok_or_else(|| StoreError::RecordNotFound(RecordId::from(id)))?;

        let current = &records[index];
        let mut merged = current.clone();
        for (field, value) in partial {
            if !SYSTEM_FIELDS.contains(&field.as_str()) {
                merged.fields.insert(field, value);
            }
        }
        merged.updated_at = Timestamp::after(current.updated_at);
        self.check(&merged)?;

        records[index] = merged.clone();
        self.persist(&records)?;
        drop(records);

        self.emit(ChangeAction::Update, ChangePayload::Record(merged.clone()));
        Ok(merged)
    }

    /// Remove the record with `id`. Returns false (and notifies nobody) if
    /// there was no such record.
    pub fn delete(&self, id: impl AsRef<str>) -> Result<bool> {
        let id = id.as_ref();
        let mut records = self.records.write();

        let Some(index) = position(&records, id) else {
            return Ok(false);
        };
        let removed = records.remove(index);
        self.persist(&records)?;
        drop(records);

        debug!(store = %self.name, id = %removed.id, "record deleted");
        self.emit(ChangeAction::Delete, ChangePayload::Record(removed));
        Ok(true)
    }

    /// Delete after every guard has allowed it.
    pub fn delete_guarded(
        &self,
        id: impl AsRef<str>,
        guards: &[&dyn RelationGuard],
    ) -> Result<bool> {
        let id = RecordId::from(id.as_ref());
        if !self.exists(&id) {
            return Ok(false);
        }
        for guard in guards {
            guard.check(&self.name, &id)?;
        }
        self.delete(&id)
    }

    /// Replace the entire contents with `records`.
    ///
    /// Each record gets a fresh `updatedAt` and is validated; ids must be
    /// unique. Nothing changes if any record is rejected.
    pub fn bulk_update(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut seen = HashSet::with_capacity(records.len());
        let mut incoming = Vec::with_capacity(records.len());

        for mut record in records {
            require_id(&record)?;
            if !seen.insert(record.id.clone()) {
                return Err(StoreError::DuplicateId(record.id));
            }
            strip_system_fields(&mut record.fields);
            record.updated_at = Timestamp::after(record.updated_at);
            self.check(&record)?;
            incoming.push(record);
        }

        let mut current = self.records.write();
        *current = incoming.clone();
        self.persist(&current)?;
        drop(current);

        self.emit(ChangeAction::BulkReplace, ChangePayload::Records(incoming.clone()));
        Ok(incoming)
    }

    /// Remove every record.
    pub fn clear(&self) -> Result<()> {
        let mut records = self.records.write();
        records.clear();
        self.persist(&records)?;
        drop(records);

        self.emit(ChangeAction::Clear, ChangePayload::Empty);
        Ok(())
    }

    // --- Notification ---

    /// Register a listener for this store's changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Receive this store's changes over a bounded channel.
    pub fn subscribe_channel(&self, buffer_size: usize) -> SubscriptionHandle {
        self.listeners.subscribe_channel(buffer_size)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit(&self, action: ChangeAction, payload: ChangePayload) {
        if self.listeners.is_empty() {
            return;
        }
        let event = ChangeEvent {
            action,
            payload,
            store: self.name.clone(),
        };
        self.listeners.notify(&event);
    }

    // --- Import / export ---

    /// Snapshot of every record.
    pub fn export(&self) -> StoreSnapshot {
        StoreSnapshot {
            store_name: self.name.clone(),
            version: EXPORT_VERSION.to_string(),
            exported_at: Timestamp::now(),
            records: self.get_all(),
        }
    }

    /// Load records from a snapshot.
    ///
    /// Without `merge` the snapshot replaces everything. With `merge` only
    /// records whose id is not present are appended; conflicting incoming
    /// records are dropped and listed in the report. Records keep their
    /// timestamps. Validation failures abort the whole import.
    pub fn import(&self, snapshot: &StoreSnapshot, merge: bool) -> Result<ImportReport> {
        let mut records = self.records.write();

        let (added, report) = if merge {
            let mut present: HashSet<RecordId> = records.iter().map(|r| r.id.clone()).collect();
            let mut added = Vec::new();
            let mut skipped = Vec::new();

            for record in &snapshot.records {
                require_import_id(record)?;
                if present.contains(&record.id) {
                    skipped.push(record.id.clone());
                    continue;
                }
                let record = sanitized(record);
                self.check(&record)?;
                present.insert(record.id.clone());
                added.push(record);
            }

            if !skipped.is_empty() {
                debug!(
                    store = %self.name,
                    skipped = skipped.len(),
                    "merge import kept existing records"
                );
            }

            records.extend(added.iter().cloned());
            let report = ImportReport {
                imported: added.len(),
                skipped,
            };
            (added, report)
        } else {
            let mut seen = HashSet::with_capacity(snapshot.records.len());
            let mut replacement = Vec::with_capacity(snapshot.records.len());

            for record in &snapshot.records {
                require_import_id(record)?;
                if !seen.insert(record.id.clone()) {
                    return Err(StoreError::ImportFormat(format!(
                        "duplicate id {} in snapshot",
                        record.id
                    )));
                }
                let record = sanitized(record);
                self.check(&record)?;
                replacement.push(record);
            }

            *records = replacement.clone();
            let report = ImportReport {
                imported: replacement.len(),
                skipped: Vec::new(),
            };
            (replacement, report)
        };

        self.persist(&records)?;
        drop(records);

        self.emit(ChangeAction::Import, ChangePayload::Records(added));
        Ok(report)
    }

    /// Import an untyped snapshot (e.g. parsed from a user-supplied file).
    pub fn import_value(&self, snapshot: &Value, merge: bool) -> Result<ImportReport> {
        let snapshot = snapshot_from_value(snapshot, &self.name)?;
        self.import(&snapshot, merge)
    }

    // --- Persistence ---

    /// Write the current records now.
    pub fn flush(&self) -> Result<()> {
        let records = self.records.read();
        self.persistence.save(&records)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn persist(&self, records: &[Record]) -> Result<()> {
        if !self.config.auto_persist {
            self.dirty.store(true, Ordering::SeqCst);
            return Ok(());
        }

        match self.persistence.save(records) {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                warn!(
                    store = %self.name,
                    key = %self.persistence.key(),
                    error = %e,
                    "persist failed, memory is ahead of storage"
                );
                Err(e.into())
            }
        }
    }

    fn check(&self, record: &Record) -> Result<()> {
        if !self.config.validate {
            return Ok(());
        }
        match &self.validator {
            Some(validator) => validator.validate(record).map_err(StoreError::from),
            None => Ok(()),
        }
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        // Best-effort flush of unsaved changes
        if self.is_dirty() {
            if let Err(e) = self.flush() {
                warn!(store = %self.name, error = %e, "flush on drop failed");
            }
        }
    }
}

/// Parse an untyped store snapshot. Only the record array is mandatory.
pub(crate) fn snapshot_from_value(value: &Value, fallback_name: &str) -> Result<StoreSnapshot> {
    let object = value
        .as_object()
        .ok_or_else(|| StoreError::ImportFormat("snapshot is not an object".into()))?;

    let items = object
        .get("data")
        .or_else(|| object.get("records"))
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::ImportFormat("snapshot records are not a sequence".into()))?;

    let records = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            Record::from_value(item.clone())
                .map_err(|e| StoreError::ImportFormat(format!("record {}: {}", i, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(StoreSnapshot {
        store_name: object
            .get("storeName")
            .and_then(Value::as_str)
            .unwrap_or(fallback_name)
            .to_string(),
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
        records,
    })
}

fn position(records: &[Record], id: &str) -> Option<usize> {
    records.iter().position(|r| r.id.as_str() == id)
}

fn contains(records: &[Record], id: &RecordId) -> bool {
    records.iter().any(|r| &r.id == id)
}

fn strip_system_fields(fields: &mut Fields) {
    for name in SYSTEM_FIELDS {
        fields.remove(name);
    }
}

fn sanitized(record: &Record) -> Record {
    let mut record = record.clone();
    strip_system_fields(&mut record.fields);
    record
}

fn take_requested_id(data: &mut Fields) -> Result<Option<RecordId>> {
    match data.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(RecordId(s))),
        Some(Value::Number(n)) => Ok(Some(RecordId(n.to_string()))),
        Some(_) => Err(ValidationError::single(Violation::format(
            "id",
            "id must be a string or number",
        ))
        .into()),
    }
}

fn require_id(record: &Record) -> Result<()> {
    if record.id.is_empty() {
        return Err(ValidationError::single(Violation::missing("id")).into());
    }
    Ok(())
}

fn require_import_id(record: &Record) -> Result<()> {
    if record.id.is_empty() {
        return Err(StoreError::ImportFormat("record with empty id".into()));
    }
    Ok(())
}

/// Keep the first record for each id.
fn dedupe(name: &str, records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    let before = records.len();
    let kept: Vec<Record> = records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    if kept.len() != before {
        warn!(
            store = %name,
            dropped = before - kept.len(),
            "persisted records contained duplicate ids"
        );
    }
    kept
}
