//! Core types for the record store.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Version tag written into every export.
pub const EXPORT_VERSION: &str = "1.0";

/// Length of the random suffix of generated ids.
const ID_SUFFIX_LEN: usize = 9;

/// Entity-specific fields of a record.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Field names owned by the store.
pub(crate) const SYSTEM_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// Unique identifier for a record within its store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Base-36 millisecond timestamp followed by a random lowercase suffix.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        RecordId(format!("{}{}", to_base36(millis), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

/// UTC wall-clock time at millisecond precision.
///
/// Serialized as an RFC 3339 string (`2024-05-01T09:30:00.125Z`) so that a
/// serialize/deserialize round trip is exact.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp(Utc::now().trunc_subsecs(3))
    }

    /// Current time, but strictly later than `prev`.
    pub fn after(prev: Timestamp) -> Self {
        let now = Self::now();
        if now > prev {
            now
        } else {
            Timestamp(prev.0 + chrono::Duration::milliseconds(1))
        }
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Timestamp(dt.with_timezone(&Utc).trunc_subsecs(3)))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_rfc3339())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s)))
    }
}

/// A single record in a store.
///
/// The system fields are kept apart from the entity fields; on the wire the
/// record is one flat JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier (assigned by store unless supplied at creation).
    pub id: RecordId,

    /// When the record was created.
    pub created_at: Timestamp,

    /// When the record was last written.
    pub updated_at: Timestamp,

    /// Entity-defined fields.
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Look up an entity field.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// String value of an entity field, if it is a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Parse a record from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The flat JSON form of this record.
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = self.fields.clone();
        map.insert("id".into(), serde_json::Value::String(self.id.0.clone()));
        map.insert("createdAt".into(), self.created_at.to_rfc3339().into());
        map.insert("updatedAt".into(), self.updated_at.to_rfc3339().into());
        serde_json::Value::Object(map)
    }
}

/// Export of one store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub store_name: String,
    pub version: String,
    pub exported_at: Timestamp,
    #[serde(rename = "data", alias = "records")]
    pub records: Vec<Record>,
}

/// Export of every registered store, keyed by registry name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub version: String,
    pub exported_at: Timestamp,
    pub storages: BTreeMap<String, StoreSnapshot>,
}

/// Outcome of importing a snapshot into one store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Number of records written.
    pub imported: usize,
    /// Incoming ids dropped by a merge because they were already present.
    pub skipped: Vec<RecordId>,
}

/// Outcome of importing a registry snapshot.
#[derive(Clone, Debug, Default)]
pub struct RegistryImportReport {
    /// Per-store reports for stores that imported successfully.
    pub imported: BTreeMap<String, ImportReport>,
    /// Stores whose import failed, with the error message.
    pub errors: Vec<(String, String)>,
    /// Snapshot entries with no registered store.
    pub unknown: Vec<String>,
}

/// Outcome of an operation attempted on every registered store.
#[derive(Clone, Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<String>,
    pub errors: Vec<(String, String)>,
}

impl BatchResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
        assert!(a.0.len() > ID_SUFFIX_LEN);
        assert!(a
            .0
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_timestamp_after_is_strictly_later() {
        let prev = Timestamp::now();
        let later = Timestamp::after(prev);
        assert!(later > prev);

        let future = Timestamp(prev.0 + chrono::Duration::seconds(60));
        assert_eq!(
            Timestamp::after(future),
            Timestamp(future.0 + chrono::Duration::milliseconds(1))
        );
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = Timestamp::now();
        let parsed = Timestamp::parse(&ts.to_rfc3339()).unwrap();
        assert_eq!(ts, parsed);
        assert!(Timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_record_is_flat_on_the_wire() {
        let value = json!({
            "id": "abc",
            "createdAt": "2024-01-02T03:04:05.006Z",
            "updatedAt": "2024-01-02T03:04:05.006Z",
            "name": "Acme",
            "budget": 1200
        });
        let record = Record::from_value(value.clone()).unwrap();
        assert_eq!(record.id, RecordId::from("abc"));
        assert_eq!(record.get_str("name"), Some("Acme"));
        assert!(record.get("id").is_none());
        assert_eq!(serde_json::to_value(&record).unwrap(), value);
        assert_eq!(record.to_value(), value);
    }

    #[test]
    fn test_snapshot_accepts_records_alias() {
        let snapshot: StoreSnapshot = serde_json::from_value(json!({
            "storeName": "clients",
            "version": "1.0",
            "exportedAt": "2024-01-02T03:04:05.006Z",
            "records": []
        }))
        .unwrap();
        assert_eq!(snapshot.store_name, "clients");

        let out = serde_json::to_value(&snapshot).unwrap();
        assert!(out.get("data").is_some());
    }
}

