//! Persistence of a store's full record set.
//!
//! Every mutating store operation rewrites the whole record array under one
//! key (`<prefix><store name>`). Two layouts exist on disk:
//!
//! - a bare JSON array of records, or
//! - an envelope `{"_compressed": true, "codec": "...", "data": "..."}` whose
//!   `data` is the array text run through a [`Codec`]. A missing `codec`
//!   means passthrough.
//!
//! Loading detects the layout, so a store may switch encodings between runs.

mod area;
mod codec;

pub use area::{FileArea, MemoryArea, PersistenceArea};
pub use codec::{codec_by_name, Codec, Lz4Codec, PassthroughCodec};

use crate::error::PersistenceError;
use crate::types::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Envelope around an encoded record array.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "_compressed")]
    compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    codec: Option<String>,
    data: String,
}

/// Binds one store to its key in a persistence area.
pub struct Persistence {
    area: Arc<dyn PersistenceArea>,
    key: String,
    codec: Option<Box<dyn Codec>>,
}

impl Persistence {
    pub fn new(
        area: Arc<dyn PersistenceArea>,
        key: impl Into<String>,
        codec: Option<Box<dyn Codec>>,
    ) -> Self {
        Self {
            area,
            key: key.into(),
            codec,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the persisted records. `None` if nothing was ever written.
    pub fn load(&self) -> Result<Option<Vec<Record>>, PersistenceError> {
        match self.area.read(&self.key)? {
            Some(raw) => decode_records(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Overwrite the persisted records.
    pub fn save(&self, records: &[Record]) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(records)?;

        let value = match &self.codec {
            None => json,
            Some(codec) => {
                let envelope = Envelope {
                    compressed: true,
                    codec: match codec.name() {
                        "passthrough" => None,
                        name => Some(name.to_string()),
                    },
                    data: codec.encode(&json)?,
                };
                serde_json::to_string(&envelope)?
            }
        };

        self.area.write(&self.key, &value)
    }

    /// Drop the persisted entry entirely.
    pub fn remove(&self) -> Result<(), PersistenceError> {
        self.area.remove(&self.key)
    }
}

fn decode_records(raw: &str) -> Result<Vec<Record>, PersistenceError> {
    let value: Value = serde_json::from_str(raw)?;
    let is_envelope = matches!(
        &value,
        Value::Object(map) if map.get("_compressed") == Some(&Value::Bool(true))
    );

    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else if is_envelope {
        let envelope: Envelope = serde_json::from_value(value)?;
        let codec = codec_by_name(envelope.codec.as_deref().unwrap_or("passthrough"))?;
        let plain = codec.decode(&envelope.data)?;
        Ok(serde_json::from_str(&plain)?)
    } else {
        Err(PersistenceError::Corruption(
            "expected a record array or an encoded envelope".into(),
        ))
    }
}
