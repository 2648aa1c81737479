//! # Record Store
//!
//! A local, synchronous record store for application entities (clients,
//! projects, quotes, ...) with validation hooks, change notification and
//! full-snapshot persistence.
//!
//! ## Core Concepts
//!
//! - **Records**: flat JSON objects with store-assigned `id`, `createdAt`
//!   and `updatedAt`
//! - **Stores**: one ordered collection per entity kind, validated by a
//!   pluggable [`Validator`] and persisted under `<prefix><name>`
//! - **Persistence areas**: keyed string storage (in memory or on disk) with
//!   optional reversible encoding
//! - **Registry**: named directory of stores with a merged change feed,
//!   whole-application export/import and relation guards
//!
//! ## Example
//!
//! ```ignore
//! use record_store::{MemoryArea, Registry, RegistryConfig, Rules};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let registry = Registry::new(Arc::new(MemoryArea::new()), RegistryConfig::default());
//! let clients = registry.open_store("clients", Some(Arc::new(Rules::new().required(["name"]))));
//!
//! let _feed = registry.subscribe(|event| {
//!     println!("{} in {}", event.action, event.store);
//!     Ok(())
//! });
//!
//! let acme = clients.create(json!({"name": "Acme"}).as_object().cloned().unwrap())?;
//! clients.update(&acme.id, json!({"city": "Oslo"}).as_object().cloned().unwrap())?;
//!
//! let backup = registry.export_all();
//! ```

pub mod entities;
pub mod error;
pub mod guards;
pub mod persistence;
pub mod registry;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod validation;

// Re-exports
pub use error::{PersistenceError, Result, StoreError, ValidationError, Violation, ViolationKind};
pub use guards::{ReferenceGuard, RelationGuard};
pub use persistence::{
    Codec, FileArea, Lz4Codec, MemoryArea, PassthroughCodec, Persistence, PersistenceArea,
};
pub use registry::{Registry, RegistryConfig};
pub use store::{Encoding, RecordStore, StoreConfig, DEFAULT_KEY_PREFIX};
pub use subscriptions::{
    ChangeAction, ChangeEvent, ChangePayload, DropReason, ListenerError, ListenerId,
    ListenerResult, ListenerSet, StoreEvent, Subscription, SubscriptionHandle,
};
pub use types::*;
pub use validation::{FnValidator, Rules, Validator};
