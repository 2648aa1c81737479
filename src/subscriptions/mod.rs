//! Change notification for stores and the registry.
//!
//! Every successful mutating operation emits one [`ChangeEvent`] to the
//! store's listeners before the operation returns. Two delivery styles:
//!
//! - closures registered with `subscribe`, called synchronously in-line
//! - bounded channels registered with `subscribe_channel`, for consumers on
//!   other threads; a subscriber that falls behind is dropped
//!
//! # Example
//!
//! ```ignore
//! let sub = store.subscribe(|event| {
//!     println!("{} in {}", event.action, event.store);
//!     Ok(())
//! });
//! store.create(fields)?;
//! sub.unsubscribe();
//! ```

mod manager;
mod types;

pub use manager::{ListenerSet, Subscription};
pub use types::{
    ChangeAction, ChangeEvent, ChangePayload, DropReason, ListenerError, ListenerId,
    ListenerResult, StoreEvent, SubscriptionHandle,
};
