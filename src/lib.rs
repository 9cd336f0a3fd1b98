//! # countdown-store - Keyed observable broadcast store
//!
//! A small in-memory store that maps `(namespace, category)` keys to values
//! and tells subscribers when a value changes. It exists so that many
//! independent display units can follow live state (such as the seconds left
//! on a game turn in a chat channel) without a shared parent re-rendering all
//! of them.
//!
//! ## Core Concepts
//!
//! - **KeyedStore**: the map plus its listeners; equal writes are no-ops
//! - **CompositeKey**: structured `(namespace, category)` key, collision-free
//! - **Subscription**: idempotent teardown handle for one registration
//! - **ValueWatch**: adapter holding a local copy of one key for a renderer
//! - **ChangeStream**: bounded channel of change events for other threads
//!
//! ## Usage
//!
//! ```rust
//! use countdown_store::{ChannelId, CountdownStore, GameType};
//!
//! let countdowns = CountdownStore::new();
//! let watch = countdowns
//!     .watch(Some(ChannelId(7)), GameType::Chess, || { /* re-render */ })
//!     .unwrap();
//!
//! countdowns.start(ChannelId(7), GameType::Chess, 30);
//! assert_eq!(watch.value(), Some(30));
//! ```
//!
//! The store holds transient, re-derivable state only. Nothing is persisted.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod countdown;
pub mod error;
pub mod event;
pub mod key;
pub mod store;
pub mod stream;
pub mod subscription;
pub mod watch;

// Re-export primary types at crate root for convenience
pub use config::{DispatchMode, StoreConfig};
pub use countdown::{ChannelId, CountdownStore, CountdownWatch, GameType};
pub use error::{StoreError, StoreResult, ValidationError};
pub use event::ChangeEvent;
pub use key::CompositeKey;
pub use store::{KeyedStore, WeakKeyedStore};
pub use stream::ChangeStream;
pub use subscription::{Subscription, SubscriptionId};
pub use watch::ValueWatch;
