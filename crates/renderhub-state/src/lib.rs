//! renderhub-state — embedded state store for RenderHub.
//!
//! Backed by [redb](https://docs.rs/redb), holds the environment directory
//! and the queue of pending scale-up requests.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Scale-up requests are keyed by `{environment}/{pool}` so there is at
//! most one pending request per pool. Every request row carries an
//! `etag` drawn from a store-wide sequence; conditional writes and
//! deletes compare it to detect concurrent modification.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod directory;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
