//! redb table definitions for the RenderHub state store.
//!
//! Record tables use `&[u8]` values (JSON-serialized types).

use redb::TableDefinition;

/// Rendering environments keyed by `{name}`.
pub const ENVIRONMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("environments");

/// Pending scale-up requests keyed by `(environment, pool)`. A tuple key
/// keeps names containing `/` from colliding.
pub const SCALE_UP_REQUESTS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("scale_up_requests");

/// Store-wide counters.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the last etag handed out.
pub const ETAG_SEQUENCE: &str = "etag_sequence";
