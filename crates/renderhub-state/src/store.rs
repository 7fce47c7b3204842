//! StateStore — redb-backed state persistence for RenderHub.
//!
//! Provides typed operations over environments and pending scale-up
//! requests. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).
//!
//! Scale-up request writes are conditional: `insert_scale_request` fails
//! if the row already exists, `replace_scale_request` and
//! `delete_scale_request` compare the caller's etag with the stored one.
//! `add_scale_request` builds the merge-on-add upsert on top of those and
//! retries a bounded number of times when it loses a race.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableError, WriteTransaction};
use tracing::{debug, error};

use renderhub_core::RenderingEnvironment;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Attempts at a conflicting scale-up upsert before giving up.
pub const DEFAULT_ADD_ATTEMPTS: u32 = 5;

/// Runs between the read and the write of each `add_scale_request` attempt.
#[cfg(test)]
type AddRace = Arc<dyn Fn(&StateStore) + Send + Sync>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    add_attempts: u32,
    #[cfg(test)]
    add_race: Option<AddRace>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            add_attempts: DEFAULT_ADD_ATTEMPTS,
            #[cfg(test)]
            add_race: None,
        }
    }

    /// Override how many times `add_scale_request` retries on conflict.
    pub fn with_add_attempts(mut self, attempts: u32) -> Self {
        self.add_attempts = attempts.max(1);
        self
    }

    #[cfg(test)]
    fn with_add_race(mut self, race: impl Fn(&StateStore) + Send + Sync + 'static) -> Self {
        self.add_race = Some(Arc::new(race));
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        txn.open_table(SCALE_UP_REQUESTS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Environments ───────────────────────────────────────────────

    /// Insert or update an environment record.
    pub fn put_environment(&self, env: &RenderingEnvironment) -> StateResult<()> {
        let value = serde_json::to_vec(env).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            table
                .insert(env.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(environment = %env.name, "environment stored");
        Ok(())
    }

    /// Get an environment by name.
    pub fn get_environment(&self, name: &str) -> StateResult<Option<RenderingEnvironment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let env: RenderingEnvironment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(env))
            }
            None => Ok(None),
        }
    }

    /// List the names of all environments.
    pub fn list_environment_names(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    /// Delete an environment by name. Returns true if it existed.
    pub fn delete_environment(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(environment = %name, existed, "environment deleted");
        Ok(existed)
    }

    // ── Scale-up requests ──────────────────────────────────────────

    /// Get the pending request for a pool. `None` if absent or if the
    /// request table does not exist.
    pub fn get_scale_request(
        &self,
        environment: &str,
        pool: &str,
    ) -> StateResult<Option<ScaleUpRequest>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(SCALE_UP_REQUESTS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(StateError::Table(e.to_string())),
        };
        match table.get((environment, pool)).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode_request(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List every pending request.
    ///
    /// A full scan; rows are deleted as soon as they are processed, so the
    /// table stays small.
    pub fn list_scale_requests(&self) -> StateResult<Vec<ScaleUpRequest>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(SCALE_UP_REQUESTS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(StateError::Table(e.to_string())),
        };
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode_request(value.value())?);
        }
        Ok(results)
    }

    /// Create the request row for a pool. Fails with `PreconditionFailed`
    /// if a row already exists.
    pub fn insert_scale_request(
        &self,
        environment: &str,
        pool: &str,
        target_nodes: u32,
    ) -> StateResult<ScaleUpRequest> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        if read_request(&txn, (environment, pool))?.is_some() {
            return Err(StateError::PreconditionFailed(format!(
                "scale request {environment}/{pool} already exists"
            )));
        }
        let request = ScaleUpRequest {
            environment: environment.to_string(),
            pool: pool.to_string(),
            target_nodes,
            etag: next_etag(&txn)?,
        };
        write_request(&txn, &request)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%environment, %pool, target_nodes, etag = request.etag, "scale request inserted");
        Ok(request)
    }

    /// Overwrite a request row, provided it still carries `request.etag`.
    /// Returns the stored row with its new etag.
    pub fn replace_scale_request(&self, request: &ScaleUpRequest) -> StateResult<ScaleUpRequest> {
        let (environment, pool) = request.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        match read_request(&txn, request.table_key())? {
            Some(current) if current.etag == request.etag => {}
            Some(current) => {
                return Err(StateError::PreconditionFailed(format!(
                    "scale request {environment}/{pool} has etag {}, expected {}",
                    current.etag, request.etag
                )));
            }
            None => {
                return Err(StateError::PreconditionFailed(format!(
                    "scale request {environment}/{pool} no longer exists"
                )));
            }
        }
        let updated = ScaleUpRequest {
            etag: next_etag(&txn)?,
            ..request.clone()
        };
        write_request(&txn, &updated)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%environment, %pool, target_nodes = updated.target_nodes, etag = updated.etag, "scale request replaced");
        Ok(updated)
    }

    /// Record a request to grow `pool` to `requested` nodes.
    ///
    /// Merges into any pending request: the stored target only ever
    /// increases. Concurrent writers to the same pool are resolved by
    /// retrying; after the configured attempts the conflict is returned.
    pub fn add_scale_request(
        &self,
        environment: &str,
        pool: &str,
        requested: u32,
    ) -> StateResult<ScaleUpRequest> {
        let mut last_conflict = None;
        for attempt in 1..=self.add_attempts {
            match self.try_add_scale_request(environment, pool, requested) {
                Ok(request) => return Ok(request),
                Err(e) if e.is_conflict() => {
                    debug!(%environment, %pool, attempt, error = %e, "scale request conflict, retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let err = last_conflict.unwrap_or_else(|| {
            StateError::PreconditionFailed(format!("scale request {environment}/{pool}"))
        });
        error!(%environment, %pool, requested, error = %err, "unable to store scale request");
        Err(err)
    }

    fn try_add_scale_request(
        &self,
        environment: &str,
        pool: &str,
        requested: u32,
    ) -> StateResult<ScaleUpRequest> {
        let existing = self.get_scale_request(environment, pool)?;
        self.run_add_race();
        match existing {
            None => self.insert_scale_request(environment, pool, requested),
            Some(existing) if requested > existing.target_nodes => {
                self.replace_scale_request(&ScaleUpRequest {
                    target_nodes: requested,
                    ..existing
                })
            }
            // A lower or equal request is already covered.
            Some(existing) => Ok(existing),
        }
    }

    #[cfg(test)]
    fn run_add_race(&self) {
        if let Some(race) = &self.add_race {
            race(self);
        }
    }

    #[cfg(not(test))]
    fn run_add_race(&self) {}

    /// Delete a request row if it still carries `request.etag`.
    ///
    /// Returns false when the row is already gone or was modified since it
    /// was read; the newer row is left for the next processing cycle.
    pub fn delete_scale_request(&self, request: &ScaleUpRequest) -> StateResult<bool> {
        let (environment, pool) = request.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deleted = match read_request(&txn, request.table_key())? {
            Some(current) if current.etag == request.etag => {
                let mut table = txn.open_table(SCALE_UP_REQUESTS).map_err(map_err!(Table))?;
                table.remove(request.table_key()).map_err(map_err!(Write))?;
                true
            }
            Some(current) => {
                debug!(%environment, %pool, stored = current.etag, expected = request.etag, "scale request changed since read, not deleting");
                false
            }
            None => false,
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%environment, %pool, deleted, "scale request delete");
        Ok(deleted)
    }
}

fn decode_request(bytes: &[u8]) -> StateResult<ScaleUpRequest> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn read_request(
    txn: &WriteTransaction,
    key: (&str, &str),
) -> StateResult<Option<ScaleUpRequest>> {
    let table = txn.open_table(SCALE_UP_REQUESTS).map_err(map_err!(Table))?;
    let current = match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Some(decode_request(guard.value())?),
        None => None,
    };
    Ok(current)
}

fn write_request(txn: &WriteTransaction, request: &ScaleUpRequest) -> StateResult<()> {
    let value = serde_json::to_vec(request).map_err(map_err!(Serialize))?;
    let mut table = txn.open_table(SCALE_UP_REQUESTS).map_err(map_err!(Table))?;
    table
        .insert(request.table_key(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Advance the store-wide etag sequence inside `txn`.
fn next_etag(txn: &WriteTransaction) -> StateResult<ETag> {
    let mut table = txn.open_table(META).map_err(map_err!(Table))?;
    let current = table
        .get(ETAG_SEQUENCE)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(ETAG_SEQUENCE, next).map_err(map_err!(Write))?;
    Ok(next)
}
