//! Uniform CRUD + transaction contract implemented by every storage backend.
//!
//! Adapters speak logical model and field names. Translation to physical
//! tables and columns, plus field transforms, happens in [`mapping`].
//! Adapters never generate ids or timestamps; the registry pipeline supplies them.

pub mod mapping;
pub mod memory;
pub mod redis;
pub mod sql;

pub use memory::MemoryAdapter;
pub use redis::RedisAdapter;
pub use sql::SqlAdapter;

use crate::errors::AdapterError;
use crate::query::{FindMany, Record, Where};

/// Identity of the SQL-builder backend, the only one migrations run against.
pub const SQL_BUILDER_ID: &str = "sql-builder";

#[allow(async_fn_in_trait)]
pub trait Adapter: Send + Sync {
    /// Adapter handed to a transaction callback. Nested transactions on it run inline.
    type Tx: Adapter;

    /// Stable backend identity, e.g. `"sql-builder"` or `"memory"`.
    fn id(&self) -> &str;

    async fn find_one(&self, model: &str, conditions: &[Where]) -> Result<Option<Record>, AdapterError>;

    async fn find_many(&self, model: &str, query: &FindMany) -> Result<Vec<Record>, AdapterError>;

    async fn count(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError>;

    /// Inserts `data` as given; `None` means the backend produced no row.
    async fn create(&self, model: &str, data: Record) -> Result<Option<Record>, AdapterError>;

    /// Updates the first matching row and returns it.
    async fn update(&self, model: &str, conditions: &[Where], data: Record) -> Result<Option<Record>, AdapterError>;

    async fn update_many(&self, model: &str, conditions: &[Where], data: Record) -> Result<u64, AdapterError>;

    async fn delete_many(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError>;

    /// Runs `f` in an isolated scope. Work is committed only when `f` returns `Ok`.
    async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&Self::Tx) -> Result<T, E>,
        E: From<AdapterError>;
}
