//! ConsentDB core library.
//!
//! Declarative schema descriptors for consent-management entities, a uniform
//! adapter contract over several storage backends, a hook pipeline around
//! writes, output validation and additive SQL migrations.

pub mod adapter;
pub mod errors;
pub mod hooks;
pub mod id;
pub mod keys;
pub mod migration;
pub mod query;
pub mod registry;
pub mod schema;
pub mod validate;

pub use adapter::{Adapter, MemoryAdapter, RedisAdapter, SQL_BUILDER_ID, SqlAdapter};
pub use errors::*;
pub use hooks::{AfterFn, BeforeFn, Diagnostics, Hook, HookContext, HookOutcome, HookSet, LogDiagnostics, Operation};
pub use migration::{CompiledMigration, Dialect, MigrationPlan};
pub use query::{FindMany, Operator, Record, SortBy, SortOrder, Where};
pub use registry::{NewConsent, Pipeline, Registry, SubjectLookup};
pub use schema::{Options, Schema, assemble_schema};
pub use validate::{FieldValue, TypedRecord, validate_output};

pub use redis;
pub use sqlx;
