//! Schema migrations for SQL backends.
//!
//! [`differ`] compares the declared schema with an introspected database and
//! yields an additive [`MigrationPlan`]; [`compiler`] turns the plan into SQL
//! for one [`Dialect`].

pub mod compiler;
pub mod dialect;
pub mod differ;

pub use compiler::{CompiledMigration, compile, generate_migration, migration_file_name, render_migration_file};
pub use dialect::{Dialect, UnknownDialect};
pub use differ::{Introspect, LiveColumn, LiveSchema, LiveTable, MigrationPlan, TableAddition, plan, plan_migration};
