//! Declared-vs-live schema comparison.
//!
//! The plan is additive only: live tables and columns the schema no longer
//! declares are left alone.

use std::collections::HashSet;

use crate::errors::AdapterError;
use crate::schema::{Schema, Table, TableField};

/// Introspected structure of a live database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSchema {
    pub tables: Vec<LiveTable>,
}

impl LiveSchema {
    /// Table names compare case-insensitively.
    pub fn table(&self, name: &str) -> Option<&LiveTable> {
        self.tables.iter().find(|table| table.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
}

impl LiveTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Backends that can describe their current structure.
#[allow(async_fn_in_trait)]
pub trait Introspect {
    async fn introspect(&self) -> Result<LiveSchema, AdapterError>;
}

/// Columns missing from an existing table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableAddition {
    pub entity: String,
    pub table_name: String,
    pub fields: Vec<TableField>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    /// Whole tables, in ascending `order`.
    pub to_be_created: Vec<Table>,
    pub to_be_added: Vec<TableAddition>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_be_created.is_empty() && self.to_be_added.iter().all(|addition| addition.fields.is_empty())
    }
}

/// Plans the additive changes that bring `live` up to `declared`.
pub fn plan(declared: &Schema, live: &LiveSchema) -> MigrationPlan {
    let mut plan = MigrationPlan::default();
    for table in declared.tables_in_order() {
        match live.table(&table.table_name) {
            None => plan.to_be_created.push(table.clone()),
            Some(existing) => {
                let mut seen = HashSet::new();
                let fields: Vec<TableField> = table
                    .fields
                    .iter()
                    .filter(|field| !existing.has_column(field.column()))
                    .filter(|field| seen.insert(field.column().to_ascii_lowercase()))
                    .cloned()
                    .collect();
                if !fields.is_empty() {
                    plan.to_be_added.push(TableAddition {
                        entity: table.entity_name.clone(),
                        table_name: table.table_name.clone(),
                        fields,
                    });
                }
            }
        }
    }
    log::debug!(
        "migration plan: {} tables to create, {} tables to alter",
        plan.to_be_created.len(),
        plan.to_be_added.len()
    );
    plan
}

/// Introspects `target` and plans against `declared`.
pub async fn plan_migration<I: Introspect>(declared: &Schema, target: &I) -> Result<MigrationPlan, AdapterError> {
    let live = target.introspect().await?;
    Ok(plan(declared, &live))
}
