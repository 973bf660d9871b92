//! Schema descriptors and their assembly from configuration.
//!
//! - [`field`] describes single attributes
//! - [`table`] merges core, extension and deployment fields into a [`Table`]
//! - [`assemble_schema`] produces the entity-name -> table map for an [`Options`] value

pub mod entities;
pub mod field;
pub mod options;
pub mod table;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub use field::{DefaultValue, Field, FieldKind, Generator, Reference, Transform, TransformKind};
pub use options::{DefaultConfig, EntityOptions, Extension, ExtensionTable, FieldConfig, Options};
pub use table::{
    ExtensionFields, FieldSource, ForeignKey, Index, PRIMARY_KEY, Table, TableDefinition, TableField,
    UniqueConstraint, build_table,
};

use crate::errors::SchemaError;

/// Entity-name -> table map for one configuration.
///
/// Read-only once assembled; rebuild it whenever the configuration changes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    tables: BTreeMap<String, Table>,
}

impl Schema {
    pub fn from_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        let mut schema = Self {
            tables: tables
                .into_iter()
                .map(|table| (table.entity_name.clone(), table))
                .collect(),
        };
        schema.resolve_foreign_keys();
        schema
    }

    pub fn table(&self, entity: &str) -> Option<&Table> {
        self.tables.get(entity)
    }

    pub fn require(&self, entity: &str) -> Result<&Table, SchemaError> {
        self.table(entity).ok_or_else(|| SchemaError::UnknownEntity {
            entity: entity.to_string(),
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables sorted by ascending `order`, ties broken by entity name.
    pub fn tables_in_order(&self) -> Vec<&Table> {
        let mut tables: Vec<&Table> = self.tables.values().collect();
        tables.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.entity_name.cmp(&b.entity_name)));
        tables
    }

    /// References whose target is missing or not ranked strictly lower.
    pub fn reference_issues(&self) -> Vec<ReferenceIssue> {
        let mut issues = Vec::new();
        for table in self.tables.values() {
            for field in &table.fields {
                let Some(reference) = &field.field.reference else {
                    continue;
                };
                let problem = match self.tables.get(&reference.entity) {
                    None => Some(ReferenceProblem::MissingEntity),
                    Some(target) if target.field(&reference.field).is_none() => Some(ReferenceProblem::MissingField),
                    Some(target) if target.entity_name != table.entity_name && target.order >= table.order => {
                        Some(ReferenceProblem::OrderNotLower {
                            source: table.order,
                            target: target.order,
                        })
                    }
                    Some(_) => None,
                };
                if let Some(problem) = problem {
                    issues.push(ReferenceIssue {
                        entity: table.entity_name.clone(),
                        field: field.name.clone(),
                        reference: reference.clone(),
                        problem,
                    });
                }
            }
        }
        issues
    }

    fn resolve_foreign_keys(&mut self) {
        let targets: HashMap<String, (String, HashMap<String, String>)> = self
            .tables
            .values()
            .map(|table| {
                let columns = table
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.column().to_string()))
                    .collect();
                (table.entity_name.clone(), (table.table_name.clone(), columns))
            })
            .collect();

        for table in self.tables.values_mut() {
            for field in &mut table.fields {
                field.foreign_key = field.field.reference.as_ref().and_then(|reference| {
                    let (table_name, columns) = targets.get(&reference.entity)?;
                    let column = columns.get(&reference.field)?;
                    Some(ForeignKey {
                        table: table_name.clone(),
                        column: column.clone(),
                    })
                });
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceIssue {
    pub entity: String,
    pub field: String,
    pub reference: Reference,
    pub problem: ReferenceProblem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceProblem {
    MissingEntity,
    MissingField,
    OrderNotLower { source: u32, target: u32 },
}

impl fmt::Display for ReferenceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = format!("{}.{}", self.reference.entity, self.reference.field);
        match &self.problem {
            ReferenceProblem::MissingEntity => {
                write!(f, "{}.{} references unknown entity {target}", self.entity, self.field)
            }
            ReferenceProblem::MissingField => {
                write!(f, "{}.{} references unknown field {target}", self.entity, self.field)
            }
            ReferenceProblem::OrderNotLower { source, target: target_order } => write!(
                f,
                "{}.{} (order {source}) references {target} (order {target_order}); referenced tables must rank lower",
                self.entity, self.field
            ),
        }
    }
}

/// Produces the complete schema for `options`.
///
/// Built-in entities come first, then entities declared only by extensions.
/// The same options always produce an identical schema.
pub fn assemble_schema(options: &Options) -> Result<Schema, SchemaError> {
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();

    for definition in entities::builtin_definitions() {
        let entity = definition.entity.clone();
        let contributions = extension_fields_for(options, &entity);
        let table = build_table(definition, options.entity(&entity), &contributions)?;
        tables.insert(entity, table);
    }

    for (entity, declaring) in declared_by_extensions(options, &tables) {
        let contributions = extension_fields_for(options, &entity);
        let order = declaring.order.unwrap_or_else(|| derived_order(&contributions, &tables));
        let prefix = declaring.entity_prefix.clone().unwrap_or_else(|| entity.clone());
        let mut definition = TableDefinition::new(entity.clone(), prefix, order);
        if let Some(table_name) = &declaring.entity_name {
            definition.table_name = table_name.clone();
        }
        let table = build_table(definition, options.entity(&entity), &contributions)?;
        tables.insert(entity, table);
    }

    let schema = Schema::from_tables(tables.into_values());
    for issue in schema.reference_issues() {
        log::warn!("schema reference issue: {issue}");
    }
    Ok(schema)
}

fn extension_fields_for<'a>(options: &'a Options, entity: &str) -> Vec<ExtensionFields<'a>> {
    options
        .extensions
        .iter()
        .filter_map(|extension| {
            extension.schema.get(entity).map(|table| ExtensionFields {
                extension: &extension.id,
                table,
            })
        })
        .collect()
}

/// Entities unknown to the core, each with the first extension table declaring it.
fn declared_by_extensions<'a>(
    options: &'a Options,
    builtin: &BTreeMap<String, Table>,
) -> Vec<(String, &'a ExtensionTable)> {
    let mut declared: Vec<(String, &ExtensionTable)> = Vec::new();
    for extension in &options.extensions {
        for (entity, table) in &extension.schema {
            if builtin.contains_key(entity) || declared.iter().any(|(name, _)| name == entity) {
                continue;
            }
            declared.push((entity.clone(), table));
        }
    }
    declared
}

/// One past the highest order among referenced entities.
fn derived_order(contributions: &[ExtensionFields<'_>], tables: &BTreeMap<String, Table>) -> u32 {
    contributions
        .iter()
        .flat_map(|contribution| contribution.table.fields.values())
        .filter_map(|field| field.references.as_ref())
        .filter_map(|reference| tables.get(&reference.entity).map(|table| table.order))
        .max()
        .map_or(1, |order| order + 1)
}
