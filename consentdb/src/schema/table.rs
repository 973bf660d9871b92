//! Table descriptors and the three-tier field merge.

use std::collections::HashMap;

use crate::errors::SchemaError;

use super::field::{Field, Generator};
use super::options::{EntityOptions, ExtensionTable};

/// Logical name of the primary-key field every table carries.
pub const PRIMARY_KEY: &str = "id";

/// Where a field's final definition came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Core,
    Extension(String),
    /// `additional_fields` of the deployment options.
    Deployment,
}

/// Physical target of a resolved reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableField {
    pub name: String,
    pub field: Field,
    pub source: FieldSource,
    /// Filled in during assembly once the referenced table is known.
    pub foreign_key: Option<ForeignKey>,
}

impl TableField {
    pub fn column(&self) -> &str {
        self.field.physical_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_primary_key(&self) -> bool {
        self.name == PRIMARY_KEY
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub fields: Vec<String>,
}

impl Index {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }
}

/// Multi-column unique constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub fields: Vec<String>,
}

impl UniqueConstraint {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }
}

/// Fully merged entity descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Logical entity name, the key in the schema map.
    pub entity_name: String,
    /// Physical table name.
    pub table_name: String,
    pub entity_prefix: String,
    pub fields: Vec<TableField>,
    pub indexes: Vec<Index>,
    pub unique_constraints: Vec<UniqueConstraint>,
    /// Migration rank; referencing tables have a strictly greater order.
    pub order: u32,
}

impl Table {
    pub fn field(&self, name: &str) -> Option<&TableField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn primary_key(&self) -> Option<&TableField> {
        self.field(PRIMARY_KEY)
    }

    /// Physical column names in declaration order.
    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(TableField::column).collect()
    }

    /// Whether the field takes part in a key, index or constraint.
    pub fn is_keyed(&self, name: &str) -> bool {
        let Some(field) = self.field(name) else {
            return false;
        };
        field.is_primary_key()
            || field.field.unique
            || field.field.reference.is_some()
            || self.indexes.iter().any(|index| index.fields.iter().any(|f| f == name))
            || self
                .unique_constraints
                .iter()
                .any(|constraint| constraint.fields.iter().any(|f| f == name))
    }

    pub fn column_for(&self, name: &str) -> Result<&str, SchemaError> {
        self.field(name).map(TableField::column).ok_or_else(|| SchemaError::UnknownField {
            entity: self.entity_name.clone(),
            field: name.to_string(),
        })
    }
}

/// Built-in contribution for one entity before any merging.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub entity: String,
    pub table_name: String,
    pub entity_prefix: String,
    pub order: u32,
    pub fields: Vec<(String, Field)>,
    pub indexes: Vec<Index>,
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl TableDefinition {
    /// Starts a definition with the implicit `id` primary key.
    pub fn new(entity: impl Into<String>, entity_prefix: impl Into<String>, order: u32) -> Self {
        let entity = entity.into();
        Self {
            table_name: entity.clone(),
            entity,
            entity_prefix: entity_prefix.into(),
            order,
            fields: vec![(PRIMARY_KEY.to_string(), primary_key_field())],
            indexes: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn unique_constraint(mut self, constraint: UniqueConstraint) -> Self {
        self.unique_constraints.push(constraint);
        self
    }
}

pub(crate) fn primary_key_field() -> Field {
    Field::string().required().unique().default_generated(Generator::Id)
}

/// Extension fields for one entity, tagged with the contributing extension.
pub struct ExtensionFields<'a> {
    pub extension: &'a str,
    pub table: &'a ExtensionTable,
}

/// Builds a table by merging, in increasing precedence, the core fields,
/// extension fields, deployment `additional_fields`, and physical-name overrides.
pub fn build_table(
    definition: TableDefinition,
    options: Option<&EntityOptions>,
    extensions: &[ExtensionFields<'_>],
) -> Result<Table, SchemaError> {
    let entity = definition.entity.clone();
    let mut fields: Vec<TableField> = definition
        .fields
        .into_iter()
        .map(|(name, field)| TableField {
            name,
            field,
            source: FieldSource::Core,
            foreign_key: None,
        })
        .collect();

    for contribution in extensions {
        for (name, config) in &contribution.table.fields {
            let field = config.clone().into_field(&entity, name)?;
            merge_field(
                &entity,
                &mut fields,
                name,
                field,
                FieldSource::Extension(contribution.extension.to_string()),
            );
        }
    }

    if let Some(options) = options {
        for (name, config) in &options.additional_fields {
            let field = config.clone().into_field(&entity, name)?;
            merge_field(&entity, &mut fields, name, field, FieldSource::Deployment);
        }

        for (logical, physical) in &options.fields {
            let target = fields
                .iter_mut()
                .find(|field| &field.name == logical)
                .ok_or_else(|| SchemaError::UnknownField {
                    entity: entity.clone(),
                    field: logical.clone(),
                })?;
            target.field.physical_name = Some(physical.clone());
        }
    }

    check_physical_names(&entity, &fields)?;

    let table_name = options
        .and_then(|options| options.entity_name.clone())
        .unwrap_or(definition.table_name);
    let entity_prefix = options
        .and_then(|options| options.entity_prefix.clone())
        .unwrap_or(definition.entity_prefix);

    Ok(Table {
        entity_name: entity,
        table_name,
        entity_prefix,
        fields,
        indexes: definition.indexes,
        unique_constraints: definition.unique_constraints,
        order: definition.order,
    })
}

fn merge_field(entity: &str, fields: &mut Vec<TableField>, name: &str, field: Field, source: FieldSource) {
    match fields.iter_mut().find(|existing| existing.name == name) {
        Some(existing) => {
            log::warn!(
                "field `{entity}.{name}` declared by {:?} is overridden by {:?}",
                existing.source,
                source
            );
            existing.field = field;
            existing.source = source;
        }
        None => fields.push(TableField {
            name: name.to_string(),
            field,
            source,
            foreign_key: None,
        }),
    }
}

fn check_physical_names(entity: &str, fields: &[TableField]) -> Result<(), SchemaError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for field in fields {
        if let Some(first) = seen.insert(field.column(), field.name.as_str()) {
            return Err(SchemaError::PhysicalNameCollision {
                entity: entity.to_string(),
                column: field.column().to_string(),
                first: first.to_string(),
                second: field.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field::FieldKind;
    use crate::schema::options::FieldConfig;

    fn domain_definition() -> TableDefinition {
        TableDefinition::new("domain", "dom", 1)
            .field("name", Field::string().required().unique())
            .field("description", Field::string())
    }

    #[test]
    fn core_fields_keep_declaration_order() {
        let table = build_table(domain_definition(), None, &[]).expect("table");
        let names: Vec<_> = table.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "name", "description"]);
        assert!(table.fields.iter().all(|f| f.source == FieldSource::Core));
    }

    #[test]
    fn extension_fields_override_and_extend() {
        let ext_table = ExtensionTable::default()
            .field("description", FieldConfig::new(FieldKind::Json))
            .field("verifiedBy", FieldConfig::new(FieldKind::String));
        let extensions = [ExtensionFields {
            extension: "audit",
            table: &ext_table,
        }];
        let table = build_table(domain_definition(), None, &extensions).expect("table");

        let description = table.field("description").expect("description");
        assert_eq!(description.field.kind, FieldKind::Json);
        assert_eq!(description.source, FieldSource::Extension("audit".into()));
        assert_eq!(table.fields.last().map(|f| f.name.as_str()), Some("verifiedBy"));
    }

    #[test]
    fn overrides_only_rename_columns() {
        let options = EntityOptions::default()
            .rename_table("domains")
            .prefix("d")
            .rename_field("name", "domain_name");
        let table = build_table(domain_definition(), Some(&options), &[]).expect("table");
        assert_eq!(table.table_name, "domains");
        assert_eq!(table.entity_prefix, "d");
        let name = table.field("name").expect("name");
        assert_eq!(name.column(), "domain_name");
        assert_eq!(name.field.kind, FieldKind::String);
        assert!(name.field.unique);
    }

    #[test]
    fn rename_of_unknown_field_is_rejected() {
        let options = EntityOptions::default().rename_field("missing", "x");
        let err = build_table(domain_definition(), Some(&options), &[]).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { .. }));
    }

    #[test]
    fn physical_name_collision_is_an_error() {
        let options = EntityOptions::default().rename_field("description", "name");
        let err = build_table(domain_definition(), Some(&options), &[]).unwrap_err();
        match err {
            SchemaError::PhysicalNameCollision { column, first, second, .. } => {
                assert_eq!(column, "name");
                assert_eq!(first, "name");
                assert_eq!(second, "description");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn keyed_fields_include_references_and_indexes() {
        let definition = TableDefinition::new("consent", "cns", 3)
            .field("domainId", Field::string().required().references("domain", "id"))
            .field("status", Field::string())
            .field("note", Field::string())
            .index(Index::new("consent_status_idx", &["status"]));
        let table = build_table(definition, None, &[]).expect("table");
        assert!(table.is_keyed("id"));
        assert!(table.is_keyed("domainId"));
        assert!(table.is_keyed("status"));
        assert!(!table.is_keyed("note"));
    }
}
