use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Table};
use consentdb::schema::{DefaultValue, FieldSource, Schema, Table as SchemaTable};
use serde::Serialize;

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Inspect Schema",
        commands: &[
            "consentdb schema show                 # List every entity and its table",
            "consentdb schema show consent         # Show the merged fields of one entity",
            "consentdb --output json schema show   # Machine-readable schema",
        ],
    },
];

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Show the schema assembled from consentdb.toml
    #[command(name = "show")]
    Show {
        /// Entity to describe (optional, lists all if omitted)
        entity: Option<String>,
    },
}

pub fn handle_schema_commands(command: SchemaCommands, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;
    if !ctx.has_config() {
        output.info("No consentdb.toml found; showing the built-in schema");
    }
    let schema = ctx.schema()?;

    match command {
        SchemaCommands::Show { entity: None } => show_overview(&schema, output),
        SchemaCommands::Show { entity: Some(entity) } => show_entity(&schema, &entity, output),
    }
}

fn show_overview(schema: &Schema, output: &OutputManager) -> Result<()> {
    output.heading("Schema");
    let overview = SchemaOverview {
        entities: schema.tables_in_order().into_iter().map(EntityRow::from).collect(),
    };
    output.display(&overview)?;

    let issues = schema.reference_issues();
    if issues.is_empty() {
        output.success(&format!("{} entities, all references resolve", schema.len()));
    } else {
        for issue in &issues {
            output.warning(&issue.to_string());
        }
    }
    Ok(())
}

fn show_entity(schema: &Schema, entity: &str, output: &OutputManager) -> Result<()> {
    let table = schema
        .require(entity)
        .with_context(|| format!("Entity `{entity}` is not part of the schema"))?;
    output.heading(&format!("Entity: {entity}"));
    output.key_value("Table", &table.table_name);
    output.key_value("Prefix", &table.entity_prefix);
    output.key_value("Order", &table.order.to_string());
    output.display(&EntityDetail::from(table))
}

#[derive(Serialize)]
struct SchemaOverview {
    entities: Vec<EntityRow>,
}

#[derive(Serialize)]
struct EntityRow {
    entity: String,
    table: String,
    prefix: String,
    order: u32,
    fields: usize,
}

impl From<&SchemaTable> for EntityRow {
    fn from(table: &SchemaTable) -> Self {
        Self {
            entity: table.entity_name.clone(),
            table: table.table_name.clone(),
            prefix: table.entity_prefix.clone(),
            order: table.order,
            fields: table.fields.len(),
        }
    }
}

impl TableDisplay for SchemaOverview {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table(&["Entity", "Table", "Prefix", "Order", "Fields"]);
        for row in &self.entities {
            table.add_row(vec![
                Cell::new(&row.entity),
                Cell::new(&row.table),
                Cell::new(&row.prefix),
                Cell::new(row.order),
                Cell::new(row.fields),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.entities
            .iter()
            .map(|row| format!("{}={}", row.entity, row.table))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Serialize)]
struct EntityDetail {
    entity: String,
    fields: Vec<FieldRow>,
}

#[derive(Serialize)]
struct FieldRow {
    name: String,
    column: String,
    kind: String,
    required: bool,
    unique: bool,
    default: Option<String>,
    references: Option<String>,
    source: String,
}

impl From<&SchemaTable> for EntityDetail {
    fn from(table: &SchemaTable) -> Self {
        let fields = table
            .fields
            .iter()
            .map(|field| FieldRow {
                name: field.name.clone(),
                column: field.column().to_string(),
                kind: field.field.kind.to_string(),
                required: field.field.required,
                unique: field.field.unique,
                default: field.field.default_value.as_ref().map(|default| match default {
                    DefaultValue::Literal(value) => value.to_string(),
                    DefaultValue::Generated(generator) => format!("{generator:?}").to_lowercase() + "()",
                }),
                references: field
                    .field
                    .reference
                    .as_ref()
                    .map(|reference| format!("{}.{}", reference.entity, reference.field)),
                source: match &field.source {
                    FieldSource::Core => "core".to_string(),
                    FieldSource::Extension(id) => format!("extension:{id}"),
                    FieldSource::Deployment => "deployment".to_string(),
                },
            })
            .collect();
        Self {
            entity: table.entity_name.clone(),
            fields,
        }
    }
}

impl TableDisplay for EntityDetail {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table(&["Field", "Column", "Type", "Required", "Unique", "Default", "References", "Source"]);
        let flag = |on: bool| if on { "yes" } else { "" };
        for field in &self.fields {
            table.add_row(vec![
                Cell::new(&field.name),
                Cell::new(&field.column),
                Cell::new(&field.kind),
                Cell::new(flag(field.required)),
                Cell::new(flag(field.unique)),
                Cell::new(field.default.as_deref().unwrap_or("")),
                Cell::new(field.references.as_deref().unwrap_or("")),
                Cell::new(&field.source),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        let names: Vec<&str> = self.fields.iter().map(|field| field.name.as_str()).collect();
        format!("{}: {}", self.entity, names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consentdb::{Options, assemble_schema};

    #[test]
    fn entity_detail_reports_defaults_and_references() {
        let schema = assemble_schema(&Options::default()).unwrap();
        let detail = EntityDetail::from(schema.table("consent").unwrap());
        let domain_id = detail.fields.iter().find(|f| f.name == "domainId").unwrap();
        assert_eq!(domain_id.references.as_deref(), Some("domain.id"));
        let id = detail.fields.iter().find(|f| f.name == "id").unwrap();
        assert_eq!(id.default.as_deref(), Some("id()"));
        let status = detail.fields.iter().find(|f| f.name == "status").unwrap();
        assert_eq!(status.default.as_deref(), Some("\"active\""));
    }
}
