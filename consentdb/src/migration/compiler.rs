//! Migration plan -> dialect-specific SQL.

use chrono::{DateTime, Utc};

use crate::adapter::{Adapter, SQL_BUILDER_ID};
use crate::errors::MigrationError;
use crate::schema::{DefaultValue, Schema, Table, TableField};

use super::dialect::Dialect;
use super::differ::{Introspect, MigrationPlan, TableAddition, plan};

/// Forward statements plus their inverses, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMigration {
    pub dialect: Dialect,
    pub statements: Vec<String>,
    /// Already reversed: run top to bottom to undo `statements`.
    pub rollback_statements: Vec<String>,
}

impl CompiledMigration {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Forward script, wrapped in a transaction where the dialect allows it.
    /// Empty when there is nothing to do.
    pub fn forward(&self) -> String {
        self.wrap(&self.statements)
    }

    pub fn rollback(&self) -> String {
        self.wrap(&self.rollback_statements)
    }

    fn wrap(&self, statements: &[String]) -> String {
        if statements.is_empty() {
            return String::new();
        }
        let body = statements.join("\n\n");
        if self.dialect.transactional_ddl() {
            format!("{}\n\n{body}\n\n{}\n", self.dialect.begin(), self.dialect.commit())
        } else {
            format!("{body}\n")
        }
    }
}

/// Compiles `plan` for `dialect`.
///
/// The plan is checked in full before any SQL is produced.
pub fn compile(plan: &MigrationPlan, dialect: Dialect) -> Result<CompiledMigration, MigrationError> {
    check_plan(plan)?;

    let mut statements = Vec::new();
    let mut inverses = Vec::new();
    let compiler = Compiler { dialect };

    for table in &plan.to_be_created {
        statements.push(compiler.create_table(table));
        inverses.push(Some(compiler.drop_table(table)));
        for index in &table.indexes {
            let columns = index_columns(table, &index.fields)?;
            statements.push(compiler.create_index(&table.table_name, &index.name, &columns, false));
            inverses.push(None);
        }
    }

    for addition in &plan.to_be_added {
        for field in &addition.fields {
            statements.push(compiler.add_column(addition, field));
            inverses.push(Some(compiler.drop_column(&addition.table_name, field.column())));
            if field.field.unique && !field.is_primary_key() {
                let name = format!("{}_{}_key", addition.table_name, field.column());
                statements.push(compiler.create_index(&addition.table_name, &name, &[field.column()], true));
                inverses.push(Some(compiler.drop_index(&addition.table_name, &name)));
            }
        }
    }

    let rollback_statements = inverses.into_iter().rev().flatten().collect();
    Ok(CompiledMigration {
        dialect,
        statements,
        rollback_statements,
    })
}

fn check_plan(plan: &MigrationPlan) -> Result<(), MigrationError> {
    for table in &plan.to_be_created {
        if table.primary_key().is_none() {
            return Err(MigrationError::InvalidPlan {
                message: format!("table `{}` has no primary key", table.table_name),
            });
        }
        for index in &table.indexes {
            index_columns(table, &index.fields)?;
        }
        if plan.to_be_added.iter().any(|addition| addition.table_name == table.table_name) {
            return Err(MigrationError::InvalidPlan {
                message: format!("table `{}` is both created and altered", table.table_name),
            });
        }
    }
    Ok(())
}

fn index_columns<'t>(table: &'t Table, fields: &[String]) -> Result<Vec<&'t str>, MigrationError> {
    fields
        .iter()
        .map(|name| {
            table.field(name).map(TableField::column).ok_or_else(|| MigrationError::InvalidPlan {
                message: format!("index on `{}` names unknown field `{name}`", table.table_name),
            })
        })
        .collect()
}

struct Compiler {
    dialect: Dialect,
}

impl Compiler {
    fn q(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    fn quoted_list<'a>(&self, idents: impl IntoIterator<Item = &'a str>) -> String {
        idents.into_iter().map(|ident| self.q(ident)).collect::<Vec<_>>().join(", ")
    }

    fn literal_default(&self, field: &TableField) -> Option<String> {
        match &field.field.default_value {
            Some(DefaultValue::Literal(value)) => Some(self.dialect.default_expression(field.field.kind, value)),
            _ => None,
        }
    }

    fn column_definition(&self, table: &Table, field: &TableField) -> String {
        let mut definition = format!("{} {}", self.q(field.column()), self.dialect.column_type(table, field));
        if field.field.required || field.is_primary_key() {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = self.literal_default(field) {
            definition.push_str(" DEFAULT ");
            definition.push_str(&default);
        }
        if field.is_primary_key() {
            definition.push_str(" PRIMARY KEY");
        } else if field.field.unique {
            definition.push_str(" UNIQUE");
        }
        definition
    }

    fn create_table(&self, table: &Table) -> String {
        let mut lines: Vec<String> = table
            .fields
            .iter()
            .map(|field| self.column_definition(table, field))
            .collect();
        for constraint in &table.unique_constraints {
            let columns: Vec<&str> = constraint
                .fields
                .iter()
                .filter_map(|name| table.field(name).map(TableField::column))
                .collect();
            lines.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                self.q(&constraint.name),
                self.quoted_list(columns)
            ));
        }
        for field in &table.fields {
            if let Some(foreign_key) = &field.foreign_key {
                lines.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    self.q(field.column()),
                    self.q(&foreign_key.table),
                    self.q(&foreign_key.column)
                ));
            }
        }
        let body = lines.iter().map(|line| format!("    {line}")).collect::<Vec<_>>().join(",\n");
        let name = self.q(&table.table_name);
        match self.dialect {
            Dialect::Mssql => format!(
                "IF OBJECT_ID(N'{}', N'U') IS NULL\nCREATE TABLE {name} (\n{body}\n);",
                table.table_name.replace('\'', "''")
            ),
            _ => format!("CREATE TABLE IF NOT EXISTS {name} (\n{body}\n);"),
        }
    }

    fn drop_table(&self, table: &Table) -> String {
        format!("DROP TABLE IF EXISTS {};", self.q(&table.table_name))
    }

    fn create_index(&self, table_name: &str, index_name: &str, columns: &[&str], unique: bool) -> String {
        let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
        let target = format!(
            "{} ON {} ({})",
            self.q(index_name),
            self.q(table_name),
            self.quoted_list(columns.iter().copied())
        );
        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => format!("CREATE {kind} IF NOT EXISTS {target};"),
            Dialect::Mysql => format!("CREATE {kind} {target};"),
            Dialect::Mssql => format!(
                "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = N'{}' AND object_id = OBJECT_ID(N'{}'))\nCREATE {kind} {target};",
                index_name.replace('\'', "''"),
                table_name.replace('\'', "''")
            ),
        }
    }

    fn drop_index(&self, table_name: &str, index_name: &str) -> String {
        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => format!("DROP INDEX IF EXISTS {};", self.q(index_name)),
            Dialect::Mysql => format!("DROP INDEX {} ON {};", self.q(index_name), self.q(table_name)),
            Dialect::Mssql => format!("DROP INDEX IF EXISTS {} ON {};", self.q(index_name), self.q(table_name)),
        }
    }

    /// Added columns are nullable unless a literal default can fill existing rows.
    fn add_column(&self, addition: &TableAddition, field: &TableField) -> String {
        let column = self.q(field.column());
        let mut definition = format!("{column} {}", self.column_type_for_addition(field));
        let default = self.literal_default(field);
        if let Some(default) = &default {
            if field.field.required {
                definition.push_str(" NOT NULL");
            }
            definition.push_str(" DEFAULT ");
            definition.push_str(default);
        }
        let reference = field.foreign_key.as_ref().map(|foreign_key| {
            format!(
                "REFERENCES {} ({})",
                self.q(&foreign_key.table),
                self.q(&foreign_key.column)
            )
        });

        let table = self.q(&addition.table_name);
        match (self.dialect, reference) {
            (Dialect::Postgres, reference) => format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {definition}{};",
                reference.map(|r| format!(" {r}")).unwrap_or_default()
            ),
            (Dialect::Sqlite, reference) => format!(
                "ALTER TABLE {table} ADD COLUMN {definition}{};",
                reference.map(|r| format!(" {r}")).unwrap_or_default()
            ),
            (Dialect::Mysql, Some(reference)) => {
                format!("ALTER TABLE {table} ADD COLUMN {definition}, ADD FOREIGN KEY ({column}) {reference};")
            }
            (Dialect::Mysql, None) => format!("ALTER TABLE {table} ADD COLUMN {definition};"),
            (Dialect::Mssql, reference) => format!(
                "ALTER TABLE {table} ADD {definition}{};",
                reference.map(|r| format!(" {r}")).unwrap_or_default()
            ),
        }
    }

    /// Type for a column added to an existing table; the field counts as keyed
    /// when it is unique or a reference.
    fn column_type_for_addition(&self, field: &TableField) -> &'static str {
        let standalone = Table {
            entity_name: String::new(),
            table_name: String::new(),
            entity_prefix: String::new(),
            fields: vec![field.clone()],
            indexes: Vec::new(),
            unique_constraints: Vec::new(),
            order: 0,
        };
        self.dialect.column_type(&standalone, field)
    }

    fn drop_column(&self, table_name: &str, column: &str) -> String {
        format!("ALTER TABLE {} DROP COLUMN {};", self.q(table_name), self.q(column))
    }
}

/// Full text of a generated migration file: header, wrapped forward script,
/// and the rollback as a commented-out block.
pub fn render_migration_file(migration: &CompiledMigration, description: &str, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("-- consentdb migration\n");
    out.push_str(&format!("-- Generated: {}\n", generated_at.to_rfc3339()));
    out.push_str(&format!("-- Dialect: {}\n", migration.dialect));
    out.push_str(&format!("-- Description: {description}\n\n"));

    if migration.is_empty() {
        out.push_str("-- No changes: the database already matches the schema.\n");
        return out;
    }
    out.push_str(&migration.forward());
    out.push_str("\n-- Rollback (not executed; run manually to revert):\n");
    for line in migration.rollback().lines() {
        if line.is_empty() {
            out.push_str("--\n");
        } else {
            out.push_str(&format!("-- {line}\n"));
        }
    }
    out
}

/// File name `<timestamp>_<slug>.sql` for a migration.
pub fn migration_file_name(description: &str, generated_at: DateTime<Utc>) -> String {
    let slug: String = description
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug = if slug.is_empty() { "migration".to_string() } else { slug };
    format!("{}_{slug}.sql", generated_at.format("%Y%m%d%H%M%S"))
}

/// Introspects a SQL-builder adapter, plans against `schema` and compiles.
pub async fn generate_migration<A>(adapter: &A, schema: &Schema, dialect: Dialect) -> Result<CompiledMigration, MigrationError>
where
    A: Adapter + Introspect,
{
    if adapter.id() != SQL_BUILDER_ID {
        return Err(MigrationError::UnsupportedAdapter {
            adapter: adapter.id().to_string(),
        });
    }
    let live = adapter.introspect().await.map_err(MigrationError::Introspection)?;
    compile(&plan(schema, &live), dialect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::differ::LiveSchema;
    use crate::schema::{
        DefaultConfig, Extension, ExtensionTable, FieldConfig, FieldKind, Options, assemble_schema, entities,
    };
    use chrono::TimeZone;

    fn fresh_plan() -> MigrationPlan {
        let schema = assemble_schema(&Options::default()).unwrap();
        plan(&schema, &LiveSchema::default())
    }

    #[test]
    fn empty_plan_compiles_to_empty_script() {
        for dialect in Dialect::ALL {
            let compiled = compile(&MigrationPlan::default(), dialect).unwrap();
            assert!(compiled.forward().is_empty());
            assert!(compiled.rollback().is_empty());
        }
    }

    #[test]
    fn domain_is_created_before_consent() {
        let sql = compile(&fresh_plan(), Dialect::Postgres).unwrap().forward();
        let domain = sql.find("CREATE TABLE IF NOT EXISTS \"domain\"").expect("domain create");
        let consent = sql.find("CREATE TABLE IF NOT EXISTS \"consent\"").expect("consent create");
        assert!(domain < consent);
        assert!(sql.starts_with("BEGIN;"));
        assert!(sql.trim_end().ends_with("COMMIT;"));
        assert!(sql.contains("FOREIGN KEY (\"domainId\") REFERENCES \"domain\" (\"id\")"));
        assert!(sql.contains("CREATE INDEX IF NOT EXISTS \"consent_subject_idx\" ON \"consent\" (\"subjectId\");"));
    }

    #[test]
    fn types_follow_dialect() {
        let plan = fresh_plan();
        let pg = compile(&plan, Dialect::Postgres).unwrap().forward();
        assert!(pg.contains("\"isVerified\" BOOLEAN NOT NULL DEFAULT TRUE"));
        assert!(pg.contains("\"createdAt\" TIMESTAMPTZ NOT NULL"));
        assert!(pg.contains("\"allowedOrigins\" JSONB"));

        let mssql = compile(&plan, Dialect::Mssql).unwrap().forward();
        assert!(mssql.starts_with("BEGIN TRANSACTION;"));
        assert!(mssql.contains("[isVerified] BIT NOT NULL DEFAULT 1"));
        assert!(mssql.contains("[name] NVARCHAR(255) NOT NULL UNIQUE"));
        assert!(mssql.contains("IF OBJECT_ID(N'domain', N'U') IS NULL"));

        let mysql = compile(&plan, Dialect::Mysql).unwrap().forward();
        assert!(!mysql.contains("BEGIN;"));
        assert!(mysql.contains("`createdAt` DATETIME(3) NOT NULL"));
    }

    #[test]
    fn mysql_defaults_avoid_text_columns() {
        let mysql = compile(&fresh_plan(), Dialect::Mysql).unwrap().forward();
        assert!(mysql.contains("`status` VARCHAR(255) NOT NULL DEFAULT 'active'"));
        assert!(mysql.contains("`withdrawalMethod` VARCHAR(255) NOT NULL DEFAULT 'api'"));
        assert!(mysql.contains("`eventTimezone` VARCHAR(255) NOT NULL DEFAULT 'UTC'"));
        assert!(
            mysql
                .lines()
                .all(|line| !(line.contains(" TEXT") && line.contains("DEFAULT"))),
            "{mysql}"
        );

        let options = Options::default().with_extension(Extension::new("prefs").table(
            entities::SUBJECT,
            ExtensionTable::default().field(
                "preferences",
                FieldConfig::new(FieldKind::Json).default(DefaultConfig::Literal(serde_json::json!({"email": true}))),
            ),
        ));
        let schema = assemble_schema(&options).unwrap();
        let mysql = compile(&plan(&schema, &LiveSchema::default()), Dialect::Mysql)
            .unwrap()
            .forward();
        assert!(mysql.contains("`preferences` JSON DEFAULT ('{\"email\":true}')"), "{mysql}");
    }

    #[test]
    fn rollback_drops_in_reverse_creation_order() {
        let compiled = compile(&fresh_plan(), Dialect::Sqlite).unwrap();
        let first = &compiled.rollback_statements[0];
        let last = compiled.rollback_statements.last().unwrap();
        assert_eq!(first, "DROP TABLE IF EXISTS \"auditLog\";");
        assert!(last.starts_with("DROP TABLE IF EXISTS"));
        let table_drops = compiled.rollback_statements.len();
        assert_eq!(table_drops, 11);
    }

    #[test]
    fn added_columns_are_nullable_without_literal_default() {
        let schema = assemble_schema(&Options::default()).unwrap();
        let domain = schema.table(entities::DOMAIN).unwrap();
        let plan = MigrationPlan {
            to_be_created: Vec::new(),
            to_be_added: vec![TableAddition {
                entity: domain.entity_name.clone(),
                table_name: domain.table_name.clone(),
                fields: vec![
                    domain.field("createdAt").unwrap().clone(),
                    domain.field("isActive").unwrap().clone(),
                ],
            }],
        };
        let compiled = compile(&plan, Dialect::Postgres).unwrap();
        assert_eq!(
            compiled.statements,
            [
                "ALTER TABLE \"domain\" ADD COLUMN IF NOT EXISTS \"createdAt\" TIMESTAMPTZ;",
                "ALTER TABLE \"domain\" ADD COLUMN IF NOT EXISTS \"isActive\" BOOLEAN NOT NULL DEFAULT TRUE;",
            ]
        );
        assert_eq!(
            compiled.rollback_statements,
            [
                "ALTER TABLE \"domain\" DROP COLUMN \"isActive\";",
                "ALTER TABLE \"domain\" DROP COLUMN \"createdAt\";",
            ]
        );
    }

    #[test]
    fn rendered_file_comments_out_rollback() {
        let compiled = compile(&fresh_plan(), Dialect::Sqlite).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let file = render_migration_file(&compiled, "initial schema", at);
        assert!(file.starts_with("-- consentdb migration\n-- Generated: 2024-05-01T12:00:00+00:00\n-- Dialect: sqlite\n"));
        let rollback = file.split("-- Rollback").nth(1).unwrap();
        assert!(rollback.lines().skip(1).all(|line| line.starts_with("--")));
        assert_eq!(migration_file_name("Initial schema!", at), "20240501120000_initial_schema.sql");
    }
}
