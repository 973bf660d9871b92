use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use consentdb::SqlAdapter;
use consentdb::migration::{
    Dialect, MigrationPlan, generate_migration, migration_file_name, plan_migration, render_migration_file,
};
use serde::Serialize;

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::OutputManager;
use crate::theme::ICONS;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Preview Changes",
        commands: &["consentdb migrate plan                       # Tables and columns the database is missing"],
    },
    ExampleGroup {
        title: "Generate Migrations",
        commands: &[
            "consentdb migrate generate                   # Write SQL for the configured dialect",
            "consentdb migrate generate --dialect mssql   # Target SQL Server",
            "consentdb migrate generate --out schema.sql  # Choose the output file",
        ],
    },
    ExampleGroup {
        title: "Deploy Migrations",
        commands: &[
            "consentdb migrate deploy                     # Apply pending changes to the database",
            "consentdb migrate deploy --dry-run           # Print the SQL without running it",
        ],
    },
];

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Compare the schema with the database and list missing tables and columns
    #[command(name = "plan")]
    Plan,

    /// Write a SQL migration file for the pending changes
    #[command(name = "generate")]
    Generate {
        /// Target dialect (postgres, mysql, sqlite, mssql); defaults to consentdb.toml
        #[arg(long, value_parser = parse_dialect)]
        dialect: Option<Dialect>,

        /// Output file; defaults to <migrations dir>/<timestamp>_<description>.sql
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Description recorded in the file header
        #[arg(short, long, default_value = "schema update")]
        description: String,
    },

    /// Apply pending changes directly to the configured SQLite database
    #[command(name = "deploy")]
    Deploy {
        /// Print the SQL without executing it
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_dialect(value: &str) -> Result<Dialect, consentdb::migration::UnknownDialect> {
    value.parse()
}

pub async fn handle_migrate_commands(command: MigrateCommands, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;

    match command {
        MigrateCommands::Plan => handle_plan(&ctx, output).await,
        MigrateCommands::Generate {
            dialect,
            out,
            description,
        } => {
            let dialect = dialect.unwrap_or(ctx.config.database.dialect);
            handle_generate(&ctx, dialect, out.as_deref(), &description, output).await
        }
        MigrateCommands::Deploy { dry_run } => handle_deploy(&ctx, dry_run, output).await,
    }
}

async fn connect(ctx: &ProjectContext, output: &OutputManager) -> Result<SqlAdapter> {
    let url = ctx
        .database_url()
        .context("Set [database] url in consentdb.toml or export DATABASE_URL")?;
    output.verbose(&format!("database: {url}"));
    output.progress("Connecting to database");
    let adapter = SqlAdapter::connect(&url, Arc::new(ctx.schema()?))
        .await
        .context("Failed to connect to database")?;
    output.clear_line();
    output.success("Connected to database");
    Ok(adapter)
}

#[derive(Serialize)]
struct PlanSummary {
    create: Vec<String>,
    add: Vec<(String, Vec<String>)>,
}

impl From<&MigrationPlan> for PlanSummary {
    fn from(plan: &MigrationPlan) -> Self {
        Self {
            create: plan.to_be_created.iter().map(|table| table.table_name.clone()).collect(),
            add: plan
                .to_be_added
                .iter()
                .map(|addition| {
                    let columns = addition.fields.iter().map(|field| field.column().to_string()).collect();
                    (addition.table_name.clone(), columns)
                })
                .collect(),
        }
    }
}

async fn handle_plan(ctx: &ProjectContext, output: &OutputManager) -> Result<()> {
    output.heading("Migration Plan");
    let adapter = connect(ctx, output).await?;
    let schema = ctx.schema()?;
    let plan = plan_migration(&schema, &adapter)
        .await
        .context("Failed to introspect database")?;

    if output.is_json() {
        println!("{}", serde_json::to_string_pretty(&PlanSummary::from(&plan))?);
        return Ok(());
    }
    if plan.is_empty() {
        output.success("Database is up to date");
        return Ok(());
    }

    for table in &plan.to_be_created {
        output.bullet(&format!("{} create table {} ({} columns)", ICONS.plus, table.table_name, table.fields.len()));
    }
    for addition in &plan.to_be_added {
        for field in &addition.fields {
            output.bullet(&format!(
                "{} add column {}.{} ({})",
                ICONS.plus,
                addition.table_name,
                field.column(),
                field.field.kind
            ));
        }
    }
    output.info("Run 'consentdb migrate generate' to write the SQL");
    Ok(())
}

async fn handle_generate(
    ctx: &ProjectContext,
    dialect: Dialect,
    out: Option<&Path>,
    description: &str,
    output: &OutputManager,
) -> Result<()> {
    output.heading(&format!("Generate Migration ({dialect})"));
    let adapter = connect(ctx, output).await?;
    let schema = ctx.schema()?;
    let migration = generate_migration(&adapter, &schema, dialect)
        .await
        .context("Failed to generate migration")?;

    if migration.is_empty() {
        output.success("No changes: the database already matches the schema");
        return Ok(());
    }

    let generated_at = Utc::now();
    let path = match out {
        Some(path) => path.to_path_buf(),
        None => ctx.migrations_dir.join(migration_file_name(description, generated_at)),
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&path, render_migration_file(&migration, description, generated_at))
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    output.success(&format!("Wrote {} statement(s) to {}", migration.statements.len(), path.display()));
    output.info("Review the file, then apply it with your deployment tooling");
    Ok(())
}

async fn handle_deploy(ctx: &ProjectContext, dry_run: bool, output: &OutputManager) -> Result<()> {
    output.heading("Deploy Migration");
    let adapter = connect(ctx, output).await?;
    let schema = ctx.schema()?;
    let migration = generate_migration(&adapter, &schema, adapter.dialect())
        .await
        .context("Failed to generate migration")?;

    if migration.is_empty() {
        output.success("Database is up to date");
        return Ok(());
    }

    if dry_run {
        output.sql(&migration.forward());
        output.warning("DRY RUN - no changes were made");
        return Ok(());
    }

    output.progress("Applying migration");
    adapter
        .apply_migration(&migration)
        .await
        .context("Migration failed; no changes were committed")?;
    output.clear_line();
    output.success(&format!("Applied {} statement(s)", migration.statements.len()));
    Ok(())
}
