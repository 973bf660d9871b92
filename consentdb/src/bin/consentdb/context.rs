use anyhow::{Context, Result};
use consentdb::migration::Dialect;
use consentdb::{Options, Schema, assemble_schema};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "consentdb.toml";

/// Where the CLI runs and what `consentdb.toml` says.
pub struct ProjectContext {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub migrations_dir: PathBuf,
    pub config: ConsentConfig,
}

/// Contents of `consentdb.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub migrations: MigrationSettings,
    /// Entity overrides and extensions, as accepted by schema assembly.
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Default target dialect for generated migrations.
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            dialect: default_dialect(),
        }
    }
}

fn default_database_url() -> String {
    "${DATABASE_URL}".to_string()
}

fn default_dialect() -> Dialect {
    Dialect::Sqlite
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_migrations_dir")]
    pub dir: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

fn default_migrations_dir() -> String {
    "migrations".to_string()
}

impl ProjectContext {
    pub fn find() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    /// Walks up from `start` looking for `consentdb.toml`; without one the
    /// start directory is used with default settings.
    pub fn find_from(start: &Path) -> Result<Self> {
        let root = start
            .ancestors()
            .find(|dir| dir.join(CONFIG_FILE).is_file())
            .unwrap_or(start);
        Self::from_root(root.to_path_buf())
    }

    pub fn from_root(project_root: PathBuf) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        let config = if config_path.is_file() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            log::debug!("no {CONFIG_FILE} found under {}, using defaults", project_root.display());
            ConsentConfig::default()
        };
        let migrations_dir = project_root.join(&config.migrations.dir);

        Ok(Self {
            project_root,
            config_path,
            migrations_dir,
            config,
        })
    }

    pub fn has_config(&self) -> bool {
        self.config_path.is_file()
    }

    /// Database URL with `${VAR}` references expanded.
    pub fn database_url(&self) -> Result<String> {
        expand_vars(&self.config.database.url, |name| std::env::var(name).ok())
    }

    pub fn schema(&self) -> Result<Schema> {
        assemble_schema(&self.config.options).context("Failed to assemble schema from configuration")
    }
}

/// Replaces every `${NAME}` in `value` using `lookup`.
pub fn expand_vars(value: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unterminated variable reference in `{value}`"))?;
        let name = &after[..end];
        let resolved = lookup(name).with_context(|| format!("Environment variable {name} not set"))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_env_and_sqlite() {
        let config = ConsentConfig::default();
        assert_eq!(config.database.url, "${DATABASE_URL}");
        assert_eq!(config.database.dialect, Dialect::Sqlite);
        assert_eq!(config.migrations.dir, "migrations");
    }

    #[test]
    fn expands_embedded_variables() {
        let lookup = |name: &str| (name == "DB_HOST").then(|| "db.internal".to_string());
        assert_eq!(
            expand_vars("postgres://${DB_HOST}:5432/app", lookup).unwrap(),
            "postgres://db.internal:5432/app"
        );
        assert!(expand_vars("${MISSING}", lookup).is_err());
        assert!(expand_vars("${DB_HOST", lookup).is_err());
        assert_eq!(expand_vars("sqlite::memory:", lookup).unwrap(), "sqlite::memory:");
    }

    #[test]
    fn loads_config_and_options_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[database]
url = "sqlite://consent.db"
dialect = "postgres"

[migrations]
dir = "db/migrations"

[options.tables.domain]
entity_name = "domains"
"#,
        )
        .unwrap();

        let nested = dir.path().join("src");
        std::fs::create_dir(&nested).unwrap();
        let ctx = ProjectContext::find_from(&nested).unwrap();
        assert_eq!(ctx.project_root, dir.path());
        assert!(ctx.has_config());
        assert_eq!(ctx.config.database.dialect, Dialect::Postgres);
        assert_eq!(ctx.migrations_dir, dir.path().join("db/migrations"));
        assert_eq!(ctx.database_url().unwrap(), "sqlite://consent.db");

        let schema = ctx.schema().unwrap();
        assert_eq!(schema.table("domain").unwrap().table_name, "domains");
    }
}
