//! Target SQL dialects: identifier quoting, type mapping and literals.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::{DefaultValue, FieldKind, Table, TableField};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
    Mssql,
}

#[derive(Debug, Error)]
#[error("unknown dialect `{0}` (expected postgres, mysql, sqlite or mssql)")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "sqlite" => Ok(Dialect::Sqlite),
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [Dialect::Postgres, Dialect::Mysql, Dialect::Sqlite, Dialect::Mssql];

    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::Mssql => "mssql",
        }
    }

    /// Quotes an identifier, doubling any embedded closing quote.
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Mssql => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// MySQL commits implicitly around DDL, so its scripts are not wrapped.
    pub const fn transactional_ddl(self) -> bool {
        !matches!(self, Dialect::Mysql)
    }

    pub const fn begin(self) -> &'static str {
        match self {
            Dialect::Mssql => "BEGIN TRANSACTION;",
            _ => "BEGIN;",
        }
    }

    pub const fn commit(self) -> &'static str {
        match self {
            Dialect::Mssql => "COMMIT TRANSACTION;",
            _ => "COMMIT;",
        }
    }

    /// Column type for `field` in `table`.
    ///
    /// MySQL and SQL Server cannot index unbounded text, so keyed strings get a
    /// bounded type there. MySQL also rejects literal defaults on `TEXT`.
    pub fn column_type(self, table: &Table, field: &TableField) -> &'static str {
        let keyed = table.is_keyed(&field.name);
        let literal_default = matches!(field.field.default_value, Some(DefaultValue::Literal(_)));
        match (field.field.kind, self) {
            (FieldKind::String | FieldKind::Timezone, Dialect::Mysql) if keyed || literal_default => "VARCHAR(255)",
            (FieldKind::String | FieldKind::Timezone, Dialect::Mysql) => "TEXT",
            (FieldKind::String | FieldKind::Timezone, Dialect::Mssql) if keyed => "NVARCHAR(255)",
            (FieldKind::String | FieldKind::Timezone, Dialect::Mssql) => "NVARCHAR(MAX)",
            (FieldKind::String | FieldKind::Timezone, _) => "TEXT",

            (FieldKind::Number, Dialect::Sqlite) => "INTEGER",
            (FieldKind::Number, _) => "BIGINT",

            (FieldKind::Boolean, Dialect::Sqlite) => "INTEGER",
            (FieldKind::Boolean, Dialect::Mssql) => "BIT",
            (FieldKind::Boolean, _) => "BOOLEAN",

            (FieldKind::Date, Dialect::Postgres) => "TIMESTAMPTZ",
            (FieldKind::Date, Dialect::Mysql) => "DATETIME(3)",
            (FieldKind::Date, Dialect::Sqlite) => "DATE",
            (FieldKind::Date, Dialect::Mssql) => "DATETIME2",

            (FieldKind::Json, Dialect::Postgres) => "JSONB",
            (FieldKind::Json, Dialect::Mysql) => "JSON",
            (FieldKind::Json, Dialect::Sqlite) => "TEXT",
            (FieldKind::Json, Dialect::Mssql) => "NVARCHAR(MAX)",
        }
    }

    /// `DEFAULT` expression for a column of `kind`. MySQL only accepts
    /// parenthesized expression defaults on `JSON` columns.
    pub fn default_expression(self, kind: FieldKind, value: &Value) -> String {
        let literal = self.literal(value);
        match (kind, self) {
            (FieldKind::Json, Dialect::Mysql) => format!("({literal})"),
            _ => literal,
        }
    }

    /// SQL literal for a column default.
    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(flag) => match (self, flag) {
                (Dialect::Sqlite | Dialect::Mssql, true) => "1".to_string(),
                (Dialect::Sqlite | Dialect::Mssql, false) => "0".to_string(),
                (_, true) => "TRUE".to_string(),
                (_, false) => "FALSE".to_string(),
            },
            Value::Number(number) => number.to_string(),
            Value::String(text) => self.string_literal(text),
            Value::Array(_) | Value::Object(_) => self.string_literal(&value.to_string()),
        }
    }

    fn string_literal(self, text: &str) -> String {
        let escaped = text.replace('\'', "''");
        match self {
            Dialect::Mssql => format!("N'{escaped}'"),
            _ => format!("'{escaped}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_aliases() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("sqlserver".parse::<Dialect>().unwrap(), Dialect::Mssql);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn quoting_escapes_closing_characters() {
        assert_eq!(Dialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote_ident("a`b"), "`a``b`");
        assert_eq!(Dialect::Mssql.quote_ident("a]b"), "[a]]b]");
    }

    #[test]
    fn literals_follow_dialect() {
        assert_eq!(Dialect::Sqlite.literal(&json!(true)), "1");
        assert_eq!(Dialect::Postgres.literal(&json!(false)), "FALSE");
        assert_eq!(Dialect::Mssql.literal(&json!("it's")), "N'it''s'");
        assert_eq!(Dialect::Mysql.literal(&json!(3)), "3");
    }
}
