//! SQL-builder backend over SQLite (`sqlx`).
//!
//! Every operation renders a parameterized statement with `QueryBuilder`;
//! only identifiers are spliced in, always quoted.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, Transaction, ValueRef};
use tokio::sync::Mutex;

use crate::errors::{AdapterError, MigrationError};
use crate::migration::{CompiledMigration, Dialect, Introspect, LiveColumn, LiveSchema, LiveTable};
use crate::query::{FindMany, Operator, Record, Where};
use crate::schema::{FieldKind, PRIMARY_KEY, Schema, Table, TableField};

use super::mapping::{self, StorageCondition, from_storage, resolve, to_storage};
use super::{Adapter, SQL_BUILDER_ID};

const DIALECT: Dialect = Dialect::Sqlite;
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

fn quote(ident: &str) -> String {
    DIALECT.quote_ident(ident)
}

#[derive(Debug, Clone)]
pub struct SqlAdapter {
    pool: SqlitePool,
    schema: Arc<Schema>,
}

impl SqlAdapter {
    pub fn new(pool: SqlitePool, schema: Arc<Schema>) -> Self {
        Self { pool, schema }
    }

    pub async fn connect(url: &str, schema: Arc<Schema>) -> Result<Self, AdapterError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        log::debug!("connected sql-builder adapter to {url}");
        Ok(Self::new(pool, schema))
    }

    /// Private in-memory database. A single never-recycled connection keeps it alive.
    pub async fn in_memory(schema: Arc<Schema>) -> Result<Self, AdapterError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        DIALECT
    }

    /// Executes a compiled migration in one transaction.
    pub async fn apply_migration(&self, migration: &CompiledMigration) -> Result<(), MigrationError> {
        if migration.dialect != DIALECT {
            return Err(MigrationError::DialectMismatch {
                expected: migration.dialect.to_string(),
                actual: DIALECT.to_string(),
            });
        }
        let apply = async {
            let mut tx = self.pool.begin().await?;
            for statement in &migration.statements {
                log::debug!("applying: {statement}");
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            tx.commit().await
        };
        apply.await.map_err(|err| MigrationError::Apply(AdapterError::from(err)))?;
        log::info!("applied {} migration statements", migration.statements.len());
        Ok(())
    }
}

impl Introspect for SqlAdapter {
    async fn introspect(&self) -> Result<LiveSchema, AdapterError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let rows = sqlx::query(&format!("PRAGMA table_info({})", quote(&name)))
                .fetch_all(&self.pool)
                .await?;
            let columns = rows
                .iter()
                .map(|row| {
                    Ok(LiveColumn {
                        name: row.try_get("name")?,
                        data_type: row.try_get("type")?,
                        nullable: row.try_get::<i64, _>("notnull")? == 0,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?;
            tables.push(LiveTable { name, columns });
        }
        Ok(LiveSchema { tables })
    }
}

impl Adapter for SqlAdapter {
    type Tx = SqlTx;

    fn id(&self) -> &str {
        SQL_BUILDER_ID
    }

    async fn find_one(&self, model: &str, conditions: &[Where]) -> Result<Option<Record>, AdapterError> {
        let mut conn = self.pool.acquire().await?;
        find_one(&mut conn, &self.schema, model, conditions).await
    }

    async fn find_many(&self, model: &str, query: &FindMany) -> Result<Vec<Record>, AdapterError> {
        let mut conn = self.pool.acquire().await?;
        select(&mut conn, resolve(&self.schema, model)?, query).await
    }

    async fn count(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let mut conn = self.pool.acquire().await?;
        count(&mut conn, resolve(&self.schema, model)?, conditions).await
    }

    async fn create(&self, model: &str, data: Record) -> Result<Option<Record>, AdapterError> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, resolve(&self.schema, model)?, data).await
    }

    async fn update(&self, model: &str, conditions: &[Where], data: Record) -> Result<Option<Record>, AdapterError> {
        let mut conn = self.pool.acquire().await?;
        update_first(&mut conn, &self.schema, model, conditions, data).await
    }

    async fn update_many(&self, model: &str, conditions: &[Where], data: Record) -> Result<u64, AdapterError> {
        let mut conn = self.pool.acquire().await?;
        update_all(&mut conn, resolve(&self.schema, model)?, conditions, data).await
    }

    async fn delete_many(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let mut conn = self.pool.acquire().await?;
        delete(&mut conn, resolve(&self.schema, model)?, conditions).await
    }

    async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&Self::Tx) -> Result<T, E>,
        E: From<AdapterError>,
    {
        // IMMEDIATE takes the write lock up front; a concurrent scope waits on
        // the busy timeout rather than failing its lock upgrade.
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(AdapterError::from)?;
        let scope = SqlTx {
            tx: Mutex::new(tx),
            schema: Arc::clone(&self.schema),
        };
        let result = f(&scope).await;
        let tx = scope.tx.into_inner();
        match result {
            Ok(value) => {
                tx.commit().await.map_err(AdapterError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    log::warn!("rollback failed: {rollback}");
                }
                Err(err)
            }
        }
    }
}

/// Open database transaction handed to [`SqlAdapter::transaction`] callbacks.
pub struct SqlTx {
    tx: Mutex<Transaction<'static, Sqlite>>,
    schema: Arc<Schema>,
}

impl Adapter for SqlTx {
    type Tx = SqlTx;

    fn id(&self) -> &str {
        SQL_BUILDER_ID
    }

    async fn find_one(&self, model: &str, conditions: &[Where]) -> Result<Option<Record>, AdapterError> {
        let mut tx = self.tx.lock().await;
        find_one(&mut tx, &self.schema, model, conditions).await
    }

    async fn find_many(&self, model: &str, query: &FindMany) -> Result<Vec<Record>, AdapterError> {
        let mut tx = self.tx.lock().await;
        select(&mut tx, resolve(&self.schema, model)?, query).await
    }

    async fn count(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let mut tx = self.tx.lock().await;
        count(&mut tx, resolve(&self.schema, model)?, conditions).await
    }

    async fn create(&self, model: &str, data: Record) -> Result<Option<Record>, AdapterError> {
        let mut tx = self.tx.lock().await;
        insert(&mut tx, resolve(&self.schema, model)?, data).await
    }

    async fn update(&self, model: &str, conditions: &[Where], data: Record) -> Result<Option<Record>, AdapterError> {
        let mut tx = self.tx.lock().await;
        update_first(&mut tx, &self.schema, model, conditions, data).await
    }

    async fn update_many(&self, model: &str, conditions: &[Where], data: Record) -> Result<u64, AdapterError> {
        let mut tx = self.tx.lock().await;
        update_all(&mut tx, resolve(&self.schema, model)?, conditions, data).await
    }

    async fn delete_many(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let mut tx = self.tx.lock().await;
        delete(&mut tx, resolve(&self.schema, model)?, conditions).await
    }

    async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&Self::Tx) -> Result<T, E>,
        E: From<AdapterError>,
    {
        f(self).await
    }
}

async fn find_one(
    conn: &mut SqliteConnection,
    schema: &Schema,
    model: &str,
    conditions: &[Where],
) -> Result<Option<Record>, AdapterError> {
    let query = FindMany::new(conditions.to_vec()).limit(1);
    Ok(select(conn, resolve(schema, model)?, &query).await?.into_iter().next())
}

async fn select(conn: &mut SqliteConnection, table: &Table, query: &FindMany) -> Result<Vec<Record>, AdapterError> {
    let conditions = mapping::storage_conditions(table, &query.conditions)?;
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
    push_columns(&mut qb, table);
    qb.push(" FROM ").push(quote(&table.table_name));
    push_where(&mut qb, &conditions);

    if let Some(sort) = &query.sort_by {
        let column = mapping::field(table, &sort.field)?.column().to_string();
        qb.push(" ORDER BY ")
            .push(quote(&column))
            .push(" ")
            .push(sort.direction.as_sql())
            .push(" NULLS LAST");
    }
    match (query.limit, query.offset) {
        (Some(limit), offset) => {
            qb.push(" LIMIT ").push_bind(limit as i64);
            if let Some(offset) = offset {
                qb.push(" OFFSET ").push_bind(offset as i64);
            }
        }
        (None, Some(offset)) => {
            qb.push(" LIMIT -1 OFFSET ").push_bind(offset as i64);
        }
        (None, None) => {}
    }

    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(|row| decode_row(table, row)).collect()
}

async fn count(conn: &mut SqliteConnection, table: &Table, conditions: &[Where]) -> Result<u64, AdapterError> {
    let conditions = mapping::storage_conditions(table, conditions)?;
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM ");
    qb.push(quote(&table.table_name));
    push_where(&mut qb, &conditions);
    let total: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
    Ok(total.max(0) as u64)
}

async fn insert(conn: &mut SqliteConnection, table: &Table, data: Record) -> Result<Option<Record>, AdapterError> {
    let row = to_storage(table, data)?;
    if row.is_empty() {
        return Ok(None);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ");
    qb.push(quote(&table.table_name)).push(" (");
    for (position, column) in row.keys().enumerate() {
        if position > 0 {
            qb.push(", ");
        }
        qb.push(quote(column));
    }
    qb.push(") VALUES (");
    for (position, value) in row.into_iter().map(|(_, value)| value).enumerate() {
        if position > 0 {
            qb.push(", ");
        }
        push_value(&mut qb, value);
    }
    qb.push(") RETURNING ");
    push_columns(&mut qb, table);

    let returned = qb.build().fetch_optional(&mut *conn).await?;
    returned.map(|row| decode_row(table, &row)).transpose()
}

async fn update_first(
    conn: &mut SqliteConnection,
    schema: &Schema,
    model: &str,
    conditions: &[Where],
    data: Record,
) -> Result<Option<Record>, AdapterError> {
    let table = resolve(schema, model)?;
    if data.is_empty() {
        return find_one(conn, schema, model, conditions).await;
    }
    let storage = mapping::storage_conditions(table, conditions)?;
    let pk = quote(primary_key_column(table));

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
    qb.push(quote(&table.table_name));
    push_assignments(&mut qb, table, data)?;
    qb.push(" WHERE ")
        .push(&pk)
        .push(" IN (SELECT ")
        .push(&pk)
        .push(" FROM ")
        .push(quote(&table.table_name));
    push_where(&mut qb, &storage);
    qb.push(" LIMIT 1) RETURNING ");
    push_columns(&mut qb, table);

    let returned = qb.build().fetch_optional(&mut *conn).await?;
    returned.map(|row| decode_row(table, &row)).transpose()
}

async fn update_all(
    conn: &mut SqliteConnection,
    table: &Table,
    conditions: &[Where],
    data: Record,
) -> Result<u64, AdapterError> {
    if data.is_empty() {
        return count(conn, table, conditions).await;
    }
    let storage = mapping::storage_conditions(table, conditions)?;
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
    qb.push(quote(&table.table_name));
    push_assignments(&mut qb, table, data)?;
    push_where(&mut qb, &storage);
    Ok(qb.build().execute(&mut *conn).await?.rows_affected())
}

async fn delete(conn: &mut SqliteConnection, table: &Table, conditions: &[Where]) -> Result<u64, AdapterError> {
    let storage = mapping::storage_conditions(table, conditions)?;
    let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM ");
    qb.push(quote(&table.table_name));
    push_where(&mut qb, &storage);
    Ok(qb.build().execute(&mut *conn).await?.rows_affected())
}

fn primary_key_column(table: &Table) -> &str {
    table.primary_key().map(TableField::column).unwrap_or(PRIMARY_KEY)
}

fn push_columns(qb: &mut QueryBuilder<'_, Sqlite>, table: &Table) {
    for (position, column) in table.columns().into_iter().enumerate() {
        if position > 0 {
            qb.push(", ");
        }
        qb.push(quote(column));
    }
}

fn push_assignments(qb: &mut QueryBuilder<'_, Sqlite>, table: &Table, data: Record) -> Result<(), AdapterError> {
    qb.push(" SET ");
    for (position, (column, value)) in to_storage(table, data)?.into_iter().enumerate() {
        if position > 0 {
            qb.push(", ");
        }
        qb.push(quote(&column)).push(" = ");
        push_value(qb, value);
    }
    Ok(())
}

fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, conditions: &[StorageCondition<'_>]) {
    for (position, condition) in conditions.iter().enumerate() {
        qb.push(if position == 0 { " WHERE " } else { " AND " });
        push_condition(qb, condition);
    }
}

fn push_condition(qb: &mut QueryBuilder<'_, Sqlite>, condition: &StorageCondition<'_>) {
    let column = quote(condition.column());
    let value = condition.value.clone();
    match condition.operator {
        // IS / IS NOT compare NULL like any other value
        Operator::Eq => {
            qb.push(&column).push(" IS ");
            push_value(qb, value);
        }
        Operator::Ne => {
            qb.push(&column).push(" IS NOT ");
            push_value(qb, value);
        }
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            let symbol = match condition.operator {
                Operator::Lt => " < ",
                Operator::Lte => " <= ",
                Operator::Gt => " > ",
                _ => " >= ",
            };
            qb.push(&column).push(symbol);
            push_value(qb, value);
        }
        Operator::In => match value {
            Value::Array(values) if !values.is_empty() => {
                qb.push(&column).push(" IN (");
                for (position, value) in values.into_iter().enumerate() {
                    if position > 0 {
                        qb.push(", ");
                    }
                    push_value(qb, value);
                }
                qb.push(")");
            }
            _ => {
                qb.push("0");
            }
        },
        Operator::Contains if condition.field.field.kind == FieldKind::Json => {
            qb.push("EXISTS (SELECT 1 FROM json_each(")
                .push(&column)
                .push(") WHERE json_each.value = ");
            push_value(qb, value);
            qb.push(")");
        }
        Operator::Contains => {
            qb.push("instr(").push(&column).push(", ");
            push_value(qb, value);
            qb.push(") > 0");
        }
        Operator::StartsWith => {
            qb.push("instr(").push(&column).push(", ");
            push_value(qb, value);
            qb.push(") = 1");
        }
        Operator::EndsWith => {
            qb.push("substr(").push(&column).push(", -length(");
            push_value(qb, value.clone());
            qb.push(")) = ");
            push_value(qb, value);
        }
        Operator::Ilike => {
            qb.push("lower(").push(&column).push(") LIKE lower(");
            push_value(qb, value);
            qb.push(")");
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(flag) => {
            qb.push_bind(flag);
        }
        Value::Number(number) => match number.as_i64() {
            Some(integer) => {
                qb.push_bind(integer);
            }
            None => {
                qb.push_bind(number.as_f64().unwrap_or_default());
            }
        },
        Value::String(text) => {
            qb.push_bind(text);
        }
        other => {
            qb.push_bind(other.to_string());
        }
    }
}

fn decode_row(table: &Table, row: &SqliteRow) -> Result<Record, AdapterError> {
    let mut physical = Record::new();
    for field in &table.fields {
        physical.insert(field.column().to_string(), decode_column(row, field)?);
    }
    from_storage(table, physical)
}

fn decode_column(row: &SqliteRow, field: &TableField) -> Result<Value, AdapterError> {
    let column = field.column();
    if row.try_get_raw(column)?.is_null() {
        return Ok(Value::Null);
    }
    let value = match field.field.kind {
        FieldKind::Boolean => Value::Bool(row.try_get::<bool, _>(column)?),
        FieldKind::Number => match row.try_get::<i64, _>(column) {
            Ok(integer) => Value::from(integer),
            Err(_) => Value::from(row.try_get::<f64, _>(column)?),
        },
        FieldKind::Json | FieldKind::String | FieldKind::Date | FieldKind::Timezone => {
            Value::String(row.try_get::<String, _>(column)?)
        }
    };
    Ok(value)
}
