//! Redis backend: one JSON document per row plus an id index per table.
//!
//! Unique fields are reserved with `SET NX` keys. Transactions serialize on a
//! store-wide lock key and journal the prior state of every key they touch;
//! a failed transaction replays the journal in reverse before the lock is
//! released. Id sequences are not rolled back, so ordering may skip values.

use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};

use redis::Script;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::errors::AdapterError;
use crate::id::generate_id;
use crate::keys::KeyContext;
use crate::query::{FindMany, Record, Where, matches_all};
use crate::schema::{PRIMARY_KEY, Schema, Table};

use super::Adapter;
use super::mapping::{self, from_storage, resolve, to_storage};

pub const REDIS_ID: &str = "redis";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_TTL_MS: u64 = 30_000;
const LOCK_RETRY: Duration = Duration::from_millis(25);
const SCAN_COUNT: usize = 1000;

const RELEASE_LOCK_SCRIPT_BODY: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

static RELEASE_LOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(RELEASE_LOCK_SCRIPT_BODY));

#[derive(Clone)]
pub struct RedisAdapter {
    conn: ConnectionManager,
    prefix: String,
    schema: Arc<Schema>,
    lock_timeout: Duration,
    /// Set on the handle passed to a transaction callback.
    journal: Option<Arc<Mutex<Vec<Undo>>>>,
}

/// Prior state of one key touched inside a transaction.
#[derive(Debug)]
enum Undo {
    Key { key: String, previous: Option<String> },
    Member { key: String, member: String, previous: Option<f64> },
}

impl RedisAdapter {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            schema,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            journal: None,
        }
    }

    pub async fn connect(url: &str, prefix: impl Into<String>, schema: Arc<Schema>) -> Result<Self, AdapterError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix, schema))
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.prefix)
    }

    /// Deletes every key under this adapter's prefix (SCAN + DEL).
    pub async fn clear(&self) -> Result<u64, AdapterError> {
        let mut conn = self.conn.clone();
        let pattern = self.keys().pattern();
        let mut cursor: u64 = 0;
        let mut total_deleted: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                total_deleted += deleted;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(total_deleted)
    }

    fn record_undo(&self, undo: Undo) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap_or_else(PoisonError::into_inner).push(undo);
        }
    }

    /// Journals the current value of each key before it is overwritten or deleted.
    async fn snapshot_keys(&self, keys: &[String]) -> Result<(), AdapterError> {
        if self.journal.is_none() || keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let previous: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        for (key, previous) in keys.iter().zip(previous) {
            self.record_undo(Undo::Key {
                key: key.clone(),
                previous,
            });
        }
        Ok(())
    }

    async fn snapshot_member(&self, key: &str, member: &str) -> Result<(), AdapterError> {
        if self.journal.is_none() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let previous: Option<f64> = redis::cmd("ZSCORE").arg(key).arg(member).query_async(&mut conn).await?;
        self.record_undo(Undo::Member {
            key: key.to_string(),
            member: member.to_string(),
            previous,
        });
        Ok(())
    }

    /// Restores journaled keys, newest first. Keeps going past individual failures.
    async fn roll_back(&self, journal: Vec<Undo>) {
        let mut conn = self.conn.clone();
        for undo in journal.into_iter().rev() {
            let restored: Result<(), redis::RedisError> = match &undo {
                Undo::Key { key, previous: Some(value) } => {
                    redis::cmd("SET").arg(key).arg(value).query_async(&mut conn).await
                }
                Undo::Key { key, previous: None } => redis::cmd("DEL").arg(key).query_async(&mut conn).await,
                Undo::Member {
                    key,
                    member,
                    previous: Some(score),
                } => redis::cmd("ZADD").arg(key).arg(*score).arg(member).query_async(&mut conn).await,
                Undo::Member {
                    key,
                    member,
                    previous: None,
                } => redis::cmd("ZREM").arg(key).arg(member).query_async(&mut conn).await,
            };
            if let Err(err) = restored {
                log::warn!("failed to roll back {undo:?}: {err}");
            }
        }
    }

    /// Every row of `table` in insertion order, logical form.
    async fn load(&self, table: &Table) -> Result<Vec<Record>, AdapterError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("ZRANGE")
            .arg(self.keys().ids(&table.table_name))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let record_keys: Vec<String> = ids.iter().map(|id| self.keys().record(&table.table_name, id)).collect();
        let documents: Vec<Option<String>> = redis::cmd("MGET").arg(&record_keys).query_async(&mut conn).await?;
        documents
            .into_iter()
            .flatten()
            .map(|document| {
                let row: Record = serde_json::from_str(&document)?;
                from_storage(table, row)
            })
            .collect()
    }

    async fn matching(&self, table: &Table, conditions: &[Where]) -> Result<Vec<Record>, AdapterError> {
        mapping::storage_conditions(table, conditions)?;
        Ok(self
            .load(table)
            .await?
            .into_iter()
            .filter(|record| matches_all(conditions, record))
            .collect())
    }

    /// Reservation keys for every unique field and constraint `record` fills.
    fn unique_keys(&self, table: &Table, record: &Record) -> Vec<(String, String)> {
        let mut keys = Vec::new();
        for field in table.fields.iter().filter(|field| field.field.unique && !field.is_primary_key()) {
            if let Some(value) = record.get(&field.name).filter(|value| !value.is_null()) {
                keys.push((
                    field.name.clone(),
                    self.keys().unique(&table.table_name, field.column(), &value_key(value)),
                ));
            }
        }
        for constraint in &table.unique_constraints {
            let values: Option<Vec<String>> = constraint
                .fields
                .iter()
                .map(|name| record.get(name).filter(|value| !value.is_null()).map(value_key))
                .collect();
            if let Some(values) = values {
                keys.push((
                    constraint.name.clone(),
                    self.keys().unique(&table.table_name, &constraint.name, &values.join("|")),
                ));
            }
        }
        keys
    }

    /// Claims `keys` for `id`, releasing any partial claim on conflict.
    async fn reserve(&self, table: &Table, id: &str, keys: &[(String, String)]) -> Result<(), AdapterError> {
        let mut conn = self.conn.clone();
        let mut claimed: Vec<&str> = Vec::new();
        for (name, key) in keys {
            let set: Option<String> = redis::cmd("SET").arg(key).arg(id).arg("NX").query_async(&mut conn).await?;
            if set.is_some() {
                claimed.push(key);
                continue;
            }
            let holder: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            match holder {
                Some(holder) if holder != id => {
                    if !claimed.is_empty() {
                        let _: u64 = redis::cmd("DEL").arg(&claimed).query_async(&mut conn).await?;
                    }
                    return Err(AdapterError::UniqueConstraintViolation {
                        model: table.entity_name.clone(),
                        field: name.clone(),
                        existing_id: holder,
                    });
                }
                _ => {}
            }
        }
        for key in claimed {
            self.record_undo(Undo::Key {
                key: key.to_string(),
                previous: None,
            });
        }
        Ok(())
    }

    async fn write(&self, table: &Table, id: &str, record: Record, is_new: bool) -> Result<Record, AdapterError> {
        let mut conn = self.conn.clone();
        let row = to_storage(table, record)?;
        let document = serde_json::to_string(&row)?;
        let record_key = self.keys().record(&table.table_name, id);
        self.snapshot_keys(std::slice::from_ref(&record_key)).await?;
        let _: () = redis::cmd("SET").arg(&record_key).arg(document).query_async(&mut conn).await?;
        if is_new {
            let sequence: u64 = redis::cmd("INCR")
                .arg(self.keys().sequence(&table.table_name))
                .query_async(&mut conn)
                .await?;
            let ids_key = self.keys().ids(&table.table_name);
            self.snapshot_member(&ids_key, id).await?;
            let _: u64 = redis::cmd("ZADD")
                .arg(&ids_key)
                .arg(sequence)
                .arg(id)
                .query_async(&mut conn)
                .await?;
        }
        from_storage(table, row)
    }

    async fn update_rows(
        &self,
        model: &str,
        conditions: &[Where],
        data: Record,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, AdapterError> {
        let table = resolve(&self.schema, model)?;
        let targets = self.matching(table, conditions).await?;
        let mut updated = Vec::new();
        for current in targets.into_iter().take(limit.unwrap_or(usize::MAX)) {
            let id = mapping::record_id(model, &current)?;
            let mut next = current.clone();
            next.extend(data.clone());

            let old_keys = self.unique_keys(table, &current);
            let new_keys = self.unique_keys(table, &next);
            self.reserve(table, &id, &new_keys).await?;
            let stale: Vec<String> = old_keys
                .into_iter()
                .filter(|old| !new_keys.iter().any(|new| new.1 == old.1))
                .map(|(_, key)| key)
                .collect();
            if !stale.is_empty() {
                self.snapshot_keys(&stale).await?;
                let mut conn = self.conn.clone();
                let _: u64 = redis::cmd("DEL").arg(&stale).query_async(&mut conn).await?;
            }
            updated.push(self.write(table, &id, next, false).await?);
        }
        Ok(updated)
    }

    async fn acquire_lock(&self) -> Result<(String, String), AdapterError> {
        let key = self.keys().transaction_lock();
        let token = generate_id("tx");
        let started = Instant::now();
        let mut conn = self.conn.clone();
        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL_MS)
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok((key, token));
            }
            if started.elapsed() >= self.lock_timeout {
                return Err(AdapterError::LockTimeout { key });
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<(), AdapterError> {
        let mut conn = self.conn.clone();
        let mut invocation = RELEASE_LOCK_SCRIPT.prepare_invoke();
        invocation.key(key).arg(token);
        let released: i64 = invocation.invoke_async(&mut conn).await?;
        if released == 0 {
            log::warn!("transaction lock `{key}` expired before release");
        }
        Ok(())
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl Adapter for RedisAdapter {
    type Tx = RedisAdapter;

    fn id(&self) -> &str {
        REDIS_ID
    }

    async fn find_one(&self, model: &str, conditions: &[Where]) -> Result<Option<Record>, AdapterError> {
        let table = resolve(&self.schema, model)?;
        Ok(self.matching(table, conditions).await?.into_iter().next())
    }

    async fn find_many(&self, model: &str, query: &FindMany) -> Result<Vec<Record>, AdapterError> {
        let table = resolve(&self.schema, model)?;
        Ok(query.apply_window(self.matching(table, &query.conditions).await?))
    }

    async fn count(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let table = resolve(&self.schema, model)?;
        Ok(self.matching(table, conditions).await?.len() as u64)
    }

    async fn create(&self, model: &str, data: Record) -> Result<Option<Record>, AdapterError> {
        let table = resolve(&self.schema, model)?;
        let id = mapping::record_id(model, &data)?;
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.keys().record(&table.table_name, &id))
            .query_async(&mut conn)
            .await?;
        if exists {
            return Err(AdapterError::UniqueConstraintViolation {
                model: model.to_string(),
                field: PRIMARY_KEY.to_string(),
                existing_id: id,
            });
        }
        self.reserve(table, &id, &self.unique_keys(table, &data)).await?;
        Ok(Some(self.write(table, &id, data, true).await?))
    }

    async fn update(&self, model: &str, conditions: &[Where], data: Record) -> Result<Option<Record>, AdapterError> {
        Ok(self.update_rows(model, conditions, data, Some(1)).await?.into_iter().next())
    }

    async fn update_many(&self, model: &str, conditions: &[Where], data: Record) -> Result<u64, AdapterError> {
        Ok(self.update_rows(model, conditions, data, None).await?.len() as u64)
    }

    async fn delete_many(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let table = resolve(&self.schema, model)?;
        let doomed = self.matching(table, conditions).await?;
        let mut conn = self.conn.clone();
        for record in &doomed {
            let id = mapping::record_id(model, record)?;
            let mut keys: Vec<String> = self.unique_keys(table, record).into_iter().map(|(_, key)| key).collect();
            keys.push(self.keys().record(&table.table_name, &id));
            let ids_key = self.keys().ids(&table.table_name);
            self.snapshot_keys(&keys).await?;
            self.snapshot_member(&ids_key, &id).await?;
            let _: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
            let _: u64 = redis::cmd("ZREM")
                .arg(&ids_key)
                .arg(&id)
                .query_async(&mut conn)
                .await?;
        }
        Ok(doomed.len() as u64)
    }

    async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&Self::Tx) -> Result<T, E>,
        E: From<AdapterError>,
    {
        if self.journal.is_some() {
            return f(self).await;
        }
        let (key, token) = self.acquire_lock().await?;
        let journal = Arc::new(Mutex::new(Vec::new()));
        let scope = RedisAdapter {
            journal: Some(Arc::clone(&journal)),
            ..self.clone()
        };
        let result = f(&scope).await;
        drop(scope);
        if result.is_err() {
            let entries = std::mem::take(&mut *journal.lock().unwrap_or_else(PoisonError::into_inner));
            log::debug!("redis transaction failed; restoring {} journaled keys", entries.len());
            self.roll_back(entries).await;
        }
        if let Err(err) = self.release_lock(&key, &token).await {
            log::warn!("failed to release transaction lock: {err}");
        }
        result
    }
}
