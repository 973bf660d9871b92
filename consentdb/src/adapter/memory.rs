//! In-process backend.
//!
//! Rows are kept in their physical (column-named, transformed) form so the
//! mapping layer is exercised exactly as with a real database.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::AdapterError;
use crate::query::{FindMany, Record, Where, matches_all};
use crate::schema::{Schema, Table};

use super::Adapter;
use super::mapping::{self, from_storage, resolve, to_storage};

pub const MEMORY_ID: &str = "memory";

/// Physical rows per table name, in insertion order.
#[derive(Debug, Clone, Default)]
struct MemoryStore {
    tables: BTreeMap<String, Vec<Record>>,
}

impl MemoryStore {
    /// Logical form of every row in `table` paired with its position.
    fn logical_rows(&self, table: &Table) -> Result<Vec<(usize, Record)>, AdapterError> {
        self.tables
            .get(&table.table_name)
            .map(|rows| {
                rows.iter()
                    .enumerate()
                    .map(|(index, row)| Ok((index, from_storage(table, row.clone())?)))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn matching(&self, table: &Table, conditions: &[Where]) -> Result<Vec<(usize, Record)>, AdapterError> {
        mapping::storage_conditions(table, conditions)?;
        Ok(self
            .logical_rows(table)?
            .into_iter()
            .filter(|(_, record)| matches_all(conditions, record))
            .collect())
    }

    fn find_many(&self, schema: &Schema, model: &str, query: &FindMany) -> Result<Vec<Record>, AdapterError> {
        let table = resolve(schema, model)?;
        let rows = self.matching(table, &query.conditions)?;
        Ok(query.apply_window(rows.into_iter().map(|(_, record)| record).collect()))
    }

    fn create(&mut self, schema: &Schema, model: &str, data: Record) -> Result<Option<Record>, AdapterError> {
        let table = resolve(schema, model)?;
        mapping::record_id(model, &data)?;
        self.check_unique(table, &data)?;
        let row = to_storage(table, data)?;
        let created = from_storage(table, row.clone())?;
        self.tables.entry(table.table_name.clone()).or_default().push(row);
        Ok(Some(created))
    }

    /// Rewrites matching rows on a staged copy; the store changes only when
    /// every row passes.
    fn update(
        &mut self,
        schema: &Schema,
        model: &str,
        conditions: &[Where],
        data: &Record,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, AdapterError> {
        let table = resolve(schema, model)?;
        let targets: Vec<(usize, Record)> = self
            .matching(table, conditions)?
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        let mut staged = self.clone();
        let mut updated = Vec::with_capacity(targets.len());
        for (index, mut record) in targets {
            record.extend(data.clone());
            staged.check_unique(table, &record)?;
            let row = to_storage(table, record)?;
            updated.push(from_storage(table, row.clone())?);
            if let Some(slot) = staged.tables.get_mut(&table.table_name).and_then(|rows| rows.get_mut(index)) {
                *slot = row;
            }
        }
        *self = staged;
        Ok(updated)
    }

    fn delete_many(&mut self, schema: &Schema, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let table = resolve(schema, model)?;
        let doomed: Vec<usize> = self.matching(table, conditions)?.into_iter().map(|(index, _)| index).collect();
        if let Some(rows) = self.tables.get_mut(&table.table_name) {
            let mut index = 0;
            rows.retain(|_| {
                let keep = !doomed.contains(&index);
                index += 1;
                keep
            });
        }
        Ok(doomed.len() as u64)
    }

    fn check_unique(&self, table: &Table, candidate: &Record) -> Result<(), AdapterError> {
        let rows: Vec<Record> = self.logical_rows(table)?.into_iter().map(|(_, record)| record).collect();
        match mapping::unique_conflict(table, &rows, candidate) {
            Some((field, existing_id)) => Err(AdapterError::UniqueConstraintViolation {
                model: table.entity_name.clone(),
                field,
                existing_id,
            }),
            None => Ok(()),
        }
    }
}

/// Shared in-process store. Clones see the same data.
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    state: Arc<tokio::sync::Mutex<MemoryStore>>,
    schema: Arc<Schema>,
}

impl MemoryAdapter {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(MemoryStore::default())),
            schema,
        }
    }
}

impl Adapter for MemoryAdapter {
    type Tx = MemoryTx;

    fn id(&self) -> &str {
        MEMORY_ID
    }

    async fn find_one(&self, model: &str, conditions: &[Where]) -> Result<Option<Record>, AdapterError> {
        let query = FindMany::new(conditions.to_vec()).limit(1);
        let store = self.state.lock().await;
        Ok(store.find_many(&self.schema, model, &query)?.into_iter().next())
    }

    async fn find_many(&self, model: &str, query: &FindMany) -> Result<Vec<Record>, AdapterError> {
        self.state.lock().await.find_many(&self.schema, model, query)
    }

    async fn count(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let table = resolve(&self.schema, model)?;
        Ok(self.state.lock().await.matching(table, conditions)?.len() as u64)
    }

    async fn create(&self, model: &str, data: Record) -> Result<Option<Record>, AdapterError> {
        self.state.lock().await.create(&self.schema, model, data)
    }

    async fn update(&self, model: &str, conditions: &[Where], data: Record) -> Result<Option<Record>, AdapterError> {
        let mut store = self.state.lock().await;
        Ok(store.update(&self.schema, model, conditions, &data, Some(1))?.into_iter().next())
    }

    async fn update_many(&self, model: &str, conditions: &[Where], data: Record) -> Result<u64, AdapterError> {
        let mut store = self.state.lock().await;
        Ok(store.update(&self.schema, model, conditions, &data, None)?.len() as u64)
    }

    async fn delete_many(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        self.state.lock().await.delete_many(&self.schema, model, conditions)
    }

    /// Holds the store lock for the whole callback and works on a copy that
    /// replaces the store only when the callback succeeds.
    async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&Self::Tx) -> Result<T, E>,
        E: From<AdapterError>,
    {
        let mut guard = self.state.lock().await;
        let tx = MemoryTx {
            store: Mutex::new(guard.clone()),
            schema: Arc::clone(&self.schema),
        };
        let result = f(&tx).await;
        if result.is_ok() {
            *guard = tx.store.into_inner().unwrap_or_else(PoisonError::into_inner);
        }
        result
    }
}

/// Working copy handed to a [`MemoryAdapter::transaction`] callback.
#[derive(Debug)]
pub struct MemoryTx {
    store: Mutex<MemoryStore>,
    schema: Arc<Schema>,
}

impl MemoryTx {
    fn store(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Adapter for MemoryTx {
    type Tx = MemoryTx;

    fn id(&self) -> &str {
        MEMORY_ID
    }

    async fn find_one(&self, model: &str, conditions: &[Where]) -> Result<Option<Record>, AdapterError> {
        let query = FindMany::new(conditions.to_vec()).limit(1);
        Ok(self.store().find_many(&self.schema, model, &query)?.into_iter().next())
    }

    async fn find_many(&self, model: &str, query: &FindMany) -> Result<Vec<Record>, AdapterError> {
        self.store().find_many(&self.schema, model, query)
    }

    async fn count(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        let table = resolve(&self.schema, model)?;
        Ok(self.store().matching(table, conditions)?.len() as u64)
    }

    async fn create(&self, model: &str, data: Record) -> Result<Option<Record>, AdapterError> {
        self.store().create(&self.schema, model, data)
    }

    async fn update(&self, model: &str, conditions: &[Where], data: Record) -> Result<Option<Record>, AdapterError> {
        Ok(self
            .store()
            .update(&self.schema, model, conditions, &data, Some(1))?
            .into_iter()
            .next())
    }

    async fn update_many(&self, model: &str, conditions: &[Where], data: Record) -> Result<u64, AdapterError> {
        Ok(self.store().update(&self.schema, model, conditions, &data, None)?.len() as u64)
    }

    async fn delete_many(&self, model: &str, conditions: &[Where]) -> Result<u64, AdapterError> {
        self.store().delete_many(&self.schema, model, conditions)
    }

    /// Already isolated; nested scopes run inline.
    async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&Self::Tx) -> Result<T, E>,
        E: From<AdapterError>,
    {
        f(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Options, assemble_schema};
    use serde_json::{Value, json};

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new(Arc::new(assemble_schema(&Options::default()).expect("schema")))
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn failed_transaction_leaves_store_untouched() {
        let adapter = adapter();
        let result: Result<(), AdapterError> = adapter
            .transaction(async |tx| {
                tx.create("domain", record(json!({"id": "dom_1", "name": "a.com"}))).await?;
                Err(AdapterError::Other { message: "boom".into() })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(adapter.count("domain", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unique_fields_are_enforced() {
        let adapter = adapter();
        adapter
            .create("domain", record(json!({"id": "dom_1", "name": "a.com"})))
            .await
            .unwrap();
        let err = adapter
            .create("domain", record(json!({"id": "dom_2", "name": "a.com"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UniqueConstraintViolation { ref existing_id, .. } if existing_id == "dom_1"));
    }

    #[tokio::test]
    async fn update_touches_only_first_match() {
        let adapter = adapter();
        for id in ["pur_1", "pur_2"] {
            adapter
                .create(
                    "consentPurpose",
                    record(json!({"id": id, "code": id, "name": "n", "isActive": true})),
                )
                .await
                .unwrap();
        }
        let updated = adapter
            .update(
                "consentPurpose",
                &[Where::eq("isActive", true)],
                record(json!({"isActive": false})),
            )
            .await
            .unwrap()
            .expect("row");
        assert_eq!(updated["id"], json!("pur_1"));
        assert_eq!(adapter.count("consentPurpose", &[Where::eq("isActive", true)]).await.unwrap(), 1);
        assert_eq!(adapter.delete_many("consentPurpose", &[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_many_is_all_or_nothing() {
        let adapter = adapter();
        for (id, code) in [("pur_1", "a"), ("pur_2", "b")] {
            adapter
                .create(
                    "consentPurpose",
                    record(json!({"id": id, "code": code, "name": "n", "isActive": true})),
                )
                .await
                .unwrap();
        }
        let err = adapter
            .update_many("consentPurpose", &[], record(json!({"code": "same"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UniqueConstraintViolation { .. }));

        let rows = adapter.find_many("consentPurpose", &FindMany::default()).await.unwrap();
        let codes: Vec<&Value> = rows.iter().map(|row| &row["code"]).collect();
        assert_eq!(codes, [&json!("a"), &json!("b")]);
    }

    #[tokio::test]
    async fn json_fields_hold_plain_strings() {
        let adapter = adapter();
        let created = adapter
            .create(
                "domain",
                record(json!({"id": "dom_x", "name": "x.com", "allowedOrigins": "https://a"})),
            )
            .await
            .unwrap()
            .expect("row");
        assert_eq!(created["allowedOrigins"], json!("https://a"));

        adapter
            .create("domain", record(json!({"id": "dom_y", "name": "y.com", "allowedOrigins": "[1]"})))
            .await
            .unwrap();
        let found = adapter
            .find_one("domain", &[Where::eq("allowedOrigins", "[1]")])
            .await
            .unwrap()
            .expect("row");
        assert_eq!(found["id"], json!("dom_y"));
        assert_eq!(found["allowedOrigins"], json!("[1]"));
        assert_eq!(adapter.count("domain", &[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rejected_create_leaves_table_readable() {
        let adapter = adapter();
        let err = adapter
            .create("domain", record(json!({"id": "dom_z", "colour": "red"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnknownField { .. }));
        assert_eq!(adapter.count("domain", &[Where::eq("id", "dom_z")]).await.unwrap(), 0);
    }
}
