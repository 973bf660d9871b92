//! Hook pipeline around adapter writes, and the operations composed from it.
//!
//! Every operation is a free function over a [`Pipeline`] and an [`Adapter`],
//! so composed operations (find-or-create, consent creation) call their
//! building blocks directly and can be handed a transaction adapter instead.
//! [`Registry`] bundles both for callers that do not need that flexibility.

pub mod consent;

use std::fmt;
use std::sync::Arc;

pub use consent::{NewConsent, SubjectLookup, create_consent, find_or_create_domain, find_or_create_subject};

use crate::adapter::Adapter;
use crate::errors::{AdapterError, RegistryError};
use crate::hooks::{Diagnostics, HookContext, HookOutcome, HookSet, LogDiagnostics, Operation};
use crate::query::{FindMany, Record, Where};
use crate::schema::{Schema, Table};
use crate::validate::{TypedRecord, validate_output};

/// Everything a write needs besides the adapter: the schema, the hooks and a
/// diagnostics sink.
#[derive(Clone)]
pub struct Pipeline {
    pub schema: Arc<Schema>,
    pub hooks: Arc<HookSet>,
    pub diagnostics: Arc<dyn Diagnostics>,
}

impl Pipeline {
    /// No hooks; diagnostics go to the `log` facade.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            hooks: Arc::new(HookSet::new()),
            diagnostics: Arc::new(LogDiagnostics),
        }
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Diagnostics + 'static) -> Self {
        self.diagnostics = Arc::new(diagnostics);
        self
    }

    fn table(&self, model: &str) -> Result<&Table, RegistryError> {
        Ok(self.schema.require(model)?)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("entities", &self.schema.len())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Fills defaults the caller did not supply. On update only fields marked
/// `on_update` are regenerated.
fn apply_defaults(table: &Table, mut data: Record, operation: Operation) -> Record {
    for field in &table.fields {
        let Some(default) = &field.field.default_value else {
            continue;
        };
        let wanted = match operation {
            Operation::Create => true,
            Operation::Update => field.field.on_update,
        };
        if wanted && !data.contains_key(&field.name) {
            data.insert(field.name.clone(), default.resolve(&table.entity_prefix));
        }
    }
    data
}

async fn run_before(pipeline: &Pipeline, ctx: HookContext<'_>, data: Record) -> Result<Record, RegistryError> {
    let outcome = pipeline
        .hooks
        .run_before(ctx, data)
        .await
        .map_err(|source| RegistryError::Hook {
            model: ctx.entity.to_string(),
            operation: ctx.operation,
            source,
        })?;
    match outcome {
        HookOutcome::Proceed(data) => Ok(data),
        HookOutcome::Reject(reason) => {
            log::debug!("{} of {} rejected by hook: {reason}", ctx.operation, ctx.entity);
            Err(RegistryError::Rejected {
                model: ctx.entity.to_string(),
                operation: ctx.operation,
                reason,
            })
        }
    }
}

/// Defaults, `before` hooks, adapter insert, `after` hooks, validation.
pub async fn create_record<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    model: &str,
    data: Record,
) -> Result<TypedRecord, RegistryError> {
    let table = pipeline.table(model)?;
    let ctx = HookContext {
        entity: &table.entity_name,
        operation: Operation::Create,
    };
    let data = run_before(pipeline, ctx, apply_defaults(table, data, Operation::Create)).await?;

    let created = adapter
        .create(model, data)
        .await?
        .ok_or_else(|| RegistryError::WriteFailed {
            model: model.to_string(),
            operation: Operation::Create,
        })?;

    pipeline.hooks.run_after(ctx, &created, pipeline.diagnostics.as_ref()).await;
    Ok(validate_output(table, created)?)
}

/// Updates the first row matching `conditions`. No match is a write failure.
pub async fn update_record<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    model: &str,
    conditions: &[Where],
    data: Record,
) -> Result<TypedRecord, RegistryError> {
    let table = pipeline.table(model)?;
    let ctx = HookContext {
        entity: &table.entity_name,
        operation: Operation::Update,
    };
    let data = run_before(pipeline, ctx, apply_defaults(table, data, Operation::Update)).await?;

    let updated = adapter
        .update(model, conditions, data)
        .await?
        .ok_or_else(|| RegistryError::WriteFailed {
            model: model.to_string(),
            operation: Operation::Update,
        })?;

    pipeline.hooks.run_after(ctx, &updated, pipeline.diagnostics.as_ref()).await;
    Ok(validate_output(table, updated)?)
}

pub async fn find_record<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    model: &str,
    conditions: &[Where],
) -> Result<Option<TypedRecord>, RegistryError> {
    let table = pipeline.table(model)?;
    match adapter.find_one(model, conditions).await? {
        Some(raw) => Ok(Some(validate_output(table, raw)?)),
        None => Ok(None),
    }
}

/// Like [`find_record`], but a missing row is [`RegistryError::NotFound`].
pub async fn require_record<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    model: &str,
    conditions: &[Where],
) -> Result<TypedRecord, RegistryError> {
    find_record(pipeline, adapter, model, conditions)
        .await?
        .ok_or_else(|| RegistryError::NotFound {
            model: model.to_string(),
        })
}

pub async fn list_records<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    model: &str,
    query: &FindMany,
) -> Result<Vec<TypedRecord>, RegistryError> {
    let table = pipeline.table(model)?;
    let rows = adapter.find_many(model, query).await?;
    rows.into_iter()
        .map(|raw| validate_output(table, raw).map_err(RegistryError::from))
        .collect()
}

pub async fn count_records<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    model: &str,
    conditions: &[Where],
) -> Result<u64, RegistryError> {
    pipeline.table(model)?;
    Ok(adapter.count(model, conditions).await?)
}

pub async fn delete_records<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    model: &str,
    conditions: &[Where],
) -> Result<u64, RegistryError> {
    pipeline.table(model)?;
    if conditions.is_empty() {
        pipeline
            .diagnostics
            .warn(&format!("deleting every `{model}` row: no conditions given"));
    }
    Ok(adapter.delete_many(model, conditions).await?)
}

/// Id of a validated record.
pub(crate) fn id_of(model: &str, record: &TypedRecord) -> Result<String, RegistryError> {
    record.id().map(str::to_string).ok_or_else(|| {
        RegistryError::Adapter(AdapterError::MissingId {
            model: model.to_string(),
        })
    })
}

/// An adapter paired with the pipeline that wraps its writes.
#[derive(Debug, Clone)]
pub struct Registry<A> {
    adapter: A,
    pipeline: Pipeline,
}

impl<A: Adapter> Registry<A> {
    pub fn new(adapter: A, pipeline: Pipeline) -> Self {
        Self { adapter, pipeline }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn schema(&self) -> &Schema {
        &self.pipeline.schema
    }

    pub async fn create(&self, model: &str, data: Record) -> Result<TypedRecord, RegistryError> {
        create_record(&self.pipeline, &self.adapter, model, data).await
    }

    pub async fn update(&self, model: &str, conditions: &[Where], data: Record) -> Result<TypedRecord, RegistryError> {
        update_record(&self.pipeline, &self.adapter, model, conditions, data).await
    }

    pub async fn find_one(&self, model: &str, conditions: &[Where]) -> Result<Option<TypedRecord>, RegistryError> {
        find_record(&self.pipeline, &self.adapter, model, conditions).await
    }

    pub async fn get(&self, model: &str, conditions: &[Where]) -> Result<TypedRecord, RegistryError> {
        require_record(&self.pipeline, &self.adapter, model, conditions).await
    }

    pub async fn find_many(&self, model: &str, query: &FindMany) -> Result<Vec<TypedRecord>, RegistryError> {
        list_records(&self.pipeline, &self.adapter, model, query).await
    }

    pub async fn count(&self, model: &str, conditions: &[Where]) -> Result<u64, RegistryError> {
        count_records(&self.pipeline, &self.adapter, model, conditions).await
    }

    pub async fn delete_many(&self, model: &str, conditions: &[Where]) -> Result<u64, RegistryError> {
        delete_records(&self.pipeline, &self.adapter, model, conditions).await
    }

    pub async fn find_or_create_domain(&self, name: &str) -> Result<TypedRecord, RegistryError> {
        find_or_create_domain(&self.pipeline, &self.adapter, name).await
    }

    pub async fn find_or_create_subject(&self, lookup: SubjectLookup) -> Result<TypedRecord, RegistryError> {
        find_or_create_subject(&self.pipeline, &self.adapter, lookup).await
    }

    pub async fn create_consent(&self, consent: NewConsent) -> Result<TypedRecord, RegistryError> {
        create_consent(&self.pipeline, &self.adapter, consent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::hooks::BeforeFn;
    use crate::schema::{Options, assemble_schema, entities};
    use crate::validate::FieldValue;
    use serde_json::json;

    fn registry(hooks: HookSet) -> Registry<MemoryAdapter> {
        let schema = Arc::new(assemble_schema(&Options::default()).unwrap());
        let adapter = MemoryAdapter::new(Arc::clone(&schema));
        Registry::new(adapter, Pipeline::new(schema).with_hooks(hooks))
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_fills_id_and_timestamps() {
        let registry = registry(HookSet::new());
        let domain = registry
            .create(entities::DOMAIN, record(json!({"name": "example.com"})))
            .await
            .unwrap();
        assert!(domain.id().unwrap().starts_with("dom_"));
        assert!(matches!(domain.get("createdAt"), Some(FieldValue::Date(_))));
        assert_eq!(domain.get("isActive"), Some(&FieldValue::Bool(true)));
    }

    #[tokio::test]
    async fn before_hook_can_rewrite_payload() {
        let hooks = HookSet::new().with(
            entities::DOMAIN,
            BeforeFn(|_ctx: HookContext<'_>, mut data: Record| {
                if let Some(name) = data.get("name").and_then(|v| v.as_str()) {
                    let lowered = name.to_lowercase();
                    data.insert("name".into(), lowered.into());
                }
                HookOutcome::Proceed(data)
            }),
        );
        let registry = registry(hooks);
        let domain = registry
            .create(entities::DOMAIN, record(json!({"name": "Example.COM"})))
            .await
            .unwrap();
        assert_eq!(domain.get("name").and_then(FieldValue::as_str), Some("example.com"));
    }

    #[tokio::test]
    async fn update_refreshes_updated_at_only() {
        let registry = registry(HookSet::new());
        let created = registry
            .create(
                entities::DOMAIN,
                record(json!({"name": "a.com", "updatedAt": "2020-01-01T00:00:00Z"})),
            )
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();
        let updated = registry
            .update(entities::DOMAIN, &[Where::eq("id", id)], record(json!({"description": "x"})))
            .await
            .unwrap();
        assert_eq!(updated.get("createdAt"), created.get("createdAt"));
        assert_ne!(updated.get("updatedAt"), created.get("updatedAt"));
    }

    #[tokio::test]
    async fn update_without_match_is_a_write_failure() {
        let registry = registry(HookSet::new());
        let err = registry
            .update(entities::DOMAIN, &[Where::eq("id", "dom_missing")], Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::WriteFailed { operation: Operation::Update, .. }));
    }

    #[tokio::test]
    async fn require_reports_not_found() {
        let registry = registry(HookSet::new());
        let err = registry
            .get(entities::SUBJECT, &[Where::eq("id", "sub_nope")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }
}
