//! Before/after hooks run around every create and update.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::HookError;
use crate::query::Record;

/// Write operation a hook is invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub entity: &'a str,
    pub operation: Operation,
}

/// Result of a `before` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Continue with this payload (possibly modified).
    Proceed(Record),
    /// Abort the write; nothing reaches the adapter.
    Reject(String),
}

/// A hook attached to one entity.
///
/// Both methods default to no-ops so an implementation only overrides the
/// side it cares about.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn before(&self, _ctx: HookContext<'_>, data: Record) -> Result<HookOutcome, HookError> {
        Ok(HookOutcome::Proceed(data))
    }

    async fn after(&self, _ctx: HookContext<'_>, _record: &Record) -> Result<(), HookError> {
        Ok(())
    }
}

/// `before` hook backed by a synchronous closure.
pub struct BeforeFn<F>(pub F);

#[async_trait]
impl<F> Hook for BeforeFn<F>
where
    F: Fn(HookContext<'_>, Record) -> HookOutcome + Send + Sync,
{
    async fn before(&self, ctx: HookContext<'_>, data: Record) -> Result<HookOutcome, HookError> {
        Ok((self.0)(ctx, data))
    }
}

/// `after` hook backed by a synchronous closure.
pub struct AfterFn<F>(pub F);

#[async_trait]
impl<F> Hook for AfterFn<F>
where
    F: Fn(HookContext<'_>, &Record) -> Result<(), HookError> + Send + Sync,
{
    async fn after(&self, ctx: HookContext<'_>, record: &Record) -> Result<(), HookError> {
        (self.0)(ctx, record)
    }
}

/// Hooks per entity, kept in registration order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: BTreeMap<String, Vec<Arc<dyn Hook>>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: impl Into<String>, hook: impl Hook + 'static) -> &mut Self {
        self.hooks.entry(entity.into()).or_default().push(Arc::new(hook));
        self
    }

    pub fn with(mut self, entity: impl Into<String>, hook: impl Hook + 'static) -> Self {
        self.register(entity, hook);
        self
    }

    pub fn for_entity(&self, entity: &str) -> &[Arc<dyn Hook>] {
        self.hooks.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Threads `data` through every `before` hook; the first rejection wins.
    pub async fn run_before(&self, ctx: HookContext<'_>, mut data: Record) -> Result<HookOutcome, HookError> {
        for hook in self.for_entity(ctx.entity) {
            match hook.before(ctx, data).await? {
                HookOutcome::Proceed(next) => data = next,
                rejected @ HookOutcome::Reject(_) => return Ok(rejected),
            }
        }
        Ok(HookOutcome::Proceed(data))
    }

    /// Runs every `after` hook. Failures go to `diagnostics` and never reach the caller.
    pub async fn run_after(&self, ctx: HookContext<'_>, record: &Record, diagnostics: &dyn Diagnostics) {
        for hook in self.for_entity(ctx.entity) {
            if let Err(error) = hook.after(ctx, record).await {
                diagnostics.hook_failed(ctx.entity, ctx.operation, &error);
            }
        }
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .hooks
            .iter()
            .map(|(entity, hooks)| (entity.as_str(), hooks.len()))
            .collect();
        f.debug_struct("HookSet").field("hooks", &counts).finish()
    }
}

/// Sink for pipeline diagnostics, handed to the registry at construction.
pub trait Diagnostics: Send + Sync {
    fn hook_failed(&self, entity: &str, operation: Operation, error: &HookError);

    fn warn(&self, message: &str);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn hook_failed(&self, entity: &str, operation: Operation, error: &HookError) {
        log::error!("after-{operation} hook for `{entity}` failed: {error}");
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured(Mutex<Vec<String>>);

    impl Diagnostics for Captured {
        fn hook_failed(&self, entity: &str, operation: Operation, error: &HookError) {
            self.0.lock().unwrap().push(format!("{entity}:{operation}:{error}"));
        }

        fn warn(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn ctx(entity: &str) -> HookContext<'_> {
        HookContext {
            entity,
            operation: Operation::Create,
        }
    }

    #[tokio::test]
    async fn before_hooks_run_in_registration_order() {
        let hooks = HookSet::new()
            .with(
                "domain",
                BeforeFn(|_ctx: HookContext<'_>, mut data: Record| {
                    data.insert("trail".into(), json!("a"));
                    HookOutcome::Proceed(data)
                }),
            )
            .with(
                "domain",
                BeforeFn(|_ctx: HookContext<'_>, mut data: Record| {
                    let trail = format!("{}b", data["trail"].as_str().unwrap_or_default());
                    data.insert("trail".into(), Value::String(trail));
                    HookOutcome::Proceed(data)
                }),
            );

        let outcome = hooks.run_before(ctx("domain"), Record::new()).await.unwrap();
        match outcome {
            HookOutcome::Proceed(data) => assert_eq!(data["trail"], json!("ab")),
            HookOutcome::Reject(reason) => panic!("unexpected rejection: {reason}"),
        }
    }

    #[tokio::test]
    async fn rejection_stops_the_chain() {
        let hooks = HookSet::new()
            .with(
                "consent",
                BeforeFn(|_ctx: HookContext<'_>, _data: Record| HookOutcome::Reject("blocked".into())),
            )
            .with(
                "consent",
                BeforeFn(|_ctx: HookContext<'_>, _data: Record| -> HookOutcome { panic!("must not run") }),
            );
        let outcome = hooks.run_before(ctx("consent"), Record::new()).await.unwrap();
        assert_eq!(outcome, HookOutcome::Reject("blocked".into()));
    }

    #[tokio::test]
    async fn after_failures_are_reported_not_raised() {
        let hooks = HookSet::new().with(
            "domain",
            AfterFn(|_ctx: HookContext<'_>, _record: &Record| -> Result<(), HookError> {
                Err(HookError::new("audit sink down"))
            }),
        );
        let diagnostics = Captured::default();
        hooks.run_after(ctx("domain"), &Record::new(), &diagnostics).await;
        assert_eq!(
            diagnostics.0.lock().unwrap().as_slice(),
            ["domain:create:audit sink down"]
        );
    }

    #[test]
    fn entities_without_hooks_get_an_empty_slice() {
        assert!(HookSet::new().for_entity("subject").is_empty());
    }
}
