//! Execution context: per-unit-of-work state bag held in task-local storage.
//!
//! The dispatcher runs every inbound event inside [`scope`], and calls
//! [`reset`] before the handler runs. Many units of work share one worker
//! thread, but each one only ever sees its own slot.
//!
//! Every accessor is a no-op (setters) or returns `None` (getters) when no slot
//! is tracked, so library code can call them without knowing whether it runs
//! inside a dispatched event.
//!
//! Nothing is propagated to spawned subtasks. Copy explicitly:
//!
//! ```ignore
//! let ctx = context::snapshot();
//! tokio::spawn(context::scope_with(ctx.unwrap_or_default(), async move { /* ... */ }));
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

tokio::task_local! {
    static CURRENT: RefCell<ExecutionContext>;
}

/// Cross-cutting identifiers of one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
    pub request_id: Option<String>,
    pub actor_id: Option<String>,
    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

impl ExecutionContext {
    /// A context with fresh correlation and request ids and nothing else.
    pub fn fresh() -> Self {
        Self {
            correlation_id: Some(new_token()),
            request_id: Some(new_token()),
            ..Self::default()
        }
    }
}

/// 128 bits of randomness, hex-encoded.
pub fn new_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Run `future` with its own (blank) context slot.
pub async fn scope<F: Future>(future: F) -> F::Output {
    CURRENT
        .scope(RefCell::new(ExecutionContext::default()), future)
        .await
}

/// Run `future` with a slot pre-populated from `context`.
pub async fn scope_with<F: Future>(context: ExecutionContext, future: F) -> F::Output {
    CURRENT.scope(RefCell::new(context), future).await
}

/// Whether the caller runs inside a tracked slot.
pub fn is_tracked() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

/// Replace the current slot with a fresh context. No-op outside a slot.
pub fn reset() {
    let _ = CURRENT.try_with(|cell| {
        *cell.borrow_mut() = ExecutionContext::fresh();
    });
}

/// Copy of the current context, for explicit propagation.
pub fn snapshot() -> Option<ExecutionContext> {
    read(|ctx| ctx.clone())
}

pub fn tenant_id() -> Option<String> {
    read(|ctx| ctx.tenant_id.clone()).flatten()
}

pub fn correlation_id() -> Option<String> {
    read(|ctx| ctx.correlation_id.clone()).flatten()
}

pub fn request_id() -> Option<String> {
    read(|ctx| ctx.request_id.clone()).flatten()
}

pub fn actor_id() -> Option<String> {
    read(|ctx| ctx.actor_id.clone()).flatten()
}

pub fn set_tenant_id(tenant_id: impl Into<String>) {
    let value = tenant_id.into();
    write(|ctx| ctx.tenant_id = Some(value));
}

/// Overrides the generated id, e.g. with one received from an upstream caller.
pub fn set_correlation_id(correlation_id: impl Into<String>) {
    let value = correlation_id.into();
    write(|ctx| ctx.correlation_id = Some(value));
}

pub fn set_request_id(request_id: impl Into<String>) {
    let value = request_id.into();
    write(|ctx| ctx.request_id = Some(value));
}

pub fn set_actor_id(actor_id: impl Into<String>) {
    let value = actor_id.into();
    write(|ctx| ctx.actor_id = Some(value));
}

pub fn set_extra(key: impl Into<String>, value: impl Into<Value>) {
    let key = key.into();
    let value = value.into();
    write(|ctx| {
        ctx.extras.insert(key, value);
    });
}

/// Value stored under `key`, or `default` when absent or untracked.
pub fn extra(key: &str, default: impl Into<Value>) -> Value {
    read(|ctx| ctx.extras.get(key).cloned())
        .flatten()
        .unwrap_or_else(|| default.into())
}

fn read<T>(f: impl FnOnce(&ExecutionContext) -> T) -> Option<T> {
    CURRENT.try_with(|cell| f(&cell.borrow())).ok()
}

fn write(f: impl FnOnce(&mut ExecutionContext)) {
    let _ = CURRENT.try_with(|cell| f(&mut cell.borrow_mut()));
}
