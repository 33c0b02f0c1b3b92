//! Merge targets and their lazy slots.
//!
//! A [`MergeTarget`] is a handle over shared target state: one slot per
//! key, each an explicit cell that moves `Unresolved` -> `Resolving` ->
//! `Resolved` exactly once. Targets expose no mutation API; re-merging
//! through the driver is the only way to repopulate one, and that
//! preserves the handle's identity.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};

use crate::engine::{EngineShared, Source};
use crate::error::MergeError;
use crate::resolver;
use crate::value::{ConfigValue, Value};

/// Shared handle to a slot value still resolving asynchronously.
///
/// Cloning is cheap and every clone observes the same settlement; repeated
/// reads of a deferred slot hand back the same underlying future.
#[derive(Clone)]
pub struct ValueFuture(Shared<BoxFuture<'static, Result<Value, MergeError>>>);

impl ValueFuture {
    pub(crate) fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value, MergeError>> + Send + 'static,
    {
        Self(fut.boxed().shared())
    }

    /// Whether two handles observe the same underlying resolution.
    pub fn same_handle(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl Future for ValueFuture {
    type Output = Result<Value, MergeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0).poll(cx)
    }
}

impl fmt::Debug for ValueFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueFuture(..)")
    }
}

/// The result of reading a slot: settled, or still deferred.
#[derive(Debug, Clone)]
pub enum Resolved {
    Immediate(Value),
    Deferred(ValueFuture),
}

impl Resolved {
    /// The settled value, if resolution did not go asynchronous.
    pub fn immediate(&self) -> Option<&Value> {
        match self {
            Resolved::Immediate(value) => Some(value),
            Resolved::Deferred(_) => None,
        }
    }

    /// Await the final value, settled or not.
    pub async fn wait(self) -> Result<Value, MergeError> {
        match self {
            Resolved::Immediate(value) => Ok(value),
            Resolved::Deferred(fut) => fut.await,
        }
    }
}

/// Everything a slot needs to resolve itself on first read.
pub(crate) struct Seed {
    /// The merge's full source list, highest priority first.
    pub(crate) sources: Arc<Vec<Source>>,
}

pub(crate) enum CellState {
    Unresolved(Seed),
    Resolving,
    Resolved(Resolved),
}

/// One lazy slot. The `Resolved` transition is terminal.
pub(crate) struct SlotCell {
    pub(crate) state: Mutex<CellState>,
}

impl SlotCell {
    pub(crate) fn unresolved(seed: Seed) -> Self {
        Self {
            state: Mutex::new(CellState::Unresolved(seed)),
        }
    }
}

pub(crate) struct TargetState {
    /// Per-invocation token identity, used by the cycle guard.
    pub(crate) id: u64,
    /// Keys from the merge root down to this target.
    pub(crate) path: Arc<[String]>,
    pub(crate) engine: Arc<EngineShared>,
    /// Weak so the root's own slots do not keep the root alive.
    pub(crate) root: Weak<TargetInner>,
    pub(crate) slots: BTreeMap<String, Arc<SlotCell>>,
}

pub(crate) struct TargetInner {
    pub(crate) state: RwLock<TargetState>,
}

/// A lazily merged, read-only configuration object.
#[derive(Clone)]
pub struct MergeTarget {
    pub(crate) inner: Arc<TargetInner>,
}

impl MergeTarget {
    pub(crate) fn from_state(state: TargetState) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                state: RwLock::new(state),
            }),
        }
    }

    /// Build a target that is its own root.
    pub(crate) fn new_root(make: impl FnOnce(Weak<TargetInner>) -> TargetState) -> Self {
        Self {
            inner: Arc::new_cyclic(|weak| TargetInner {
                state: RwLock::new(make(weak.clone())),
            }),
        }
    }

    pub(crate) fn replace_state(&self, state: TargetState) {
        *self.inner.state.write() = state;
    }

    /// Whether two handles refer to the same target.
    pub fn same_target(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The keys defined by any source, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.read().slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.read().slots.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.read().slots.contains_key(key)
    }

    /// Read a slot, resolving it on first access.
    ///
    /// Returns the cached result on every later read; a deferred slot
    /// yields the same shared future each time.
    pub fn get(&self, key: &str) -> Result<Resolved, MergeError> {
        resolver::read_slot(self, key)
    }

    /// Read a slot, requiring a synchronously settled value.
    pub fn value(&self, key: &str) -> Result<Value, MergeError> {
        match self.get(key)? {
            Resolved::Immediate(value) => Ok(value),
            Resolved::Deferred(_) => Err(MergeError::Pending {
                path: self.dotted_child(key),
            }),
        }
    }

    /// Read a slot, awaiting a deferred result if necessary.
    pub async fn resolve(&self, key: &str) -> Result<Value, MergeError> {
        self.get(key)?.wait().await
    }

    /// Force every slot and materialize the tree as JSON.
    ///
    /// Fails on slots that resolve asynchronously (use
    /// [`materialize_async`](Self::materialize_async)) and on function
    /// terminals, which have no JSON form.
    pub fn materialize(&self) -> Result<serde_json::Value, MergeError> {
        let mut out = serde_json::Map::new();
        for key in self.keys() {
            let value = self.value(&key)?;
            out.insert(key.clone(), value_to_json(&value, &self.dotted_child(&key))?);
        }
        Ok(serde_json::Value::Object(out))
    }

    /// Force every slot, awaiting deferred ones, and materialize as JSON.
    pub fn materialize_async(&self) -> BoxFuture<'static, Result<serde_json::Value, MergeError>> {
        let this = self.clone();
        async move {
            let mut out = serde_json::Map::new();
            for key in this.keys() {
                let value = this.resolve(&key).await?;
                let json = match value {
                    Value::Object(target) => target.materialize_async().await?,
                    other => value_to_json(&other, &this.dotted_child(&key))?,
                };
                out.insert(key, json);
            }
            Ok(serde_json::Value::Object(out))
        }
        .boxed()
    }

    pub(crate) fn dotted_child(&self, key: &str) -> String {
        let state = self.inner.state.read();
        if state.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", state.path.join("."), key)
        }
    }
}

impl fmt::Debug for MergeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeTarget")
            .field("keys", &self.keys())
            .finish()
    }
}

fn value_to_json(value: &Value, path: &str) -> Result<serde_json::Value, MergeError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Number(n) => Ok(serde_json::Value::Number(n.clone())),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(|item| config_to_json(item, path))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(target) => target.materialize(),
        Value::Function(_) => Err(MergeError::At {
            path: path.to_string(),
            message: "cannot materialize a function value".to_string(),
        }),
    }
}

/// Literal JSON conversion for array elements, which are never merged.
fn config_to_json(value: &ConfigValue, path: &str) -> Result<serde_json::Value, MergeError> {
    match value {
        ConfigValue::Null => Ok(serde_json::Value::Null),
        ConfigValue::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        ConfigValue::Number(n) => Ok(serde_json::Value::Number(n.clone())),
        ConfigValue::String(s) => Ok(serde_json::Value::String(s.clone())),
        ConfigValue::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(|item| config_to_json(item, path))
                .collect::<Result<_, _>>()?,
        )),
        ConfigValue::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map.clone() {
                out.insert(key, config_to_json(&item, path)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        ConfigValue::Target(target) => target.materialize(),
        ConfigValue::Override(_) | ConfigValue::Deferred(_) => Err(MergeError::At {
            path: path.to_string(),
            message: format!("cannot materialize a {} inside an array", value.kind()),
        }),
    }
}
