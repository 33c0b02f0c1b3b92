//! Configuration value model.
//!
//! Every value carried by a source is classified once at ingestion into a
//! [`ConfigValue`] variant, so resolution logic never needs runtime type
//! probing. Resolved slot values are [`Value`]s; an already-merged object
//! can flow back in as a source or contribution via [`ConfigValue::Target`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Number;

use crate::error::MergeError;
use crate::target::MergeTarget;

/// Context handed to an override function.
#[derive(Debug, Clone)]
pub struct OverrideCx {
    /// The merged result of all lower-priority contributions at this key.
    ///
    /// Always settled by the time the override runs: when earlier
    /// contributions were deferred, the override itself is invoked inside
    /// the ordered chain, strictly after they resolve.
    pub prev: Value,

    /// Keys from the merge root down to the slot being resolved.
    pub path: Arc<[String]>,
}

impl OverrideCx {
    /// The resolution path as a dotted string, as used in error messages.
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

type OverrideFn =
    dyn Fn(MergeTarget, OverrideCx) -> Result<ConfigValue, MergeError> + Send + Sync;

/// A value-position function computing a key's contribution from the merge
/// root and the previously merged value at the same path.
#[derive(Clone)]
pub struct Override(Arc<OverrideFn>);

impl Override {
    /// Wrap a synchronous override function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(MergeTarget, OverrideCx) -> Result<ConfigValue, MergeError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(
        &self,
        root: MergeTarget,
        cx: OverrideCx,
    ) -> Result<ConfigValue, MergeError> {
        (self.0)(root, cx)
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Override(..)")
    }
}

/// A contribution whose value settles asynchronously.
///
/// Backed by a shared boxed future so the same deferred handle can be
/// handed to every reader of the slot.
#[derive(Clone)]
pub struct DeferredValue(Shared<BoxFuture<'static, Result<ConfigValue, MergeError>>>);

impl DeferredValue {
    /// Wrap a future producing a configuration value.
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<ConfigValue, MergeError>> + Send + 'static,
    {
        Self(fut.boxed().shared())
    }

    pub(crate) async fn wait(&self) -> Result<ConfigValue, MergeError> {
        self.0.clone().await
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredValue(..)")
    }
}

/// A value as supplied inside a configuration source.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Opaque terminal: elements are never resolved or merged.
    Array(Vec<ConfigValue>),
    /// A plain nested mapping, merged recursively with its peers.
    Mapping(ConfigMap),
    /// An already-merged object used as a source; its keys read lazily.
    Target(MergeTarget),
    /// Called at resolution with `(root, {prev, path})`.
    Override(Override),
    /// Settles asynchronously to another configuration value.
    Deferred(DeferredValue),
}

impl ConfigValue {
    /// Wrap a synchronous override function.
    pub fn override_with<F>(f: F) -> Self
    where
        F: Fn(MergeTarget, OverrideCx) -> Result<ConfigValue, MergeError> + Send + Sync + 'static,
    {
        ConfigValue::Override(Override::new(f))
    }

    /// Wrap an asynchronous override function.
    ///
    /// The closure is called synchronously at resolution; the deferred
    /// value it produces is chained in priority order with the slot's
    /// other contributions.
    pub fn async_override<F, Fut>(f: F) -> Self
    where
        F: Fn(MergeTarget, OverrideCx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConfigValue, MergeError>> + Send + 'static,
    {
        ConfigValue::Override(Override::new(move |root, cx| {
            Ok(ConfigValue::Deferred(DeferredValue::new(f(root, cx))))
        }))
    }

    /// Wrap a future as a deferred contribution.
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = Result<ConfigValue, MergeError>> + Send + 'static,
    {
        ConfigValue::Deferred(DeferredValue::new(fut))
    }

    /// Short variant name, used in validation diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Number(_) => "number",
            ConfigValue::String(_) => "string",
            ConfigValue::Array(_) => "array",
            ConfigValue::Mapping(_) => "mapping",
            ConfigValue::Target(_) => "merged target",
            ConfigValue::Override(_) => "function",
            ConfigValue::Deferred(_) => "deferred value",
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        ConfigValue::Number(Number::from(v))
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Number(Number::from(v))
    }
}

impl From<u64> for ConfigValue {
    fn from(v: u64) -> Self {
        ConfigValue::Number(Number::from(v))
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Number::from_f64(v).map_or(ConfigValue::Null, ConfigValue::Number)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(v: Vec<ConfigValue>) -> Self {
        ConfigValue::Array(v)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(v: ConfigMap) -> Self {
        ConfigValue::Mapping(v)
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => ConfigValue::Null,
            serde_json::Value::Bool(b) => ConfigValue::Bool(b),
            serde_json::Value::Number(n) => ConfigValue::Number(n),
            serde_json::Value::String(s) => ConfigValue::String(s),
            serde_json::Value::Array(items) => {
                ConfigValue::Array(items.into_iter().map(ConfigValue::from).collect())
            }
            serde_json::Value::Object(map) => ConfigValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for ConfigValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => ConfigValue::Null,
            Value::Bool(b) => ConfigValue::Bool(b),
            Value::Number(n) => ConfigValue::Number(n),
            Value::String(s) => ConfigValue::String(s),
            Value::Array(items) => ConfigValue::Array(items),
            Value::Object(target) => ConfigValue::Target(target),
            // A function value re-entering a merge is called again, like a
            // function read off one merged object and fed into another.
            Value::Function(f) => ConfigValue::Override(f),
        }
    }
}

/// An ordered key-value mapping used as a configuration source.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap(BTreeMap<String, ConfigValue>);

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ConfigValue)> for ConfigMap {
    fn from_iter<T: IntoIterator<Item = (String, ConfigValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ConfigMap {
    type Item = (String, ConfigValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, ConfigValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl TryFrom<serde_json::Value> for ConfigMap {
    type Error = MergeError;

    fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
        match ConfigValue::from(v) {
            ConfigValue::Mapping(map) => Ok(map),
            other => Err(MergeError::InvalidSource {
                position: 0,
                found: other.kind(),
            }),
        }
    }
}

/// A fully resolved slot value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Opaque terminal array, carried through unresolved.
    Array(Vec<ConfigValue>),
    /// A lazily merged nested object.
    Object(MergeTarget),
    /// A terminal function value (an override returned by an override).
    Function(Override),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ConfigValue]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&MergeTarget> {
        match self {
            Value::Object(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Override> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Short variant name, used in materialization diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }
}
