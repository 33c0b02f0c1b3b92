//! Public merge entry points.
//!
//! Validates and reorders the caller's source list, then delegates to the
//! recursive merge engine. Sources are supplied lowest priority first; the
//! returned target is usable immediately and computes values on first read.

use std::sync::Arc;

use tracing::{debug, error};

use crate::engine::{self, EngineShared, Source};
use crate::error::MergeError;
use crate::target::MergeTarget;
use crate::value::ConfigValue;

/// Lazily merge an ordered list of configuration sources.
///
/// Later sources win; nested mappings merge recursively; override
/// functions are called on first read with `(root, {prev, path})`.
/// `Null` and `false` entries stand for absent sources and are skipped.
/// Any other non-mapping entry fails validation synchronously, before any
/// lazy work begins.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use strata::{merge, ConfigValue};
///
/// let config = merge(vec![
///     ConfigValue::from(json!({"retries": 1, "limits": {"cpu": 2}})),
///     ConfigValue::from(json!({"limits": {"mem": 512}})),
/// ])
/// .unwrap();
///
/// assert_eq!(config.value("retries").unwrap().as_i64(), Some(1));
/// assert_eq!(
///     config.materialize().unwrap(),
///     json!({"retries": 1, "limits": {"cpu": 2, "mem": 512}}),
/// );
/// ```
pub fn merge<I>(sources: I) -> Result<MergeTarget, MergeError>
where
    I: IntoIterator<Item = ConfigValue>,
{
    merge_impl(sources, None)
}

/// Like [`merge`], but clears and repopulates an existing target.
///
/// The returned handle refers to the same target, so references held
/// elsewhere observe the new merge.
pub fn merge_into<I>(sources: I, target: &MergeTarget) -> Result<MergeTarget, MergeError>
where
    I: IntoIterator<Item = ConfigValue>,
{
    merge_impl(sources, Some(target))
}

fn merge_impl<I>(sources: I, target: Option<&MergeTarget>) -> Result<MergeTarget, MergeError>
where
    I: IntoIterator<Item = ConfigValue>,
{
    let mut descending: Vec<Source> = Vec::new();
    for (position, value) in sources.into_iter().enumerate() {
        match value {
            // Absent entries.
            ConfigValue::Null | ConfigValue::Bool(false) => continue,
            ConfigValue::Mapping(map) => descending.push(Source::Map(map)),
            ConfigValue::Target(existing) => descending.push(Source::Target(existing)),
            other => {
                error!(position, kind = other.kind(), "merge source is not a plain mapping");
                return Err(MergeError::InvalidSource {
                    position,
                    found: other.kind(),
                });
            }
        }
    }
    // The last source overrides all; the engine walks highest first.
    descending.reverse();

    debug!(
        sources = descending.len(),
        reuse = target.is_some(),
        "merging configuration sources"
    );

    let engine = EngineShared::new();
    Ok(engine::build_target(
        descending,
        target,
        Arc::from(Vec::<String>::new()),
        &engine,
        None,
    ))
}
