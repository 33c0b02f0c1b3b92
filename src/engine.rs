//! Recursive merge engine.
//!
//! Builds a merge target from a priority-descending list of sources: one
//! lazy slot per distinct key, nothing computed until a slot is read. The
//! first target built in a call becomes the root handed to every override
//! in that call's subtree; nested merges inherit the enclosing root.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::error::MergeError;
use crate::guard::CycleGuard;
use crate::resolver::Contribution;
use crate::target::{MergeTarget, Seed, SlotCell, TargetInner, TargetState};
use crate::value::ConfigMap;

/// State shared across one top-level merge invocation's call tree.
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub(crate) guard: CycleGuard,
    next_target_id: AtomicU64,
}

impl EngineShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            guard: CycleGuard::new(),
            next_target_id: AtomicU64::new(0),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_target_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// One merge input: either a plain mapping or an already-merged target
/// whose keys are read lazily.
#[derive(Debug, Clone)]
pub(crate) enum Source {
    Map(ConfigMap),
    Target(MergeTarget),
}

impl Source {
    pub(crate) fn keys(&self) -> Vec<String> {
        match self {
            Source::Map(map) => map.keys().map(str::to_string).collect(),
            Source::Target(target) => target.keys(),
        }
    }

    /// The value this source contributes for `key`, if it defines it.
    ///
    /// Reading a target source forces that target's own slot for the key,
    /// which may itself be deferred or detect a cycle.
    pub(crate) fn contribution(&self, key: &str) -> Result<Option<Contribution>, MergeError> {
        match self {
            Source::Map(map) => Ok(map.get(key).cloned().map(Contribution::Config)),
            Source::Target(target) => {
                if !target.contains_key(key) {
                    return Ok(None);
                }
                Ok(Some(Contribution::from(target.get(key)?)))
            }
        }
    }
}

/// Build (or rebuild, when `target` is given) a merge target over
/// `sources`, which must already be ordered highest priority first.
pub(crate) fn build_target(
    sources: Vec<Source>,
    target: Option<&MergeTarget>,
    path: Arc<[String]>,
    engine: &Arc<EngineShared>,
    root: Option<&Weak<TargetInner>>,
) -> MergeTarget {
    let sources = Arc::new(sources);

    // One lazy slot per distinct key, scanning highest priority first.
    let mut slots: BTreeMap<String, Arc<SlotCell>> = BTreeMap::new();
    for source in sources.iter() {
        for key in source.keys() {
            if slots.contains_key(&key) {
                continue;
            }
            slots.insert(
                key,
                Arc::new(SlotCell::unresolved(Seed {
                    sources: Arc::clone(&sources),
                })),
            );
        }
    }

    trace!(
        path = %path.join("."),
        sources = sources.len(),
        keys = slots.len(),
        reused = target.is_some(),
        "built lazy merge target"
    );

    let id = engine.next_id();
    match target {
        // Reuse: drop the old slots, keep the allocation identity.
        Some(existing) => {
            let root = root
                .cloned()
                .unwrap_or_else(|| Arc::downgrade(&existing.inner));
            existing.replace_state(TargetState {
                id,
                path,
                engine: Arc::clone(engine),
                root,
                slots,
            });
            existing.clone()
        }
        None => match root {
            Some(root) => MergeTarget::from_state(TargetState {
                id,
                path,
                engine: Arc::clone(engine),
                root: root.clone(),
                slots,
            }),
            // Top-level fresh target: it is its own root.
            None => MergeTarget::new_root(|weak| TargetState {
                id,
                path,
                engine: Arc::clone(engine),
                root: weak,
                slots,
            }),
        },
    }
}
