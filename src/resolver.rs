//! Per-key resolution.
//!
//! Computes the final value for one slot the first time it is read:
//! gathers contributions from every source defining the key in ascending
//! priority order, calls override functions with the merge root and the
//! previously merged value, and feeds everything through the accumulator.
//! Resolution runs synchronously to completion unless a deferred
//! contribution appears, at which point the rest of the stream moves into
//! an ordered chain that applies strictly after it settles.

use std::sync::{Arc, Weak};

use tracing::trace;

use crate::accumulator::Accumulator;
use crate::engine::{EngineShared, Source};
use crate::error::MergeError;
use crate::target::{CellState, MergeTarget, Resolved, Seed, TargetInner, ValueFuture};
use crate::value::{ConfigValue, DeferredValue, OverrideCx, Value};

/// Everything a resolver frame needs, cloneable into deferred chains.
#[derive(Clone)]
pub(crate) struct ResolveCtx {
    pub(crate) engine: Arc<EngineShared>,
    pub(crate) root: Weak<TargetInner>,
    pub(crate) target_id: u64,
    pub(crate) key: String,
    pub(crate) path: Arc<[String]>,
}

impl ResolveCtx {
    pub(crate) fn dotted(&self) -> String {
        self.path.join(".")
    }

    fn root_handle(&self) -> Result<MergeTarget, MergeError> {
        self.root
            .upgrade()
            .map(|inner| MergeTarget { inner })
            .ok_or_else(|| MergeError::RootDropped { path: self.dotted() })
    }
}

/// One value in a slot's contribution stream.
pub(crate) enum Contribution {
    /// Straight from a mapping source, unclassified work.
    Config(ConfigValue),
    /// Read off a target source, already resolved.
    Value(Value),
    /// Read off a target source, still deferred there.
    Future(ValueFuture),
}

impl From<Resolved> for Contribution {
    fn from(resolved: Resolved) -> Self {
        match resolved {
            Resolved::Immediate(value) => Contribution::Value(value),
            Resolved::Deferred(fut) => Contribution::Future(fut),
        }
    }
}

/// A contribution after classification, ready for the accumulator.
enum Processed {
    Nested(Source),
    Terminal(Value),
    Wait(PendingWait),
}

enum PendingWait {
    Config(DeferredValue),
    Value(ValueFuture),
}

/// Read `key` on `target`, resolving the slot on first access.
pub(crate) fn read_slot(target: &MergeTarget, key: &str) -> Result<Resolved, MergeError> {
    let (cell, ctx) = {
        let state = target.inner.state.read();
        let cell = match state.slots.get(key) {
            Some(cell) => Arc::clone(cell),
            None => {
                return Err(MergeError::UnknownKey {
                    path: dotted_child(&state.path, key),
                })
            }
        };
        let mut path: Vec<String> = state.path.to_vec();
        path.push(key.to_string());
        let ctx = ResolveCtx {
            engine: Arc::clone(&state.engine),
            root: state.root.clone(),
            target_id: state.id,
            key: key.to_string(),
            path: Arc::from(path),
        };
        (cell, ctx)
    };

    let seed = {
        let mut cell_state = cell.state.lock();
        match std::mem::replace(&mut *cell_state, CellState::Resolving) {
            CellState::Resolved(resolved) => {
                *cell_state = CellState::Resolved(resolved.clone());
                return Ok(resolved);
            }
            CellState::Resolving => {
                return Err(ctx.engine.guard.cycle(&ctx.dotted()));
            }
            CellState::Unresolved(seed) => seed,
        }
    };

    if let Err(err) = ctx.engine.guard.enter(ctx.target_id, &ctx.key, &ctx.dotted()) {
        *cell.state.lock() = CellState::Unresolved(seed);
        return Err(err);
    }

    match resolve(&seed, &ctx) {
        Ok(resolved) => {
            // Terminal transition: the slot never recomputes. A deferred
            // result is cached as the shared handle itself; its guard
            // entry is released when the chain settles.
            *cell.state.lock() = CellState::Resolved(resolved.clone());
            if matches!(resolved, Resolved::Immediate(_)) {
                ctx.engine.guard.exit(ctx.target_id, &ctx.key);
            }
            Ok(resolved)
        }
        Err(err) => {
            // Failures are not cached: restore the seed so a later read
            // re-attempts resolution.
            *cell.state.lock() = CellState::Unresolved(seed);
            ctx.engine.guard.exit(ctx.target_id, &ctx.key);
            Err(err)
        }
    }
}

fn resolve(seed: &Seed, ctx: &ResolveCtx) -> Result<Resolved, MergeError> {
    resolve_inner(seed, ctx).map_err(|err| err.at(&ctx.dotted()))
}

fn resolve_inner(seed: &Seed, ctx: &ResolveCtx) -> Result<Resolved, MergeError> {
    trace!(path = %ctx.dotted(), "resolving slot");

    // Contributions in ascending priority order. Target sources are read
    // here, on first access of this slot, keeping unread slots free.
    let mut contributions = Vec::new();
    for source in seed.sources.iter().rev() {
        if let Some(contribution) = source.contribution(&ctx.key)? {
            contributions.push(contribution);
        }
    }

    let mut acc = Accumulator::new();
    let mut stream = contributions.into_iter();
    while let Some(contribution) = stream.next() {
        match begin(&mut acc, contribution, ctx)? {
            Processed::Nested(source) => acc.add_nested(source),
            Processed::Terminal(value) => acc.add_terminal(value),
            // First deferred contribution: everything left is chained to
            // run strictly after it settles, preserving priority order.
            wait @ Processed::Wait(_) => {
                let remaining: Vec<Contribution> = stream.collect();
                return Ok(Resolved::Deferred(chain(acc, wait, remaining, ctx.clone())));
            }
        }
    }
    Ok(Resolved::Immediate(acc.finalize(ctx)))
}

/// Start processing one contribution, calling it if it is an override.
fn begin(
    acc: &mut Accumulator,
    contribution: Contribution,
    ctx: &ResolveCtx,
) -> Result<Processed, MergeError> {
    match contribution {
        Contribution::Config(ConfigValue::Override(f)) => {
            let cx = OverrideCx {
                prev: acc.finalize(ctx),
                path: ctx.path.clone(),
            };
            let produced = f.call(ctx.root_handle()?, cx)?;
            Ok(classify(produced))
        }
        Contribution::Config(value) => Ok(classify(value)),
        Contribution::Value(value) => Ok(classify_value(value)),
        Contribution::Future(fut) => Ok(Processed::Wait(PendingWait::Value(fut))),
    }
}

/// Classify a non-called configuration value.
///
/// Overrides landing here were produced by another override or by a
/// settled deferred; a contribution is called at most once, so they are
/// terminal function values.
fn classify(value: ConfigValue) -> Processed {
    match value {
        ConfigValue::Mapping(map) => Processed::Nested(Source::Map(map)),
        ConfigValue::Target(target) => Processed::Nested(Source::Target(target)),
        ConfigValue::Override(f) => Processed::Terminal(Value::Function(f)),
        ConfigValue::Deferred(deferred) => Processed::Wait(PendingWait::Config(deferred)),
        ConfigValue::Null => Processed::Terminal(Value::Null),
        ConfigValue::Bool(b) => Processed::Terminal(Value::Bool(b)),
        ConfigValue::Number(n) => Processed::Terminal(Value::Number(n)),
        ConfigValue::String(s) => Processed::Terminal(Value::String(s)),
        ConfigValue::Array(items) => Processed::Terminal(Value::Array(items)),
    }
}

fn classify_value(value: Value) -> Processed {
    match value {
        Value::Object(target) => Processed::Nested(Source::Target(target)),
        other => Processed::Terminal(other),
    }
}

/// Build the ordered deferred chain for the rest of a slot's stream.
fn chain(
    mut acc: Accumulator,
    first: Processed,
    remaining: Vec<Contribution>,
    ctx: ResolveCtx,
) -> ValueFuture {
    ValueFuture::new(async move {
        let run = async {
            settle(&mut acc, first).await?;
            for contribution in remaining {
                let processed = begin(&mut acc, contribution, &ctx)?;
                settle(&mut acc, processed).await?;
            }
            Ok::<_, MergeError>(acc.finalize(&ctx))
        };
        let result = run.await.map_err(|err| err.at(&ctx.dotted()));
        ctx.engine.guard.exit(ctx.target_id, &ctx.key);
        if result.is_err() {
            trace!(path = %ctx.dotted(), "deferred slot rejected");
        }
        result
    })
}

/// Apply one classified contribution, awaiting through deferred layers.
async fn settle(acc: &mut Accumulator, mut processed: Processed) -> Result<(), MergeError> {
    loop {
        match processed {
            Processed::Nested(source) => {
                acc.add_nested(source);
                return Ok(());
            }
            Processed::Terminal(value) => {
                acc.add_terminal(value);
                return Ok(());
            }
            // A deferred resolving to another deferred resolves through.
            Processed::Wait(PendingWait::Config(deferred)) => {
                processed = classify(deferred.wait().await?);
            }
            Processed::Wait(PendingWait::Value(fut)) => {
                processed = classify_value(fut.await?);
            }
        }
    }
}

fn dotted_child(path: &[String], key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path.join("."), key)
    }
}
