//! Per-key incremental merge state.
//!
//! Contributions arrive in ascending priority order; each call models
//! "this contribution wins so far". A nested mapping joins the pending
//! recursive-merge list and discards any terminal recorded earlier; any
//! other value is atomic, so it discards the whole pending list and
//! becomes the sole terminal. The net effect is that only the last
//! contiguous run of object contributions merges, and a scalar anywhere
//! after that run's start wins outright.

use crate::engine::{self, Source};
use crate::resolver::ResolveCtx;
use crate::value::Value;

#[derive(Default)]
pub(crate) struct Accumulator {
    /// Nested sources awaiting recursive merge, in arrival order
    /// (so the newest entry has the highest priority).
    pending: Vec<Source>,
    terminal: Option<Value>,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a nested-object contribution.
    pub(crate) fn add_nested(&mut self, source: Source) {
        self.terminal = None;
        self.pending.push(source);
    }

    /// Record an atomic contribution.
    pub(crate) fn add_terminal(&mut self, value: Value) {
        self.pending.clear();
        self.terminal = Some(value);
    }

    /// The merged value of everything recorded so far.
    ///
    /// Non-consuming: the resolver also calls this to compute `prev` for
    /// override functions, then keeps accumulating. A non-empty pending
    /// list becomes a fresh lazy nested merge; otherwise the terminal
    /// stands (null if nothing was ever added).
    pub(crate) fn finalize(&self, ctx: &ResolveCtx) -> Value {
        if self.pending.is_empty() {
            return self.terminal.clone().unwrap_or(Value::Null);
        }
        let descending: Vec<Source> = self.pending.iter().rev().cloned().collect();
        let target = engine::build_target(
            descending,
            None,
            ctx.path.clone(),
            &ctx.engine,
            Some(&ctx.root),
        );
        Value::Object(target)
    }
}
