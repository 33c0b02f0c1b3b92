//! Strata: Lazy Recursive Configuration Merging
//!
//! Merges an ordered list of partial configuration objects into one
//! logical configuration: later sources win, nested mappings merge
//! recursively, and any value may be a function computing its final value
//! lazily (optionally asynchronously) from the fully merged root and the
//! previously merged value at the same path. Keys resolve on first read,
//! exactly once, with cycle detection across self-referential overrides.

mod accumulator;
mod engine;
mod guard;
mod resolver;

pub mod driver;
pub mod error;
pub mod target;
pub mod value;

pub use driver::{merge, merge_into};
pub use error::MergeError;
pub use target::{MergeTarget, Resolved, ValueFuture};
pub use value::{ConfigMap, ConfigValue, DeferredValue, Override, OverrideCx, Value};
