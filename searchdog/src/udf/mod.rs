//! Extensibility layer (spec.md §4.5 "Extensibility"): a fast, typed
//! expression evaluator for the common case ([`expr`]) and a sandboxed
//! WebAssembly runtime for arbitrary user code ([`sandbox`]). Both live at
//! the data tier, next to the shard they filter or score.

pub mod expr;
pub mod sandbox;

pub use sandbox::{DocumentAccess, JsonDocument, UdfRuntime};
