//! Configuration for all three node roles (spec.md §2, §4.6): loaded from
//! `searchdog.toml`, validated with `serde(deny_unknown_fields)`, and
//! published as a JSON Schema via `schemars` for the `scripts/jsonschema`
//! generator.

pub mod allocator;
pub mod consensus;
pub mod coordination;
pub mod core;
pub mod discovery;
pub mod error;
pub mod general;
pub mod index;
pub mod udf;

pub use allocator::Allocator;
pub use consensus::Consensus;
pub use coordination::{Coordination, ResultCache, Retry};
pub use core::Config;
pub use discovery::Discovery;
pub use error::Error;
pub use general::{General, NodeRole};
pub use index::IndexDefaults;
pub use udf::Udf;
