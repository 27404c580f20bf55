//! Shared types between the sandboxed UDF runtime ([`crate::limits`],
//! document context, capabilities) and the UDF modules compiled against this
//! crate and loaded into that runtime.
//!
//! Plays the plugin-ABI role a native `dlopen`'d extension crate would,
//! except the boundary here is a `wasm32` guest linked into a `wasmtime`
//! host rather than a C ABI: everything that crosses the boundary is
//! JSON-encoded into guest linear memory rather than passed by raw
//! pointer/struct layout.

pub mod abi;
pub mod capability;
pub mod error;
pub mod limits;
pub mod metadata;
pub mod value;

pub use abi::{GuestBuffer, alloc, dealloc};
pub use capability::Capability;
pub use error::UdfError;
pub use limits::ResourceLimits;
pub use metadata::{ParamSpec, ParamType, UdfMetadata};
pub use value::Value;
