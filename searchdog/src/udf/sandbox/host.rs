//! The host API exposed to guest UDF code (spec.md §4.5.2 "Runtime contract
//! exposed to UDF code"): document field accessors, parameter accessors,
//! `get_document_id`/`get_score`, and `log`. Capability-gated at the call
//! site — the runtime refuses any import outside the module's declared set.
//!
//! Values cross the boundary as JSON through guest linear memory, packed
//! into the `(ptr, len)` pairs `searchdog_udf_sdk::abi::GuestBuffer` defines;
//! this keeps the import surface to a handful of functions instead of a
//! bespoke binary ABI per type.

use std::collections::HashMap;
use std::sync::Arc;

use searchdog_udf_sdk::{Capability, UdfError, Value};
use tracing::debug;
use wasmtime::{Caller, Linker, Memory, ResourceLimiter, TypedFunc};

/// The fields of a document visible to a UDF call, and the metadata the
/// host API surfaces alongside them (spec.md §4.5.2: `get_document_id`,
/// `get_score`). A thin trait so the data tier can hand the runtime a
/// zero-copy view over whatever the index engine returns, while tests use a
/// plain `serde_json::Value`.
pub trait DocumentAccess: Send + Sync {
    fn get_field(&self, path: &str) -> Value;
    fn has_field(&self, path: &str) -> bool;
    fn document_id(&self) -> &str;
    fn score(&self) -> f64;
}

pub struct JsonDocument {
    pub doc_id: String,
    pub score: f64,
    pub source: serde_json::Value,
}

impl DocumentAccess for JsonDocument {
    fn get_field(&self, path: &str) -> Value {
        let mut cur = &self.source;
        for segment in path.split('.') {
            match cur.get(segment) {
                Some(next) => cur = next,
                None => return Value::Null,
            }
        }
        cur.clone().into()
    }

    fn has_field(&self, path: &str) -> bool {
        !matches!(self.get_field(path), Value::Null)
    }

    fn document_id(&self) -> &str {
        &self.doc_id
    }

    fn score(&self) -> f64 {
        self.score
    }
}

/// Per-call host state, installed fresh into the `Store` for the duration
/// of exactly one UDF invocation (spec.md §4.5.2 "Execution model": "Each
/// call is given a freshly registered document-context handle whose
/// lifetime is the call; the runtime rejects dangling handle use.") — since
/// a new `HostCtx` is built per call and the `Store` is dropped back into
/// the pool afterward, there is no handle for a second call to dangle.
pub struct HostCtx {
    pub capabilities: Vec<Capability>,
    pub params: HashMap<String, Value>,
    pub document: Option<Arc<dyn DocumentAccess>>,
    pub logs: Vec<String>,
    pub trapped_capability: Option<String>,
    max_memory_bytes: usize,
}

impl HostCtx {
    pub fn new(
        capabilities: Vec<Capability>,
        params: HashMap<String, Value>,
        document: Option<Arc<dyn DocumentAccess>>,
        max_memory_pages: u32,
    ) -> Self {
        Self {
            capabilities,
            params,
            document,
            logs: Vec::new(),
            trapped_capability: None,
            max_memory_bytes: max_memory_pages as usize * 64 * 1024,
        }
    }

    fn require(&mut self, cap: Capability) -> bool {
        if self.capabilities.contains(&cap) {
            true
        } else {
            self.trapped_capability = Some(cap.as_str().to_string());
            false
        }
    }
}

fn memory(caller: &mut Caller<'_, HostCtx>) -> Option<Memory> {
    caller.get_export("memory").and_then(|e| e.into_memory())
}

fn alloc_fn(caller: &mut Caller<'_, HostCtx>) -> Option<TypedFunc<u32, u32>> {
    caller
        .get_export("alloc")
        .and_then(|e| e.into_func())
        .and_then(|f| f.typed::<u32, u32>(caller).ok())
}

fn read_string(caller: &mut Caller<'_, HostCtx>, ptr: u32, len: u32) -> String {
    let Some(mem) = memory(caller) else {
        return String::new();
    };
    let data = mem.data(caller);
    let start = ptr as usize;
    let end = start.saturating_add(len as usize).min(data.len());
    if start >= data.len() || start > end {
        return String::new();
    }
    String::from_utf8_lossy(&data[start..end]).into_owned()
}

/// Copy `bytes` into freshly `alloc`'d guest memory and return the packed
/// `(ptr << 32 | len)` the guest unpacks with
/// [`searchdog_udf_sdk::abi::GuestBuffer::unpack`]. Returns the "missing"
/// sentinel (packed `(0, 0)`) if allocation fails or the call lacked the
/// required capability.
fn write_bytes(caller: &mut Caller<'_, HostCtx>, bytes: &[u8]) -> i64 {
    let Some(alloc) = alloc_fn(caller) else {
        return 0;
    };
    let Ok(ptr) = alloc.call(&mut *caller, bytes.len() as u32) else {
        return 0;
    };
    if let Some(mem) = memory(caller) {
        let data = mem.data_mut(&mut *caller);
        let start = ptr as usize;
        let end = start + bytes.len();
        if end <= data.len() {
            data[start..end].copy_from_slice(bytes);
        }
    }
    searchdog_udf_sdk::GuestBuffer {
        ptr,
        len: bytes.len() as u32,
    }
    .pack()
}

fn field_value(caller: &mut Caller<'_, HostCtx>, ptr: u32, len: u32) -> Value {
    if !caller.data_mut().require(Capability::ReadDocument) {
        return Value::Null;
    }
    let path = read_string(caller, ptr, len);
    match caller.data().document.clone() {
        Some(doc) => doc.get_field(&path),
        None => Value::Null,
    }
}

/// Register every host import under the `env` module. Called once per
/// registered UDF module at compile time (the `Linker` is cheap to clone
/// per-instantiation, so this runs once, not once per call).
pub fn build_linker(engine: &wasmtime::Engine) -> wasmtime::Result<Linker<HostCtx>> {
    let mut linker = Linker::new(engine);

    linker.func_wrap(
        "env",
        "get_field_string",
        |mut caller: Caller<'_, HostCtx>, ptr: u32, len: u32| -> i64 {
            let v = field_value(&mut caller, ptr, len);
            let s = match v {
                Value::String(s) => s,
                Value::Null => return write_bytes(&mut caller, &[]),
                other => other.to_string(),
            };
            write_bytes(&mut caller, s.as_bytes())
        },
    )?;

    linker.func_wrap(
        "env",
        "get_field_int64",
        |mut caller: Caller<'_, HostCtx>, ptr: u32, len: u32| -> i64 {
            field_value(&mut caller, ptr, len).as_i64().unwrap_or(i64::MIN)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_field_float64",
        |mut caller: Caller<'_, HostCtx>, ptr: u32, len: u32| -> f64 {
            field_value(&mut caller, ptr, len).as_f64().unwrap_or(f64::NAN)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_field_bool",
        |mut caller: Caller<'_, HostCtx>, ptr: u32, len: u32| -> i32 {
            match field_value(&mut caller, ptr, len).as_bool() {
                Some(true) => 1,
                _ => 0,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "has_field",
        |mut caller: Caller<'_, HostCtx>, ptr: u32, len: u32| -> i32 {
            if !caller.data_mut().require(Capability::ReadDocument) {
                return 0;
            }
            let path = read_string(&mut caller, ptr, len);
            let has = caller
                .data()
                .document
                .as_ref()
                .map(|d| d.has_field(&path))
                .unwrap_or(false);
            has as i32
        },
    )?;

    linker.func_wrap(
        "env",
        "get_document_id",
        |mut caller: Caller<'_, HostCtx>| -> i64 {
            if !caller.data_mut().require(Capability::ReadDocument) {
                return write_bytes(&mut caller, &[]);
            }
            let id = caller
                .data()
                .document
                .as_ref()
                .map(|d| d.document_id().to_string())
                .unwrap_or_default();
            write_bytes(&mut caller, id.as_bytes())
        },
    )?;

    linker.func_wrap(
        "env",
        "get_score",
        |mut caller: Caller<'_, HostCtx>| -> f64 {
            if !caller.data_mut().require(Capability::ReadDocument) {
                return f64::NAN;
            }
            caller.data().document.as_ref().map(|d| d.score()).unwrap_or(f64::NAN)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_param",
        |mut caller: Caller<'_, HostCtx>, ptr: u32, len: u32| -> i64 {
            let name = read_string(&mut caller, ptr, len);
            let json = match caller.data().params.get(&name) {
                Some(v) => serde_json::to_string(v).unwrap_or_default(),
                None => "null".to_string(),
            };
            write_bytes(&mut caller, json.as_bytes())
        },
    )?;

    linker.func_wrap(
        "env",
        "log",
        |mut caller: Caller<'_, HostCtx>, ptr: u32, len: u32| {
            if !caller.data_mut().require(Capability::WriteLog) {
                return;
            }
            let message = read_string(&mut caller, ptr, len);
            debug!(udf_log = %message, "udf log");
            caller.data_mut().logs.push(message);
        },
    )?;

    Ok(linker)
}

pub fn capability_violation(ctx: &HostCtx) -> Option<UdfError> {
    ctx.trapped_capability
        .clone()
        .map(UdfError::CapabilityViolation)
}

/// Enforces `ResourceLimits::memory_pages` (spec.md §4.5.2 "Resource
/// limits"). Table growth is capped generously; the spec puts no explicit
/// budget on it, only on linear memory.
impl ResourceLimiter for HostCtx {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_memory_bytes)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= 100_000)
    }
}
