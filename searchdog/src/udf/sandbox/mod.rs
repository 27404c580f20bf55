//! Sandboxed UDF runtime (spec.md §4.5.2 "general path" extensibility
//! layer): a `wasmtime`-hosted registry of compiled UDF modules, each
//! behind capability gating, resource limits, and a bounded instance pool.
//!
//! [`host`] defines the host API surface a guest module imports;
//! [`pool`] bounds how many calls into one module's compiled code may run
//! concurrently. This module ties the two together into a single
//! `register` / `call` entry point and tracks the state machine of spec.md
//! §4.5.2 ("Queued -> Instantiated -> Executing -> (Completed | Errored |
//! Terminated)").
//!
//! Resource limits: wall-time via epoch interruption, memory/table growth
//! via `wasmtime::ResourceLimiter` ([`host::HostCtx`]), and native call-stack
//! depth via the engine-wide `Config::max_wasm_stack` set in
//! [`UdfRuntime::new`] — the per-module [`ResourceLimits::stack_depth`]
//! value isn't individually enforceable since `max_wasm_stack` is fixed at
//! engine construction and one engine is shared by every module.

pub mod host;
pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use wasmtime::{Config, Engine, Linker, Module, Store};

use searchdog_stats::UdfStatsTable;
use searchdog_udf_sdk::{UdfError, UdfMetadata, Value};

pub use host::{DocumentAccess, JsonDocument};
use host::HostCtx;

/// One tick of the engine's epoch clock. A call's wall-time budget is
/// converted to a tick count against this period and handed to
/// `Store::set_epoch_deadline`; `run_epoch_ticker` advances the clock at
/// this cadence for the lifetime of the process.
const EPOCH_PERIOD: Duration = Duration::from_millis(20);

/// Engine-wide native wasm stack ceiling (wasmtime's own default). Recursion
/// past this traps with "call stack exhausted", classified by
/// [`classify_trap`] into [`UdfError::StackOverflow`].
const DEFAULT_WASM_STACK_BYTES: usize = 512 * 1024;

/// The lifecycle of one UDF call (spec.md §4.5.2, "State machine of a UDF
/// call"). Logged at each transition; the public [`UdfRuntime::call`] API
/// collapses the terminal states to a `Result<Value, UdfError>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Queued,
    Instantiated,
    Executing,
    Completed,
    Errored,
    Terminated,
}

struct RegisteredModule {
    metadata: UdfMetadata,
    module: Module,
    linker: Linker<HostCtx>,
    pool: pool::InstancePool,
}

/// Registry and executor for every UDF module known to one data-tier node.
/// UDF execution happens where the shard lives (spec.md §4.5.2), so one
/// `UdfRuntime` is owned by the data-tier service, not the coordination
/// tier.
pub struct UdfRuntime {
    engine: Engine,
    modules: DashMap<(String, String), Arc<RegisteredModule>>,
    stats: UdfStatsTable,
}

impl UdfRuntime {
    pub fn new(stats: UdfStatsTable) -> Result<Self, UdfError> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        // `ResourceLimiter` only covers memory/table growth, not recursion depth
        // (wasmtime has no per-Store stack hook); the native wasm stack is
        // bounded here instead, engine-wide, since one `Engine` is shared by
        // every registered module and `max_wasm_stack` can't vary per call.
        config.max_wasm_stack(DEFAULT_WASM_STACK_BYTES);
        let engine = Engine::new(&config)
            .map_err(|e| UdfError::Trap(format!("engine init failed: {e}")))?;
        Ok(Self {
            engine,
            modules: DashMap::new(),
            stats,
        })
    }

    /// Drives the epoch clock every [`EPOCH_PERIOD`] for as long as the
    /// returned future is polled. Spawn this once per process; it is what
    /// makes `ResourceLimits::wall_time` actually bound a call instead of
    /// running forever.
    pub async fn run_epoch_ticker(engine: Engine) {
        let mut interval = tokio::time::interval(EPOCH_PERIOD);
        loop {
            interval.tick().await;
            engine.increment_epoch();
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine.clone()
    }

    pub fn stats(&self) -> &UdfStatsTable {
        &self.stats
    }

    /// Compile and register a module's bytecode under (name, version).
    /// Verifies `metadata.content_hash` against the actual bytecode first
    /// (spec.md §4.5.2 "Integrity"): a mismatch is refused outright rather
    /// than compiled and then rejected at call time.
    pub fn register(&self, metadata: UdfMetadata, bytecode: &[u8]) -> Result<(), UdfError> {
        let digest = Sha256::digest(bytecode);
        let actual = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        if actual != metadata.content_hash {
            warn!(
                name = %metadata.name,
                version = %metadata.version,
                "udf registration rejected: content hash mismatch"
            );
            return Err(UdfError::IntegrityViolation);
        }

        let module = Module::new(&self.engine, bytecode)
            .map_err(|e| UdfError::Validation(format!("invalid wasm module: {e}")))?;
        let linker = host::build_linker(&self.engine)
            .map_err(|e| UdfError::Validation(format!("failed to build host linker: {e}")))?;
        let pool = pool::InstancePool::new(metadata.limits.max_concurrent_instances);

        let key = (metadata.name.clone(), metadata.version.clone());
        self.modules.insert(
            key,
            Arc::new(RegisteredModule {
                metadata,
                module,
                linker,
                pool,
            }),
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str, version: &str) {
        self.modules.remove(&(name.to_string(), version.to_string()));
    }

    pub fn is_registered(&self, name: &str, version: &str) -> bool {
        self.modules.contains_key(&(name.to_string(), version.to_string()))
    }

    fn epoch_ticks_for(wall_time: Duration) -> u64 {
        (wall_time.as_nanos() / EPOCH_PERIOD.as_nanos().max(1)) as u64 + 1
    }

    /// Invoke a registered module. Binds `params` against the module's
    /// declared parameter list (defaults applied, required-but-missing is
    /// a `Validation` error per S5 in spec.md §8), acquires a pool slot,
    /// instantiates, and runs the guest's `udf_invoke` export under an
    /// epoch deadline and memory limiter.
    pub async fn call(
        &self,
        name: &str,
        version: &str,
        params: &HashMap<String, Value>,
        document: Option<Arc<dyn DocumentAccess>>,
    ) -> Result<Value, UdfError> {
        let started = Instant::now();
        let module = self
            .modules
            .get(&(name.to_string(), version.to_string()))
            .map(|e| e.value().clone())
            .ok_or_else(|| UdfError::Validation(format!("udf \"{name}\"@\"{version}\" not registered")))?;

        let bound = module.metadata.bind_params(params).map_err(UdfError::Validation)?;
        let bound_map: HashMap<String, Value> = bound.into_iter().collect();

        debug!(udf = %name, version = %version, state = ?CallState::Queued, "udf call queued");
        let _permit = module.pool.acquire().await.map_err(|e| {
            self.stats.record_errored(name, version, started.elapsed());
            e
        })?;

        let result = self
            .run_instance(&module, bound_map, document, started)
            .await;

        match &result {
            Ok(_) => self.stats.record_completed(name, version, started.elapsed()),
            Err(e) if e.kind() == "terminated" => {
                self.stats.record_terminated(name, version, started.elapsed())
            }
            Err(_) => self.stats.record_errored(name, version, started.elapsed()),
        }
        result
    }

    async fn run_instance(
        &self,
        module: &RegisteredModule,
        params: HashMap<String, Value>,
        document: Option<Arc<dyn DocumentAccess>>,
        started: Instant,
    ) -> Result<Value, UdfError> {
        debug!(state = ?CallState::Instantiated, "udf instantiating");
        let ctx = HostCtx::new(
            module.metadata.capabilities.clone(),
            params,
            document,
            module.metadata.limits.memory_pages,
        );
        let mut store = Store::new(&self.engine, ctx);
        store.limiter(|ctx| ctx);
        store.set_epoch_deadline(Self::epoch_ticks_for(module.metadata.limits.wall_time));

        let instance = module
            .linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| classify_trap(&store, e))?;

        let params_json = serde_json::to_vec(&store.data().params.clone())
            .map_err(|e| UdfError::Validation(format!("failed to encode params: {e}")))?;

        let alloc = instance
            .get_typed_func::<u32, u32>(&mut store, "alloc")
            .map_err(|e| UdfError::Validation(format!("module missing \"alloc\" export: {e}")))?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| UdfError::Validation("module missing \"memory\" export".into()))?;

        let ptr = alloc
            .call(&mut store, params_json.len() as u32)
            .map_err(|e| classify_trap(&store, e))?;
        memory
            .write(&mut store, ptr as usize, &params_json)
            .map_err(|e| UdfError::Trap(format!("failed writing params: {e}")))?;

        let invoke = instance
            .get_typed_func::<(u32, u32), i64>(&mut store, "udf_invoke")
            .map_err(|e| UdfError::Validation(format!("module missing \"udf_invoke\" export: {e}")))?;

        debug!(state = ?CallState::Executing, "udf executing");
        let packed = invoke
            .call(&mut store, (ptr, params_json.len() as u32))
            .map_err(|e| classify_trap(&store, e))?;

        let buf = searchdog_udf_sdk::GuestBuffer::unpack(packed);
        let data = memory.data(&store);
        let start = buf.ptr as usize;
        let end = start.saturating_add(buf.len as usize).min(data.len());
        let bytes = if start < data.len() && start <= end {
            &data[start..end]
        } else {
            &[][..]
        };

        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| UdfError::Trap(format!("module returned invalid JSON: {e}")))?;

        debug!(elapsed = ?started.elapsed(), state = ?CallState::Completed, "udf completed");
        Ok(value)
    }
}

/// Turn a wasmtime instantiation/call error into the right
/// [`UdfError`] variant, checking the host context first since a capability
/// violation or deliberate host-side refusal always takes priority over
/// the generic trap text wasmtime reports.
fn classify_trap(store: &Store<HostCtx>, err: wasmtime::Error) -> UdfError {
    if let Some(violation) = host::capability_violation(store.data()) {
        return violation;
    }
    let message = err.to_string();
    if message.contains("epoch deadline") || message.contains("interrupt") {
        UdfError::Timeout
    } else if message.contains("memory") && message.contains("limit") {
        UdfError::MemoryExceeded
    } else if message.contains("call stack exhausted") {
        UdfError::StackOverflow
    } else {
        UdfError::Trap(message)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use searchdog_udf_sdk::{Capability, ParamSpec, ParamType, ResourceLimits};

    fn metadata(content_hash: &str) -> UdfMetadata {
        UdfMetadata {
            name: "price_in_range".into(),
            version: "1.0.0".into(),
            language: "wasm".into(),
            params: vec![
                ParamSpec {
                    name: "min".into(),
                    param_type: ParamType::Float64,
                    optional: false,
                    default: None,
                },
                ParamSpec {
                    name: "max".into(),
                    param_type: ParamType::Float64,
                    optional: false,
                    default: None,
                },
            ],
            return_type: ParamType::Bool,
            capabilities: vec![Capability::ReadDocument],
            limits: ResourceLimits::default(),
            content_hash: content_hash.into(),
        }
    }

    #[test]
    fn test_register_rejects_content_hash_mismatch() {
        let runtime = UdfRuntime::new(UdfStatsTable::new()).unwrap();
        let bytecode = b"not actually wasm, just needs a stable hash";
        let meta = metadata("0000000000000000000000000000000000000000000000000000000000000000");
        let err = runtime.register(meta, bytecode).unwrap_err();
        assert!(matches!(err, UdfError::IntegrityViolation));
    }

    #[test]
    fn test_register_accepts_matching_hash_but_invalid_wasm() {
        // Exercises the hash check independent of actual wasm validity:
        // a corrupt-but-hash-matching module still fails, just later, with
        // a Validation error instead of IntegrityViolation.
        let runtime = UdfRuntime::new(UdfStatsTable::new()).unwrap();
        let bytecode = b"not actually wasm";
        let digest = Sha256::digest(bytecode);
        let hex_digest = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        let meta = metadata(&hex_digest);
        let err = runtime.register(meta, bytecode).unwrap_err();
        assert!(matches!(err, UdfError::Validation(_)));
    }
}
