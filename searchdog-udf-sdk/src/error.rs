use thiserror::Error;

/// Why a UDF call did not reach `Completed` (spec.md §4.5.2, "State machine
/// of a UDF call"). `Errored`/`Terminated` both surface through this type;
/// the runtime distinguishes them only by variant, matching spec.md's
/// "Terminated covers timeout, memory-cap breach, and capability
/// violation."
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UdfError {
    #[error("call exceeded its wall-time budget")]
    Timeout,
    #[error("call exceeded its memory budget")]
    MemoryExceeded,
    #[error("call exceeded its stack depth budget")]
    StackOverflow,
    #[error("module called undeclared capability \"{0}\"")]
    CapabilityViolation(String),
    #[error("module trapped: {0}")]
    Trap(String),
    #[error("{0}")]
    Validation(String),
    #[error("module artifact failed integrity verification")]
    IntegrityViolation,
    #[error("no capacity in instance pool ({0} concurrent instances in use)")]
    ResourceExhausted(u32),
}

impl UdfError {
    /// Classify into the taxonomy kinds of spec.md §7.
    pub fn kind(&self) -> &'static str {
        match self {
            UdfError::Timeout
            | UdfError::MemoryExceeded
            | UdfError::StackOverflow
            | UdfError::CapabilityViolation(_) => "terminated",
            UdfError::Validation(_) => "validation",
            UdfError::IntegrityViolation => "validation",
            UdfError::ResourceExhausted(_) => "resource_exhausted",
            UdfError::Trap(_) => "internal",
        }
    }
}
