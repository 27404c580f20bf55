use serde::{Deserialize, Serialize};

use crate::{Capability, ResourceLimits, Value};

/// The type a UDF declares for one of its parameters or its return value
/// (spec.md §3 "UDF", "declared parameters ... declared return type").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Bool,
    Int64,
    Float64,
    String,
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ParamType::Bool, Value::Bool(_))
                | (ParamType::Int64, Value::Int64(_))
                | (ParamType::Float64, Value::Float64(_) | Value::Int64(_))
                | (ParamType::String, Value::String(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub optional: bool,
    pub default: Option<Value>,
}

/// Registration-time metadata for one (name, version) UDF artifact
/// (spec.md §3 "UDF").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdfMetadata {
    pub name: String,
    /// Semver string, e.g. "1.2.0".
    pub version: String,
    pub language: String,
    pub params: Vec<ParamSpec>,
    pub return_type: ParamType,
    pub capabilities: Vec<Capability>,
    pub limits: ResourceLimits,
    /// Hex-encoded SHA-256 of the artifact's bytecode, computed at
    /// registration (spec.md §4.5.2 "Integrity"). Any load path verifies
    /// this before execution; an artifact whose bytecode no longer hashes
    /// to this value is refused.
    pub content_hash: String,
}

impl UdfMetadata {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Validate a caller-supplied parameter map against the declared
    /// parameters, filling in defaults. Returns a `Validation`-kind error
    /// message (spec.md §7) on the first missing required parameter or type
    /// mismatch, per S5 in spec.md §8.
    pub fn bind_params(
        &self,
        supplied: &std::collections::HashMap<String, Value>,
    ) -> Result<Vec<(String, Value)>, String> {
        let mut bound = Vec::with_capacity(self.params.len());
        for spec in &self.params {
            let value = match supplied.get(&spec.name) {
                Some(v) => {
                    if !spec.param_type.accepts(v) {
                        return Err(format!(
                            "parameter \"{}\" expected {:?}, got {:?}",
                            spec.name, spec.param_type, v
                        ));
                    }
                    v.clone()
                }
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None => {
                        if spec.optional {
                            Value::Null
                        } else {
                            return Err(format!(
                                "missing required parameter \"{}\"",
                                spec.name
                            ));
                        }
                    }
                },
            };
            bound.push((spec.name.clone(), value));
        }
        Ok(bound)
    }
}
