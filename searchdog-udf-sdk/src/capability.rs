use serde::{Deserialize, Serialize};

/// A host function group a UDF module must declare before it may call into
/// it. The runtime refuses any call outside a module's declared set
/// (spec.md §4.5.2, "Capabilities").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// `get_field_*` / `has_field` / `get_document_id` / `get_score`.
    ReadDocument,
    /// `log`.
    WriteLog,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ReadDocument => "read_document",
            Capability::WriteLog => "write_log",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_document" => Ok(Capability::ReadDocument),
            "write_log" => Ok(Capability::WriteLog),
            other => Err(format!("unknown capability \"{other}\"")),
        }
    }
}
