use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single recorded execution of a function. Append-only: once written, an
/// Invocation is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub id: String,
    pub function_id: String,
    pub input_json: Value,
    pub output_json: Option<Value>,
    pub status: InvocationStatus,
    pub duration_ms: i64,
    pub source: InvocationSource,
    /// `Some` iff `source == Gateway`; `None` iff `source == Direct`.
    pub http_method: Option<String>,
    /// `Some` iff `source == Gateway`; `None` iff `source == Direct`.
    pub http_path: Option<String>,
    pub created_at: i64,
}

impl Invocation {
    /// Enforces the method/path-presence invariant tied to `source` at
    /// construction time rather than at the SQL layer.
    pub fn is_well_formed(&self) -> bool {
        match self.source {
            InvocationSource::Direct => self.http_method.is_none() && self.http_path.is_none(),
            InvocationSource::Gateway => self.http_method.is_some() && self.http_path.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationSource {
    Direct,
    Gateway,
}

impl std::fmt::Display for InvocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationSource::Direct => write!(f, "direct"),
            InvocationSource::Gateway => write!(f, "gateway"),
        }
    }
}

impl std::str::FromStr for InvocationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(InvocationSource::Direct),
            "gateway" => Ok(InvocationSource::Gateway),
            other => Err(format!("unknown invocation source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Success,
    Error,
    Timeout,
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationStatus::Success => write!(f, "success"),
            InvocationStatus::Error => write!(f, "error"),
            InvocationStatus::Timeout => write!(f, "timeout"),
        }
    }
}

impl std::str::FromStr for InvocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(InvocationStatus::Success),
            "error" => Ok(InvocationStatus::Error),
            "timeout" => Ok(InvocationStatus::Timeout),
            other => Err(format!("unknown invocation status: {other}")),
        }
    }
}
