//! Data-model types shared across the daemon.
//!
//! These mirror the entities of the record store (`crate::database`): Project,
//! Function, EnvVar, Route, Invocation. Identifiers are opaque strings (UUIDs)
//! rather than typed newtypes.

mod invocation;
mod project;
mod route;

pub use invocation::{Invocation, InvocationSource, InvocationStatus};
pub use project::{EnvVar, ImageBuildStatus, Project, ProjectStatus};
pub use route::{HttpMethod, Route};

use serde::{Deserialize, Serialize};

/// A stored function: source code plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    pub project_id: Option<String>,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub code: String,
    pub runtime_id: String,
    pub status: FunctionStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionStatus {
    Active,
    Disabled,
}

impl std::fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionStatus::Active => write!(f, "active"),
            FunctionStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for FunctionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FunctionStatus::Active),
            "disabled" => Ok(FunctionStatus::Disabled),
            other => Err(format!("unknown function status: {other}")),
        }
    }
}

/// The single runtime this daemon supports; plural runtimes are not
/// implemented here.
pub const DEFAULT_RUNTIME_ID: &str = "python3.11";

/// Base runtime image tag used when a project has no per-project build.
pub const BASE_RUNTIME_IMAGE_DEFAULT: &str = "clowdy-base-runtime:latest";
