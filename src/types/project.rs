use serde::{Deserialize, Serialize};

/// A project: the unit of image build and deploy isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub slug: String,
    pub name: String,
    pub status: ProjectStatus,
    /// Opaque connection string injected as `DATABASE_URL`, overriding any
    /// user env var of that name.
    pub database_url: Option<String>,
    /// Image tag populated by the image lifecycle manager once a build
    /// reaches `Ready`; retained across a `Failed` transition.
    pub runtime_image_tag: Option<String>,
    /// Canonicalized dependency manifest; empty means "no per-project
    /// build, use the base runtime image".
    pub requirements_text: String,
    /// SHA-256 of `requirements_text`, the image cache key.
    pub requirements_hash: Option<String>,
    pub image_build_status: ImageBuildStatus,
    /// Last build failure's extracted package-manager output.
    pub image_build_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Active => write!(f, "active"),
            ProjectStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProjectStatus::Active),
            "archived" => Ok(ProjectStatus::Archived),
            other => Err(format!("unknown project status: {other}")),
        }
    }
}

/// Build lifecycle of a project's image, tracked so that invocations can
/// decide whether to wait, use a cached image, or fail fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBuildStatus {
    None,
    Building,
    Ready,
    Failed,
}

impl std::fmt::Display for ImageBuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageBuildStatus::None => write!(f, "none"),
            ImageBuildStatus::Building => write!(f, "building"),
            ImageBuildStatus::Ready => write!(f, "ready"),
            ImageBuildStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ImageBuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ImageBuildStatus::None),
            "building" => Ok(ImageBuildStatus::Building),
            "ready" => Ok(ImageBuildStatus::Ready),
            "failed" => Ok(ImageBuildStatus::Failed),
            other => Err(format!("unknown image build status: {other}")),
        }
    }
}

/// A project-scoped environment variable injected into every invocation of
/// every function belonging to the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub project_id: String,
    pub key: String,
    pub value: String,
    /// Affects only UI rendering (masking the value in project settings);
    /// never changes how the value is injected at invocation time.
    pub is_secret: bool,
    pub created_at: i64,
    pub updated_at: i64,
}
