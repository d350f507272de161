//! Image Lifecycle Manager: turns a project's dependency manifest into
//! a cache-keyed, content-addressed container image.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::container::{ContainerHost, TarEntry};
use crate::database::Database;
use crate::error::{DaemonError, Result};
use crate::system::Locker;
use crate::types::{ImageBuildStatus, Project};

/// Drops blank lines and `#`-comments, trims each remaining line, sorts them
/// lexicographically, and rejoins with `\n` — so two manifests that list the
/// same dependencies in a different order or with different whitespace hash
/// identically.
pub fn canonicalize(raw: &str) -> String {
    let mut lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    lines.sort_unstable();
    lines.join("\n")
}

pub fn requirements_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn image_tag(project_id: &str, canonical: &str) -> String {
    let hash = requirements_hash(canonical);
    format!("clowdy-project-{project_id}-{}", &hash[..12])
}

const DOCKERFILE_TEMPLATE: &str = "FROM {base_image}\nCOPY requirements.txt /tmp/requirements.txt\nRUN pip install --no-cache-dir -r /tmp/requirements.txt\n";

/// Builds, caches, and serializes image builds per project.
pub struct ImageManager {
    host: Arc<dyn ContainerHost>,
    db: Arc<Database>,
    base_image: String,
    locks: DashMap<String, Arc<Locker>>,
}

impl ImageManager {
    pub fn new(host: Arc<dyn ContainerHost>, db: Arc<Database>, base_image: String) -> Self {
        Self {
            host,
            db,
            base_image,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, project_id: &str) -> Arc<Locker> {
        self.locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Locker::new()))
            .clone()
    }

    pub fn base_image(&self) -> String {
        self.base_image.clone()
    }

    /// Blocks until a project's in-flight build finishes (the build holds
    /// the project's lock for its duration), then resolves to whatever tag
    /// is left on the project row: the newly built tag on success, the
    /// last-known-good tag on failure, or the base image if neither exists.
    pub async fn wait_for_build(&self, project: &Project) -> Result<String> {
        let lock = self.lock_for(&project.id);
        let _guard = lock.acquire().await.map_err(|e| DaemonError::Internal(e.to_string()))?;

        let current = self.db.get_project(&project.id).await?;
        Ok(current
            .and_then(|p| p.runtime_image_tag)
            .unwrap_or_else(|| self.base_image.clone()))
    }

    /// Ensures an image exists for `project`'s current dependency manifest,
    /// building one if needed, and returns the resolved image tag.
    ///
    /// An empty canonical manifest means "no dependencies" and resolves
    /// straight to the configured base runtime image without a build.
    pub async fn ensure_image(&self, project: &Project, requirements_raw: &str) -> Result<String> {
        let canonical = canonicalize(requirements_raw);
        if canonical.is_empty() {
            return Ok(self.base_image.clone());
        }

        let tag = image_tag(&project.id, &canonical);
        if project.image_build_status == ImageBuildStatus::Ready
            && project.runtime_image_tag.as_deref() == Some(tag.as_str())
        {
            return Ok(tag);
        }

        let lock = self.lock_for(&project.id);
        let _guard = lock.acquire().await.map_err(|e| DaemonError::Internal(e.to_string()))?;

        // Re-check after acquiring the lock: another invocation may have
        // finished the build while we were waiting.
        if let Some(current) = self.db.get_project(&project.id).await? {
            if current.image_build_status == ImageBuildStatus::Ready
                && current.runtime_image_tag.as_deref() == Some(tag.as_str())
            {
                return Ok(tag);
            }
        }

        let hash = requirements_hash(&canonical);
        self.db
            .set_image_build_status(&project.id, ImageBuildStatus::Building, None, Some(&hash), None)
            .await?;

        info!(project_id = %project.id, tag = %tag, "building project image");

        let dockerfile = DOCKERFILE_TEMPLATE.replace("{base_image}", &self.base_image);
        let context = vec![
            TarEntry {
                path: "Dockerfile".to_string(),
                contents: dockerfile.into_bytes(),
            },
            TarEntry {
                path: "requirements.txt".to_string(),
                contents: canonical.clone().into_bytes(),
            },
        ];

        match self.host.build_image(context, &tag).await {
            Ok(built_tag) => {
                self.db
                    .set_image_build_status(
                        &project.id,
                        ImageBuildStatus::Ready,
                        Some(&built_tag),
                        Some(&hash),
                        None,
                    )
                    .await?;
                Ok(built_tag)
            }
            Err(e) => {
                warn!(project_id = %project.id, error = %e, "image build failed");
                self.db
                    .set_image_build_status(
                        &project.id,
                        ImageBuildStatus::Failed,
                        None,
                        Some(&hash),
                        Some(&e.to_string()),
                    )
                    .await?;
                Err(DaemonError::ImageBuild(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeContainerHost;
    use crate::types::ProjectStatus;

    fn sample_project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            owner_id: "owner-1".to_string(),
            slug: "demo".to_string(),
            name: "Demo".to_string(),
            status: ProjectStatus::Active,
            database_url: None,
            requirements_text: String::new(),
            requirements_hash: None,
            image_build_status: ImageBuildStatus::None,
            image_build_error: None,
            runtime_image_tag: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn canonicalize_sorts_and_drops_comments() {
        let raw = "# comment\nrequests==2.0\n\nflask==1.0\n  flask==1.0  \n";
        assert_eq!(canonicalize(raw), "flask==1.0\nflask==1.0\nrequests==2.0");
    }

    #[test]
    fn canonicalize_is_order_independent() {
        let a = canonicalize("requests==2.0\nflask==1.0");
        let b = canonicalize("flask==1.0\nrequests==2.0");
        assert_eq!(a, b);
        assert_eq!(requirements_hash(&a), requirements_hash(&b));
    }

    #[tokio::test]
    async fn empty_manifest_resolves_to_base_image_without_building() {
        let host = Arc::new(FakeContainerHost::new());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let project = sample_project("proj-1");
        db.upsert_project(&project).await.unwrap();

        let manager = ImageManager::new(host.clone(), db, "clowdy-base-runtime:latest".to_string());
        let tag = manager.ensure_image(&project, "").await.unwrap();

        assert_eq!(tag, "clowdy-base-runtime:latest");
        assert!(host.built_image_tags().is_empty());
    }

    #[tokio::test]
    async fn same_manifest_builds_once() {
        let host = Arc::new(FakeContainerHost::new());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let project = sample_project("proj-1");
        db.upsert_project(&project).await.unwrap();

        let manager = ImageManager::new(host.clone(), db.clone(), "base:latest".to_string());
        let tag1 = manager.ensure_image(&project, "flask==1.0").await.unwrap();

        let refreshed = db.get_project("proj-1").await.unwrap().unwrap();
        let tag2 = manager.ensure_image(&refreshed, "flask==1.0").await.unwrap();

        assert_eq!(tag1, tag2);
        assert_eq!(host.built_image_tags().len(), 1);
    }

    #[tokio::test]
    async fn failed_build_retains_no_tag_and_reports_error() {
        let host = Arc::new(FakeContainerHost::new());
        host.set_fail_build(true);
        let db = Arc::new(Database::open_in_memory().unwrap());
        let project = sample_project("proj-1");
        db.upsert_project(&project).await.unwrap();

        let manager = ImageManager::new(host, db.clone(), "base:latest".to_string());
        let result = manager.ensure_image(&project, "flask==1.0").await;

        assert!(result.is_err());
        let loaded = db.get_project("proj-1").await.unwrap().unwrap();
        assert_eq!(loaded.image_build_status, ImageBuildStatus::Failed);
    }
}
