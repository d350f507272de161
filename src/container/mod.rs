//! Container host adapter: the one place the daemon talks to the container
//! engine. Everything above this module operates on the `ContainerHost`
//! trait so it can be exercised against `fake::FakeContainerHost` in tests
//! without a live engine.

mod host;

#[cfg(test)]
pub mod fake;

pub use host::DockerContainerHost;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container engine error: {0}")]
    Engine(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("container not found: {0}")]
    NotFound(String),
}

pub type ContainerResult<T> = Result<T, ContainerError>;

/// A single file entry in an in-memory tar build context or archive upload.
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub path: String,
    pub contents: Vec<u8>,
}

/// Fixed resource shape every invocation container gets. There is exactly
/// one set of limits in this domain — no per-function tuning — so this is a
/// plain struct rather than a builder.
#[derive(Debug, Clone, Copy)]
pub struct ContainerLimits {
    pub memory_bytes: i64,
    pub cpu_nanos: i64,
    pub pids_max: i64,
    pub read_only_rootfs: bool,
}

impl ContainerLimits {
    /// The fixed isolation floor every invocation container runs under:
    /// 128 MiB memory, 5·10⁸ nano-cores, network disabled, read-only
    /// rootfs, writable `/tmp`.
    pub fn invocation_default() -> Self {
        Self {
            memory_bytes: 128 * 1024 * 1024,
            cpu_nanos: 500_000_000,
            pids_max: 64,
            read_only_rootfs: true,
        }
    }
}

/// Outcome of racing a container's exit against a wall-clock timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i64),
    Timeout,
}

/// Abstraction over the container engine. Implemented for real by
/// `DockerContainerHost` (bollard-backed) and, under `#[cfg(test)]`, by
/// `fake::FakeContainerHost`.
#[async_trait]
pub trait ContainerHost: Send + Sync {
    /// Builds an image from an in-memory tar context and returns the image
    /// id/tag bollard reports back.
    async fn build_image(&self, context: Vec<TarEntry>, tag: &str) -> ContainerResult<String>;

    /// Creates a container from `image` with `env` injected and `limits`
    /// applied. Network access is always disabled; no bind/volume mounts are
    /// ever attached. Returns the container id.
    async fn create_container(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        limits: ContainerLimits,
    ) -> ContainerResult<String>;

    /// Uploads a tar archive into the container's filesystem at `path`
    /// before it starts. The sole code-delivery mechanism.
    async fn put_archive(
        &self,
        container_id: &str,
        path: &str,
        entries: Vec<TarEntry>,
    ) -> ContainerResult<()>;

    /// Starts the container and waits for it to exit, racing the wait
    /// against `timeout`. On timeout the container is stopped then killed
    /// and `ExitOutcome::Timeout` is returned regardless of what the engine
    /// eventually reports.
    async fn start_and_wait(
        &self,
        container_id: &str,
        timeout: std::time::Duration,
    ) -> ContainerResult<ExitOutcome>;

    /// Reads demultiplexed stdout/stderr captured by the engine.
    async fn read_logs(&self, container_id: &str) -> ContainerResult<(Vec<u8>, Vec<u8>)>;

    /// Best-effort forced removal. Errors are logged by the caller, never
    /// surfaced — a leaked stopped container is a cleanup nuisance, not a
    /// correctness problem.
    async fn remove_container(&self, container_id: &str) -> ContainerResult<()>;
}
