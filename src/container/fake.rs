//! In-memory `ContainerHost` double used by unit tests for `image` and
//! `invoke`, so their logic can be exercised without a live container
//! engine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{ContainerError, ContainerHost, ContainerLimits, ContainerResult, ExitOutcome, TarEntry};

/// A scripted outcome for one `start_and_wait` call.
#[derive(Clone)]
pub enum ScriptedRun {
    Exit { code: i64, stdout: Vec<u8>, stderr: Vec<u8> },
    Timeout,
}

pub struct FakeContainerHost {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Queued outcomes, consumed in order by successive `start_and_wait` calls.
    runs: Vec<ScriptedRun>,
    next_run: usize,
    logs: HashMap<String, (Vec<u8>, Vec<u8>)>,
    built_images: Vec<(String, Vec<TarEntry>)>,
    fail_build: bool,
    /// The `env` passed to the most recent `create_container` call, so
    /// tests can assert on environment injection without a live engine.
    last_env: Option<HashMap<String, String>>,
}

impl FakeContainerHost {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                runs: Vec::new(),
                next_run: 0,
                logs: HashMap::new(),
                built_images: Vec::new(),
                fail_build: false,
                last_env: None,
            }),
        }
    }

    /// Queues the outcome of the next `start_and_wait` call.
    pub fn push_run(&self, run: ScriptedRun) {
        self.inner.lock().unwrap().runs.push(run);
    }

    pub fn set_fail_build(&self, fail: bool) {
        self.inner.lock().unwrap().fail_build = fail;
    }

    pub fn last_env(&self) -> Option<HashMap<String, String>> {
        self.inner.lock().unwrap().last_env.clone()
    }

    pub fn built_image_tags(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .built_images
            .iter()
            .map(|(tag, _)| tag.clone())
            .collect()
    }
}

impl Default for FakeContainerHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerHost for FakeContainerHost {
    async fn build_image(&self, context: Vec<TarEntry>, tag: &str) -> ContainerResult<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_build {
            return Err(ContainerError::Build("scripted build failure".to_string()));
        }
        inner.built_images.push((tag.to_string(), context));
        Ok(tag.to_string())
    }

    async fn create_container(
        &self,
        _image: &str,
        env: &HashMap<String, String>,
        _limits: ContainerLimits,
    ) -> ContainerResult<String> {
        self.inner.lock().unwrap().last_env = Some(env.clone());
        Ok(format!("fake-{}", Uuid::new_v4()))
    }

    async fn put_archive(
        &self,
        _container_id: &str,
        _path: &str,
        _entries: Vec<TarEntry>,
    ) -> ContainerResult<()> {
        Ok(())
    }

    async fn start_and_wait(
        &self,
        container_id: &str,
        _timeout: Duration,
    ) -> ContainerResult<ExitOutcome> {
        let (run, outcome) = {
            let mut inner = self.inner.lock().unwrap();
            let idx = inner.next_run;
            inner.next_run += 1;
            let run = inner
                .runs
                .get(idx)
                .cloned()
                .unwrap_or(ScriptedRun::Exit { code: 0, stdout: Vec::new(), stderr: Vec::new() });
            let outcome = match &run {
                ScriptedRun::Exit { code, .. } => ExitOutcome::Exited(*code),
                ScriptedRun::Timeout => ExitOutcome::Timeout,
            };
            (run, outcome)
        };

        if let ScriptedRun::Exit { stdout, stderr, .. } = run {
            self.inner
                .lock()
                .unwrap()
                .logs
                .insert(container_id.to_string(), (stdout, stderr));
        }

        Ok(outcome)
    }

    async fn read_logs(&self, container_id: &str) -> ContainerResult<(Vec<u8>, Vec<u8>)> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .logs
            .get(container_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_container(&self, _container_id: &str) -> ContainerResult<()> {
        Ok(())
    }
}
