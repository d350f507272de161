//! Invocation engine: the central component. One call to
//! [`InvocationEngine::invoke`] produces exactly one `Invocation` record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::container::{ContainerError, ContainerHost, ContainerLimits, ExitOutcome, TarEntry};
use crate::database::Database;
use crate::error::{DaemonError, Result};
use crate::image::ImageManager;
use crate::types::{Function, ImageBuildStatus, Invocation, InvocationSource, InvocationStatus, Project};

const BOOTSTRAP_SCRIPT: &str = include_str!("../../assets/bootstrap.py");
const INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one invocation, before it has been turned into a persisted
/// `Invocation` record and an HTTP/gateway response.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub invocation_id: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub status: InvocationStatus,
}

pub struct InvocationEngine {
    host: Arc<dyn ContainerHost>,
    db: Arc<Database>,
    images: Arc<ImageManager>,
}

/// Gateway-only context threaded through an invocation so the record store
/// can enforce the `source`-tied method/path invariant.
#[derive(Debug, Clone)]
pub struct GatewayContext {
    pub method: String,
    pub path: String,
}

impl InvocationEngine {
    pub fn new(host: Arc<dyn ContainerHost>, db: Arc<Database>, images: Arc<ImageManager>) -> Self {
        Self { host, db, images }
    }

    /// Resolves, executes, and records one invocation of `function` against
    /// `input`. `gateway` is `Some` for gateway-dispatched calls and `None`
    /// for direct invocations.
    pub async fn invoke(
        &self,
        function: &Function,
        input: Value,
        gateway: Option<GatewayContext>,
    ) -> Result<InvocationOutcome> {
        let source = if gateway.is_some() {
            InvocationSource::Gateway
        } else {
            InvocationSource::Direct
        };

        let start = tokio::time::Instant::now();
        let invocation_id = Uuid::new_v4().to_string();

        let result = self.run(function, &input, &invocation_id).await;

        let duration_ms = start.elapsed().as_millis() as i64;

        let (status, output, error_message) = match result {
            Ok(value) => (InvocationStatus::Success, Some(value), None),
            Err(RunError::Timeout) => (
                InvocationStatus::Timeout,
                None,
                Some("execution timeout".to_string()),
            ),
            Err(RunError::Execution(msg)) => (InvocationStatus::Error, None, Some(msg)),
            Err(RunError::Engine(msg)) => (
                InvocationStatus::Error,
                None,
                Some(format!("engine unavailable: {msg}")),
            ),
        };

        let record = Invocation {
            id: invocation_id.clone(),
            function_id: function.id.clone(),
            input_json: input,
            output_json: output.clone(),
            status,
            duration_ms,
            source,
            http_method: gateway.as_ref().map(|g| g.method.clone()),
            http_path: gateway.as_ref().map(|g| g.path.clone()),
            created_at: chrono::Utc::now().timestamp(),
        };

        if let Err(e) = self.db.append_invocation(&record).await {
            warn!(invocation_id = %invocation_id, error = %e, "failed to persist invocation record");
        }

        Ok(InvocationOutcome {
            invocation_id,
            success: status == InvocationStatus::Success,
            output,
            error: error_message,
            duration_ms,
            status,
        })
    }

    async fn run(&self, function: &Function, input: &Value, invocation_id: &str) -> RunResult<Value> {
        let (project, image) = self.resolve_project_and_image(function).await?;

        let mut env = HashMap::new();
        if let Some(project) = &project {
            if let Ok(project_vars) = self.db.list_env_vars(&project.id).await {
                for var in project_vars {
                    env.insert(var.key, var.value);
                }
            }
        }
        if let Some(url) = project.as_ref().and_then(|p| p.database_url.as_ref()) {
            env.insert("DATABASE_URL".to_string(), url.clone());
        }
        env.insert("INPUT_JSON".to_string(), input.to_string());
        env.insert("CLOWDY_FUNCTION_ID".to_string(), function.id.clone());
        env.insert("CLOWDY_INVOCATION_ID".to_string(), invocation_id.to_string());

        let limits = ContainerLimits::invocation_default();

        let container_id = self
            .host
            .create_container(&image, &env, limits)
            .await
            .map_err(RunError::from)?;

        let entries = vec![
            TarEntry {
                path: "function.py".to_string(),
                contents: function.code.clone().into_bytes(),
            },
            TarEntry {
                path: "bootstrap.py".to_string(),
                contents: BOOTSTRAP_SCRIPT.as_bytes().to_vec(),
            },
        ];

        let result = match self.host.put_archive(&container_id, "/app", entries).await {
            Ok(()) => match self.host.start_and_wait(&container_id, INVOCATION_TIMEOUT).await {
                Ok(ExitOutcome::Timeout) => Err(RunError::Timeout),
                Ok(ExitOutcome::Exited(code)) => match self.host.read_logs(&container_id).await {
                    Ok((stdout, stderr)) => parse_result(code, &stdout, &stderr),
                    Err(e) => Err(RunError::from(e)),
                },
                Err(e) => Err(RunError::from(e)),
            },
            Err(e) => Err(RunError::from(e)),
        };

        // Unconditional best-effort cleanup: the container is never kept
        // alive after the invocation completes, win or lose.
        if let Err(e) = self.host.remove_container(&container_id).await {
            warn!(container_id = %container_id, error = %e, "cleanup failed");
        }

        result
    }

    /// Resolves the function's project (if any) and the image tag its
    /// invocation should run against. A project seen for the first time
    /// (`image_build_status == None`) triggers its initial build here;
    /// subsequent invocations only read back whatever status that build (or
    /// a concurrent one) left behind — a `Failed` project is not retried on
    /// every call.
    async fn resolve_project_and_image(
        &self,
        function: &Function,
    ) -> RunResult<(Option<Project>, String)> {
        let Some(project_id) = &function.project_id else {
            return Ok((None, self.images.base_image()));
        };

        let project = self
            .db
            .get_project(project_id)
            .await
            .map_err(|e| RunError::Engine(e.to_string()))?
            .ok_or_else(|| RunError::Engine(format!("project {project_id} not found")))?;

        let tag = match project.image_build_status {
            ImageBuildStatus::Ready => project
                .runtime_image_tag
                .clone()
                .unwrap_or_else(|| self.images.base_image()),
            ImageBuildStatus::Failed => project
                .runtime_image_tag
                .clone()
                .unwrap_or_else(|| self.images.base_image()),
            ImageBuildStatus::Building => {
                // Waiting on the project's build lock blocks until the build
                // finishes (or fails), at which point the retained tag (if
                // any) or the base image is used.
                self.images
                    .wait_for_build(&project)
                    .await
                    .map_err(|e| RunError::Engine(e.to_string()))?
            }
            ImageBuildStatus::None => self
                .images
                .ensure_image(&project, &project.requirements_text)
                .await
                .map_err(|e| RunError::Engine(e.to_string()))?,
        };

        Ok((Some(project), tag))
    }
}

fn parse_result(exit_code: i64, stdout: &[u8], stderr: &[u8]) -> RunResult<Value> {
    if exit_code != 0 {
        let message = parse_error_message(stderr)
            .unwrap_or_else(|| format!("function exited with code {exit_code}"));
        return Err(RunError::Execution(message));
    }

    let stdout_text = String::from_utf8_lossy(stdout);
    let last_line = stdout_text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    serde_json::from_str::<Value>(last_line)
        .map_err(|_| RunError::Execution("function did not print a JSON result line".to_string()))
}

fn parse_error_message(stderr: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stderr);
    let last_line = text.lines().rev().find(|line| !line.trim().is_empty())?;
    let parsed: Value = serde_json::from_str(last_line).ok()?;
    parsed.get("error")?.as_str().map(str::to_string)
}

enum RunError {
    Timeout,
    Execution(String),
    Engine(String),
}

impl From<ContainerError> for RunError {
    fn from(e: ContainerError) -> Self {
        RunError::Engine(e.to_string())
    }
}

type RunResult<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::{FakeContainerHost, ScriptedRun};
    use crate::types::{FunctionStatus, DEFAULT_RUNTIME_ID};

    fn sample_function() -> Function {
        Function {
            id: "fn-1".to_string(),
            project_id: None,
            owner_id: "owner-1".to_string(),
            name: "echo".to_string(),
            description: None,
            code: "def handler(i): return {\"echo\": i}".to_string(),
            runtime_id: DEFAULT_RUNTIME_ID.to_string(),
            status: FunctionStatus::Active,
            created_at: 0,
            updated_at: 0,
        }
    }

    async fn engine_with_host(host: Arc<FakeContainerHost>) -> (InvocationEngine, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let images = Arc::new(ImageManager::new(host.clone(), db.clone(), "base:latest".to_string()));
        let engine = InvocationEngine::new(host, db.clone(), images);
        (engine, db)
    }

    #[tokio::test]
    async fn successful_invocation_is_recorded_as_success() {
        let host = Arc::new(FakeContainerHost::new());
        host.push_run(ScriptedRun::Exit {
            code: 0,
            stdout: b"{\"echo\":{\"n\":7}}\n".to_vec(),
            stderr: Vec::new(),
        });
        let (engine, db) = engine_with_host(host).await;

        let outcome = engine
            .invoke(&sample_function(), serde_json::json!({"n": 7}), None)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.output, Some(serde_json::json!({"echo": {"n": 7}})));
        assert_eq!(outcome.status, InvocationStatus::Success);

        let records = db.list_invocations_for_function("fn-1", 50).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, InvocationStatus::Success);
        assert!(records[0].http_method.is_none());
    }

    #[tokio::test]
    async fn timeout_is_recorded_with_timeout_status() {
        let host = Arc::new(FakeContainerHost::new());
        host.push_run(ScriptedRun::Timeout);
        let (engine, db) = engine_with_host(host).await;

        let outcome = engine.invoke(&sample_function(), Value::Null, None).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status, InvocationStatus::Timeout);
        assert_eq!(outcome.error.as_deref(), Some("execution timeout"));

        let records = db.list_invocations_for_function("fn-1", 50).await.unwrap();
        assert_eq!(records[0].status, InvocationStatus::Timeout);
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr_message() {
        let host = Arc::new(FakeContainerHost::new());
        host.push_run(ScriptedRun::Exit {
            code: 1,
            stdout: Vec::new(),
            stderr: b"{\"error\": \"boom\", \"traceback\": \"...\"}\n".to_vec(),
        });
        let (engine, _db) = engine_with_host(host).await;

        let outcome = engine.invoke(&sample_function(), Value::Null, None).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status, InvocationStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn gateway_invocation_records_method_and_path() {
        let host = Arc::new(FakeContainerHost::new());
        host.push_run(ScriptedRun::Exit {
            code: 0,
            stdout: b"1\n".to_vec(),
            stderr: Vec::new(),
        });
        let (engine, db) = engine_with_host(host).await;

        engine
            .invoke(
                &sample_function(),
                Value::Null,
                Some(GatewayContext {
                    method: "GET".to_string(),
                    path: "/widgets".to_string(),
                }),
            )
            .await
            .unwrap();

        let records = db.list_invocations_for_function("fn-1", 50).await.unwrap();
        assert_eq!(records[0].http_method.as_deref(), Some("GET"));
        assert_eq!(records[0].http_path.as_deref(), Some("/widgets"));
        assert!(records[0].is_well_formed());
    }

    fn sample_project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            owner_id: "owner-1".to_string(),
            slug: "demo".to_string(),
            name: "Demo".to_string(),
            status: crate::types::ProjectStatus::Active,
            database_url: Some("postgres://example/db".to_string()),
            requirements_text: String::new(),
            requirements_hash: None,
            image_build_status: ImageBuildStatus::None,
            image_build_error: None,
            runtime_image_tag: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// A project env var also named `DATABASE_URL` loses to the provisioned
    /// connection string.
    #[tokio::test]
    async fn provisioned_database_url_overrides_same_named_env_var() {
        let host = Arc::new(FakeContainerHost::new());
        host.push_run(ScriptedRun::Exit {
            code: 0,
            stdout: b"1\n".to_vec(),
            stderr: Vec::new(),
        });
        let (engine, db) = engine_with_host(host.clone()).await;

        db.upsert_project(&sample_project("proj-1")).await.unwrap();
        db.upsert_env_var(&crate::types::EnvVar {
            project_id: "proj-1".to_string(),
            key: "DATABASE_URL".to_string(),
            value: "sqlite://user-supplied".to_string(),
            is_secret: true,
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();
        db.upsert_env_var(&crate::types::EnvVar {
            project_id: "proj-1".to_string(),
            key: "API_KEY".to_string(),
            value: "abc".to_string(),
            is_secret: true,
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();

        let mut function = sample_function();
        function.project_id = Some("proj-1".to_string());

        engine.invoke(&function, Value::Null, None).await.unwrap();

        let env = host.last_env().unwrap();
        assert_eq!(env.get("DATABASE_URL").map(String::as_str), Some("postgres://example/db"));
        assert_eq!(env.get("API_KEY").map(String::as_str), Some("abc"));
    }

    /// The first invocation against a project with a non-empty manifest
    /// triggers exactly one image build; the build is cached.
    #[tokio::test]
    async fn first_invocation_triggers_image_build_then_reuses_it() {
        let host = Arc::new(FakeContainerHost::new());
        host.push_run(ScriptedRun::Exit {
            code: 0,
            stdout: b"1\n".to_vec(),
            stderr: Vec::new(),
        });
        host.push_run(ScriptedRun::Exit {
            code: 0,
            stdout: b"1\n".to_vec(),
            stderr: Vec::new(),
        });
        let (engine, db) = engine_with_host(host.clone()).await;

        let mut project = sample_project("proj-1");
        project.database_url = None;
        project.requirements_text = "flask==1.0".to_string();
        db.upsert_project(&project).await.unwrap();

        let mut function = sample_function();
        function.project_id = Some("proj-1".to_string());

        engine.invoke(&function, Value::Null, None).await.unwrap();
        let after_first = db.get_project("proj-1").await.unwrap().unwrap();
        assert_eq!(after_first.image_build_status, ImageBuildStatus::Ready);
        assert!(after_first.runtime_image_tag.is_some());

        engine.invoke(&function, Value::Null, None).await.unwrap();

        assert_eq!(host.built_image_tags().len(), 1);
    }
}
