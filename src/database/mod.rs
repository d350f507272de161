//! Persistence module.
//!
//! Backs the daemon's local read model (Project/Function/EnvVar/Route rows,
//! resolved locally so invocation handling never needs a network hop per
//! call) and the append-only invocation record store.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{DaemonError, Result};
use crate::types::{
    EnvVar, Function, FunctionStatus, HttpMethod, ImageBuildStatus, Invocation, InvocationSource,
    InvocationStatus, Project, ProjectStatus, Route,
};

/// Aggregate stats returned by `GET /api/stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvocationAggregate {
    pub total_functions: i64,
    pub total_invocations: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DaemonError::Internal(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_tables(&conn)?;

        info!("database opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_tables(conn: &Connection) -> SqliteResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                slug TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                database_url TEXT,
                requirements_text TEXT NOT NULL DEFAULT '',
                requirements_hash TEXT,
                image_build_status TEXT NOT NULL DEFAULT 'none',
                image_build_error TEXT,
                runtime_image_tag TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                UNIQUE(owner_id, slug)
            );

            CREATE TABLE IF NOT EXISTS functions (
                id TEXT PRIMARY KEY,
                project_id TEXT,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                code TEXT NOT NULL,
                runtime_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_functions_project_name
                ON functions(project_id, name) WHERE project_id IS NOT NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_functions_owner_name
                ON functions(owner_id, name) WHERE project_id IS NULL;

            CREATE TABLE IF NOT EXISTS env_vars (
                project_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                is_secret INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                PRIMARY KEY (project_id, key)
            );

            CREATE TABLE IF NOT EXISTS routes (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                function_id TEXT NOT NULL,
                method TEXT NOT NULL,
                path_pattern TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                UNIQUE(project_id, method, path_pattern)
            );

            CREATE TABLE IF NOT EXISTS invocations (
                id TEXT PRIMARY KEY,
                function_id TEXT NOT NULL,
                input_json TEXT NOT NULL,
                output_json TEXT,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                source TEXT NOT NULL,
                http_method TEXT,
                http_path TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE INDEX IF NOT EXISTS idx_invocations_function
                ON invocations(function_id, created_at DESC);
            "#,
        )?;

        Ok(())
    }

    // --- projects ---------------------------------------------------------

    pub async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().await;
        let project = conn
            .query_row(
                r#"SELECT id, owner_id, slug, name, status, database_url,
                          requirements_text, requirements_hash, image_build_status,
                          image_build_error, runtime_image_tag, created_at, updated_at
                   FROM projects WHERE id = ?1"#,
                [id],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    pub async fn upsert_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO projects
                (id, owner_id, slug, name, status, database_url, requirements_text,
                 requirements_hash, image_build_status, image_build_error, runtime_image_tag,
                 created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
               ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                slug = excluded.slug,
                name = excluded.name,
                status = excluded.status,
                database_url = excluded.database_url,
                requirements_text = excluded.requirements_text,
                requirements_hash = excluded.requirements_hash,
                image_build_status = excluded.image_build_status,
                image_build_error = excluded.image_build_error,
                runtime_image_tag = excluded.runtime_image_tag,
                updated_at = excluded.updated_at"#,
            params![
                project.id,
                project.owner_id,
                project.slug,
                project.name,
                project.status.to_string(),
                project.database_url,
                project.requirements_text,
                project.requirements_hash,
                project.image_build_status.to_string(),
                project.image_build_error,
                project.runtime_image_tag,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Transitions a project's build state. Used by the image lifecycle
    /// manager; `tag` is retained across a `Failed` transition so the last
    /// known-good image stays resolvable. `error` is cleared on success and
    /// set on failure; `requirements_hash` records the manifest the tag (or
    /// failure) corresponds to.
    pub async fn set_image_build_status(
        &self,
        project_id: &str,
        status: ImageBuildStatus,
        tag: Option<&str>,
        requirements_hash: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"UPDATE projects SET
                image_build_status = ?2,
                runtime_image_tag = COALESCE(?3, runtime_image_tag),
                requirements_hash = COALESCE(?4, requirements_hash),
                image_build_error = ?5,
                updated_at = strftime('%s','now')
               WHERE id = ?1"#,
            params![project_id, status.to_string(), tag, requirements_hash, error],
        )?;
        Ok(())
    }

    /// Looks up a project by its URL slug. Slugs are unique per owner, but
    /// the gateway's incoming request carries no owner context, so this
    /// resolves the first matching row.
    pub async fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().await;
        let project = conn
            .query_row(
                r#"SELECT id, owner_id, slug, name, status, database_url,
                          requirements_text, requirements_hash, image_build_status,
                          image_build_error, runtime_image_tag, created_at, updated_at
                   FROM projects WHERE slug = ?1 LIMIT 1"#,
                [slug],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    // --- functions ----------------------------------------------------

    pub async fn get_function(&self, id: &str) -> Result<Option<Function>> {
        let conn = self.conn.lock().await;
        let function = conn
            .query_row(
                r#"SELECT id, project_id, owner_id, name, description, code,
                          runtime_id, status, created_at, updated_at
                   FROM functions WHERE id = ?1"#,
                [id],
                row_to_function,
            )
            .optional()?;
        Ok(function)
    }

    pub async fn upsert_function(&self, function: &Function) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO functions
                (id, project_id, owner_id, name, description, code, runtime_id, status, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
               ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                name = excluded.name,
                description = excluded.description,
                code = excluded.code,
                runtime_id = excluded.runtime_id,
                status = excluded.status,
                updated_at = excluded.updated_at"#,
            params![
                function.id,
                function.project_id,
                function.owner_id,
                function.name,
                function.description,
                function.code,
                function.runtime_id,
                function.status.to_string(),
                function.created_at,
                function.updated_at,
            ],
        )?;
        Ok(())
    }

    // --- env vars -------------------------------------------------------

    pub async fn list_env_vars(&self, project_id: &str) -> Result<Vec<EnvVar>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT project_id, key, value, is_secret, created_at, updated_at FROM env_vars WHERE project_id = ?1",
        )?;
        let rows = stmt
            .query_map([project_id], |row| {
                let is_secret: i64 = row.get(3)?;
                Ok(EnvVar {
                    project_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                    is_secret: is_secret != 0,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Idempotent: re-setting the same (key, value, is_secret) is a no-op
    /// change to `value`/`is_secret`, only `updated_at` moves.
    pub async fn upsert_env_var(&self, env_var: &EnvVar) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO env_vars (project_id, key, value, is_secret, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(project_id, key) DO UPDATE SET
                value = excluded.value,
                is_secret = excluded.is_secret,
                updated_at = excluded.updated_at"#,
            params![
                env_var.project_id,
                env_var.key,
                env_var.value,
                env_var.is_secret,
                env_var.created_at,
                env_var.updated_at,
            ],
        )?;
        Ok(())
    }

    // --- routes -----------------------------------------------------------

    pub async fn list_routes(&self, project_id: &str) -> Result<Vec<Route>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, project_id, function_id, method, path_pattern, created_at, updated_at
               FROM routes WHERE project_id = ?1"#,
        )?;
        let rows = stmt
            .query_map([project_id], row_to_route)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn insert_route(&self, route: &Route) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO routes (id, project_id, function_id, method, path_pattern, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                route.id,
                route.project_id,
                route.function_id,
                route.method.to_string(),
                route.path_pattern,
                route.created_at,
                route.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Cheap fingerprint of a project's route table, used by
    /// `gateway::compiler::RouteCache` to decide whether its compiled matcher
    /// is stale without re-reading every row.
    pub async fn routes_fingerprint(&self, project_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let fingerprint: i64 = conn.query_row(
            "SELECT COALESCE(COUNT(*), 0) + COALESCE(MAX(updated_at), 0) FROM routes WHERE project_id = ?1",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(fingerprint)
    }

    // --- invocations --------------------------------------------------

    pub async fn append_invocation(&self, invocation: &Invocation) -> Result<()> {
        debug_assert!(invocation.is_well_formed());
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO invocations
                (id, function_id, input_json, output_json, status, duration_ms,
                 source, http_method, http_path, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                invocation.id,
                invocation.function_id,
                invocation.input_json.to_string(),
                invocation.output_json.as_ref().map(|v| v.to_string()),
                invocation.status.to_string(),
                invocation.duration_ms,
                invocation.source.to_string(),
                invocation.http_method,
                invocation.http_path,
                invocation.created_at,
            ],
        )?;
        Ok(())
    }

    pub async fn list_invocations_for_function(
        &self,
        function_id: &str,
        limit: u32,
    ) -> Result<Vec<Invocation>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, function_id, input_json, output_json, status, duration_ms,
                      source, http_method, http_path, created_at
               FROM invocations WHERE function_id = ?1
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?2"#,
        )?;
        let rows = stmt
            .query_map(params![function_id, limit], row_to_invocation)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// All invocations whose function's owner equals `owner_id`, aggregated
    /// into the `/api/stats` shape. A single scan; pagination is not needed
    /// at this aggregate's scope.
    pub async fn aggregate_for_owner(&self, owner_id: &str) -> Result<InvocationAggregate> {
        let conn = self.conn.lock().await;

        let total_functions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM functions WHERE owner_id = ?1",
            [owner_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            r#"SELECT i.status, i.duration_ms FROM invocations i
               JOIN functions f ON f.id = i.function_id
               WHERE f.owner_id = ?1"#,
        )?;
        let rows = stmt
            .query_map([owner_id], |row| {
                let status: String = row.get(0)?;
                let duration_ms: i64 = row.get(1)?;
                Ok((status, duration_ms))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let total_invocations = rows.len() as i64;
        let success_count = rows.iter().filter(|(status, _)| status == "success").count() as f64;
        let success_rate = if total_invocations > 0 {
            success_count / total_invocations as f64
        } else {
            0.0
        };
        let avg_duration_ms = if total_invocations > 0 {
            rows.iter().map(|(_, d)| *d as f64).sum::<f64>() / total_invocations as f64
        } else {
            0.0
        };

        Ok(InvocationAggregate {
            total_functions,
            total_invocations,
            success_rate,
            avg_duration_ms,
        })
    }
}

fn row_to_project(row: &rusqlite::Row) -> SqliteResult<Project> {
    let status: String = row.get(4)?;
    let image_build_status: String = row.get(8)?;
    Ok(Project {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
        status: status.parse().unwrap_or(ProjectStatus::Active),
        database_url: row.get(5)?,
        requirements_text: row.get(6)?,
        requirements_hash: row.get(7)?,
        image_build_status: image_build_status.parse().unwrap_or(ImageBuildStatus::None),
        image_build_error: row.get(9)?,
        runtime_image_tag: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn row_to_function(row: &rusqlite::Row) -> SqliteResult<Function> {
    let status: String = row.get(7)?;
    Ok(Function {
        id: row.get(0)?,
        project_id: row.get(1)?,
        owner_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        code: row.get(5)?,
        runtime_id: row.get(6)?,
        status: status.parse().unwrap_or(FunctionStatus::Active),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_route(row: &rusqlite::Row) -> SqliteResult<Route> {
    let method: String = row.get(3)?;
    Ok(Route {
        id: row.get(0)?,
        project_id: row.get(1)?,
        function_id: row.get(2)?,
        method: method.parse().unwrap_or(HttpMethod::Any),
        path_pattern: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_invocation(row: &rusqlite::Row) -> SqliteResult<Invocation> {
    let status: String = row.get(4)?;
    let source: String = row.get(6)?;
    let output_json: Option<String> = row.get(3)?;
    let input_json: String = row.get(2)?;
    Ok(Invocation {
        id: row.get(0)?,
        function_id: row.get(1)?,
        input_json: serde_json::from_str::<Value>(&input_json).unwrap_or(Value::Null),
        output_json: output_json.and_then(|s| serde_json::from_str(&s).ok()),
        status: status.parse().unwrap_or(InvocationStatus::Error),
        duration_ms: row.get(5)?,
        source: source.parse().unwrap_or(InvocationSource::Direct),
        http_method: row.get(7)?,
        http_path: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clowdy.sqlite3");

        let db = Database::open(&path).unwrap();
        db.upsert_project(&sample_project("proj-1")).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn project_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let project = sample_project("proj-1");
        db.upsert_project(&project).await.unwrap();

        let loaded = db.get_project("proj-1").await.unwrap().unwrap();
        assert_eq!(loaded.slug, "demo");
        assert_eq!(loaded.image_build_status, ImageBuildStatus::None);
    }

    #[tokio::test]
    async fn image_build_status_transition_retains_tag_on_failure() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_project(&sample_project("proj-1")).await.unwrap();

        db.set_image_build_status("proj-1", ImageBuildStatus::Ready, Some("tag:abc"), Some("hash1"), None)
            .await
            .unwrap();
        db.set_image_build_status("proj-1", ImageBuildStatus::Failed, None, None, Some("pip error"))
            .await
            .unwrap();

        let loaded = db.get_project("proj-1").await.unwrap().unwrap();
        assert_eq!(loaded.image_build_status, ImageBuildStatus::Failed);
        assert_eq!(loaded.runtime_image_tag.as_deref(), Some("tag:abc"));
        assert_eq!(loaded.image_build_error.as_deref(), Some("pip error"));
    }

    #[tokio::test]
    async fn env_var_upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_project(&sample_project("proj-1")).await.unwrap();

        let var = EnvVar {
            project_id: "proj-1".to_string(),
            key: "API_KEY".to_string(),
            value: "v1".to_string(),
            is_secret: true,
            created_at: 0,
            updated_at: 0,
        };
        db.upsert_env_var(&var).await.unwrap();
        db.upsert_env_var(&var).await.unwrap();

        let vars = db.list_env_vars("proj-1").await.unwrap();
        assert_eq!(vars.len(), 1);
        assert!(vars[0].is_secret);
        assert_eq!(vars[0].value, "v1");
    }

    #[tokio::test]
    async fn invocations_are_listed_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_project(&sample_project("proj-1")).await.unwrap();
        db.upsert_function(&Function {
            id: "fn-1".to_string(),
            project_id: Some("proj-1".to_string()),
            owner_id: "owner-1".to_string(),
            name: "echo".to_string(),
            description: None,
            code: "def handler(i): return i".to_string(),
            runtime_id: crate::types::DEFAULT_RUNTIME_ID.to_string(),
            status: FunctionStatus::Active,
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();

        for i in 0..3 {
            db.append_invocation(&Invocation {
                id: format!("inv-{i}"),
                function_id: "fn-1".to_string(),
                input_json: Value::Null,
                output_json: None,
                status: InvocationStatus::Success,
                duration_ms: 10,
                source: InvocationSource::Direct,
                http_method: None,
                http_path: None,
                created_at: i,
            })
            .await
            .unwrap();
        }

        let rows = db.list_invocations_for_function("fn-1", 50).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, "inv-2");
    }
}
