//! Route compiler: turns a project's route rows into an ordered matcher,
//! cached per project and re-derived only when the route table actually
//! changes.

use dashmap::DashMap;

use crate::database::Database;
use crate::error::Result;
use crate::types::Route;

/// One path segment of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub route: Route,
    segments: Vec<Segment>,
}

impl CompiledRoute {
    fn compile(route: Route) -> Self {
        let segments = route
            .path_pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if let Some(name) = s.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self { route, segments }
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Attempts to match `path_segments` against this route, returning the
    /// extracted named parameters on success.
    pub fn matches(&self, path_segments: &[&str]) -> Option<Vec<(String, String)>> {
        if self.segments.len() != path_segments.len() {
            return None;
        }

        let mut params = Vec::new();
        for (segment, value) in self.segments.iter().zip(path_segments.iter()) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != value {
                        return None;
                    }
                }
                Segment::Param(name) => params.push((name.clone(), value.to_string())),
            }
        }
        Some(params)
    }
}

/// Compiles `routes` into priority order: exact-method matches before `ANY`,
/// more literal segments before fewer, ties broken by original (insertion)
/// order.
fn compile_and_sort(mut routes: Vec<Route>) -> Vec<CompiledRoute> {
    routes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let mut compiled: Vec<CompiledRoute> = routes.into_iter().map(CompiledRoute::compile).collect();
    compiled.sort_by(|a, b| {
        b.route
            .method
            .exactness()
            .cmp(&a.route.method.exactness())
            .then(b.literal_count().cmp(&a.literal_count()))
    });
    compiled
}

struct CacheEntry {
    fingerprint: i64,
    routes: Vec<CompiledRoute>,
}

/// Per-project compiled-route cache, keyed by project id and invalidated by
/// comparing against `Database::routes_fingerprint` rather than recompiling
/// on every dispatch.
pub struct RouteCache {
    entries: DashMap<String, CacheEntry>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub async fn get(&self, db: &Database, project_id: &str) -> Result<Vec<CompiledRoute>> {
        let fingerprint = db.routes_fingerprint(project_id).await?;

        if let Some(entry) = self.entries.get(project_id) {
            if entry.fingerprint == fingerprint {
                return Ok(entry.routes.clone());
            }
        }

        let routes = db.list_routes(project_id).await?;
        let compiled = compile_and_sort(routes);
        self.entries.insert(
            project_id.to_string(),
            CacheEntry {
                fingerprint,
                routes: compiled.clone(),
            },
        );
        Ok(compiled)
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds the first matching route for `method`/`path_segments`, honoring the
/// priority order `compile_and_sort` already established.
pub fn find_match<'a>(
    compiled: &'a [CompiledRoute],
    method: &axum::http::Method,
    path_segments: &[&str],
) -> Option<(&'a CompiledRoute, Vec<(String, String)>)> {
    compiled.iter().find_map(|candidate| {
        if !candidate.route.method.matches(method) {
            return None;
        }
        candidate
            .matches(path_segments)
            .map(|params| (candidate, params))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpMethod;

    fn route(id: &str, method: HttpMethod, pattern: &str, created_at: i64) -> Route {
        Route {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            function_id: format!("fn-{id}"),
            method,
            path_pattern: pattern.to_string(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn exact_method_outranks_any_for_same_path() {
        let routes = vec![
            route("r1", HttpMethod::Any, "/widgets", 0),
            route("r2", HttpMethod::Get, "/widgets", 1),
        ];
        let compiled = compile_and_sort(routes);
        assert_eq!(compiled[0].route.id, "r2");
    }

    #[test]
    fn more_specific_literal_path_outranks_param_path() {
        let routes = vec![
            route("r1", HttpMethod::Get, "/widgets/:id", 0),
            route("r2", HttpMethod::Get, "/widgets/special", 1),
        ];
        let compiled = compile_and_sort(routes);
        assert_eq!(compiled[0].route.id, "r2");
    }

    #[test]
    fn match_extracts_named_params() {
        let compiled = CompiledRoute::compile(route("r1", HttpMethod::Get, "/widgets/:id", 0));
        let params = compiled.matches(&["widgets", "42"]).unwrap();
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn find_match_respects_priority_order() {
        let routes = vec![
            route("any", HttpMethod::Any, "/widgets/:id", 0),
            route("get", HttpMethod::Get, "/widgets/:id", 1),
        ];
        let compiled = compile_and_sort(routes);
        let (matched, _) =
            find_match(&compiled, &axum::http::Method::GET, &["widgets", "1"]).unwrap();
        assert_eq!(matched.route.id, "get");
    }
}
