use serde::{Deserialize, Serialize};

/// A gateway route: binds an HTTP method and path pattern to a function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub project_id: String,
    pub function_id: String,
    pub method: HttpMethod,
    pub path_pattern: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Any,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Any => "ANY",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "ANY" => Ok(HttpMethod::Any),
            other => Err(format!("unknown http method: {other}")),
        }
    }
}

impl HttpMethod {
    /// Whether this route matches a request using `method`. `Any` matches
    /// every concrete method; otherwise matching is exact.
    pub fn matches(&self, method: &axum::http::Method) -> bool {
        match self {
            HttpMethod::Any => true,
            HttpMethod::Get => method == axum::http::Method::GET,
            HttpMethod::Post => method == axum::http::Method::POST,
            HttpMethod::Put => method == axum::http::Method::PUT,
            HttpMethod::Patch => method == axum::http::Method::PATCH,
            HttpMethod::Delete => method == axum::http::Method::DELETE,
        }
    }

    /// Priority used when sorting candidate routes: exact-method matches are
    /// preferred over `ANY` so a specific handler wins over a catch-all.
    pub fn exactness(&self) -> u8 {
        match self {
            HttpMethod::Any => 0,
            _ => 1,
        }
    }
}
