//! Route declarations for mounted tool backends.
//!
//! A backend declares its routes as `"METHOD /path"` strings. Paths are
//! relative to the tool's mount prefix; a `{name}` segment matches any one
//! segment, and the method `*` (or `ANY`) matches every method.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RouteError;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];
const ANY_METHOD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteSpec {
    pub method: String,
    pub path: String,
}

impl RouteSpec {
    /// Parse a `"METHOD /path"` declaration.
    pub fn parse(entry: &str) -> Result<Self, RouteError> {
        let malformed = |reason: &str| RouteError::Malformed {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = entry.split_whitespace();
        let (Some(method), Some(path), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed("expected `METHOD /path`"));
        };

        let method = method.to_ascii_uppercase();
        let method = if method == "ANY" { ANY_METHOD.to_string() } else { method };
        if method != ANY_METHOD && !METHODS.contains(&method.as_str()) {
            return Err(malformed("unknown HTTP method"));
        }

        if !path.starts_with('/') {
            return Err(malformed("path must start with `/`"));
        }
        let path = normalize_path(path);
        for segment in segments(&path) {
            if segment.is_empty() {
                return Err(malformed("empty path segment"));
            }
            if segment == "." || segment == ".." {
                return Err(malformed("relative path segment"));
            }
            if segment.starts_with('{') != segment.ends_with('}') {
                return Err(malformed("unbalanced `{}` in path segment"));
            }
            if segment == "{}" {
                return Err(malformed("unnamed path parameter"));
            }
        }

        Ok(Self { method, path })
    }

    pub fn matches_method(&self, method: &str) -> bool {
        self.method == ANY_METHOD || self.method.eq_ignore_ascii_case(method)
    }

    /// Segment-wise match of a normalized request path.
    pub fn matches_path(&self, path: &str) -> bool {
        let pattern: Vec<&str> = segments(&self.path).collect();
        let actual: Vec<&str> = segments(path).collect();
        pattern.len() == actual.len()
            && pattern
                .iter()
                .zip(&actual)
                .all(|(p, a)| (is_param(p) && !a.is_empty()) || p == a)
    }

    fn literal_segments(&self) -> usize {
        segments(&self.path).filter(|s| !is_param(s)).count()
    }

    /// Path with parameter names erased, so `{a}` and `{b}` compare equal.
    fn shape(&self) -> String {
        segments(&self.path)
            .map(|s| if is_param(s) { "{}" } else { s })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn overlaps(&self, other: &RouteSpec) -> bool {
        let methods_overlap = self.method == ANY_METHOD
            || other.method == ANY_METHOD
            || self.method == other.method;
        methods_overlap && self.shape() == other.shape()
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Outcome of resolving a request against a [`RouteTable`].
#[derive(Debug, PartialEq, Eq)]
pub enum RouteMatch<'a> {
    Found(&'a RouteSpec),
    /// The path exists but not for this method; carries the allowed methods.
    MethodNotAllowed(Vec<String>),
    NotFound,
}

/// The validated, conflict-free route table of one tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    routes: Vec<RouteSpec>,
}

impl RouteTable {
    /// Parse raw declarations, rejecting malformed entries and overlapping
    /// routes within the same tool.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, RouteError> {
        let mut routes: Vec<RouteSpec> = Vec::with_capacity(entries.len());
        for entry in entries {
            let route = RouteSpec::parse(entry.as_ref())?;
            if let Some(existing) = routes.iter().find(|r| r.overlaps(&route)) {
                return Err(RouteError::Conflict {
                    first: existing.to_string(),
                    second: route.to_string(),
                });
            }
            routes.push(route);
        }
        Ok(Self { routes })
    }

    pub fn from_specs(specs: Vec<RouteSpec>) -> Result<Self, RouteError> {
        let entries: Vec<String> = specs.iter().map(ToString::to_string).collect();
        Self::parse(&entries)
    }

    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Find the route for a request. Among matching routes the one with the
    /// most literal segments wins, so `/items/export` beats `/items/{id}`.
    pub fn resolve(&self, method: &str, path: &str) -> RouteMatch<'_> {
        let path = normalize_path(path);
        let candidates: Vec<&RouteSpec> =
            self.routes.iter().filter(|r| r.matches_path(&path)).collect();
        if candidates.is_empty() {
            return RouteMatch::NotFound;
        }

        match candidates
            .iter()
            .copied()
            .filter(|r| r.matches_method(method))
            .max_by_key(|r| r.literal_segments())
        {
            Some(route) => RouteMatch::Found(route),
            None => {
                let mut allowed: Vec<String> =
                    candidates.iter().map(|r| r.method.clone()).collect();
                allowed.sort();
                allowed.dedup();
                RouteMatch::MethodNotAllowed(allowed)
            }
        }
    }
}

/// Ensure a leading `/` and drop a trailing one (except for the root).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    // The root path has no segments at all.
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

fn is_param(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}
