//! Route definitions and the ordered route manifest.
//!
//! A route string such as `/blog/[slug]` or `/docs/[...path]` is split into
//! segments, each made of static, dynamic (`[name]`) or rest (`[...name]`)
//! parts. Every definition carries a compiled matcher; the manifest keeps the
//! definitions sorted by precedence so the first match wins.
use std::{cmp::Ordering, collections::BTreeMap, path::PathBuf, sync::Arc};

use regex::Regex;
use thiserror::Error;

use crate::ports::project_files::ProjectFilesError;

/// Error type for manifest construction
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ManifestError {
    #[error("Invalid route file '{file}': {reason}")]
    InvalidRouteFile { file: String, reason: String },

    #[error("Route '{route}' is defined by both '{first}' and '{second}'")]
    RouteCollision {
        route: String,
        first: String,
        second: String,
    },

    #[error("Failed to read project files: {0}")]
    Files(#[from] ProjectFilesError),

    #[error("Manifest build task failed: {0}")]
    TaskFailed(String),
}

/// One piece of a path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePart {
    Static(String),
    Dynamic(String),
    Rest(String),
}

impl RoutePart {
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, RoutePart::Static(_))
    }

    fn param_name(&self) -> Option<&str> {
        match self {
            RoutePart::Static(_) => None,
            RoutePart::Dynamic(name) | RoutePart::Rest(name) => Some(name),
        }
    }
}

impl std::fmt::Display for RoutePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutePart::Static(content) => f.write_str(content),
            RoutePart::Dynamic(name) => write!(f, "[{name}]"),
            RoutePart::Rest(name) => write!(f, "[...{name}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Page,
    Endpoint,
}

/// A matchable route. Immutable once built.
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub route: String,
    pub segments: Vec<Vec<RoutePart>>,
    pub params: Vec<String>,
    /// Component file, relative to the project root
    pub component: PathBuf,
    pub kind: RouteKind,
    pub prerender: bool,
    /// Built from an `index` file; counts as one extra segment when sorting
    pub is_index: bool,
    pattern: Regex,
}

impl RouteDefinition {
    /// Assemble a definition from parsed segments, compiling its matcher.
    pub fn new(
        segments: Vec<Vec<RoutePart>>,
        is_index: bool,
        component: PathBuf,
        kind: RouteKind,
        prerender: bool,
    ) -> Result<Self, String> {
        let mut params: Vec<String> = Vec::new();
        for name in segments.iter().flatten().filter_map(RoutePart::param_name) {
            if params.iter().any(|existing| existing == name) {
                return Err(format!("parameter '{name}' is used more than once"));
            }
            params.push(name.to_string());
        }

        let route = route_string(&segments);
        let pattern = compile_pattern(&segments).map_err(|e| e.to_string())?;

        Ok(Self {
            route,
            segments,
            params,
            component,
            kind,
            prerender,
            is_index,
            pattern,
        })
    }

    /// Parse a route string like `/blog/[slug]` into a definition.
    pub fn parse(
        route: &str,
        component: impl Into<PathBuf>,
        kind: RouteKind,
    ) -> Result<Self, ManifestError> {
        let invalid = |reason: String| ManifestError::InvalidRouteFile {
            file: route.to_string(),
            reason,
        };

        let segments = route
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(parse_segment)
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;

        Self::new(segments, false, component.into(), kind, false).map_err(invalid)
    }

    /// Match a normalized pathname, returning the extracted parameters.
    pub fn match_path(&self, pathname: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.pattern.captures(pathname)?;
        let params = self
            .params
            .iter()
            .zip(captures.iter().skip(1))
            .filter_map(|(name, capture)| {
                capture.map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();
        Some(params)
    }

    pub fn is_static(&self) -> bool {
        self.segments.iter().flatten().all(|part| !part.is_dynamic())
    }

    fn is_all_dynamic(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().flatten().all(RoutePart::is_dynamic)
    }

    fn has_rest(&self) -> bool {
        self.segments
            .iter()
            .flatten()
            .any(|part| matches!(part, RoutePart::Rest(_)))
    }

    /// Segments holding only a rest parameter may match nothing at all.
    fn optional_segments(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment.as_slice(), [RoutePart::Rest(_)]))
            .count()
    }

    /// Twice the number of segments a path must have, plus one unless some
    /// segment is optional. A route like `/docs/[...path]` ranks below every
    /// route of its required length, so `/docs` is tried before it.
    fn sort_weight(&self) -> usize {
        let optional = self.optional_segments();
        let required = self.segments.len() - optional + usize::from(self.is_index);
        2 * required + usize::from(optional == 0)
    }
}

/// Parse one path segment (no slashes) into its parts.
pub fn parse_segment(segment: &str) -> Result<Vec<RoutePart>, String> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = segment.chars();

    while let Some(c) = chars.next() {
        match c {
            '[' => {
                if !literal.is_empty() {
                    parts.push(RoutePart::Static(std::mem::take(&mut literal)));
                } else if parts.last().is_some_and(RoutePart::is_dynamic) {
                    return Err(format!(
                        "parameters in '{segment}' must be separated by static text"
                    ));
                }

                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '[' => break,
                        _ => name.push(c),
                    }
                }
                if !closed {
                    return Err(format!("unbalanced brackets in '{segment}'"));
                }

                let (rest, name) = match name.strip_prefix("...") {
                    Some(stripped) => (true, stripped.to_string()),
                    None => (false, name),
                };
                if name.is_empty() {
                    return Err(format!("empty parameter in '{segment}'"));
                }
                if !is_valid_param_name(&name) {
                    return Err(format!("invalid parameter name '{name}'"));
                }
                parts.push(if rest {
                    RoutePart::Rest(name)
                } else {
                    RoutePart::Dynamic(name)
                });
            }
            ']' => return Err(format!("unbalanced brackets in '{segment}'")),
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() {
        parts.push(RoutePart::Static(literal));
    }
    Ok(parts)
}

fn is_valid_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn route_string(segments: &[Vec<RoutePart>]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    segments
        .iter()
        .map(|segment| {
            let text: String = segment.iter().map(ToString::to_string).collect();
            format!("/{text}")
        })
        .collect()
}

fn compile_pattern(segments: &[Vec<RoutePart>]) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    for segment in segments {
        // a segment holding only a rest parameter may match nothing at all
        if let [RoutePart::Rest(_)] = segment.as_slice() {
            pattern.push_str(r"(?:/(.*?))?");
            continue;
        }
        pattern.push('/');
        for part in segment {
            match part {
                RoutePart::Static(content) => pattern.push_str(&regex::escape(content)),
                RoutePart::Dynamic(_) => pattern.push_str("([^/]+?)"),
                RoutePart::Rest(_) => pattern.push_str("(.*?)"),
            }
        }
    }
    pattern.push_str(if segments.is_empty() { "/$" } else { "/?$" });
    Regex::new(&pattern)
}

/// Match order between two routes: `Less` means `a` is tried first.
pub fn precedence(a: &RouteDefinition, b: &RouteDefinition) -> Ordering {
    b.sort_weight()
        .cmp(&a.sort_weight())
        .then_with(|| b.is_static().cmp(&a.is_static()))
        .then_with(|| a.is_all_dynamic().cmp(&b.is_all_dynamic()))
        .then_with(|| a.has_rest().cmp(&b.has_rest()))
        .then_with(|| {
            let a_endpoint = a.kind == RouteKind::Endpoint;
            let b_endpoint = b.kind == RouteKind::Endpoint;
            b_endpoint.cmp(&a_endpoint)
        })
        .then_with(|| a.route.cmp(&b.route))
}

/// The ordered routes of one generation. Replaced wholesale, never edited.
#[derive(Debug, Clone)]
pub struct RouteManifest {
    generation: u64,
    routes: Vec<Arc<RouteDefinition>>,
}

impl RouteManifest {
    pub fn new(generation: u64, mut routes: Vec<RouteDefinition>) -> Self {
        routes.sort_by(precedence);
        Self {
            generation,
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn routes(&self) -> &[Arc<RouteDefinition>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route, in precedence order, that matches the pathname.
    pub fn match_path(
        &self,
        pathname: &str,
    ) -> Option<(Arc<RouteDefinition>, BTreeMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|route| route.match_path(pathname).map(|params| (route.clone(), params)))
    }

    /// Look up a route by its route string.
    pub fn find(&self, route: &str) -> Option<Arc<RouteDefinition>> {
        self.routes.iter().find(|r| r.route == route).cloned()
    }
}
