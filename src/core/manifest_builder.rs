//! Derives the route manifest from the files under the pages directory.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    config::DevServerConfig,
    core::manifest::{ManifestError, RouteDefinition, RouteKind, RouteManifest, parse_segment},
    ports::project_files::ProjectFiles,
};

static PRERENDER_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+const\s+prerender\s*=\s*(true|false)\b")
        .expect("invalid prerender regex")
});

/// Builds [`RouteManifest`]s from a [`ProjectFiles`] view.
///
/// Building is pure with respect to the file view: the same layout always
/// produces the same routes in the same order.
#[derive(Debug, Clone)]
pub struct RouteManifestBuilder {
    page_extensions: Vec<String>,
    endpoint_extensions: Vec<String>,
    default_prerender: bool,
}

impl RouteManifestBuilder {
    pub fn new(page_extensions: Vec<String>, endpoint_extensions: Vec<String>, ssr: bool) -> Self {
        Self {
            page_extensions,
            endpoint_extensions,
            default_prerender: !ssr,
        }
    }

    pub fn from_config(config: &DevServerConfig) -> Self {
        Self::new(
            config.page_extensions.clone(),
            config.endpoint_extensions.clone(),
            config.output.is_server_like(),
        )
    }

    /// Build the manifest for `generation`.
    pub fn build(
        &self,
        files: &dyn ProjectFiles,
        generation: u64,
    ) -> Result<RouteManifest, ManifestError> {
        let mut paths = files.page_files()?;
        paths.sort();

        let mut routes = Vec::new();
        let mut owners: HashMap<String, PathBuf> = HashMap::new();
        for path in &paths {
            let Some(definition) = self.route_for_file(files, path)? else {
                continue;
            };
            if let Some(first) = owners.get(&definition.route) {
                return Err(ManifestError::RouteCollision {
                    route: definition.route.clone(),
                    first: first.display().to_string(),
                    second: definition.component.display().to_string(),
                });
            }
            owners.insert(definition.route.clone(), definition.component.clone());
            routes.push(definition);
        }

        Ok(RouteManifest::new(generation, routes))
    }

    fn route_for_file(
        &self,
        files: &dyn ProjectFiles,
        path: &Path,
    ) -> Result<Option<RouteDefinition>, ManifestError> {
        let invalid = |reason: String| ManifestError::InvalidRouteFile {
            file: path.display().to_string(),
            reason,
        };

        let names = path
            .iter()
            .map(|component| {
                component
                    .to_str()
                    .ok_or_else(|| invalid("file name is not valid UTF-8".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Some((file_name, directories)) = names.split_last() else {
            return Ok(None);
        };
        if names
            .iter()
            .any(|name| name.starts_with('_') || name.starts_with('.'))
        {
            return Ok(None);
        }

        let Some((stem, extension)) = file_name.rsplit_once('.') else {
            return Ok(None);
        };
        let kind = if self.page_extensions.iter().any(|ext| ext == extension) {
            RouteKind::Page
        } else if self.endpoint_extensions.iter().any(|ext| ext == extension) {
            RouteKind::Endpoint
        } else {
            tracing::debug!(file = %path.display(), "Skipping file with unsupported extension");
            return Ok(None);
        };

        let mut segment_names: Vec<&str> = directories.to_vec();
        let is_index = stem == "index";
        if !is_index {
            segment_names.push(stem);
        }

        let segments = segment_names
            .into_iter()
            .map(parse_segment)
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;

        let source = files.read_source(path)?;
        let prerender = PRERENDER_EXPORT
            .captures(&source)
            .map(|captures| &captures[1] == "true")
            .unwrap_or(self.default_prerender);

        let component = files.pages_dir().join(path);
        RouteDefinition::new(segments, is_index, component, kind, prerender)
            .map(Some)
            .map_err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::project_files::InMemoryProjectFiles;

    fn builder(ssr: bool) -> RouteManifestBuilder {
        RouteManifestBuilder::from_config(&DevServerConfig {
            output: if ssr {
                crate::config::OutputMode::Server
            } else {
                crate::config::OutputMode::Static
            },
            ..DevServerConfig::default()
        })
    }

    fn routes(manifest: &RouteManifest) -> Vec<&str> {
        manifest.routes().iter().map(|r| r.route.as_str()).collect()
    }

    #[test]
    fn test_builds_routes_from_file_layout() {
        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("index.html", "<h1>home</h1>")
            .with_file("about.md", "# About")
            .with_file("blog/index.html", "")
            .with_file("blog/[slug].html", "")
            .with_file("docs/[...path].html", "")
            .with_file("rss.xml.ts", "export function GET() {}");

        let manifest = builder(false).build(&files, 1).unwrap();
        assert_eq!(
            routes(&manifest),
            vec![
                "/blog",
                "/blog/[slug]",
                "/rss.xml",
                "/",
                "/about",
                "/docs/[...path]",
            ]
        );

        let feed = manifest.find("/rss.xml").unwrap();
        assert_eq!(feed.kind, RouteKind::Endpoint);
        assert_eq!(feed.component, PathBuf::from("src/pages/rss.xml.ts"));
        assert!(manifest.find("/blog").unwrap().is_index);
    }

    #[test]
    fn test_index_file_maps_to_directory_route() {
        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("blog/index.html", "")
            .with_file("blog/[slug].html", "");

        let manifest = builder(false).build(&files, 1).unwrap();
        assert_eq!(routes(&manifest), vec!["/blog", "/blog/[slug]"]);
        assert!(manifest.find("/blog/index").is_none());

        let (route, params) = manifest.match_path("/blog/index").unwrap();
        assert_eq!(route.route, "/blog/[slug]");
        assert_eq!(params.get("slug").map(String::as_str), Some("index"));
    }

    #[test]
    fn test_page_beside_catch_all_directory() {
        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("docs.html", "")
            .with_file("docs/[...path].html", "");

        let manifest = builder(false).build(&files, 1).unwrap();
        assert_eq!(routes(&manifest), vec!["/docs", "/docs/[...path]"]);

        let (route, params) = manifest.match_path("/docs").unwrap();
        assert_eq!(route.route, "/docs");
        assert!(params.is_empty());
        let (route, _) = manifest.match_path("/docs/intro").unwrap();
        assert_eq!(route.route, "/docs/[...path]");
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let a = InMemoryProjectFiles::new("src/pages")
            .with_file("[a].html", "")
            .with_file("b.html", "")
            .with_file("c/[d].html", "");
        let b = InMemoryProjectFiles::new("src/pages")
            .with_file("c/[d].html", "")
            .with_file("b.html", "")
            .with_file("[a].html", "");

        let first = builder(false).build(&a, 1).unwrap();
        let second = builder(false).build(&b, 1).unwrap();
        assert_eq!(routes(&first), routes(&second));
    }

    #[test]
    fn test_ignores_private_and_unknown_files() {
        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("_layout.html", "")
            .with_file("_partials/header.html", "")
            .with_file(".draft.html", "")
            .with_file("styles.css", "")
            .with_file("README", "")
            .with_file("contact.html", "");

        let manifest = builder(false).build(&files, 1).unwrap();
        assert_eq!(routes(&manifest), vec!["/contact"]);
    }

    #[test]
    fn test_malformed_file_name_is_an_error() {
        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("ok.html", "")
            .with_file("blog/[slug.html", "");

        let err = builder(false).build(&files, 1).unwrap_err();
        match err {
            ManifestError::InvalidRouteFile { file, reason } => {
                assert_eq!(file, "blog/[slug.html");
                assert!(reason.contains("unbalanced"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_route_collision_is_an_error() {
        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("about.html", "")
            .with_file("about/index.md", "");

        let err = builder(false).build(&files, 1).unwrap_err();
        assert!(matches!(err, ManifestError::RouteCollision { ref route, .. } if route == "/about"));
    }

    #[test]
    fn test_prerender_defaults_and_overrides() {
        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("static.html", "<p>static</p>")
            .with_file(
                "live.astro",
                "---\nexport const prerender = false;\n---\n<p>live</p>",
            );

        let manifest = builder(false).build(&files, 1).unwrap();
        assert!(manifest.find("/static").unwrap().prerender);
        assert!(!manifest.find("/live").unwrap().prerender);

        let files = InMemoryProjectFiles::new("src/pages")
            .with_file("static.html", "<p>static</p>")
            .with_file("built.md", "export const prerender = true\n");
        let manifest = builder(true).build(&files, 1).unwrap();
        assert!(!manifest.find("/static").unwrap().prerender);
        assert!(manifest.find("/built").unwrap().prerender);
    }
}
