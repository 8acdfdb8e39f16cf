mod common;

use common::Harness;
use devroute::{adapters::InMemoryProjectFiles, config::DevServerConfig};
use http::StatusCode;

async fn mounted() -> Harness {
    let config = DevServerConfig::builder().base("/app").build();
    let files = InMemoryProjectFiles::new("src/pages")
        .with_file("index.html", "")
        .with_file("about.html", "");
    Harness::new(config, files).await
}

#[tokio::test]
async fn test_prefixed_request_is_matched_without_base() {
    let harness = mounted().await;

    assert_eq!(
        harness.get("/app/about").await,
        (StatusCode::OK, "/about {}".to_string())
    );
    assert_eq!(harness.get("/app").await, (StatusCode::OK, "/ {}".to_string()));
    assert_eq!(harness.get("/app/").await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_unprefixed_request_never_reaches_manifest() {
    let harness = mounted().await;

    let (status, body) = harness.get("/about").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Not Found");

    let (status, body) = harness.get("/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("/app/"));

    assert_eq!(harness.loader.resolve_count(), 0);
    assert!(harness.env.route_cache.is_empty());
}
