//! In-process HTTP surface tests, adapted from `server/tests/endpoints.rs`
//! but driven through `tower::ServiceExt::oneshot` against the router
//! directly rather than a live bound port (spec §8 scenarios 1-2).

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use prost::Message;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use gateway::engine::{Engine, EngineConfig, MutationAuthority};
use gateway::handlers::router;
use gateway::map_parser::{BackendDescriptor, MapEntry};
use gateway::ms_client::{MsClient, MsConfig};
use gateway::proto;

fn test_engine_with_file(contents: &[u8]) -> (std::sync::Arc<Engine>, NamedTempFile) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();

    let ms_client = MsClient::new(MsConfig {
        ms_url: "http://127.0.0.1:1".to_string(),
        gateway_id: 7,
        username: "u".to_string(),
        password: "p".to_string(),
        connect_timeout: Duration::from_millis(50),
        transfer_timeout: Duration::from_millis(50),
    })
    .unwrap();

    let engine = Engine::new(
        EngineConfig {
            content_url: "http://gw.example".to_string(),
            blocksize: 8,
            gateway_id: 7,
            owner_id: 1,
            volume_id: 1,
            publish_deadline_ms: 60_000,
            coalesce_delta_ms: 500,
            mutation_authority: MutationAuthority::PublisherAuthoritative,
        },
        ms_client,
    );

    let mut entries = BTreeMap::new();
    entries.insert(
        "/foo/bar".to_string(),
        MapEntry {
            fs_path: "/foo/bar".to_string(),
            backend: BackendDescriptor::LocalFile(file.path().to_str().unwrap().to_string()),
            mode: 0o644,
            reval_sec: None,
        },
    );
    engine.publish_map_entries(entries).unwrap();

    (engine, file)
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_a_block_from_a_published_local_file() {
    let (engine, _file) = tokio::task::block_in_place(|| test_engine_with_file(b"hello world!"));
    let app = router(engine.clone());

    let meta = engine.lookup("/foo/bar").unwrap();
    let uri = format!("/foo/bar.{}/0.0", meta.version);

    let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello wo");
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_a_manifest_with_the_expected_block_count() {
    let (engine, _file) = tokio::task::block_in_place(|| test_engine_with_file(b"0123456789")); // 10 bytes, blocksize 8 -> 2 blocks
    let app = router(engine);

    let response = app.oneshot(Request::builder().uri("/foo/bar.manifest.1690000000.0").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let manifest = proto::ManifestMsg::decode(&body[..]).unwrap();
    assert_eq!(manifest.size, 10);
    assert_eq!(manifest.blocks.len(), 2);
    assert_eq!(manifest.file_url, "http://gw.example/foo/bar");
}

#[tokio::test(flavor = "multi_thread")]
async fn unpublished_path_yields_not_found() {
    let (engine, _file) = tokio::task::block_in_place(|| test_engine_with_file(b"x"));
    let app = router(engine);

    let response = app.oneshot(Request::builder().uri("/no/such/path.0/0.0").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn block_past_end_of_file_yields_empty_body_not_an_error() {
    let (engine, _file) = tokio::task::block_in_place(|| test_engine_with_file(b"short"));
    let app = router(engine.clone());

    let meta = engine.lookup("/foo/bar").unwrap();
    let uri = format!("/foo/bar.{}/10.0", meta.version);

    let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}
