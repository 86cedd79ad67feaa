//! HTTP-level tests for the management API and the tool namespace.
//!
//! Backends are JSON stub artifacts run by `StubLoader`, so no Wasm
//! toolchain is needed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use toolhub_runtime::{MountSettings, StubArtifact, StubBehavior, StubLoader};
use toolhub_server::api;
use toolhub_server::config::ServerConfig;
use toolhub_server::hub::{HubOptions, ToolHub};

const BOUNDARY: &str = "toolhub-test-boundary";
const PAGE: &str = r#"<!doctype html>
<html><head><title>Echo</title></head>
<body><button onclick="fetch(toolhub.baseUrl + '/echo', {method: 'POST'})">go</button></body></html>"#;

struct Fixture {
    tmp: TempDir,
    app: Router,
}

async fn open_app(data_dir: &Path, settings: MountSettings) -> Router {
    let options = HubOptions {
        data_dir: data_dir.to_path_buf(),
        mount: settings,
        recognized_exports: vec!["default".into(), "App".into()],
        runtime_scripts: vec!["/static/react.js".into()],
    };
    let hub = Arc::new(ToolHub::open(options, Arc::new(StubLoader::new())).await.unwrap());
    hub.mount_all().await;
    api::router(hub, &ServerConfig::default())
}

async fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let app = open_app(tmp.path(), MountSettings::default()).await;
    Fixture { tmp, app }
}

/// A form part: `(field, filename, content)`.
type Part<'a> = (&'a str, Option<&'a str>, Vec<u8>);

fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn text<'a>(field: &'a str, value: &str) -> Part<'a> {
    (field, None, value.as_bytes().to_vec())
}

fn echo_backend(routes: &[&str]) -> Part<'static> {
    ("backend", Some("echo.wasm"), StubArtifact::echo(routes).to_bytes())
}

fn whoami_backend(routes: &[&str]) -> Part<'static> {
    ("backend", Some("whoami.wasm"), StubArtifact::whoami(routes).to_bytes())
}

fn page() -> Part<'static> {
    ("frontend", Some("index.html"), PAGE.as_bytes().to_vec())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|e| panic!("not JSON ({e}): {}", String::from_utf8_lossy(&body)))
    };
    (status, value)
}

fn form_request(method: Method, uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(parts)))
        .unwrap()
}

fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn upload(app: &Router, parts: &[Part<'_>]) -> (StatusCode, Value) {
    send_json(app, form_request(Method::POST, "/api/tools", parts)).await
}

async fn upload_ok(app: &Router, parts: &[Part<'_>]) -> String {
    let (status, manifest) = upload(app, parts).await;
    assert_eq!(status, StatusCode::CREATED, "{manifest}");
    manifest["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn echo_tool_happy_path() {
    let f = fixture().await;
    let (status, manifest) = upload(
        &f.app,
        &[text("name", "Echo"), echo_backend(&["POST /echo"]), page()],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{manifest}");
    assert_eq!(manifest["kind"], "dual");
    assert_eq!(manifest["status"], "active");
    let id = manifest["id"].as_str().unwrap();

    let (status, headers, body) = send(
        &f.app,
        request(Method::POST, &format!("/tools/{id}/echo"), r#"{"msg":"hi"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let echoed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(echoed, serde_json::json!({"echo": {"msg": "hi"}}));

    let (status, view) = send_json(&f.app, request(Method::GET, &format!("/api/tools/{id}"), "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["mount"]["prefix"], format!("/tools/{id}"));
}

#[tokio::test]
async fn rejected_upload_is_persisted_as_failed() {
    let f = fixture().await;
    let no_handle = StubArtifact {
        handle: None,
        routes: vec!["GET /".into()],
        imports: Vec::new(),
        load_delay_ms: None,
    };
    let (status, body) = upload(
        &f.app,
        &[
            text("name", "Broken"),
            ("backend", Some("broken.wasm"), no_handle.to_bytes()),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["code"], "no_application_object");
    assert!(body["reason"].as_str().unwrap().contains("handle"));
    assert_eq!(body["manifest"]["status"], "failed");

    let (_, failed) = send_json(&f.app, request(Method::GET, "/api/tools?status=failed", "")).await;
    assert_eq!(failed.as_array().unwrap().len(), 1);
    let (_, mounts) = send_json(&f.app, request(Method::GET, "/api/mounts", "")).await;
    assert!(mounts.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn upload_without_required_artifact_conflicts() {
    let f = fixture().await;
    let (status, body) = upload(
        &f.app,
        &[text("name", "Half"), text("kind", "dual"), page()],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, _) = upload(&f.app, &[text("name", "Nothing")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn same_name_tools_get_distinct_ids() {
    let f = fixture().await;
    let first = upload_ok(
        &f.app,
        &[text("name", "Calculator"), whoami_backend(&["POST /add"])],
    )
    .await;
    let second = upload_ok(
        &f.app,
        &[text("name", "Calculator"), whoami_backend(&["POST /add"])],
    )
    .await;
    assert_ne!(first, second);

    for id in [&first, &second] {
        let (status, body) =
            send_json(&f.app, request(Method::POST, &format!("/tools/{id}/add"), "1+1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["toolId"], id.as_str());
    }
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let f = fixture().await;
    let a = upload_ok(&f.app, &[text("name", "A"), whoami_backend(&["GET /ping"])]).await;
    let b = upload_ok(&f.app, &[text("name", "B"), whoami_backend(&["GET /pong"])]).await;

    let (status, _) = send_json(&f.app, request(Method::GET, &format!("/tools/{a}/pong"), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send_json(&f.app, request(Method::GET, &format!("/tools/{b}/pong"), "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["toolId"], b.as_str());

    let (status, body) = send_json(
        &f.app,
        request(Method::GET, "/tools/tool_00000000000000000000000000000000/ping", ""),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_mounted");

    // The management API is not reachable through a tool's prefix.
    let (status, _) = send_json(&f.app, request(Method::GET, &format!("/tools/{a}/api/tools"), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_method_is_405_with_allow() {
    let f = fixture().await;
    let id = upload_ok(&f.app, &[text("name", "Get"), echo_backend(&["GET /ping"])]).await;

    let (status, headers, body) =
        send(&f.app, request(Method::DELETE, &format!("/tools/{id}/ping"), "")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "method_not_allowed");
}

#[tokio::test]
async fn tool_errors_surface_as_json() {
    let f = fixture().await;
    let failing = StubArtifact::new(
        StubBehavior::Fail {
            message: "division by zero".into(),
        },
        &["POST /divide"],
    );
    let id = upload_ok(
        &f.app,
        &[text("name", "Div"), ("backend", Some("div.wasm"), failing.to_bytes())],
    )
    .await;

    let (status, body) =
        send_json(&f.app, request(Method::POST, &format!("/tools/{id}/divide"), "1/0")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "tool_error");
    assert!(body["reason"].as_str().unwrap().contains("division by zero"));
}

#[tokio::test]
async fn toggle_restores_reachability() {
    let f = fixture().await;
    let id = upload_ok(&f.app, &[text("name", "T"), echo_backend(&["GET /ping"])]).await;
    let ping = || request(Method::GET, &format!("/tools/{id}/ping"), "");

    let (status, manifest) =
        send_json(&f.app, request(Method::POST, &format!("/api/tools/{id}/toggle"), "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(manifest["status"], "disabled");
    let (status, _) = send_json(&f.app, ping()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, manifest) =
        send_json(&f.app, request(Method::POST, &format!("/api/tools/{id}/toggle"), "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(manifest["status"], "active");
    let (status, _) = send_json(&f.app, ping()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn delete_cascades_and_is_idempotent() {
    let f = fixture().await;
    let (_, manifest) = upload(
        &f.app,
        &[text("name", "Gone"), echo_backend(&["GET /ping"]), page()],
    )
    .await;
    let id = manifest["id"].as_str().unwrap().to_string();
    let backend_path = manifest["backendArtifact"]["path"].as_str().unwrap().to_string();
    assert!(Path::new(&backend_path).exists());

    let (status, _, _) = send(&f.app, request(Method::DELETE, &format!("/api/tools/{id}"), "")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!Path::new(&backend_path).exists());

    let (status, _) = send_json(&f.app, request(Method::GET, &format!("/api/tools/{id}"), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&f.app, request(Method::GET, &format!("/tools/{id}/ping"), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&f.app, request(Method::DELETE, &format!("/api/tools/{id}"), "")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&f.app, request(Method::DELETE, "/api/tools/../../etc", "")).await;
    assert_ne!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn boot_recovers_mounts_and_isolates_a_corrupt_artifact() {
    let f = fixture().await;
    let mut ids = Vec::new();
    let mut corrupt_path = String::new();
    for name in ["One", "Two", "Three"] {
        let (_, manifest) = upload(&f.app, &[text("name", name), echo_backend(&["GET /ping"])]).await;
        ids.push(manifest["id"].as_str().unwrap().to_string());
        corrupt_path = manifest["backendArtifact"]["path"].as_str().unwrap().to_string();
    }

    // Clean restart: all three come back.
    let app = open_app(f.tmp.path(), MountSettings::default()).await;
    let (_, mounts) = send_json(&app, request(Method::GET, "/api/mounts", "")).await;
    assert_eq!(mounts.as_array().unwrap().len(), 3);

    // Restart with one artifact damaged on disk.
    std::fs::write(&corrupt_path, b"not a backend").unwrap();
    let app = open_app(f.tmp.path(), MountSettings::default()).await;
    let (_, mounts) = send_json(&app, request(Method::GET, "/api/mounts", "")).await;
    assert_eq!(mounts.as_array().unwrap().len(), 2);

    let broken = &ids[2];
    let (_, view) = send_json(&app, request(Method::GET, &format!("/api/tools/{broken}"), "")).await;
    assert_eq!(view["status"], "failed");
    assert!(view["lastError"].as_str().is_some_and(|e| !e.is_empty()));
    for id in &ids[..2] {
        let (status, _) = send_json(&app, request(Method::GET, &format!("/tools/{id}/ping"), "")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, report) = send_json(&app, request(Method::POST, "/api/mounts/reload", "")).await;
    assert_eq!(report["mounted"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn slow_backend_load_times_out_without_affecting_others() {
    let tmp = TempDir::new().unwrap();
    let settings = MountSettings {
        load_timeout: Duration::from_millis(100),
        ..MountSettings::default()
    };
    let app = open_app(tmp.path(), settings).await;

    let fast = upload_ok(&app, &[text("name", "Fast"), echo_backend(&["GET /ping"])]).await;
    let slow = StubArtifact::echo(&["GET /ping"]).with_load_delay(Duration::from_secs(5));
    let (status, body) = upload(
        &app,
        &[text("name", "Slow"), ("backend", Some("slow.wasm"), slow.to_bytes())],
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["error"], "mount_error");
    assert!(body["reason"].as_str().unwrap().contains("timed out"));
    assert_eq!(body["manifest"]["status"], "failed");

    let (status, _) = send_json(&app, request(Method::GET, &format!("/tools/{fast}/ping"), "")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn frontend_document_carries_context_and_csp() {
    let f = fixture().await;
    let id = upload_ok(
        &f.app,
        &[text("name", "Echo"), echo_backend(&["POST /echo"]), page()],
    )
    .await;

    let (status, headers, body) =
        send(&f.app, request(Method::GET, &format!("/api/tools/{id}/frontend"), "")).await;
    assert_eq!(status, StatusCode::OK);
    let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
    assert!(csp.starts_with("sandbox allow-scripts allow-same-origin allow-forms"), "{csp}");
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains(&format!("/tools/{id}")));
    assert!(html.contains("<title>Echo</title>"));

    let mut run = request(Method::GET, &format!("/api/tools/{id}/run"), "");
    run.headers_mut()
        .insert(header::HOST, "hub.test:8080".parse().unwrap());
    let (status, headers, body) = send(&f.app, run).await;
    assert_eq!(status, StatusCode::OK);
    let host = String::from_utf8(body).unwrap();
    assert!(host.contains("<iframe"));
    assert!(host.contains("sandbox="));

    // The framed tool may only reach its own namespace, not the management API.
    let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
    assert!(csp.contains(&format!("connect-src http://hub.test:8080/api/tools/{id}/frontend ")), "{csp}");
    assert!(csp.contains(&format!("http://hub.test:8080/tools/{id}/ ")), "{csp}");
    assert!(!csp.contains("'self'"), "{csp}");
}

#[tokio::test]
async fn script_frontend_without_component_still_uploads_with_warning() {
    let f = fixture().await;
    let (status, manifest) = upload(
        &f.app,
        &[
            text("name", "Widget"),
            ("frontend", Some("widget.js"), b"export const helper = () => 1;".to_vec()),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{manifest}");
    assert_eq!(manifest["kind"], "frontend");
    let warnings = manifest["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("component not found")));
}

#[tokio::test]
async fn artifact_download_returns_original_bytes() {
    let f = fixture().await;
    let id = upload_ok(&f.app, &[text("name", "Page"), page()]).await;

    let (status, headers, body) = send(
        &f.app,
        request(Method::GET, &format!("/api/tools/{id}/file?kind=frontend"), ""),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, PAGE.as_bytes());
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("index.html"));

    let (status, _) = send_json(
        &f.app,
        request(Method::GET, &format!("/api/tools/{id}/file?kind=backend"), ""),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn edit_and_reupload() {
    let f = fixture().await;
    let id = upload_ok(&f.app, &[text("name", "Old"), echo_backend(&["GET /v1"])]).await;

    let (status, manifest) = send_json(
        &f.app,
        Request::builder()
            .method(Method::PATCH)
            .uri(format!("/api/tools/{id}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"New","category":"Math Tools"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{manifest}");
    assert_eq!(manifest["name"], "New");
    assert!(manifest["backendArtifact"]["path"]
        .as_str()
        .unwrap()
        .contains("math-tools"));

    let (status, manifest) = send_json(
        &f.app,
        form_request(
            Method::PUT,
            &format!("/api/tools/{id}/artifacts"),
            &[echo_backend(&["GET /v2"])],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{manifest}");
    assert_eq!(manifest["routes"][0]["path"], "/v2");

    let (status, _) = send_json(&f.app, request(Method::GET, &format!("/tools/{id}/v1"), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&f.app, request(Method::GET, &format!("/tools/{id}/v2"), "")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_reports_counts() {
    let f = fixture().await;
    upload_ok(&f.app, &[text("name", "H"), echo_backend(&["GET /"])]).await;
    let (status, body) = send_json(&f.app, request(Method::GET, "/api/health", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tools"], 1);
    assert_eq!(body["mounted"], 1);
}
