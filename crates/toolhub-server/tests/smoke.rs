//! Smoke tests for the `toolhub` binary.
//!
//! Verifies the binary starts, responds to CLI flags, and that `check` and
//! `serve` work against a stub engine without a Wasm toolchain.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Duration;

use toolhub_runtime::StubArtifact;

fn toolhub() -> Command {
    Command::new(env!("CARGO_BIN_EXE_toolhub"))
}

// ── Help / basic CLI ──────────────────────────────────────────────────────────

#[test]
fn binary_responds_to_help() {
    let output = toolhub().arg("--help").output().expect("failed to execute toolhub");
    assert!(output.status.success(), "toolhub --help should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"), "help output should list serve subcommand");
    assert!(stdout.contains("check"), "help output should list check subcommand");
}

#[test]
fn serve_help_documents_overrides() {
    let output = toolhub()
        .args(["serve", "--help"])
        .output()
        .expect("failed to execute toolhub serve --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--listen"));
    assert!(stdout.contains("--data-dir"));
}

#[test]
fn unknown_subcommand_exits_nonzero() {
    let output = toolhub()
        .arg("nonexistent-subcommand")
        .output()
        .expect("failed to execute toolhub");
    assert!(!output.status.success(), "unknown subcommand should exit non-zero");
}

// ── Config ────────────────────────────────────────────────────────────────────

#[test]
fn serve_fails_cleanly_with_missing_config() {
    let output = toolhub()
        .args(["serve", "--config", "/definitely/not/here/toolhub.toml"])
        .output()
        .expect("failed to execute toolhub serve");

    assert!(
        !output.status.success(),
        "toolhub serve should fail when --config does not exist"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("toolhub.toml") || stderr.contains("config"),
        "error message should mention config: {stderr}"
    );
}

#[test]
fn malformed_config_is_reported() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = tmp.path().join("toolhub.toml");
    std::fs::write(&config, "[server\nlisten = 1").unwrap();

    let output = toolhub()
        .args(["serve", "--config"])
        .arg(&config)
        .output()
        .expect("failed to execute toolhub serve");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parse"), "should explain the parse failure: {stderr}");
}

// ── Offline validation ────────────────────────────────────────────────────────

fn stub_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("toolhub.toml");
    std::fs::write(
        &path,
        format!(
            "[storage]\nroot = \"{}\"\n\n[runtime]\nengine = \"stub\"\n",
            dir.join("data").display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn check_prints_report_for_valid_frontend() {
    let tmp = tempfile::TempDir::new().unwrap();
    let page = tmp.path().join("index.html");
    std::fs::write(&page, "<html><body><h1>hi</h1></body></html>").unwrap();

    let output = toolhub()
        .arg("check")
        .arg(&page)
        .args(["--config"])
        .arg(stub_config(tmp.path()))
        .output()
        .expect("failed to execute toolhub check");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["kind"], "frontend");
    assert_eq!(report["frontendType"], "markup");
}

#[test]
fn check_rejects_backend_without_handle() {
    let tmp = tempfile::TempDir::new().unwrap();
    let backend = tmp.path().join("tool.wasm");
    std::fs::write(&backend, br#"{"routes":["GET /"]}"#).unwrap();

    let output = toolhub()
        .arg("check")
        .arg(&backend)
        .arg("--config")
        .arg(stub_config(tmp.path()))
        .output()
        .expect("failed to execute toolhub check");
    assert!(!output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["error"], "no_application_object");
}

// ── Serve ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn serve_answers_health_and_runs_an_uploaded_tool() {
    let tmp = tempfile::TempDir::new().unwrap();
    let port = {
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };
    let listen = format!("127.0.0.1:{port}");

    let mut child = toolhub()
        .args(["serve", "--listen", &listen, "--config"])
        .arg(stub_config(tmp.path()))
        .env("TOOLHUB_LOG", "info")
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn toolhub serve");

    // Keep draining stderr so the server never blocks on a full pipe.
    let stderr = child.stderr.take().unwrap();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if line.contains("toolhub listening") {
                let _ = ready_tx.send(());
            }
        }
    });
    let ready = tokio::task::spawn_blocking(move || ready_rx.recv_timeout(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(ready.is_ok(), "server did not come up");

    let client = reqwest::Client::new();
    let base = format!("http://{listen}");
    let health: serde_json::Value = client
        .get(format!("{base}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let backend = StubArtifact::echo(&["POST /echo"]).to_bytes();
    let boundary = "smoke-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nEcho\r\n").as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"backend\"; filename=\"echo.wasm\"\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&backend);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = client
        .post(format!("{base}/api/tools"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let manifest: serde_json::Value = response.json().await.unwrap();
    let id = manifest["id"].as_str().unwrap();

    let echoed: serde_json::Value = client
        .post(format!("{base}/tools/{id}/echo"))
        .body(r#"{"n":42}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["echo"]["n"], 42);

    child.kill().ok();
    child.wait().ok();
}
