use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a minimal valid config. The control service is unreachable, so the
/// controller keeps reconnecting in the background.
fn minimal_config(port: u16, dir: &TempDir) -> String {
    format!(
        r#"
[control]
url = "ws://127.0.0.1:1/socket"
org_id = "org1"
token = "secret-token"
reconnect_delay_ms = 200

[capture]
output_dir = {:?}

[compose]
overlay_dir = {:?}

[server]
host = "127.0.0.1"
port = {}
"#,
        dir.path().join("snaps"),
        dir.path().join("overlays"),
        port
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the controller and return a handle
async fn spawn_server(config_path: &std::path::Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_snap-controller"))
        .env("SNAP_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let temp_file = write_config(&minimal_config(port, &dir));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");
    let connection = json["connection"].as_str().unwrap();
    assert!(
        connection == "connecting" || connection == "disconnected",
        "unexpected connection state {}",
        connection
    );

    // Watched directories are created at startup
    assert!(dir.path().join("snaps").is_dir());
    assert!(dir.path().join("overlays").is_dir());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_returns_sanitized() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let temp_file = write_config(&minimal_config(port, &dir));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/config", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body = response.text().await.expect("Failed to read body");
    assert!(!body.contains("secret-token"));
    let json: serde_json::Value = serde_json::from_str(&body).expect("Failed to parse JSON");
    assert_eq!(json["control"]["org_id"], "org1");
    assert_eq!(json["control"]["token_configured"], true);
    assert_eq!(json["server"]["port"], port);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_metrics_endpoint_counts_connection_attempts() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let temp_file = write_config(&minimal_config(port, &dir));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body = response.text().await.expect("Failed to read body");
    assert!(body.contains("snap_connection_attempts_total"));
    assert!(body.contains("snap_connection_state"));

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_snap-controller"))
            .env("SNAP_CONFIG", "/nonexistent/config.toml")
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_control_section_exits_with_error() {
    let temp_file = write_config(
        r#"
[server]
port = 8080
"#,
    );

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_snap-controller"))
            .env("SNAP_CONFIG", temp_file.path())
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_control_url_exits_with_error() {
    let temp_file = write_config(
        r#"
[control]
url = "http://not-a-socket"
org_id = "org1"
token = "t"
"#,
    );

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_snap-controller"))
            .env("SNAP_CONFIG", temp_file.path())
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}
