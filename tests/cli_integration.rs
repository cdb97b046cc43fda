//! CLI integration tests
//!
//! Runs the compiled binary with assert_cmd and checks argument handling and
//! generate-mode output.

use assert_cmd::Command;
use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_help_lists_serve_subcommand() {
    Command::cargo_bin("po-broker")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("--video-id"));
}

#[test]
fn test_version_output() {
    Command::cargo_bin("po-broker")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_serve_rejects_generate_arguments() {
    Command::cargo_bin("po-broker")
        .unwrap()
        .args(["serve", "--video-id", "vid"])
        .assert()
        .failure();
}

#[test]
fn test_generate_without_strategies_fails() {
    Command::cargo_bin("po-broker")
        .unwrap()
        .args(["--video-id", "vid"])
        .env_remove("PO_TOKEN_SERVER_URL")
        .env_remove("PO_TOKEN_MANUAL")
        .env_remove("PO_BROKER_CONFIG")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "no configured token strategy could serve the request",
        ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generate_against_token_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_pot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "poToken": "cli-token",
            "visitorData": "cli-visitor",
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    tokio::task::spawn_blocking(move || {
        Command::cargo_bin("po-broker")
            .unwrap()
            .args(["--video-id", "vid", "--server-url", &uri])
            .assert()
            .success()
            .stdout(predicate::str::contains("cli-token"));
    })
    .await
    .unwrap();
}

#[test]
fn test_video_id_with_leading_dash() {
    // Must not be mistaken for a flag
    let server_missing = Command::cargo_bin("po-broker")
        .unwrap()
        .args(["--video-id", "-6OjhRWNLfk"])
        .env_remove("PO_TOKEN_SERVER_URL")
        .assert()
        .failure();
    // Failure comes from having no strategy, not from argument parsing
    server_missing.stderr(predicate::str::contains("no configured token strategy"));
}
