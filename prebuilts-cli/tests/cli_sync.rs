use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const RELEASE: &str = "364a867d9f1c3c1fd4a1cb9a4a8f1e0fe4f2f7c1";

fn prebuilts(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("prebuilts").expect("binary built");
    cmd.current_dir(root)
        .env_remove("PREBUILTS_METADATA_URL")
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "warn");
    cmd
}

fn sha(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Serve metadata for `RELEASE` plus a linux binary whose published digest is
/// `published`.
fn serve_linux(server: &mut mockito::Server, body: &[u8], published: &[u8]) {
    let metadata = format!(
        r#"{{"commit":"{RELEASE}","platforms":{{
            "linux":{{"url":"{url}/linux/bazel","sha256":"{linux}"}},
            "macos":{{"url":"{url}/darwin/bazel","sha256":"{darwin}"}}}}}}"#,
        url = server.url(),
        linux = sha(published),
        darwin = sha(b"darwin"),
    );
    server
        .mock("GET", format!("/metadata/{RELEASE}.json").as_str())
        .with_body(metadata)
        .create();
    server.mock("GET", "/linux/bazel").with_body(body).create();
}

fn metadata_template(server: &mockito::Server) -> String {
    format!("{}/metadata/{{release}}.json", server.url())
}

#[test]
fn init_writes_default_manifest_once() {
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["init", "--root", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default manifest"));
    let manifest = root.path().join("prebuilts.yaml");
    assert!(manifest.exists());
    std::fs::write(
        &manifest,
        std::fs::read_to_string(&manifest).unwrap().replace("retries: 3", "retries: 5"),
    )
    .unwrap();

    prebuilts(root.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already present"));
    assert!(std::fs::read_to_string(&manifest).unwrap().contains("retries: 5"));

    prebuilts(root.path()).args(["init", "--force"]).assert().success();
    assert!(std::fs::read_to_string(&manifest).unwrap().contains("retries: 3"));
}

#[test]
fn sync_installs_linux_binary_and_status_reports_current() {
    let mut server = mockito::Server::new();
    serve_linux(&mut server, b"linux bazel", b"linux bazel");
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", RELEASE, "--platform", "linux-x86_64"])
        .env("PREBUILTS_METADATA_URL", metadata_template(&server))
        .assert()
        .success()
        .stdout(predicate::str::contains("synced (1 written, 0 unchanged)"));

    let installed = root.path().join("prebuilts/bazel/linux-x86_64/bazel");
    assert_eq!(std::fs::read(&installed).unwrap(), b"linux bazel");

    let output = prebuilts(root.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let status: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let linux = status["trees"]
        .as_array()
        .unwrap()
        .iter()
        .find(|tree| tree["batch"] == "linux-x86_64")
        .unwrap();
    assert_eq!(linux["signal"], "current");
    assert_eq!(linux["release"], RELEASE);
    assert_eq!(status["summary"]["trees"], 3);
}

#[test]
fn second_sync_reports_no_changes_in_json() {
    let mut server = mockito::Server::new();
    serve_linux(&mut server, b"linux bazel", b"linux bazel");
    let root = TempDir::new().unwrap();
    let run = || {
        prebuilts(root.path())
            .args(["sync", RELEASE, "-p", "linux-x86_64", "--json"])
            .env("PREBUILTS_METADATA_URL", metadata_template(&server))
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    };

    run();
    let report: serde_json::Value = serde_json::from_slice(&run()).unwrap();

    let files = report["batches"][0]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["action"], "unchanged");
    assert_eq!(report["batches"][0]["marker_written"], false);
}

#[test]
fn checksum_mismatch_exits_with_code_4() {
    let mut server = mockito::Server::new();
    serve_linux(&mut server, b"tampered", b"published");
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", RELEASE, "--platform", "linux-x86_64"])
        .env("PREBUILTS_METADATA_URL", metadata_template(&server))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("checksum"));

    assert!(!root.path().join("prebuilts/bazel/linux-x86_64/bazel").exists());
}

#[test]
fn unknown_release_exits_with_code_2() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/metadata/deadbeef.json")
        .with_status(404)
        .create();
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", "deadbeef"])
        .env("PREBUILTS_METADATA_URL", metadata_template(&server))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("deadbeef"));
}

#[test]
fn path_like_release_is_a_config_error() {
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", "../../etc"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid release"));
}

#[test]
fn dry_run_writes_nothing() {
    let mut server = mockito::Server::new();
    serve_linux(&mut server, b"linux bazel", b"linux bazel");
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", RELEASE, "-p", "linux-x86_64", "--dry-run"])
        .env("PREBUILTS_METADATA_URL", metadata_template(&server))
        .assert()
        .success()
        .stdout(predicate::str::contains("[dry-run]"));

    assert!(!root.path().join("prebuilts").exists());
}

#[test]
fn destination_override_is_honoured() {
    let mut server = mockito::Server::new();
    serve_linux(&mut server, b"linux bazel", b"linux bazel");
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", RELEASE, "-p", "linux-x86_64", "--linux-dest", "out/linux"])
        .env("PREBUILTS_METADATA_URL", metadata_template(&server))
        .assert()
        .success();

    assert!(root.path().join("out/linux/bazel").exists());
    assert!(!root.path().join("prebuilts").exists());
}

#[test]
fn status_on_fresh_checkout_shows_never_synced() {
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("NEVER SYNCED"))
        .stdout(predicate::str::contains("3 need sync"));
}

#[test]
fn expired_deadline_exits_with_code_7() {
    let mut server = mockito::Server::new();
    serve_linux(&mut server, b"linux bazel", b"linux bazel");
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", RELEASE, "-p", "linux-x86_64", "--deadline", "0"])
        .env("PREBUILTS_METADATA_URL", metadata_template(&server))
        .assert()
        .code(7)
        .stderr(predicate::str::contains("cancelled"));

    assert!(!root.path().join("prebuilts").exists());
}

#[test]
fn shared_destination_is_a_config_error() {
    let root = TempDir::new().unwrap();

    prebuilts(root.path())
        .args(["sync", RELEASE, "--linux-dest", "same", "--darwin-dest", "./same"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("overlap"));

    assert!(!root.path().join("same").exists());
}

#[test]
fn resync_of_same_release_says_already_at_release() {
    let mut server = mockito::Server::new();
    serve_linux(&mut server, b"linux bazel", b"linux bazel");
    let root = TempDir::new().unwrap();
    let run = || {
        prebuilts(root.path())
            .args(["sync", RELEASE, "-p", "linux-x86_64"])
            .env("PREBUILTS_METADATA_URL", metadata_template(&server))
            .assert()
            .success()
    };

    run().stdout(predicate::str::contains("synced (1 written"));
    run().stdout(predicate::str::contains(format!(
        "'linux-x86_64' already at release {RELEASE}"
    )));
}
