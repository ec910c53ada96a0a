//! Integration tests for the `enclave` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;

fn write_zip(path: &Path, entries: &[&str]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for name in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(b"unit").unwrap();
    }
    writer.finish().unwrap();
}

fn enclave() -> Command {
    Command::cargo_bin("enclave").unwrap()
}

/// Policy with an isolated zip and a host directory next to it
fn fixture(dir: &Path) -> std::path::PathBuf {
    write_zip(
        &dir.join("isolated.zip"),
        &["pkg/isolated/Foo.unit", "pkg/isolated/internal/Bar.unit"],
    );
    fs::create_dir_all(dir.join("host/lib")).unwrap();
    fs::write(dir.join("host/lib/Util.unit"), b"util").unwrap();

    let policy = dir.join("enclave.toml");
    fs::write(
        &policy,
        r#"
[policy]
include = ["pkg.isolated"]
exclude = ["pkg.isolated.internal"]

[[archive]]
path = "isolated.zip"

[host]
archives = ["host"]
"#,
    )
    .unwrap();
    policy
}

// ────────────────────────────────────────────────────────────────────────────
// scan
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_scan_packages() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("lib.zip");
    write_zip(&archive, &["a/b/One.unit", "a/Two.unit", "meta/Gen.unit", "notes.txt"]);

    enclave()
        .arg("scan")
        .arg(&archive)
        .args(["--ignore", "meta"])
        .assert()
        .success()
        .stdout("a\na.b\n");
}

#[test]
fn test_scan_units_json() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("lib.zip");
    write_zip(&archive, &["a/b/One.unit", "a/Two.unit"]);

    enclave()
        .args(["scan", "--units", "--json"])
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"a.Two\"").and(predicate::str::contains("\"a.b.One\"")));
}

#[test]
fn test_scan_missing_archive_fails() {
    let dir = tempfile::tempdir().unwrap();
    enclave()
        .arg("scan")
        .arg(dir.path().join("absent.zip"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("scan failed"));
}

#[test]
fn test_scan_requires_archive() {
    enclave().arg("scan").assert().failure();
}

// ────────────────────────────────────────────────────────────────────────────
// resolve
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_resolve_explains_sources() {
    let dir = tempfile::tempdir().unwrap();
    let policy = fixture(dir.path());

    enclave()
        .arg("resolve")
        .arg("--policy")
        .arg(&policy)
        .args(["pkg.isolated.Foo", "lib.Util"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("pkg.isolated.Foo -> isolated")
                .and(predicate::str::contains("isolated.zip!/pkg/isolated/Foo.unit"))
                .and(predicate::str::contains("lib.Util -> delegated")),
        );
}

#[test]
fn test_resolve_excluded_missing_from_host_fails() {
    let dir = tempfile::tempdir().unwrap();
    let policy = fixture(dir.path());

    enclave()
        .arg("resolve")
        .arg("--policy")
        .arg(&policy)
        .arg("pkg.isolated.internal.Bar")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("pkg.isolated.internal.Bar -> excluded")
                .and(predicate::str::contains("1 of 1 symbols could not be resolved")),
        );
}

#[test]
fn test_resolve_route_only() {
    let dir = tempfile::tempdir().unwrap();
    let policy = fixture(dir.path());

    enclave()
        .args(["resolve", "--route-only", "--policy"])
        .arg(&policy)
        .args(["pkg.isolated.Foo", "pkg.isolated.internal.Bar", "other.Thing"])
        .assert()
        .success()
        .stdout(
            "pkg.isolated.Foo -> isolated\n\
             pkg.isolated.internal.Bar -> excluded\n\
             other.Thing -> delegated\n",
        );
}

#[test]
fn test_resolve_json() {
    let dir = tempfile::tempdir().unwrap();
    let policy = fixture(dir.path());

    let output = enclave()
        .args(["resolve", "--json", "--policy"])
        .arg(&policy)
        .arg("pkg.isolated.Foo")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["route"], "isolated");
    assert_eq!(value["sha256"].as_str().map(str::len), Some(64));
}

#[test]
fn test_resolve_bad_policy_file() {
    let dir = tempfile::tempdir().unwrap();
    let policy = dir.path().join("enclave.toml");
    fs::write(&policy, "[policy]\ninclude = 3\n").unwrap();

    enclave()
        .args(["resolve", "--policy"])
        .arg(&policy)
        .arg("x.Y")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot load policy"));
}
