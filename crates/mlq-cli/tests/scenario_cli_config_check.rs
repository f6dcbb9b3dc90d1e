//! Scenario: `mlq config check` and `mlq config-hash`
//!
//! # Invariants under test
//!
//! 1. A valid layered config passes and prints the effective reconcile section,
//!    later files overriding earlier ones.
//! 2. An invalid threshold fails with CONFIG_INVALID naming the field.
//! 3. A literal token in YAML is refused.
//! 4. `config-hash` is stable for the same input.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn yaml(body: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

fn mlq() -> Command {
    let mut cmd = Command::cargo_bin("mlq").unwrap();
    cmd.env("RUST_LOG", "off");
    cmd
}

const BASE: &str = r#"
reconcile:
  maxAttemptsBeforeGiveUp: 5
  staleStatuses: [ERROR, PROCESSING]
marketplace:
  baseUrl: "https://api.mercadolibre.com"
"#;

#[test]
fn valid_layers_pass() {
    let base = yaml(BASE);
    let overlay = yaml("reconcile:\n  maxAttemptsBeforeGiveUp: 8\n");

    // 1)
    mlq()
        .args(["config", "check"])
        .arg(base.path())
        .arg(overlay.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("reconcile_ok=true"))
        .stdout(predicate::str::contains("\"maxAttemptsBeforeGiveUp\": 8"));
}

#[test]
fn invalid_threshold_fails() {
    let bad = yaml("reconcile:\n  rateLimitMaxCalls: 0\n");

    // 2)
    mlq()
        .args(["config", "check"])
        .arg(bad.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_INVALID field=rateLimitMaxCalls"));
}

#[test]
fn literal_secret_is_refused() {
    let leaked = yaml("marketplace:\n  clientIdEnv: \"APP_USR-123456-abcdef\"\n");

    // 3)
    mlq()
        .arg("config-hash")
        .arg(leaked.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
}

#[test]
fn config_hash_is_stable() {
    let base = yaml(BASE);

    // 4)
    let first = mlq().arg("config-hash").arg(base.path()).output().unwrap();
    let second = mlq().arg("config-hash").arg(base.path()).output().unwrap();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
    assert!(String::from_utf8_lossy(&first.stdout).starts_with("config_hash="));
}
