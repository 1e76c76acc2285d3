//! CLI behavior: exit codes, human-readable output, JSON report.

mod common;

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

use common::{function, module, strukt};
use verifier_types::Instruction::*;
use verifier_types::{Ability, Module, Type};

fn write_module(dir: &Path, file: &str, module: &Module) -> std::path::PathBuf {
    let path = dir.join(file);
    fs::write(&path, serde_json::to_string_pretty(module).unwrap()).unwrap();
    path
}

fn bin() -> Command {
    Command::cargo_bin("bytecode-verifier").unwrap()
}

fn clean_module() -> Module {
    module(
        "clean",
        vec![],
        vec![function(
            "noop",
            vec![],
            vec![],
            vec![],
            vec![LdU64(1), Pop, Ret],
        )],
    )
}

fn rejected_module() -> Module {
    module(
        "broken",
        vec![],
        vec![function(
            "double_spend",
            vec![Type::U64],
            vec![],
            vec![],
            vec![MoveLoc(0), Pop, MoveLoc(0), Ret],
        )],
    )
}

#[test]
fn test_accepts_clean_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), "clean.json", &clean_module());
    bin()
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("accepted (clean)"));
}

#[test]
fn test_rejects_broken_module_with_findings() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), "broken.json", &rejected_module());
    bin()
        .arg(&path)
        .assert()
        .failure()
        .stdout(
            predicate::str::contains("rejected (broken)")
                .and(predicate::str::contains("use of moved or unassigned value"))
                .and(predicate::str::contains("double_spend @2")),
        );
}

#[test]
fn test_exit_code_covers_every_input() {
    // one rejected module fails the whole invocation
    let dir = tempfile::tempdir().unwrap();
    let clean = write_module(dir.path(), "clean.json", &clean_module());
    let broken = write_module(dir.path(), "broken.json", &rejected_module());
    bin()
        .arg(&clean)
        .arg(&broken)
        .assert()
        .failure()
        .stdout(
            predicate::str::contains("accepted (clean)")
                .and(predicate::str::contains("rejected (broken)")),
        );
}

#[test]
fn test_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), "broken.json", &rejected_module());
    let output = bin().arg("--json").arg(&path).assert().failure();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report[0]["module"], "broken");
    assert_eq!(report[0]["accepted"], false);
    assert!(report[0]["findings"].as_array().is_some_and(|f| !f.is_empty()));
}

#[test]
fn test_unreachable_policy_flag() {
    let dir = tempfile::tempdir().unwrap();
    let m = module(
        "tail",
        vec![],
        vec![function("f", vec![], vec![], vec![], vec![Ret, Nop, Ret])],
    );
    let path = write_module(dir.path(), "tail.json", &m);

    // advisory by default
    bin()
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("warning: ").and(predicate::str::contains("unreachable")));

    // rejection when asked for
    bin()
        .arg("--unreachable")
        .arg("error")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn test_timeout_flag_accepts_fast_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), "clean.json", &clean_module());
    bin()
        .arg("--timeout-ms")
        .arg("5000")
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn test_missing_file_reports_read_error() {
    bin()
        .arg("does-not-exist.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("reading does-not-exist.json"));
}

#[test]
fn test_garbage_input_reports_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.json");
    fs::write(&path, "not json").unwrap();
    bin()
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsing"));
}

#[test]
fn test_key_only_resource_module_verifies_from_disk() {
    // a realistic fixture: declarations plus code round-trips through JSON
    let vault = strukt("Vault", [Ability::Key], vec![("amount", Type::U64)]);
    let m = module(
        "token",
        vec![vault],
        vec![function(
            "publish",
            vec![Type::Address],
            vec![],
            vec![],
            vec![
                MoveLoc(0),
                LdU64(100),
                Pack {
                    datatype: 0,
                    type_args: vec![],
                },
                MoveTo {
                    datatype: 0,
                    type_args: vec![],
                },
                Ret,
            ],
        )],
    );
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), "token.json", &m);
    bin().arg(&path).assert().success();
}
