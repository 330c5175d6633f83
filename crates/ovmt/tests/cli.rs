// SPDX-License-Identifier: AGPL-3.0

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn ovmt(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ovmt"))
        .args(args)
        .current_dir(dir)
        .env_remove("OVMT_EXECUTION_MANAGER")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_transpiles_plain_program() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("add.hex"), "0x6001600201\n").unwrap();

    let output = ovmt(dir.path(), &["add.hex"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0x6001600201"), "{}", stdout);
}

#[test]
fn test_reports_whitelist_violation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("add.hex"), "6001600201").unwrap();

    let output = ovmt(dir.path(), &["--whitelist", "PUSH1,STOP", "add.hex"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Opcode [ADD] is not on the whitelist."), "{}", stdout);
}

#[test]
fn test_config_file_and_json_output() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("ovmt.toml"),
        "[global]\nexecution-manager-address = \"0x1111111111111111111111111111111111111111\"\n",
    )
    .unwrap();
    // PUSH1 0, SLOAD
    fs::write(dir.path().join("sload.hex"), "600054").unwrap();

    let output = ovmt(dir.path(), &["--json-output", "out.json", "sload.hex"]);
    assert_eq!(output.status.code(), Some(0));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out.json")).unwrap()).unwrap();
    assert_eq!(json["total_found"], 1);
    assert_eq!(json["results"][0]["status"], "success");
    let bytecode = json["results"][0]["bytecode"].as_str().unwrap();
    assert!(bytecode.contains("731111111111111111111111111111111111111111"));
}

#[test]
fn test_missing_input_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let output = ovmt(dir.path(), &["missing.hex"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_inline_hex_written_to_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = ovmt(
        dir.path(),
        &["--hex", "0x6001600201", "--hex", "00", "--output", "out.hex"],
    );
    assert_eq!(output.status.code(), Some(0));
    let written = fs::read_to_string(dir.path().join("out.hex")).unwrap();
    assert_eq!(written, "0x6001600201\n0x00\n");
}

#[test]
fn test_no_input_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let output = ovmt(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_init_code_with_deployed_body() {
    let dir = tempfile::tempdir().unwrap();
    // PUSH1 2, DUP1, PUSH1 0x0b, PUSH1 0, CODECOPY, PUSH1 0, RETURN | CALLER, STOP
    fs::write(dir.path().join("init.hex"), "0x600280600b60003960 00f3 3300").unwrap();
    fs::write(dir.path().join("body.hex"), "0x3300").unwrap();

    let output = ovmt(dir.path(), &["--deployed", "body.hex", "init.hex"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|line| line.starts_with("0x"))
        .unwrap_or_else(|| panic!("no bytecode in {}", stdout));
    let bytes = hex::decode(&line[2..]).unwrap();
    // the body length grows with the CALLER rewrite, the constructor does not
    assert_eq!(bytes[4], 0x0b);
    assert_eq!(bytes[1] as usize, bytes.len() - 0x0b);

    fs::write(dir.path().join("other.hex"), "5b5b").unwrap();
    let output = ovmt(dir.path(), &["--deployed", "other.hex", "init.hex"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MISSING_DEPLOYED_BYTECODE"), "{}", stdout);
}
