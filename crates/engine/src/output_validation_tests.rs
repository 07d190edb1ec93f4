// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn spec(name: &str, kind: OutputKind, required: bool) -> OutputSpec {
    OutputSpec {
        name: name.to_string(),
        kind,
        required,
    }
}

#[test]
fn empty_spec_accepts_anything() {
    let mut outputs = HashMap::new();
    outputs.insert("whatever".to_string(), json!(1));
    assert!(validate_outputs(&[], &outputs).is_ok());
}

#[test]
fn missing_required_field_fails() {
    let specs = vec![spec("summary", OutputKind::String, true)];
    assert!(validate_outputs(&specs, &HashMap::new()).is_err());
}

#[test]
fn missing_optional_field_is_fine() {
    let specs = vec![spec("summary", OutputKind::String, false)];
    assert!(validate_outputs(&specs, &HashMap::new()).is_ok());
}

#[test]
fn type_mismatch_fails() {
    let specs = vec![spec("count", OutputKind::Number, true)];
    let mut outputs = HashMap::new();
    outputs.insert("count".to_string(), json!("not a number"));
    assert!(validate_outputs(&specs, &outputs).is_err());
}

#[test]
fn file_path_must_exist() {
    let specs = vec![spec("report", OutputKind::FilePath, true)];
    let mut outputs = HashMap::new();
    outputs.insert("report".to_string(), json!("/definitely/not/a/real/path"));
    assert!(validate_outputs(&specs, &outputs).is_err());
}

#[test]
fn file_path_existing_file_passes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("out.txt");
    std::fs::write(&file, b"hi").unwrap();
    let specs = vec![spec("report", OutputKind::FilePath, true)];
    let mut outputs = HashMap::new();
    outputs.insert(
        "report".to_string(),
        json!(file.to_string_lossy().to_string()),
    );
    assert!(validate_outputs(&specs, &outputs).is_ok());
}
