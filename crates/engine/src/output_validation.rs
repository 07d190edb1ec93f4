// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validates `step_done` outputs against a step's declared
//! [`OutputSpec`]s before the orchestrator accepts the `completing` →
//! `done` transition (§4.3 of `spec.md`).

use meow_core::{OutputKind, OutputSpec};
use std::collections::HashMap;
use std::path::Path;

/// Validates in declaration order, stopping at the first failure so the
/// message names one concrete, actionable field.
pub fn validate_outputs(
    expected: &[OutputSpec],
    outputs: &HashMap<String, serde_json::Value>,
) -> Result<(), String> {
    for spec in expected {
        let value = match outputs.get(&spec.name) {
            Some(v) => v,
            None if spec.required => {
                return Err(format!("missing required output {:?}", spec.name));
            }
            None => continue,
        };
        if !kind_matches(spec.kind, value) {
            return Err(format!(
                "output {:?} does not match expected type {:?}: {}",
                spec.name, spec.kind, value
            ));
        }
        if spec.kind == OutputKind::FilePath {
            let path = value.as_str().unwrap_or_default();
            if !Path::new(path).exists() {
                return Err(format!(
                    "output {:?} names a file_path that does not exist: {}",
                    spec.name, path
                ));
            }
        }
    }
    Ok(())
}

fn kind_matches(kind: OutputKind, value: &serde_json::Value) -> bool {
    match kind {
        OutputKind::String | OutputKind::FilePath => value.is_string(),
        OutputKind::Number => value.is_number(),
        OutputKind::Bool => value.is_boolean(),
    }
}

#[cfg(test)]
#[path = "output_validation_tests.rs"]
mod tests;
