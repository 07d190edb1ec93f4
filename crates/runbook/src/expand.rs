// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template expansion: materializes a template reference into a list of
//! prefixed, dependency-rewritten [`meow_core::Step`]s.
//!
//! The [`Expander`] itself is a pure function over an already-loaded
//! [`TemplateDef`] — resolving a template *reference* (e.g. a path or
//! name) to that definition is the job of a [`TemplateLoader`], kept as
//! a narrow trait so the orchestrator can depend on it without pulling
//! in the full runbook parser.

use meow_core::{Step, StepExecutor, StepId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum nesting depth of expand-within-expand before an expansion is
/// rejected. Guards against template cycles.
pub const MAX_EXPANSION_DEPTH: usize = 32;

/// Maximum number of steps a single expansion (one template load, or one
/// foreach iteration) may materialize.
pub const MAX_EXPANSION_STEPS: usize = 2_000;

/// `{{name}}` or `{{namespace.name}}` placeholder, matching `spec.md`'s
/// interpolation syntax.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_.\-]*)\s*\}\}").expect("constant regex is valid")
});

/// One step inside a template, prior to prefixing or variable
/// substitution. `needs` entries referring to another step defined in
/// the same template are "internal" and get rewritten to the prefixed
/// form; anything else passes through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStepDef {
    pub id: String,
    #[serde(default)]
    pub needs: Vec<String>,
    /// The step's executor config, in the same tagged-enum shape as
    /// [`StepExecutor`]'s serde representation, with `{{..}}`
    /// placeholders left unresolved in any string field.
    pub executor: serde_json::Value,
}

/// A loaded template: an ordered list of step definitions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemplateDef {
    pub steps: Vec<TemplateStepDef>,
}

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("template {0:?} not found")]
    NotFound(String),

    #[error("failed to load template {0:?}: {1}")]
    LoadFailed(String, String),

    #[error("expansion of {0} exceeded the configured depth limit")]
    DepthExceeded(StepId),

    #[error("expansion of {0} exceeded the configured step-count limit")]
    TooManySteps(StepId),

    #[error("template {0:?} step {1:?} has an invalid executor config: {2}")]
    InvalidExecutor(String, String, String),
}

/// Resolves a template reference (a name, path, or other opaque key) to
/// its [`TemplateDef`]. The concrete loader (HCL, TOML, JSON) is chosen
/// by the embedder; the [`Expander`] only depends on this trait.
pub trait TemplateLoader: Send + Sync {
    fn load(&self, template_ref: &str) -> Result<TemplateDef, ExpandError>;
}

/// A [`TemplateLoader`] backed by an in-memory map, used by tests and by
/// embedders that pre-resolve templates (e.g. a runbook already parsed
/// into [`TemplateDef`]s at startup).
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateLoader {
    templates: HashMap<String, TemplateDef>,
}

impl StaticTemplateLoader {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, def: TemplateDef) -> Self {
        self.templates.insert(name.into(), def);
        self
    }
}

impl TemplateLoader for StaticTemplateLoader {
    fn load(&self, template_ref: &str) -> Result<TemplateDef, ExpandError> {
        self.templates
            .get(template_ref)
            .cloned()
            .ok_or_else(|| ExpandError::NotFound(template_ref.to_string()))
    }
}

/// A [`TemplateLoader`] backed by a directory of `<template_ref>.json`
/// files, each deserializing directly into a [`TemplateDef`]. No
/// on-disk template *language* beyond plain JSON is implemented here —
/// the `{{..}}` placeholder syntax inside step fields is handled by the
/// [`Expander`] at expansion time, not by this loader.
#[derive(Debug, Clone)]
pub struct FsTemplateLoader {
    dir: PathBuf,
}

impl FsTemplateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, template_ref: &str) -> PathBuf {
        self.dir.join(format!("{template_ref}.json"))
    }
}

impl TemplateLoader for FsTemplateLoader {
    fn load(&self, template_ref: &str) -> Result<TemplateDef, ExpandError> {
        let path: &Path = &self.path_for(template_ref);
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExpandError::NotFound(template_ref.to_string())
            } else {
                ExpandError::LoadFailed(template_ref.to_string(), e.to_string())
            }
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| ExpandError::LoadFailed(template_ref.to_string(), e.to_string()))
    }
}

/// Stateless template expansion.
#[derive(Debug, Clone, Default)]
pub struct Expander;

impl Expander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a template directly into `parent`'s children. `depth` is
    /// the caller's current expand-nesting depth (0 for a top-level
    /// expand step).
    ///
    /// `resolve_ancestor` is consulted for any placeholder not found in
    /// `vars` — it implements the scope-walk lookup of §4.4: given a
    /// dotted reference like `sibling.outputs.value`, the caller (which
    /// holds the [`meow_core::Run`]) resolves it against already-done
    /// sibling/ancestor steps. Unresolved placeholders are left as-is.
    pub fn expand(
        &self,
        loader: &dyn TemplateLoader,
        template_ref: &str,
        vars: &HashMap<String, String>,
        parent: &StepId,
        depth: usize,
        resolve_ancestor: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Vec<Step>, ExpandError> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(ExpandError::DepthExceeded(parent.clone()));
        }
        let def = loader.load(template_ref)?;
        self.expand_def(&def, vars, parent, parent, resolve_ancestor)
    }

    /// Expand a `foreach` variant: once per item, with `item_var` bound
    /// to the current item in each iteration's variable scope.
    /// Iterations are ID-namespaced by index (`parent.0`, `parent.1`,
    /// ...) but every materialized step's `expanded_from` is `parent`
    /// itself (invariant 2). In sequential mode, iteration k+1's first
    /// step gains an implicit dependency on iteration k's last step.
    #[allow(clippy::too_many_arguments)]
    pub fn expand_foreach(
        &self,
        loader: &dyn TemplateLoader,
        template_ref: &str,
        base_vars: &HashMap<String, String>,
        parent: &StepId,
        depth: usize,
        items: &[serde_json::Value],
        item_var: &str,
        sequential: bool,
        resolve_ancestor: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Vec<Step>, ExpandError> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(ExpandError::DepthExceeded(parent.clone()));
        }
        let def = loader.load(template_ref)?;
        let mut all = Vec::new();
        let mut prev_last: Option<StepId> = None;
        for (i, item) in items.iter().enumerate() {
            let iter_prefix = parent.child(&i.to_string());
            let mut vars = base_vars.clone();
            vars.insert(item_var.to_string(), json_to_plain_string(item));
            let mut steps = self.expand_def(&def, &vars, &iter_prefix, parent, resolve_ancestor)?;
            if sequential {
                if let Some(prev) = &prev_last {
                    if let Some(first) = steps.first_mut() {
                        first.needs.push(prev.clone());
                    }
                }
                prev_last = steps.last().map(|s| s.id.clone());
            }
            all.extend(steps);
            if all.len() > MAX_EXPANSION_STEPS {
                return Err(ExpandError::TooManySteps(parent.clone()));
            }
        }
        Ok(all)
    }

    /// Materialize a template as the *initial* step set of a brand-new
    /// run, rather than as a child expansion of an existing step. Bare
    /// template step IDs are kept as-is (no ID prefix) and
    /// `expanded_from` is left unset — invariant 2 only constrains
    /// steps that are themselves the product of an `expand`/`branch`
    /// step, which a run's top-level steps are not.
    pub fn expand_root(
        &self,
        loader: &dyn TemplateLoader,
        template_ref: &str,
        vars: &HashMap<String, String>,
    ) -> Result<Vec<Step>, ExpandError> {
        let def = loader.load(template_ref)?;
        if def.steps.len() > MAX_EXPANSION_STEPS {
            return Err(ExpandError::TooManySteps(StepId::new(template_ref)));
        }
        let mut noop = |_: &str| None;
        let mut out = Vec::with_capacity(def.steps.len());
        for sdef in &def.steps {
            let id = StepId::new(sdef.id.clone());
            let needs = sdef.needs.iter().map(|n| StepId::new(n.clone())).collect();
            let substituted = substitute_value(&sdef.executor, vars, &mut noop);
            let executor: StepExecutor = serde_json::from_value(substituted).map_err(|e| {
                ExpandError::InvalidExecutor(
                    "root".to_string(),
                    sdef.id.clone(),
                    e.to_string(),
                )
            })?;
            out.push(Step::new(id, executor, needs));
        }
        Ok(out)
    }

    fn expand_def(
        &self,
        def: &TemplateDef,
        vars: &HashMap<String, String>,
        id_prefix: &StepId,
        expanded_from: &StepId,
        resolve_ancestor: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Vec<Step>, ExpandError> {
        if def.steps.len() > MAX_EXPANSION_STEPS {
            return Err(ExpandError::TooManySteps(id_prefix.clone()));
        }
        let internal_ids: HashSet<&str> = def.steps.iter().map(|s| s.id.as_str()).collect();
        let mut out = Vec::with_capacity(def.steps.len());
        for sdef in &def.steps {
            let child_id = id_prefix.child(&sdef.id);
            let needs = sdef
                .needs
                .iter()
                .map(|n| {
                    if internal_ids.contains(n.as_str()) {
                        id_prefix.child(n)
                    } else {
                        StepId::new(n.clone())
                    }
                })
                .collect();
            let substituted = substitute_value(&sdef.executor, vars, resolve_ancestor);
            let executor: StepExecutor =
                serde_json::from_value(substituted).map_err(|e| {
                    ExpandError::InvalidExecutor(
                        id_prefix.as_str().to_string(),
                        sdef.id.clone(),
                        e.to_string(),
                    )
                })?;
            let mut step = Step::new(child_id, executor, needs);
            step.expanded_from = Some(expanded_from.clone());
            out.push(step);
        }
        Ok(out)
    }
}

fn json_to_plain_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute_value(
    value: &serde_json::Value,
    vars: &HashMap<String, String>,
    resolve_ancestor: &mut dyn FnMut(&str) -> Option<String>,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            serde_json::Value::String(substitute_str(s, vars, resolve_ancestor))
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| substitute_value(v, vars, resolve_ancestor))
                .collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, vars, resolve_ancestor)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(
    s: &str,
    vars: &HashMap<String, String>,
    resolve_ancestor: &mut dyn FnMut(&str) -> Option<String>,
) -> String {
    PLACEHOLDER
        .replace_all(s, |caps: &regex::Captures| {
            let name = &caps[1];
            if let Some(v) = vars.get(name) {
                v.clone()
            } else if let Some(v) = resolve_ancestor(name) {
                v
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
#[path = "expand_tests.rs"]
mod tests;
