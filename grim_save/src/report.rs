//! Offline inspection of save files, used by the `grim_save` binary.

use std::fmt::Write as _;

use anyhow::{anyhow, Context, Result};
use grim_persist::{GraphSummary, PersistentRegistry, RegistryScope, RuntimeValue};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::envelope::{split_envelopes, PayloadKind, SaveHeader};

#[derive(Debug, Serialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum PayloadReport {
    ObjectGraph {
        header: SaveHeader,
        bytes: usize,
        summary: GraphSummary,
    },
    Registry {
        header: SaveHeader,
        bytes: usize,
        value: JsonValue,
        #[serde(skip)]
        text: String,
    },
}

/// Decodes every envelope in `bytes` without a script runtime.
pub fn inspect_bytes(bytes: &[u8]) -> Result<Vec<PayloadReport>> {
    let mut reports = Vec::new();
    for (index, (header, payload)) in split_envelopes(bytes)?.into_iter().enumerate() {
        let kind = header.kind;
        let report = match kind {
            PayloadKind::ObjectGraph => PayloadReport::ObjectGraph {
                header,
                bytes: payload.len(),
                summary: GraphSummary::scan(payload)
                    .with_context(|| format!("payload {index} is not a valid object graph"))?,
            },
            PayloadKind::Registry => {
                let value = RuntimeValue::from_bytes(payload)
                    .with_context(|| format!("payload {index} is not a valid registry"))?;
                PayloadReport::Registry {
                    header,
                    bytes: payload.len(),
                    value: value.to_json()?,
                    text: value.to_string(),
                }
            }
        };
        reports.push(report);
    }
    Ok(reports)
}

pub fn render_text(reports: &[PayloadReport]) -> String {
    let mut out = String::new();
    for report in reports {
        match report {
            PayloadReport::ObjectGraph { bytes, summary, .. } => {
                let _ = writeln!(out, "object graph ({bytes} bytes)");
                let _ = writeln!(
                    out,
                    "  strings: {}  arrays: {}  tables: {}  instances: {}",
                    summary.strings, summary.arrays, summary.tables, summary.instances
                );
                match summary.root_table {
                    Some(index) => {
                        let _ = writeln!(out, "  root table: {index} (merges into globals)");
                    }
                    None => {
                        let _ = writeln!(out, "  root table: none");
                    }
                }
                let _ = writeln!(
                    out,
                    "  references: {} ({} weak)",
                    summary.references, summary.weak_references
                );
                if !summary.class_names.is_empty() {
                    let _ = writeln!(out, "  classes: {}", summary.class_names.join(", "));
                }
                if !summary.closure_names.is_empty() {
                    let _ = writeln!(out, "  functions: {}", summary.closure_names.join(", "));
                }
                for (tag, count) in &summary.instances_by_user_type {
                    if *tag != 0 {
                        let _ = writeln!(out, "  user type {tag}: {count} instance(s)");
                    }
                }
            }
            PayloadReport::Registry { bytes, text, .. } => {
                let _ = writeln!(out, "registry ({bytes} bytes)");
                let _ = writeln!(out, "  {text}");
            }
        }
    }
    out
}

/// Looks up a dotted path in the first registry payload of `bytes`.
pub fn registry_value(bytes: &[u8], path: &str) -> Result<RuntimeValue> {
    let payload = split_envelopes(bytes)?
        .into_iter()
        .find(|(header, _)| header.kind == PayloadKind::Registry)
        .map(|(_, payload)| payload)
        .ok_or_else(|| anyhow!("file holds no registry payload"))?;
    let mut registry = PersistentRegistry::new();
    registry
        .load_scope(RegistryScope::Session, payload)
        .context("registry payload is corrupt")?;
    Ok(registry.get(RegistryScope::Session, path).clone())
}
