//! 🧬 XMD surgery shared by dashboards and external files.
//!
//! Dashboards carry their own xmd (keyed by step-qualified field names), and
//! every exported dataset ships a user xmd next to its CSV. Both get the same
//! treatment: volatile keys out, field references through the rename plan.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::substitution::FieldRewriter;

/// 🗑️ Top-level xmd keys the destination assigns on its own.
pub const VOLATILE_XMD_KEYS: &[&str] = &[
    "createdBy",
    "createdDate",
    "dataset",
    "language",
    "lastModifiedBy",
    "lastModifiedDate",
    "type",
    "url",
];

/// 🗑️ Per-field keys the external file loader rejects.
pub const VOLATILE_FIELD_KEYS: &[&str] = &[
    "customActionsEnabled",
    "fullyQualifiedName",
    "isMultiValue",
    "linkTemplateEnabled",
    "origin",
    "salesforceActionsEnabled",
    "showInExplorer",
];

pub const FIELD_SECTIONS: &[&str] = &[
    "dates",
    "dimensions",
    "measures",
    "derivedDimensions",
    "derivedMeasures",
];

static ROW_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*row\.([^}\s]+)\s*\}\}").expect("valid regex"));

pub fn strip_volatile_keys(xmd: &mut Value) {
    if let Some(map) = xmd.as_object_mut() {
        for key in VOLATILE_XMD_KEYS {
            map.remove(*key);
        }
    }
}

pub fn strip_volatile_field_keys(xmd: &mut Value) {
    for_each_entry(xmd, |entry| {
        for key in VOLATILE_FIELD_KEYS {
            entry.remove(*key);
        }
    });
}

/// ✏️ Renames `field`, `fullField`, `fields.*` and `{{row.X}}` link templates in every section.
pub fn rename_fields(xmd: &mut Value, rewriter: &FieldRewriter) {
    if rewriter.is_empty() {
        return;
    }
    for_each_entry(xmd, |entry| {
        for key in ["field", "fullField"] {
            rename_string(entry.get_mut(key), rewriter);
        }
        if let Some(Value::Object(fields)) = entry.get_mut("fields") {
            for value in fields.values_mut() {
                rename_string(Some(value), rewriter);
            }
        }
        if let Some(Value::String(template)) = entry.get_mut("linkTemplate") {
            *template = ROW_REFERENCE
                .replace_all(template, |caps: &Captures<'_>| {
                    match rewriter.token(&caps[1]) {
                        Some(renamed) => format!("{{{{row.{renamed}}}}}"),
                        None => caps[0].to_string(),
                    }
                })
                .into_owned();
        }
    });
}

fn rename_string(value: Option<&mut Value>, rewriter: &FieldRewriter) {
    if let Some(Value::String(s)) = value {
        if let Some(renamed) = rewriter.qualified_token(s) {
            *s = renamed;
        }
    }
}

/// 🪞 Dimension members with only a label or only a member value get the other copied in.
pub fn backfill_members(xmd: &mut Value) {
    for_each_entry(xmd, |entry| {
        let Some(Value::Array(members)) = entry.get_mut("members") else {
            return;
        };
        for member in members.iter_mut().filter_map(Value::as_object_mut) {
            match (member.get("member").cloned(), member.get("label").cloned()) {
                (Some(value), None) => {
                    member.insert("label".into(), value);
                }
                (None, Some(label)) => {
                    member.insert("member".into(), label);
                }
                _ => {}
            }
        }
    });
}

/// ✂️ Derived entries whose `field` is also a real column would shadow it on load.
pub fn drop_derived_collisions(xmd: &mut Value, columns: &HashSet<&str>) {
    for section in ["derivedDimensions", "derivedMeasures"] {
        if let Some(Value::Array(entries)) = xmd.get_mut(section) {
            entries.retain(|entry| {
                entry
                    .get("field")
                    .and_then(Value::as_str)
                    .is_none_or(|field| !columns.contains(field))
            });
        }
    }
}

fn for_each_entry(xmd: &mut Value, mut f: impl FnMut(&mut Map<String, Value>)) {
    for section in FIELD_SECTIONS {
        if let Some(Value::Array(entries)) = xmd.get_mut(*section) {
            entries
                .iter_mut()
                .filter_map(Value::as_object_mut)
                .for_each(&mut f);
        }
    }
}
