//! Change descriptors and snapshot-vs-snapshot sheet diffing.
//!
//! [`diff_sheets`] composes the diff engine into the minimal list of
//! [`SheetChange`] descriptors that brings the document's snapshot in line
//! with what the grid reported. One changed cell becomes one keyed update,
//! not a collection replacement.

use crate::diff::diff_keyed;
use crate::doc::schema::{self, collection};
use crate::model::Sheet;
use serde_json::Value as Json;
use std::collections::HashMap;
use tracing::debug;

/// Kind of mutation a descriptor carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Update,
    Delete,
}

/// One mutation against one sheet of the replicated document.
///
/// For keyed collections `path` names the collection and `key` the entry;
/// for anything else `path` is walked segment by segment, creating
/// intermediate replicated maps as needed, and the leaf is set or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetChange {
    pub sheet_id: String,
    pub path: Vec<String>,
    pub key: Option<String>,
    pub value: Option<Json>,
    pub op: ChangeOp,
}

impl SheetChange {
    /// Set one entry of a keyed collection.
    pub fn set(
        sheet_id: impl Into<String>,
        collection: &str,
        key: impl Into<String>,
        value: Json,
    ) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            path: vec![collection.to_string()],
            key: Some(key.into()),
            value: Some(value),
            op: ChangeOp::Update,
        }
    }

    /// Remove one entry of a keyed collection.
    pub fn unset(sheet_id: impl Into<String>, collection: &str, key: impl Into<String>) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            path: vec![collection.to_string()],
            key: Some(key.into()),
            value: None,
            op: ChangeOp::Delete,
        }
    }

    /// Set a (possibly nested) field value.
    pub fn set_field(sheet_id: impl Into<String>, path: &[&str], value: Json) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
            key: None,
            value: Some(value),
            op: ChangeOp::Update,
        }
    }

    /// Remove a (possibly nested) field.
    pub fn unset_field(sheet_id: impl Into<String>, path: &[&str]) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
            key: None,
            value: None,
            op: ChangeOp::Delete,
        }
    }
}

/// Keyed JSON view of a sheet's cell collection (present cells only).
pub fn cells_as_map(sheet: &Sheet) -> HashMap<String, Json> {
    sheet
        .cells
        .iter()
        .filter_map(|cell| {
            let payload = cell.v.as_ref()?;
            Some((
                cell.key(),
                serde_json::to_value(payload).unwrap_or(Json::Null),
            ))
        })
        .collect()
}

fn calc_chain_as_map(sheet: &Sheet) -> HashMap<String, Json> {
    sheet
        .calc_chain
        .iter()
        .map(|entry| {
            (
                entry.key(),
                serde_json::to_value(entry).unwrap_or(Json::Null),
            )
        })
        .collect()
}

fn serialize_map<T: serde::Serialize>(map: &HashMap<String, T>) -> HashMap<String, Json> {
    map.iter()
        .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Json::Null)))
        .collect()
}

fn condition_formats_as_map(sheet: &Sheet) -> HashMap<String, Json> {
    sheet
        .condition_formats
        .iter()
        .enumerate()
        .map(|(i, entry)| (schema::condition_format_key(entry, i), entry.clone()))
        .collect()
}

fn push_keyed_changes(
    out: &mut Vec<SheetChange>,
    sheet_id: &str,
    collection: &str,
    old: &HashMap<String, Json>,
    new: &HashMap<String, Json>,
) {
    let diff = diff_keyed(old, new);
    for (key, value) in diff.added {
        out.push(SheetChange::set(sheet_id, collection, key, value));
    }
    for key in diff.removed {
        out.push(SheetChange::unset(sheet_id, collection, key));
    }
}

/// Compute the minimal change list that turns `current` (the document's
/// snapshot) into `incoming` (what the grid reported). Sheets present on only
/// one side are the lifecycle handlers' business and are ignored here.
pub fn diff_sheets(current: &[Sheet], incoming: &[Sheet]) -> Vec<SheetChange> {
    let current_by_id: HashMap<&str, &Sheet> =
        current.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut changes = Vec::new();
    for sheet in incoming {
        let Some(old) = current_by_id.get(sheet.id.as_str()) else {
            debug!(sheet = %sheet.id, "sheet unknown to document, leaving to lifecycle handling");
            continue;
        };

        // Scalar fields; status is derived from order inside the orchestrator.
        if old.name != sheet.name {
            changes.push(SheetChange::set_field(
                &sheet.id,
                &["name"],
                Json::String(sheet.name.clone()),
            ));
        }
        if old.order != sheet.order {
            changes.push(SheetChange::set_field(
                &sheet.id,
                &["order"],
                serde_json::json!(sheet.order),
            ));
        }
        if old.row != sheet.row {
            changes.push(SheetChange::set_field(
                &sheet.id,
                &["row"],
                serde_json::json!(sheet.row),
            ));
        }
        if old.column != sheet.column {
            changes.push(SheetChange::set_field(
                &sheet.id,
                &["column"],
                serde_json::json!(sheet.column),
            ));
        }

        // Config diffs per sub-key so the wrapped map stays a replicated map.
        let old_config: HashMap<String, Json> =
            old.config.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let new_config: HashMap<String, Json> =
            sheet.config.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let config_diff = diff_keyed(&old_config, &new_config);
        for (key, value) in config_diff.added {
            changes.push(SheetChange::set_field(
                &sheet.id,
                &[collection::CONFIG, &key],
                value,
            ));
        }
        for key in config_diff.removed {
            changes.push(SheetChange::unset_field(
                &sheet.id,
                &[collection::CONFIG, &key],
            ));
        }

        push_keyed_changes(
            &mut changes,
            &sheet.id,
            collection::CELLS,
            &cells_as_map(old),
            &cells_as_map(sheet),
        );
        push_keyed_changes(
            &mut changes,
            &sheet.id,
            collection::CALC_CHAIN,
            &calc_chain_as_map(old),
            &calc_chain_as_map(sheet),
        );
        push_keyed_changes(
            &mut changes,
            &sheet.id,
            collection::BLOCK_FUNCS,
            &serialize_map(&old.block_functions),
            &serialize_map(&sheet.block_functions),
        );
        push_keyed_changes(
            &mut changes,
            &sheet.id,
            collection::VALIDATIONS,
            &old.validations,
            &sheet.validations,
        );
        push_keyed_changes(
            &mut changes,
            &sheet.id,
            collection::HYPERLINKS,
            &old.hyperlinks,
            &sheet.hyperlinks,
        );
        push_keyed_changes(
            &mut changes,
            &sheet.id,
            collection::LIVE_QUERIES,
            &serialize_map(&old.live_queries),
            &serialize_map(&sheet.live_queries),
        );
        push_keyed_changes(
            &mut changes,
            &sheet.id,
            collection::CONDITION_FORMATS,
            &condition_formats_as_map(old),
            &condition_formats_as_map(sheet),
        );
    }

    changes
}
