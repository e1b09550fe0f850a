//! Keyed-map migration of legacy sheet representations.
//!
//! Legacy documents stored each sheet as one plain structured value, with
//! cell data, calc chain and condition formats as arrays of structs. Small
//! edits to those arrays replace the whole collection and conflict on
//! position. Migration rewrites every such entry, in place and inside one
//! transaction, into the keyed-map form described in [`crate::doc::schema`],
//! without altering observable cell contents.
//!
//! Detection is by replicated type: a sheet entry needs migration when it is
//! not already a `Y.Map`, or when one of its sub-collections is still a plain
//! array/object. Running migration on an already-migrated document performs
//! zero writes.

use crate::convert::{any_to_json, json_to_any};
use crate::doc::schema::{self, collection};
use crate::error::SyncResult;
use crate::model::cell_key;
use serde_json::Value as Json;
use tracing::{debug, warn};
use yrs::{Any, Array, Doc, Map, MapRef, Transact, TransactionMut, WriteTxn};

/// Migrate every sheet entry that is not yet in keyed-map form.
///
/// Returns `true` if any entry was rewritten.
pub fn migrate_document(doc: &Doc) -> SyncResult<bool> {
    let mut txn = doc.transact_mut();
    let sheets = txn.get_or_insert_array(schema::SHEETS);

    let mut changed = false;
    let mut i = 0;
    while i < sheets.len(&txn) {
        match sheets.get(&txn, i) {
            Some(yrs::Value::YMap(map)) => {
                if finish_sheet_migration(&mut txn, &map) {
                    changed = true;
                }
            }
            Some(yrs::Value::Any(any)) => {
                let json = any_to_json(&any);
                match serde_json::from_value::<crate::model::Sheet>(json) {
                    Ok(sheet) => {
                        debug!(sheet = %sheet.id, index = i, "migrating legacy sheet entry");
                        sheets.remove(&mut txn, i);
                        schema::insert_sheet(&mut txn, &sheets, Some(i), &sheet);
                        changed = true;
                    }
                    Err(e) => {
                        warn!(index = i, "leaving unparseable legacy sheet in place: {}", e);
                    }
                }
            }
            Some(other) => {
                warn!(index = i, "unexpected sheet entry type: {:?}", other);
            }
            None => {}
        }
        i += 1;
    }

    Ok(changed)
}

/// Bring a sheet map that already is a `Y.Map` fully into keyed form:
/// flatten leftover array-of-structs collections, wrap plain sub-objects,
/// create missing keyed maps. Primitives are left untouched.
fn finish_sheet_migration(txn: &mut TransactionMut<'_>, sheet: &MapRef) -> bool {
    let mut changed = false;

    for name in schema::ARRAY_FLATTENED {
        if let Some(yrs::Value::Any(Any::Array(items))) = sheet.get(txn, name) {
            let entries: Vec<Json> = items.iter().map(any_to_json).collect();
            sheet.remove(txn, name);
            let map = schema::get_or_create_map(txn, sheet, name);
            fill_flattened(txn, &map, name, &entries);
            changed = true;
        }
    }

    for name in [
        collection::CONFIG,
        collection::VALIDATIONS,
        collection::HYPERLINKS,
        collection::BLOCK_FUNCS,
        collection::LIVE_QUERIES,
    ] {
        if let Some(yrs::Value::Any(Any::Map(obj))) = sheet.get(txn, name) {
            sheet.remove(txn, name);
            let map = schema::get_or_create_map(txn, sheet, name);
            for (k, v) in obj.iter() {
                map.insert(txn, k.as_str(), v.clone());
            }
            changed = true;
        }
    }

    // Missing keyed representations are created empty so every migrated
    // sheet exposes the same collection surface.
    for name in schema::KEYED_COLLECTIONS {
        if sheet.get(txn, name).is_none() {
            schema::get_or_create_map(txn, sheet, name);
            changed = true;
        }
    }
    if sheet.get(txn, collection::CONFIG).is_none() {
        schema::get_or_create_map(txn, sheet, collection::CONFIG);
        changed = true;
    }

    changed
}

/// Key a flattened legacy collection entry and insert it.
fn fill_flattened(txn: &mut TransactionMut<'_>, map: &MapRef, name: &str, entries: &[Json]) {
    for (index, entry) in entries.iter().enumerate() {
        match name {
            collection::CELLS => {
                let (Some(r), Some(c)) = (
                    entry.get("r").and_then(Json::as_i64),
                    entry.get("c").and_then(Json::as_i64),
                ) else {
                    warn!("cell entry without coordinates dropped during migration");
                    continue;
                };
                // Absent payload is an empty cell; keyed form stores present
                // cells only.
                match entry.get("v") {
                    Some(v) if !v.is_null() => {
                        map.insert(txn, cell_key(r, c), json_to_any(v));
                    }
                    _ => {}
                }
            }
            collection::CALC_CHAIN => {
                let (Some(r), Some(c)) = (
                    entry.get("r").and_then(Json::as_i64),
                    entry.get("c").and_then(Json::as_i64),
                ) else {
                    warn!("calc chain entry without coordinates dropped during migration");
                    continue;
                };
                map.insert(txn, cell_key(r, c), json_to_any(entry));
            }
            _ => {
                let key = schema::condition_format_key(entry, index);
                map.insert(txn, key, json_to_any(entry));
            }
        }
    }
}
