//! Replicated document layout.
//!
//! Document structure:
//! ```text
//! Y.Doc
//! ├── Y.Array "sheets"
//! │   └── Y.Map (one per sheet)
//! │       ├── "id" / "name" / "order" / "status" / "row" / "column"  (Any)
//! │       ├── "config"           Y.Map { subkey → Any }
//! │       ├── "celldata"         Y.Map { "r_c" → Any payload }
//! │       ├── "calcChain"        Y.Map { "r_c" → Any entry }
//! │       ├── "dataBlockFuncs"   Y.Map { "r_c" → Any registration }
//! │       ├── "dataVerification" Y.Map { "r_c" → Any rule }
//! │       ├── "hyperlink"        Y.Map { "r_c" → Any link }
//! │       ├── "liveQueries"      Y.Map { "r_c" → Any registration }
//! │       └── "conditionFormats" Y.Map { "r_c" → Any format }
//! └── Y.Map "meta"
//! ```
//!
//! High-churn collections are keyed maps rather than replicated arrays so a
//! one-cell edit produces a one-key update instead of a whole-array conflict
//! surface.

use crate::convert::{json_to_any, yrs_value_to_json};
use crate::model::{cell_key, Sheet};
use serde_json::Value as Json;
use tracing::warn;
use yrs::{Any, Array, ArrayRef, Map, MapPrelim, MapRef, ReadTxn, TransactionMut, WriteTxn};

/// Root array holding one map per sheet.
pub const SHEETS: &str = "sheets";
/// Root map for document-level metadata.
pub const META: &str = "meta";

/// Keyed-collection names on a sheet map.
pub mod collection {
    pub const CELLS: &str = "celldata";
    pub const CALC_CHAIN: &str = "calcChain";
    pub const BLOCK_FUNCS: &str = "dataBlockFuncs";
    pub const VALIDATIONS: &str = "dataVerification";
    pub const HYPERLINKS: &str = "hyperlink";
    pub const LIVE_QUERIES: &str = "liveQueries";
    pub const CONDITION_FORMATS: &str = "conditionFormats";
    pub const CONFIG: &str = "config";
}

/// Collections stored as keyed maps on every migrated sheet.
pub const KEYED_COLLECTIONS: [&str; 7] = [
    collection::CELLS,
    collection::CALC_CHAIN,
    collection::BLOCK_FUNCS,
    collection::VALIDATIONS,
    collection::HYPERLINKS,
    collection::LIVE_QUERIES,
    collection::CONDITION_FORMATS,
];

/// Legacy array-of-structs collections that migration flattens into keyed maps.
pub const ARRAY_FLATTENED: [&str; 3] = [
    collection::CELLS,
    collection::CALC_CHAIN,
    collection::CONDITION_FORMATS,
];

/// Scalar sheet fields mirrored verbatim between snapshot and document.
pub const SCALAR_FIELDS: [&str; 6] = ["id", "name", "order", "status", "row", "column"];

pub fn sheets_array<T: ReadTxn>(txn: &T) -> Option<ArrayRef> {
    txn.get_array(SHEETS)
}

/// Read the `id` field of a sheet map.
pub fn sheet_id<T: ReadTxn>(txn: &T, sheet: &MapRef) -> Option<String> {
    match sheet.get(txn, "id") {
        Some(yrs::Value::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

/// Read an integer field of a sheet map, tolerating both int and float forms.
pub fn sheet_i64<T: ReadTxn>(txn: &T, sheet: &MapRef, field: &str) -> Option<i64> {
    match sheet.get(txn, field) {
        Some(yrs::Value::Any(Any::BigInt(i))) => Some(i),
        Some(yrs::Value::Any(Any::Number(n))) => Some(n as i64),
        _ => None,
    }
}

/// Locate a sheet map by stable identifier. Returns its array index too, so
/// callers can replace in place.
pub fn find_sheet<T: ReadTxn>(txn: &T, sheets: &ArrayRef, id: &str) -> Option<(u32, MapRef)> {
    for i in 0..sheets.len(txn) {
        if let Some(yrs::Value::YMap(map)) = sheets.get(txn, i) {
            if sheet_id(txn, &map).as_deref() == Some(id) {
                return Some((i, map));
            }
        }
    }
    None
}

/// All sheet maps in array order, skipping malformed entries.
pub fn sheet_maps<T: ReadTxn>(txn: &T, sheets: &ArrayRef) -> Vec<MapRef> {
    (0..sheets.len(txn))
        .filter_map(|i| match sheets.get(txn, i) {
            Some(yrs::Value::YMap(map)) => Some(map),
            _ => None,
        })
        .collect()
}

/// Get a named sub-map of a sheet, creating it when absent or when the slot
/// holds a plain (non-replicated) value.
pub fn get_or_create_map(txn: &mut TransactionMut<'_>, parent: &MapRef, name: &str) -> MapRef {
    match parent.get(txn, name) {
        Some(yrs::Value::YMap(map)) => map,
        _ => parent.insert(txn, name, MapPrelim::<Any>::new()),
    }
}

/// Key for a legacy condition-format entry: the first cell of its target
/// range, falling back to the array index.
pub fn condition_format_key(entry: &Json, index: usize) -> String {
    let first = entry
        .get("cellrange")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first());
    if let Some(range) = first {
        let r = range
            .get("row")
            .and_then(|v| v.as_array())
            .and_then(|v| v.first())
            .and_then(|v| v.as_i64());
        let c = range
            .get("column")
            .and_then(|v| v.as_array())
            .and_then(|v| v.first())
            .and_then(|v| v.as_i64());
        if let (Some(r), Some(c)) = (r, c) {
            return cell_key(r, c);
        }
    }
    index.to_string()
}

fn fill_keyed<'a, I>(txn: &mut TransactionMut<'_>, map: &MapRef, entries: I)
where
    I: IntoIterator<Item = (String, &'a Json)>,
{
    for (key, value) in entries {
        map.insert(txn, key, json_to_any(value));
    }
}

/// Build a replicated sheet map from a plain [`Sheet`] and insert it into the
/// sheets array. This is the single Legacy→Migrated conversion boundary; the
/// inverse lives in [`crate::doc::project`].
pub fn insert_sheet(
    txn: &mut TransactionMut<'_>,
    sheets: &ArrayRef,
    index: Option<u32>,
    sheet: &Sheet,
) -> MapRef {
    let map = match index {
        Some(i) => sheets.insert(txn, i, MapPrelim::<Any>::new()),
        None => sheets.push_back(txn, MapPrelim::<Any>::new()),
    };

    map.insert(txn, "id", sheet.id.as_str());
    map.insert(txn, "name", sheet.name.as_str());
    map.insert(txn, "order", sheet.order);
    map.insert(txn, "status", sheet.status);
    map.insert(txn, "row", sheet.row);
    map.insert(txn, "column", sheet.column);

    let config = map.insert(txn, collection::CONFIG, MapPrelim::<Any>::new());
    for (k, v) in &sheet.config {
        config.insert(txn, k.as_str(), json_to_any(v));
    }

    let cells = map.insert(txn, collection::CELLS, MapPrelim::<Any>::new());
    let cell_entries: Vec<(String, Json)> = sheet
        .cells
        .iter()
        .filter(|cell| cell.v.is_some())
        .map(|cell| {
            (
                cell.key(),
                serde_json::to_value(cell.v.as_ref().unwrap()).unwrap_or(Json::Null),
            )
        })
        .collect();
    fill_keyed(txn, &cells, cell_entries.iter().map(|(k, v)| (k.clone(), v)));

    let calc = map.insert(txn, collection::CALC_CHAIN, MapPrelim::<Any>::new());
    let calc_entries: Vec<(String, Json)> = sheet
        .calc_chain
        .iter()
        .map(|e| (e.key(), serde_json::to_value(e).unwrap_or(Json::Null)))
        .collect();
    fill_keyed(txn, &calc, calc_entries.iter().map(|(k, v)| (k.clone(), v)));

    let funcs = map.insert(txn, collection::BLOCK_FUNCS, MapPrelim::<Any>::new());
    let func_entries: Vec<(String, Json)> = sheet
        .block_functions
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Json::Null)))
        .collect();
    fill_keyed(txn, &funcs, func_entries.iter().map(|(k, v)| (k.clone(), v)));

    let validations = map.insert(txn, collection::VALIDATIONS, MapPrelim::<Any>::new());
    fill_keyed(
        txn,
        &validations,
        sheet.validations.iter().map(|(k, v)| (k.clone(), v)),
    );

    let links = map.insert(txn, collection::HYPERLINKS, MapPrelim::<Any>::new());
    fill_keyed(
        txn,
        &links,
        sheet.hyperlinks.iter().map(|(k, v)| (k.clone(), v)),
    );

    let queries = map.insert(txn, collection::LIVE_QUERIES, MapPrelim::<Any>::new());
    let query_entries: Vec<(String, Json)> = sheet
        .live_queries
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Json::Null)))
        .collect();
    fill_keyed(txn, &queries, query_entries.iter().map(|(k, v)| (k.clone(), v)));

    let formats = map.insert(txn, collection::CONDITION_FORMATS, MapPrelim::<Any>::new());
    let format_entries: Vec<(String, &Json)> = sheet
        .condition_formats
        .iter()
        .enumerate()
        .map(|(i, v)| (condition_format_key(v, i), v))
        .collect();
    fill_keyed(txn, &formats, format_entries);

    map
}

/// Ensure the sheets root exists, creating it on first touch.
pub fn get_or_create_sheets(txn: &mut TransactionMut<'_>) -> ArrayRef {
    txn.get_or_insert_array(SHEETS)
}

/// Deserialize a legacy (plain-value) sheet entry into the snapshot model.
pub fn legacy_sheet_from_value<T: ReadTxn>(txn: &T, value: yrs::Value) -> Option<Sheet> {
    let json = yrs_value_to_json(txn, value);
    match serde_json::from_value::<Sheet>(json) {
        Ok(sheet) => Some(sheet),
        Err(e) => {
            warn!("Skipping malformed legacy sheet entry: {}", e);
            None
        }
    }
}
