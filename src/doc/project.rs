//! Projection of the replicated document into plain sheet snapshots.
//!
//! The inverse of [`crate::doc::schema::insert_sheet`]: keyed maps come back
//! out as the flat shapes the grid consumes. Pure reads, no side effects;
//! empty maps project to empty collections, never absent fields. Cells and
//! calc-chain entries are sorted by (row, column) so repeated projections are
//! deterministic; callers must not rely on any stronger ordering.

use crate::convert::yrs_value_to_json;
use crate::doc::schema::{self, collection};
use crate::model::{parse_cell_key, CalcChainEntry, CellPayload, CellRecord, Sheet};
use serde_json::Value as Json;
use std::collections::HashMap;
use tracing::warn;
use yrs::{Any, Array, Doc, Map, MapRef, ReadTxn, Transact};

/// Project the whole document into the grid's sheet array.
pub fn project_document(doc: &Doc) -> Vec<Sheet> {
    let txn = doc.transact();
    let Some(sheets) = schema::sheets_array(&txn) else {
        return Vec::new();
    };

    (0..sheets.len(&txn))
        .filter_map(|i| match sheets.get(&txn, i) {
            Some(yrs::Value::YMap(map)) => project_sheet(&txn, &map),
            Some(other) => schema::legacy_sheet_from_value(&txn, other),
            None => None,
        })
        .collect()
}

/// Project a single migrated sheet map.
pub fn project_sheet<T: ReadTxn>(txn: &T, map: &MapRef) -> Option<Sheet> {
    let Some(id) = schema::sheet_id(txn, map) else {
        warn!("sheet entry without id skipped during projection");
        return None;
    };

    let mut sheet = Sheet {
        id,
        name: string_field(txn, map, "name").unwrap_or_default(),
        order: schema::sheet_i64(txn, map, "order").unwrap_or(0),
        status: schema::sheet_i64(txn, map, "status").unwrap_or(0),
        ..Default::default()
    };
    if let Some(row) = schema::sheet_i64(txn, map, "row") {
        sheet.row = row;
    }
    if let Some(column) = schema::sheet_i64(txn, map, "column") {
        sheet.column = column;
    }

    for (key, value) in keyed_entries(txn, map, collection::CONFIG) {
        sheet.config.insert(key, value);
    }

    let mut cells: Vec<CellRecord> = keyed_entries(txn, map, collection::CELLS)
        .into_iter()
        .filter_map(|(key, value)| {
            let (r, c) = parse_cell_key(&key)?;
            let payload: CellPayload = match serde_json::from_value(value) {
                Ok(p) => p,
                Err(e) => {
                    warn!(%key, "malformed cell payload skipped: {}", e);
                    return None;
                }
            };
            Some(CellRecord::new(r, c, payload))
        })
        .collect();
    cells.sort_by_key(|cell| (cell.r, cell.c));
    sheet.cells = cells;

    let mut calc_chain: Vec<CalcChainEntry> = keyed_entries(txn, map, collection::CALC_CHAIN)
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(%key, "malformed calc chain entry skipped: {}", e);
                None
            }
        })
        .collect();
    calc_chain.sort_by_key(|entry| (entry.r, entry.c));
    sheet.calc_chain = calc_chain;

    sheet.block_functions = typed_map(txn, map, collection::BLOCK_FUNCS);
    sheet.live_queries = typed_map(txn, map, collection::LIVE_QUERIES);

    sheet.validations = keyed_entries(txn, map, collection::VALIDATIONS)
        .into_iter()
        .collect();
    sheet.hyperlinks = keyed_entries(txn, map, collection::HYPERLINKS)
        .into_iter()
        .collect();

    let mut formats = keyed_entries(txn, map, collection::CONDITION_FORMATS);
    formats.sort_by(|(a, _), (b, _)| a.cmp(b));
    sheet.condition_formats = formats.into_iter().map(|(_, value)| value).collect();

    Some(sheet)
}

fn string_field<T: ReadTxn>(txn: &T, map: &MapRef, field: &str) -> Option<String> {
    match map.get(txn, field) {
        Some(yrs::Value::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

/// Entries of a keyed sub-collection as JSON, tolerating a still-plain map in
/// the slot and projecting an absent collection to nothing.
fn keyed_entries<T: ReadTxn>(txn: &T, parent: &MapRef, name: &str) -> Vec<(String, Json)> {
    match parent.get(txn, name) {
        Some(yrs::Value::YMap(map)) => map
            .iter(txn)
            .map(|(key, value)| (key.to_string(), yrs_value_to_json(txn, value)))
            .collect(),
        Some(yrs::Value::Any(Any::Map(obj))) => obj
            .iter()
            .map(|(key, value)| (key.clone(), crate::convert::any_to_json(value)))
            .collect(),
        _ => Vec::new(),
    }
}

fn typed_map<T, V>(txn: &T, parent: &MapRef, name: &str) -> HashMap<String, V>
where
    T: ReadTxn,
    V: serde::de::DeserializeOwned,
{
    keyed_entries(txn, parent, name)
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(v) => Some((key, v)),
            Err(e) => {
                warn!(%key, collection = name, "malformed entry skipped: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{cell_key, BlockFunction};
    use yrs::WriteTxn;

    fn sample_sheet() -> Sheet {
        let mut sheet = Sheet::new("Main", 0);
        sheet.cells = vec![
            CellRecord::new(1, 1, CellPayload::text("b")),
            CellRecord::new(0, 0, CellPayload::text("a")),
        ];
        sheet.calc_chain = vec![CalcChainEntry {
            r: 1,
            c: 1,
            rest: serde_json::Map::new(),
        }];
        sheet.block_functions.insert(
            cell_key(1, 1),
            BlockFunction {
                func: "SUMBLOCK".into(),
                rows: vec![0, 1],
                cols: vec![1],
            },
        );
        sheet
            .validations
            .insert(cell_key(0, 0), serde_json::json!({"type": "text"}));
        sheet
    }

    #[test]
    fn test_projection_roundtrip_set_equality() {
        let original = sample_sheet();
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let sheets = txn.get_or_insert_array(schema::SHEETS);
            schema::insert_sheet(&mut txn, &sheets, None, &original);
        }

        let projected = project_document(&doc);
        assert_eq!(projected.len(), 1);
        let sheet = &projected[0];

        assert_eq!(sheet.id, original.id);
        assert_eq!(sheet.name, original.name);
        // Cells come back keyed, so compare as sets.
        let mut expected = original.cells.clone();
        expected.sort_by_key(|c| (c.r, c.c));
        assert_eq!(sheet.cells, expected);
        assert_eq!(sheet.calc_chain, original.calc_chain);
        assert_eq!(sheet.block_functions, original.block_functions);
        assert_eq!(sheet.validations, original.validations);
    }

    #[test]
    fn test_projection_of_empty_collections() {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let sheets = txn.get_or_insert_array(schema::SHEETS);
            schema::insert_sheet(&mut txn, &sheets, None, &Sheet::new("Empty", 0));
        }

        let projected = project_document(&doc);
        let sheet = &projected[0];
        assert!(sheet.cells.is_empty());
        assert!(sheet.calc_chain.is_empty());
        assert!(sheet.validations.is_empty());
        assert!(sheet.config.is_empty());
    }

    #[test]
    fn test_projection_is_pure() {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let sheets = txn.get_or_insert_array(schema::SHEETS);
            schema::insert_sheet(&mut txn, &sheets, None, &sample_sheet());
        }

        let once = project_document(&doc);
        let twice = project_document(&doc);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_projection_skips_idless_entry() {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let sheets = txn.get_or_insert_array(schema::SHEETS);
            schema::insert_sheet(&mut txn, &sheets, None, &Sheet::new("Ok", 0));
            let broken = sheets.push_back(&mut txn, yrs::MapPrelim::<Any>::new());
            broken.insert(&mut txn, "name", "no id here");
        }

        let projected = project_document(&doc);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].name, "Ok");
    }
}
