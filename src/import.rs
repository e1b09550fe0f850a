//! Import/export glue around the sync core.
//!
//! File parsing itself (CSV, XLSX) is an external collaborator: importers
//! hand this module already-parsed row matrices, exporters take them back.
//! The portal path seeds a fresh document from a previously encoded update
//! string.

use crate::error::{SyncError, SyncResult};
use crate::model::{CellPayload, CellRecord, Sheet};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use tracing::{info, warn};
use yrs::updates::decoder::Decode;
use yrs::{Doc, Transact, Update};

/// Decode an encoded update string into a fresh document.
///
/// A malformed string is logged and returned as an error with nothing
/// applied; the caller falls back to an empty document.
pub fn document_from_portal(encoded: &str) -> SyncResult<Doc> {
    let bytes = STANDARD.decode(encoded).map_err(|e| {
        warn!("portal content is not valid base64: {}", e);
        SyncError::from(e)
    })?;
    let update = Update::decode_v1(&bytes).map_err(|e| {
        warn!("portal content is not a valid update: {}", e);
        SyncError::import(format!("malformed portal update: {}", e))
    })?;

    let doc = Doc::new();
    {
        let mut txn = doc.transact_mut();
        txn.apply_update(update);
    }
    info!(bytes = bytes.len(), "document seeded from portal content");
    Ok(doc)
}

/// Build a sheet snapshot from parsed tabular rows (header included).
///
/// Extents match the data: `row` is the row count, `column` the widest row.
/// Empty fields stay absent cells rather than placeholder records.
pub fn sheet_from_rows(name: &str, rows: &[Vec<String>]) -> Sheet {
    let mut sheet = Sheet::new(name, 0);
    sheet.row = rows.len() as i64;
    sheet.column = rows.iter().map(Vec::len).max().unwrap_or(0) as i64;

    for (r, row) in rows.iter().enumerate() {
        for (c, field) in row.iter().enumerate() {
            if field.is_empty() {
                continue;
            }
            let mut payload = CellPayload::text(field.clone());
            payload.ct = Some(json!({"fa": "General", "t": "g"}));
            sheet
                .cells
                .push(CellRecord::new(r as i64, c as i64, payload));
        }
    }
    sheet
}

/// Flatten a sheet's present cells back into a dense row matrix, using the
/// display text. The inverse glue for exporters.
pub fn rows_from_sheet(sheet: &Sheet) -> Vec<Vec<String>> {
    let rows = sheet
        .cells
        .iter()
        .map(|cell| cell.r + 1)
        .max()
        .unwrap_or(0)
        .max(0) as usize;
    let cols = sheet
        .cells
        .iter()
        .map(|cell| cell.c + 1)
        .max()
        .unwrap_or(0)
        .max(0) as usize;

    let mut matrix = vec![vec![String::new(); cols]; rows];
    for cell in &sheet.cells {
        let Some(payload) = &cell.v else { continue };
        if cell.r < 0 || cell.c < 0 {
            continue;
        }
        let text = payload
            .m
            .clone()
            .or_else(|| payload.v.as_ref().map(display_of))
            .unwrap_or_default();
        matrix[cell.r as usize][cell.c as usize] = text;
    }
    matrix
}

fn display_of(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Serialize a snapshot for JSON export.
pub fn sheets_to_json(sheets: &[Sheet]) -> SyncResult<String> {
    Ok(serde_json::to_string(sheets)?)
}

/// Parse a JSON export back into a snapshot.
pub fn sheets_from_json(json: &str) -> SyncResult<Vec<Sheet>> {
    Ok(serde_json::from_str(json)?)
}
