//! Transactional application of change lists to the replicated document.
//!
//! This is the write path: every descriptor list is applied inside one
//! transaction, the denormalized active-sheet invariant is re-derived from
//! `order`, and the full document state is encoded for the host callback.
//! Outside of migration and the sheet lifecycle handlers, no other code
//! mutates the document.

use crate::convert::json_to_any;
use crate::doc::schema;
use crate::error::SyncResult;
use crate::sync::changes::{ChangeOp, SheetChange};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, warn};
use yrs::{ArrayRef, Doc, Map, ReadTxn, StateVector, Transact, TransactionMut, WriteTxn};

/// Apply a change list in one transaction and return the base64-encoded full
/// document update.
///
/// Changes naming a sheet the document no longer holds are logged and
/// skipped: the sheet may have been concurrently deleted, and the condition
/// resolves itself once the racing operations settle.
pub fn apply_changes(doc: &Doc, changes: &[SheetChange]) -> SyncResult<String> {
    {
        let mut txn = doc.transact_mut();
        let sheets = txn.get_or_insert_array(schema::SHEETS);

        for change in changes {
            let Some((_, sheet)) = schema::find_sheet(&txn, &sheets, &change.sheet_id) else {
                debug!(sheet = %change.sheet_id, "sheet not found, change skipped");
                continue;
            };
            apply_one(&mut txn, &sheet, change);
        }

        normalize_status(&mut txn, &sheets);
    }

    Ok(encode_document(doc))
}

fn apply_one(txn: &mut TransactionMut<'_>, sheet: &yrs::MapRef, change: &SheetChange) {
    // Keyed-collection fast path: one key set/delete on a get-or-created map.
    if let (1, Some(key)) = (change.path.len(), change.key.as_deref()) {
        let name = change.path[0].as_str();
        if schema::KEYED_COLLECTIONS.contains(&name) {
            let map = schema::get_or_create_map(txn, sheet, name);
            match change.op {
                ChangeOp::Update => match &change.value {
                    Some(value) => {
                        map.insert(txn, key, json_to_any(value));
                    }
                    None => warn!(%key, collection = name, "update without value skipped"),
                },
                ChangeOp::Delete => {
                    map.remove(txn, key);
                }
            }
            return;
        }
    }

    if change.path.is_empty() {
        warn!(sheet = %change.sheet_id, "change without path skipped");
        return;
    }

    // General path walk, creating intermediate replicated maps as needed.
    let mut cursor = sheet.clone();
    for segment in &change.path[..change.path.len() - 1] {
        cursor = schema::get_or_create_map(txn, &cursor, segment);
    }
    let leaf = change.path.last().map(String::as_str).unwrap_or_default();
    match change.op {
        ChangeOp::Update => match &change.value {
            Some(value) => {
                cursor.insert(txn, leaf, json_to_any(value));
            }
            None => warn!(path = ?change.path, "update without value skipped"),
        },
        ChangeOp::Delete => {
            cursor.remove(txn, leaf);
        }
    }
}

/// Re-derive `status` from `order` on every sheet: exactly the sheet at
/// `order == 0` is active. Writes only where the stored value differs.
pub fn normalize_status(txn: &mut TransactionMut<'_>, sheets: &ArrayRef) {
    for sheet in schema::sheet_maps(txn, sheets) {
        let order = schema::sheet_i64(txn, &sheet, "order").unwrap_or(0);
        let want: i64 = if order == 0 { 1 } else { 0 };
        if schema::sheet_i64(txn, &sheet, "status") != Some(want) {
            sheet.insert(txn, "status", want);
        }
    }
}

/// Encode the full document state from the empty state vector, wrapped for
/// string transport.
pub fn encode_document(doc: &Doc) -> String {
    let txn = doc.transact();
    STANDARD.encode(txn.encode_state_as_update_v1(&StateVector::default()))
}
