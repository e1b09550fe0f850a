//! Structural sheet operations mirrored from the grid into the document.
//!
//! The grid owns the user gesture (add tab, delete tab, drag to reorder);
//! these handlers bring the replicated sheet collection in line with what the
//! grid reports afterwards. Additions are detected as grid ids absent from
//! the document, removals by elimination in the other direction, reorders by
//! comparing `order` per sheet. Every path re-derives the active-sheet
//! invariant and returns early on uninitialized inputs.

use crate::doc::schema;
use crate::error::SyncResult;
use crate::model::Sheet;
use crate::sync::orchestrator;
use crate::sync::session::SyncSession;
use std::collections::HashSet;
use tracing::{debug, info};
use yrs::{Array, Doc, Map, Transact, WriteTxn};

/// Append document entries for grid sheets the document does not hold yet.
/// New entries carry the grid's id/name/order/dimensions and default
/// `status = 0`; activation is the grid's move, signalled by the caller.
///
/// Returns the ids added, in grid order.
pub fn handle_sheet_added(doc: &Doc, grid_sheets: &[Sheet]) -> Vec<String> {
    // A single-sheet grid is initial load, not an added tab.
    if grid_sheets.len() <= 1 {
        return Vec::new();
    }

    let mut txn = doc.transact_mut();
    let sheets = txn.get_or_insert_array(schema::SHEETS);
    let existing: HashSet<String> = schema::sheet_maps(&txn, &sheets)
        .iter()
        .filter_map(|map| schema::sheet_id(&txn, map))
        .collect();

    let mut added = Vec::new();
    for sheet in grid_sheets {
        if existing.contains(&sheet.id) {
            continue;
        }
        let mut entry = sheet.clone();
        entry.status = 0;
        schema::insert_sheet(&mut txn, &sheets, None, &entry);
        info!(sheet = %sheet.id, name = %sheet.name, "sheet added to document");
        added.push(sheet.id.clone());
    }

    if !added.is_empty() {
        orchestrator::normalize_status(&mut txn, &sheets);
    }
    added
}

/// Delete the document entries whose ids the grid no longer reports, then
/// mirror the grid's renumbered orders onto the survivors.
///
/// Returns the ids removed.
pub fn handle_sheet_removed(doc: &Doc, grid_sheets: &[Sheet]) -> Vec<String> {
    let mut txn = doc.transact_mut();
    let Some(sheets) = schema::sheets_array(&txn) else {
        debug!("document has no sheet collection yet, removal skipped");
        return Vec::new();
    };

    let grid_ids: HashSet<&str> = grid_sheets.iter().map(|s| s.id.as_str()).collect();

    let mut doomed: Vec<(u32, String)> = Vec::new();
    for i in 0..sheets.len(&txn) {
        if let Some(yrs::Value::YMap(map)) = sheets.get(&txn, i) {
            if let Some(id) = schema::sheet_id(&txn, &map) {
                if !grid_ids.contains(id.as_str()) {
                    doomed.push((i, id));
                }
            }
        }
    }

    // Back to front so indices stay valid.
    for (index, id) in doomed.iter().rev() {
        sheets.remove(&mut txn, *index);
        info!(sheet = %id, "sheet removed from document");
    }

    if !doomed.is_empty() {
        mirror_orders(&mut txn, &sheets, grid_sheets);
        orchestrator::normalize_status(&mut txn, &sheets);
    }
    doomed.into_iter().map(|(_, id)| id).collect()
}

/// Write the grid's `order` value wherever it differs from the document's.
///
/// Returns `true` if anything changed.
pub fn handle_sheet_reordered(doc: &Doc, grid_sheets: &[Sheet]) -> bool {
    let mut txn = doc.transact_mut();
    let Some(sheets) = schema::sheets_array(&txn) else {
        debug!("document has no sheet collection yet, reorder skipped");
        return false;
    };

    let changed = mirror_orders(&mut txn, &sheets, grid_sheets);
    if changed {
        orchestrator::normalize_status(&mut txn, &sheets);
    }
    changed
}

fn mirror_orders(
    txn: &mut yrs::TransactionMut<'_>,
    sheets: &yrs::ArrayRef,
    grid_sheets: &[Sheet],
) -> bool {
    let mut changed = false;
    for sheet in grid_sheets {
        let Some((_, map)) = schema::find_sheet(txn, sheets, &sheet.id) else {
            continue;
        };
        if schema::sheet_i64(txn, &map, "order") != Some(sheet.order) {
            map.insert(txn, "order", sheet.order);
            changed = true;
        }
    }
    changed
}

impl SyncSession {
    /// Grid reported a sheet-count increase.
    pub fn sheet_added(&self, grid_sheets: &[Sheet]) -> SyncResult<()> {
        if grid_sheets.is_empty() {
            debug!("grid not initialized, sheet add skipped");
            return Ok(());
        }
        let added = handle_sheet_added(self.doc(), grid_sheets);
        if added.is_empty() {
            return Ok(());
        }
        self.notify_local_commit();
        if let Some(id) = added.last() {
            self.listener().on_activate_sheet(id);
        }
        Ok(())
    }

    /// Grid reported a sheet-count decrease.
    pub fn sheet_removed(&self, grid_sheets: &[Sheet]) -> SyncResult<()> {
        if grid_sheets.is_empty() {
            debug!("grid not initialized, sheet removal skipped");
            return Ok(());
        }
        let removed = handle_sheet_removed(self.doc(), grid_sheets);
        if !removed.is_empty() {
            self.notify_local_commit();
        }
        Ok(())
    }

    /// Grid reported a sheet reorder.
    pub fn sheet_order_changed(&self, grid_sheets: &[Sheet]) -> SyncResult<()> {
        if grid_sheets.is_empty() {
            debug!("grid not initialized, reorder skipped");
            return Ok(());
        }
        if handle_sheet_reordered(self.doc(), grid_sheets) {
            self.notify_local_commit();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::project_document;

    fn doc_with(sheets: &[Sheet]) -> Doc {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let array = txn.get_or_insert_array(schema::SHEETS);
            for sheet in sheets {
                schema::insert_sheet(&mut txn, &array, None, sheet);
            }
        }
        doc
    }

    fn ordered(mut sheets: Vec<Sheet>) -> Vec<Sheet> {
        sheets.sort_by_key(|s| s.order);
        sheets
    }

    #[test]
    fn test_added_sheet_appended_with_status_zero() {
        let first = Sheet::new("One", 0);
        let doc = doc_with(&[first.clone()]);

        let mut second = Sheet::new("Two", 1);
        second.status = 1; // grid may report it active; document default is 0
        let added = handle_sheet_added(&doc, &[first.clone(), second.clone()]);
        assert_eq!(added, vec![second.id.clone()]);

        let projected = ordered(project_document(&doc));
        assert_eq!(projected.len(), 2);
        assert_eq!(projected[1].id, second.id);
        assert_eq!(projected[1].status, 0);
        assert_eq!(projected[0].status, 1);
    }

    #[test]
    fn test_single_sheet_grid_is_not_an_add() {
        let doc = doc_with(&[]);
        let added = handle_sheet_added(&doc, &[Sheet::new("Only", 0)]);
        assert!(added.is_empty());
    }

    #[test]
    fn test_removal_by_elimination_renumbers_and_keeps_active() {
        let a = Sheet::new("A", 0);
        let b = Sheet::new("B", 1);
        let c = Sheet::new("C", 2);
        let doc = doc_with(&[a.clone(), b.clone(), c.clone()]);

        // Grid deleted the middle sheet and renumbered.
        let mut a_after = a.clone();
        a_after.order = 0;
        let mut c_after = c.clone();
        c_after.order = 1;

        let removed = handle_sheet_removed(&doc, &[a_after, c_after]);
        assert_eq!(removed, vec![b.id.clone()]);

        let projected = ordered(project_document(&doc));
        assert_eq!(projected.len(), 2);
        assert_eq!(projected[0].id, a.id);
        assert_eq!(projected[0].order, 0);
        assert_eq!(projected[1].id, c.id);
        assert_eq!(projected[1].order, 1);
        // Active sheet unchanged: still the first.
        assert!(projected[0].is_active());
        assert!(!projected[1].is_active());
    }

    #[test]
    fn test_reorder_mirrors_grid_orders() {
        let a = Sheet::new("A", 0);
        let b = Sheet::new("B", 1);
        let doc = doc_with(&[a.clone(), b.clone()]);

        let mut a_after = a.clone();
        a_after.order = 1;
        let mut b_after = b.clone();
        b_after.order = 0;

        assert!(handle_sheet_reordered(&doc, &[a_after, b_after]));

        let projected = ordered(project_document(&doc));
        assert_eq!(projected[0].id, b.id);
        assert!(projected[0].is_active());
        assert_eq!(projected[1].id, a.id);
        assert!(!projected[1].is_active());
    }

    #[test]
    fn test_reorder_noop_reports_no_change() {
        let a = Sheet::new("A", 0);
        let doc = doc_with(&[a.clone()]);
        assert!(!handle_sheet_reordered(&doc, &[a]));
    }
}
