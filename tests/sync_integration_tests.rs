//! End-to-end sync tests: echo suppression, convergence, lifecycle, import.
//!
//! These drive the session the way a host application would — grid snapshots
//! in, listener callbacks out — with no grid and no network.

use sheetsync::doc::schema;
use sheetsync::sync::lifecycle;
use sheetsync::{
    cell_key, CellPayload, CellRecord, ChangeListener, Sheet, SheetChange, SyncSession,
    SyncSessionConfig,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use yrs::{Transact, WriteTxn};

/// Listener that counts callbacks and optionally loops encoded updates into a
/// peer session (or back into the originating one, portal-echo style).
#[derive(Default)]
struct PortalListener {
    peer: Mutex<Option<Arc<SyncSession>>>,
    changes: AtomicU64,
    renders: AtomicU64,
    activated: Mutex<Vec<String>>,
}

impl PortalListener {
    fn connect(&self, peer: Arc<SyncSession>) {
        *self.peer.lock().unwrap() = Some(peer);
    }

    fn changes(&self) -> u64 {
        self.changes.load(Ordering::SeqCst)
    }

    fn renders(&self) -> u64 {
        self.renders.load(Ordering::SeqCst)
    }
}

impl ChangeListener for PortalListener {
    fn on_change(&self, _sheets: &[Sheet], update_b64: &str) {
        self.changes.fetch_add(1, Ordering::SeqCst);
        let peer = self.peer.lock().unwrap().clone();
        if let Some(peer) = peer {
            peer.apply_remote(update_b64).expect("peer merge failed");
        }
    }

    fn on_render(&self, _sheets: &[Sheet]) {
        self.renders.fetch_add(1, Ordering::SeqCst);
    }

    fn on_activate_sheet(&self, sheet_id: &str) {
        self.activated.lock().unwrap().push(sheet_id.to_string());
    }
}

fn session_with_sheet(listener: Arc<PortalListener>) -> (Arc<SyncSession>, Sheet) {
    let session = SyncSession::new(listener);
    let sheet = Sheet::new("Main", 0);
    {
        let mut txn = session.doc().transact_mut();
        let sheets = txn.get_or_insert_array(schema::SHEETS);
        schema::insert_sheet(&mut txn, &sheets, None, &sheet);
    }
    // Consume the data-loaded signal so later grid changes propagate.
    session.grid_changed(&session.snapshot()).unwrap();
    (session, sheet)
}

fn edit_cell(sheets: &mut [Sheet], r: i64, c: i64, text: &str) {
    sheets[0]
        .cells
        .push(CellRecord::new(r, c, CellPayload::text(text)));
}

#[test]
fn one_edit_commits_exactly_once_despite_portal_echo() {
    let listener = Arc::new(PortalListener::default());
    let (session, _) = session_with_sheet(Arc::clone(&listener));
    // The portal echoes every update straight back at the same session.
    listener.connect(Arc::clone(&session));

    let mut edited = session.snapshot();
    edit_cell(&mut edited, 0, 0, "hello");
    session.grid_changed(&edited).unwrap();

    assert_eq!(listener.changes(), 1, "orchestrator must run exactly once");
    assert_eq!(listener.renders(), 0, "own echo must not re-render");
    assert!(session.snapshot()[0].cell(0, 0).is_some());
}

#[test]
fn two_sessions_converge_through_portal() {
    let listener_a = Arc::new(PortalListener::default());
    let (a, _sheet) = session_with_sheet(Arc::clone(&listener_a));

    let listener_b = Arc::new(PortalListener::default());
    let b = SyncSession::from_portal_content(
        &a.encode_state(),
        Arc::clone(&listener_b) as Arc<dyn ChangeListener>,
        SyncSessionConfig::default(),
    )
    .unwrap();
    b.grid_changed(&b.snapshot()).unwrap();

    listener_a.connect(Arc::clone(&b));
    listener_b.connect(Arc::clone(&a));

    // Edits to different cells on both sides, relayed by the portal. After
    // each merge the receiving grid re-reports the rendered state once; that
    // report clears the remote-pending flag and must not propagate.
    let mut edited_a = a.snapshot();
    edit_cell(&mut edited_a, 0, 0, "from-a");
    a.grid_changed(&edited_a).unwrap();
    b.grid_changed(&b.snapshot()).unwrap();

    let mut edited_b = b.snapshot();
    edit_cell(&mut edited_b, 1, 0, "from-b");
    b.grid_changed(&edited_b).unwrap();
    a.grid_changed(&a.snapshot()).unwrap();

    assert_eq!(listener_a.changes(), 1);
    assert_eq!(listener_b.changes(), 1);

    let from_a = a.snapshot();
    let from_b = b.snapshot();
    assert_eq!(from_a, from_b, "both replicas must converge");
    assert!(from_a[0].cell(0, 0).is_some());
    assert!(from_a[0].cell(1, 0).is_some());
}

#[tokio::test]
async fn remote_bursts_coalesce_into_one_render() {
    let listener = Arc::new(PortalListener::default());
    let (session, sheet) = session_with_sheet(Arc::clone(&listener));

    let peer = SyncSession::from_portal_content(
        &session.encode_state(),
        Arc::new(PortalListener::default()) as Arc<dyn ChangeListener>,
        SyncSessionConfig::default(),
    )
    .unwrap();

    // Two quick remote updates inside one debounce window.
    peer.apply_changes(&[SheetChange::set(
        &sheet.id,
        schema::collection::CELLS,
        cell_key(0, 0),
        serde_json::to_value(CellPayload::text("one")).unwrap(),
    )])
    .unwrap();
    session.apply_remote(&peer.encode_state()).unwrap();

    peer.apply_changes(&[SheetChange::set(
        &sheet.id,
        schema::collection::CELLS,
        cell_key(0, 1),
        serde_json::to_value(CellPayload::text("two")).unwrap(),
    )])
    .unwrap();
    session.apply_remote(&peer.encode_state()).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(listener.renders(), 1, "burst must coalesce to one render");
    assert!(session.snapshot()[0].cell(0, 1).is_some());
}

#[test]
fn lifecycle_add_activates_new_sheet() {
    let listener = Arc::new(PortalListener::default());
    let (session, first) = session_with_sheet(Arc::clone(&listener));

    let mut grid = session.snapshot();
    let second = Sheet::new("Second", 1);
    grid.push(second.clone());

    session.sheet_added(&grid).unwrap();

    assert_eq!(listener.changes(), 1);
    assert_eq!(*listener.activated.lock().unwrap(), vec![second.id.clone()]);

    let mut snapshot = session.snapshot();
    snapshot.sort_by_key(|s| s.order);
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, first.id);
    assert!(snapshot[0].is_active());
    assert!(!snapshot[1].is_active());
}

#[test]
fn lifecycle_remove_middle_sheet_renumbers() {
    let listener = Arc::new(PortalListener::default());
    let (session, first) = session_with_sheet(Arc::clone(&listener));

    let b = Sheet::new("B", 1);
    let c = Sheet::new("C", 2);
    {
        let mut txn = session.doc().transact_mut();
        let sheets = txn.get_or_insert_array(schema::SHEETS);
        schema::insert_sheet(&mut txn, &sheets, None, &b);
        schema::insert_sheet(&mut txn, &sheets, None, &c);
    }

    // Grid deleted B and renumbered C down.
    let mut remaining: Vec<Sheet> = session
        .snapshot()
        .into_iter()
        .filter(|s| s.id != b.id)
        .collect();
    remaining.sort_by_key(|s| s.order);
    remaining[1].order = 1;

    session.sheet_removed(&remaining).unwrap();

    let mut snapshot = session.snapshot();
    snapshot.sort_by_key(|s| s.order);
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, first.id);
    assert_eq!(snapshot[0].order, 0);
    assert!(snapshot[0].is_active(), "active sheet unchanged");
    assert_eq!(snapshot[1].id, c.id);
    assert_eq!(snapshot[1].order, 1);
}

#[test]
fn lifecycle_reorder_moves_active_status() {
    let listener = Arc::new(PortalListener::default());
    let (session, first) = session_with_sheet(Arc::clone(&listener));

    let second = Sheet::new("Second", 1);
    {
        let mut txn = session.doc().transact_mut();
        let sheets = txn.get_or_insert_array(schema::SHEETS);
        schema::insert_sheet(&mut txn, &sheets, None, &second);
    }

    let mut grid = session.snapshot();
    for sheet in grid.iter_mut() {
        sheet.order = if sheet.id == first.id { 1 } else { 0 };
    }
    session.sheet_order_changed(&grid).unwrap();

    let active = session.active_sheet().expect("one active sheet");
    assert_eq!(active.id, second.id);
    assert_eq!(active.order, 0);

    // Mirroring the same orders again is a no-op.
    assert!(!lifecycle::handle_sheet_reordered(session.doc(), &grid));
}

#[test]
fn csv_import_flows_through_session() {
    let rows: Vec<Vec<String>> = vec![
        vec!["Name".into(), "Age".into()],
        vec!["Ann".into(), "30".into()],
    ];
    let imported = sheetsync::import::sheet_from_rows("import", &rows);

    let listener = Arc::new(PortalListener::default());
    let session = SyncSession::new(listener);
    {
        let mut txn = session.doc().transact_mut();
        let sheets = txn.get_or_insert_array(schema::SHEETS);
        schema::insert_sheet(&mut txn, &sheets, None, &imported);
    }

    let projected = session.snapshot();
    assert_eq!(projected.len(), 1);
    let sheet = &projected[0];
    assert_eq!(sheet.row, 2);
    assert_eq!(sheet.column, 2);
    assert_eq!(
        sheet.cell(0, 0).unwrap().v.as_ref().unwrap().m.as_deref(),
        Some("Name")
    );
    assert_eq!(
        sheet.cell(1, 1).unwrap().v.as_ref().unwrap().m.as_deref(),
        Some("30")
    );
}

#[test]
fn status_invariant_holds_after_every_commit() {
    let listener = Arc::new(PortalListener::default());
    let (session, first) = session_with_sheet(Arc::clone(&listener));

    let second = Sheet::new("Second", 1);
    {
        let mut txn = session.doc().transact_mut();
        let sheets = txn.get_or_insert_array(schema::SHEETS);
        schema::insert_sheet(&mut txn, &sheets, None, &second);
    }

    // A change list that flips orders but says nothing about status.
    session
        .apply_changes(&[
            SheetChange::set_field(&first.id, &["order"], serde_json::json!(1)),
            SheetChange::set_field(&second.id, &["order"], serde_json::json!(0)),
        ])
        .unwrap();

    let snapshot = session.snapshot();
    let active: Vec<&Sheet> = snapshot.iter().filter(|s| s.is_active()).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);
    assert_eq!(active[0].order, 0);
}
