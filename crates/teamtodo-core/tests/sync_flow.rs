use std::sync::Arc;

use teamtodo_core::error::TaskError;
use teamtodo_core::namespace::Layout;
use teamtodo_core::notify::TracingNotifier;
use teamtodo_core::storage::{FileStorage, MemoryStorage, Storage};
use teamtodo_core::store::TaskStore;
use teamtodo_core::task::Role;
use tempfile::tempdir;

fn tab<S: Storage>(storage: S, layout: Layout) -> TaskStore<S> {
    TaskStore::new(storage, layout, Arc::new(TracingNotifier))
}

#[test]
fn creator_and_viewer_share_one_list() {
    let browser = MemoryStorage::new();
    let mut alice = tab(browser.context(), Layout::Shared);
    alice.open_session("alice", Role::Creator);

    let tasks = alice.add("Buy milk", "2%").expect("add").to_vec();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].author, "alice");
    assert!(!tasks[0].completed);
    let id = tasks[0].id;

    let mut bob = tab(browser.context(), Layout::Shared);
    bob.open_session("bob", Role::Viewer);
    assert_eq!(bob.tasks(), tasks.as_slice());

    assert!(matches!(bob.toggle(id), Err(TaskError::Permission { .. })));
    assert!(!bob.tasks()[0].completed);

    alice.toggle(id).expect("toggle");
    for key in ["tasks_alice", "tasks_global"] {
        let raw = browser.get(key).expect("get").expect("record present");
        let stored: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(stored[0]["completed"], serde_json::Value::Bool(true));
    }

    assert_eq!(bob.pump(), 1);
    assert!(bob.tasks()[0].completed);
}

#[test]
fn open_tabs_converge_on_last_write() {
    let browser = MemoryStorage::new();
    let mut first = tab(browser.context(), Layout::Shared);
    let mut second = tab(browser.context(), Layout::Shared);
    first.open_session("alice", Role::Creator);
    second.open_session("alice", Role::Creator);

    first.add("from first tab", "").expect("add");
    second.pump();
    assert_eq!(second.tasks().len(), 1);

    second.add("from second tab", "").expect("add");
    first.pump();
    assert_eq!(first.tasks(), second.tasks());
    assert_eq!(first.tasks().len(), 2);

    browser.remove("tasks_alice").expect("clear");
    first.pump();
    assert!(first.tasks().is_empty());
}

#[test]
fn relogin_reloads_before_writing() {
    let browser = MemoryStorage::new();
    let mut session = tab(browser.context(), Layout::Shared);
    session.open_session("alice", Role::Creator);
    session.add("alice's task", "").expect("add");

    let writes = browser.write_count();
    session.begin_session("carol", Role::Creator);
    assert_eq!(session.save(), Ok(false));
    assert_eq!(browser.write_count(), writes);

    session.finish_initial_load();
    assert_eq!(session.tasks().len(), 1, "carol falls back to the global list");
    assert_eq!(browser.get("tasks_carol").expect("get"), None);
}

#[test]
fn legacy_layout_keeps_a_single_record() {
    let browser = MemoryStorage::new();
    let mut alice = tab(browser.context(), Layout::Legacy);
    alice.open_session("alice", Role::Creator);
    alice.add("only list", "").expect("add");

    assert_eq!(browser.keys(), vec!["tasks".to_string()]);

    let mut bob = tab(browser.context(), Layout::Legacy);
    bob.open_session("bob", Role::Viewer);
    assert_eq!(bob.tasks().len(), 1);
}

#[test]
fn file_storage_persists_across_store_instances() {
    let temp = tempdir().expect("tempdir");
    let first_storage = FileStorage::open(temp.path()).expect("open");
    let mut first = tab(first_storage, Layout::Shared);
    first.open_session("Alice Smith", Role::Creator);
    first.add("Write report", "quarterly").expect("add");
    assert!(temp.path().join("tasks_alice_smith.json").exists());
    assert!(temp.path().join("tasks_global.json").exists());
    drop(first);

    let reopened = FileStorage::open(temp.path()).expect("reopen");
    let mut viewer = tab(reopened, Layout::Shared);
    viewer.open_session("dave", Role::Viewer);
    assert_eq!(viewer.tasks().len(), 1);
    assert_eq!(viewer.tasks()[0].title, "Write report");
    assert_eq!(viewer.tasks()[0].author, "Alice Smith");
}

#[test]
fn corrupted_record_degrades_to_fallback() {
    let temp = tempdir().expect("tempdir");
    std::fs::write(temp.path().join("tasks_alice.json"), "not json at all").expect("seed");
    std::fs::write(
        temp.path().join("tasks_global.json"),
        r#"[{"id": 1, "title": "", "author": null}]"#,
    )
    .expect("seed");

    let mut store = tab(FileStorage::open(temp.path()).expect("open"), Layout::Shared);
    let tasks = store.open_session("alice", Role::Creator).to_vec();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Untitled");
    assert_eq!(tasks[0].author, "unknown");
}
