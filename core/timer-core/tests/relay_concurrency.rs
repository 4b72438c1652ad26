//! Single-writer safety of the relay slot under concurrent writers and a
//! concurrent reader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use timer_core::{ActionRelay, ContainerPaths, SharedStore, SystemClock};
use timer_protocol::ActionKind;

fn relay_in(root: &std::path::Path) -> ActionRelay {
    let store = SharedStore::new(ContainerPaths::with_root(root.to_path_buf()), Arc::new(SystemClock));
    ActionRelay::new(store)
}

#[test]
fn test_racing_requests_leave_exactly_one_whole_record() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_path_buf();

    let writers: Vec<_> = [ActionKind::Pause, ActionKind::Resume]
        .into_iter()
        .map(|kind| {
            let relay = relay_in(&root);
            thread::spawn(move || {
                for _ in 0..200 {
                    assert!(relay.request_action(kind, Some("A1"), "main"));
                }
            })
        })
        .collect();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let store = SharedStore::new(ContainerPaths::with_root(root.clone()), Arc::new(SystemClock));
        let stop = stop.clone();
        thread::spawn(move || {
            let mut seen = 0usize;
            while !stop.load(Ordering::Relaxed) {
                // Strict read: a torn record would surface as a JSON error here.
                if let Some(action) = store.try_read_action().unwrap() {
                    assert!(matches!(action.kind, ActionKind::Pause | ActionKind::Resume));
                    assert_eq!(action.activity_id.as_deref(), Some("A1"));
                    seen += 1;
                }
            }
            seen
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();

    let relay = relay_in(&root);
    let last = relay.consume().expect("one record remains");
    assert!(matches!(last.kind, ActionKind::Pause | ActionKind::Resume));
    assert_eq!(relay.consume(), None);

    let leftovers: Vec<_> = std::fs::read_dir(&root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "no temp files left behind: {:?}", leftovers);
}

#[test]
fn test_last_completed_request_wins() {
    let temp = tempfile::tempdir().unwrap();
    let relay = relay_in(temp.path());

    let first = relay_in(temp.path());
    thread::spawn(move || assert!(first.request_action(ActionKind::Pause, None, "main")))
        .join()
        .unwrap();
    let second = relay_in(temp.path());
    thread::spawn(move || assert!(second.request_action(ActionKind::Resume, None, "main")))
        .join()
        .unwrap();

    assert_eq!(relay.consume().map(|action| action.kind), Some(ActionKind::Resume));
}
