//! Buffered store behaviour against a real sled database.

use std::sync::Arc;
use std::thread;

use pulse::buffer::{BufferedStore, FlushOutcome, OfferOutcome};
use pulse::storage::{Database, EventEntity, SessionEntity, SledDatabase};

fn event(n: usize, session_id: &str) -> EventEntity {
    EventEntity {
        id: format!("e{:03}", n),
        event_type: "custom".to_string(),
        serialized_data: format!(r#"{{"n":{}}}"#, n),
        timestamp: n as i64,
        created_at: n as i64,
        session_id: session_id.to_string(),
        exported: false,
    }
}

fn database_with_session() -> Arc<SledDatabase> {
    let db = Arc::new(SledDatabase::temporary().unwrap());
    db.create_session(&SessionEntity::new("s1", 0)).unwrap();
    db
}

#[test]
fn overflow_writes_inline_then_drains_queue() {
    let db = database_with_session();
    let store = BufferedStore::new(db.clone(), 3);

    for n in 0..3 {
        assert_eq!(store.offer(event(n, "s1")), OfferOutcome::Queued);
    }
    assert_eq!(
        store.offer(event(3, "s1")),
        OfferOutcome::WrittenDirectly { persisted: true }
    );
    assert!(store.len() <= store.capacity());
    assert_eq!(store.len(), 0);

    let stored = db.get_data_for_export("s1").unwrap().events;
    assert_eq!(stored.len(), 4);
}

#[test]
fn orphaned_rows_are_dropped() {
    let db = database_with_session();
    let store = BufferedStore::new(db.clone(), 4);
    store.offer(event(1, "s1"));
    store.offer(event(2, "no-such-session"));

    assert_eq!(store.flush(), FlushOutcome::Flushed { written: 1, failed: 1 });
    assert!(db.get_event("e002").unwrap().is_none());
    assert!(db.get_event("e001").unwrap().is_some());
}

#[test]
fn concurrent_producers_and_flushers_store_each_row_once() {
    let db = database_with_session();
    let store = Arc::new(BufferedStore::new(db.clone(), 8));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    store.offer(event(worker * 25 + i, "s1"));
                    if i % 5 == 0 {
                        store.flush();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    while store.len() > 0 {
        store.flush();
    }

    let stored = db.get_data_for_export("s1").unwrap().events;
    assert_eq!(stored.len(), 100);
    let mut ids: Vec<_> = stored.iter().map(|e| e.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 100);
}
