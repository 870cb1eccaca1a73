//! End-to-end export: producers → buffered stores → local store → collector.

use pulse::events::ExceptionData;
use pulse::export::ExportOutcome;
use pulse::http::{ExportCall, HttpResponse};
use pulse::storage::Database;

use crate::integration::test_utils::{eventually, Device, MINUTE};

fn crash() -> ExceptionData {
    ExceptionData {
        handled: false,
        exceptions: Vec::new(),
        thread_name: "main".to_string(),
    }
}

#[test]
fn accepted_batch_is_marked_exported() {
    let device = Device::new();
    let agent = device.started_agent();
    agent.on_navigation("home");
    agent.on_navigation("cart");
    agent.start_trace("checkout").end();

    let outcome = agent.scheduler().block_on(agent.export());
    assert!(outcome.is_exported(), "{:?}", outcome);

    let batch = device.client.collections().pop().unwrap();
    assert_eq!(batch.installation_id, agent.installation_id().unwrap());
    assert!(batch.data.session.is_some());
    let routes: Vec<_> = batch
        .data
        .events
        .iter()
        .filter(|e| e.event_type == "navigation")
        .map(|e| e.serialized_data.clone())
        .collect();
    assert_eq!(routes, vec![r#"{"route":"home"}"#, r#"{"route":"cart"}"#]);
    assert_eq!(batch.data.traces.len(), 1);
    assert_eq!(batch.data.traces[0].name, "checkout");

    let session_id = agent.session_id().unwrap();
    for event in &batch.data.events {
        assert!(device.db.get_event(&event.id).unwrap().unwrap().exported);
    }
    assert!(device.db.get_session(&session_id).unwrap().unwrap().exported);
    assert!(device.db.get_data_for_export(&session_id).unwrap().is_empty());
}

#[test]
fn rejected_batch_is_sent_again_next_cycle() {
    let device = Device::new();
    let agent = device.started_agent();
    agent.on_navigation("home");
    agent.start_trace("load").end();

    device.client.set_fallback(HttpResponse::ServerError {
        code: 500,
        body: "unavailable".to_string(),
    });
    let outcome = agent.scheduler().block_on(agent.export());
    assert!(matches!(outcome, ExportOutcome::Failed(_)));

    device.client.set_fallback(HttpResponse::Success {
        body: String::new(),
    });
    let outcome = agent.scheduler().block_on(agent.export());
    assert!(outcome.is_exported());

    let batches = device.client.collections();
    assert_eq!(batches.len(), 2);
    let first_ids: Vec<_> = batches[0].data.events.iter().map(|e| &e.id).collect();
    let second_ids: Vec<_> = batches[1].data.events.iter().map(|e| &e.id).collect();
    for id in first_ids {
        assert!(second_ids.contains(&id), "event {} should be retried", id);
    }
    assert_eq!(batches[1].data.traces.len(), 1);
}

#[test]
fn client_error_also_leaves_rows_pending() {
    let device = Device::new();
    let agent = device.started_agent();
    agent.on_navigation("home");
    device.client.set_fallback(HttpResponse::ClientError {
        code: 400,
        body: "bad batch".to_string(),
    });

    let outcome = agent.scheduler().block_on(agent.export());
    assert!(matches!(
        outcome,
        ExportOutcome::Failed(HttpResponse::ClientError { code: 400, .. })
    ));
    let pending = device
        .db
        .get_data_for_export(&agent.session_id().unwrap())
        .unwrap();
    assert!(!pending.events.is_empty());
}

#[test]
fn crashed_session_is_reported_once() {
    let device = Device::new();
    let agent = device.started_agent();
    agent.on_exception(crash());

    agent.scheduler().block_on(agent.export());
    agent.on_navigation("after");
    agent.scheduler().block_on(agent.export());

    assert_eq!(
        device.client.crashed_sessions(),
        vec![agent.session_id().unwrap()]
    );
    let batch = device.client.collections().remove(0);
    assert!(batch.data.events.iter().any(|e| e.event_type == "exception"));
}

#[test]
fn background_cleans_up_previously_exported_sessions() {
    let device = Device::new();
    let old = {
        let agent = device.started_agent();
        agent.on_navigation("home");
        assert!(agent.scheduler().block_on(agent.export()).is_exported());
        agent.session_id().unwrap()
    };

    device.time.advance(30 * MINUTE);
    let agent = device.started_agent();
    assert_ne!(agent.session_id().unwrap(), old);
    assert!(device.db.get_session(&old).unwrap().is_some());

    agent.on_app_background();
    assert!(device.db.get_session(&old).unwrap().is_none());
    assert!(device
        .db
        .get_session(&agent.session_id().unwrap())
        .unwrap()
        .is_some());
}

#[test]
fn installation_is_registered_with_collector() {
    let device = Device::new();
    let agent = device.started_agent();
    let id = agent.installation_id().unwrap();
    assert!(eventually(|| device
        .client
        .calls()
        .iter()
        .any(|call| matches!(call, ExportCall::Installation(i) if i.id == id))));
}

#[test]
fn periodic_ticker_exports_without_prompting() {
    let device = Device::new();
    let agent = device.agent_with(pulse::config::AgentConfig {
        auto_start: false,
        time_between_exports_ms: 50,
        resource_sample_interval_ms: 60 * 60 * 1000,
        ..pulse::config::AgentConfig::default()
    });
    agent.start();
    agent.on_navigation("home");

    assert!(eventually(|| !device.client.collections().is_empty()));
    agent.stop();
}
