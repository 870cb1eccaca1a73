//! Session continuity across restarts and app visibility changes.

use crate::integration::test_utils::{eventually, Device, MINUTE};
use pulse::events::ExceptionData;
use pulse::session::SessionStart;
use pulse::storage::{Database, KeyValueStore};

#[test]
fn restart_inside_window_continues_session() {
    let device = Device::new();
    let first = {
        let agent = device.started_agent();
        agent.on_navigation("home");
        agent.session_id().unwrap()
    };

    device.time.advance(5 * MINUTE);
    let agent = device.started_agent();
    assert_eq!(agent.session_id().unwrap(), first);
}

#[test]
fn restart_after_inactivity_starts_new_session() {
    let device = Device::new();
    let first = {
        let agent = device.started_agent();
        agent.on_navigation("home");
        agent.session_id().unwrap()
    };

    device.time.advance(21 * MINUTE);
    let agent = device.started_agent();
    let second = agent.session_id().unwrap();
    assert_ne!(second, first);
    assert!(device.db.get_session(&second).unwrap().is_some());
    assert!(device.db.get_session(&first).unwrap().is_some());
}

#[test]
fn crash_forces_new_session_on_restart() {
    let device = Device::new();
    let crashed = {
        let agent = device.started_agent();
        agent.on_exception(ExceptionData {
            handled: false,
            exceptions: Vec::new(),
            thread_name: "main".to_string(),
        });
        let id = agent.session_id().unwrap();
        assert!(eventually(|| device.db.get_session(&id).unwrap().unwrap().crashed));
        id
    };

    device.time.advance(MINUTE);
    let agent = device.started_agent();
    assert_ne!(agent.session_id().unwrap(), crashed);
}

#[test]
fn handled_exception_keeps_session() {
    let device = Device::new();
    let agent = device.started_agent();
    let id = agent.session_id().unwrap();
    agent.on_exception(ExceptionData {
        handled: true,
        exceptions: Vec::new(),
        thread_name: "worker".to_string(),
    });
    assert!(!device.prefs.get_recent_session().unwrap().unwrap().crashed);
    assert_eq!(agent.session_id().unwrap(), id);
}

#[test]
fn foreground_after_long_background_rotates_session() {
    let device = Device::new();
    let agent = device.started_agent();
    let first = agent.session_id().unwrap();

    assert_eq!(agent.on_app_foreground(), None);

    agent.on_app_background();
    device.time.advance(2 * MINUTE);
    assert_eq!(agent.on_app_foreground(), Some(SessionStart::Continued));
    assert_eq!(agent.session_id().unwrap(), first);

    agent.on_app_background();
    device.time.advance(25 * MINUTE);
    assert_eq!(agent.on_app_foreground(), Some(SessionStart::Created));
    assert_ne!(agent.session_id().unwrap(), first);
}

#[test]
fn installation_id_survives_restart() {
    let device = Device::new();
    let id = {
        let agent = device.started_agent();
        let id = agent.installation_id().unwrap();
        assert!(eventually(|| device.prefs.get_installation_id().unwrap().is_some()));
        id
    };

    let agent = device.started_agent();
    assert_eq!(agent.installation_id().unwrap(), id);
}
