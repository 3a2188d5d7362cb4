mod support;

use std::cell::RefCell;
use std::rc::Rc;

use docsite::offline::{
    CoordinatorOptions, JsonFileStore, MemoryStore, MessageRelay, OfflineCoordinator,
    SETTINGS_KEY, STORE_FILE_NAME, Settings, SettingsPatch, StatusPatch, UpdateState, WorkerSupport,
};
use serde_json::json;
use support::fakes::{CallLog, RecordingHost, ScriptedSource, call_log};
use time::OffsetDateTime;
use time::macros::datetime;

const V2: &str = r#"{"latest": "v2", "date": "2024-01-01", "updates": ["v1"]}"#;

fn jan_first_noon() -> OffsetDateTime {
    datetime!(2024-01-01 12:00 UTC)
}

fn early_march() -> OffsetDateTime {
    datetime!(2024-03-01 00:00 UTC)
}

type RelaySlot = Rc<RefCell<Option<MessageRelay>>>;

fn build(
    store: MemoryStore,
    source: ScriptedSource,
    log: &CallLog,
    clock: fn() -> OffsetDateTime,
) -> (OfflineCoordinator, RelaySlot) {
    let (host, relay) = RecordingHost::new(log);
    let coordinator = OfflineCoordinator::new(
        Box::new(store),
        Box::new(source),
        WorkerSupport::available(host),
        CoordinatorOptions::default(),
    )
    .with_clock(clock);
    (coordinator, relay)
}

fn stored(settings: serde_json::Value) -> MemoryStore {
    MemoryStore::new().with_value(SETTINGS_KEY, settings)
}

fn calls(log: &CallLog, name: &str) -> usize {
    log.borrow().iter().filter(|call| call.starts_with(name)).count()
}

#[test]
fn fresh_coordinator_reports_update_available() {
    let log = call_log();
    let (mut coordinator, _) = build(
        MemoryStore::new(),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    let status = coordinator.update_available().unwrap().clone();
    assert_eq!(status.state, UpdateState::UpdateAvailable);
    assert_eq!(status.current_version, None);
    assert_eq!(status.update_version.as_deref(), Some("v2"));
    assert_eq!(status.update_date.as_deref(), Some("2024-01-01"));
}

#[test]
fn update_check_is_cached_for_a_day() {
    let log = call_log();
    let (mut coordinator, _) = build(
        stored(json!({"currentVersion": "v2"})),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    let first = coordinator.check_for_update().unwrap();
    assert_eq!(coordinator.status().state, UpdateState::Nothing);
    let second = coordinator.check_for_update().unwrap();
    assert_eq!(first, second);
    assert_eq!(calls(&log, "fetch"), 1);
}

#[test]
fn day_old_release_is_fetched_again() {
    let log = call_log();
    let (mut coordinator, _) = build(
        stored(json!({"currentVersion": "v2"})),
        ScriptedSource::always(&log, V2),
        &log,
        early_march,
    );
    coordinator.check_for_update().unwrap();
    coordinator.check_for_update().unwrap();
    assert_eq!(calls(&log, "fetch"), 2);
}

#[test]
fn fetch_failure_propagates_without_retry() {
    let log = call_log();
    let (mut coordinator, _) = build(
        MemoryStore::new(),
        ScriptedSource::new(&log, vec![Err("503 on https://updates.test/update.json")]),
        &log,
        jan_first_noon,
    );
    let err = coordinator.check_for_update().unwrap_err();
    assert!(err.to_string().contains("503 on"));
    assert_eq!(calls(&log, "fetch"), 1);
    assert_eq!(coordinator.status().state, UpdateState::Init);
}

#[test]
fn request_update_is_a_no_op_when_latest_is_installed() {
    let log = call_log();
    let (mut coordinator, _) = build(
        stored(json!({"offline": true, "currentVersion": "v2"})),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    coordinator.check_for_update().unwrap();
    coordinator.request_update().unwrap();
    assert_eq!(*log.borrow(), vec!["fetch".to_string()]);
    assert_eq!(coordinator.status().state, UpdateState::Nothing);
    assert!(!coordinator.is_updating());
}

#[test]
fn request_update_reinstalls_worker_for_new_version() {
    let log = call_log();
    let (mut coordinator, _) = build(
        stored(json!({"offline": true, "currentVersion": "v1"})),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    coordinator.check_for_update().unwrap();
    coordinator.request_update().unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            "fetch".to_string(),
            "unregister".to_string(),
            "register preferOnline=false version=v2".to_string(),
        ]
    );
    assert_eq!(coordinator.status().state, UpdateState::Downloading);
    assert!(coordinator.is_updating());
    assert!(coordinator.is_registered());
}

#[test]
fn failed_registration_restores_previous_state() {
    let log = call_log();
    let (host, _) = RecordingHost::new(&log);
    let mut coordinator = OfflineCoordinator::new(
        Box::new(stored(json!({"offline": true, "currentVersion": "v1"}))),
        Box::new(ScriptedSource::always(&log, V2)),
        WorkerSupport::available(host.failing_register("quota exceeded")),
        CoordinatorOptions::default(),
    )
    .with_clock(early_march);
    coordinator.check_for_update().unwrap();
    assert_eq!(coordinator.status().state, UpdateState::UpdateAvailable);

    let err = coordinator.request_update().unwrap_err();
    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(coordinator.status().state, UpdateState::UpdateAvailable);
    assert!(!coordinator.is_updating());
    assert!(!coordinator.is_registered());

    assert!(coordinator.request_update().is_err());
    assert_eq!(calls(&log, "register"), 2);
    assert_eq!(coordinator.status().state, UpdateState::UpdateAvailable);
}

#[test]
fn update_check_is_skipped_mid_flow() {
    let log = call_log();
    let (mut coordinator, _) = build(
        MemoryStore::new(),
        ScriptedSource::always(&log, V2),
        &log,
        early_march,
    );
    coordinator
        .set_status(StatusPatch::state(UpdateState::Downloading).with_progress(40))
        .unwrap();
    assert_eq!(coordinator.check_for_update().unwrap(), None);
    assert_eq!(calls(&log, "fetch"), 0);
    assert_eq!(coordinator.status().state, UpdateState::Downloading);
    assert_eq!(coordinator.status().update_version, None);
}

#[test]
fn update_check_is_skipped_while_installing() {
    let log = call_log();
    let (host, _) = RecordingHost::new(&log);
    let installing = host.installing_flag();
    let mut coordinator = OfflineCoordinator::new(
        Box::new(MemoryStore::new()),
        Box::new(ScriptedSource::always(&log, V2)),
        WorkerSupport::available(host),
        CoordinatorOptions::default(),
    )
    .with_clock(early_march);
    let cached = coordinator.check_for_update().unwrap();
    coordinator
        .set_status(StatusPatch::state(UpdateState::Nothing))
        .unwrap();

    installing.set(true);
    assert_eq!(coordinator.check_for_update().unwrap(), cached);
    assert_eq!(calls(&log, "fetch"), 1);
    assert_eq!(coordinator.status().state, UpdateState::Nothing);

    installing.set(false);
    coordinator.check_for_update().unwrap();
    assert_eq!(calls(&log, "fetch"), 2);
}

#[test]
fn updating_flag_follows_incoming_state() {
    let log = call_log();
    let (mut coordinator, _) = build(
        MemoryStore::new(),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    for state in UpdateState::ALL {
        if state == UpdateState::Init {
            continue;
        }
        coordinator.set_status(StatusPatch::state(state)).unwrap();
        assert_eq!(coordinator.status().state, state);
        let expected = matches!(
            state,
            UpdateState::Downloading | UpdateState::Unpacking | UpdateState::Clearing
        );
        assert_eq!(coordinator.is_updating(), expected, "after {state}");
    }
}

#[test]
fn init_while_mid_flow_resets_tracker() {
    let log = call_log();
    let (mut coordinator, _) = build(
        MemoryStore::new(),
        ScriptedSource::new(&log, vec![Ok(V2), Err("offline")]),
        &log,
        early_march,
    );
    coordinator.check_for_update().unwrap();
    coordinator
        .set_status(StatusPatch::state(UpdateState::Downloading).with_progress(10))
        .unwrap();
    assert!(coordinator.is_updating());

    // The re-run update check fails, so the cleared fields stay cleared.
    assert!(coordinator.set_status(StatusPatch::state(UpdateState::Init)).is_err());
    let status = coordinator.status();
    assert_eq!(status.state, UpdateState::Init);
    assert_eq!(status.update_version, None);
    assert_eq!(status.update_date, None);
    assert!(!coordinator.is_updating());
    assert_eq!(calls(&log, "fetch"), 2);
}

#[test]
fn state_stays_within_defined_set() {
    let log = call_log();
    let (mut coordinator, _) = build(
        MemoryStore::new(),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    for round in 0..3 {
        for state in UpdateState::ALL.iter().rev().cycle().skip(round).take(7) {
            let _ = coordinator.set_status(StatusPatch::state(*state).with_progress(round as i32));
            assert!(UpdateState::ALL.contains(&coordinator.status().state));
        }
    }
}

#[test]
fn enabling_offline_fetches_then_registers() {
    let log = call_log();
    let (mut coordinator, _) = build(
        stored(json!({"offline": false})),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    let settings = coordinator
        .apply_settings(SettingsPatch {
            offline: Some(true),
            prefer_online: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            "fetch".to_string(),
            "register preferOnline=false version=v2".to_string(),
        ]
    );
    assert!(settings.offline);
    assert!(coordinator.is_registered());

    coordinator
        .apply_settings(SettingsPatch {
            offline: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();
    assert_eq!(log.borrow().last().map(String::as_str), Some("unregister"));
    assert!(!coordinator.is_registered());
    assert!(!coordinator.settings().offline);
}

#[test]
fn prefer_online_change_reregisters_installed_version() {
    let log = call_log();
    let (mut coordinator, _) = build(
        stored(json!({"offline": true, "currentVersion": "v1"})),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    coordinator
        .apply_settings(SettingsPatch {
            prefer_online: Some(true),
            ..SettingsPatch::default()
        })
        .unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            "unregister".to_string(),
            "register preferOnline=true version=v1".to_string(),
        ]
    );
    assert!(coordinator.settings().prefer_online);
}

#[test]
fn auto_update_toggle_cancels_and_restarts_loop() {
    let log = call_log();
    let (mut coordinator, _) = build(
        stored(json!({"offline": true, "autoUpdates": true})),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    coordinator.start();
    assert!(coordinator.has_pending_auto_update());
    assert_eq!(calls(&log, "register"), 1);

    coordinator
        .apply_settings(SettingsPatch {
            auto_updates: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();
    assert!(!coordinator.has_pending_auto_update());

    coordinator
        .apply_settings(SettingsPatch {
            auto_updates: Some(true),
            ..SettingsPatch::default()
        })
        .unwrap();
    assert!(coordinator.has_pending_auto_update());
    assert_eq!(calls(&log, "register"), 2);

    coordinator.shutdown();
    assert!(!coordinator.has_pending_auto_update());
}

#[test]
fn worker_messages_arrive_through_the_relay() {
    let log = call_log();
    let (mut coordinator, relay) = build(
        MemoryStore::new(),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    coordinator.enable_worker(Some(false), Some("v2".into())).unwrap();
    let relay = relay.borrow().clone().unwrap();

    assert!(relay.post_json(r#"{"type": "updateStatus", "state": "unpacking", "progress": 40}"#));
    assert!(relay.post_json(r#"{"type": "somethingNew"}"#));
    assert!(!relay.post_json(r#"{"type": "updateStatus", "state": "exploded"}"#));
    assert_eq!(coordinator.process_events(), 2);
    assert_eq!(coordinator.status().state, UpdateState::Unpacking);
    assert_eq!(coordinator.status().progress, 40);
    assert!(coordinator.is_updating());

    relay.post_json(
        r#"{"type": "updateStatus", "state": "init", "currentVersion": "v2", "currentDate": "2024-01-01"}"#,
    );
    coordinator.process_events();
    assert_eq!(coordinator.settings().current_version.as_deref(), Some("v2"));
    assert_eq!(coordinator.settings().current_date.as_deref(), Some("2024-01-01"));
    assert_eq!(coordinator.status().state, UpdateState::Nothing);
    assert!(!coordinator.is_updating());
}

#[test]
fn clear_is_forwarded_to_the_active_worker() {
    let log = call_log();
    let (mut coordinator, _) = build(
        MemoryStore::new(),
        ScriptedSource::always(&log, V2),
        &log,
        jan_first_noon,
    );
    coordinator.enable_worker(None, None).unwrap();
    coordinator.clear().unwrap();
    assert_eq!(log.borrow().last().map(String::as_str), Some("post Clear"));
    assert_eq!(coordinator.status().state, UpdateState::Clearing);
    assert!(coordinator.is_updating());
}

#[test]
fn unsupported_host_skips_registration_silently() {
    let log = call_log();
    let mut coordinator = OfflineCoordinator::new(
        Box::new(MemoryStore::new()),
        Box::new(ScriptedSource::always(&log, V2)),
        WorkerSupport::Unsupported,
        CoordinatorOptions::default(),
    )
    .with_clock(jan_first_noon);
    let settings = coordinator
        .apply_settings(SettingsPatch {
            offline: Some(true),
            ..SettingsPatch::default()
        })
        .unwrap();
    assert!(settings.offline);
    assert!(!coordinator.is_registered());
    assert_eq!(coordinator.status().state, UpdateState::UpdateAvailable);
}

#[test]
fn settings_survive_reopening_the_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let open = || {
        OfflineCoordinator::new(
            Box::new(JsonFileStore::in_dir(dir.path())),
            Box::new(ScriptedSource::always(&call_log(), V2)),
            WorkerSupport::Unsupported,
            CoordinatorOptions::default(),
        )
    };
    {
        let mut coordinator = open();
        coordinator
            .apply_settings(SettingsPatch {
                prefer_online: Some(true),
                current_version: Some(Some("v1".into())),
                ..SettingsPatch::default()
            })
            .unwrap();
    }
    let reopened = open();
    assert!(reopened.settings().prefer_online);
    assert_eq!(reopened.settings().current_version.as_deref(), Some("v1"));
    assert_eq!(reopened.status().current_version.as_deref(), Some("v1"));

    std::fs::write(dir.path().join(STORE_FILE_NAME), "{ not json").unwrap();
    let recovered = open();
    assert_eq!(*recovered.settings(), Settings::default());
}
