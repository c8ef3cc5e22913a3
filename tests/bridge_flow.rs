mod support;

use scene_bridge::audit::{AuditEvent, AuditLogHandle};
use scene_bridge::status::{NoticeKind, StatusHistory};
use scene_bridge::{
    payload, AckSummary, BridgeConfig, BridgeRegistry, CategoryOutcome, CycleState, FlushOutcome, Payload,
    SceneBridge, Value,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use support::RecordingSurface;

fn bridge() -> (SceneBridge, AuditLogHandle) {
    let audit = AuditLogHandle::new(256);
    let bridge = SceneBridge::new(BridgeConfig::default()).with_audit_sink(audit.clone());
    (bridge, audit)
}

fn lighting_registry() -> BridgeRegistry {
    BridgeRegistry::from_json_str(
        r#"{"categories": {"lighting": ["applyLightingSettings", "updateLighting"], "quality": []}}"#,
        "test",
    )
    .expect("registry")
}

#[test]
fn patches_in_one_turn_coalesce_into_one_batch() {
    let (mut bridge, _audit) = bridge();
    let surface = RecordingSurface::ready().shared();
    bridge.attach_surface(surface.clone());
    let now = Instant::now();

    bridge.queue_update_at("lighting", payload([("exposure", 1.0)]), now);
    bridge.queue_update_at(
        "lighting",
        payload([("shadow", Value::Map(payload([("enabled", true)])))]),
        now,
    );
    bridge.queue_update_at(
        "lighting",
        payload([("shadow", Value::Map(payload([("soft_edges", false)])))]),
        now,
    );
    bridge.queue_update_at("camera", payload([("fov", 60.0)]), now);

    let report = bridge.pump_at(now).expect("flush due");
    assert_eq!(report.outcome, FlushOutcome::Published);
    let batches = surface.borrow().batches();
    assert_eq!(batches.len(), 1);
    let lighting = &batches[0]["lighting"];
    assert_eq!(lighting["exposure"], Value::Number(1.0));
    let shadow = lighting["shadow"].as_map().expect("shadow map");
    assert_eq!(shadow["enabled"], Value::Bool(true));
    assert_eq!(shadow["soft_edges"], Value::Bool(false));
    assert_eq!(shadow["softEdges"], Value::Bool(false));
    assert!(batches[0].contains_key("camera"));
    assert!(bridge.queued("lighting").is_none());
    assert!(bridge.pump_at(now).is_none(), "nothing left to flush");
}

#[test]
fn failed_bulk_falls_back_in_registry_order() {
    let (bridge, audit) = bridge();
    let mut bridge = bridge.with_registry(lighting_registry());
    let surface = RecordingSurface::ready().failing_batch().failing_methods(&["applyLightingSettings"]).shared();
    bridge.attach_surface(surface.clone());

    bridge.queue_update("lighting", payload([("exposure", 2.0)]));
    let report = bridge.flush();

    assert_eq!(report.outcome, FlushOutcome::PartiallyApplied);
    assert_eq!(report.transfer_error.as_deref(), Some("bulk property rejected"));
    assert_eq!(
        report.outcome_for("lighting"),
        Some(&CategoryOutcome::Fallback { method: "updateLighting".into() })
    );
    assert_eq!(surface.borrow().invoked(), vec!["applyLightingSettings", "updateLighting"]);
    assert_eq!(bridge.category_state("lighting"), CycleState::PartiallyApplied);

    let log = audit.borrow();
    let attempts: Vec<_> = log.of_event(AuditEvent::FallbackAttempt).collect();
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].applied && attempts[0].error.as_deref() == Some("applyLightingSettings failed"));
    assert!(attempts[1].applied && attempts[1].method.as_deref() == Some("updateLighting"));
    assert_eq!(log.of_event(AuditEvent::BatchFailed).count(), 1);
    let pending = bridge.pending_batch().expect("fallback result awaits ack");
    assert_eq!(pending.categories().collect::<Vec<_>>(), vec!["lighting"]);
}

#[test]
fn exhausted_fallback_is_unresolved_and_reported() {
    let notices = Rc::new(RefCell::new(StatusHistory::default()));
    let (bridge, audit) = bridge();
    let mut bridge = bridge.with_registry(lighting_registry()).with_status_sink(notices.clone());
    let surface = RecordingSurface::ready()
        .failing_batch()
        .failing_methods(&["applyLightingSettings", "updateLighting"])
        .shared();
    bridge.attach_surface(surface.clone());

    bridge.queue_update("lighting", payload([("exposure", 2.0)]));
    bridge.queue_update("quality", payload([("msaa", 4)]));
    let report = bridge.flush();

    assert_eq!(report.outcome, FlushOutcome::Unresolved);
    assert_eq!(
        report.outcome_for("lighting"),
        Some(&CategoryOutcome::Unresolved { error: "updateLighting failed".into() })
    );
    assert!(matches!(report.outcome_for("quality"), Some(CategoryOutcome::Unresolved { .. })));
    assert_eq!(bridge.category_state("lighting"), CycleState::Unresolved);
    assert!(bridge.pending_batch().is_none());
    assert!(bridge.queued("lighting").is_none(), "unresolved categories are not requeued");
    assert_eq!(audit.borrow().of_event(AuditEvent::Unresolved).count(), 2);

    let notices = notices.borrow();
    assert_eq!(notices.notices().len(), 2);
    assert_eq!(notices.notices()[0].kind, NoticeKind::Transient);
    let dialog = notices.latest().expect("dialog");
    assert_eq!(dialog.kind, NoticeKind::Dialog);
    assert!(dialog.message.contains("lighting") && dialog.message.contains("quality"));

    // A later edit with the same values is attempted again.
    surface.borrow_mut().fail_batch = false;
    bridge.queue_update("lighting", payload([("exposure", 2.0)]));
    assert_eq!(bridge.flush().outcome, FlushOutcome::Published);
}

#[test]
fn silent_method_failures_are_unresolved_not_dispatched() {
    let (bridge, audit) = bridge();
    let mut bridge = bridge.with_registry(lighting_registry());
    let surface = RecordingSurface::ready()
        .failing_batch()
        .failing_methods(&["applyLightingSettings", "updateLighting"])
        .silent()
        .shared();
    bridge.attach_surface(surface.clone());

    bridge.queue_update("lighting", payload([("exposure", 2.0)]));
    let report = bridge.flush();

    assert_eq!(
        report.outcome_for("lighting"),
        Some(&CategoryOutcome::Unresolved { error: "all 2 candidate methods failed for 'lighting'".into() })
    );
    assert_eq!(surface.borrow().invoked(), vec!["applyLightingSettings", "updateLighting"]);
    let health = audit.health();
    assert_eq!(health.dispatched, 0);
    assert_eq!(health.failed_attempts, 3, "one bulk failure and two method failures");
    assert_eq!(health.unresolved, 1);
    assert_eq!(health.sync_rate(), None);
}

#[test]
fn reset_keeps_an_injected_registry() {
    let (bridge, _audit) = bridge();
    let custom = BridgeRegistry::from_json_str(r#"{"categories": {"lighting": ["customApply"]}}"#, "custom")
        .expect("registry");
    let mut bridge = bridge.with_registry(custom);
    let surface = RecordingSurface::ready().failing_batch().shared();
    bridge.attach_surface(surface.clone());

    bridge.reset();
    assert_eq!(bridge.registry().origin(), "custom");
    bridge.queue_update("lighting", payload([("exposure", 1.5)]));
    let report = bridge.flush();

    assert_eq!(report.outcome_for("lighting"), Some(&CategoryOutcome::Fallback { method: "customApply".into() }));
    assert_eq!(surface.borrow().invoked(), vec!["customApply"]);
}

#[test]
fn ack_marks_every_pending_category_applied() {
    let (mut bridge, audit) = bridge();
    bridge.attach_surface(RecordingSurface::ready().shared());
    bridge.queue_update("camera", payload([("fov", 45.0)]));
    bridge.queue_update("effects", payload([("bloom", true)]));
    let report = bridge.flush();
    let batch_id = report.batch_id.expect("batch id");
    let sent_at = bridge.pending_batch().expect("pending").sent_at_ms;

    bridge.on_ack(&AckSummary::new(sent_at + 8.0));

    assert!(bridge.pending_batch().is_none());
    assert_eq!(bridge.category_state("camera"), CycleState::Applied);
    assert_eq!(bridge.category_state("effects"), CycleState::Applied);
    let log = audit.borrow();
    let applied: Vec<_> = log.of_event(AuditEvent::Applied).collect();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|r| r.batch_id.as_deref() == Some(batch_id.as_str())));
    assert!(applied.iter().all(|r| r.latency_ms.is_some_and(|ms| (ms - 8.0).abs() < 1e-6)));
    assert_eq!(log.health().applied, 2);
    drop(log);

    // A duplicate ack changes nothing.
    bridge.on_ack(&AckSummary::now());
    assert_eq!(audit.borrow().of_event(AuditEvent::Applied).count(), 2);
}

#[test]
fn ack_signal_round_trips_through_registered_handler() {
    let (mut bridge, _audit) = bridge();
    let surface = RecordingSurface::ready().with_signals(&["batchApplied", "sceneReady"]).shared();
    bridge.attach_surface(surface.clone());
    let report = bridge.register_signals(&scene_bridge::HostHandlers::new()).expect("surface attached");
    assert_eq!(report.bound.len(), 2);
    assert_eq!(report.skipped.len(), 2, "cameraChanged and errorRaised have no host handler or signal");

    bridge.queue_update("materials", payload([("roughness", 0.4)]));
    bridge.flush();
    surface.borrow().fire("batchApplied", &payload([("timestamp", 1.0)]));
    assert!(bridge.pending_batch().is_some(), "acks are marshaled to the next pump");
    bridge.pump();
    assert!(bridge.pending_batch().is_none());
    assert_eq!(bridge.category_state("materials"), CycleState::Applied);
}

#[test]
fn echo_guard_is_raised_only_during_writes() {
    let (bridge, _audit) = bridge();
    let mut bridge = bridge.with_registry(lighting_registry());
    let mut surface = RecordingSurface::ready().failing_batch();
    surface.echo = Some(bridge.echo_guard());
    let surface = surface.shared();
    bridge.attach_surface(surface.clone());

    bridge.queue_update("lighting", payload([("exposure", 0.5)]));
    bridge.flush();

    assert_eq!(surface.borrow().echo_seen, vec![true, true]);
    assert!(!bridge.echo_guard().is_suppressed());
}

#[test]
fn camera_jitter_within_tolerance_is_suppressed() {
    let (mut bridge, audit) = bridge();
    let surface = RecordingSurface::ready().shared();
    bridge.attach_surface(surface.clone());

    bridge.queue_update("camera", payload([("fov", 60.0), ("distance", 4.0)]));
    assert_eq!(bridge.flush().outcome, FlushOutcome::Published);
    bridge.queue_update("camera", payload([("fov", 60.000_000_1)]));
    let report = bridge.flush();
    assert_eq!(report.outcome, FlushOutcome::Suppressed);
    assert_eq!(report.outcome_for("camera"), Some(&CategoryOutcome::Suppressed));
    assert_eq!(bridge.category_state("camera"), CycleState::Idle);

    bridge.queue_update("camera", payload([("fov", Value::from(60.0)), ("reset_view", Value::from(true))]));
    assert_eq!(bridge.flush().outcome, FlushOutcome::Published, "camera commands bypass dedup");
    assert_eq!(surface.borrow().batches().len(), 2);
    assert_eq!(audit.borrow().of_event(AuditEvent::Suppressed).count(), 1);
}

#[test]
fn surface_that_is_not_ready_retries_after_delay() {
    let (mut bridge, _audit) = bridge();
    let surface = RecordingSurface::default().shared();
    bridge.attach_surface(surface.clone());
    let start = Instant::now();

    bridge.queue_update_at("environment", payload([("skybox", "dusk")]), start);
    assert_eq!(bridge.pump_at(start).map(|r| r.outcome), Some(FlushOutcome::NotReady));
    bridge.queue_update_at("environment", payload([("fog", 0.2)]), start);
    assert!(bridge.pump_at(start + Duration::from_millis(50)).is_none());

    surface.borrow_mut().ready = true;
    let report = bridge.pump_at(start + Duration::from_millis(100)).expect("retry fires");
    assert_eq!(report.outcome, FlushOutcome::Published);
    let batches = surface.borrow().batches();
    let environment: &Payload = &batches[0]["environment"];
    assert_eq!(environment["skybox"], Value::from("dusk"));
    assert_eq!(environment["fog"], Value::Number(0.2));
}

#[test]
fn empty_flush_and_empty_patch_are_noops() {
    let (mut bridge, audit) = bridge();
    let surface = RecordingSurface::ready().shared();
    bridge.attach_surface(surface.clone());
    assert_eq!(bridge.flush().outcome, FlushOutcome::Empty);
    assert!(!bridge.queue_update("lighting", Payload::new()));
    assert!(!bridge.queue_update("", payload([("exposure", 1.0)])));
    assert_eq!(bridge.flush().outcome, FlushOutcome::Empty);
    assert!(surface.borrow().calls.is_empty());
    assert!(audit.borrow().is_empty());
}

#[test]
fn nested_lighting_patches_merge_before_one_dispatch() {
    let (mut bridge, _audit) = bridge();
    let surface = RecordingSurface::ready().shared();
    bridge.attach_surface(surface.clone());

    bridge.queue_update("lighting", payload([("key", Value::Map(payload([("brightness", 1.0)])))]));
    bridge.queue_update("lighting", payload([("key", Value::Map(payload([("color", "#ffffff")])))]));
    bridge.flush();

    let batches = surface.borrow().batches();
    assert_eq!(batches.len(), 1);
    let key = batches[0]["lighting"]["key"].as_map().expect("key map");
    assert_eq!(key["brightness"], Value::Number(1.0));
    assert_eq!(key["color"], Value::from("#ffffff"));
}
