mod support;

use scene_bridge::audit::{AuditEvent, AuditLogHandle};
use scene_bridge::{payload, AckSummary, BridgeConfig, CycleState, FlushOutcome, SceneBridge, Value};
use std::thread;
use std::time::Instant;
use support::RecordingSurface;

#[test]
fn worker_updates_apply_on_the_owning_thread() {
    let audit = AuditLogHandle::new(128);
    let mut bridge = SceneBridge::new(BridgeConfig::default()).with_audit_sink(audit.clone());
    let surface = RecordingSurface::ready().shared();
    bridge.attach_surface(surface.clone());

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let producer = bridge.producer();
            thread::spawn(move || {
                for step in 0..5 {
                    let key = format!("worker_{worker}");
                    assert!(producer.queue_update("simulation", payload([(key, Value::from(step))])));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert!(bridge.queued("simulation").is_none(), "nothing lands before the bridge pumps");

    let report = bridge.pump_at(Instant::now()).expect("flush after drain");
    assert_eq!(report.outcome, FlushOutcome::Published);
    let batches = surface.borrow().batches();
    assert_eq!(batches.len(), 1);
    let simulation = &batches[0]["simulation"];
    for worker in 0..4 {
        assert_eq!(simulation[&format!("worker_{worker}")], Value::Number(4.0));
        assert_eq!(simulation[&format!("worker{worker}")], Value::Number(4.0), "alias added for snake_case keys");
    }
    assert_eq!(audit.borrow().of_event(AuditEvent::Queued).count(), 20);
}

#[test]
fn acks_from_another_thread_close_the_cycle() {
    let mut bridge = SceneBridge::new(BridgeConfig::default());
    bridge.attach_surface(RecordingSurface::ready().shared());
    bridge.queue_update("effects", payload([("vignette", 0.3)]));
    assert_eq!(bridge.flush().outcome, FlushOutcome::Published);
    assert_eq!(bridge.category_state("effects"), CycleState::Published);

    let producer = bridge.producer();
    thread::spawn(move || producer.ack(AckSummary::now())).join().expect("ack thread");
    assert!(bridge.pending_batch().is_some());
    bridge.pump();
    assert!(bridge.pending_batch().is_none());
    assert_eq!(bridge.category_state("effects"), CycleState::Applied);
}

#[test]
fn non_mapping_values_never_reach_the_queue() {
    let mut bridge = SceneBridge::new(BridgeConfig::default());
    let producer = bridge.producer();
    assert!(!producer.queue_value("camera", Value::from("front")));
    assert!(producer.queue_value("camera", Value::Map(payload([("fov", 50.0)]))));
    bridge.pump();
    assert!(bridge.queued("camera").is_some());
    assert!(bridge.queue_update_value("camera", Value::List(Vec::new())).is_err());
}
