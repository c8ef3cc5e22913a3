use log::debug;
use scene_bridge::audit::epoch_millis;
use scene_bridge::value::merge_payload;
use scene_bridge::{
    Batch, BridgeRegistry, ConnectionMode, DispatchResult, Payload, ScenePublishable, SignalHandler, Value,
};
use std::collections::{BTreeMap, BTreeSet};

pub const SIGNAL_BATCH_APPLIED: &str = "batchApplied";
pub const SIGNAL_SCENE_READY: &str = "sceneReady";
pub const SIGNAL_CAMERA_CHANGED: &str = "cameraChanged";
pub const SIGNAL_ERROR_RAISED: &str = "errorRaised";

const SIGNALS: [&str; 4] = [SIGNAL_BATCH_APPLIED, SIGNAL_SCENE_READY, SIGNAL_CAMERA_CHANGED, SIGNAL_ERROR_RAISED];

struct Subscription {
    mode: ConnectionMode,
    handler: SignalHandler,
}

/// In-process stand-in for the rendering runtime on the far side of the bridge.
///
/// Accepted writes land in a per-category scene state. `batchApplied` is emitted queued and only
/// delivered by [`deliver_queued`](Self::deliver_queued); `cameraChanged` fires during the write.
pub struct SceneRuntime {
    ready: bool,
    fail_batch: bool,
    failing_methods: BTreeSet<String>,
    method_categories: BTreeMap<String, String>,
    state: Batch,
    subscriptions: BTreeMap<String, Vec<Subscription>>,
    outbox: BTreeMap<String, Payload>,
    batches: u64,
    invocations: Vec<String>,
}

impl SceneRuntime {
    pub fn new(registry: &BridgeRegistry) -> Self {
        let mut method_categories = BTreeMap::new();
        for category in registry.categories() {
            for method in registry.methods_for(category) {
                method_categories.insert(method.clone(), category.to_string());
            }
        }
        Self {
            ready: true,
            fail_batch: false,
            failing_methods: BTreeSet::new(),
            method_categories,
            state: Batch::new(),
            subscriptions: BTreeMap::new(),
            outbox: BTreeMap::new(),
            batches: 0,
            invocations: Vec::new(),
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        let was_ready = self.ready;
        self.ready = ready;
        if ready && !was_ready {
            self.emit(SIGNAL_SCENE_READY, Payload::new());
        }
    }

    pub fn set_fail_batch(&mut self, fail: bool) {
        self.fail_batch = fail;
    }

    pub fn fail_method(&mut self, method: impl Into<String>) {
        self.failing_methods.insert(method.into());
    }

    pub fn heal_method(&mut self, method: &str) {
        self.failing_methods.remove(method);
    }

    pub fn state(&self, category: &str) -> Option<&Payload> {
        self.state.get(category)
    }

    pub fn batches_received(&self) -> u64 {
        self.batches
    }

    pub fn invocations(&self) -> &[String] {
        &self.invocations
    }

    pub fn pending_signals(&self) -> usize {
        self.outbox.len()
    }

    /// Delivers queued signal emissions. Returns how many were delivered.
    pub fn deliver_queued(&mut self) -> usize {
        let outbox = std::mem::take(&mut self.outbox);
        let mut delivered = 0;
        for (signal, payload) in outbox {
            for handler in self.handlers(&signal, |mode| mode == ConnectionMode::Queued) {
                handler(&payload);
                delivered += 1;
            }
        }
        delivered
    }

    fn handlers(&self, signal: &str, filter: impl Fn(ConnectionMode) -> bool) -> Vec<SignalHandler> {
        self.subscriptions
            .get(signal)
            .map(|subs| subs.iter().filter(|sub| filter(sub.mode)).map(|sub| sub.handler.clone()).collect())
            .unwrap_or_default()
    }

    fn emit(&mut self, signal: &str, payload: Payload) {
        // Same thread, so auto connections behave as direct ones.
        for handler in self.handlers(signal, |mode| mode != ConnectionMode::Queued) {
            handler(&payload);
        }
        if self.handlers(signal, |mode| mode == ConnectionMode::Queued).is_empty() {
            return;
        }
        self.outbox.insert(signal.to_string(), payload);
    }

    fn apply(&mut self, category: &str, payload: &Payload) {
        merge_payload(self.state.entry(category.to_string()).or_default(), payload.clone());
        if category == "camera" {
            self.emit(SIGNAL_CAMERA_CHANGED, payload.clone());
        }
    }

    fn applied_signal(&mut self, categories: Vec<Value>) {
        let mut payload = Payload::new();
        payload.insert("timestamp".to_string(), Value::Number(epoch_millis()));
        payload.insert("categories".to_string(), Value::List(categories));
        self.emit(SIGNAL_BATCH_APPLIED, payload);
    }
}

impl ScenePublishable for SceneRuntime {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn try_set_batch(&mut self, batch: &Batch) -> DispatchResult {
        if self.fail_batch {
            return DispatchResult::failed("bulk channel unavailable");
        }
        self.batches += 1;
        for (category, payload) in batch {
            self.apply(category, payload);
        }
        self.applied_signal(batch.keys().map(|category| Value::from(category.as_str())).collect());
        DispatchResult::ok()
    }

    fn invoke(&mut self, method: &str, payload: &Payload) -> DispatchResult {
        self.invocations.push(method.to_string());
        if self.failing_methods.contains(method) {
            let error = format!("{method} raised an exception");
            self.emit(SIGNAL_ERROR_RAISED, scene_bridge::payload([("message", error.as_str())]));
            return DispatchResult::failed(error);
        }
        let Some(category) = self.method_categories.get(method).cloned() else {
            return DispatchResult::failed(format!("unknown method {method}"));
        };
        debug!("[scene] {method} applied to '{category}'");
        self.apply(&category, payload);
        self.applied_signal(vec![Value::from(category)]);
        DispatchResult::ok()
    }

    fn subscribe(&mut self, signal: &str, mode: ConnectionMode, handler: SignalHandler) -> bool {
        if !SIGNALS.iter().any(|known| *known == signal) {
            return false;
        }
        self.subscriptions.entry(signal.to_string()).or_default().push(Subscription { mode, handler });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn runtime() -> SceneRuntime {
        SceneRuntime::new(&BridgeRegistry::builtin())
    }

    #[test]
    fn batch_applied_waits_for_delivery() {
        let mut scene = runtime();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        assert!(scene.subscribe(
            SIGNAL_BATCH_APPLIED,
            ConnectionMode::Queued,
            Rc::new(move |payload: &Payload| sink.borrow_mut().push(payload.clone())),
        ));
        let batch = Batch::from([("lighting".to_string(), scene_bridge::payload([("exposure", 1.5)]))]);
        assert!(scene.try_set_batch(&batch).is_success());
        assert!(seen.borrow().is_empty());
        assert_eq!(scene.pending_signals(), 1);
        assert_eq!(scene.deliver_queued(), 1);
        assert_eq!(scene.pending_signals(), 0);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(scene.state("lighting").and_then(|p| p["exposure"].as_f64()), Some(1.5));
    }

    #[test]
    fn unknown_signal_is_refused() {
        let mut scene = runtime();
        assert!(!scene.subscribe("meshLoaded", ConnectionMode::Auto, Rc::new(|_: &Payload| {})));
    }

    #[test]
    fn failing_method_reports_error() {
        let mut scene = runtime();
        scene.fail_method("applyCameraSettings");
        let payload = scene_bridge::payload([("fov", 50.0)]);
        assert!(!scene.invoke("applyCameraSettings", &payload).is_success());
        assert!(scene.invoke("setCameraState", &payload).is_success());
        assert_eq!(scene.invocations(), ["applyCameraSettings", "setCameraState"]);
        assert!(!scene.invoke("noSuchMethod", &payload).is_success());

        scene.heal_method("applyCameraSettings");
        assert!(scene.invoke("applyCameraSettings", &payload).is_success());
    }
}
