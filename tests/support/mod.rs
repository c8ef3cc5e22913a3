#![allow(dead_code)]

use scene_bridge::{Batch, ConnectionMode, DispatchResult, EchoGuard, Payload, ScenePublishable, SignalHandler};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Batch(Batch),
    Invoke(String, Payload),
}

/// Scriptable scene surface that records every call made through it.
#[derive(Default)]
pub struct RecordingSurface {
    pub ready: bool,
    pub fail_batch: bool,
    pub failing: BTreeSet<String>,
    /// Failing calls report no error text.
    pub silent_failures: bool,
    pub signals: BTreeSet<String>,
    pub calls: Vec<Call>,
    pub subscriptions: BTreeMap<String, (ConnectionMode, SignalHandler)>,
    /// Echo flag observed at each call, when a guard is attached.
    pub echo: Option<EchoGuard>,
    pub echo_seen: Vec<bool>,
}

impl RecordingSurface {
    pub fn ready() -> Self {
        Self { ready: true, ..Default::default() }
    }

    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    pub fn with_signals(mut self, signals: &[&str]) -> Self {
        self.signals = signals.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing_batch(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    pub fn failing_methods(mut self, methods: &[&str]) -> Self {
        self.failing = methods.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent_failures = true;
        self
    }

    pub fn invoked(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Invoke(method, _) => Some(method.clone()),
                Call::Batch(_) => None,
            })
            .collect()
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Batch(batch) => Some(batch.clone()),
                Call::Invoke(..) => None,
            })
            .collect()
    }

    pub fn fire(&self, signal: &str, payload: &Payload) {
        if let Some((_, handler)) = self.subscriptions.get(signal) {
            handler(payload);
        }
    }

    fn failure(&self, error: String) -> DispatchResult {
        if self.silent_failures {
            DispatchResult { success: false, error: None }
        } else {
            DispatchResult::failed(error)
        }
    }

    fn observe_echo(&mut self) {
        if let Some(echo) = &self.echo {
            self.echo_seen.push(echo.is_suppressed());
        }
    }
}

impl ScenePublishable for RecordingSurface {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn try_set_batch(&mut self, batch: &Batch) -> DispatchResult {
        self.observe_echo();
        self.calls.push(Call::Batch(batch.clone()));
        if self.fail_batch {
            self.failure("bulk property rejected".to_string())
        } else {
            DispatchResult::ok()
        }
    }

    fn invoke(&mut self, method: &str, payload: &Payload) -> DispatchResult {
        self.observe_echo();
        self.calls.push(Call::Invoke(method.to_string(), payload.clone()));
        if self.failing.contains(method) {
            self.failure(format!("{method} failed"))
        } else {
            DispatchResult::ok()
        }
    }

    fn subscribe(&mut self, signal: &str, mode: ConnectionMode, handler: SignalHandler) -> bool {
        if !self.signals.contains(signal) {
            return false;
        }
        self.subscriptions.insert(signal.to_string(), (mode, handler));
        true
    }
}
