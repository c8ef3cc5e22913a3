use crate::value::{Batch, Payload};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Outcome of a transfer or remote call. Failures are values, never panics or `Err`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl<E: fmt::Display> From<Result<(), E>> for DispatchResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

/// How a scene signal reaches its host handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Handler runs inside the emitting call.
    Direct,
    /// Emission is parked and delivered on the host's next turn.
    Queued,
    /// Surface decides.
    #[default]
    Auto,
}

impl ConnectionMode {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionMode::Direct => "direct",
            ConnectionMode::Queued => "queued",
            ConnectionMode::Auto => "auto",
        }
    }
}

pub type SignalHandler = Rc<dyn Fn(&Payload)>;

/// Capability interface the scene runtime exposes to the bridge.
///
/// Implementations wrap whatever binding the scene runtime offers; the bridge never looks up
/// methods or signals by reflection.
pub trait ScenePublishable {
    /// Whether the surface is constructed and able to take writes.
    fn is_ready(&self) -> bool {
        true
    }

    /// Writes a whole category map through the shared bulk channel.
    fn try_set_batch(&mut self, batch: &Batch) -> DispatchResult;

    /// Calls one named remote method with a single payload argument.
    fn invoke(&mut self, method: &str, payload: &Payload) -> DispatchResult;

    /// Binds a scene signal to a host handler. Returns `false` if the surface has no such signal.
    fn subscribe(&mut self, signal: &str, mode: ConnectionMode, handler: SignalHandler) -> bool;
}

impl<T: ScenePublishable + ?Sized> ScenePublishable for Box<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn try_set_batch(&mut self, batch: &Batch) -> DispatchResult {
        (**self).try_set_batch(batch)
    }

    fn invoke(&mut self, method: &str, payload: &Payload) -> DispatchResult {
        (**self).invoke(method, payload)
    }

    fn subscribe(&mut self, signal: &str, mode: ConnectionMode, handler: SignalHandler) -> bool {
        (**self).subscribe(signal, mode, handler)
    }
}

/// Shared surfaces: the host keeps one handle to drive the runtime and gives the bridge another.
/// Handlers fired during a write must not borrow the same surface again.
impl<T: ScenePublishable + ?Sized> ScenePublishable for Rc<RefCell<T>> {
    fn is_ready(&self) -> bool {
        self.borrow().is_ready()
    }

    fn try_set_batch(&mut self, batch: &Batch) -> DispatchResult {
        self.borrow_mut().try_set_batch(batch)
    }

    fn invoke(&mut self, method: &str, payload: &Payload) -> DispatchResult {
        self.borrow_mut().invoke(method, payload)
    }

    fn subscribe(&mut self, signal: &str, mode: ConnectionMode, handler: SignalHandler) -> bool {
        self.borrow_mut().subscribe(signal, mode, handler)
    }
}

/// Flag raised while the bridge writes into the scene, so the scene's own change notifications
/// are not taken for fresh user edits.
#[derive(Clone, Default)]
pub struct EchoGuard(Rc<Cell<u32>>);

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suppressed(&self) -> bool {
        self.0.get() > 0
    }

    pub fn engage(&self) -> EchoScope {
        self.0.set(self.0.get() + 1);
        EchoScope(self.0.clone())
    }
}

impl fmt::Debug for EchoGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchoGuard").field("depth", &self.0.get()).finish()
    }
}

#[must_use = "the echo guard is released as soon as the scope is dropped"]
pub struct EchoScope(Rc<Cell<u32>>);

impl Drop for EchoScope {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Named host-side handlers that registry signal bindings resolve against.
#[derive(Clone, Default)]
pub struct HostHandlers {
    handlers: BTreeMap<String, SignalHandler>,
}

impl HostHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Payload) + 'static,
    {
        self.handlers.insert(name.into(), Rc::new(handler));
    }

    pub fn with<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Payload) + 'static,
    {
        self.insert(name, handler);
        self
    }

    /// Adds every handler from `other`, keeping existing entries on name clashes.
    pub fn extend(&mut self, other: HostHandlers) {
        for (name, handler) in other.handlers {
            self.handlers.entry(name).or_insert(handler);
        }
    }

    pub fn get(&self, name: &str) -> Option<SignalHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HostHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}
