use crate::ack::{AckCoordinator, AckSummary, PendingBatch};
use crate::audit::{AuditEvent, AuditLogHandle, AuditRecord, AuditSink, JsonLinesAuditSink, LogAuditSink};
use crate::config::BridgeConfig;
use crate::dedup::DedupGuard;
use crate::error::BridgeError;
use crate::fallback::FallbackInvoker;
use crate::marshal::{BridgeInbox, BridgeMessage, ProducerHandle};
use crate::publisher::BatchPublisher;
use crate::queue::UpdateQueue;
use crate::registry::{BridgeRegistry, RegistrationReport, RegistryService, RouteTable};
use crate::sanitize::Sanitizer;
use crate::scheduler::DebounceScheduler;
use crate::status::{LogStatusSink, StatusNotice, StatusSink};
use crate::surface::{EchoGuard, HostHandlers, ScenePublishable};
use crate::value::{Batch, Payload, Value};
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

pub const ACK_HANDLER: &str = "on_batch_applied";
pub const READY_HANDLER: &str = "on_scene_ready";
pub const ERROR_HANDLER: &str = "on_scene_error";

/// Where a category sits in its update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Queued,
    Flushing,
    Published,
    PartiallyApplied,
    Unresolved,
    Applied,
}

impl CycleState {
    pub fn label(self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Queued => "queued",
            CycleState::Flushing => "flushing",
            CycleState::Published => "published",
            CycleState::PartiallyApplied => "partially_applied",
            CycleState::Unresolved => "unresolved",
            CycleState::Applied => "applied",
        }
    }

    /// `Applied` is the tail of a finished cycle and counts as idle.
    pub fn is_idle(self) -> bool {
        matches!(self, CycleState::Idle | CycleState::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    NotReady,
    Suppressed,
    Published,
    PartiallyApplied,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryOutcome {
    Suppressed,
    Published,
    Fallback { method: String },
    Unresolved { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    pub batch_id: Option<String>,
    pub categories: BTreeMap<String, CategoryOutcome>,
    pub transfer_error: Option<String>,
}

impl FlushReport {
    fn new(outcome: FlushOutcome) -> Self {
        Self { outcome, batch_id: None, categories: BTreeMap::new(), transfer_error: None }
    }

    pub fn outcome_for(&self, category: &str) -> Option<&CategoryOutcome> {
        self.categories.get(category)
    }
}

/// Host-side end of the scene synchronization bridge.
///
/// Producers call [`queue_update`](Self::queue_update) (or send through a [`ProducerHandle`]); the
/// host calls [`pump`](Self::pump) once per turn. Everything here runs on the thread that owns the
/// bridge.
pub struct SceneBridge {
    config: BridgeConfig,
    registry: RegistryService,
    queue: UpdateQueue,
    scheduler: DebounceScheduler,
    sanitizer: Sanitizer,
    dedup: DedupGuard,
    publisher: BatchPublisher,
    fallback: FallbackInvoker,
    acks: AckCoordinator,
    inbox: BridgeInbox,
    echo: EchoGuard,
    history: AuditLogHandle,
    audit: Box<dyn AuditSink>,
    status: Box<dyn StatusSink>,
    surface: Option<Box<dyn ScenePublishable>>,
    states: BTreeMap<String, CycleState>,
    flushes: u64,
}

impl SceneBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let mut registry = RegistryService::from_path(config.registry_path.as_deref());
        registry.get();
        let audit = default_audit_sink(&config);
        Self::assemble(config, registry, audit)
    }

    fn assemble(config: BridgeConfig, registry: RegistryService, audit: Box<dyn AuditSink>) -> Self {
        let echo = EchoGuard::new();
        let sanitizer = Sanitizer::new(config.alias_keys);
        let history = AuditLogHandle::new(config.audit.capacity);
        Self {
            registry,
            queue: UpdateQueue::new(),
            scheduler: DebounceScheduler::new(config.retry_delay()),
            sanitizer,
            dedup: config.dedup.build_guard(),
            publisher: BatchPublisher::new(sanitizer, echo.clone()),
            fallback: FallbackInvoker::new(echo.clone()),
            acks: AckCoordinator::new(),
            inbox: BridgeInbox::new(),
            echo,
            audit: Box::new((history.clone(), audit)),
            history,
            status: Box::new(LogStatusSink),
            surface: None,
            states: BTreeMap::new(),
            flushes: 0,
            config,
        }
    }

    pub fn with_registry(mut self, registry: BridgeRegistry) -> Self {
        self.registry = RegistryService::with_registry(registry);
        self
    }

    /// Replaces the default sink. The bounded history keeps recording either way.
    pub fn with_audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Box::new((self.history.clone(), sink));
        self
    }

    pub fn with_status_sink(mut self, sink: impl StatusSink + 'static) -> Self {
        self.status = Box::new(sink);
        self
    }

    pub fn attach_surface(&mut self, surface: impl ScenePublishable + 'static) {
        self.surface = Some(Box::new(surface));
        if self.scheduler.is_armed() || !self.queue.is_empty() {
            self.scheduler.arm(Instant::now());
        }
    }

    pub fn detach_surface(&mut self) -> Option<Box<dyn ScenePublishable>> {
        self.surface.take()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Most recent audit records, bounded by `audit.capacity`.
    pub fn audit_history(&self) -> &AuditLogHandle {
        &self.history
    }

    pub fn echo_guard(&self) -> EchoGuard {
        self.echo.clone()
    }

    pub fn producer(&self) -> ProducerHandle {
        self.inbox.producer()
    }

    pub fn surface_ready(&self) -> bool {
        self.surface.as_ref().map(|surface| surface.is_ready()).unwrap_or(false)
    }

    pub fn is_flush_armed(&self) -> bool {
        self.scheduler.is_armed()
    }

    pub fn queued(&self, category: &str) -> Option<&Payload> {
        self.queue.get(category)
    }

    pub fn pending_batch(&self) -> Option<&PendingBatch> {
        self.acks.pending()
    }

    pub fn category_state(&self, category: &str) -> CycleState {
        self.states.get(category).copied().unwrap_or_default()
    }

    pub fn dedup(&self) -> &DedupGuard {
        &self.dedup
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Deep-merges a partial patch for `category` and arms the debounce timer.
    /// Empty patches and empty category names are ignored.
    pub fn queue_update(&mut self, category: &str, payload: Payload) -> bool {
        self.queue_update_at(category, payload, Instant::now())
    }

    /// Producer entry point for untyped values; anything but a mapping is a contract violation.
    pub fn queue_update_value(&mut self, category: &str, value: Value) -> Result<bool, BridgeError> {
        if category.trim().is_empty() {
            return Err(BridgeError::EmptyCategory);
        }
        match value {
            Value::Map(payload) => Ok(self.queue_update(category, payload)),
            other => Err(BridgeError::NonMappingPayload { category: category.to_string(), kind: other.kind() }),
        }
    }

    /// [`queue_update`](Self::queue_update) against a host-supplied clock, for hosts that drive
    /// [`pump_at`](Self::pump_at).
    pub fn queue_update_at(&mut self, category: &str, payload: Payload, now: Instant) -> bool {
        if category.trim().is_empty() {
            warn!("[bridge] dropping update with an empty category name");
            return false;
        }
        let previous = self.queue.get(category).cloned();
        if !self.queue.queue(category, payload) {
            return false;
        }
        let merged = self.queue.get(category).cloned();
        self.audit.record(
            AuditRecord::new(AuditEvent::Queued, category)
                .values(previous.map(Value::Map), merged.map(Value::Map)),
        );
        self.states.insert(category.to_string(), CycleState::Queued);
        self.scheduler.arm(now);
        true
    }

    /// One host turn: drain marshaled messages, then flush if the timer is due.
    pub fn pump(&mut self) -> Option<FlushReport> {
        self.pump_at(Instant::now())
    }

    pub fn pump_at(&mut self, now: Instant) -> Option<FlushReport> {
        for message in self.inbox.drain() {
            match message {
                BridgeMessage::Update { category, payload } => {
                    self.queue_update_at(&category, payload, now);
                }
                BridgeMessage::Ack(summary) => self.on_ack(&summary),
            }
        }
        if !self.scheduler.poll(now) || self.queue.is_empty() {
            return None;
        }
        if !self.surface_ready() {
            debug!("[bridge] scene surface not ready, retrying in {:?}", self.scheduler.retry_delay());
            self.scheduler.arm_retry(now);
            return Some(FlushReport::new(FlushOutcome::NotReady));
        }
        Some(self.flush_ready())
    }

    /// Manual flush. When the surface is missing or not ready the queue is kept and a retry armed.
    pub fn flush(&mut self) -> FlushReport {
        if self.queue.is_empty() {
            return FlushReport::new(FlushOutcome::Empty);
        }
        if !self.surface_ready() {
            self.scheduler.arm_retry(Instant::now());
            return FlushReport::new(FlushOutcome::NotReady);
        }
        self.flush_ready()
    }

    fn flush_ready(&mut self) -> FlushReport {
        let Some(mut surface) = self.surface.take() else {
            return FlushReport::new(FlushOutcome::NotReady);
        };
        self.scheduler.mark_flushed();
        self.flushes += 1;
        let report = self.dispatch(&mut *surface);
        self.surface = Some(surface);
        report
    }

    fn dispatch(&mut self, surface: &mut dyn ScenePublishable) -> FlushReport {
        let snapshot = self.queue.take_and_clear();
        let mut report = FlushReport::new(FlushOutcome::Published);
        let mut previous: BTreeMap<String, Option<Payload>> = BTreeMap::new();
        let mut gated = Batch::new();

        for (category, payload) in snapshot {
            self.states.insert(category.clone(), CycleState::Flushing);
            let sanitized = self.sanitizer.sanitize_payload(&payload);
            let before = self.dedup.last_snapshot(&category).cloned();
            if self.dedup.should_dispatch(&category, &sanitized) {
                previous.insert(category.clone(), before);
                gated.insert(category, sanitized);
            } else {
                debug!("[bridge] '{category}' unchanged within tolerance, not dispatching");
                self.audit.record(
                    AuditRecord::new(AuditEvent::Suppressed, category.as_str())
                        .values(before.map(Value::Map), Some(Value::Map(sanitized))),
                );
                self.states.insert(category.clone(), CycleState::Idle);
                report.categories.insert(category, CategoryOutcome::Suppressed);
            }
        }

        if gated.is_empty() {
            report.outcome = FlushOutcome::Suppressed;
            return report;
        }

        let batch = PendingBatch::new(gated);
        report.batch_id = Some(batch.id.clone());
        let transfer = self.publisher.publish(surface, &batch.payloads);

        if transfer.is_success() {
            for (category, payload) in &batch.payloads {
                let old = previous.remove(category).flatten().map(Value::Map);
                self.audit.record(
                    AuditRecord::new(AuditEvent::BatchDispatched, category.as_str())
                        .values(old, Some(Value::Map(payload.clone())))
                        .batch(batch.id.as_str()),
                );
                self.states.insert(category.clone(), CycleState::Published);
                report.categories.insert(category.clone(), CategoryOutcome::Published);
            }
            self.acks.hand_off(batch);
            return report;
        }

        let error = transfer.error.unwrap_or_else(|| "bulk transfer failed".to_string());
        warn!("[bridge] bulk transfer failed, falling back per category: {error}");
        self.status.notify(StatusNotice::transient(format!("Scene sync failed ({error}); retrying per category")));
        report.transfer_error = Some(error.clone());

        let registry = self.registry.get();
        let mut applied = Batch::new();
        let mut unresolved = Vec::new();
        for (category, payload) in batch.payloads {
            let before = previous.remove(&category).flatten();
            let old = before.clone().map(Value::Map);
            self.audit.record(
                AuditRecord::new(AuditEvent::BatchFailed, category.as_str())
                    .values(old.clone(), Some(Value::Map(payload.clone())))
                    .error(Some(error.as_str()))
                    .batch(batch.id.as_str()),
            );
            let outcome = self.fallback.invoke(&registry, surface, &category, &payload);
            for attempt in &outcome.attempts {
                self.audit.record(
                    AuditRecord::new(AuditEvent::FallbackAttempt, category.as_str())
                        .values(old.clone(), Some(Value::Map(payload.clone())))
                        .applied(attempt.result.is_success())
                        .error(attempt.result.error.clone())
                        .method(attempt.method.as_str())
                        .batch(batch.id.as_str()),
                );
            }
            match outcome.applied_by {
                Some(method) => {
                    debug!("[bridge] '{category}' applied through {method}");
                    self.states.insert(category.clone(), CycleState::PartiallyApplied);
                    report.categories.insert(category.clone(), CategoryOutcome::Fallback { method });
                    applied.insert(category, payload);
                }
                None => {
                    let reason = outcome.failure_reason(&category);
                    self.audit.record(
                        AuditRecord::new(AuditEvent::Unresolved, category.as_str())
                            .values(old, Some(Value::Map(payload)))
                            .error(Some(reason.as_str()))
                            .batch(batch.id.as_str()),
                    );
                    self.dedup.restore(&category, before);
                    self.states.insert(category.clone(), CycleState::Unresolved);
                    report.categories.insert(category.clone(), CategoryOutcome::Unresolved { error: reason });
                    unresolved.push(category);
                }
            }
        }

        if applied.is_empty() {
            report.outcome = FlushOutcome::Unresolved;
        } else {
            report.outcome = FlushOutcome::PartiallyApplied;
            self.acks.hand_off(PendingBatch { id: batch.id, sent_at_ms: batch.sent_at_ms, payloads: applied });
        }
        if !unresolved.is_empty() {
            self.status.notify(StatusNotice::dialog(
                "Scene sync incomplete",
                format!("Could not apply: {}. Changes will be retried on the next edit.", unresolved.join(", ")),
            ));
        }
        report
    }

    /// Closes the loop for the most recent hand-off. Stray or duplicate acks are ignored.
    pub fn on_ack(&mut self, summary: &AckSummary) {
        let applied = self.acks.on_ack(summary, &mut *self.audit);
        if applied.is_empty() {
            debug!("[bridge] ignoring ack with no pending batch");
            return;
        }
        for category in applied {
            let state = self.states.entry(category).or_default();
            // A newer patch may already be queued; keep it visible.
            if *state != CycleState::Queued {
                *state = CycleState::Applied;
            }
        }
    }

    pub fn describe_routes(&self) -> RouteTable {
        match self.registry.current() {
            Some(registry) => registry.describe_routes(),
            None => BridgeRegistry::builtin().describe_routes(),
        }
    }

    pub fn registry(&mut self) -> Arc<BridgeRegistry> {
        self.registry.get()
    }

    /// Re-reads the registry source; the previous registry stays active on failure.
    pub fn reload_registry(&mut self) -> Result<RouteTable> {
        let registry = self.registry.reload()?;
        info!("[bridge] registry reloaded from {}", registry.origin());
        Ok(registry.describe_routes())
    }

    /// Handlers the bridge itself provides for registry signal bindings.
    pub fn host_handlers(&self) -> HostHandlers {
        let producer = self.producer();
        HostHandlers::new()
            .with(ACK_HANDLER, move |payload: &Payload| {
                if !producer.ack(AckSummary::from_payload(payload)) {
                    debug!("[bridge] ack arrived after the bridge was dropped");
                }
            })
            .with(READY_HANDLER, |_payload: &Payload| info!("[bridge] scene surface reported ready"))
            .with(ERROR_HANDLER, |payload: &Payload| {
                warn!("[bridge] scene reported an error: {}", Value::Map(payload.clone()))
            })
    }

    /// Binds registry signals on the attached surface. `host` handlers take precedence over the
    /// bridge's own handlers of the same name.
    pub fn register_signals(&mut self, host: &HostHandlers) -> Result<RegistrationReport, BridgeError> {
        let registry = self.registry.get();
        let mut handlers = host.clone();
        handlers.extend(self.host_handlers());
        let surface = self.surface.as_mut().ok_or(BridgeError::SurfaceMissing)?;
        let report = registry.register(&handlers, &mut **surface);
        info!(
            "[bridge] bound {} signal(s), skipped {}",
            report.bound.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Returns the bridge to a freshly constructed state, keeping sinks and surface.
    pub fn reset(&mut self) {
        self.queue.take_and_clear();
        self.scheduler = DebounceScheduler::new(self.config.retry_delay());
        self.dedup = self.config.dedup.build_guard();
        self.acks.clear();
        self.states.clear();
        self.inbox.drain();
        self.flushes = 0;
        self.history.clear();
        self.registry.reset();
        self.registry.get();
    }
}

fn default_audit_sink(config: &BridgeConfig) -> Box<dyn AuditSink> {
    let Some(path) = &config.audit.jsonl_path else {
        return Box::new(LogAuditSink);
    };
    match JsonLinesAuditSink::append_to(path) {
        Ok(sink) => Box::new((LogAuditSink, sink)),
        Err(err) => {
            warn!("[bridge] {err:?}. Audit records go to the log only.");
            Box::new(LogAuditSink)
        }
    }
}
