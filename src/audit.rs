use crate::value::Value;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::cell::{Ref, RefCell};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_AUDIT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Queued,
    Suppressed,
    BatchDispatched,
    BatchFailed,
    FallbackAttempt,
    Applied,
    Unresolved,
}

impl AuditEvent {
    pub fn label(self) -> &'static str {
        match self {
            AuditEvent::Queued => "queued",
            AuditEvent::Suppressed => "suppressed",
            AuditEvent::BatchDispatched => "batch_dispatched",
            AuditEvent::BatchFailed => "batch_failed",
            AuditEvent::FallbackAttempt => "fallback_attempt",
            AuditEvent::Applied => "applied",
            AuditEvent::Unresolved => "unresolved",
        }
    }
}

/// Structured record for every queue/dispatch/ack/failure step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub category: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub applied: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub timestamp_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

impl AuditRecord {
    pub fn new(event: AuditEvent, category: impl Into<String>) -> Self {
        Self {
            event,
            category: category.into(),
            old_value: None,
            new_value: None,
            applied: false,
            error: None,
            method: None,
            batch_id: None,
            timestamp_ms: epoch_millis(),
            latency_ms: None,
        }
    }

    pub fn values(mut self, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }

    pub fn error(mut self, error: Option<impl Into<String>>) -> Self {
        self.error = error.map(Into::into);
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn latency(mut self, latency_ms: Option<f64>) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

pub fn epoch_millis() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64() * 1_000.0).unwrap_or(0.0)
}

/// Receives one record per bridge step. Sinks must not panic; the host keeps running regardless.
pub trait AuditSink {
    fn record(&mut self, record: AuditRecord);
}

/// Bounded in-memory history; drops the oldest record when full.
#[derive(Debug)]
pub struct AuditLog {
    records: VecDeque<AuditRecord>,
    capacity: usize,
    dropped: u64,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self { records: VecDeque::with_capacity(capacity.min(1_024)), capacity: capacity.max(1), dropped: 0 }
    }

    pub fn records(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter()
    }

    pub fn of_event(&self, event: AuditEvent) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter().filter(move |record| record.event == event)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn health(&self) -> SyncHealth {
        SyncHealth::from_records(self.records.iter())
    }
}

impl AuditSink for AuditLog {
    fn record(&mut self, record: AuditRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(record);
    }
}

/// Cloneable handle so the host can read the history the bridge writes into.
#[derive(Clone, Default)]
pub struct AuditLogHandle(Rc<RefCell<AuditLog>>);

impl AuditLogHandle {
    pub fn new(capacity: usize) -> Self {
        Self(Rc::new(RefCell::new(AuditLog::new(capacity))))
    }

    pub fn borrow(&self) -> Ref<'_, AuditLog> {
        self.0.borrow()
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.0.borrow().records().cloned().collect()
    }

    pub fn health(&self) -> SyncHealth {
        self.0.borrow().health()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl AuditSink for AuditLogHandle {
    fn record(&mut self, record: AuditRecord) {
        self.0.borrow_mut().record(record);
    }
}

/// Writes to both sinks, `A` first.
impl<A: AuditSink, B: AuditSink> AuditSink for (A, B) {
    fn record(&mut self, record: AuditRecord) {
        self.0.record(record.clone());
        self.1.record(record);
    }
}

impl AuditSink for Box<dyn AuditSink> {
    fn record(&mut self, record: AuditRecord) {
        (**self).record(record);
    }
}

/// Forwards records to the `log` facade.
#[derive(Debug, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&mut self, record: AuditRecord) {
        match (&record.error, record.event) {
            (Some(err), event) => warn!("[audit] {} {}: {err}", event.label(), record.category),
            (None, AuditEvent::Unresolved) => warn!("[audit] unresolved {}", record.category),
            (None, event) => info!(
                "[audit] {} {}{}",
                event.label(),
                record.category,
                record.latency_ms.map(|ms| format!(" ({ms:.1} ms)")).unwrap_or_default()
            ),
        }
    }
}

/// One JSON object per line, for offline analyzers.
pub struct JsonLinesAuditSink<W: Write> {
    writer: W,
    failed: bool,
}

impl<W: Write> JsonLinesAuditSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, failed: false }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesAuditSink<BufWriter<File>> {
    pub fn append_to(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> AuditSink for JsonLinesAuditSink<W> {
    fn record(&mut self, record: AuditRecord) {
        let result = serde_json::to_writer(&mut self.writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(err) = result {
            // First failure only.
            if !self.failed {
                warn!("[audit] failed to write audit line: {err}");
                self.failed = true;
            }
        }
    }
}

/// Synchronization health derived from an audit trail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SyncHealth {
    pub queued: u64,
    pub dispatched: u64,
    pub applied: u64,
    pub suppressed: u64,
    pub failed_attempts: u64,
    pub unresolved: u64,
    pub mean_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl SyncHealth {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AuditRecord>) -> Self {
        let mut health = SyncHealth::default();
        let mut latency_total = 0.0;
        let mut latency_samples = 0u64;
        for record in records {
            match record.event {
                AuditEvent::Queued => health.queued += 1,
                AuditEvent::Suppressed => health.suppressed += 1,
                AuditEvent::BatchDispatched => health.dispatched += 1,
                AuditEvent::BatchFailed => health.failed_attempts += 1,
                AuditEvent::FallbackAttempt if record.applied => health.dispatched += 1,
                AuditEvent::FallbackAttempt => health.failed_attempts += 1,
                AuditEvent::Unresolved => health.unresolved += 1,
                AuditEvent::Applied => {
                    health.applied += 1;
                    if let Some(latency) = record.latency_ms {
                        latency_total += latency;
                        latency_samples += 1;
                        health.max_latency_ms =
                            Some(health.max_latency_ms.map_or(latency, |max: f64| max.max(latency)));
                    }
                }
            }
        }
        if latency_samples > 0 {
            health.mean_latency_ms = Some(latency_total / latency_samples as f64);
        }
        health
    }

    /// Fraction of dispatched category payloads the scene confirmed.
    pub fn sync_rate(&self) -> Option<f64> {
        if self.dispatched == 0 {
            None
        } else {
            Some((self.applied as f64 / self.dispatched as f64).min(1.0))
        }
    }
}
