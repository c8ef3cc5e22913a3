use crate::audit::{epoch_millis, AuditEvent, AuditRecord, AuditSink};
use crate::value::{Batch, Payload, Value};
use log::debug;
use uuid::Uuid;

/// Confirmation from the scene that the most recent hand-off was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AckSummary {
    pub timestamp_ms: f64,
    pub metadata: Payload,
}

impl AckSummary {
    pub fn new(timestamp_ms: f64) -> Self {
        Self { timestamp_ms, metadata: Payload::new() }
    }

    pub fn now() -> Self {
        Self::new(epoch_millis())
    }

    /// Reads `timestamp` (or `timestampMs`) from a signal payload; a missing stamp means "now".
    pub fn from_payload(payload: &Payload) -> Self {
        let timestamp_ms = ["timestamp", "timestampMs", "timestamp_ms"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_f64))
            .unwrap_or_else(|| {
                debug!("[bridge] ack without timestamp, stamping on receipt");
                epoch_millis()
            });
        Self { timestamp_ms, metadata: payload.clone() }
    }
}

/// The last batch handed to the scene, kept until its ack arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub id: String,
    pub sent_at_ms: f64,
    pub payloads: Batch,
}

impl PendingBatch {
    pub fn new(payloads: Batch) -> Self {
        Self { id: Uuid::new_v4().to_string(), sent_at_ms: epoch_millis(), payloads }
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.payloads.keys().map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct AckCoordinator {
    pending: Option<PendingBatch>,
    acked: u64,
    ignored: u64,
}

impl AckCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hand_off(&mut self, batch: PendingBatch) {
        if let Some(previous) = self.pending.replace(batch) {
            debug!("[bridge] batch {} superseded before its ack", previous.id);
        }
    }

    pub fn pending(&self) -> Option<&PendingBatch> {
        self.pending.as_ref()
    }

    pub fn acked(&self) -> u64 {
        self.acked
    }

    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    /// Marks every category of the pending batch applied and releases it. Stray or duplicate
    /// acks return an empty list and record nothing.
    pub fn on_ack(&mut self, summary: &AckSummary, audit: &mut dyn AuditSink) -> Vec<String> {
        let Some(batch) = self.pending.take() else {
            self.ignored += 1;
            return Vec::new();
        };
        self.acked += 1;
        let latency = summary.timestamp_ms - batch.sent_at_ms;
        let latency = (latency.is_finite() && latency >= 0.0).then_some(latency);
        let mut applied = Vec::with_capacity(batch.payloads.len());
        for (category, payload) in batch.payloads {
            let mut record = AuditRecord::new(AuditEvent::Applied, category.as_str())
                .values(None, Some(Value::Map(payload)))
                .applied(true)
                .batch(batch.id.as_str())
                .latency(latency);
            record.timestamp_ms = summary.timestamp_ms;
            audit.record(record);
            applied.push(category);
        }
        applied
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
