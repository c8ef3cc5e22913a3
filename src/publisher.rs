use crate::sanitize::Sanitizer;
use crate::surface::{DispatchResult, EchoGuard, ScenePublishable};
use crate::value::Batch;
use log::debug;

/// Sends a whole coalesced queue through the scene's bulk channel in one call.
#[derive(Debug, Default)]
pub struct BatchPublisher {
    sanitizer: Sanitizer,
    echo: EchoGuard,
}

impl BatchPublisher {
    pub fn new(sanitizer: Sanitizer, echo: EchoGuard) -> Self {
        Self { sanitizer, echo }
    }

    pub fn echo_guard(&self) -> &EchoGuard {
        &self.echo
    }

    /// Sanitizes `snapshot` and writes it once. No internal retry; a failure is returned as a value
    /// so the caller can fall back per category.
    pub fn publish(&self, surface: &mut dyn ScenePublishable, snapshot: &Batch) -> DispatchResult {
        if snapshot.is_empty() {
            return DispatchResult::ok();
        }
        let batch = self.sanitizer.sanitize_batch(snapshot);
        let result = {
            let _scope = self.echo.engage();
            surface.try_set_batch(&batch)
        };
        debug!(
            "[bridge] bulk transfer of {} categories: {}",
            batch.len(),
            result.error().unwrap_or("ok")
        );
        result
    }
}
