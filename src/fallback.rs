use crate::registry::BridgeRegistry;
use crate::surface::{DispatchResult, EchoGuard, ScenePublishable};
use crate::value::Payload;
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodAttempt {
    pub method: String,
    pub result: DispatchResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub attempts: Vec<MethodAttempt>,
    pub applied_by: Option<String>,
}

impl FallbackOutcome {
    pub fn applied(&self) -> bool {
        self.applied_by.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|attempt| attempt.result.error())
    }

    /// Why the category stayed unresolved, for the audit trail and the report.
    pub fn failure_reason(&self, category: &str) -> String {
        if self.attempts.is_empty() {
            return format!("no fallback methods registered for '{category}'");
        }
        match self.last_error() {
            Some(error) => error.to_string(),
            None => format!("all {} candidate methods failed for '{category}'", self.attempts.len()),
        }
    }
}

/// Per-category path used when the bulk transfer fails: tries each registered method in order
/// and stops at the first success.
#[derive(Debug, Default)]
pub struct FallbackInvoker {
    echo: EchoGuard,
}

impl FallbackInvoker {
    pub fn new(echo: EchoGuard) -> Self {
        Self { echo }
    }

    pub fn invoke(
        &self,
        registry: &BridgeRegistry,
        surface: &mut dyn ScenePublishable,
        category: &str,
        payload: &Payload,
    ) -> FallbackOutcome {
        let mut outcome = FallbackOutcome::default();
        let methods = registry.methods_for(category);
        if methods.is_empty() {
            debug!("[bridge] no fallback methods registered for '{category}'");
            return outcome;
        }
        for method in methods {
            let result = {
                let _scope = self.echo.engage();
                surface.invoke(method, payload)
            };
            let success = result.is_success();
            outcome.attempts.push(MethodAttempt { method: method.clone(), result });
            if success {
                outcome.applied_by = Some(method.clone());
                break;
            }
        }
        outcome
    }
}
