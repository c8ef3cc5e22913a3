use thiserror::Error;

/// Producer-side contract violations caught before a patch reaches the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Update for category '{category}' must be a mapping, got {kind}")]
    NonMappingPayload { category: String, kind: &'static str },

    #[error("Update category name must not be empty")]
    EmptyCategory,

    #[error("No scene surface attached; call `attach_surface()` first")]
    SurfaceMissing,
}

/// Signal bindings skipped during registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("Handler '{handler}' for signal '{signal}' is not provided by the host")]
    MissingHandler { signal: String, handler: String },

    #[error("Scene surface does not expose signal '{signal}' (handler '{handler}')")]
    MissingSignal { signal: String, handler: String },
}
