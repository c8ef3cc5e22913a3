pub mod ack;
pub mod audit;
pub mod bridge;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fallback;
pub mod marshal;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod sanitize;
pub mod scheduler;
pub mod status;
pub mod surface;
pub mod value;
#[cfg(feature = "watch")]
pub mod watch;

pub use ack::AckSummary;
pub use audit::{AuditEvent, AuditLogHandle, AuditRecord, AuditSink, SyncHealth};
pub use bridge::{CategoryOutcome, CycleState, FlushOutcome, FlushReport, SceneBridge};
pub use config::{BridgeConfig, BridgeConfigOverrides};
pub use error::{BindingError, BridgeError};
pub use marshal::ProducerHandle;
pub use registry::{BridgeRegistry, RegistrationReport, RouteTable};
pub use surface::{ConnectionMode, DispatchResult, EchoGuard, HostHandlers, ScenePublishable, SignalHandler};
pub use value::{payload, Batch, Payload, Value};
