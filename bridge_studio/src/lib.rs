pub use scene_bridge::*;

pub mod cli;
pub mod scene_runtime;
pub mod session;
pub mod simulation;

pub use cli::StudioOverrides;
pub use scene_runtime::SceneRuntime;
pub use session::{print_summary, print_summary_json, SessionSummary, StudioSession};
