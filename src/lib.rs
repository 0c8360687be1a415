pub mod config;
pub mod device;
pub mod engine;
pub mod errors;
pub mod geometry;
pub mod llm;
pub mod perception;
pub mod server;

use std::sync::Arc;

pub use crate::config::{AgentConfig, PureVisionConfig, VisionConfig};
pub use crate::device::{DeviceInfo, DeviceSession, TouchStep, WindowSize};
pub use crate::engine::decision::{
    ActionDecision, ActionKind, Decided, DecisionEngine, DecisionMethod, PercentLocation,
};
pub use crate::engine::dispatcher::ActionDispatcher;
pub use crate::engine::session::{
    ActionStep, Session, SessionController, VerificationPoint, VerificationStatus, WaitOptions,
};
pub use crate::engine::settle::SettleConfig;
pub use crate::errors::{TapwrightError, TapwrightResult};
pub use crate::geometry::{Bounds, LogicalPoint, PhysicalPoint, ScaleFactor};
pub use crate::llm::provider::LlmProvider;
pub use crate::perception::observer::UiObserver;
pub use crate::perception::types::{CaptureMode, ElementType, UIElement, UIState};
pub use crate::server::ToolServer;

/// Initialize tracing from RUST_LOG, defaulting to info (or debug when
/// `verbose` is set).
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Wire a controller from config and a device session, then serve stdio
/// tools until the client disconnects.
pub async fn run_tool_server(device: Arc<dyn DeviceSession>) -> TapwrightResult<()> {
    let _ = dotenvy::dotenv();
    let config = config::load_config()?;
    init_tracing(config.verbose);

    let llm = llm::provider_from_config(&config)?;
    let controller = SessionController::new(device, llm, config);
    ToolServer::new(controller).serve().await
}
