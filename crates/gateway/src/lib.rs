pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod service;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use service::{Detection, DetectionResult, DetectionService};
pub use state::AppState;
