use crate::config::GatewayConfig;

pub const SERVICE_NAME: &str = "gateway";

pub fn setup_logging(config: &GatewayConfig) {
    common::setup_logging(SERVICE_NAME, config.environment);
}
