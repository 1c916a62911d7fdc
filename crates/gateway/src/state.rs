use crate::service::DetectionService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DetectionService>,
}

impl AppState {
    pub fn new(service: DetectionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
