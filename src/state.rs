use crate::{config::GatewaySettings, services::object_store::ObjectStore};
use std::sync::Arc;

/// Shared router state: the store collaborator and the gateway settings.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub settings: Arc<GatewaySettings>,
}

impl AppState {
    pub fn new(store: Arc<dyn ObjectStore>, settings: GatewaySettings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }
}
