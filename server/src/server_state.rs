use std::sync::Arc;

use session_tracker_data_management::DataManager;

use crate::{
    config::ServerConfig,
    notifier::Notifier,
    pipeline::IngestionPipeline,
    subscriptions::SubscriptionRegistry,
    websocket::SocketHub,
};

pub struct ServerState {
    pub config: ServerConfig,
    pub data_manager: DataManager,
    pub registry: SubscriptionRegistry,
    // Outboxes of all connected websockets, the transport behind `notifier`.
    pub hub: Arc<SocketHub>,
    pub notifier: Notifier,
    pub pipeline: IngestionPipeline,
}

impl ServerState {
    pub fn new(config: ServerConfig, data_manager: DataManager) -> Self {
        let hub = Arc::new(SocketHub::new());
        let registry = SubscriptionRegistry::new(data_manager.clone());
        let notifier = Notifier::new(registry.clone(), hub.clone(), config.delivery_timeout());
        let pipeline = IngestionPipeline::new(
            data_manager.clone(),
            notifier.clone(),
            config.window_size as usize,
            config.aggregation_mode,
        );

        Self {
            config,
            data_manager,
            registry,
            hub,
            notifier,
            pipeline,
        }
    }
}
