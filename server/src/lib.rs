pub mod aggregation_listener;
pub mod config;
pub mod error;
pub mod notifier;
pub mod pipeline;
pub mod routes;
pub mod server_state;
pub mod subscriptions;
pub mod websocket;
