//! Telemetry aggregation gateway: receives drone reports over UDP and MQTT,
//! decodes them and forwards them to the store's HTTP sink.

pub mod bridge;
pub mod config;
pub mod errors;
pub mod forward;
pub mod listener;
pub mod metrics;
pub mod pipeline;

pub use bridge::{BridgeConfig, BridgeState, MqttBridge};
pub use forward::{Forward, ForwardError, HttpForwarder, RetryPolicy};
pub use listener::UdpListener;
pub use pipeline::{DispatchOutcome, Ingress, Pipeline};
