use crate::bridge::BridgeConfig;
use crate::forward::RetryPolicy;
use clap::{ArgAction, Parser};
use std::time::Duration;

/// Drone telemetry gateway: UDP and MQTT ingress forwarding to the store
#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version)]
pub struct GatewayConfig {
    #[arg(long, env = "UDP_HOST", default_value = "0.0.0.0")]
    pub udp_host: String,

    #[arg(long, env = "UDP_PORT", default_value_t = 5001)]
    pub udp_port: u16,

    /// Send every datagram back to its sender
    #[arg(long, env = "UDP_ECHO")]
    pub udp_echo: bool,

    #[arg(long, env = "MQTT_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub mqtt_enabled: bool,

    #[arg(long, env = "MQTT_BROKER", default_value = "mqtt-broker")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_TOPIC", default_value = "drone/positions")]
    pub mqtt_topic: String,

    /// Connection attempts before giving up on a broker that was never reached
    #[arg(long, env = "MQTT_CONNECT_ATTEMPTS", default_value_t = 10)]
    pub mqtt_connect_attempts: u32,

    #[arg(long, env = "MQTT_KEEP_ALIVE_SECS", default_value_t = 30)]
    pub mqtt_keep_alive_secs: u64,

    /// Base URL of the store; records are posted to `<SINK_URL>/api/data`
    #[arg(long, env = "SINK_URL", default_value = "http://localhost:8000")]
    pub sink_url: String,

    #[arg(long, env = "FORWARD_TIMEOUT_MS", default_value_t = 2000)]
    pub forward_timeout_ms: u64,

    #[arg(long, env = "FORWARD_ATTEMPTS", default_value_t = 3)]
    pub forward_attempts: u32,

    #[arg(long, env = "FORWARD_BACKOFF_MS", default_value_t = 100)]
    pub forward_backoff_ms: u64,

    #[arg(long, env = "FORWARD_MAX_BACKOFF_MS", default_value_t = 2000)]
    pub forward_max_backoff_ms: u64,

    /// Messages decoded and forwarded concurrently; extra messages are dropped
    #[arg(long, env = "MAX_IN_FLIGHT", default_value_t = 1024)]
    pub max_in_flight: usize,

    #[arg(long, env = "SHUTDOWN_GRACE_MS", default_value_t = 5000)]
    pub shutdown_grace_ms: u64,

    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9100")]
    pub metrics_addr: String,
}

impl GatewayConfig {
    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.udp_host, self.udp_port)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.forward_attempts.max(1),
            initial_backoff: Duration::from_millis(self.forward_backoff_ms),
            max_backoff: Duration::from_millis(self.forward_max_backoff_ms),
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            host: self.mqtt_broker.clone(),
            port: self.mqtt_port,
            topic: self.mqtt_topic.clone(),
            connect_attempts: self.mqtt_connect_attempts,
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
