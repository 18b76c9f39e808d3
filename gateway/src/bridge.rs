use crate::errors::{Error, Result};
use crate::forward::{Forward, RetryPolicy};
use crate::pipeline::{Ingress, Pipeline};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INITIAL_RECONNECT_MS: u64 = 500;
const MAX_RECONNECT_MS: u64 = 30_000;
const REQUEST_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// Attempts allowed before the first successful connection
    pub connect_attempts: u32,
    pub keep_alive: Duration,
}

impl BridgeConfig {
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// MQTT ingress. Every publish on the configured topic goes through the same
/// pipeline as a UDP datagram.
pub struct MqttBridge {
    client: AsyncClient,
    eventloop: EventLoop,
    config: BridgeConfig,
    reconnect: RetryPolicy,
    state: BridgeState,
    connected_once: bool,
}

impl MqttBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let client_id = format!("gateway-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        Self {
            client,
            eventloop,
            reconnect: RetryPolicy {
                max_attempts: config.connect_attempts.max(1),
                initial_backoff: Duration::from_millis(INITIAL_RECONNECT_MS),
                max_backoff: Duration::from_millis(MAX_RECONNECT_MS),
            },
            config,
            state: BridgeState::Disconnected,
            connected_once: false,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Drives the connection until `cancel` fires.
    ///
    /// Fails with [`Error::Connect`] only if the broker was never reached
    /// within the allowed attempts; once connected, the bridge reconnects
    /// indefinitely with exponential backoff.
    pub async fn run<F: Forward>(mut self, pipeline: Pipeline<F>, cancel: CancellationToken) -> Result<()> {
        info!(
            "Connecting to MQTT broker at {}, topic {}",
            self.config.broker_addr(),
            self.config.topic
        );
        self.state = BridgeState::Connecting;
        let mut failures: u32 = 0;

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(event) => {
                    if self.handle_event(event, &pipeline)? {
                        failures = 0;
                    }
                }
                Err(e) => {
                    failures += 1;
                    self.state = BridgeState::Disconnected;

                    if !self.connected_once && failures >= self.reconnect.max_attempts {
                        error!("Giving up on MQTT broker {}: {}", self.config.broker_addr(), e);
                        return Err(Error::Connect {
                            addr: self.config.broker_addr(),
                            attempts: failures,
                            reason: e.to_string(),
                        });
                    }

                    let delay = self.reconnect.backoff(failures);
                    warn!("MQTT connection error: {}. Reconnecting in {:?}", e, delay);

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.state = BridgeState::Connecting;
                }
            }
        }

        self.state = BridgeState::Disconnected;
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request not sent: {}", e);
        }
        info!("MQTT bridge stopped");
        Ok(())
    }

    /// Reacts to one event loop notification. Returns `true` when the broker
    /// acknowledged a connection.
    fn handle_event<F: Forward>(&mut self, event: Event, pipeline: &Pipeline<F>) -> Result<bool> {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                // Clean sessions lose subscriptions, so subscribe on every connect
                self.client
                    .try_subscribe(self.config.topic.clone(), QoS::AtLeastOnce)?;
                self.state = BridgeState::Subscribed;
                self.connected_once = true;
                info!("Connected to {}, subscribed to {}", self.config.broker_addr(), self.config.topic);
                Ok(true)
            }
            Event::Incoming(Packet::Publish(publish)) => {
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                pipeline.dispatch(publish.payload.to_vec(), Ingress::Mqtt);
                Ok(false)
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker closed the MQTT session");
                self.state = BridgeState::Connecting;
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}
