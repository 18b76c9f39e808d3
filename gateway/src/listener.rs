use crate::errors::{Error, Result};
use crate::forward::{Forward, RetryPolicy};
use crate::pipeline::{Ingress, Pipeline};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest datagram read in one receive; anything longer arrives truncated
/// and is rejected by the codec.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

const RECV_ERROR_INITIAL_MS: u64 = 10;
const RECV_ERROR_MAX_MS: u64 = 1_000;

/// Pause after the `consecutive`-th receive error in a row
fn recv_error_delay(consecutive: u32) -> Duration {
    RetryPolicy {
        max_attempts: u32::MAX,
        initial_backoff: Duration::from_millis(RECV_ERROR_INITIAL_MS),
        max_backoff: Duration::from_millis(RECV_ERROR_MAX_MS),
    }
    .backoff(consecutive)
}

/// UDP ingress. Owns its socket for its whole lifetime; the socket is closed
/// when `run` returns.
pub struct UdpListener {
    socket: UdpSocket,
    echo: bool,
}

impl UdpListener {
    pub async fn bind(addr: &str, echo: bool) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        info!("UDP listener bound to {}", socket.local_addr()?);
        Ok(Self { socket, echo })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives until `cancel` fires. Each datagram is handed to the pipeline
    /// and the loop goes straight back to the socket.
    pub async fn run<F: Forward>(self, pipeline: Pipeline<F>, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut received: u64 = 0;
        let mut errors: u32 = 0;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("UDP listener stopping after {} datagrams", received);
                    break;
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            received += 1;
                            errors = 0;
                            debug!("Received {} bytes from {}", len, peer);

                            let payload = buf[..len].to_vec();
                            if self.echo {
                                // Best effort, emitters do not rely on it
                                let _ = self.socket.try_send_to(&payload, peer);
                            }
                            pipeline.dispatch(payload, Ingress::Udp);
                        }
                        Err(e) => {
                            // e.g. ICMP port unreachable surfacing as ConnectionReset
                            errors = errors.saturating_add(1);
                            let delay = recv_error_delay(errors);
                            warn!("UDP receive error: {}. Retrying in {:?}", e, delay);

                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    info!("UDP listener stopping after {} datagrams", received);
                                    break;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}
