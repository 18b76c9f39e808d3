use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Could not connect to MQTT broker {addr} after {attempts} attempts: {reason}")]
    Connect {
        addr: String,
        attempts: u32,
        reason: String,
    },

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{task} exited unexpectedly: {reason}")]
    TaskExited { task: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps the end of a task that should only stop once shutdown has begun.
    /// A task error is passed through; a clean return or a panic becomes
    /// [`Error::TaskExited`].
    pub fn unexpected_exit(
        task: &'static str,
        joined: std::result::Result<Result<()>, JoinError>,
    ) -> Self {
        match joined {
            Ok(Err(e)) => e,
            Ok(Ok(())) => Error::TaskExited {
                task,
                reason: "stopped without a shutdown request".to_string(),
            },
            Err(e) => Error::TaskExited {
                task,
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panicked_task_is_an_error() {
        let joined = tokio::spawn(async { panic!("boom") }).await;
        let err = Error::unexpected_exit("MQTT bridge", joined.map(|()| Ok(())));
        assert!(matches!(err, Error::TaskExited { task: "MQTT bridge", .. }));
    }

    #[tokio::test]
    async fn test_clean_return_is_an_error() {
        let joined = tokio::spawn(async { Ok(()) }).await;
        let err = Error::unexpected_exit("metrics server", joined);
        assert!(matches!(err, Error::TaskExited { task: "metrics server", .. }));
    }

    #[tokio::test]
    async fn test_task_error_passes_through() {
        let joined = tokio::spawn(async {
            Err(Error::Connect {
                addr: "broker:1883".to_string(),
                attempts: 10,
                reason: "refused".to_string(),
            })
        })
        .await;

        let err = Error::unexpected_exit("MQTT bridge", joined);
        assert!(matches!(err, Error::Connect { attempts: 10, .. }));
    }
}
