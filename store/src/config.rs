use clap::Parser;

/// Latest-state store and HTTP sink for drone telemetry
#[derive(Debug, Clone, Parser)]
#[command(name = "store", version)]
pub struct StoreConfig {
    /// Address the sink API listens on
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8000")]
    pub http_addr: String,

    /// Postgres URL of the append log; without it records are kept in memory only
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "BATCH_SIZE", default_value_t = 500)]
    pub batch_size: usize,

    #[arg(long, env = "BATCH_TIMEOUT_MS", default_value_t = 50)]
    pub batch_timeout_ms: u64,

    /// Capacity of the channel between the API and the append log batcher
    #[arg(long, env = "CHANNEL_CAPACITY", default_value_t = 10_000)]
    pub channel_capacity: usize,
}
