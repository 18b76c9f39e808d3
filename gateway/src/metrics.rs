use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("gateway_messages_total", "Total messages received per ingress"),
        &["ingress"]
    )
    .unwrap();
    pub static ref INVALID_MESSAGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "gateway_invalid_messages_total",
            "Messages that failed to decode"
        ),
        &["ingress"]
    )
    .unwrap();
    pub static ref DROPPED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "gateway_dropped_total",
            "Messages dropped because the pipeline was at capacity"
        ),
        &["ingress"]
    )
    .unwrap();
    pub static ref FORWARDED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_forwarded_total",
        "Records accepted by the sink"
    ))
    .unwrap();
    pub static ref FORWARD_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_forward_failures_total",
        "Records that could not be delivered after all attempts"
    ))
    .unwrap();
    pub static ref FORWARD_RETRIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_forward_retries_total",
        "Forward attempts repeated after a retryable failure"
    ))
    .unwrap();
    pub static ref FORWARD_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "gateway_forward_latency_seconds",
            "Time taken to deliver a record to the sink, retries included"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref IN_FLIGHT: IntGauge = IntGauge::with_opts(Opts::new(
        "gateway_in_flight_tasks",
        "Messages currently being decoded and forwarded"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FORWARDED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FORWARD_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FORWARD_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FORWARD_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(IN_FLIGHT.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
