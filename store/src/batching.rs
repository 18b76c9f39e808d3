use crate::db::RecordLog;
use crate::metrics::{APPEND_LATENCY_SECONDS, BATCH_SIZE, DB_FAILURES_TOTAL};
use std::time::Duration;
use telemetry::StoredRecord;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

pub async fn run_batcher<L: RecordLog>(
    mut rx: mpsc::Receiver<StoredRecord>,
    log: L,
    max_batch: usize,
    max_wait_ms: u64,
) {
    info!(
        "Starting batcher with max_batch={}, max_wait_ms={}",
        max_batch, max_wait_ms
    );

    let mut buffer: Vec<StoredRecord> = Vec::with_capacity(max_batch);
    let mut ticker = interval(Duration::from_millis(max_wait_ms.max(1)));

    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(r) => {
                        buffer.push(r);
                        if buffer.len() >= max_batch {
                            flush_batch(&log, &mut buffer).await;
                        }
                    }
                    None => {
                        info!("Channel closed, flushing remaining batch");
                        flush_batch(&log, &mut buffer).await;
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_batch(&log, &mut buffer).await;
                }
            }
        }
    }

    info!("Batcher stopped");
}

/// Appends the buffered records, retrying with exponential backoff.
/// The buffer is always empty afterwards: a batch that fails every attempt is dropped.
async fn flush_batch<L: RecordLog>(log: &L, buffer: &mut Vec<StoredRecord>) {
    let batch_len = buffer.len();
    if batch_len == 0 {
        return;
    }

    debug!("Flushing batch of {} records", batch_len);
    BATCH_SIZE.set(batch_len as f64);
    let start = Instant::now();

    for attempt in 1..=MAX_ATTEMPTS {
        match log.append(buffer).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_secs_f64();
                APPEND_LATENCY_SECONDS.observe(elapsed);
                if attempt > 1 {
                    info!("Batch appended after {} attempts in {:.3}s", attempt, elapsed);
                } else {
                    debug!("Batch appended in {:.3}s", elapsed);
                }
                break;
            }
            Err(e) => {
                DB_FAILURES_TOTAL.inc();
                if attempt == MAX_ATTEMPTS {
                    error!(
                        "Failed to append batch after {} attempts, dropping {} records: {}",
                        MAX_ATTEMPTS, batch_len, e
                    );
                    break;
                }

                let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                warn!(
                    "Failed to append batch (attempt {}/{}): {}. Retrying in {}ms",
                    attempt, MAX_ATTEMPTS, e, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }

    buffer.clear();
    BATCH_SIZE.set(0.0);
}
