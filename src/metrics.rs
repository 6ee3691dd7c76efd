//! Prometheus metrics for the custody watcher
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    // Scan progress
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "watcher_blocks_processed_total",
        "Total number of blocks/slots fully processed",
        &["chain"]
    ).unwrap();

    pub static ref WATERMARK: GaugeVec = register_gauge_vec!(
        "watcher_watermark",
        "Highest block/slot fully processed",
        &["chain"]
    ).unwrap();

    // Ledger mutations
    pub static ref DEPOSITS_CREDITED: CounterVec = register_counter_vec!(
        "watcher_deposits_credited_total",
        "Total number of deposits recorded and credited",
        &["chain"]
    ).unwrap();

    pub static ref WITHDRAWALS_CONFIRMED: CounterVec = register_counter_vec!(
        "watcher_withdrawals_confirmed_total",
        "Total number of withdrawals confirmed and debited",
        &["chain"]
    ).unwrap();

    pub static ref WITHDRAWALS_FAILED: CounterVec = register_counter_vec!(
        "watcher_withdrawals_failed_total",
        "Total number of pending withdrawals marked failed",
        &["chain"]
    ).unwrap();

    pub static ref UNAUTHORIZED_WITHDRAWALS: CounterVec = register_counter_vec!(
        "watcher_unauthorized_withdrawals_total",
        "Total number of unauthorized withdrawals detected",
        &["chain"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "watcher_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "watcher_up",
        "Whether the watcher is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "watcher_last_successful_poll_timestamp",
        "Unix timestamp of last successful tip poll",
        &["chain"]
    ).unwrap();
}

/// Record a block processed
pub fn record_block_processed(chain: &str, position: u64) {
    BLOCKS_PROCESSED.with_label_values(&[chain]).inc();
    WATERMARK.with_label_values(&[chain]).set(position as f64);
}

/// Record a credited deposit
pub fn record_deposit_credited(chain: &str) {
    DEPOSITS_CREDITED.with_label_values(&[chain]).inc();
}

/// Record a confirmed (debited) withdrawal
pub fn record_withdrawal_confirmed(chain: &str) {
    WITHDRAWALS_CONFIRMED.with_label_values(&[chain]).inc();
}

/// Record a failed withdrawal
pub fn record_withdrawal_failed(chain: &str) {
    WITHDRAWALS_FAILED.with_label_values(&[chain]).inc();
}

/// Record a detected unauthorized withdrawal
pub fn record_unauthorized_withdrawal(chain: &str) {
    UNAUTHORIZED_WITHDRAWALS.with_label_values(&[chain]).inc();
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

/// Record last successful poll
pub fn record_successful_poll(chain: &str) {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[chain])
        .set(timestamp);
}
