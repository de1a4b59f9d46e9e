//! Metrics module
//!
//! Prometheus metrics for uploads, admission control and multipart transfers.
//! Exposed as text on `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec,
    register_int_gauge, Counter, CounterVec, Encoder, Histogram, HistogramVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "s3nd_uploads_total",
        "Total number of upload requests by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "s3nd_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "s3nd_upload_duration_seconds",
        "Upload request duration in seconds",
        &["outcome"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Admission metrics
    pub static ref UPLOADS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "s3nd_uploads_in_flight",
        "Uploads currently holding an admission ticket"
    ).unwrap();

    pub static ref ADMISSION_WAIT: Histogram = register_histogram!(
        "s3nd_admission_wait_seconds",
        "Time spent waiting for an admission ticket",
        vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    // Multipart metrics
    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "s3nd_multipart_parts",
        "Number of parts per multipart upload",
        vec![2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    pub static ref PART_UPLOADS: CounterVec = register_counter_vec!(
        "s3nd_part_uploads_total",
        "Multipart part uploads by status",
        &["status"]
    ).unwrap();
}

/// Record a finished upload request
pub fn record_upload(outcome: &str, duration_secs: f64) {
    UPLOADS_TOTAL.with_label_values(&[outcome]).inc();
    UPLOAD_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Record bytes handed to the storage backend
pub fn record_upload_bytes(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record how long a request waited before it was admitted
pub fn record_admission_wait(wait_secs: f64) {
    ADMISSION_WAIT.observe(wait_secs);
}

/// Record a completed multipart upload
pub fn record_multipart_upload(parts_count: usize) {
    MULTIPART_PARTS.observe(parts_count as f64);
}

/// Record one part upload
pub fn record_part_upload(success: bool) {
    let status = if success { "success" } else { "failure" };
    PART_UPLOADS.with_label_values(&[status]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
