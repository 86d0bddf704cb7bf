//! Metrics module
//!
//! Prometheus counters and histograms for the upload engine. Everything is
//! registered in the default registry; [`gather_text`] renders it in the
//! text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "uploadr_uploads_total",
        "Total number of uploads",
        &["provider", "method", "status"]
    ).expect("uploads_total metric");

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "uploadr_upload_bytes_total",
        "Total bytes uploaded"
    ).expect("upload_bytes_total metric");

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "uploadr_upload_duration_seconds",
        "Upload duration in seconds",
        &["provider", "method"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0, 300.0, 1800.0]
    ).expect("upload_duration metric");

    // Multipart metrics
    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "uploadr_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0]
    ).expect("multipart_parts metric");

    pub static ref PART_UPLOADS: CounterVec = register_counter_vec!(
        "uploadr_part_uploads_total",
        "Part uploads by outcome",
        &["provider", "status"]
    ).expect("part_uploads metric");

    pub static ref MULTIPART_ABORTS: CounterVec = register_counter_vec!(
        "uploadr_multipart_aborts_total",
        "Multipart sessions aborted after a failure",
        &["provider", "status"]
    ).expect("multipart_aborts metric");

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "uploadr_errors_total",
        "Total errors",
        &["type"]
    ).expect("errors_total metric");
}

/// Upload method label
pub const METHOD_STANDARD: &str = "standard";
pub const METHOD_MULTIPART: &str = "multipart";
pub const METHOD_RESUMABLE: &str = "resumable";

/// Record a successful upload
pub fn record_upload_success(provider: &str, method: &str, bytes: u64) {
    UPLOADS_TOTAL
        .with_label_values(&[provider, method, "success"])
        .inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(provider: &str, method: &str) {
    UPLOADS_TOTAL
        .with_label_values(&[provider, method, "failure"])
        .inc();
}

/// Record upload duration
pub fn record_upload_duration(provider: &str, method: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[provider, method])
        .observe(duration_secs);
}

/// Record the part count of a multipart upload
pub fn record_multipart_parts(parts_count: u32) {
    MULTIPART_PARTS.observe(f64::from(parts_count));
}

/// Record a single part upload
pub fn record_part_upload(provider: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    PART_UPLOADS.with_label_values(&[provider, status]).inc();
}

/// Record an abort attempt
pub fn record_abort(provider: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    MULTIPART_ABORTS.with_label_values(&[provider, status]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
