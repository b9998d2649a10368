use metrics::{counter, histogram};

/// Record one finished call. `outcome` is `"success"` or the error kind
/// label. No-ops unless the host installs a metrics recorder.
pub fn record_request(method: &str, outcome: &str, duration_ms: f64) {
    let counter_labels = [
        ("method", method.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("api_client_requests_total", &counter_labels).increment(1);

    histogram!("api_client_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration_ms / 1000.0);
}

pub fn record_retry(error: &str) {
    counter!("api_client_retries_total",
        "error" => error.to_string()
    )
    .increment(1);
}

pub fn record_circuit_rejection() {
    counter!("api_client_circuit_rejections_total").increment(1);
}
