//! Prometheus metrics exposition
//!
//! - `oauth_requests_total` (counter): labels `route`, `status`
//! - `oauth_request_duration_seconds` (histogram): label `route`
//! - `oauth_provider_errors_total` (counter): labels `provider`, `error_type`
//! - `oauth_logins_total` (counter): labels `provider`, `outcome`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries from 5ms to 30s; a login request makes at most a few
/// provider calls, each bounded by the request timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("oauth_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Provider label for signup posts whose hand-off failed verification.
pub const UNVERIFIED_PROVIDER: &str = "unverified";

/// Record a completed login-flow request.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("oauth_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    metrics::histogram!("oauth_request_duration_seconds", "route" => route).record(duration_secs);
}

/// Record a failed provider call with its classification.
pub fn record_provider_error(provider: &str, error_type: &'static str) {
    metrics::counter!(
        "oauth_provider_errors_total",
        "provider" => provider.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record how a callback or signup ended: `existing`, `signup_started`,
/// `created` or `tampered`.
pub fn record_login(provider: &str, outcome: &'static str) {
    metrics::counter!(
        "oauth_logins_total",
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder().build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("callback", 200, 0.05);
        record_provider_error("acme", "network");
        record_login("acme", "existing");
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("init", 307, 0.012);
        record_request("callback", 500, 1.5);

        let output = handle.render();
        assert!(output.contains("oauth_requests_total"));
        assert!(output.contains("route=\"init\""));
        assert!(output.contains("status=\"307\""));
        assert!(output.contains("route=\"callback\""));
        assert!(output.contains("status=\"500\""));
        assert!(
            output.contains("oauth_request_duration_seconds_bucket"),
            "histogram must render _bucket lines for histogram_quantile() queries"
        );
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"30\""));
    }

    #[test]
    fn provider_errors_and_logins_carry_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_provider_error("acme", "response_too_large");
        record_login("slack", "created");

        let output = handle.render();
        assert!(output.contains("oauth_provider_errors_total"));
        assert!(output.contains("error_type=\"response_too_large\""));
        assert!(output.contains("oauth_logins_total"));
        assert!(output.contains("provider=\"slack\""));
        assert!(output.contains("outcome=\"created\""));
    }
}
