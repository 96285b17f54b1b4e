// Telemetry module for structured logging and metrics

use crate::models::BatchStatus;
use anyhow::Result;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging.
///
/// The level comes from `RUST_LOG` if set, otherwise from `log_level`.
/// With `json` the output is one JSON object per event including the
/// current span, which carries job and step names.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");

    Ok(())
}

/// Initialize the Prometheus metrics exporter and describe the batch counters
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("batch_job_launch_total", "Total number of job launches");
    describe_counter!(
        "batch_job_completed_total",
        "Total number of job executions that returned from a launcher, by status"
    );
    describe_counter!(
        "batch_job_step_delegation_failed_total",
        "Total number of job steps failed because the delegate job was unsuccessful"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_job_launch(job_name: &str) {
    counter!("batch_job_launch_total", "job_name" => job_name.to_string()).increment(1);
}

#[inline]
pub fn record_job_completion(job_name: &str, status: &BatchStatus) {
    counter!(
        "batch_job_completed_total",
        "job_name" => job_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a job step that failed because its delegate job was unsuccessful
#[inline]
pub fn record_delegation_failure(step_name: &str, status: &BatchStatus) {
    counter!(
        "batch_job_step_delegation_failed_total",
        "step_name" => step_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
