//! Prometheus metrics HTTP endpoint
//!
//! Exposes the shared counters plus per-journey travel time gauges in
//! Prometheus text format at /metrics. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::coordinator::CoordinatorState;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// A journey whose latest state is exported as gauges
#[derive(Clone)]
pub struct JourneyGauge {
    pub id: String,
    pub updates: watch::Receiver<CoordinatorState>,
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

fn write_header(output: &mut String, name: &str, help: &str, typ: MetricType) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, journeys: &[JourneyGauge]) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_refresh_metrics(&mut output, &summary);
    write_api_metrics(&mut output, &summary);
    write_statestream_metrics(&mut output, &summary);
    write_journey_metrics(&mut output, journeys);

    output
}

fn write_refresh_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "journey_refreshes_total",
        "Update cycles executed",
        MetricType::Counter,
        summary.refreshes_total,
    );
    write_metric(
        output,
        "journey_forced_refreshes_total",
        "Refreshes forced by origin or destination state changes",
        MetricType::Counter,
        summary.forced_refreshes_total,
    );
    write_metric(
        output,
        "journey_debounced_requests_total",
        "Refresh requests passed through the debouncer",
        MetricType::Counter,
        summary.debounced_requests_total,
    );
    write_metric(
        output,
        "journey_coalesced_requests_total",
        "Debounced requests folded into a pending refresh",
        MetricType::Counter,
        summary.coalesced_requests_total,
    );
    write_metric(
        output,
        "journey_update_failures_total",
        "Update cycles that failed",
        MetricType::Counter,
        summary.update_failures_total,
    );
    write_metric(
        output,
        "journey_stationary_total",
        "Updates skipped because origin and destination coincide",
        MetricType::Counter,
        summary.stationary_total,
    );
    write_metric(
        output,
        "journey_uptime_seconds",
        "Seconds since start",
        MetricType::Gauge,
        summary.uptime_secs,
    );
}

fn write_api_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "journey_api_calls_total",
        "Routing provider requests",
        MetricType::Counter,
        summary.api_calls_total,
    );
    write_metric(
        output,
        "journey_api_errors_total",
        "Routing provider requests that failed",
        MetricType::Counter,
        summary.api_errors_total,
    );
    write_metric(
        output,
        "journey_api_latency_avg_ms",
        "Average routing provider latency",
        MetricType::Gauge,
        summary.api_latency_avg_ms,
    );
    write_metric(
        output,
        "journey_api_latency_max_ms",
        "Maximum routing provider latency since the last report",
        MetricType::Gauge,
        summary.api_latency_max_ms,
    );
}

fn write_statestream_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "journey_state_updates_total",
        "Statestream messages applied",
        MetricType::Counter,
        summary.state_updates_total,
    );
    write_metric(
        output,
        "journey_state_updates_ignored_total",
        "Statestream messages ignored",
        MetricType::Counter,
        summary.state_updates_ignored_total,
    );
}

fn write_journey_metrics(output: &mut String, journeys: &[JourneyGauge]) {
    if journeys.is_empty() {
        return;
    }

    let states: Vec<(&str, CoordinatorState)> =
        journeys.iter().map(|j| (j.id.as_str(), j.updates.borrow().clone())).collect();

    write_header(
        output,
        "journey_travel_time_minutes",
        "Travel time in traffic",
        MetricType::Gauge,
    );
    for (id, state) in &states {
        if let Some(ref data) = state.data {
            let minutes = data.travel_time.travel_time_traffic_min();
            let _ = writeln!(output, "journey_travel_time_minutes{{journey=\"{id}\"}} {minutes}");
        }
    }

    write_header(
        output,
        "journey_delay_minutes",
        "Delay caused by traffic",
        MetricType::Gauge,
    );
    for (id, state) in &states {
        if let Some(ref data) = state.data {
            let delay = data.travel_time.delay_min();
            let _ = writeln!(output, "journey_delay_minutes{{journey=\"{id}\"}} {delay}");
        }
    }

    write_header(
        output,
        "journey_available",
        "Whether the last update succeeded",
        MetricType::Gauge,
    );
    for (id, state) in &states {
        let up = u8::from(state.last_update_success);
        let _ = writeln!(output, "journey_available{{journey=\"{id}\"}} {up}");
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    journeys: Arc<Vec<JourneyGauge>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &journeys),
        ),
        (&Method::GET, "/health") => {
            text_response(StatusCode::OK, "text/plain", "ok".to_string())
        }
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "not found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    journeys: Vec<JourneyGauge>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let journeys = Arc::new(journeys);

    info!(port = %port, journeys = %journeys.len(), "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let journeys = journeys.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let journeys = journeys.clone();
                                async move { handle_request(req, metrics, journeys).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journey::{JourneyData, LocationData, TravelTimeData};

    fn gauge(id: &str, state: CoordinatorState) -> (watch::Sender<CoordinatorState>, JourneyGauge) {
        let (tx, rx) = watch::channel(state);
        (tx, JourneyGauge { id: id.to_string(), updates: rx })
    }

    #[test]
    fn test_format_counters() {
        let metrics = Metrics::new();
        metrics.record_refresh();
        metrics.record_refresh();
        metrics.record_api_call(120, true);
        metrics.record_state_update();

        let output = format_prometheus_metrics(&metrics, &[]);

        assert!(output.contains("# TYPE journey_refreshes_total counter"));
        assert!(output.contains("journey_refreshes_total 2"));
        assert!(output.contains("journey_api_calls_total 1"));
        assert!(output.contains("journey_api_latency_max_ms 120"));
        assert!(output.contains("journey_state_updates_total 1"));
        assert!(!output.contains("journey_travel_time_minutes"));
    }

    #[test]
    fn test_format_journey_gauges() {
        let data = JourneyData {
            origin: LocationData::raw("51.5,-0.12"),
            destination: LocationData::raw("51.52,-0.08"),
            travel_time: TravelTimeData {
                origin: None,
                destination: None,
                travel_time_secs: 600,
                travel_time_traffic_secs: 900,
                distance_m: 8000,
            },
        };
        let (_tx_ok, commute) = gauge(
            "commute",
            CoordinatorState {
                data: Some(Arc::new(data)),
                last_update_success: true,
                last_error: None,
                last_refresh: None,
            },
        );
        let (_tx_down, school) = gauge("school", CoordinatorState::default());

        let output = format_prometheus_metrics(&Metrics::new(), &[commute, school]);

        assert!(output.contains("journey_travel_time_minutes{journey=\"commute\"} 15"));
        assert!(output.contains("journey_delay_minutes{journey=\"commute\"} 5"));
        assert!(output.contains("journey_available{journey=\"commute\"} 1"));
        assert!(output.contains("journey_available{journey=\"school\"} 0"));
        assert!(!output.contains("journey_travel_time_minutes{journey=\"school\"}"));
    }
}
