//! Prometheus metrics for the gateway.
//!
//! Each [`Metrics`] owns its own registry, so several routers can coexist
//! in one process (tests build many).

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Requests by route ("complete" / "stream") and outcome.
    pub requests: IntCounterVec,

    /// Time until the backend answered (complete) or the stream ended.
    pub request_duration: HistogramVec,

    /// Fragments delivered to clients.
    pub fragments: IntCounter,

    /// Streams abandoned by the client before the backend finished.
    pub client_disconnects: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Chat requests by route and outcome"),
            &["route", "outcome"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("gateway_request_duration_seconds", "Chat request duration")
                .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["route"],
        )?;
        let fragments = IntCounter::new(
            "gateway_stream_fragments_total",
            "Fragments forwarded to streaming clients",
        )?;
        let client_disconnects = IntCounter::new(
            "gateway_client_disconnects_total",
            "Streams cancelled because the client went away",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(fragments.clone()))?;
        registry.register(Box::new(client_disconnects.clone()))?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            fragments,
            client_disconnects,
        })
    }

    pub fn record(&self, route: &str, outcome: &str) {
        self.requests.with_label_values(&[route, outcome]).inc();
    }

    /// Text exposition of every metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
