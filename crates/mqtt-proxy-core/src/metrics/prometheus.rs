//! Prometheus metrics for the MQTT proxy.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::packet::PacketType;
use crate::session::Direction;

/// Proxy metrics collection.
pub struct ProxyMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Sessions started.
    pub sessions_total: IntCounter,

    /// Sessions currently relaying.
    pub active_sessions: IntGauge,

    /// Sessions that ended with an error, by root cause.
    pub session_errors: IntCounterVec,

    /// Packets relayed by direction and packet type.
    pub packets_total: IntCounterVec,

    /// PUBLISH payload bytes relayed by direction.
    pub publish_bytes: IntCounterVec,
}

impl ProxyMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let sessions_total = IntCounter::new(
            "mqtt_proxy_sessions_total",
            "Total number of client sessions started",
        )
        .expect("metric creation should succeed");

        let active_sessions = IntGauge::new(
            "mqtt_proxy_active_sessions",
            "Current number of active client sessions",
        )
        .expect("metric creation should succeed");

        let session_errors = IntCounterVec::new(
            Opts::new(
                "mqtt_proxy_session_errors_total",
                "Total number of sessions that ended with an error, by kind",
            ),
            &["kind"],
        )
        .expect("metric creation should succeed");

        let packets_total = IntCounterVec::new(
            Opts::new(
                "mqtt_proxy_packets_total",
                "Total number of relayed packets by direction and type",
            ),
            &["direction", "packet_type"],
        )
        .expect("metric creation should succeed");

        let publish_bytes = IntCounterVec::new(
            Opts::new(
                "mqtt_proxy_publish_payload_bytes_total",
                "Total PUBLISH payload bytes relayed by direction",
            ),
            &["direction"],
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(sessions_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(session_errors.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(packets_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(publish_bytes.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            sessions_total,
            active_sessions,
            session_errors,
            packets_total,
            publish_bytes,
        }
    }

    /// Record a session starting.
    pub fn session_started(&self) {
        self.sessions_total.inc();
        self.active_sessions.inc();
    }

    /// Record a session ending.
    pub fn session_ended(&self) {
        self.active_sessions.dec();
    }

    /// Record a session that ended with an error.
    pub fn record_session_error(&self, kind: &str) {
        self.session_errors.with_label_values(&[kind]).inc();
    }

    /// Record a relayed packet.
    pub fn record_packet(&self, direction: Direction, packet_type: PacketType) {
        self.packets_total
            .with_label_values(&[direction.as_str(), packet_type.as_str()])
            .inc();
    }

    /// Record relayed PUBLISH payload bytes.
    pub fn record_publish_bytes(&self, direction: Direction, bytes: u64) {
        self.publish_bytes
            .with_label_values(&[direction.as_str()])
            .inc_by(bytes);
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}
