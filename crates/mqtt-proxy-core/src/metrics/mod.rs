//! Metrics collection for the MQTT proxy.
//!
//! [`ProxyMetrics`] holds the Prometheus registry. [`MetricsInterceptor`]
//! counts relayed packets at the interceptor seam.

pub mod interceptor;
pub mod prometheus;

pub use interceptor::MetricsInterceptor;
pub use self::prometheus::ProxyMetrics;
