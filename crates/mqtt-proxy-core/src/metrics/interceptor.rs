//! Packet counting at the interceptor seam.

use std::sync::Arc;

use async_trait::async_trait;

use super::ProxyMetrics;
use crate::error::HookResult;
use crate::packet::Packet;
use crate::session::{Context, Direction, Interceptor};

/// Counts every relayed packet, after an optional inner interceptor has
/// transformed it.
pub struct MetricsInterceptor {
    metrics: Arc<ProxyMetrics>,
    inner: Option<Arc<dyn Interceptor>>,
}

impl MetricsInterceptor {
    pub fn new(metrics: Arc<ProxyMetrics>) -> Self {
        Self {
            metrics,
            inner: None,
        }
    }

    /// Runs `inner` before counting.
    #[must_use]
    pub fn wrap(mut self, inner: Arc<dyn Interceptor>) -> Self {
        self.inner = Some(inner);
        self
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    async fn intercept(
        &self,
        ctx: &Context,
        packet: Packet,
        direction: Direction,
    ) -> HookResult<Packet> {
        let packet = match &self.inner {
            Some(inner) => inner.intercept(ctx, packet, direction).await?,
            None => packet,
        };

        self.metrics.record_packet(direction, packet.packet_type());
        if let Packet::Publish(publish) = &packet {
            self.metrics
                .record_publish_bytes(direction, publish.payload.len() as u64);
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use crate::packet::{PacketType, Publish};
    use bytes::Bytes;

    struct Uppercase;

    #[async_trait]
    impl Interceptor for Uppercase {
        async fn intercept(
            &self,
            _ctx: &Context,
            packet: Packet,
            _direction: Direction,
        ) -> HookResult<Packet> {
            match packet {
                Packet::Publish(mut publish) => {
                    publish.topic = publish.topic.to_uppercase();
                    Ok(Packet::Publish(publish))
                }
                other => Ok(other),
            }
        }
    }

    struct Refuse;

    #[async_trait]
    impl Interceptor for Refuse {
        async fn intercept(
            &self,
            _ctx: &Context,
            _packet: Packet,
            _direction: Direction,
        ) -> HookResult<Packet> {
            Err(HookError::rejected("refused"))
        }
    }

    #[tokio::test]
    async fn test_counts_after_inner() {
        let metrics = Arc::new(ProxyMetrics::new());
        let interceptor = MetricsInterceptor::new(Arc::clone(&metrics)).wrap(Arc::new(Uppercase));

        let packet = Packet::Publish(Publish::new("a/b", Bytes::from_static(b"1234")));
        let out = interceptor
            .intercept(&Context::detached(), packet, Direction::Up)
            .await
            .unwrap();

        let Packet::Publish(publish) = out else {
            panic!("expected PUBLISH");
        };
        assert_eq!(publish.topic, "A/B");
        assert_eq!(
            metrics
                .packets_total
                .with_label_values(&["up", PacketType::Publish.as_str()])
                .get(),
            1
        );
        assert_eq!(metrics.publish_bytes.with_label_values(&["up"]).get(), 4);
    }

    #[tokio::test]
    async fn test_inner_error_not_counted() {
        let metrics = Arc::new(ProxyMetrics::new());
        let interceptor = MetricsInterceptor::new(Arc::clone(&metrics)).wrap(Arc::new(Refuse));

        let packet = Packet::Publish(Publish::new("a", Bytes::new()));
        assert!(interceptor
            .intercept(&Context::detached(), packet, Direction::Down)
            .await
            .is_err());
        assert_eq!(
            metrics
                .packets_total
                .with_label_values(&["down", "PUBLISH"])
                .get(),
            0
        );
    }
}
