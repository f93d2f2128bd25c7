//! Bidirectional relay between one client and one broker.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Context, Direction, Handler, Interceptor, PeerCertificate, Session};
use crate::error::{HookError, ProxyError, Result};
use crate::network::codec::MqttCodec;
use crate::packet::{Disconnect, Packet};

/// Relays MQTT traffic between `client` and `broker` until either side
/// closes, a hook rejects a packet, or `shutdown` is cancelled.
///
/// Each direction runs on its own task. Whichever loop ends first cancels
/// the other. [`Handler::disconnect`] then runs exactly once, and its error
/// is returned together with any loop errors. A clean end of stream is not
/// an error.
pub async fn stream<C, B>(
    shutdown: &CancellationToken,
    client: C,
    broker: B,
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    peer_certificate: Option<PeerCertificate>,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    stream_with_codec(
        shutdown,
        client,
        broker,
        handler,
        interceptor,
        peer_certificate,
        MqttCodec::new(),
    )
    .await
}

/// Like [`stream`], with an explicitly configured codec.
///
/// Both directions use clones of `codec`, so they share the protocol level
/// negotiated by CONNECT.
pub async fn stream_with_codec<C, B>(
    shutdown: &CancellationToken,
    client: C,
    broker: B,
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    peer_certificate: Option<PeerCertificate>,
    codec: MqttCodec,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let ctx = Context::new(Session::new(peer_certificate), shutdown.child_token());

    let (client_read, client_write) = tokio::io::split(client);
    let (broker_read, broker_write) = tokio::io::split(broker);

    let up = Relay {
        direction: Direction::Up,
        reader: FramedRead::new(client_read, codec.clone()),
        writer: FramedWrite::new(broker_write, codec.clone()),
        handler: Arc::clone(&handler),
        interceptor: interceptor.clone(),
        ctx: ctx.clone(),
    };
    let down = Relay {
        direction: Direction::Down,
        reader: FramedRead::new(broker_read, codec.clone()),
        writer: FramedWrite::new(client_write, codec),
        handler: Arc::clone(&handler),
        interceptor,
        ctx: ctx.clone(),
    };

    debug!("session started");
    let (up_result, down_result) = tokio::join!(tokio::spawn(up.run()), tokio::spawn(down.run()));

    let mut errors = Vec::new();
    for result in [up_result, down_result] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errors.push(err),
            Err(join_err) => errors.push(ProxyError::TaskFailed(join_err.to_string())),
        }
    }

    if let Err(err) = handler.disconnect(&ctx).await {
        errors.push(err.into());
    }

    debug!(client_id = %ctx.client_id(), errors = errors.len(), "session ended");
    match ProxyError::join(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// One direction of a session.
struct Relay<R, W> {
    direction: Direction,
    reader: FramedRead<R, MqttCodec>,
    writer: FramedWrite<W, MqttCodec>,
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    ctx: Context,
}

impl<R, W> Relay<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(mut self) -> Result<()> {
        let token = self.ctx.token().clone();
        // Any exit from this loop, including a panic, ends the sibling loop.
        let _guard = token.clone().drop_guard();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                next = self.reader.next() => next,
            };

            let packet = match next {
                None => {
                    debug!(direction = %self.direction, client_id = %self.ctx.client_id(), "end of stream");
                    return Ok(());
                }
                Some(Ok(packet)) => packet,
                Some(Err(err)) => return Err(self.wrap(err.into())),
            };

            trace!(
                direction = %self.direction,
                packet_type = %packet.packet_type(),
                "relaying packet"
            );

            if let Err(err) = self.forward(packet).await {
                return Err(self.wrap(err));
            }
        }
    }

    async fn forward(&mut self, mut packet: Packet) -> Result<()> {
        match self.direction {
            Direction::Up => self.authorize(&mut packet).await?,
            Direction::Down => {
                if let Packet::Publish(publish) = &mut packet {
                    let verdict = self
                        .handler
                        .down_subscribe(&self.ctx, &mut publish.topic, &mut publish.properties)
                        .await;
                    if let Err(err) = verdict {
                        return Err(self.refuse_delivery(err).await);
                    }
                }
            }
        }

        if let Some(interceptor) = &self.interceptor {
            packet = interceptor
                .intercept(&self.ctx, packet, self.direction)
                .await?;
        }

        self.writer.send(&packet).await?;

        if self.direction == Direction::Up {
            self.notify(&packet).await?;
        }
        Ok(())
    }

    async fn authorize(&mut self, packet: &mut Packet) -> Result<()> {
        match packet {
            Packet::Connect(connect) => {
                let mut session = self.ctx.session().unwrap_or_default();
                session.id = connect.client_id.clone();
                session.username = connect.username.clone();
                session.password = connect.password.clone();
                self.ctx.replace_session(session.clone());

                self.handler.auth_connect(&self.ctx, &mut session).await?;

                connect.client_id = session.id.clone();
                connect.username = session.username.clone();
                connect.password = session.password.clone();
                self.ctx.replace_session(session);
            }
            Packet::Publish(publish) => {
                self.handler
                    .auth_publish(
                        &self.ctx,
                        &mut publish.topic,
                        &mut publish.payload,
                        &mut publish.properties,
                    )
                    .await?;
            }
            Packet::Subscribe(subscribe) => {
                self.handler
                    .auth_subscribe(
                        &self.ctx,
                        &mut subscribe.subscriptions,
                        &mut subscribe.properties,
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn notify(&mut self, packet: &Packet) -> Result<()> {
        match packet {
            Packet::Connect(_) => self.handler.connect(&self.ctx).await?,
            Packet::Publish(publish) => {
                self.handler
                    .publish(&self.ctx, &publish.topic, &publish.payload)
                    .await?
            }
            Packet::Subscribe(subscribe) => {
                self.handler
                    .subscribe(&self.ctx, &subscribe.subscriptions)
                    .await?
            }
            Packet::Unsubscribe(unsubscribe) => {
                self.handler
                    .unsubscribe(&self.ctx, &unsubscribe.topics)
                    .await?
            }
            _ => {}
        }
        Ok(())
    }

    /// Tells the client why its link is closing.
    ///
    /// A failure to deliver the DISCONNECT is reported alongside the
    /// rejection.
    async fn refuse_delivery(&mut self, rejection: HookError) -> ProxyError {
        warn!(
            client_id = %self.ctx.client_id(),
            error = %rejection,
            "downstream publish rejected, disconnecting client"
        );

        let notice = Packet::Disconnect(Disconnect::not_authorized());
        let delivered = match self.writer.send(&notice).await {
            Ok(()) => SinkExt::<&Packet>::close(&mut self.writer).await,
            Err(err) => Err(err),
        };

        match delivered {
            Ok(()) => rejection.into(),
            Err(write_err) => ProxyError::Joined(vec![rejection.into(), write_err.into()]),
        }
    }

    /// Tags `err` with the direction and client. Joined errors are tagged
    /// one by one so each keeps its own root cause.
    fn wrap(&self, err: ProxyError) -> ProxyError {
        let client_id = self.ctx.client_id();
        let tag = |err: ProxyError| match self.direction {
            Direction::Up => ProxyError::upstream(client_id.as_str(), err),
            Direction::Down => ProxyError::downstream(client_id.as_str(), err),
        };
        match err {
            ProxyError::Joined(errors) => ProxyError::Joined(errors.into_iter().map(tag).collect()),
            err => tag(err),
        }
    }
}
