//! Hook points invoked by the relay engine.

use async_trait::async_trait;
use bytes::Bytes;

use super::{Context, Session};
use crate::error::HookResult;
use crate::packet::{Properties, Subscription};

/// Pluggable hooks around MQTT protocol events.
///
/// `auth_*` and [`down_subscribe`](Handler::down_subscribe) run before a
/// packet is relayed and may rewrite it through the `&mut` arguments or
/// reject it. The remaining hooks are notifications fired after a
/// client-to-broker packet has been written. Any error ends the session.
///
/// One instance is shared by every session of a proxy, so hooks may run
/// concurrently. The engine applies no timeout to them.
///
/// Every method defaults to accepting, so implementors override only what
/// they need.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Authorizes a CONNECT.
    ///
    /// `session` already holds the client id and credentials from the
    /// packet; whatever it holds on return is written back into the CONNECT
    /// and becomes the session identity.
    async fn auth_connect(&self, ctx: &Context, session: &mut Session) -> HookResult {
        let _ = (ctx, session);
        Ok(())
    }

    /// Authorizes a client PUBLISH.
    async fn auth_publish(
        &self,
        ctx: &Context,
        topic: &mut String,
        payload: &mut Bytes,
        properties: &mut Properties,
    ) -> HookResult {
        let _ = (ctx, topic, payload, properties);
        Ok(())
    }

    /// Authorizes a client SUBSCRIBE.
    async fn auth_subscribe(
        &self,
        ctx: &Context,
        subscriptions: &mut Vec<Subscription>,
        properties: &mut Properties,
    ) -> HookResult {
        let _ = (ctx, subscriptions, properties);
        Ok(())
    }

    /// Re-checks a PUBLISH the broker delivers to the client.
    ///
    /// Typically undoes a topic rewrite applied on the way up. A rejection
    /// makes the engine send DISCONNECT to the client.
    async fn down_subscribe(
        &self,
        ctx: &Context,
        topic: &mut String,
        properties: &mut Properties,
    ) -> HookResult {
        let _ = (ctx, topic, properties);
        Ok(())
    }

    /// CONNECT was relayed.
    async fn connect(&self, ctx: &Context) -> HookResult {
        let _ = ctx;
        Ok(())
    }

    /// PUBLISH was relayed.
    async fn publish(&self, ctx: &Context, topic: &str, payload: &Bytes) -> HookResult {
        let _ = (ctx, topic, payload);
        Ok(())
    }

    /// SUBSCRIBE was relayed.
    async fn subscribe(&self, ctx: &Context, subscriptions: &[Subscription]) -> HookResult {
        let _ = (ctx, subscriptions);
        Ok(())
    }

    /// UNSUBSCRIBE was relayed.
    async fn unsubscribe(&self, ctx: &Context, topics: &[String]) -> HookResult {
        let _ = (ctx, topics);
        Ok(())
    }

    /// Both relay loops have ended. Called exactly once per session.
    async fn disconnect(&self, ctx: &Context) -> HookResult {
        let _ = ctx;
        Ok(())
    }
}

/// Handler that accepts everything and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl Handler for NoopHandler {}
