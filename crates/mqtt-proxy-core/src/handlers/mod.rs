//! Sample [`Handler`] implementations.
//!
//! Every sample logs each hook it sees. They differ only in how they rewrite
//! packets, which is expressed through the [`Rewrite`] trait and plugged
//! into the shared [`LoggingHandler`].

mod host_translator;
mod injector;
mod simple;
mod translator;
mod user_injector;

pub use host_translator::HostTranslator;
pub use injector::Injector;
pub use simple::Passthrough;
pub use translator::Translator;
pub use user_injector::UserInjector;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, warn};

use crate::config::{HandlerConfig, HandlerKind};
use crate::error::{ConfigResult, HookError, HookResult};
use crate::packet::{Properties, Subscription};
use crate::session::{Context, Handler, Session};

/// Logging handler that leaves every packet untouched.
pub type SimpleHandler = LoggingHandler<Passthrough>;

/// Packet rewrites applied by a [`LoggingHandler`] before it logs.
pub trait Rewrite: Send + Sync {
    /// Client PUBLISH on its way to the broker.
    fn publish(&self, topic: &mut String, payload: &mut Bytes, properties: &mut Properties) {
        let _ = (topic, payload, properties);
    }

    /// Client SUBSCRIBE on its way to the broker.
    fn subscribe(&self, subscriptions: &mut [Subscription]) {
        let _ = subscriptions;
    }

    /// Broker PUBLISH on its way to the client.
    fn deliver(&self, topic: &mut String) {
        let _ = topic;
    }
}

/// Handler that applies a [`Rewrite`] and logs every hook with the session
/// identity.
///
/// Hooks fail with [`HookError::SessionMissing`] when the context carries no
/// session.
#[derive(Debug, Default, Clone)]
pub struct LoggingHandler<R> {
    rewrite: R,
}

impl<R: Rewrite> LoggingHandler<R> {
    pub fn new(rewrite: R) -> Self {
        Self { rewrite }
    }

    pub fn rewrite(&self) -> &R {
        &self.rewrite
    }
}

/// What one hook call is about, for logging.
#[derive(Default)]
struct Activity<'a> {
    topics: Vec<&'a str>,
    payload: Option<&'a [u8]>,
    user_properties: Vec<(&'a str, &'a str)>,
}

impl<'a> Activity<'a> {
    fn topic(topic: &'a str) -> Self {
        Self {
            topics: vec![topic],
            ..Self::default()
        }
    }

    fn topics<I: IntoIterator<Item = &'a str>>(topics: I) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            ..Self::default()
        }
    }

    fn payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = Some(payload);
        self
    }

    fn user_properties(mut self, properties: &'a Properties) -> Self {
        self.user_properties = properties.user_properties().collect();
        self
    }
}

fn log_action(ctx: &Context, action: &'static str, activity: Activity<'_>) -> HookResult {
    let payload = activity
        .payload
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .unwrap_or_default();

    let Some(session) = ctx.session() else {
        let err = HookError::SessionMissing { action };
        error!(
            topics = ?activity.topics,
            payload = %payload,
            user_properties = ?activity.user_properties,
            error = %err,
            "{action}() failed to complete"
        );
        return Err(err);
    };

    info!(
        session.id = %session.id,
        session.username = session.username.as_deref().unwrap_or_default(),
        cert.cn = session.certificate_common_name().unwrap_or_default(),
        topics = ?activity.topics,
        payload = %payload,
        user_properties = ?activity.user_properties,
        "{action}() completed successfully"
    );
    Ok(())
}

fn subscription_topics(subscriptions: &[Subscription]) -> impl Iterator<Item = &str> {
    subscriptions.iter().map(|s| s.topic.as_str())
}

#[async_trait]
impl<R: Rewrite + 'static> Handler for LoggingHandler<R> {
    async fn auth_connect(&self, ctx: &Context, _session: &mut Session) -> HookResult {
        log_action(ctx, "AuthConnect", Activity::default())
    }

    async fn auth_publish(
        &self,
        ctx: &Context,
        topic: &mut String,
        payload: &mut Bytes,
        properties: &mut Properties,
    ) -> HookResult {
        self.rewrite.publish(topic, payload, properties);
        log_action(
            ctx,
            "AuthPublish",
            Activity::topic(topic)
                .payload(payload)
                .user_properties(properties),
        )
    }

    async fn auth_subscribe(
        &self,
        ctx: &Context,
        subscriptions: &mut Vec<Subscription>,
        properties: &mut Properties,
    ) -> HookResult {
        self.rewrite.subscribe(subscriptions);
        log_action(
            ctx,
            "AuthSubscribe",
            Activity::topics(subscription_topics(subscriptions)).user_properties(properties),
        )
    }

    async fn down_subscribe(
        &self,
        ctx: &Context,
        topic: &mut String,
        properties: &mut Properties,
    ) -> HookResult {
        self.rewrite.deliver(topic);
        log_action(
            ctx,
            "DownSubscribe",
            Activity::topic(topic).user_properties(properties),
        )
    }

    async fn connect(&self, ctx: &Context) -> HookResult {
        log_action(ctx, "Connect", Activity::default())
    }

    async fn publish(&self, ctx: &Context, topic: &str, payload: &Bytes) -> HookResult {
        log_action(ctx, "Publish", Activity::topic(topic).payload(payload))
    }

    async fn subscribe(&self, ctx: &Context, subscriptions: &[Subscription]) -> HookResult {
        log_action(
            ctx,
            "Subscribe",
            Activity::topics(subscription_topics(subscriptions)),
        )
    }

    async fn unsubscribe(&self, ctx: &Context, topics: &[String]) -> HookResult {
        log_action(
            ctx,
            "Unsubscribe",
            Activity::topics(topics.iter().map(String::as_str)),
        )
    }

    async fn disconnect(&self, ctx: &Context) -> HookResult {
        log_action(ctx, "Disconnect", Activity::default())
    }
}

/// Name of the machine the proxy runs on.
///
/// Falls back to an empty string when the host name cannot be read.
pub fn local_host_name() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(err) => {
            warn!(error = %err, "failed to read host name");
            String::new()
        }
    }
}

/// Builds the sample handler selected by `config`.
///
/// # Errors
///
/// Returns an error if the handler settings are invalid.
pub fn build_handler(config: &HandlerConfig) -> ConfigResult<Arc<dyn Handler>> {
    config.validate()?;

    let handler: Arc<dyn Handler> = match config.kind {
        HandlerKind::Simple => Arc::new(SimpleHandler::default()),
        HandlerKind::Translator => Arc::new(LoggingHandler::new(Translator::new(
            config.topics.clone(),
            config.reverse_topics(),
        ))),
        HandlerKind::Injector => Arc::new(LoggingHandler::new(Injector::new(
            config.payload_suffix.clone(),
            local_host_name(),
        ))),
        HandlerKind::UserInjector => {
            Arc::new(LoggingHandler::new(UserInjector::new(local_host_name())))
        }
        HandlerKind::HostTranslator => {
            Arc::new(LoggingHandler::new(HostTranslator::new(local_host_name())))
        }
    };

    info!(kind = %config.kind, "handler configured");
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerConfig;
    use crate::packet::QoS;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> Context {
        let session = Session {
            id: "c1".to_string(),
            username: Some("alice".to_string()),
            ..Session::default()
        };
        Context::new(session, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_simple_handler_accepts_every_hook() {
        let handler = SimpleHandler::default();
        let ctx = ctx();
        let mut session = ctx.session().unwrap();
        let mut topic = "a/b".to_string();
        let mut payload = Bytes::from_static(b"hello");
        let mut props = Properties::new();
        let mut subs = vec![Subscription::new("a/#", QoS::AtLeastOnce)];

        handler.auth_connect(&ctx, &mut session).await.unwrap();
        handler
            .auth_publish(&ctx, &mut topic, &mut payload, &mut props)
            .await
            .unwrap();
        handler
            .auth_subscribe(&ctx, &mut subs, &mut props)
            .await
            .unwrap();
        handler
            .down_subscribe(&ctx, &mut topic, &mut props)
            .await
            .unwrap();
        handler.connect(&ctx).await.unwrap();
        handler.publish(&ctx, &topic, &payload).await.unwrap();
        handler.subscribe(&ctx, &subs).await.unwrap();
        handler
            .unsubscribe(&ctx, &["a/#".to_string()])
            .await
            .unwrap();
        handler.disconnect(&ctx).await.unwrap();

        assert_eq!(topic, "a/b");
        assert_eq!(&payload[..], b"hello");
        assert_eq!(subs[0].topic, "a/#");
    }

    #[tokio::test]
    async fn test_missing_session_fails_with_action() {
        let handler = SimpleHandler::default();
        let ctx = Context::detached();

        let err = handler.connect(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            HookError::SessionMissing { action: "Connect" }
        ));

        let mut topic = "t".to_string();
        let err = handler
            .down_subscribe(&ctx, &mut topic, &mut Properties::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("DownSubscribe"));
    }

    #[test]
    fn test_build_handler_for_every_kind() {
        for kind in [
            HandlerKind::Simple,
            HandlerKind::Injector,
            HandlerKind::UserInjector,
            HandlerKind::HostTranslator,
        ] {
            let config = HandlerConfig {
                kind,
                ..HandlerConfig::default()
            };
            assert!(build_handler(&config).is_ok(), "kind {kind}");
        }

        let mut config = HandlerConfig {
            kind: HandlerKind::Translator,
            ..HandlerConfig::default()
        };
        assert!(build_handler(&config).is_err());

        config
            .topics
            .insert("test/topic".to_string(), "test/foo".to_string());
        assert!(build_handler(&config).is_ok());
    }
}
