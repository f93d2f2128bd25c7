//! Per-host topic namespacing.

use bytes::Bytes;
use tracing::info;

use super::Rewrite;
use crate::packet::{Properties, Subscription};

/// Places client topics under a `<host>/` namespace and removes it again
/// from topics the broker delivers.
#[derive(Debug, Clone, Default)]
pub struct HostTranslator {
    prefix: String,
}

impl HostTranslator {
    pub fn new(host: impl AsRef<str>) -> Self {
        let host = host.as_ref();
        let prefix = if host.is_empty() {
            String::new()
        } else {
            format!("{host}/")
        };
        Self { prefix }
    }

    fn add_namespace(&self, topic: &mut String, verb: &str) {
        if self.prefix.is_empty() {
            info!("Topic {topic} could not be translated and thus kept the same. {verb}...");
            return;
        }
        info!(
            "Topic {topic} is in device {}, Adding namespace and {verb}...",
            self.prefix.trim_end_matches('/')
        );
        topic.insert_str(0, &self.prefix);
    }
}

impl Rewrite for HostTranslator {
    fn publish(&self, topic: &mut String, _payload: &mut Bytes, _properties: &mut Properties) {
        self.add_namespace(topic, "publishing");
    }

    fn subscribe(&self, subscriptions: &mut [Subscription]) {
        for subscription in subscriptions {
            self.add_namespace(&mut subscription.topic, "subscribing");
        }
    }

    fn deliver(&self, topic: &mut String) {
        if !self.prefix.is_empty() {
            if let Some(stripped) = topic.strip_prefix(self.prefix.as_str()) {
                *topic = stripped.to_string();
            }
        }
    }
}
