//! Topic translation through lookup tables.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::info;

use super::Rewrite;
use crate::packet::{Properties, Subscription};

/// Rewrites client topics through `topics` and broker topics through
/// `reverse`.
///
/// Topics without an entry pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    topics: BTreeMap<String, String>,
    reverse: BTreeMap<String, String>,
}

impl Translator {
    pub fn new(topics: BTreeMap<String, String>, reverse: BTreeMap<String, String>) -> Self {
        Self { topics, reverse }
    }

    /// Translator whose downstream table is the inverse of `topics`.
    pub fn symmetric(topics: BTreeMap<String, String>) -> Self {
        let reverse = topics
            .iter()
            .map(|(from, to)| (to.clone(), from.clone()))
            .collect();
        Self::new(topics, reverse)
    }
}

fn translate(table: &BTreeMap<String, String>, topic: &mut String, verb: &str) {
    match table.get(topic.as_str()) {
        Some(translated) => {
            info!("Topic {topic} translated to Topic {translated}. {verb}...");
            topic.clone_from(translated);
        }
        None => info!("Topic {topic} could not be translated and thus kept the same. {verb}..."),
    }
}

impl Rewrite for Translator {
    fn publish(&self, topic: &mut String, _payload: &mut Bytes, _properties: &mut Properties) {
        translate(&self.topics, topic, "Publishing");
    }

    fn subscribe(&self, subscriptions: &mut [Subscription]) {
        for subscription in subscriptions {
            translate(&self.topics, &mut subscription.topic, "Subscribing");
        }
    }

    fn deliver(&self, topic: &mut String) {
        translate(&self.reverse, topic, "Delivering");
    }
}
