use bytes::Bytes;

use super::Rewrite;
use crate::packet::Properties;

/// Tags every client PUBLISH with a `Device` user property naming the proxy
/// host.
///
/// Only MQTT 5.0 carries properties on the wire; for older clients the
/// property is dropped by the encoder.
#[derive(Debug, Clone, Default)]
pub struct UserInjector {
    host: String,
}

impl UserInjector {
    pub const PROPERTY_KEY: &'static str = "Device";

    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Rewrite for UserInjector {
    fn publish(&self, _topic: &mut String, _payload: &mut Bytes, properties: &mut Properties) {
        properties.push_user(Self::PROPERTY_KEY, self.host.as_str());
    }
}
