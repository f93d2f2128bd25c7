//! Payload injection.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::info;

use super::Rewrite;
use crate::packet::Properties;

/// Appends a fixed suffix and the proxy host name to every client PUBLISH
/// payload.
#[derive(Debug, Clone, Default)]
pub struct Injector {
    appended: String,
}

impl Injector {
    pub fn new(suffix: impl Into<String>, host: impl AsRef<str>) -> Self {
        Self {
            appended: format!("{}, Device: {}", suffix.into(), host.as_ref()),
        }
    }
}

impl Rewrite for Injector {
    fn publish(&self, _topic: &mut String, payload: &mut Bytes, _properties: &mut Properties) {
        let mut buf = BytesMut::with_capacity(payload.len() + self.appended.len());
        buf.put_slice(payload);
        buf.put_slice(self.appended.as_bytes());
        *payload = buf.freeze();

        info!("Payload now is {}", String::from_utf8_lossy(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_extended() {
        let injector = Injector::new(" [proxied]", "edge-01");
        let mut payload = Bytes::from_static(b"21.5");
        injector.publish(&mut "t".to_string(), &mut payload, &mut Properties::new());
        assert_eq!(&payload[..], b"21.5 [proxied], Device: edge-01");
    }

    #[test]
    fn test_empty_suffix() {
        let injector = Injector::new("", "edge-01");
        let mut payload = Bytes::new();
        injector.publish(&mut "t".to_string(), &mut payload, &mut Properties::new());
        assert_eq!(&payload[..], b", Device: edge-01");
    }
}
