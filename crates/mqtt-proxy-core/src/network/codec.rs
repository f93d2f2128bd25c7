//! MQTT control packet codec.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for MQTT frames. A frame
//! is a one-byte fixed header, a variable byte remaining length (1 to 4
//! bytes) and the packet body.
//!
//! The protocol level is only announced by the client's CONNECT, so clones
//! of one codec share the negotiated level. The broker-side decoder then
//! parses MQTT 5 properties even though it never sees CONNECT itself.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::packet::{Packet, ProtocolVersion, MAX_REMAINING_LENGTH};

/// Default packet size limit: the largest remaining length MQTT can encode.
pub const DEFAULT_MAX_PACKET_SIZE: usize = MAX_REMAINING_LENGTH;

/// Codec for MQTT 3.1, 3.1.1 and 5.0 control packets.
#[derive(Debug, Clone)]
pub struct MqttCodec {
    max_packet_size: usize,
    version: Arc<AtomicU8>,
}

impl MqttCodec {
    /// Create a new codec with default max packet size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create a new codec with custom max packet size.
    #[must_use]
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size,
            version: Arc::new(AtomicU8::new(ProtocolVersion::default() as u8)),
        }
    }

    /// Protocol level negotiated so far (3.1.1 until a CONNECT is seen).
    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::try_from(self.version.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Pins the protocol level, e.g. for a test broker that never sees CONNECT.
    pub fn set_protocol_version(&self, version: ProtocolVersion) {
        self.version.store(version as u8, Ordering::Release);
    }
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the remaining length starting at `buf[1]`.
///
/// Returns the length and the number of bytes it occupied, or `None` when
/// more input is needed.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut value = 0usize;
    for (i, &byte) in buf.iter().skip(1).take(4).enumerate() {
        value |= usize::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() > 4 {
        return Err(ProtocolError::malformed(
            "remaining length longer than 4 bytes",
        ));
    }
    Ok(None)
}

impl Decoder for MqttCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let Some((remaining, len_bytes)) = decode_remaining_length(&src[..])? else {
            return Ok(None);
        };

        if remaining > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: remaining,
                max: self.max_packet_size,
            });
        }

        let frame_len = 1 + len_bytes + remaining;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let header = src[0];
        src.advance(1 + len_bytes);
        let body: Bytes = src.split_to(remaining).freeze();

        let packet = Packet::decode(header, body, self.protocol_version())?;
        if let Packet::Connect(connect) = &packet {
            self.set_protocol_version(connect.protocol_version);
        }
        Ok(Some(packet))
    }
}

impl Encoder<&Packet> for MqttCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.encode(self.protocol_version(), dst)?;

        if let Some((remaining, _)) = decode_remaining_length(&dst[start..])? {
            if remaining > self.max_packet_size {
                dst.truncate(start);
                return Err(ProtocolError::PacketTooLarge {
                    size: remaining,
                    max: self.max_packet_size,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Connect, Publish, QoS};
    use bytes::BufMut;

    fn encode(codec: &mut MqttCodec, packet: &Packet) -> BytesMut {
        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();
        dst
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut codec = MqttCodec::new();
        let mut buf = BytesMut::from(&[0x30u8][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // continuation bit set, next length byte not yet here
        let mut buf = BytesMut::from(&[0x30u8, 0x80][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut codec = MqttCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(0x30);
        buf.put_u8(10);
        buf.put_slice(&[0x00, 0x01, b't']);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_decode_packet_too_large() {
        let mut codec = MqttCodec::with_max_packet_size(16);
        let mut buf = BytesMut::from(&[0x30u8, 0x20][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::PacketTooLarge { size: 32, max: 16 })
        ));
    }

    #[test]
    fn test_decode_overlong_remaining_length() {
        let mut codec = MqttCodec::new();
        let mut buf = BytesMut::from(&[0x30u8, 0xFF, 0xFF, 0xFF, 0xFF, 0x01][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_reserved_packet_type() {
        let mut codec = MqttCodec::new();
        let mut buf = BytesMut::from(&[0x00u8, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidPacketType(0))
        ));
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = MqttCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xC0, 0x00]); // PINGREQ
        buf.extend_from_slice(&[0x30, 0x04, 0x00, 0x01, b'a', b'1']);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.packet_type(), crate::packet::PacketType::Pingreq);

        let Packet::Publish(second) = codec.decode(&mut buf).unwrap().unwrap() else {
            panic!("expected PUBLISH");
        };
        assert_eq!(second.topic, "a");
        assert_eq!(&second.payload[..], b"1");

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_connect_sets_version_for_clones() {
        let mut client_side = MqttCodec::new();
        let mut broker_side = client_side.clone();

        let connect = Packet::Connect(Connect::new(ProtocolVersion::V5, "c1"));
        let mut buf = encode(&mut client_side, &connect);
        client_side.decode(&mut buf).unwrap().unwrap();
        assert_eq!(broker_side.protocol_version(), ProtocolVersion::V5);

        // v5 PUBLISH from the broker with an empty property block
        let mut buf = BytesMut::from(&[0x30u8, 0x05, 0x00, 0x01, b't', 0x00, b'x'][..]);
        let Packet::Publish(publish) = broker_side.decode(&mut buf).unwrap().unwrap() else {
            panic!("expected PUBLISH");
        };
        assert!(publish.properties.is_empty());
        assert_eq!(&publish.payload[..], b"x");
    }

    #[test]
    fn test_encode_large_remaining_length() {
        let mut codec = MqttCodec::new();
        let mut publish = Publish::new("t", Bytes::from(vec![0u8; 200]));
        publish.qos = QoS::AtMostOnce;
        let bytes = encode(&mut codec, &Packet::Publish(publish));
        // 3 (topic) + 200 payload = 203 -> two length bytes
        assert_eq!(&bytes[..3], &[0x30, 0xCB, 0x01]);
        assert_eq!(bytes.len(), 206);
    }

    #[test]
    fn test_encode_respects_max_packet_size() {
        let mut codec = MqttCodec::with_max_packet_size(8);
        let publish = Publish::new("topic", Bytes::from_static(b"too long payload"));
        let mut dst = BytesMut::new();
        assert!(codec.encode(&Packet::Publish(publish), &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
