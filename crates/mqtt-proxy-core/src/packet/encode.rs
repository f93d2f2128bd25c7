//! Packet encoding.
//!
//! Encoding is the exact inverse of decoding for well-formed input:
//! variable byte integers are always written in their shortest form and
//! property lists are emitted in stored order.

use bytes::{BufMut, BytesMut};

use super::{
    Connect, Disconnect, Packet, PacketType, ProtocolVersion, Publish, QoS, RawPacket, Subscribe,
    Unsubscribe, MAX_REMAINING_LENGTH,
};
use crate::error::{ProtocolError, ProtocolResult};

/// Number of bytes needed to encode `value` as a variable byte integer.
pub(crate) fn var_int_len(value: usize) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub(crate) fn put_var_int(dst: &mut BytesMut, mut value: usize) -> ProtocolResult<()> {
    if value > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PacketTooLarge {
            size: value,
            max: MAX_REMAINING_LENGTH,
        });
    }
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

pub(crate) fn put_binary(dst: &mut BytesMut, data: &[u8]) -> ProtocolResult<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        ProtocolError::malformed(format!("field of {} bytes exceeds 65535", data.len()))
    })?;
    dst.put_u16(len);
    dst.put_slice(data);
    Ok(())
}

pub(crate) fn put_string(dst: &mut BytesMut, value: &str) -> ProtocolResult<()> {
    put_binary(dst, value.as_bytes())
}

impl Packet {
    /// Encodes the packet, including its fixed header.
    ///
    /// Properties are only written when `version` is MQTT 5; anything a
    /// hook added to a 3.1.1 packet's property list is dropped.
    pub fn encode(&self, version: ProtocolVersion, dst: &mut BytesMut) -> ProtocolResult<()> {
        let mut body = BytesMut::new();
        let flags = match self {
            Packet::Connect(connect) => {
                encode_connect(connect, &mut body)?;
                0
            }
            Packet::Publish(publish) => encode_publish(publish, version, &mut body)?,
            Packet::Subscribe(subscribe) => {
                encode_subscribe(subscribe, version, &mut body)?;
                0x02
            }
            Packet::Unsubscribe(unsubscribe) => {
                encode_unsubscribe(unsubscribe, version, &mut body)?;
                0x02
            }
            Packet::Disconnect(disconnect) => {
                encode_disconnect(disconnect, version, &mut body)?;
                0
            }
            Packet::Other(RawPacket { flags, body: raw, .. }) => {
                body.extend_from_slice(raw);
                *flags
            }
        };

        let header = ((self.packet_type() as u8) << 4) | (flags & 0x0F);
        dst.reserve(1 + var_int_len(body.len()) + body.len());
        dst.put_u8(header);
        put_var_int(dst, body.len())?;
        dst.extend_from_slice(&body);
        Ok(())
    }
}

fn encode_connect(connect: &Connect, body: &mut BytesMut) -> ProtocolResult<()> {
    let v5 = connect.protocol_version.is_v5();

    put_string(body, &connect.protocol_name)?;
    body.put_u8(connect.protocol_version as u8);

    let mut flags = 0u8;
    if connect.clean_start {
        flags |= 0x02;
    }
    if let Some(will) = &connect.will {
        flags |= 0x04 | ((will.qos as u8) << 3);
        if will.retain {
            flags |= 0x20;
        }
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }
    body.put_u8(flags);
    body.put_u16(connect.keep_alive);

    if v5 {
        connect.properties.write(body)?;
    }
    put_string(body, &connect.client_id)?;
    if let Some(will) = &connect.will {
        if v5 {
            will.properties.write(body)?;
        }
        put_string(body, &will.topic)?;
        put_binary(body, &will.payload)?;
    }
    if let Some(username) = &connect.username {
        put_string(body, username)?;
    }
    if let Some(password) = &connect.password {
        put_binary(body, password)?;
    }
    Ok(())
}

fn encode_publish(
    publish: &Publish,
    version: ProtocolVersion,
    body: &mut BytesMut,
) -> ProtocolResult<u8> {
    let mut flags = (publish.qos as u8) << 1;
    if publish.dup {
        flags |= 0x08;
    }
    if publish.retain {
        flags |= 0x01;
    }

    put_string(body, &publish.topic)?;
    if publish.qos != QoS::AtMostOnce {
        let packet_id = publish.packet_id.ok_or_else(|| {
            ProtocolError::malformed(format!(
                "{} with QoS {} needs a packet id",
                PacketType::Publish,
                publish.qos as u8
            ))
        })?;
        body.put_u16(packet_id);
    }
    if version.is_v5() {
        publish.properties.write(body)?;
    }
    body.extend_from_slice(&publish.payload);
    Ok(flags)
}

fn encode_subscribe(
    subscribe: &Subscribe,
    version: ProtocolVersion,
    body: &mut BytesMut,
) -> ProtocolResult<()> {
    body.put_u16(subscribe.packet_id);
    if version.is_v5() {
        subscribe.properties.write(body)?;
    }
    for subscription in &subscribe.subscriptions {
        put_string(body, &subscription.topic)?;
        body.put_u8(subscription.options.0);
    }
    Ok(())
}

fn encode_unsubscribe(
    unsubscribe: &Unsubscribe,
    version: ProtocolVersion,
    body: &mut BytesMut,
) -> ProtocolResult<()> {
    body.put_u16(unsubscribe.packet_id);
    if version.is_v5() {
        unsubscribe.properties.write(body)?;
    }
    for topic in &unsubscribe.topics {
        put_string(body, topic)?;
    }
    Ok(())
}

fn encode_disconnect(
    disconnect: &Disconnect,
    version: ProtocolVersion,
    body: &mut BytesMut,
) -> ProtocolResult<()> {
    if !version.is_v5() {
        return Ok(());
    }
    match (&disconnect.reason_code, &disconnect.properties) {
        (None, None) => {}
        (reason, None) => body.put_u8(reason.unwrap_or(0)),
        (reason, Some(properties)) => {
            body.put_u8(reason.unwrap_or(0));
            properties.write(body)?;
        }
    }
    Ok(())
}
