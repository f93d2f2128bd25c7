//! Packet body decoding.

use bytes::{Buf, Bytes};

use super::{
    Connect, Disconnect, Packet, PacketType, Properties, ProtocolVersion, Publish, QoS,
    RawPacket, Subscribe, Subscription, SubscriptionOptions, Unsubscribe, Will,
};
use crate::error::{ProtocolError, ProtocolResult};

/// Cursor over a packet body.
pub(crate) struct Reader {
    buf: Bytes,
}

impl Reader {
    pub(crate) fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub(crate) fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> ProtocolResult<()> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::malformed(format!(
                "truncated packet: needed {needed} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> ProtocolResult<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn read_u16(&mut self) -> ProtocolResult<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn read_u32(&mut self) -> ProtocolResult<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Variable byte integer, at most four bytes.
    pub(crate) fn read_var_int(&mut self) -> ProtocolResult<u32> {
        let mut value = 0u32;
        for shift in [0u32, 7, 14, 21] {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtocolError::malformed(
            "variable byte integer longer than 4 bytes",
        ))
    }

    pub(crate) fn read_binary(&mut self) -> ProtocolResult<Bytes> {
        let len = self.read_u16()? as usize;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    pub(crate) fn read_string(&mut self) -> ProtocolResult<String> {
        let raw = self.read_binary()?;
        if raw.contains(&0u8) {
            return Err(ProtocolError::malformed(
                "UTF-8 string must not contain U+0000",
            ));
        }
        String::from_utf8(raw.to_vec())
            .map_err(|_| ProtocolError::malformed("string is not valid UTF-8"))
    }

    /// Splits off the next `len` bytes as an independent reader.
    pub(crate) fn sub_reader(&mut self, len: usize) -> ProtocolResult<Reader> {
        self.ensure(len)?;
        Ok(Reader::new(self.buf.split_to(len)))
    }

    fn take_rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }

    fn finish(&self, what: PacketType) -> ProtocolResult<()> {
        if self.has_remaining() {
            return Err(ProtocolError::malformed(format!(
                "{} trailing bytes after {what}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

impl Packet {
    /// Decodes a packet from its fixed header byte and body.
    ///
    /// `version` decides whether v5 properties are expected; CONNECT
    /// carries its own level and ignores it.
    pub fn decode(header: u8, body: Bytes, version: ProtocolVersion) -> ProtocolResult<Packet> {
        let packet_type = PacketType::try_from(header >> 4)?;
        let flags = header & 0x0F;
        let mut reader = Reader::new(body);

        let packet = match packet_type {
            PacketType::Connect => {
                expect_flags(packet_type, flags, 0)?;
                Packet::Connect(decode_connect(&mut reader)?)
            }
            PacketType::Publish => Packet::Publish(decode_publish(flags, &mut reader, version)?),
            PacketType::Subscribe => {
                expect_flags(packet_type, flags, 0x02)?;
                Packet::Subscribe(decode_subscribe(&mut reader, version)?)
            }
            PacketType::Unsubscribe => {
                expect_flags(packet_type, flags, 0x02)?;
                Packet::Unsubscribe(decode_unsubscribe(&mut reader, version)?)
            }
            PacketType::Disconnect => {
                expect_flags(packet_type, flags, 0)?;
                Packet::Disconnect(decode_disconnect(&mut reader, version)?)
            }
            _ => {
                return Ok(Packet::Other(RawPacket {
                    packet_type,
                    flags,
                    body: reader.take_rest(),
                }))
            }
        };

        reader.finish(packet_type)?;
        Ok(packet)
    }
}

fn expect_flags(packet_type: PacketType, flags: u8, expected: u8) -> ProtocolResult<()> {
    if flags != expected {
        return Err(ProtocolError::malformed(format!(
            "{packet_type} fixed header flags must be {expected:#04x}, got {flags:#04x}"
        )));
    }
    Ok(())
}

fn decode_connect(reader: &mut Reader) -> ProtocolResult<Connect> {
    let protocol_name = reader.read_string()?;
    if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
        return Err(ProtocolError::malformed(format!(
            "unknown protocol name '{protocol_name}'"
        )));
    }
    let protocol_version = ProtocolVersion::try_from(reader.read_u8()?)?;

    let flags = reader.read_u8()?;
    if flags & 0x01 != 0 {
        return Err(ProtocolError::malformed("CONNECT reserved flag is set"));
    }
    let clean_start = flags & 0x02 != 0;
    let will_flag = flags & 0x04 != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
    let will_retain = flags & 0x20 != 0;
    let password_flag = flags & 0x40 != 0;
    let username_flag = flags & 0x80 != 0;

    if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
        return Err(ProtocolError::malformed(
            "will QoS and retain must be 0 without a will",
        ));
    }

    let keep_alive = reader.read_u16()?;
    let properties = if protocol_version.is_v5() {
        Properties::read(reader)?
    } else {
        Properties::new()
    };
    let client_id = reader.read_string()?;

    let will = if will_flag {
        let properties = if protocol_version.is_v5() {
            Properties::read(reader)?
        } else {
            Properties::new()
        };
        let topic = reader.read_string()?;
        let payload = reader.read_binary()?;
        Some(Will {
            properties,
            topic,
            payload,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = username_flag.then(|| reader.read_string()).transpose()?;
    let password = password_flag.then(|| reader.read_binary()).transpose()?;

    Ok(Connect {
        protocol_name,
        protocol_version,
        clean_start,
        keep_alive,
        properties,
        client_id,
        will,
        username,
        password,
    })
}

fn decode_publish(
    flags: u8,
    reader: &mut Reader,
    version: ProtocolVersion,
) -> ProtocolResult<Publish> {
    let dup = flags & 0x08 != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = flags & 0x01 != 0;

    let topic = reader.read_string()?;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => Some(reader.read_u16()?),
    };
    let properties = if version.is_v5() {
        Properties::read(reader)?
    } else {
        Properties::new()
    };

    Ok(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        properties,
        payload: reader.take_rest(),
    })
}

fn decode_subscribe(reader: &mut Reader, version: ProtocolVersion) -> ProtocolResult<Subscribe> {
    let packet_id = reader.read_u16()?;
    let properties = if version.is_v5() {
        Properties::read(reader)?
    } else {
        Properties::new()
    };

    let mut subscriptions = Vec::new();
    while reader.has_remaining() {
        let topic = reader.read_string()?;
        let options = SubscriptionOptions(reader.read_u8()?);
        subscriptions.push(Subscription { topic, options });
    }
    if subscriptions.is_empty() {
        return Err(ProtocolError::malformed("SUBSCRIBE without topic filters"));
    }

    Ok(Subscribe {
        packet_id,
        properties,
        subscriptions,
    })
}

fn decode_unsubscribe(
    reader: &mut Reader,
    version: ProtocolVersion,
) -> ProtocolResult<Unsubscribe> {
    let packet_id = reader.read_u16()?;
    let properties = if version.is_v5() {
        Properties::read(reader)?
    } else {
        Properties::new()
    };

    let mut topics = Vec::new();
    while reader.has_remaining() {
        topics.push(reader.read_string()?);
    }
    if topics.is_empty() {
        return Err(ProtocolError::malformed(
            "UNSUBSCRIBE without topic filters",
        ));
    }

    Ok(Unsubscribe {
        packet_id,
        properties,
        topics,
    })
}

fn decode_disconnect(
    reader: &mut Reader,
    version: ProtocolVersion,
) -> ProtocolResult<Disconnect> {
    if !reader.has_remaining() {
        return Ok(Disconnect::default());
    }
    if !version.is_v5() {
        return Err(ProtocolError::malformed(
            "DISCONNECT carries a body before MQTT 5",
        ));
    }

    let reason_code = Some(reader.read_u8()?);
    let properties = if reader.has_remaining() {
        Some(Properties::read(reader)?)
    } else {
        None
    };
    Ok(Disconnect {
        reason_code,
        properties,
    })
}
