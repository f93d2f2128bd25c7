//! MQTT control packet model.
//!
//! Only the packet types the proxy hooks into are decoded into typed
//! structs. Everything else is carried as a [`RawPacket`] and relayed
//! byte-for-byte.

mod decode;
mod encode;
mod properties;

use std::fmt;

use bytes::Bytes;

pub use properties::{id as property_id, Properties, Property, PropertyValue};

use crate::error::ProtocolError;

/// Largest remaining length a variable byte integer can express.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Reason code sent in a DISCONNECT when the proxy refuses a message.
pub const REASON_NOT_AUTHORIZED: u8 = 0x87;

/// MQTT control packet types (upper nibble of the fixed header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    /// Upper-case protocol name, used for logging and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::Connack => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::Puback => "PUBACK",
            PacketType::Pubrec => "PUBREC",
            PacketType::Pubrel => "PUBREL",
            PacketType::Pubcomp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::Suback => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::Unsuback => "UNSUBACK",
            PacketType::Pingreq => "PINGREQ",
            PacketType::Pingresp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Auth => "AUTH",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => PacketType::Connect,
            2 => PacketType::Connack,
            3 => PacketType::Publish,
            4 => PacketType::Puback,
            5 => PacketType::Pubrec,
            6 => PacketType::Pubrel,
            7 => PacketType::Pubcomp,
            8 => PacketType::Subscribe,
            9 => PacketType::Suback,
            10 => PacketType::Unsubscribe,
            11 => PacketType::Unsuback,
            12 => PacketType::Pingreq,
            13 => PacketType::Pingresp,
            14 => PacketType::Disconnect,
            15 => PacketType::Auth,
            _ => return Err(ProtocolError::InvalidPacketType(value)),
        })
    }
}

/// Protocol level carried in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// MQTT 3.1 (`MQIsdp`).
    V3_1 = 3,
    /// MQTT 3.1.1.
    #[default]
    V3_1_1 = 4,
    /// MQTT 5.0.
    V5 = 5,
}

impl ProtocolVersion {
    pub fn is_v5(self) -> bool {
        self == ProtocolVersion::V5
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(ProtocolVersion::V3_1),
            4 => Ok(ProtocolVersion::V3_1_1),
            5 => Ok(ProtocolVersion::V5),
            other => Err(ProtocolError::UnsupportedProtocolVersion(other)),
        }
    }
}

/// Quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ProtocolError::malformed(format!("invalid QoS {other}"))),
        }
    }
}

/// Last will carried in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub properties: Properties,
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNECT packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Connect {
    /// `MQTT`, or `MQIsdp` for 3.1.
    pub protocol_name: String,
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub properties: Properties,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    /// A minimal CONNECT for the given protocol level.
    pub fn new(protocol_version: ProtocolVersion, client_id: impl Into<String>) -> Self {
        let protocol_name = match protocol_version {
            ProtocolVersion::V3_1 => "MQIsdp",
            _ => "MQTT",
        };
        Self {
            protocol_name: protocol_name.to_string(),
            protocol_version,
            clean_start: true,
            keep_alive: 60,
            properties: Properties::new(),
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }
}

impl fmt::Debug for Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connect")
            .field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("clean_start", &self.clean_start)
            .field("keep_alive", &self.keep_alive)
            .field("properties", &self.properties)
            .field("client_id", &self.client_id)
            .field("will", &self.will)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// PUBLISH packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff `qos` is above zero.
    pub packet_id: Option<u16>,
    pub properties: Properties,
    pub payload: Bytes,
}

impl Publish {
    /// A QoS 0 PUBLISH.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: topic.into(),
            packet_id: None,
            properties: Properties::new(),
            payload: payload.into(),
        }
    }
}

/// Subscription options byte.
///
/// For 3.1.1 only the requested QoS bits are meaningful; 5.0 adds the
/// no-local, retain-as-published and retain-handling bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions(pub u8);

impl SubscriptionOptions {
    pub fn from_qos(qos: QoS) -> Self {
        Self(qos as u8)
    }

    pub fn qos(self) -> QoS {
        QoS::try_from(self.0 & 0x03).unwrap_or_default()
    }

    pub fn no_local(self) -> bool {
        self.0 & 0x04 != 0
    }

    pub fn retain_as_published(self) -> bool {
        self.0 & 0x08 != 0
    }

    pub fn retain_handling(self) -> u8 {
        (self.0 >> 4) & 0x03
    }
}

/// One topic filter in a SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub options: SubscriptionOptions,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            options: SubscriptionOptions::from_qos(qos),
        }
    }
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub properties: Properties,
    pub subscriptions: Vec<Subscription>,
}

/// UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub properties: Properties,
    pub topics: Vec<String>,
}

/// DISCONNECT packet.
///
/// 3.1.1 DISCONNECT has no body, so both fields are ignored when encoding
/// for that level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disconnect {
    pub reason_code: Option<u8>,
    pub properties: Option<Properties>,
}

impl Disconnect {
    /// DISCONNECT with reason code 0x87 (Not authorized).
    pub fn not_authorized() -> Self {
        Self {
            reason_code: Some(REASON_NOT_AUTHORIZED),
            properties: None,
        }
    }
}

/// Any packet the proxy does not inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub packet_type: PacketType,
    /// Lower nibble of the fixed header.
    pub flags: u8,
    /// Everything after the remaining length.
    pub body: Bytes,
}

/// A decoded MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Publish(Publish),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    Disconnect(Disconnect),
    Other(RawPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Other(raw) => raw.packet_type,
        }
    }
}

impl From<Connect> for Packet {
    fn from(value: Connect) -> Self {
        Packet::Connect(value)
    }
}

impl From<Publish> for Packet {
    fn from(value: Publish) -> Self {
        Packet::Publish(value)
    }
}

impl From<Subscribe> for Packet {
    fn from(value: Subscribe) -> Self {
        Packet::Subscribe(value)
    }
}

impl From<Unsubscribe> for Packet {
    fn from(value: Unsubscribe) -> Self {
        Packet::Unsubscribe(value)
    }
}

impl From<Disconnect> for Packet {
    fn from(value: Disconnect) -> Self {
        Packet::Disconnect(value)
    }
}

impl From<RawPacket> for Packet {
    fn from(value: RawPacket) -> Self {
        Packet::Other(value)
    }
}
