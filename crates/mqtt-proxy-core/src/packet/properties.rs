//! MQTT 5.0 property lists.
//!
//! Properties are kept as an ordered list rather than a struct of optional
//! fields: the proxy must re-emit exactly what it received, including
//! repeated user properties and their wire order.

use bytes::{BufMut, Bytes, BytesMut};

use super::decode::Reader;
use super::encode::{put_binary, put_string, put_var_int, var_int_len};
use crate::error::{ProtocolError, ProtocolResult};

/// Property identifiers defined by MQTT 5.0.
pub mod id {
    pub const PAYLOAD_FORMAT_INDICATOR: u8 = 0x01;
    pub const MESSAGE_EXPIRY_INTERVAL: u8 = 0x02;
    pub const CONTENT_TYPE: u8 = 0x03;
    pub const RESPONSE_TOPIC: u8 = 0x08;
    pub const CORRELATION_DATA: u8 = 0x09;
    pub const SUBSCRIPTION_IDENTIFIER: u8 = 0x0B;
    pub const SESSION_EXPIRY_INTERVAL: u8 = 0x11;
    pub const ASSIGNED_CLIENT_IDENTIFIER: u8 = 0x12;
    pub const SERVER_KEEP_ALIVE: u8 = 0x13;
    pub const AUTHENTICATION_METHOD: u8 = 0x15;
    pub const AUTHENTICATION_DATA: u8 = 0x16;
    pub const REQUEST_PROBLEM_INFORMATION: u8 = 0x17;
    pub const WILL_DELAY_INTERVAL: u8 = 0x18;
    pub const REQUEST_RESPONSE_INFORMATION: u8 = 0x19;
    pub const RESPONSE_INFORMATION: u8 = 0x1A;
    pub const SERVER_REFERENCE: u8 = 0x1C;
    pub const REASON_STRING: u8 = 0x1F;
    pub const RECEIVE_MAXIMUM: u8 = 0x21;
    pub const TOPIC_ALIAS_MAXIMUM: u8 = 0x22;
    pub const TOPIC_ALIAS: u8 = 0x23;
    pub const MAXIMUM_QOS: u8 = 0x24;
    pub const RETAIN_AVAILABLE: u8 = 0x25;
    pub const USER_PROPERTY: u8 = 0x26;
    pub const MAXIMUM_PACKET_SIZE: u8 = 0x27;
    pub const WILDCARD_SUBSCRIPTION_AVAILABLE: u8 = 0x28;
    pub const SUBSCRIPTION_IDENTIFIER_AVAILABLE: u8 = 0x29;
    pub const SHARED_SUBSCRIPTION_AVAILABLE: u8 = 0x2A;
}

/// Wire representation of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Byte,
    TwoByte,
    FourByte,
    VarInt,
    Utf8,
    Binary,
    Pair,
}

fn value_kind(property_id: u8) -> Option<ValueKind> {
    use id::*;
    let kind = match property_id {
        PAYLOAD_FORMAT_INDICATOR
        | REQUEST_PROBLEM_INFORMATION
        | REQUEST_RESPONSE_INFORMATION
        | MAXIMUM_QOS
        | RETAIN_AVAILABLE
        | WILDCARD_SUBSCRIPTION_AVAILABLE
        | SUBSCRIPTION_IDENTIFIER_AVAILABLE
        | SHARED_SUBSCRIPTION_AVAILABLE => ValueKind::Byte,
        SERVER_KEEP_ALIVE | RECEIVE_MAXIMUM | TOPIC_ALIAS_MAXIMUM | TOPIC_ALIAS => {
            ValueKind::TwoByte
        }
        MESSAGE_EXPIRY_INTERVAL
        | SESSION_EXPIRY_INTERVAL
        | WILL_DELAY_INTERVAL
        | MAXIMUM_PACKET_SIZE => ValueKind::FourByte,
        SUBSCRIPTION_IDENTIFIER => ValueKind::VarInt,
        CONTENT_TYPE
        | RESPONSE_TOPIC
        | ASSIGNED_CLIENT_IDENTIFIER
        | AUTHENTICATION_METHOD
        | RESPONSE_INFORMATION
        | SERVER_REFERENCE
        | REASON_STRING => ValueKind::Utf8,
        CORRELATION_DATA | AUTHENTICATION_DATA => ValueKind::Binary,
        USER_PROPERTY => ValueKind::Pair,
        _ => return None,
    };
    Some(kind)
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    TwoByteInteger(u16),
    FourByteInteger(u32),
    VariableByteInteger(u32),
    Utf8String(String),
    BinaryData(Bytes),
    Utf8StringPair(String, String),
}

/// A single identified property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: u8,
    pub value: PropertyValue,
}

/// Ordered list of MQTT 5.0 properties.
///
/// Order and duplicates are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    /// First property with the given identifier.
    pub fn get(&self, property_id: u8) -> Option<&PropertyValue> {
        self.0
            .iter()
            .find(|p| p.id == property_id)
            .map(|p| &p.value)
    }

    /// All user properties, in wire order.
    pub fn user_properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|p| match &p.value {
            PropertyValue::Utf8StringPair(k, v) if p.id == id::USER_PROPERTY => {
                Some((k.as_str(), v.as_str()))
            }
            _ => None,
        })
    }

    /// Appends a user property.
    pub fn push_user(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Property {
            id: id::USER_PROPERTY,
            value: PropertyValue::Utf8StringPair(key.into(), value.into()),
        });
    }

    /// Drops every property with the given identifier.
    pub fn remove(&mut self, property_id: u8) {
        self.0.retain(|p| p.id != property_id);
    }

    /// Reads a length-prefixed property block.
    pub(crate) fn read(reader: &mut Reader) -> ProtocolResult<Self> {
        let len = reader.read_var_int()? as usize;
        let mut block = reader.sub_reader(len)?;
        let mut props = Vec::new();

        while block.has_remaining() {
            let property_id = block.read_u8()?;
            let kind = value_kind(property_id).ok_or_else(|| {
                ProtocolError::malformed(format!("unknown property id {property_id:#04x}"))
            })?;
            let value = match kind {
                ValueKind::Byte => PropertyValue::Byte(block.read_u8()?),
                ValueKind::TwoByte => PropertyValue::TwoByteInteger(block.read_u16()?),
                ValueKind::FourByte => PropertyValue::FourByteInteger(block.read_u32()?),
                ValueKind::VarInt => PropertyValue::VariableByteInteger(block.read_var_int()?),
                ValueKind::Utf8 => PropertyValue::Utf8String(block.read_string()?),
                ValueKind::Binary => PropertyValue::BinaryData(block.read_binary()?),
                ValueKind::Pair => {
                    let key = block.read_string()?;
                    let value = block.read_string()?;
                    PropertyValue::Utf8StringPair(key, value)
                }
            };
            props.push(Property {
                id: property_id,
                value,
            });
        }

        Ok(Self(props))
    }

    /// Size of the property block body, excluding its own length prefix.
    fn body_len(&self) -> usize {
        self.0
            .iter()
            .map(|p| {
                1 + match &p.value {
                    PropertyValue::Byte(_) => 1,
                    PropertyValue::TwoByteInteger(_) => 2,
                    PropertyValue::FourByteInteger(_) => 4,
                    PropertyValue::VariableByteInteger(v) => var_int_len(*v as usize),
                    PropertyValue::Utf8String(s) => 2 + s.len(),
                    PropertyValue::BinaryData(b) => 2 + b.len(),
                    PropertyValue::Utf8StringPair(k, v) => 4 + k.len() + v.len(),
                }
            })
            .sum()
    }

    /// Encoded size including the length prefix.
    pub(crate) fn encoded_len(&self) -> usize {
        let body = self.body_len();
        var_int_len(body) + body
    }

    pub(crate) fn write(&self, dst: &mut BytesMut) -> ProtocolResult<()> {
        put_var_int(dst, self.body_len())?;
        for property in &self.0 {
            dst.put_u8(property.id);
            match &property.value {
                PropertyValue::Byte(v) => dst.put_u8(*v),
                PropertyValue::TwoByteInteger(v) => dst.put_u16(*v),
                PropertyValue::FourByteInteger(v) => dst.put_u32(*v),
                PropertyValue::VariableByteInteger(v) => put_var_int(dst, *v as usize)?,
                PropertyValue::Utf8String(s) => put_string(dst, s)?,
                PropertyValue::BinaryData(b) => put_binary(dst, b)?,
                PropertyValue::Utf8StringPair(k, v) => {
                    put_string(dst, k)?;
                    put_string(dst, v)?;
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<Property> for Properties {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
