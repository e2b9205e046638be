use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::field::{FieldSpec, FieldType, Names};
use crate::packet::Layer;
use crate::registry;
use crate::schema::{LayerSchema, NextLayer};
use crate::{PacketError, arp, ip};

pub const NAME: &str = "Ethernet";

/// Frames shorter than this are zero padded on the wire.
pub const MIN_FRAME_LEN: usize = 60;

/// MAC address representation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl TryFrom<&[u8]> for MacAddress {
    type Error = PacketError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 6]>::try_from(bytes)
            .map(MacAddress)
            .map_err(|_| PacketError::InvalidFieldValue(format!("{} bytes is not a MAC address", bytes.len())))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PacketError::InvalidFieldValue(format!("invalid MAC address '{s}'"));
        let mut addr = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in addr.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(addr))
    }
}

/// EtherType values
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u16)]
pub enum EtherType {
    IPv4 = 0x0800,
    IPv6 = 0x86DD,
    ARP = 0x0806,
}

pub const ETHER_TYPES: Names = &[
    (EtherType::IPv4 as u64, "IPv4"),
    (EtherType::ARP as u64, "ARP"),
    (EtherType::IPv6 as u64, "IPv6"),
];

pub(crate) fn define() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(NAME)
        .field(FieldSpec::mac("dst", MacAddress::BROADCAST))
        .field(FieldSpec::mac("src", MacAddress::ZERO))
        .field(FieldSpec::enumerated("type", FieldType::u16(), ETHER_TYPES, 0x9000))
        .next_layer(
            NextLayer::new()
                .bind("type", EtherType::IPv4 as u64, ip::NAME)
                .bind("type", EtherType::ARP as u64, arp::NAME),
        )
        .min_length(MIN_FRAME_LEN)
        .build()
}

/// An Ethernet header with every field left to its default or to chaining.
pub fn layer() -> Layer {
    Layer::new(registry::builtin(NAME))
}

pub fn frame(dst: MacAddress, src: MacAddress) -> Result<Layer, PacketError> {
    layer().set("dst", dst)?.set("src", src)
}
