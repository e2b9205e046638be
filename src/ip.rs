use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::field::{FieldSpec, FieldType, Length, Names, Rule, Span};
use crate::packet::Layer;
use crate::registry;
use crate::schema::{LayerSchema, NextLayer};
use crate::{PacketError, icmp, tcp, udp};

pub const NAME: &str = "IPv4";

/// IP Protocol Numbers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    ICMP = 1,
    TCP = 6,
    UDP = 17,
}

pub const IP_PROTOCOLS: Names = &[
    (IpProtocol::ICMP as u64, "ICMP"),
    (IpProtocol::TCP as u64, "TCP"),
    (IpProtocol::UDP as u64, "UDP"),
];

/// Flag names for the 3-bit flags field, least significant first.
pub const IP_FLAGS: &[&str] = &["MF", "DF", "evil"];

/// IPv4 address representation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Ipv4Address([u8; 4]);

impl Ipv4Address {
    pub const LOCALHOST: Ipv4Address = Ipv4Address([127, 0, 0, 1]);
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0; 4]);

    pub fn new(addr: [u8; 4]) -> Self {
        Self(addr)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn octets(&self) -> [u8; 4] {
        self.0
    }
}

impl Default for Ipv4Address {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Ipv4Address> for Ipv4Addr {
    fn from(addr: Ipv4Address) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl TryFrom<&[u8]> for Ipv4Address {
    type Error = PacketError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 4]>::try_from(bytes)
            .map(Ipv4Address)
            .map_err(|_| PacketError::InvalidFieldValue(format!("{} bytes is not an IPv4 address", bytes.len())))
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ipv4Addr::from(self.0).fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Self::from)
            .map_err(|_| PacketError::InvalidFieldValue(format!("invalid IPv4 address '{s}'")))
    }
}

pub(crate) fn define() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(NAME)
        .field(FieldSpec::bits("version", 4, 4))
        .field(FieldSpec::bits("ihl", 4, 5).computed(Rule::HeaderLength { scale: 4 }))
        .field(FieldSpec::bits("dscp", 6, 0))
        .field(FieldSpec::bits("ecn", 2, 0))
        .field(FieldSpec::uint16("total_length", 20).computed(Rule::TotalLength))
        .field(FieldSpec::uint16("id", 0))
        .field(FieldSpec::flags("flags", 3, IP_FLAGS, 0b010))
        .field(FieldSpec::bits("frag", 13, 0))
        .field(FieldSpec::uint8("ttl", 64))
        .field(FieldSpec::enumerated("proto", FieldType::u8(), IP_PROTOCOLS, 0))
        .field(FieldSpec::uint16("chksum", 0).computed(Rule::Checksum(Span::Header)))
        .field(FieldSpec::ipv4("src", Ipv4Address::LOCALHOST))
        .field(FieldSpec::ipv4("dst", Ipv4Address::LOCALHOST))
        .field(FieldSpec::bytes(
            "options",
            Length::FromField {
                field: "ihl".into(),
                scale: 4,
                minus: 20,
            },
        ))
        .next_layer(
            NextLayer::new()
                .bind("proto", IpProtocol::ICMP as u64, icmp::NAME)
                .bind("proto", IpProtocol::TCP as u64, tcp::NAME)
                .bind("proto", IpProtocol::UDP as u64, udp::NAME),
        )
        .extent("total_length")
        .build()
}

pub fn layer() -> Layer {
    Layer::new(registry::builtin(NAME))
}

pub fn packet(src: Ipv4Address, dst: Ipv4Address) -> Result<Layer, PacketError> {
    layer().set("src", src)?.set("dst", dst)
}
