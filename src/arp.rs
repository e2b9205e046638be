//! ARP (Address Resolution Protocol) layer.
//!
//! Only the Ethernet/IPv4 flavour is modelled, so the address fields have
//! fixed widths and `hwlen`/`plen` are plain fields.

use serde::{Deserialize, Serialize};

use crate::PacketError;
use crate::ethernet::MacAddress;
use crate::field::{FieldSpec, FieldType, Names};
use crate::ip::Ipv4Address;
use crate::packet::Layer;
use crate::registry;
use crate::schema::LayerSchema;

pub const NAME: &str = "ARP";

/// ARP hardware types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[repr(u16)]
pub enum HardwareType {
    /// Ethernet (10Mb)
    Ethernet = 1,
    /// IEEE 802 Networks
    IEEE802 = 6,
}

/// ARP operation codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u16)]
pub enum Operation {
    /// ARP Request
    Request = 1,
    /// ARP Reply
    Reply = 2,
    /// RARP Request
    ReverseRequest = 3,
    /// RARP Reply
    ReverseReply = 4,
}

pub const OPERATIONS: Names = &[
    (Operation::Request as u64, "who-has"),
    (Operation::Reply as u64, "is-at"),
    (Operation::ReverseRequest as u64, "RARP-req"),
    (Operation::ReverseReply as u64, "RARP-rep"),
];

pub(crate) fn define() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(NAME)
        .field(FieldSpec::uint16("hwtype", HardwareType::Ethernet as u16))
        .field(FieldSpec::uint16("ptype", 0x0800))
        .field(FieldSpec::uint8("hwlen", 6))
        .field(FieldSpec::uint8("plen", 4))
        .field(FieldSpec::enumerated(
            "op",
            FieldType::u16(),
            OPERATIONS,
            Operation::Request as u64,
        ))
        .field(FieldSpec::mac("hwsrc", MacAddress::ZERO))
        .field(FieldSpec::ipv4("psrc", Ipv4Address::UNSPECIFIED))
        .field(FieldSpec::mac("hwdst", MacAddress::ZERO))
        .field(FieldSpec::ipv4("pdst", Ipv4Address::UNSPECIFIED))
        .build()
}

pub fn layer() -> Layer {
    Layer::new(registry::builtin(NAME))
}

/// Creates a new ARP request ("who-has `target`").
pub fn request(
    sender_hardware_addr: MacAddress,
    sender_protocol_addr: Ipv4Address,
    target_protocol_addr: Ipv4Address,
) -> Result<Layer, PacketError> {
    layer()
        .set("op", Operation::Request as u16)?
        .set("hwsrc", sender_hardware_addr)?
        .set("psrc", sender_protocol_addr)?
        .set("pdst", target_protocol_addr)
}

/// Creates a new ARP reply ("`sender` is-at `sender_hardware_addr`").
pub fn reply(
    sender_hardware_addr: MacAddress,
    sender_protocol_addr: Ipv4Address,
    target_hardware_addr: MacAddress,
    target_protocol_addr: Ipv4Address,
) -> Result<Layer, PacketError> {
    layer()
        .set("op", Operation::Reply as u16)?
        .set("hwsrc", sender_hardware_addr)?
        .set("psrc", sender_protocol_addr)?
        .set("hwdst", target_hardware_addr)?
        .set("pdst", target_protocol_addr)
}
