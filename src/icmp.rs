//! ICMP (Internet Control Message Protocol) layer.
//!
//! The four bytes after the checksum are modelled as the echo `id`/`seq`
//! pair; other message types read them as opaque numbers.

use serde::{Deserialize, Serialize};

use crate::PacketError;
use crate::field::{FieldSpec, FieldType, Names, Rule, Span};
use crate::packet::{Layer, Packet};
use crate::registry;
use crate::schema::LayerSchema;

pub const NAME: &str = "ICMP";

/// ICMP message types as defined in RFC 792 and subsequent RFCs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    /// Echo Reply (Type 0)
    EchoReply = 0,
    /// Destination Unreachable (Type 3)
    DestinationUnreachable = 3,
    /// Redirect Message (Type 5)
    Redirect = 5,
    /// Echo Request (Type 8)
    EchoRequest = 8,
    /// Time Exceeded (Type 11)
    TimeExceeded = 11,
    /// Parameter Problem (Type 12)
    ParameterProblem = 12,
    /// Timestamp Request (Type 13)
    TimestampRequest = 13,
    /// Timestamp Reply (Type 14)
    TimestampReply = 14,
}

pub const ICMP_TYPES: Names = &[
    (IcmpType::EchoReply as u64, "echo-reply"),
    (IcmpType::DestinationUnreachable as u64, "dest-unreach"),
    (IcmpType::Redirect as u64, "redirect"),
    (IcmpType::EchoRequest as u64, "echo-request"),
    (IcmpType::TimeExceeded as u64, "time-exceeded"),
    (IcmpType::ParameterProblem as u64, "parameter-problem"),
    (IcmpType::TimestampRequest as u64, "timestamp-request"),
    (IcmpType::TimestampReply as u64, "timestamp-reply"),
];

/// ICMP codes for Destination Unreachable messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[repr(u8)]
pub enum DestUnreachableCode {
    NetworkUnreachable = 0,
    HostUnreachable = 1,
    ProtocolUnreachable = 2,
    PortUnreachable = 3,
    FragmentationNeeded = 4,
    SourceRouteFailed = 5,
}

pub(crate) fn define() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(NAME)
        .field(FieldSpec::enumerated(
            "type",
            FieldType::u8(),
            ICMP_TYPES,
            IcmpType::EchoRequest as u64,
        ))
        .field(FieldSpec::uint8("code", 0))
        .field(FieldSpec::uint16("chksum", 0).computed(Rule::Checksum(Span::ToEnd)))
        .field(FieldSpec::uint16("id", 0))
        .field(FieldSpec::uint16("seq", 0))
        .build()
}

pub fn layer() -> Layer {
    Layer::new(registry::builtin(NAME))
}

/// Creates a new Echo Request carrying `payload`.
pub fn echo_request(identifier: u16, sequence: u16, payload: Vec<u8>) -> Result<Packet, PacketError> {
    echo(IcmpType::EchoRequest, identifier, sequence, payload)
}

/// Creates a new Echo Reply carrying `payload`.
pub fn echo_reply(identifier: u16, sequence: u16, payload: Vec<u8>) -> Result<Packet, PacketError> {
    echo(IcmpType::EchoReply, identifier, sequence, payload)
}

fn echo(kind: IcmpType, identifier: u16, sequence: u16, payload: Vec<u8>) -> Result<Packet, PacketError> {
    let header = layer()
        .set("type", kind as u8)?
        .set("id", identifier)?
        .set("seq", sequence)?;
    Ok(Packet::from(header).with_payload(payload))
}
