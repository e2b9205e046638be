//! TCP (Transmission Control Protocol) segment header.
//!
//! Only the header layout is modelled; there is no connection state.

use serde::{Deserialize, Serialize};

use crate::PacketError;
use crate::field::{FieldSpec, Length, Rule};
use crate::ip;
use crate::packet::Layer;
use crate::registry;
use crate::schema::LayerSchema;

pub const NAME: &str = "TCP";

/// Flag names for the 8-bit flags field, least significant first.
pub const TCP_FLAGS: &[&str] = &["F", "S", "R", "P", "A", "U", "E", "C"];

/// TCP Flags
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn syn() -> Self {
        Self {
            syn: true,
            ..Self::default()
        }
    }

    pub fn as_u8(&self) -> u8 {
        [
            self.fin, self.syn, self.rst, self.psh, self.ack, self.urg, self.ece, self.cwr,
        ]
        .iter()
        .enumerate()
        .fold(0u8, |acc, (bit, set)| if *set { acc | (1 << bit) } else { acc })
    }

    pub fn from_u8(bits: u8) -> Self {
        let set = |bit: u8| bits & (1 << bit) != 0;
        Self {
            fin: set(0),
            syn: set(1),
            rst: set(2),
            psh: set(3),
            ack: set(4),
            urg: set(5),
            ece: set(6),
            cwr: set(7),
        }
    }
}

/// TCP Header Options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TcpOption {
    EndOfOptionList,
    NoOperation,
    MaximumSegmentSize(u16),
    WindowScale(u8),
    SelectiveAckPermitted,
    Timestamp(u32, u32),
}

impl TcpOption {
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            TcpOption::EndOfOptionList => vec![0],
            TcpOption::NoOperation => vec![1],
            TcpOption::MaximumSegmentSize(size) => {
                let [hi, lo] = size.to_be_bytes();
                vec![2, 4, hi, lo]
            }
            TcpOption::WindowScale(shift) => vec![3, 3, *shift],
            TcpOption::SelectiveAckPermitted => vec![4, 2],
            TcpOption::Timestamp(val, echo) => {
                let mut bytes = vec![8, 10];
                bytes.extend_from_slice(&val.to_be_bytes());
                bytes.extend_from_slice(&echo.to_be_bytes());
                bytes
            }
        }
    }
}

/// Encodes `options` and pads them with end-of-list bytes to a 32-bit boundary.
pub fn encode_options(options: &[TcpOption]) -> Vec<u8> {
    let mut bytes: Vec<u8> = options.iter().flat_map(TcpOption::as_bytes).collect();
    bytes.resize(bytes.len().next_multiple_of(4), 0);
    bytes
}

pub(crate) fn define() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(NAME)
        .field(FieldSpec::uint16("sport", 20))
        .field(FieldSpec::uint16("dport", 80))
        .field(FieldSpec::uint32("seq", 0))
        .field(FieldSpec::uint32("ack", 0))
        .field(FieldSpec::bits("dataofs", 4, 5).computed(Rule::HeaderLength { scale: 4 }))
        .field(FieldSpec::bits("reserved", 4, 0))
        .field(FieldSpec::flags("flags", 8, TCP_FLAGS, 0x02))
        .field(FieldSpec::uint16("window", 65535))
        .field(FieldSpec::uint16("chksum", 0).computed(Rule::PseudoHeaderChecksum {
            network: ip::NAME.into(),
        }))
        .field(FieldSpec::uint16("urgptr", 0))
        .field(FieldSpec::bytes(
            "options",
            Length::FromField {
                field: "dataofs".into(),
                scale: 4,
                minus: 20,
            },
        ))
        .build()
}

pub fn layer() -> Layer {
    Layer::new(registry::builtin(NAME))
}

pub fn segment(src_port: u16, dst_port: u16, flags: TcpFlags) -> Result<Layer, PacketError> {
    layer()
        .set("sport", src_port)?
        .set("dport", dst_port)?
        .set("flags", flags.as_u8())
}
