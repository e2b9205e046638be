//! UDP (User Datagram Protocol) layer.
//!
//! The checksum includes the IPv4 pseudo-header, so a UDP layer whose
//! checksum is left to be computed must be carried inside an IPv4 layer.

use crate::PacketError;
use crate::field::{FieldSpec, Rule};
use crate::ip;
use crate::packet::Layer;
use crate::registry;
use crate::schema::LayerSchema;

pub const NAME: &str = "UDP";

pub(crate) fn define() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(NAME)
        .field(FieldSpec::uint16("sport", 53))
        .field(FieldSpec::uint16("dport", 53))
        .field(FieldSpec::uint16("len", 8).computed(Rule::TotalLength))
        .field(FieldSpec::uint16("chksum", 0).computed(Rule::PseudoHeaderChecksum {
            network: ip::NAME.into(),
        }))
        .extent("len")
        .build()
}

pub fn layer() -> Layer {
    Layer::new(registry::builtin(NAME))
}

pub fn datagram(src_port: u16, dst_port: u16) -> Result<Layer, PacketError> {
    layer().set("sport", src_port)?.set("dport", dst_port)
}
