//! Opaque byte layers: application payload and link-layer trailers.

use crate::PacketError;
use crate::field::{FieldSpec, Length};
use crate::schema::LayerSchema;

/// Payload bytes, and whatever remains once dissection stops interpreting.
pub const RAW: &str = "Raw";

/// Bytes past a layer's declared extent, e.g. Ethernet minimum-size padding.
pub const PADDING: &str = "Padding";

/// The single field of both layers.
pub const LOAD: &str = "load";

pub(crate) fn define_raw() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(RAW)
        .field(FieldSpec::bytes(LOAD, Length::Rest))
        .build()
}

pub(crate) fn define_padding() -> Result<LayerSchema, PacketError> {
    LayerSchema::builder(PADDING)
        .field(FieldSpec::bytes(LOAD, Length::Rest))
        .build()
}
