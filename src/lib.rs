//! Composable protocol layers with bit-exact packing and dissection.
//!
//! A [`Packet`] is an ordered stack of [`Layer`]s. Each layer is an instance of
//! a [`LayerSchema`]: a list of typed fields, some of which are computed when
//! the packet is serialized (lengths, checksums, the protocol id naming the
//! next layer). Features:
//!
//! - Schemas defined at runtime and collected in a [`Registry`]
//! - Bit fields, flags, enumerations, variable-length byte strings
//! - Two-pass serialization resolving dependent fields across layers
//! - Greedy dissection that never fails, reporting truncation instead
//! - Raw `AF_PACKET` sockets, routed IPv4 sending, capture loops,
//!   request/response matching and packet-driven state machines
//! - Built-in Ethernet, ARP, IPv4, ICMP, UDP and TCP
//! - Serialization support via Serde

pub mod arp;
pub mod automaton;
mod bits;
pub mod capture;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod ethernet;
pub mod field;
pub mod icmp;
pub mod iface;
pub mod ip;
pub mod packet;
pub mod raw;
pub mod registry;
pub mod schema;
pub mod socket;
pub mod tcp;
pub mod udp;
pub mod value;

pub use codec::{DissectionResult, Dissector, Status, resolve, serialize, verify};
pub use error::PacketError;
pub use field::{FieldSpec, FieldType, Length, Rule, Span};
pub use packet::{Join, Layer, Packet, stack};
pub use registry::{Registry, RegistryBuilder};
pub use schema::{LayerSchema, NextLayer};
pub use value::Value;

/// Anything that can be turned into wire bytes.
pub trait PacketBuilder {
    /// Build the packet and return it as a vector of bytes.
    ///
    /// # Returns
    /// - `Ok(Vec<u8>)` - The serialized packet, every computed field resolved
    /// - `Err(PacketError)` - If a value does not encode or a field cannot be resolved
    fn build(&self) -> Result<Vec<u8>, PacketError>;

    /// Length of the serialized packet in bytes.
    fn length(&self) -> Result<usize, PacketError> {
        self.build().map(|bytes| bytes.len())
    }

    /// Checks that the packet serializes.
    fn validate(&self) -> Result<(), PacketError> {
        self.build().map(|_| ())
    }
}

impl PacketBuilder for Packet {
    fn build(&self) -> Result<Vec<u8>, PacketError> {
        codec::serialize(self)
    }
}

impl PacketBuilder for Layer {
    fn build(&self) -> Result<Vec<u8>, PacketError> {
        codec::serialize(&Packet::from(self.clone()))
    }
}
