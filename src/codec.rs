//! Binary codec.
//!
//! Serialization is two-pass: every layer is encoded with zero placeholders
//! for computed fields, then lengths (outermost layer first), custom rules
//! and checksums (innermost layer first) are computed over the final buffer
//! and patched in place. Dissection is a single greedy walk that never fails; problems are
//! reported through [`Status`].

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::bits::{BitReader, BitWriter, copy_bits};
use crate::checksum::{Checksum, internet_checksum};
use crate::field::{FieldContext, FieldSpec, Rule, Span};
use crate::packet::{Layer, Packet};
use crate::registry::Registry;
use crate::schema::LayerSchema;
use crate::value::Value;
use crate::{PacketError, raw};

/// Byte positions of one layer inside a serialized packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerSpan {
    pub start: usize,
    /// End of this layer's own fields.
    pub header_end: usize,
    /// End of the layer's extent: its payload, excluding trailers.
    pub end: usize,
}

impl LayerSpan {
    pub fn header(&self) -> Range<usize> {
        self.start..self.header_end
    }

    pub fn extent(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// A fully resolved packet: final bytes plus the effective value of every field.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub bytes: Vec<u8>,
    pub values: Vec<Vec<Value>>,
    pub spans: Vec<LayerSpan>,
}

/// What a computation rule may look at.
pub struct RuleContext<'a> {
    packet: &'a Packet,
    buffer: &'a [u8],
    spans: &'a [LayerSpan],
    values: &'a [Vec<Value>],
    index: usize,
}

impl<'a> RuleContext<'a> {
    /// The whole serialized packet, placeholders included for fields not yet computed.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Position of the layer being computed.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn schema(&self) -> &'a LayerSchema {
        self.packet.layers()[self.index].schema()
    }

    pub fn span(&self) -> LayerSpan {
        self.spans[self.index]
    }

    pub fn spans(&self) -> &'a [LayerSpan] {
        self.spans
    }

    pub fn header_bytes(&self) -> &'a [u8] {
        &self.buffer[self.span().header()]
    }

    /// From the start of this layer to the end of its extent.
    pub fn layer_bytes(&self) -> &'a [u8] {
        &self.buffer[self.span().extent()]
    }

    /// A sibling's effective value.
    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.layer_value(self.index, name)
    }

    pub fn layer_value(&self, index: usize, name: &str) -> Option<&'a Value> {
        let field = self.packet.layer(index)?.schema().index_of(name)?;
        self.values.get(index)?.get(field)
    }

    /// First layer with the given name, starting from this one.
    pub fn find_layer(&self, name: &str) -> Option<usize> {
        self.packet.layers()[self.index..]
            .iter()
            .position(|layer| layer.name() == name)
            .map(|offset| self.index + offset)
    }

    /// Nearest layer below this one with the given name.
    pub fn enclosing(&self, name: &str) -> Option<usize> {
        self.packet.layers()[..self.index]
            .iter()
            .rposition(|layer| layer.name() == name)
    }

    fn unresolvable(&self, field: &str, reason: String) -> PacketError {
        PacketError::UnresolvableField {
            layer: self.schema().name().to_string(),
            field: field.to_string(),
            reason,
        }
    }
}

/// Lengths first so that custom rules and checksums see them, checksums
/// last so that they cover every other computed byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Length,
    Custom,
    Checksum,
}

impl Phase {
    fn of(rule: &Rule) -> Self {
        match rule {
            Rule::Custom(_) => Phase::Custom,
            rule if rule.is_length() => Phase::Length,
            _ => Phase::Checksum,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    width: usize,
    deferred: bool,
}

pub fn serialize(packet: &Packet) -> Result<Vec<u8>, PacketError> {
    resolve(packet).map(|resolved| resolved.bytes)
}

/// Serializes `packet`, keeping the effective values and layer spans.
pub fn resolve(packet: &Packet) -> Result<Resolved, PacketError> {
    let layers = packet.layers();
    let mut writer = BitWriter::new();
    let mut values = Vec::with_capacity(layers.len());
    let mut slots = Vec::with_capacity(layers.len());
    let mut spans = Vec::with_capacity(layers.len());

    for (i, layer) in layers.iter().enumerate() {
        let schema = layer.schema();
        let chained = layers
            .get(i + 1)
            .and_then(|upper| schema.next_layer()?.value_for(upper.name()));
        let start = writer.byte_len();
        let mut layer_values = Vec::with_capacity(schema.fields().len());
        let mut layer_slots = Vec::with_capacity(schema.fields().len());

        for (f, spec) in schema.fields().iter().enumerate() {
            let (value, deferred) = match (layer.explicit_at(f), chained) {
                (Some(value), _) => (value.clone(), false),
                (None, Some((field, id))) if field == spec.name() => (Value::Int(id), false),
                (None, _) if spec.rule().is_some() => {
                    (spec.field_type().placeholder(spec.default_value()), true)
                }
                (None, _) => (spec.default_value().clone(), false),
            };
            let offset = writer.bit_len();
            spec.field_type()
                .write(spec.name(), &value, &mut writer)
                .map_err(|e| e.in_layer(schema.name()))?;
            layer_slots.push(Slot {
                offset,
                width: writer.bit_len() - offset,
                deferred,
            });
            layer_values.push(value);
        }

        let header_end = writer.byte_len();
        spans.push(LayerSpan {
            start,
            header_end,
            end: header_end,
        });
        values.push(layer_values);
        slots.push(layer_slots);
    }

    let mut bytes = writer.into_bytes();

    // Extents: a layer ends where the first trailer after it that belongs to
    // it or to a layer below it begins, else at the end of everything encoded
    // so far. Trailers of inner layers stay inside the extent. Minimum lengths
    // are applied innermost first so an outer pad never counts towards an
    // inner extent.
    for i in (0..layers.len()).rev() {
        let trailer = (i + 1..layers.len())
            .find(|&j| layers[j].is_padding() && layers[j].trailer_of().is_none_or(|owner| owner <= i))
            .map(|j| spans[j].start);
        spans[i].end = match trailer {
            Some(end) => end,
            None => {
                let start = spans[i].start;
                let min = layers[i].schema().min_length();
                if bytes.len() - start < min {
                    bytes.resize(start + min, 0);
                }
                bytes.len()
            }
        };
    }

    let outward = (0..layers.len()).rev();
    let order: Vec<(Phase, usize)> = (0..layers.len())
        .map(|i| (Phase::Length, i))
        .chain(outward.clone().map(|i| (Phase::Custom, i)))
        .chain(outward.map(|i| (Phase::Checksum, i)))
        .collect();

    for (phase, i) in order {
        let schema = layers[i].schema();
        for (f, spec) in schema.fields().iter().enumerate() {
            let slot = slots[i][f];
            let Some(rule) = spec.rule() else { continue };
            if !slot.deferred || Phase::of(rule) != phase {
                continue;
            }
            let value = {
                let ctx = RuleContext {
                    packet,
                    buffer: &bytes,
                    spans: &spans,
                    values: &values,
                    index: i,
                };
                compute(rule, spec.name(), &ctx)?
            };
            patch(&mut bytes, slot, spec, &value).map_err(|e| e.in_layer(schema.name()))?;
            trace!(layer = schema.name(), field = spec.name(), %value, "computed field");
            values[i][f] = value;
        }
    }

    Ok(Resolved {
        bytes,
        values,
        spans,
    })
}

fn compute(rule: &Rule, field: &str, ctx: &RuleContext<'_>) -> Result<Value, PacketError> {
    let span = ctx.span();
    match rule {
        Rule::TotalLength => Ok(Value::Int((span.end - span.start) as u64)),
        Rule::HeaderLength { scale } => {
            let len = span.header_end - span.start;
            if *scale == 0 || len % scale != 0 {
                return Err(PacketError::encoding(
                    field,
                    format!("header length {len} is not a multiple of {scale}"),
                ));
            }
            Ok(Value::Int((len / scale) as u64))
        }
        Rule::LengthOf { field: target } => ctx
            .value(target)
            .and_then(Value::byte_len)
            .map(|len| Value::Int(len as u64))
            .ok_or_else(|| PacketError::encoding(field, format!("'{target}' has no byte length"))),
        Rule::Checksum(Span::Header) => Ok(Value::Int(u64::from(internet_checksum(ctx.header_bytes())))),
        Rule::Checksum(Span::ToEnd) => Ok(Value::Int(u64::from(internet_checksum(ctx.layer_bytes())))),
        Rule::Checksum(Span::Layers { first, last }) => {
            let a = ctx
                .find_layer(first)
                .ok_or_else(|| ctx.unresolvable(field, format!("no '{first}' layer in the packet")))?;
            let b = (a..ctx.spans.len())
                .find(|&j| ctx.packet.layers()[j].name() == last)
                .ok_or_else(|| ctx.unresolvable(field, format!("no '{last}' layer after '{first}'")))?;
            let covered = &ctx.buffer[ctx.spans[a].start..ctx.spans[b].end];
            Ok(Value::Int(u64::from(internet_checksum(covered))))
        }
        Rule::PseudoHeaderChecksum { network } => {
            let j = ctx
                .enclosing(network)
                .ok_or_else(|| ctx.unresolvable(field, format!("no enclosing '{network}' layer")))?;
            let missing = |name: &str| ctx.unresolvable(field, format!("'{network}' has no usable '{name}'"));
            let src = ctx.layer_value(j, "src").and_then(Value::as_ipv4).ok_or_else(|| missing("src"))?;
            let dst = ctx.layer_value(j, "dst").and_then(Value::as_ipv4).ok_or_else(|| missing("dst"))?;
            let proto = ctx.layer_value(j, "proto").and_then(Value::as_u64).ok_or_else(|| missing("proto"))?;
            let segment = ctx.layer_bytes();

            let mut sum = Checksum::new();
            sum.add_bytes(src.as_bytes());
            sum.add_bytes(dst.as_bytes());
            sum.add_u16(proto as u16);
            sum.add_u32(segment.len() as u32);
            sum.add_bytes(segment);
            let value = match sum.finish() {
                0 => 0xFFFF,
                v => v,
            };
            Ok(Value::Int(u64::from(value)))
        }
        Rule::Custom(f) => f(ctx),
    }
}

fn patch(bytes: &mut [u8], slot: Slot, spec: &FieldSpec, value: &Value) -> Result<(), PacketError> {
    let ty = spec.field_type();
    let encoded = ty.encode(value).map_err(|e| match e {
        PacketError::Encoding { reason, .. } => PacketError::encoding(spec.name(), reason),
        other => other,
    })?;
    let width = ty
        .int_bits()
        .map(|bits| bits as usize)
        .unwrap_or(encoded.len() * 8);
    if width != slot.width {
        return Err(PacketError::encoding(
            spec.name(),
            format!("computed value needs {width} bits, the field holds {}", slot.width),
        ));
    }
    copy_bits(bytes, slot.offset, &encoded, width);
    Ok(())
}

/// How far dissection got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Every byte was decoded, or handed over as payload after a terminal layer.
    Complete,
    /// A layer failed to decode for a reason other than length; the rest is raw.
    Opaque,
    /// The input ended inside a layer; the rest is raw.
    Truncated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DissectionResult {
    pub packet: Packet,
    pub status: Status,
    /// Bytes decoded into structured layers, excluding raw remainders and trailers.
    pub consumed: usize,
}

impl DissectionResult {
    pub fn is_complete(&self) -> bool {
        self.status == Status::Complete
    }
}

/// Greedy, selector-driven parser starting from a fixed root layer.
#[derive(Debug, Clone)]
pub struct Dissector<'r> {
    registry: &'r Registry,
    root: Arc<LayerSchema>,
}

impl<'r> Dissector<'r> {
    pub fn new(registry: &'r Registry, root: &str) -> Result<Self, PacketError> {
        Ok(Self {
            registry,
            root: registry.schema(root)?,
        })
    }

    pub fn root(&self) -> &LayerSchema {
        &self.root
    }

    pub fn dissect(&self, bytes: &[u8]) -> DissectionResult {
        let mut layers = Vec::new();
        let mut trailers = Vec::new();
        let mut status = Status::Complete;
        let mut offset = 0;
        let mut limit = bytes.len();
        let mut current = Some(Arc::clone(&self.root));

        while let Some(schema) = current.take() {
            if offset >= limit {
                if layers.is_empty() && schema.min_bytes() > 0 {
                    status = Status::Truncated;
                }
                break;
            }
            let (values, consumed) = match decode_layer(&schema, &bytes[offset..limit]) {
                Ok(decoded) => decoded,
                Err(PacketError::Truncated { needed, available, .. }) => {
                    debug!(layer = schema.name(), offset, needed, available, "truncated layer");
                    status = Status::Truncated;
                    break;
                }
                Err(e) => {
                    warn!(layer = schema.name(), offset, error = %e, "undecodable layer");
                    status = Status::Opaque;
                    break;
                }
            };

            if let Some(extent) = schema.extent_field() {
                let declared = values[extent].as_u64().and_then(|v| usize::try_from(v).ok());
                if let Some(declared) = declared.filter(|d| *d >= consumed) {
                    let bound = offset.saturating_add(declared);
                    if bound < limit {
                        trailers.push((bound, layers.len(), bytes[bound..limit].to_vec()));
                        limit = bound;
                    }
                }
            }

            let next = schema
                .next_layer()
                .and_then(|next| next.select(&schema, &values))
                .and_then(|name| match self.registry.get(name) {
                    Some(schema) => Some(Arc::clone(schema)),
                    None => {
                        debug!(layer = name, "next layer is not registered");
                        None
                    }
                });
            layers.push(Layer::decoded(schema, values));
            offset += consumed;
            if consumed == 0 {
                break;
            }
            current = next;
        }

        let consumed = offset;
        if offset < limit {
            layers.push(Layer::raw(&bytes[offset..limit]));
        }
        trailers.sort_by_key(|(at, _, _)| *at);
        layers.extend(
            trailers
                .into_iter()
                .map(|(_, owner, bytes)| Layer::trailer(bytes, owner)),
        );

        let packet = Packet::from_layers(layers);
        trace!(summary = %packet.summary(), ?status, "dissected");
        DissectionResult {
            packet,
            status,
            consumed,
        }
    }
}

fn decode_layer(schema: &LayerSchema, data: &[u8]) -> Result<(Vec<Value>, usize), PacketError> {
    let mut reader = BitReader::new(data);
    let mut values = Vec::with_capacity(schema.fields().len());
    for spec in schema.fields() {
        let value = {
            let ctx = FieldContext::new(schema, &values);
            spec.field_type().read(spec.name(), &mut reader, &ctx)?
        };
        values.push(value);
    }
    Ok((values, reader.position() / 8))
}

/// A computed field whose value on the wire disagrees with a recomputation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub layer: usize,
    pub layer_name: String,
    pub field: String,
    pub found: Value,
    pub expected: Value,
}

/// Recomputes every computed field of `packet` and reports disagreements
/// with the values it carries, e.g. bad checksums in a dissected packet.
///
/// A zero pseudo-header checksum means "not computed" and is accepted.
pub fn verify(packet: &Packet) -> Result<Vec<Mismatch>, PacketError> {
    let expected = resolve(&packet.clear_computed())?;
    let mut mismatches = Vec::new();
    for (i, layer) in packet.layers().iter().enumerate() {
        if layer.name() == raw::RAW || layer.is_padding() {
            continue;
        }
        for (f, spec) in layer.schema().fields().iter().enumerate() {
            let (Some(rule), Some(found)) = (spec.rule(), layer.explicit_at(f)) else {
                continue;
            };
            if matches!(rule, Rule::PseudoHeaderChecksum { .. }) && found.as_u64() == Some(0) {
                continue;
            }
            let expected = &expected.values[i][f];
            if found != expected {
                mismatches.push(Mismatch {
                    layer: i,
                    layer_name: layer.name().to_string(),
                    field: spec.name().to_string(),
                    found: found.clone(),
                    expected: expected.clone(),
                });
            }
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethernet::{self, MacAddress};
    use crate::ip::{self, Ipv4Address};
    use crate::registry::{self, RegistryBuilder};
    use crate::{icmp, udp};

    fn udp_frame() -> Packet {
        let src = Ipv4Address::new([10, 0, 0, 1]);
        let dst = Ipv4Address::new([10, 0, 0, 2]);
        (ethernet::frame(MacAddress::BROADCAST, MacAddress::new([2, 0, 0, 0, 0, 1])).unwrap()
            / ip::packet(src, dst).unwrap()
            / udp::datagram(4000, 53).unwrap())
        .with_payload(b"query".to_vec())
    }

    #[test]
    fn test_spans() {
        let resolved = resolve(&udp_frame()).unwrap();
        assert_eq!(resolved.bytes.len(), 60);
        let spans = &resolved.spans;
        assert_eq!(spans[0], LayerSpan { start: 0, header_end: 14, end: 60 });
        assert_eq!(spans[1], LayerSpan { start: 14, header_end: 34, end: 47 });
        assert_eq!(spans[2], LayerSpan { start: 34, header_end: 42, end: 47 });
        assert_eq!(resolved.values[1][4], Value::Int(33));
        assert_eq!(resolved.values[2][2], Value::Int(13));
    }

    #[test]
    fn test_dissect_ethernet_frame() {
        let bytes = udp_frame().to_bytes().unwrap();
        let result = Packet::dissect(&bytes, ethernet::NAME).unwrap();
        assert_eq!(result.status, Status::Complete);
        assert_eq!(result.consumed, 42);
        let packet = result.packet;
        assert_eq!(packet.summary(), "Ethernet / IPv4 / UDP / Raw / Padding");
        assert_eq!(packet.payload(), Some(&b"query"[..]));
        assert_eq!(packet.layer(4).unwrap().get(raw::LOAD), Some(&Value::Bytes(vec![0; 13])));

        // Reserializing a dissected packet gives back the same frame.
        assert_eq!(packet.to_bytes().unwrap(), bytes);
        assert!(verify(&packet).unwrap().is_empty());
    }

    #[test]
    fn test_verify_reports_bad_checksum() {
        let mut bytes = udp_frame().to_bytes().unwrap();
        bytes[24] ^= 0xFF; // IPv4 header checksum
        let packet = Packet::dissect(&bytes, ethernet::NAME).unwrap().packet;
        let mismatches = verify(&packet).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].layer_name, "IPv4");
        assert_eq!(mismatches[0].field, "chksum");
    }

    #[test]
    fn test_truncated_inside_layer() {
        let bytes = udp_frame().to_bytes().unwrap();
        let result = Packet::dissect(&bytes[..30], ethernet::NAME).unwrap();
        assert_eq!(result.status, Status::Truncated);
        assert_eq!(result.consumed, 14);
        assert_eq!(result.packet.summary(), "Ethernet / Raw");
        assert_eq!(result.packet.payload(), Some(&bytes[14..30]));
    }

    #[test]
    fn test_every_short_prefix_is_truncated() {
        let bytes = Packet::from(ip::layer()).to_bytes().unwrap();
        for k in 0..20 {
            let result = Packet::dissect(&bytes[..k], ip::NAME).unwrap();
            assert_eq!(result.status, Status::Truncated, "prefix of {k} bytes");
        }
    }

    #[test]
    fn test_bad_header_length_is_opaque() {
        let mut bytes = Packet::from(ip::layer()).to_bytes().unwrap();
        bytes[0] = 0x42; // IHL below the fixed header size
        let result = Packet::dissect(&bytes, ip::NAME).unwrap();
        assert_eq!(result.status, Status::Opaque);
        assert_eq!(result.packet.summary(), "Raw");
    }

    #[test]
    fn test_unknown_selector_value_stops() {
        let packet = Packet::from(ethernet::layer().set("type", 0x88CCu16).unwrap()).with_payload(vec![7; 50]);
        let bytes = packet.to_bytes().unwrap();
        let result = Packet::dissect(&bytes, ethernet::NAME).unwrap();
        assert_eq!(result.status, Status::Complete);
        assert_eq!(result.packet.summary(), "Ethernet / Raw");
    }

    fn sum_of_following(ctx: &RuleContext<'_>) -> Result<Value, PacketError> {
        let span = ctx.span();
        Ok(Value::Int(ctx.buffer()[span.header_end..span.end].iter().map(|b| u64::from(*b)).sum()))
    }

    /// A `Trailer` layer whose checksum covers itself up to the next `Raw`.
    fn trailer_registry() -> Registry {
        RegistryBuilder::with_builtins()
            .define(
                "Trailer",
                vec![
                    FieldSpec::uint16("whole", 0).computed(Rule::Checksum(Span::Layers {
                        first: "Trailer".into(),
                        last: "Raw".into(),
                    })),
                    FieldSpec::uint16("sum", 0).computed(Rule::Custom(sum_of_following)),
                ],
                None,
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_layers_span_checksum() {
        let registry = trailer_registry();
        let layer = Layer::new(registry.schema("Trailer").unwrap());
        let packet = Packet::from(layer).with_payload(vec![1, 2, 3]);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(&bytes[2..4], &[0, 6]);
        assert_eq!(internet_checksum(&bytes), 0);
        assert!(registry::global().get("Trailer").is_none());
    }

    #[test]
    fn test_layers_span_starts_at_own_instance() {
        let registry = trailer_registry();
        let layer = Layer::new(registry.schema("Trailer").unwrap());
        let packet = (layer.clone() / layer).with_payload(vec![1, 2, 3]);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), 11);
        // The inner instance covers only itself and the payload.
        assert_eq!(&bytes[6..8], &[0, 6]);
        assert_eq!(internet_checksum(&bytes[4..]), 0);
        // The outer one covers everything, the inner checksum included.
        assert_eq!(internet_checksum(&bytes), 0);
    }

    #[test]
    fn test_inner_trailer_stays_in_outer_extent() {
        let src = Ipv4Address::new([10, 0, 0, 1]);
        let dst = Ipv4Address::new([10, 0, 0, 2]);
        // IPv4 says 40 bytes, UDP says 8: twelve bytes trail the datagram
        // but still belong to the IPv4 packet.
        let built = ip::packet(src, dst).unwrap().set("total_length", 40u16).unwrap()
            / udp::datagram(4000, 53).unwrap()
            / Layer::padding(vec![0xAB; 12]);
        let wire = built.to_bytes().unwrap();
        assert_eq!(wire.len(), 40);
        assert_eq!(&wire[24..26], &[0, 8]);

        let result = Packet::dissect(&wire, ip::NAME).unwrap();
        assert_eq!(result.status, Status::Complete);
        let packet = result.packet;
        assert_eq!(packet.summary(), "IPv4 / UDP / Padding");
        assert_eq!(packet.layer(2).unwrap().trailer_of(), Some(1));

        assert!(verify(&packet).unwrap().is_empty());
        let rebuilt = packet.clear_computed().to_bytes().unwrap();
        assert_eq!(rebuilt, wire);
        let spans = resolve(&packet).unwrap().spans;
        assert_eq!(spans[0].extent(), 0..40);
        assert_eq!(spans[1].extent(), 20..28);
    }

    #[test]
    fn test_trailer_owner_follows_stacking() {
        let bytes = udp_frame().to_bytes().unwrap();
        let dissected = Packet::dissect(&bytes[14..], ip::NAME).unwrap().packet;
        assert_eq!(dissected.summary(), "IPv4 / UDP / Raw / Padding");
        assert_eq!(dissected.layer(3).unwrap().trailer_of(), Some(0));

        let framed = Packet::from(ethernet::frame(MacAddress::BROADCAST, MacAddress::new([2, 0, 0, 0, 0, 1])).unwrap())
            / dissected.clone();
        assert_eq!(framed.layer(4).unwrap().trailer_of(), Some(1));
        assert_eq!(framed.to_bytes().unwrap(), bytes);
        assert_eq!(framed.slice(1..5).unwrap(), dissected);
    }

    #[test]
    fn test_icmp_inside_ip_checksums() {
        let packet = ip::layer() / icmp::echo_request(1, 2, vec![0xAA; 3]).unwrap();
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes[9], 1);
        assert_eq!(internet_checksum(&bytes[..20]), 0);
        assert_eq!(internet_checksum(&bytes[20..]), 0);
        let back = Packet::dissect(&bytes, ip::NAME).unwrap().packet;
        assert_eq!(back.summary(), "IPv4 / ICMP / Raw");
    }
}
