//! Field types, field specifications and computation rules.
//!
//! A [`FieldType`] is a closed set of wire encodings. A [`FieldSpec`] names a
//! field inside a layer, gives it a default and optionally a [`Rule`] that
//! computes its value at serialization time.

use crate::bits::{BitReader, BitWriter};
use crate::codec::RuleContext;
use crate::error::PacketError;
use crate::schema::LayerSchema;
use crate::value::Value;

/// Byte order for multi-byte integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Symbolic names for integer values, e.g. `(17, "UDP")`.
pub type Names = &'static [(u64, &'static str)];

/// Length of a byte-string field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Length {
    Fixed(usize),
    /// `value(field) * scale - minus` bytes; `field` precedes this one in the layer.
    FromField {
        field: String,
        scale: usize,
        minus: usize,
    },
    /// Everything up to the end of the layer's extent.
    Rest,
}

impl Length {
    /// Length taken verbatim from a preceding length-prefix field.
    pub fn prefixed(field: impl Into<String>) -> Self {
        Length::FromField {
            field: field.into(),
            scale: 1,
            minus: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Byte-aligned unsigned integer, 1 to 8 bytes wide.
    UInt { bytes: u8, endian: Endian },
    /// Member of a bit-field run, 1 to 64 bits wide.
    Bits(u8),
    /// Bit-field rendered as set flags; `names[0]` is the least significant bit.
    Flags {
        width: u8,
        names: &'static [&'static str],
    },
    /// Integer with symbolic names for known values.
    Enum { base: Box<FieldType>, names: Names },
    Bytes(Length),
    Mac,
    Ipv4,
}

impl FieldType {
    pub fn u8() -> Self {
        FieldType::UInt {
            bytes: 1,
            endian: Endian::Big,
        }
    }

    pub fn u16() -> Self {
        FieldType::UInt {
            bytes: 2,
            endian: Endian::Big,
        }
    }

    pub fn u32() -> Self {
        FieldType::UInt {
            bytes: 4,
            endian: Endian::Big,
        }
    }

    /// Width in bits for integer-like types.
    pub fn int_bits(&self) -> Option<u32> {
        match self {
            FieldType::UInt { bytes, .. } => Some(u32::from(*bytes) * 8),
            FieldType::Bits(width) | FieldType::Flags { width, .. } => Some(u32::from(*width)),
            FieldType::Enum { base, .. } => base.int_bits(),
            _ => None,
        }
    }

    pub fn is_int(&self) -> bool {
        self.int_bits().is_some()
    }

    /// True for members of a bit-field run, which need not start on a byte boundary.
    pub fn is_bitwise(&self) -> bool {
        match self {
            FieldType::Bits(_) | FieldType::Flags { .. } => true,
            FieldType::Enum { base, .. } => base.is_bitwise(),
            _ => false,
        }
    }

    /// Minimum encoded width in bits.
    pub fn min_bits(&self) -> usize {
        match self {
            FieldType::Bytes(Length::Fixed(n)) => n * 8,
            FieldType::Bytes(_) => 0,
            FieldType::Mac => 48,
            FieldType::Ipv4 => 32,
            other => other.int_bits().unwrap_or(0) as usize,
        }
    }

    /// Zero-valued stand-in of the same width, used for deferred fields.
    pub(crate) fn placeholder(&self, default: &Value) -> Value {
        match self {
            FieldType::Bytes(Length::Fixed(n)) => Value::Bytes(vec![0; *n]),
            FieldType::Bytes(_) => default.clone(),
            FieldType::Mac => Value::Bytes(vec![0; 6]),
            FieldType::Ipv4 => Value::Bytes(vec![0; 4]),
            _ => Value::Int(0),
        }
    }

    /// Encodes `value` on its own; sub-byte values occupy the high bits of the result.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, PacketError> {
        let mut writer = BitWriter::new();
        self.write("value", value, &mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decodes one value at byte `offset`, returning it with the number of bytes consumed.
    pub fn decode(
        &self,
        bytes: &[u8],
        offset: usize,
        ctx: &FieldContext<'_>,
    ) -> Result<(Value, usize), PacketError> {
        let data = bytes.get(offset..).unwrap_or_default();
        let mut reader = BitReader::new(data);
        let value = self
            .read("value", &mut reader, ctx)
            .map_err(|e| shift_offset(e, offset))?;
        Ok((value, reader.position().div_ceil(8)))
    }

    pub(crate) fn write(
        &self,
        field: &str,
        value: &Value,
        out: &mut BitWriter,
    ) -> Result<(), PacketError> {
        match self {
            FieldType::UInt { bytes, endian } => {
                let v = int_of(field, value)?;
                check_width(field, v, u32::from(*bytes) * 8)?;
                match endian {
                    Endian::Big => out.push_bits(v, u32::from(*bytes) * 8),
                    Endian::Little => out.push_bytes(&v.to_le_bytes()[..usize::from(*bytes)]),
                }
            }
            FieldType::Bits(width) | FieldType::Flags { width, .. } => {
                let v = int_of(field, value)?;
                check_width(field, v, u32::from(*width))?;
                out.push_bits(v, u32::from(*width));
            }
            FieldType::Enum { base, .. } => base.write(field, value, out)?,
            FieldType::Mac => {
                let mac = value.as_mac().ok_or_else(|| {
                    PacketError::encoding(field, format!("expected a MAC address, got {value}"))
                })?;
                out.push_bytes(mac.as_bytes());
            }
            FieldType::Ipv4 => {
                let addr = value.as_ipv4().ok_or_else(|| {
                    PacketError::encoding(field, format!("expected an IPv4 address, got {value}"))
                })?;
                out.push_bytes(addr.as_bytes());
            }
            FieldType::Bytes(length) => {
                let bytes = value.as_bytes().ok_or_else(|| {
                    PacketError::encoding(field, format!("expected bytes, got {value}"))
                })?;
                if let Length::Fixed(n) = length {
                    if bytes.len() != *n {
                        return Err(PacketError::encoding(
                            field,
                            format!("expected exactly {n} bytes, got {}", bytes.len()),
                        ));
                    }
                }
                out.push_bytes(bytes);
            }
        }
        Ok(())
    }

    pub(crate) fn read(
        &self,
        field: &str,
        reader: &mut BitReader<'_>,
        ctx: &FieldContext<'_>,
    ) -> Result<Value, PacketError> {
        match self {
            FieldType::UInt { bytes, endian } => {
                let n = usize::from(*bytes);
                match endian {
                    Endian::Big => reader
                        .read_bits(u32::from(*bytes) * 8)
                        .map(Value::Int)
                        .ok_or_else(|| truncated(reader, n * 8)),
                    Endian::Little => {
                        let raw = reader.read_bytes(n).ok_or_else(|| truncated(reader, n * 8))?;
                        let v = raw.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                        Ok(Value::Int(v))
                    }
                }
            }
            FieldType::Bits(width) | FieldType::Flags { width, .. } => reader
                .read_bits(u32::from(*width))
                .map(Value::Int)
                .ok_or_else(|| truncated(reader, usize::from(*width))),
            FieldType::Enum { base, .. } => base.read(field, reader, ctx),
            FieldType::Mac => {
                let raw = reader.read_bytes(6).ok_or_else(|| truncated(reader, 48))?;
                Ok(Value::Mac(raw.as_slice().try_into().map_err(|_| truncated(reader, 48))?))
            }
            FieldType::Ipv4 => {
                let raw = reader.read_bytes(4).ok_or_else(|| truncated(reader, 32))?;
                Ok(Value::Ipv4(raw.as_slice().try_into().map_err(|_| truncated(reader, 32))?))
            }
            FieldType::Bytes(length) => {
                let n = match length {
                    Length::Fixed(n) => *n,
                    Length::Rest => reader.remaining_bytes(),
                    Length::FromField {
                        field: source,
                        scale,
                        minus,
                    } => {
                        let prefix = ctx.int(source).ok_or_else(|| {
                            PacketError::UnknownField(format!("{field} length source '{source}'"))
                        })?;
                        let total = usize::try_from(prefix)
                            .ok()
                            .and_then(|p| p.checked_mul(*scale))
                            .unwrap_or(usize::MAX);
                        total.checked_sub(*minus).ok_or_else(|| {
                            PacketError::InvalidFieldValue(format!(
                                "{field}: length {total} is shorter than {minus}"
                            ))
                        })?
                    }
                };
                reader
                    .read_bytes(n)
                    .map(Value::Bytes)
                    .ok_or_else(|| truncated(reader, n.saturating_mul(8)))
            }
        }
    }

    /// Human-readable rendering, using symbolic names where the type has them.
    pub fn describe(&self, value: &Value) -> String {
        match (self, value) {
            (FieldType::Enum { names, .. }, Value::Int(v)) => names
                .iter()
                .find(|(known, _)| known == v)
                .map(|(_, name)| format!("{name} ({v})"))
                .unwrap_or_else(|| v.to_string()),
            (FieldType::Flags { names, .. }, Value::Int(v)) => {
                let set: String = names
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| (v >> bit) & 1 == 1)
                    .map(|(_, name)| *name)
                    .collect();
                if set.is_empty() { v.to_string() } else { set }
            }
            _ => value.to_string(),
        }
    }
}

fn int_of(field: &str, value: &Value) -> Result<u64, PacketError> {
    value
        .as_u64()
        .ok_or_else(|| PacketError::encoding(field, format!("expected an integer, got {value}")))
}

fn check_width(field: &str, value: u64, bits: u32) -> Result<(), PacketError> {
    if bits < 64 && value >> bits != 0 {
        return Err(PacketError::encoding(
            field,
            format!("value {value} does not fit in {bits} bits"),
        ));
    }
    Ok(())
}

fn truncated(reader: &BitReader<'_>, needed_bits: usize) -> PacketError {
    PacketError::Truncated {
        offset: reader.position() / 8,
        needed: needed_bits.div_ceil(8),
        available: reader.remaining_bytes(),
    }
}

fn shift_offset(err: PacketError, by: usize) -> PacketError {
    match err {
        PacketError::Truncated {
            offset,
            needed,
            available,
        } => PacketError::Truncated {
            offset: offset + by,
            needed,
            available,
        },
        other => other,
    }
}

/// Sibling values visible while decoding a field.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    schema: Option<&'a LayerSchema>,
    values: &'a [Value],
}

impl<'a> FieldContext<'a> {
    pub fn new(schema: &'a LayerSchema, values: &'a [Value]) -> Self {
        Self {
            schema: Some(schema),
            values,
        }
    }

    /// A context with no siblings, for standalone encodes and decodes.
    pub fn empty() -> Self {
        Self {
            schema: None,
            values: &[],
        }
    }

    pub fn value(&self, name: &str) -> Option<&'a Value> {
        let index = self.schema?.index_of(name)?;
        self.values.get(index)
    }

    pub fn int(&self, name: &str) -> Option<u64> {
        self.value(name).and_then(Value::as_u64)
    }
}

/// Byte range covered by a checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    /// This layer's own header bytes.
    Header,
    /// From this layer's start to the end of its extent.
    ToEnd,
    /// From the start of the first layer named `first` to the end of the
    /// first following layer named `last`.
    Layers { first: String, last: String },
}

pub type ComputeFn = fn(&RuleContext<'_>) -> Result<Value, PacketError>;

/// How a field's value is derived when it has not been set explicitly.
#[derive(Debug, Clone)]
pub enum Rule {
    TotalLength,
    HeaderLength { scale: usize },
    LengthOf { field: String },
    Checksum(Span),
    PseudoHeaderChecksum { network: String },
    Custom(ComputeFn),
}

impl Rule {
    /// Length rules run before checksums so checksums see final lengths.
    pub(crate) fn is_length(&self) -> bool {
        matches!(
            self,
            Rule::TotalLength | Rule::HeaderLength { .. } | Rule::LengthOf { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    ty: FieldType,
    default: Value,
    rule: Option<Rule>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            ty,
            default: default.into(),
            rule: None,
        }
    }

    pub fn uint8(name: impl Into<String>, default: u8) -> Self {
        Self::new(name, FieldType::u8(), default)
    }

    pub fn uint16(name: impl Into<String>, default: u16) -> Self {
        Self::new(name, FieldType::u16(), default)
    }

    pub fn uint32(name: impl Into<String>, default: u32) -> Self {
        Self::new(name, FieldType::u32(), default)
    }

    pub fn bits(name: impl Into<String>, width: u8, default: u64) -> Self {
        Self::new(name, FieldType::Bits(width), default)
    }

    pub fn flags(
        name: impl Into<String>,
        width: u8,
        names: &'static [&'static str],
        default: u64,
    ) -> Self {
        Self::new(name, FieldType::Flags { width, names }, default)
    }

    pub fn enumerated(name: impl Into<String>, base: FieldType, names: Names, default: u64) -> Self {
        Self::new(
            name,
            FieldType::Enum {
                base: Box::new(base),
                names,
            },
            default,
        )
    }

    pub fn mac(name: impl Into<String>, default: crate::ethernet::MacAddress) -> Self {
        Self::new(name, FieldType::Mac, default)
    }

    pub fn ipv4(name: impl Into<String>, default: crate::ip::Ipv4Address) -> Self {
        Self::new(name, FieldType::Ipv4, default)
    }

    pub fn bytes(name: impl Into<String>, length: Length) -> Self {
        let default = match &length {
            Length::Fixed(n) => vec![0; *n],
            _ => Vec::new(),
        };
        Self::new(name, FieldType::Bytes(length), default)
    }

    /// Attaches a computation rule.
    pub fn computed(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.ty
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn rule(&self) -> Option<&Rule> {
        self.rule.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_encode_decode() {
        let ty = FieldType::u16();
        assert_eq!(ty.encode(&Value::Int(8)).unwrap(), vec![0x00, 0x08]);
        let (value, consumed) = ty.decode(&[0xFF, 0x12, 0x34], 1, &FieldContext::empty()).unwrap();
        assert_eq!(value, Value::Int(0x1234));
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_little_endian() {
        let ty = FieldType::UInt {
            bytes: 4,
            endian: Endian::Little,
        };
        assert_eq!(ty.encode(&Value::Int(0x0102_0304)).unwrap(), vec![4, 3, 2, 1]);
        let (value, _) = ty.decode(&[4, 3, 2, 1], 0, &FieldContext::empty()).unwrap();
        assert_eq!(value, Value::Int(0x0102_0304));
    }

    #[test]
    fn test_overflow_is_encoding_error() {
        let err = FieldType::u8().encode(&Value::Int(256)).unwrap_err();
        assert!(matches!(err, PacketError::Encoding { .. }));
        let err = FieldType::Bits(3).encode(&Value::Int(8)).unwrap_err();
        assert!(matches!(err, PacketError::Encoding { .. }));
        assert!(FieldType::Bits(3).encode(&Value::Int(7)).is_ok());
    }

    #[test]
    fn test_wrong_shape_is_encoding_error() {
        assert!(FieldType::u16().encode(&Value::Bytes(vec![1])).is_err());
        assert!(FieldType::Mac.encode(&Value::Int(1)).is_err());
        assert!(FieldType::Bytes(Length::Fixed(2)).encode(&Value::Bytes(vec![1])).is_err());
    }

    #[test]
    fn test_short_input_is_truncated() {
        let err = FieldType::u32()
            .decode(&[1, 2, 3], 1, &FieldContext::empty())
            .unwrap_err();
        match err {
            PacketError::Truncated {
                offset,
                needed,
                available,
            } => {
                assert_eq!(offset, 1);
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rest_consumes_everything() {
        let ty = FieldType::Bytes(Length::Rest);
        let (value, consumed) = ty.decode(&[9, 8, 7], 1, &FieldContext::empty()).unwrap();
        assert_eq!(value, Value::Bytes(vec![8, 7]));
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_describe_uses_names() {
        const NAMES: Names = &[(17, "UDP")];
        let ty = FieldType::Enum {
            base: Box::new(FieldType::u8()),
            names: NAMES,
        };
        assert_eq!(ty.describe(&Value::Int(17)), "UDP (17)");
        assert_eq!(ty.describe(&Value::Int(6)), "6");

        let flags = FieldType::Flags {
            width: 8,
            names: &["F", "S", "R", "P", "A"],
        };
        assert_eq!(flags.describe(&Value::Int(0x12)), "SA");
    }
}
