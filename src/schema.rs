//! Layer schemas: the ordered field layout of one protocol header, plus the
//! rule that picks the layer stacked on top of it.

use std::collections::HashMap;

use crate::PacketError;
use crate::field::{FieldSpec, FieldType, Length, Rule};
use crate::value::Value;

/// One row of a [`NextLayer`] table: when `field` holds `value`, the next
/// layer is `layer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub field: String,
    pub value: u64,
    pub layer: String,
}

/// Ordered binding table deciding which layer follows.
///
/// The same table works in both directions: dissection picks the first
/// binding whose field matches the decoded value, and serialization fills an
/// unset bound field from the name of the layer actually stacked on top.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NextLayer {
    bindings: Vec<Binding>,
}

impl NextLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, field: impl Into<String>, value: u64, layer: impl Into<String>) -> Self {
        self.bindings.push(Binding {
            field: field.into(),
            value,
            layer: layer.into(),
        });
        self
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Name of the layer to decode next, or `None` when nothing matches.
    pub fn select(&self, schema: &LayerSchema, values: &[Value]) -> Option<&str> {
        self.bindings
            .iter()
            .find(|binding| {
                schema
                    .index_of(&binding.field)
                    .and_then(|index| values.get(index))
                    .and_then(Value::as_u64)
                    == Some(binding.value)
            })
            .map(|binding| binding.layer.as_str())
    }

    /// The field and value that announce `layer`, if any binding targets it.
    pub fn value_for(&self, layer: &str) -> Option<(&str, u64)> {
        self.bindings
            .iter()
            .find(|binding| binding.layer == layer)
            .map(|binding| (binding.field.as_str(), binding.value))
    }

    pub fn designates(&self, field: &str) -> bool {
        self.bindings.iter().any(|binding| binding.field == field)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|binding| binding.layer.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LayerSchema {
    name: String,
    fields: Vec<FieldSpec>,
    index: HashMap<String, usize>,
    next: Option<NextLayer>,
    extent: Option<usize>,
    min_length: usize,
}

impl LayerSchema {
    /// Defines a layer from its fields in wire order.
    pub fn define(
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
        next: Option<NextLayer>,
    ) -> Result<Self, PacketError> {
        let builder = Self::builder(name).fields(fields);
        match next {
            Some(next) => builder.next_layer(next).build(),
            None => builder.build(),
        }
    }

    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            next: None,
            extent: None,
            min_length: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.index_of(name).map(|index| &self.fields[index])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn next_layer(&self) -> Option<&NextLayer> {
        self.next.as_ref()
    }

    /// Index of the length field bounding this layer and its payload.
    pub fn extent_field(&self) -> Option<usize> {
        self.extent
    }

    /// Serialized size below which the layer is zero padded.
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Smallest possible encoded header, in bytes.
    pub fn min_bytes(&self) -> usize {
        self.fields.iter().map(|f| f.field_type().min_bits()).sum::<usize>() / 8
    }

    /// True when no layer is ever decoded after this one.
    pub fn is_terminal(&self) -> bool {
        self.next.as_ref().is_none_or(|next| next.bindings().is_empty())
    }

    pub fn binds_to(&self, layer: &str) -> bool {
        self.next
            .as_ref()
            .is_some_and(|next| next.targets().any(|target| target == layer))
    }
}

pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    next: Option<NextLayer>,
    extent: Option<String>,
    min_length: usize,
}

impl SchemaBuilder {
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Appends every field of `other`, in order.
    pub fn embed(self, other: &LayerSchema) -> Self {
        self.fields(other.fields().iter().cloned())
    }

    pub fn next_layer(mut self, next: NextLayer) -> Self {
        self.next = Some(next);
        self
    }

    pub fn extent(mut self, field: impl Into<String>) -> Self {
        self.extent = Some(field.into());
        self
    }

    pub fn min_length(mut self, bytes: usize) -> Self {
        self.min_length = bytes;
        self
    }

    pub fn build(self) -> Result<LayerSchema, PacketError> {
        let name = self.name;
        let mut index = HashMap::with_capacity(self.fields.len());
        let mut cursor = 0usize;

        for (i, field) in self.fields.iter().enumerate() {
            if index.insert(field.name().to_string(), i).is_some() {
                return Err(PacketError::DuplicateFieldName {
                    layer: name,
                    field: field.name().to_string(),
                });
            }
            let ty = field.field_type();
            check_type(&name, field.name(), ty)?;
            if !ty.is_bitwise() && cursor % 8 != 0 {
                return Err(PacketError::Alignment {
                    layer: name,
                    bits: cursor % 8,
                });
            }
            cursor += ty.min_bits();

            if let FieldType::Bytes(Length::FromField { field: source, .. }) = ty {
                let earlier_int = index
                    .get(source.as_str())
                    .filter(|&&j| j < i)
                    .is_some_and(|&j| self.fields[j].field_type().is_int());
                if !earlier_int {
                    return Err(PacketError::UnknownField(format!(
                        "{name}.{}: length source '{source}' is not an earlier integer field",
                        field.name()
                    )));
                }
            }

            if !matches!(ty, FieldType::Bytes(Length::FromField { .. } | Length::Rest)) {
                ty.encode(field.default_value())
                    .map_err(|e| rename(e, field.name()).in_layer(&name))?;
            }
        }

        if cursor % 8 != 0 {
            return Err(PacketError::Alignment {
                layer: name,
                bits: cursor % 8,
            });
        }

        for field in &self.fields {
            match field.rule() {
                Some(Rule::Custom(_)) | None => {}
                Some(rule) => {
                    if !field.field_type().is_int() {
                        return Err(PacketError::InvalidFieldValue(format!(
                            "{name}.{}: length and checksum rules need an integer field",
                            field.name()
                        )));
                    }
                    if let Rule::LengthOf { field: target } = rule {
                        let is_bytes = index
                            .get(target.as_str())
                            .is_some_and(|&j| matches!(self.fields[j].field_type(), FieldType::Bytes(_)));
                        if !is_bytes {
                            return Err(PacketError::UnknownField(format!(
                                "{name}.{}: '{target}' is not a byte-string field",
                                field.name()
                            )));
                        }
                    }
                }
            }
        }

        if let Some(next) = &self.next {
            for binding in next.bindings() {
                let field = index
                    .get(binding.field.as_str())
                    .map(|&j| &self.fields[j])
                    .ok_or_else(|| PacketError::UnknownField(format!("{name}.{}", binding.field)))?;
                if field.rule().is_some() {
                    return Err(PacketError::UnresolvableField {
                        layer: name,
                        field: binding.field.clone(),
                        reason: "a next-layer selector cannot carry a computation rule".into(),
                    });
                }
                if !field.field_type().is_int() {
                    return Err(PacketError::InvalidFieldValue(format!(
                        "{name}.{}: next-layer selector must be an integer field",
                        binding.field
                    )));
                }
            }
        }

        let extent = match self.extent {
            Some(extent) => {
                let j = index
                    .get(extent.as_str())
                    .copied()
                    .ok_or_else(|| PacketError::UnknownField(format!("{name}.{extent}")))?;
                if !self.fields[j].field_type().is_int() {
                    return Err(PacketError::InvalidFieldValue(format!(
                        "{name}.{extent}: extent must be an integer field"
                    )));
                }
                Some(j)
            }
            None => None,
        };

        Ok(LayerSchema {
            name,
            fields: self.fields,
            index,
            next: self.next,
            extent,
            min_length: self.min_length,
        })
    }
}

fn check_type(layer: &str, field: &str, ty: &FieldType) -> Result<(), PacketError> {
    let valid = match ty {
        FieldType::UInt { bytes, .. } => (1..=8).contains(bytes),
        FieldType::Bits(width) | FieldType::Flags { width, .. } => (1..=64).contains(width),
        FieldType::Enum { base, .. } => {
            return match **base {
                FieldType::Enum { .. } | FieldType::Bytes(_) | FieldType::Mac | FieldType::Ipv4 => {
                    Err(PacketError::InvalidFieldValue(format!(
                        "{layer}.{field}: enum base must be an integer type"
                    )))
                }
                ref base => check_type(layer, field, base),
            };
        }
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(PacketError::InvalidFieldValue(format!(
            "{layer}.{field}: unsupported width in {ty:?}"
        )))
    }
}

fn rename(err: PacketError, field: &str) -> PacketError {
    match err {
        PacketError::Encoding { reason, .. } => PacketError::encoding(field, reason),
        other => other,
    }
}
