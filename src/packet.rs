//! Layer instances and packets.
//!
//! A [`Packet`] is an ordered stack of [`Layer`]s, outermost first. Layers
//! only hold the values that were set explicitly; everything else is filled
//! in by the codec when the packet is serialized or inspected.

use std::cell::OnceCell;
use std::fmt;
use std::ops::{Div, Range};
use std::sync::Arc;

use tracing::trace;

use crate::codec::{self, DissectionResult, Dissector};
use crate::registry::{self, Registry};
use crate::schema::LayerSchema;
use crate::value::Value;
use crate::{PacketError, raw};

/// One instance of a layer schema with its explicitly set field values.
#[derive(Debug, Clone)]
pub struct Layer {
    schema: Arc<LayerSchema>,
    values: Vec<Option<Value>>,
    /// For a dissected trailer, the index of the layer whose length field cut it off.
    trailer_of: Option<usize>,
}

impl Layer {
    pub fn new(schema: Arc<LayerSchema>) -> Self {
        let values = vec![None; schema.fields().len()];
        Self {
            schema,
            values,
            trailer_of: None,
        }
    }

    /// A layer of the named schema from the global registry.
    pub fn named(name: &str) -> Result<Self, PacketError> {
        registry::global().schema(name).map(Self::new)
    }

    pub(crate) fn decoded(schema: Arc<LayerSchema>, values: Vec<Value>) -> Self {
        Self {
            schema,
            values: values.into_iter().map(Some).collect(),
            trailer_of: None,
        }
    }

    /// Trailing bytes left over after layer `owner` ended.
    pub(crate) fn trailer(bytes: Vec<u8>, owner: usize) -> Self {
        let mut layer = Self::padding(bytes);
        layer.trailer_of = Some(owner);
        layer
    }

    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::opaque(raw::RAW, bytes.into())
    }

    pub fn padding(bytes: impl Into<Vec<u8>>) -> Self {
        Self::opaque(raw::PADDING, bytes.into())
    }

    fn opaque(name: &str, bytes: Vec<u8>) -> Self {
        let mut layer = Self::new(registry::builtin(name));
        layer.values[0] = Some(Value::Bytes(bytes));
        layer
    }

    pub fn schema(&self) -> &Arc<LayerSchema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn is_raw(&self) -> bool {
        self.name() == raw::RAW
    }

    pub fn is_padding(&self) -> bool {
        self.name() == raw::PADDING
    }

    /// Which layer a dissected trailer belongs to. `None` for padding built by
    /// hand, which ends every layer below it.
    pub fn trailer_of(&self) -> Option<usize> {
        self.trailer_of
    }

    /// Moves the trailer owner when the layer changes position in a packet.
    fn reindexed(mut self, f: impl FnOnce(usize) -> Option<usize>) -> Self {
        self.trailer_of = self.trailer_of.and_then(f);
        self
    }

    /// Sets a field, checking the value against the field's type.
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Result<Self, PacketError> {
        let index = self.index(name)?;
        let value = value.into();
        let field = &self.schema.fields()[index];
        field
            .field_type()
            .encode(&value)
            .map_err(|e| match e {
                PacketError::Encoding { reason, .. } => PacketError::encoding(field.name(), reason),
                other => other,
            })
            .map_err(|e| e.in_layer(self.schema.name()))?;
        self.values[index] = Some(value);
        Ok(self)
    }

    /// Returns a field to "not set", so it is defaulted or computed again.
    pub fn unset(mut self, name: &str) -> Result<Self, PacketError> {
        let index = self.index(name)?;
        self.values[index] = None;
        Ok(self)
    }

    /// The explicitly set value of a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|index| self.explicit_at(index))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub(crate) fn explicit_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Unsets every field that carries a computation rule.
    pub fn clear_computed(mut self) -> Self {
        for (slot, field) in self.values.iter_mut().zip(self.schema.fields()) {
            if field.rule().is_some() {
                *slot = None;
            }
        }
        self
    }

    fn index(&self, name: &str) -> Result<usize, PacketError> {
        self.schema
            .index_of(name)
            .ok_or_else(|| PacketError::UnknownField(format!("{}.{name}", self.schema.name())))
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.values == other.values
            && self.trailer_of == other.trailer_of
    }
}

/// Whether stacking two packets followed a declared next-layer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Clean,
    /// The lower layer does not declare the upper one; any selector field
    /// has to be set by hand.
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    layers: Vec<Layer>,
}

impl Packet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_layers(layers: impl IntoIterator<Item = Layer>) -> Self {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// A packet made of a single raw payload layer.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from(Layer::raw(bytes))
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    /// `self` with `upper` stacked on top. Never fails.
    pub fn stack(&self, upper: &Packet) -> Packet {
        let mut layers = Vec::with_capacity(self.len() + upper.len());
        layers.extend_from_slice(&self.layers);
        let base = self.len();
        layers.extend(upper.layers.iter().cloned().map(|layer| layer.reindexed(|owner| Some(owner + base))));
        Packet { layers }
    }

    /// Stacks `upper` on top and reports whether the join follows a binding.
    pub fn join(&self, upper: &Packet) -> (Packet, Join) {
        let join = match (self.layers.last(), upper.layers.first()) {
            (Some(lower), Some(first)) if !first.is_raw() && !lower.schema.binds_to(first.name()) => {
                trace!(lower = lower.name(), upper = first.name(), "stacking without a binding");
                Join::Manual
            }
            _ => Join::Clean,
        };
        (self.stack(upper), join)
    }

    /// Appends `bytes` as a raw payload layer.
    pub fn with_payload(self, bytes: impl Into<Vec<u8>>) -> Packet {
        self / Layer::raw(bytes)
    }

    /// The load of the last raw layer.
    pub fn payload(&self) -> Option<&[u8]> {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.is_raw())
            .and_then(|layer| layer.get(raw::LOAD))
            .and_then(Value::as_bytes)
    }

    /// Index of the first layer with the given schema name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.name() == name)
    }

    pub fn layer_named(&self, name: &str) -> Option<&Layer> {
        self.find(name).map(|index| &self.layers[index])
    }

    /// The sub-stack covering `range`, if it lies within the packet.
    pub fn slice(&self, range: Range<usize>) -> Option<Packet> {
        let start = range.start;
        self.layers.get(range).map(|layers| Packet {
            layers: layers
                .iter()
                .cloned()
                .map(|layer| layer.reindexed(|owner| owner.checked_sub(start)))
                .collect(),
        })
    }

    /// One-line description such as `Ethernet / IPv4 / UDP / Raw`.
    pub fn summary(&self) -> String {
        self.layers
            .iter()
            .map(Layer::name)
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Effective value of a field: explicit, else computed, else the default.
    ///
    /// With `layer` unset, the first layer that has a field of that name is used.
    pub fn get_field(&self, name: &str, layer: Option<usize>) -> Option<Value> {
        let (index, field) = self.locate(name, layer).ok()?;
        let target = &self.layers[index];
        if let Some(value) = target.explicit_at(field) {
            return Some(value.clone());
        }
        let spec = &target.schema.fields()[field];
        let derived = spec.rule().is_some()
            || target
                .schema
                .next_layer()
                .is_some_and(|next| next.designates(name));
        if derived {
            if let Ok(resolved) = codec::resolve(self) {
                return Some(resolved.values[index][field].clone());
            }
        }
        Some(spec.default_value().clone())
    }

    /// A new packet with one field changed; `self` is left untouched.
    pub fn set_field(
        &self,
        name: &str,
        value: impl Into<Value>,
        layer: Option<usize>,
    ) -> Result<Packet, PacketError> {
        let (index, _) = self.locate(name, layer)?;
        let mut packet = self.clone();
        let target = packet.layers[index].clone().set(name, value)?;
        packet.layers[index] = target;
        Ok(packet)
    }

    /// Unsets every computed field in every layer.
    pub fn clear_computed(&self) -> Packet {
        Packet::from_layers(self.layers.iter().cloned().map(Layer::clear_computed))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        codec::serialize(self)
    }

    /// Dissects `bytes` starting from the `root` layer of the global registry.
    pub fn dissect(bytes: &[u8], root: &str) -> Result<DissectionResult, PacketError> {
        Self::dissect_with(registry::global(), bytes, root)
    }

    pub fn dissect_with(
        registry: &Registry,
        bytes: &[u8],
        root: &str,
    ) -> Result<DissectionResult, PacketError> {
        Ok(Dissector::new(registry, root)?.dissect(bytes))
    }

    /// Per-layer view of every field's effective value. The packet is
    /// resolved on first iteration, once.
    pub fn show(&self) -> Show<'_> {
        Show {
            packet: self,
            resolved: OnceCell::new(),
        }
    }

    fn locate(&self, name: &str, layer: Option<usize>) -> Result<(usize, usize), PacketError> {
        let found = match layer {
            Some(index) => self
                .layers
                .get(index)
                .and_then(|l| l.schema.index_of(name))
                .map(|field| (index, field)),
            None => self
                .layers
                .iter()
                .enumerate()
                .find_map(|(index, l)| l.schema.index_of(name).map(|field| (index, field))),
        };
        found.ok_or_else(|| match layer {
            Some(index) => PacketError::UnknownField(format!("{name} (layer {index})")),
            None => PacketError::UnknownField(name.to_string()),
        })
    }
}

impl From<Layer> for Packet {
    fn from(layer: Layer) -> Self {
        Packet { layers: vec![layer] }
    }
}

impl Div for Packet {
    type Output = Packet;

    fn div(mut self, upper: Packet) -> Packet {
        let base = self.layers.len();
        self.layers
            .extend(upper.layers.into_iter().map(|layer| layer.reindexed(|owner| Some(owner + base))));
        self
    }
}

impl Div<Layer> for Packet {
    type Output = Packet;

    fn div(mut self, upper: Layer) -> Packet {
        self.layers.push(upper);
        self
    }
}

impl Div for Layer {
    type Output = Packet;

    fn div(self, upper: Layer) -> Packet {
        Packet {
            layers: vec![self, upper],
        }
    }
}

impl Div<Packet> for Layer {
    type Output = Packet;

    fn div(self, upper: Packet) -> Packet {
        Packet::from(self) / upper
    }
}

impl Div for &Packet {
    type Output = Packet;

    fn div(self, upper: &Packet) -> Packet {
        self.stack(upper)
    }
}

/// Free-function form of [`Packet::stack`].
pub fn stack(lower: &Packet, upper: &Packet) -> Packet {
    lower.stack(upper)
}

/// One layer as seen through [`Show`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayerView<'a> {
    pub name: &'a str,
    pub fields: Vec<(&'a str, Value)>,
}

/// Restartable view over the effective field values of a packet.
///
/// When the packet cannot be fully resolved (for instance a checksum whose
/// enclosing layer is missing), computed fields show their defaults.
#[derive(Debug, Clone)]
pub struct Show<'a> {
    packet: &'a Packet,
    resolved: OnceCell<Option<Vec<Vec<Value>>>>,
}

impl<'a> Show<'a> {
    pub fn iter(&self) -> ShowIter<'a, '_> {
        ShowIter { show: self, next: 0 }
    }

    fn resolved(&self) -> Option<&Vec<Vec<Value>>> {
        self.resolved
            .get_or_init(|| codec::resolve(self.packet).ok().map(|resolved| resolved.values))
            .as_ref()
    }

    fn view(&self, index: usize) -> LayerView<'a> {
        let packet: &'a Packet = self.packet;
        let layer = &packet.layers[index];
        let resolved = self.resolved();
        let fields = layer
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let value = match (resolved, layer.explicit_at(i)) {
                    (Some(values), _) => values[index][i].clone(),
                    (None, Some(explicit)) => explicit.clone(),
                    (None, None) => spec.default_value().clone(),
                };
                (spec.name(), value)
            })
            .collect();
        LayerView {
            name: layer.name(),
            fields,
        }
    }
}

pub struct ShowIter<'a, 's> {
    show: &'s Show<'a>,
    next: usize,
}

impl<'a> Iterator for ShowIter<'a, '_> {
    type Item = LayerView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.show.packet.len() {
            return None;
        }
        let view = self.show.view(self.next);
        self.next += 1;
        Some(view)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.show.packet.len() - self.next;
        (left, Some(left))
    }
}

impl<'a, 's> IntoIterator for &'s Show<'a> {
    type Item = LayerView<'a>;
    type IntoIter = ShowIter<'a, 's>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Show<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, view) in self.iter().enumerate() {
            writeln!(f, "###[ {} ]###", view.name)?;
            let schema = &self.packet.layers[index].schema;
            for (name, value) in &view.fields {
                let rendered = schema
                    .field(name)
                    .map(|spec| spec.field_type().describe(value))
                    .unwrap_or_else(|| value.to_string());
                writeln!(f, "  {name:<10}= {rendered}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
