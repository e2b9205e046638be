//! Layer registry.
//!
//! Schemas are looked up by name when dissecting and when following a
//! [`NextLayer`](crate::schema::NextLayer) binding. A registry is immutable once
//! built; one may be installed process-wide before first use.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::PacketError;
use crate::field::FieldSpec;
use crate::schema::{LayerSchema, NextLayer};
use crate::{arp, ethernet, icmp, ip, raw, tcp, udp};

type SchemaMap = IndexMap<String, Arc<LayerSchema>>;

static BUILTINS: OnceLock<SchemaMap> = OnceLock::new();
static GLOBAL: OnceLock<Registry> = OnceLock::new();

fn builtins() -> &'static SchemaMap {
    BUILTINS.get_or_init(|| {
        let definitions: [fn() -> Result<LayerSchema, PacketError>; 8] = [
            raw::define_raw,
            raw::define_padding,
            ethernet::define,
            arp::define,
            ip::define,
            icmp::define,
            udp::define,
            tcp::define,
        ];
        definitions
            .iter()
            .map(|define| {
                let schema = define().expect("built-in layer definitions are valid");
                (schema.name().to_string(), Arc::new(schema))
            })
            .collect()
    })
}

/// A built-in schema by name. Only called with the crate's own layer names.
pub(crate) fn builtin(name: &str) -> Arc<LayerSchema> {
    builtins()
        .get(name)
        .cloned()
        .unwrap_or_else(|| panic!("'{name}' is not a built-in layer"))
}

/// The process-wide registry: the installed one, or the built-ins.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::with_builtins)
}

#[derive(Debug, Clone)]
pub struct Registry {
    schemas: SchemaMap,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The crate's built-in layers: Raw, Padding, Ethernet, ARP, IPv4, ICMP, UDP and TCP.
    pub fn with_builtins() -> Self {
        Self {
            schemas: builtins().clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<LayerSchema>> {
        self.schemas.get(name)
    }

    pub fn schema(&self, name: &str) -> Result<Arc<LayerSchema>, PacketError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| PacketError::UnknownLayer(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Layer names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Publishes this registry process-wide. Fails if [`global`] was already
    /// initialized, either by an earlier install or by first use.
    pub fn install(self) -> Result<&'static Registry, PacketError> {
        let layers = self.len();
        GLOBAL
            .set(self)
            .map_err(|_| PacketError::InvalidOperation("a layer registry is already installed".into()))?;
        info!(layers, "installed layer registry");
        Ok(global())
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: SchemaMap,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the built-in layers.
    pub fn with_builtins() -> Self {
        Self {
            schemas: builtins().clone(),
        }
    }

    /// Defines a new layer and registers it.
    pub fn define(
        self,
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
        next: Option<NextLayer>,
    ) -> Result<Self, PacketError> {
        self.register(LayerSchema::define(name, fields, next)?)
    }

    pub fn register(self, schema: LayerSchema) -> Result<Self, PacketError> {
        self.register_shared(Arc::new(schema))
    }

    pub fn register_shared(mut self, schema: Arc<LayerSchema>) -> Result<Self, PacketError> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(PacketError::DuplicateLayer(name));
        }
        debug!(layer = %name, fields = schema.fields().len(), "registered layer");
        self.schemas.insert(name, schema);
        Ok(self)
    }

    /// Checks that every next-layer binding names a registered layer.
    pub fn build(self) -> Result<Registry, PacketError> {
        for schema in self.schemas.values() {
            if let Some(next) = schema.next_layer() {
                if let Some(missing) = next.targets().find(|t| !self.schemas.contains_key(*t)) {
                    return Err(PacketError::UnknownLayer(format!(
                        "{missing} (bound from {})",
                        schema.name()
                    )));
                }
            }
        }
        Ok(Registry {
            schemas: self.schemas,
        })
    }
}
