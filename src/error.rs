use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    /// A value does not fit the declared field type.
    #[error("Cannot encode field '{field}': {reason}")]
    Encoding { field: String, reason: String },

    /// Decoding ran out of input.
    #[error("Truncated input at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Bit-field run in layer '{layer}' is not byte aligned ({bits} stray bits)")]
    Alignment { layer: String, bits: usize },

    #[error("Duplicate field name '{field}' in layer '{layer}'")]
    DuplicateFieldName { layer: String, field: String },

    #[error("Cannot resolve field '{field}' of layer '{layer}': {reason}")]
    UnresolvableField {
        layer: String,
        field: String,
        reason: String,
    },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    #[error("Layer '{0}' is already registered")]
    DuplicateLayer(String),

    #[error("Unknown interface: {0}")]
    UnknownInterface(String),

    #[error("Invalid field value: {0}")]
    InvalidFieldValue(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An automaton state has neither receive conditions nor timeouts left.
    #[error("Automaton stuck in state '{0}'")]
    AutomatonStuck(String),

    #[error("Automaton reached error state '{0}'")]
    AutomatonErrorState(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PacketError {
    pub(crate) fn encoding(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PacketError::Encoding {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Prefixes the field name of an encoding error with its layer.
    pub(crate) fn in_layer(self, layer: &str) -> Self {
        match self {
            PacketError::Encoding { field, reason } => PacketError::Encoding {
                field: format!("{layer}.{field}"),
                reason,
            },
            other => other,
        }
    }
}
