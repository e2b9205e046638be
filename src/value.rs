//! Runtime field values.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::ethernet::MacAddress;
use crate::ip::Ipv4Address;

/// A concrete value held by a layer field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Any integer-like field: plain integers, bit-fields, enums and flags.
    Int(u64),
    /// Byte strings of fixed or variable length.
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Mac(MacAddress),
    Ipv4(Ipv4Address),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Ipv4(addr) => Some(u64::from(u32::from_be_bytes(addr.octets()))),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            Value::Mac(mac) => Some(mac.as_bytes()),
            Value::Ipv4(addr) => Some(addr.as_bytes()),
            Value::Int(_) => None,
        }
    }

    pub fn as_mac(&self) -> Option<MacAddress> {
        match self {
            Value::Mac(mac) => Some(*mac),
            Value::Bytes(bytes) => <[u8; 6]>::try_from(bytes.as_slice()).ok().map(MacAddress::new),
            _ => None,
        }
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Address> {
        match self {
            Value::Ipv4(addr) => Some(*addr),
            Value::Bytes(bytes) => <[u8; 4]>::try_from(bytes.as_slice()).ok().map(Ipv4Address::new),
            Value::Int(v) => u32::try_from(*v).ok().map(|v| Ipv4Address::new(v.to_be_bytes())),
            Value::Mac(_) => None,
        }
    }

    /// Length in bytes of the encoded value, when it does not depend on a field type.
    pub(crate) fn byte_len(&self) -> Option<usize> {
        match self {
            Value::Bytes(bytes) => Some(bytes.len()),
            Value::Mac(_) => Some(6),
            Value::Ipv4(_) => Some(4),
            Value::Int(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bytes(bytes) if bytes.is_empty() => write!(f, "''"),
            Value::Bytes(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Value::Mac(mac) => write!(f, "{mac}"),
            Value::Ipv4(addr) => write!(f, "{addr}"),
        }
    }
}

macro_rules! int_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Int(u64::from(v))
            }
        })*
    };
}

int_value!(u8, u16, u32, u64, bool);

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Value {
    fn from(bytes: [u8; N]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<MacAddress> for Value {
    fn from(mac: MacAddress) -> Self {
        Value::Mac(mac)
    }
}

impl From<Ipv4Address> for Value {
    fn from(addr: Ipv4Address) -> Self {
        Value::Ipv4(addr)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(addr: Ipv4Addr) -> Self {
        Value::Ipv4(addr.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(17u8), Value::Int(17));
        assert_eq!(Value::from(true), Value::Int(1));
        assert_eq!(Value::from([0xDE, 0xAD]).as_bytes(), Some(&[0xDE, 0xAD][..]));
        let addr = Value::from(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(addr.as_u64(), Some(0x0A00_0001));
        assert_eq!(Value::Int(0x0A00_0001).as_ipv4(), Some(Ipv4Address::new([10, 0, 0, 1])));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(8).to_string(), "8");
        assert_eq!(Value::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]).to_string(), "0xdeadbeef");
        assert_eq!(Value::Bytes(Vec::new()).to_string(), "''");
    }

    #[test]
    fn test_serde_roundtrip() {
        let value = Value::Bytes(vec![1, 2, 3]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), value);
    }
}
