//! Dynamically-typed configuration values.
//!
//! Every object declares a [`ValueType`]; instances of the object carry a
//! [`CfgValue`] of that type. The tag and the payload are one tagged
//! variant; the codec capabilities (parse, format, equality) are methods
//! on it.

use std::fmt;
use std::net::IpAddr;

use tecdb_error::{CfgError, Result};

/// Declared value type of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// The object carries no value.
    None,
    Bool,
    Int32,
    UInt32,
    Int64,
    UInt64,
    String,
    /// An IP (v4/v6) or MAC address.
    Address,
    /// Placeholder for objects whose type is not declared; never a wire name.
    Unspecified,
}

impl ValueType {
    /// Map a wire name to a type. `integer` is a historical alias for
    /// `int32`. Unknown names (including `unspecified`) are rejected.
    pub fn from_wire(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(Self::None),
            "bool" => Ok(Self::Bool),
            "int32" | "integer" => Ok(Self::Int32),
            "uint32" => Ok(Self::UInt32),
            "int64" => Ok(Self::Int64),
            "uint64" => Ok(Self::UInt64),
            "string" => Ok(Self::String),
            "address" => Ok(Self::Address),
            _ => Err(CfgError::UnknownValueType {
                name: name.to_owned(),
            }),
        }
    }

    /// Canonical wire name.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::String => "string",
            Self::Address => "address",
            Self::Unspecified => "unspecified",
        }
    }

    /// Whether instances of this type carry no payload.
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// An IP or MAC address payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddrValue {
    Ip(IpAddr),
    Mac([u8; 6]),
}

impl fmt::Display for AddrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Mac(m) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            ),
        }
    }
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = text.split(':');
    for byte in &mut out {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(out)
}

/// A typed instance value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CfgValue {
    /// Value of a `none`-typed object: nothing to store.
    None,
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    String(String),
    Address(AddrValue),
}

impl CfgValue {
    /// Parse a textual value under the declared type (str2val).
    pub fn parse(ty: ValueType, text: &str) -> Result<Self> {
        let err = || CfgError::ValueParse {
            ty: ty.wire_name(),
            text: text.to_owned(),
        };
        match ty {
            ValueType::None => {
                if text.is_empty() {
                    Ok(Self::None)
                } else {
                    Err(err())
                }
            }
            ValueType::Bool => match text {
                "true" | "1" => Ok(Self::Bool(true)),
                "false" | "0" => Ok(Self::Bool(false)),
                _ => Err(err()),
            },
            ValueType::Int32 => text.parse().map(Self::Int32).map_err(|_| err()),
            ValueType::UInt32 => text.parse().map(Self::UInt32).map_err(|_| err()),
            ValueType::Int64 => text.parse().map(Self::Int64).map_err(|_| err()),
            ValueType::UInt64 => text.parse().map(Self::UInt64).map_err(|_| err()),
            ValueType::String => Ok(Self::String(text.to_owned())),
            ValueType::Address => {
                if let Ok(ip) = text.parse::<IpAddr>() {
                    Ok(Self::Address(AddrValue::Ip(ip)))
                } else if let Some(mac) = parse_mac(text) {
                    Ok(Self::Address(AddrValue::Mac(mac)))
                } else {
                    Err(err())
                }
            }
            ValueType::Unspecified => Err(err()),
        }
    }

    /// Format the value as wire text (val2str). `None` is the empty string.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int32(v) => v.to_string(),
            Self::UInt32(v) => v.to_string(),
            Self::Int64(v) => v.to_string(),
            Self::UInt64(v) => v.to_string(),
            Self::String(s) => s.clone(),
            Self::Address(a) => a.to_string(),
        }
    }

    /// The type tag of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::None => ValueType::None,
            Self::Bool(_) => ValueType::Bool,
            Self::Int32(_) => ValueType::Int32,
            Self::UInt32(_) => ValueType::UInt32,
            Self::Int64(_) => ValueType::Int64,
            Self::UInt64(_) => ValueType::UInt64,
            Self::String(_) => ValueType::String,
            Self::Address(_) => ValueType::Address,
        }
    }

    /// Whether this value may be stored under the declared type.
    #[must_use]
    pub const fn matches(&self, ty: ValueType) -> bool {
        // Unspecified objects accept nothing but the empty payload.
        match ty {
            ValueType::Unspecified => matches!(self, Self::None),
            _ => matches!(
                (self, ty),
                (Self::None, ValueType::None)
                    | (Self::Bool(_), ValueType::Bool)
                    | (Self::Int32(_), ValueType::Int32)
                    | (Self::UInt32(_), ValueType::UInt32)
                    | (Self::Int64(_), ValueType::Int64)
                    | (Self::UInt64(_), ValueType::UInt64)
                    | (Self::String(_), ValueType::String)
                    | (Self::Address(_), ValueType::Address)
            ),
        }
    }
}

impl fmt::Display for CfgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i32> for CfgValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<&str> for CfgValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for CfgValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for CfgValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
