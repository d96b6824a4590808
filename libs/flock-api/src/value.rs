use std::fmt;

use crate::schema::DeclaredType;

/// Runtime value of one cell.
///
/// Strategy by kind:
/// - Integers up to 64 bits: native width
/// - 128-bit integers: native, rendered as decimal text on output
/// - Floats: `f64`, finiteness checked at encode time
/// - Strings, temporal values, enums, UUIDs, intervals, blobs, bit strings: `Text`
/// - List, Struct, Map, Union: recursive
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    HugeInt(i128),
    UHugeInt(u128),
    Float(f64),
    Text(String),
    List(Vec<TypedValue>),
    /// `(field name, value)`; names are empty for positional structs.
    Struct(Vec<(String, TypedValue)>),
    Map(Vec<(TypedValue, TypedValue)>),
    /// Active member and its declared type.
    Union(Box<TypedValue>, Box<DeclaredType>),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Cast to bool. Integers are truthy when non-zero, text accepts
    /// `true`/`false`/`t`/`f`/`1`/`0`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            TypedValue::Int(v) => Some(*v != 0),
            TypedValue::UInt(v) => Some(*v != 0),
            TypedValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => None,
            },
            TypedValue::Union(inner, _) => inner.as_bool(),
            _ => None,
        }
    }

    /// Cast to a signed 64-bit integer. Floats convert only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Bool(b) => Some(i64::from(*b)),
            TypedValue::Int(v) => Some(*v),
            TypedValue::UInt(v) => i64::try_from(*v).ok(),
            TypedValue::HugeInt(v) => i64::try_from(*v).ok(),
            TypedValue::UHugeInt(v) => i64::try_from(*v).ok(),
            TypedValue::Float(v) if v.fract() == 0.0 && v.abs() < 9.2e18 => Some(*v as i64),
            TypedValue::Text(s) => s.trim().parse().ok(),
            TypedValue::Union(inner, _) => inner.as_i64(),
            _ => None,
        }
    }

    /// Cast to an unsigned 64-bit integer. Negative values do not convert.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TypedValue::Bool(b) => Some(u64::from(*b)),
            TypedValue::Int(v) => u64::try_from(*v).ok(),
            TypedValue::UInt(v) => Some(*v),
            TypedValue::HugeInt(v) => u64::try_from(*v).ok(),
            TypedValue::UHugeInt(v) => u64::try_from(*v).ok(),
            TypedValue::Float(v) if v.fract() == 0.0 && *v >= 0.0 && *v < 1.8e19 => {
                Some(*v as u64)
            }
            TypedValue::Text(s) => s.trim().parse().ok(),
            TypedValue::Union(inner, _) => inner.as_u64(),
            _ => None,
        }
    }

    /// Cast to a 128-bit integer rendered as decimal text.
    pub fn as_huge_text(&self, unsigned: bool) -> Option<String> {
        match self {
            TypedValue::Int(v) if unsigned && *v < 0 => None,
            TypedValue::Int(v) => Some(v.to_string()),
            TypedValue::UInt(v) => Some(v.to_string()),
            TypedValue::HugeInt(v) if unsigned && *v < 0 => None,
            TypedValue::HugeInt(v) => Some(v.to_string()),
            TypedValue::UHugeInt(v) if !unsigned && *v > i128::MAX as u128 => None,
            TypedValue::UHugeInt(v) => Some(v.to_string()),
            TypedValue::Bool(b) => Some(u8::from(*b).to_string()),
            TypedValue::Text(s) => {
                let s = s.trim();
                let ok = if unsigned {
                    s.parse::<u128>().is_ok()
                } else {
                    s.parse::<i128>().is_ok()
                };
                ok.then(|| s.to_string())
            }
            TypedValue::Union(inner, _) => inner.as_huge_text(unsigned),
            _ => None,
        }
    }

    /// Cast to a double. Integers widen, text parses.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Bool(b) => Some(f64::from(u8::from(*b))),
            TypedValue::Int(v) => Some(*v as f64),
            TypedValue::UInt(v) => Some(*v as f64),
            TypedValue::HugeInt(v) => Some(*v as f64),
            TypedValue::UHugeInt(v) => Some(*v as f64),
            TypedValue::Float(v) => Some(*v),
            TypedValue::Text(s) => s.trim().parse().ok(),
            TypedValue::Union(inner, _) => inner.as_f64(),
            _ => None,
        }
    }

    /// Approximate payload size in bytes, used for `bytes_read` statistics.
    pub fn byte_size(&self) -> u64 {
        match self {
            TypedValue::Null => 0,
            TypedValue::Bool(_) => 1,
            TypedValue::Int(_) | TypedValue::UInt(_) | TypedValue::Float(_) => 8,
            TypedValue::HugeInt(_) | TypedValue::UHugeInt(_) => 16,
            TypedValue::Text(s) => s.len() as u64,
            TypedValue::List(items) => items.iter().map(TypedValue::byte_size).sum(),
            TypedValue::Struct(fields) => fields.iter().map(|(_, v)| v.byte_size()).sum(),
            TypedValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| k.byte_size() + v.byte_size())
                .sum(),
            TypedValue::Union(inner, _) => inner.byte_size(),
        }
    }
}

/// Render a double the way the engine prints it: non-finite values become
/// `nan`, `inf` and `-inf`.
pub fn format_double(v: f64) -> String {
    if v.is_nan() {
        "nan".into()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".into() } else { "-inf".into() }
    } else {
        v.to_string()
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => f.write_str("NULL"),
            TypedValue::Bool(b) => write!(f, "{b}"),
            TypedValue::Int(v) => write!(f, "{v}"),
            TypedValue::UInt(v) => write!(f, "{v}"),
            TypedValue::HugeInt(v) => write!(f, "{v}"),
            TypedValue::UHugeInt(v) => write!(f, "{v}"),
            TypedValue::Float(v) => f.write_str(&format_double(*v)),
            TypedValue::Text(s) => f.write_str(s),
            TypedValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            TypedValue::Struct(fields) => {
                let named = fields.iter().any(|(name, _)| !name.is_empty());
                f.write_str(if named { "{" } else { "(" })?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if named {
                        write!(f, "'{name}': {value}")?;
                    } else {
                        write!(f, "{value}")?;
                    }
                }
                f.write_str(if named { "}" } else { ")" })
            }
            TypedValue::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                f.write_str("}")
            }
            TypedValue::Union(inner, _) => write!(f, "{inner}"),
        }
    }
}
