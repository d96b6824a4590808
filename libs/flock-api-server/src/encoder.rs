use serde_json::{Map, Number, Value};

use flock_api::value::format_double;
use flock_api::{DeclaredType, EncodingPolicy, QueryError, TypedValue};

/// Type-directed rendering of one value into a JSON node.
///
/// Dispatch is on the declared type; a null value short-circuits to JSON
/// `null` before any type check. Children are fully built before they are
/// attached, so a failure never leaves a partial node in the parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueEncoder {
    policy: EncodingPolicy,
}

impl ValueEncoder {
    pub fn new(policy: EncodingPolicy) -> Self {
        Self { policy }
    }

    /// Encode `value` and append it to `parent`.
    ///
    /// `parent` must be an array when `name` is `None` and an object when it
    /// is `Some`. An object member with an existing name is replaced in place.
    pub fn append_into(
        &self,
        parent: &mut Value,
        value: &TypedValue,
        ty: &DeclaredType,
        name: Option<&str>,
    ) -> Result<(), QueryError> {
        let node = self.encode(value, ty)?;
        match (parent, name) {
            (Value::Array(items), None) => items.push(node),
            (Value::Object(members), Some(name)) => {
                members.insert(name.to_string(), node);
            }
            (parent, name) => {
                return Err(QueryError::internal(format!(
                    "cannot append {} into a JSON {}",
                    if name.is_some() { "a named member" } else { "an element" },
                    kind_of(parent)
                )));
            }
        }
        Ok(())
    }

    /// Encode `value` as a standalone node.
    pub fn encode(&self, value: &TypedValue, ty: &DeclaredType) -> Result<Value, QueryError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match ty {
            DeclaredType::Null => Ok(Value::Null),

            DeclaredType::Boolean => match value.as_bool() {
                Some(b) => Ok(Value::Bool(b)),
                None => self.mismatch(value, ty),
            },

            DeclaredType::TinyInt
            | DeclaredType::SmallInt
            | DeclaredType::Integer
            | DeclaredType::BigInt => match value.as_i64() {
                Some(v) => Ok(Value::from(v)),
                None => self.mismatch(value, ty),
            },

            DeclaredType::UTinyInt
            | DeclaredType::USmallInt
            | DeclaredType::UInteger
            | DeclaredType::UBigInt => match value.as_u64() {
                Some(v) => Ok(Value::from(v)),
                None => self.mismatch(value, ty),
            },

            // 128-bit integers go out as decimal strings.
            DeclaredType::HugeInt | DeclaredType::UHugeInt => {
                match value.as_huge_text(*ty == DeclaredType::UHugeInt) {
                    Some(text) => Ok(Value::String(text)),
                    None => self.mismatch(value, ty),
                }
            }

            DeclaredType::Float | DeclaredType::Double | DeclaredType::Decimal { .. } => {
                match value.as_f64() {
                    Some(v) => Ok(self.real(v)),
                    None => self.mismatch(value, ty),
                }
            }

            DeclaredType::Date
            | DeclaredType::Time
            | DeclaredType::TimeTz
            | DeclaredType::TimestampSec
            | DeclaredType::TimestampMs
            | DeclaredType::Timestamp
            | DeclaredType::TimestampNs
            | DeclaredType::TimestampTz
            | DeclaredType::Enum
            | DeclaredType::Char
            | DeclaredType::Varchar
            | DeclaredType::VarInt
            | DeclaredType::Interval
            | DeclaredType::Blob
            | DeclaredType::Bit => Ok(Value::String(text_of(value))),

            DeclaredType::Uuid => match uuid::Uuid::parse_str(text_of(value).trim()) {
                Ok(id) => Ok(Value::String(id.hyphenated().to_string())),
                Err(_) => self.mismatch(value, ty),
            },

            // The union wrapper is transparent: only the active member is written.
            DeclaredType::Union(_) => match value {
                TypedValue::Union(member, member_ty) => self.encode(member, member_ty),
                _ => self.mismatch(value, ty),
            },

            DeclaredType::List(element) | DeclaredType::Array(element, _) => match value {
                TypedValue::List(items) => {
                    let mut node = Value::Array(Vec::with_capacity(items.len()));
                    for item in items {
                        self.append_into(&mut node, item, element, None)?;
                    }
                    Ok(node)
                }
                _ => self.mismatch(value, ty),
            },

            DeclaredType::Struct(fields) => match value {
                TypedValue::Struct(members) if members.len() == fields.len() => {
                    let positional = fields.iter().all(|(name, _)| name.is_empty());
                    let mut node = if positional {
                        Value::Array(Vec::with_capacity(fields.len()))
                    } else {
                        Value::Object(Map::new())
                    };
                    for ((name, field_ty), (_, member)) in fields.iter().zip(members) {
                        let name = (!positional).then_some(name.as_str());
                        self.append_into(&mut node, member, field_ty, name)?;
                    }
                    Ok(node)
                }
                _ => self.mismatch(value, ty),
            },

            // Keys are stringified; keys equal after stringification collapse,
            // the last value winning.
            DeclaredType::Map(_, value_ty) => match value {
                TypedValue::Map(entries) => {
                    let mut node = Value::Object(Map::new());
                    for (key, entry) in entries {
                        self.append_into(&mut node, entry, value_ty, Some(&key.to_string()))?;
                    }
                    Ok(node)
                }
                _ => self.mismatch(value, ty),
            },

            DeclaredType::Dynamic(_) => self.dynamic(value),

            DeclaredType::Unsupported(_) => {
                if self.policy.coerce_invalid_to_null {
                    Ok(Value::Null)
                } else {
                    Err(QueryError::serialization(format!("Type {ty} not supported")))
                }
            }
        }
    }

    /// Encode a value of an undeclared column by its runtime tag.
    fn dynamic(&self, value: &TypedValue) -> Result<Value, QueryError> {
        let any = DeclaredType::Dynamic(Box::new(DeclaredType::Varchar));
        let ty = match value {
            TypedValue::Null => return Ok(Value::Null),
            TypedValue::Bool(_) => DeclaredType::Boolean,
            TypedValue::Int(_) => DeclaredType::BigInt,
            TypedValue::UInt(_) => DeclaredType::UBigInt,
            TypedValue::HugeInt(_) => DeclaredType::HugeInt,
            TypedValue::UHugeInt(_) => DeclaredType::UHugeInt,
            TypedValue::Float(_) => DeclaredType::Double,
            TypedValue::Text(_) => DeclaredType::Varchar,
            TypedValue::List(_) => DeclaredType::List(Box::new(any)),
            TypedValue::Struct(members) => DeclaredType::Struct(
                members
                    .iter()
                    .map(|(name, _)| (name.clone(), any.clone()))
                    .collect(),
            ),
            TypedValue::Map(_) => DeclaredType::Map(Box::new(any.clone()), Box::new(any)),
            TypedValue::Union(member, member_ty) => return self.encode(member, member_ty),
        };
        self.encode(value, &ty)
    }

    /// Finite reals become numbers; NaN and infinities become `null` or
    /// their textual form, never a bare `NaN` token.
    fn real(&self, v: f64) -> Value {
        match Number::from_f64(v) {
            Some(n) => Value::Number(n),
            None if self.policy.coerce_invalid_to_null => Value::Null,
            None => Value::String(format_double(v)),
        }
    }

    fn mismatch(&self, value: &TypedValue, ty: &DeclaredType) -> Result<Value, QueryError> {
        if self.policy.coerce_invalid_to_null {
            return Ok(Value::Null);
        }
        Err(QueryError::serialization(format!(
            "Could not convert value '{value}' to {ty}"
        )))
    }
}

fn text_of(value: &TypedValue) -> String {
    match value {
        TypedValue::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
