use std::fmt;

/// Schema-level type identity of a column or nested member.
///
/// The encoder branches on this, not on the runtime `TypedValue` tag.
/// Names in `Struct` are either all empty (positional tuple) or all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    Null,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    HugeInt,
    UHugeInt,
    Float,
    Double,
    Decimal { width: u8, scale: u8 },
    Date,
    Time,
    TimeTz,
    TimestampSec,
    TimestampMs,
    Timestamp,
    TimestampNs,
    TimestampTz,
    Enum,
    Char,
    Varchar,
    VarInt,
    Uuid,
    Interval,
    Blob,
    Bit,
    /// Tagged union, members in tag order.
    Union(Vec<(String, DeclaredType)>),
    List(Box<DeclaredType>),
    Array(Box<DeclaredType>, usize),
    Struct(Vec<(String, DeclaredType)>),
    Map(Box<DeclaredType>, Box<DeclaredType>),
    /// Opaque engine-internal kind (pointer, any, table function result, ...).
    Unsupported(String),
    /// Column without a declared type. Each value is encoded by its own
    /// runtime tag; the inner type is only the name reported in `meta`,
    /// taken from the first row.
    Dynamic(Box<DeclaredType>),
}

impl DeclaredType {
    /// Resolve a scalar SQL type name as written in a column declaration.
    ///
    /// Matching is case-insensitive and ignores a trailing `(..)` argument
    /// list except for `DECIMAL`/`NUMERIC`. Names that match nothing fall back
    /// to SQLite's affinity rules (`INT` -> BIGINT, `CHAR`/`CLOB`/`TEXT` ->
    /// VARCHAR, `BLOB` -> BLOB, `REAL`/`FLOA`/`DOUB` -> DOUBLE) and then to VARCHAR.
    pub fn from_sql_name(name: &str) -> DeclaredType {
        let upper = name.trim().to_ascii_uppercase();
        let (base, args) = match upper.find('(') {
            Some(open) => (upper[..open].trim(), upper[open + 1..].trim_end_matches(')').trim()),
            None => (upper.as_str(), ""),
        };

        match base {
            "BOOLEAN" | "BOOL" | "LOGICAL" => DeclaredType::Boolean,
            "TINYINT" | "INT1" => DeclaredType::TinyInt,
            "SMALLINT" | "INT2" | "SHORT" => DeclaredType::SmallInt,
            "INTEGER" | "INT" | "INT4" | "SIGNED" | "MEDIUMINT" => DeclaredType::Integer,
            "BIGINT" | "INT8" | "LONG" => DeclaredType::BigInt,
            "UTINYINT" => DeclaredType::UTinyInt,
            "USMALLINT" => DeclaredType::USmallInt,
            "UINTEGER" => DeclaredType::UInteger,
            "UBIGINT" => DeclaredType::UBigInt,
            "HUGEINT" | "INT128" => DeclaredType::HugeInt,
            "UHUGEINT" | "UINT128" => DeclaredType::UHugeInt,
            "FLOAT" | "FLOAT4" | "REAL" => DeclaredType::Float,
            "DOUBLE" | "FLOAT8" | "DOUBLE PRECISION" => DeclaredType::Double,
            "DECIMAL" | "NUMERIC" => parse_decimal(args),
            "DATE" => DeclaredType::Date,
            "TIME" => DeclaredType::Time,
            "TIMETZ" | "TIME WITH TIME ZONE" => DeclaredType::TimeTz,
            "TIMESTAMP_S" => DeclaredType::TimestampSec,
            "TIMESTAMP_MS" => DeclaredType::TimestampMs,
            "TIMESTAMP" | "DATETIME" => DeclaredType::Timestamp,
            "TIMESTAMP_NS" => DeclaredType::TimestampNs,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => DeclaredType::TimestampTz,
            "ENUM" => DeclaredType::Enum,
            "CHAR" | "BPCHAR" => DeclaredType::Char,
            "VARCHAR" | "TEXT" | "STRING" | "CLOB" => DeclaredType::Varchar,
            "VARINT" => DeclaredType::VarInt,
            "UUID" | "GUID" => DeclaredType::Uuid,
            "INTERVAL" => DeclaredType::Interval,
            "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => DeclaredType::Blob,
            "BIT" | "BITSTRING" => DeclaredType::Bit,
            _ => affinity(base),
        }
    }

    /// ClickHouse-style type name reported in the `meta` section.
    ///
    /// Kinds without a precise counterpart report `String`.
    pub fn type_name(&self) -> String {
        match self {
            DeclaredType::Boolean => "Bool".into(),
            DeclaredType::TinyInt => "Int8".into(),
            DeclaredType::SmallInt => "Int16".into(),
            DeclaredType::Integer => "Int32".into(),
            DeclaredType::BigInt => "Int64".into(),
            DeclaredType::UTinyInt => "UInt8".into(),
            DeclaredType::USmallInt => "UInt16".into(),
            DeclaredType::UInteger => "UInt32".into(),
            DeclaredType::UBigInt => "UInt64".into(),
            DeclaredType::HugeInt => "Int128".into(),
            DeclaredType::UHugeInt => "UInt128".into(),
            DeclaredType::Float => "Float32".into(),
            DeclaredType::Double => "Float64".into(),
            DeclaredType::Decimal { width, scale } => format!("Decimal({width}, {scale})"),
            DeclaredType::Date => "Date".into(),
            DeclaredType::TimestampSec => "DateTime".into(),
            DeclaredType::TimestampMs => "DateTime64(3)".into(),
            DeclaredType::Timestamp | DeclaredType::TimestampTz => "DateTime64(6)".into(),
            DeclaredType::TimestampNs => "DateTime64(9)".into(),
            DeclaredType::Uuid => "UUID".into(),
            DeclaredType::List(inner) | DeclaredType::Array(inner, _) => {
                format!("Array({})", inner.type_name())
            }
            DeclaredType::Struct(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(name, ty)| {
                        if name.is_empty() {
                            ty.type_name()
                        } else {
                            format!("{name} {}", ty.type_name())
                        }
                    })
                    .collect();
                format!("Tuple({})", inner.join(", "))
            }
            DeclaredType::Map(key, value) => {
                format!("Map({}, {})", key.type_name(), value.type_name())
            }
            DeclaredType::Dynamic(reported) => reported.type_name(),
            _ => "String".into(),
        }
    }
}

fn parse_decimal(args: &str) -> DeclaredType {
    let mut parts = args.split(',').map(|p| p.trim().parse::<u8>().ok());
    let width = parts.next().flatten().unwrap_or(18);
    let scale = parts.next().flatten().unwrap_or(3);
    DeclaredType::Decimal { width, scale }
}

fn affinity(base: &str) -> DeclaredType {
    if base.contains("INT") {
        DeclaredType::BigInt
    } else if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
        DeclaredType::Varchar
    } else if base.contains("BLOB") {
        DeclaredType::Blob
    } else if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") {
        DeclaredType::Double
    } else {
        DeclaredType::Varchar
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Null => f.write_str("NULL"),
            DeclaredType::Boolean => f.write_str("BOOLEAN"),
            DeclaredType::TinyInt => f.write_str("TINYINT"),
            DeclaredType::SmallInt => f.write_str("SMALLINT"),
            DeclaredType::Integer => f.write_str("INTEGER"),
            DeclaredType::BigInt => f.write_str("BIGINT"),
            DeclaredType::UTinyInt => f.write_str("UTINYINT"),
            DeclaredType::USmallInt => f.write_str("USMALLINT"),
            DeclaredType::UInteger => f.write_str("UINTEGER"),
            DeclaredType::UBigInt => f.write_str("UBIGINT"),
            DeclaredType::HugeInt => f.write_str("HUGEINT"),
            DeclaredType::UHugeInt => f.write_str("UHUGEINT"),
            DeclaredType::Float => f.write_str("FLOAT"),
            DeclaredType::Double => f.write_str("DOUBLE"),
            DeclaredType::Decimal { width, scale } => write!(f, "DECIMAL({width},{scale})"),
            DeclaredType::Date => f.write_str("DATE"),
            DeclaredType::Time => f.write_str("TIME"),
            DeclaredType::TimeTz => f.write_str("TIME WITH TIME ZONE"),
            DeclaredType::TimestampSec => f.write_str("TIMESTAMP_S"),
            DeclaredType::TimestampMs => f.write_str("TIMESTAMP_MS"),
            DeclaredType::Timestamp => f.write_str("TIMESTAMP"),
            DeclaredType::TimestampNs => f.write_str("TIMESTAMP_NS"),
            DeclaredType::TimestampTz => f.write_str("TIMESTAMP WITH TIME ZONE"),
            DeclaredType::Enum => f.write_str("ENUM"),
            DeclaredType::Char => f.write_str("CHAR"),
            DeclaredType::Varchar => f.write_str("VARCHAR"),
            DeclaredType::VarInt => f.write_str("VARINT"),
            DeclaredType::Uuid => f.write_str("UUID"),
            DeclaredType::Interval => f.write_str("INTERVAL"),
            DeclaredType::Blob => f.write_str("BLOB"),
            DeclaredType::Bit => f.write_str("BIT"),
            DeclaredType::Union(members) => {
                f.write_str("UNION(")?;
                write_members(f, members)?;
                f.write_str(")")
            }
            DeclaredType::List(inner) => write!(f, "{inner}[]"),
            DeclaredType::Array(inner, len) => write!(f, "{inner}[{len}]"),
            DeclaredType::Struct(fields) => {
                f.write_str("STRUCT(")?;
                write_members(f, fields)?;
                f.write_str(")")
            }
            DeclaredType::Map(key, value) => write!(f, "MAP({key}, {value})"),
            DeclaredType::Unsupported(name) => f.write_str(name),
            DeclaredType::Dynamic(reported) => write!(f, "{reported}"),
        }
    }
}

fn write_members(f: &mut fmt::Formatter<'_>, members: &[(String, DeclaredType)]) -> fmt::Result {
    for (i, (name, ty)) in members.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        if name.is_empty() {
            write!(f, "{ty}")?;
        } else {
            write!(f, "{name} {ty}")?;
        }
    }
    Ok(())
}

/// One output column: name plus declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub ty: DeclaredType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, ty: DeclaredType) -> Self {
        Self { name: name.into(), ty }
    }
}
