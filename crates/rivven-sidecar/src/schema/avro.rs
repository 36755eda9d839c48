//! Apache Avro support for record values
//!
//! Parses registry schemas with the `apache-avro` crate and converts between
//! plain JSON and Avro binary bodies.
//!
//! # JSON mapping
//!
//! - Output uses the standard JSON form: union values are written unwrapped.
//! - Input accepts both the unwrapped form and the Avro JSON encoding
//!   (`{"string": "x"}`) for union branches.
//! - Record fields missing from the input fall back to the schema default.
//! - `bytes` and `fixed` travel as base64 strings.
//! - Logical types map to their underlying scalar (`date` is days since the
//!   epoch, `timestamp-millis` is milliseconds, `uuid` is a string).
//! - `decimal` travels as a string such as `"12.34"` carrying the schema
//!   scale; input also takes a JSON number.
//! - `float` is written back in its shortest 32-bit form, so `0.1` stays
//!   `0.1` rather than the widened `0.10000000149011612`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_sidecar::schema::{AvroCodec, AvroSchema};
//!
//! let schema = AvroSchema::parse(r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"string"}]}"#)?;
//! let codec = AvroCodec::new(schema);
//! let body = codec.encode(&serde_json::json!({"id": "1"}))?;
//! let value = codec.decode(&body)?;
//! ```

use apache_avro::schema::{Name, RecordSchema};
use apache_avro::{
    from_avro_datum, to_avro_datum, types::Value as AvroValue, Decimal,
    Schema as AvroSchemaInner,
};
use base64::Engine;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Avro schema and conversion failures
#[derive(Debug, Error)]
pub enum AvroError {
    #[error("Invalid Avro schema: {0}")]
    ParseError(String),

    /// The converted value was rejected by the binary writer
    #[error("Avro write failed: {0}")]
    SerializationError(String),

    /// The body does not match the writer schema
    #[error("Avro read failed: {0}")]
    DeserializationError(String),

    #[error("Value rejected by schema: {0}")]
    InvalidValue(String),

    #[error("Expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Reference to undeclared type: {0}")]
    UnresolvedReference(String),
}

pub type AvroResult<T> = Result<T, AvroError>;

/// Named types (records, enums, fixed) declared anywhere in a schema
pub type NamedTypes = HashMap<Name, AvroSchemaInner>;

/// A parsed schema together with every named type it declares, so that
/// references such as a recursive `"type": "Node"` can be followed
#[derive(Clone)]
pub struct AvroSchema {
    inner: AvroSchemaInner,
    names: Arc<NamedTypes>,
}

impl std::fmt::Debug for AvroSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvroSchema")
            .field("name", &self.name())
            .field("named_types", &self.names.len())
            .finish()
    }
}

impl AvroSchema {
    pub fn parse(text: &str) -> AvroResult<Self> {
        let inner =
            AvroSchemaInner::parse_str(text).map_err(|e| AvroError::ParseError(e.to_string()))?;

        let mut names = NamedTypes::new();
        collect_named_types(&inner, &mut names);

        Ok(Self {
            inner,
            names: Arc::new(names),
        })
    }

    pub fn inner(&self) -> &AvroSchemaInner {
        &self.inner
    }

    pub fn names(&self) -> &NamedTypes {
        &self.names
    }

    /// Full name of the top-level type, if it is a named one
    pub fn name(&self) -> Option<String> {
        let name = match &self.inner {
            AvroSchemaInner::Record(RecordSchema { name, .. }) => name,
            AvroSchemaInner::Enum(schema) => &schema.name,
            AvroSchemaInner::Fixed(schema) => &schema.name,
            _ => return None,
        };
        Some(name.fullname(None))
    }

    pub fn is_record(&self) -> bool {
        matches!(self.inner, AvroSchemaInner::Record(_))
    }
}

fn collect_named_types(schema: &AvroSchemaInner, names: &mut NamedTypes) {
    match schema {
        AvroSchemaInner::Record(record) => {
            if names.contains_key(&record.name) {
                return;
            }
            names.insert(record.name.clone(), schema.clone());
            for field in &record.fields {
                collect_named_types(&field.schema, names);
            }
        }
        AvroSchemaInner::Enum(e) => {
            names.insert(e.name.clone(), schema.clone());
        }
        AvroSchemaInner::Fixed(f) => {
            names.insert(f.name.clone(), schema.clone());
        }
        AvroSchemaInner::Array(array) => collect_named_types(&array.items, names),
        AvroSchemaInner::Map(map) => collect_named_types(&map.types, names),
        AvroSchemaInner::Union(union) => {
            for variant in union.variants() {
                collect_named_types(variant, names);
            }
        }
        _ => {}
    }
}

fn resolve_ref<'a>(
    schema: &'a AvroSchemaInner,
    names: &'a NamedTypes,
) -> AvroResult<&'a AvroSchemaInner> {
    match schema {
        AvroSchemaInner::Ref { name } => names
            .get(name)
            .ok_or_else(|| AvroError::UnresolvedReference(name.fullname(None))),
        other => Ok(other),
    }
}

/// Record schema behind a (possibly referenced) schema node
pub(crate) fn as_record<'a>(
    schema: &'a AvroSchemaInner,
    names: &'a NamedTypes,
) -> Option<&'a RecordSchema> {
    match resolve_ref(schema, names).ok()? {
        AvroSchemaInner::Record(record) => Some(record),
        _ => None,
    }
}

/// Binary body encoder/decoder bound to one schema
#[derive(Debug, Clone)]
pub struct AvroCodec {
    schema: AvroSchema,
}

impl AvroCodec {
    pub fn new(schema: AvroSchema) -> Self {
        Self { schema }
    }

    pub fn encode(&self, value: &JsonValue) -> AvroResult<Vec<u8>> {
        let AvroSchema { inner, names } = &self.schema;
        let datum = json_to_avro(value, inner, names)?;
        to_avro_datum(inner, datum).map_err(|e| AvroError::SerializationError(e.to_string()))
    }

    pub fn decode(&self, body: &[u8]) -> AvroResult<JsonValue> {
        let mut reader = body;
        let datum = from_avro_datum(&self.schema.inner, &mut reader, None)
            .map_err(|e| AvroError::DeserializationError(e.to_string()))?;
        avro_to_json(&datum, &self.schema.inner, &self.schema.names)
    }
}

fn schema_type_name(schema: &AvroSchemaInner) -> String {
    match schema {
        AvroSchemaInner::Null => "null".to_string(),
        AvroSchemaInner::Boolean => "boolean".to_string(),
        AvroSchemaInner::Int => "int".to_string(),
        AvroSchemaInner::Long => "long".to_string(),
        AvroSchemaInner::Float => "float".to_string(),
        AvroSchemaInner::Double => "double".to_string(),
        AvroSchemaInner::Bytes => "bytes".to_string(),
        AvroSchemaInner::String => "string".to_string(),
        AvroSchemaInner::Array(_) => "array".to_string(),
        AvroSchemaInner::Map(_) => "map".to_string(),
        AvroSchemaInner::Union(_) => "union".to_string(),
        AvroSchemaInner::Record(r) => r.name.name.clone(),
        AvroSchemaInner::Enum(e) => e.name.name.clone(),
        AvroSchemaInner::Fixed(f) => f.name.name.clone(),
        AvroSchemaInner::Ref { name } => name.name.clone(),
        AvroSchemaInner::Date => "date".to_string(),
        AvroSchemaInner::TimeMillis => "time-millis".to_string(),
        AvroSchemaInner::TimeMicros => "time-micros".to_string(),
        AvroSchemaInner::TimestampMillis => "timestamp-millis".to_string(),
        AvroSchemaInner::TimestampMicros => "timestamp-micros".to_string(),
        AvroSchemaInner::Uuid => "uuid".to_string(),
        AvroSchemaInner::Decimal(_) => "decimal".to_string(),
        AvroSchemaInner::LocalTimestampMillis => "local-timestamp-millis".to_string(),
        AvroSchemaInner::LocalTimestampMicros => "local-timestamp-micros".to_string(),
        other => format!("{:?}", other),
    }
}

/// Names a union branch may be addressed by in the Avro JSON encoding
pub(crate) fn branch_keys(variant: &AvroSchemaInner) -> Vec<String> {
    match variant {
        AvroSchemaInner::Record(r) => vec![r.name.name.clone(), r.name.fullname(None)],
        AvroSchemaInner::Enum(e) => vec![e.name.name.clone(), e.name.fullname(None)],
        AvroSchemaInner::Fixed(f) => vec![f.name.name.clone(), f.name.fullname(None)],
        AvroSchemaInner::Ref { name } => vec![name.name.clone(), name.fullname(None)],
        // logical types are wrapped by their underlying type name
        AvroSchemaInner::Date | AvroSchemaInner::TimeMillis => vec!["int".to_string()],
        AvroSchemaInner::TimeMicros
        | AvroSchemaInner::TimestampMillis
        | AvroSchemaInner::TimestampMicros
        | AvroSchemaInner::TimestampNanos
        | AvroSchemaInner::LocalTimestampMillis
        | AvroSchemaInner::LocalTimestampMicros
        | AvroSchemaInner::LocalTimestampNanos => vec!["long".to_string()],
        AvroSchemaInner::Uuid => vec!["string".to_string()],
        AvroSchemaInner::Decimal(decimal) => branch_keys(&decimal.inner),
        other => vec![schema_type_name(other)],
    }
}

fn as_i64(json: &JsonValue, expected: &str) -> AvroResult<i64> {
    json.as_i64()
        .ok_or_else(|| AvroError::InvalidValue(format!("Expected {}", expected)))
}

fn as_i32(json: &JsonValue, expected: &str) -> AvroResult<i32> {
    let i = as_i64(json, expected)?;
    i32::try_from(i).map_err(|_| AvroError::InvalidValue(format!("Value {} out of i32 range", i)))
}

/// Convert JSON value to Avro value
pub fn json_to_avro(
    json: &JsonValue,
    schema: &AvroSchemaInner,
    names: &NamedTypes,
) -> AvroResult<AvroValue> {
    match (schema, json) {
        (AvroSchemaInner::Ref { .. }, _) => {
            let target = resolve_ref(schema, names)?;
            json_to_avro(json, target, names)
        }

        (AvroSchemaInner::Null, JsonValue::Null) => Ok(AvroValue::Null),

        (AvroSchemaInner::Boolean, JsonValue::Bool(b)) => Ok(AvroValue::Boolean(*b)),

        (AvroSchemaInner::Int, JsonValue::Number(_)) => Ok(AvroValue::Int(as_i32(json, "int")?)),

        (AvroSchemaInner::Long, JsonValue::Number(_)) => {
            Ok(AvroValue::Long(as_i64(json, "long")?))
        }

        (AvroSchemaInner::Float, JsonValue::Number(n)) => {
            let f = n
                .as_f64()
                .ok_or_else(|| AvroError::InvalidValue("Expected float".to_string()))?;
            Ok(AvroValue::Float(f as f32))
        }

        (AvroSchemaInner::Double, JsonValue::Number(n)) => {
            let f = n
                .as_f64()
                .ok_or_else(|| AvroError::InvalidValue("Expected double".to_string()))?;
            Ok(AvroValue::Double(f))
        }

        (AvroSchemaInner::String, JsonValue::String(s)) => Ok(AvroValue::String(s.clone())),

        (AvroSchemaInner::Bytes, JsonValue::String(s)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| AvroError::InvalidValue(format!("Invalid base64: {}", e)))?;
            Ok(AvroValue::Bytes(bytes))
        }

        (AvroSchemaInner::Date, JsonValue::Number(_)) => {
            Ok(AvroValue::Date(as_i32(json, "date")?))
        }

        (AvroSchemaInner::TimeMillis, JsonValue::Number(_)) => {
            Ok(AvroValue::TimeMillis(as_i32(json, "time-millis")?))
        }

        (AvroSchemaInner::TimeMicros, JsonValue::Number(_)) => {
            Ok(AvroValue::TimeMicros(as_i64(json, "time-micros")?))
        }

        (AvroSchemaInner::TimestampMillis, JsonValue::Number(_)) => {
            Ok(AvroValue::TimestampMillis(as_i64(json, "timestamp-millis")?))
        }

        (AvroSchemaInner::TimestampMicros, JsonValue::Number(_)) => {
            Ok(AvroValue::TimestampMicros(as_i64(json, "timestamp-micros")?))
        }

        (AvroSchemaInner::LocalTimestampMillis, JsonValue::Number(_)) => Ok(
            AvroValue::LocalTimestampMillis(as_i64(json, "local-timestamp-millis")?),
        ),

        (AvroSchemaInner::LocalTimestampMicros, JsonValue::Number(_)) => Ok(
            AvroValue::LocalTimestampMicros(as_i64(json, "local-timestamp-micros")?),
        ),

        (AvroSchemaInner::TimestampNanos, JsonValue::Number(_)) => Ok(
            AvroValue::TimestampNanos(as_i64(json, "timestamp-nanos")?),
        ),

        (AvroSchemaInner::LocalTimestampNanos, JsonValue::Number(_)) => Ok(
            AvroValue::LocalTimestampNanos(as_i64(json, "local-timestamp-nanos")?),
        ),

        (AvroSchemaInner::Decimal(decimal), JsonValue::Number(_) | JsonValue::String(_)) => {
            let text = match json {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            let unscaled = parse_decimal(&text, decimal.precision, decimal.scale)?;
            let size = match decimal.inner.as_ref() {
                AvroSchemaInner::Fixed(fixed) => Some(fixed.size),
                _ => None,
            };
            Ok(AvroValue::Decimal(Decimal::from(decimal_bytes(
                unscaled, size,
            )?)))
        }

        (AvroSchemaInner::Uuid, JsonValue::String(s)) => {
            let uuid = uuid::Uuid::parse_str(s)
                .map_err(|e| AvroError::InvalidValue(format!("Invalid uuid: {}", e)))?;
            Ok(AvroValue::Uuid(uuid))
        }

        (AvroSchemaInner::Array(array_schema), JsonValue::Array(arr)) => {
            let items: AvroResult<Vec<_>> = arr
                .iter()
                .map(|item| json_to_avro(item, &array_schema.items, names))
                .collect();
            Ok(AvroValue::Array(items?))
        }

        (AvroSchemaInner::Map(map_schema), JsonValue::Object(obj)) => {
            let mut map = HashMap::with_capacity(obj.len());
            for (k, v) in obj {
                map.insert(k.clone(), json_to_avro(v, &map_schema.types, names)?);
            }
            Ok(AvroValue::Map(map))
        }

        (AvroSchemaInner::Union(union_schema), json) => {
            // Avro JSON encoding: {"<branch>": value}
            if let JsonValue::Object(obj) = json {
                if obj.len() == 1 {
                    if let Some((key, inner)) = obj.iter().next() {
                        for (idx, variant) in union_schema.variants().iter().enumerate() {
                            if branch_keys(variant).iter().any(|k| k == key) {
                                if let Ok(v) = json_to_avro(inner, variant, names) {
                                    return Ok(AvroValue::Union(idx as u32, Box::new(v)));
                                }
                            }
                        }
                    }
                }
            }

            // Standard JSON: first branch that accepts the value
            for (idx, variant) in union_schema.variants().iter().enumerate() {
                if let Ok(v) = json_to_avro(json, variant, names) {
                    return Ok(AvroValue::Union(idx as u32, Box::new(v)));
                }
            }
            Err(AvroError::InvalidValue(format!(
                "No matching union variant for: {}",
                json
            )))
        }

        (AvroSchemaInner::Record(record_schema), JsonValue::Object(obj)) => {
            let mut fields = Vec::with_capacity(record_schema.fields.len());
            for field in &record_schema.fields {
                let value = if let Some(v) = obj.get(&field.name) {
                    json_to_avro(v, &field.schema, names)
                        .map_err(|e| field_error(&field.name, e))?
                } else if let Some(default) = &field.default {
                    json_to_avro(default, &field.schema, names)
                        .map_err(|e| field_error(&field.name, e))?
                } else {
                    return Err(AvroError::InvalidValue(format!(
                        "Missing required field: {}",
                        field.name
                    )));
                };
                fields.push((field.name.clone(), value));
            }
            Ok(AvroValue::Record(fields))
        }

        (AvroSchemaInner::Enum(enum_schema), JsonValue::String(s)) => {
            if let Some(pos) = enum_schema.symbols.iter().position(|sym| sym == s) {
                Ok(AvroValue::Enum(pos as u32, s.clone()))
            } else {
                Err(AvroError::InvalidValue(format!(
                    "Invalid enum symbol: {}",
                    s
                )))
            }
        }

        (AvroSchemaInner::Fixed(fixed_schema), JsonValue::String(s)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| AvroError::InvalidValue(format!("Invalid base64: {}", e)))?;
            if bytes.len() != fixed_schema.size {
                return Err(AvroError::InvalidValue(format!(
                    "Fixed size mismatch: expected {}, got {}",
                    fixed_schema.size,
                    bytes.len()
                )));
            }
            Ok(AvroValue::Fixed(fixed_schema.size, bytes))
        }

        _ => Err(AvroError::TypeMismatch {
            expected: schema_type_name(schema),
            actual: json.to_string(),
        }),
    }
}

fn field_error(field: &str, err: AvroError) -> AvroError {
    match err {
        AvroError::TypeMismatch { expected, actual } => AvroError::TypeMismatch {
            expected: format!("{} for field '{}'", expected, field),
            actual,
        },
        other => other,
    }
}

/// Convert a decoded Avro value to JSON, guided by its writer schema
pub fn avro_to_json(
    avro: &AvroValue,
    schema: &AvroSchemaInner,
    names: &NamedTypes,
) -> AvroResult<JsonValue> {
    let schema = resolve_ref(schema, names)?;
    match (avro, schema) {
        (AvroValue::Null, _) => Ok(JsonValue::Null),
        (AvroValue::Boolean(b), _) => Ok(JsonValue::Bool(*b)),
        (AvroValue::Int(i) | AvroValue::Date(i) | AvroValue::TimeMillis(i), _) => {
            Ok(JsonValue::Number((*i).into()))
        }
        (
            AvroValue::Long(l)
            | AvroValue::TimeMicros(l)
            | AvroValue::TimestampMillis(l)
            | AvroValue::TimestampMicros(l)
            | AvroValue::TimestampNanos(l)
            | AvroValue::LocalTimestampMillis(l)
            | AvroValue::LocalTimestampMicros(l)
            | AvroValue::LocalTimestampNanos(l),
            _,
        ) => Ok(JsonValue::Number((*l).into())),
        (AvroValue::Float(f), _) => Ok(float_to_json(*f)),
        (AvroValue::Double(d), _) => Ok(serde_json::json!(*d)),
        (AvroValue::String(s), _) => Ok(JsonValue::String(s.clone())),
        (AvroValue::Uuid(u), _) => Ok(JsonValue::String(u.to_string())),
        (AvroValue::Bytes(b) | AvroValue::Fixed(_, b), _) => Ok(JsonValue::String(
            base64::engine::general_purpose::STANDARD.encode(b),
        )),
        (AvroValue::Decimal(d), AvroSchemaInner::Decimal(decimal)) => {
            let bytes = Vec::<u8>::try_from(d)
                .map_err(|e| AvroError::DeserializationError(e.to_string()))?;
            let unscaled = unscaled_from_bytes(&bytes)?;
            Ok(JsonValue::String(format_decimal(unscaled, decimal.scale)))
        }
        (AvroValue::Array(arr), AvroSchemaInner::Array(array_schema)) => {
            let items: AvroResult<Vec<_>> = arr
                .iter()
                .map(|item| avro_to_json(item, &array_schema.items, names))
                .collect();
            Ok(JsonValue::Array(items?))
        }
        (AvroValue::Map(map), AvroSchemaInner::Map(map_schema)) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                obj.insert(k.clone(), avro_to_json(v, &map_schema.types, names)?);
            }
            Ok(JsonValue::Object(obj))
        }
        (AvroValue::Union(idx, inner), AvroSchemaInner::Union(union_schema)) => {
            let variant = union_schema.variants().get(*idx as usize).ok_or_else(|| {
                AvroError::DeserializationError(format!("Union branch {} out of range", idx))
            })?;
            avro_to_json(inner, variant, names)
        }
        (AvroValue::Record(fields), AvroSchemaInner::Record(record_schema)) => {
            let mut obj = serde_json::Map::new();
            for (name, value) in fields {
                let field = record_schema
                    .lookup
                    .get(name)
                    .and_then(|pos| record_schema.fields.get(*pos))
                    .ok_or_else(|| {
                        AvroError::DeserializationError(format!("Unknown field: {}", name))
                    })?;
                obj.insert(name.clone(), avro_to_json(value, &field.schema, names)?);
            }
            Ok(JsonValue::Object(obj))
        }
        (AvroValue::Enum(_idx, symbol), _) => Ok(JsonValue::String(symbol.clone())),
        _ => Err(AvroError::InvalidValue(format!(
            "Unsupported Avro value for {}: {:?}",
            schema_type_name(schema),
            avro
        ))),
    }
}

/// Shortest decimal form of an `f32`; non-finite values become `null`
fn float_to_json(f: f32) -> JsonValue {
    f.to_string()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(JsonValue::Null, JsonValue::Number)
}

/// Unscaled value of a decimal literal such as `-12.30` at `scale`
fn parse_decimal(text: &str, precision: usize, scale: usize) -> AvroResult<i128> {
    let invalid = || AvroError::InvalidValue(format!("Invalid decimal: {}", text));

    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int, frac) = body.split_once('.').unwrap_or((body, ""));
    if int.is_empty() || !int.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let frac = frac.trim_end_matches('0');
    if frac.len() > scale {
        return Err(AvroError::InvalidValue(format!(
            "Decimal {} has more than {} fractional digits",
            text, scale
        )));
    }

    let digits = format!("{}{:0<width$}", int, frac, width = scale);
    let magnitude: i128 = digits.parse().map_err(|_| invalid())?;
    if magnitude.to_string().len() > precision {
        return Err(AvroError::InvalidValue(format!(
            "Decimal {} exceeds precision {}",
            text, precision
        )));
    }

    Ok(if negative { -magnitude } else { magnitude })
}

fn format_decimal(unscaled: i128, scale: usize) -> String {
    let sign = if unscaled < 0 { "-" } else { "" };
    let digits = unscaled.unsigned_abs().to_string();
    if scale == 0 {
        return format!("{}{}", sign, digits);
    }

    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (int, frac) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, int, frac)
}

/// Big-endian two's complement bytes, sign-extended to `size` when given
fn decimal_bytes(unscaled: i128, size: Option<usize>) -> AvroResult<Vec<u8>> {
    let full = unscaled.to_be_bytes();
    let fill = if unscaled < 0 { 0xFF } else { 0x00 };

    // a leading fill byte is redundant while the next byte keeps the sign bit
    let mut start = 0;
    while start < full.len() - 1
        && full[start] == fill
        && (full[start + 1] & 0x80) == (fill & 0x80)
    {
        start += 1;
    }
    let minimal = &full[start..];

    match size {
        None => Ok(minimal.to_vec()),
        Some(size) if minimal.len() <= size => {
            let mut bytes = vec![fill; size - minimal.len()];
            bytes.extend_from_slice(minimal);
            Ok(bytes)
        }
        Some(size) => Err(AvroError::InvalidValue(format!(
            "Decimal needs {} bytes, fixed size is {}",
            minimal.len(),
            size
        ))),
    }
}

fn unscaled_from_bytes(bytes: &[u8]) -> AvroResult<i128> {
    let Some(first) = bytes.first() else {
        return Ok(0);
    };
    if bytes.len() > 16 {
        return Err(AvroError::DeserializationError(format!(
            "Decimal of {} bytes is wider than 128 bits",
            bytes.len()
        )));
    }

    let fill = if first & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut buf = [fill; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Ok(i128::from_be_bytes(buf))
}
