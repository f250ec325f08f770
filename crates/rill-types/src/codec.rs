//! Value Codec — the single place where type-specific wire serialization
//! lives.
//!
//! Runtime [`Value`]s are converted to a self-describing [`WireValue`] before
//! they leave the server: tables become an explicit column list plus
//! row-major cells, images a format tag plus raw bytes. Decoding is total;
//! encoding fails for values that cannot cross a process boundary
//! (`Opaque` resource handles), which callers treat as a per-value
//! degradation, never a run failure.

use serde::{Deserialize, Serialize};

use crate::value::{ImageFormat, Value};

// ── Wire form ────────────────────────────────────────────────────────────────

/// Wire-transmissible representation of a [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<WireValue>),
    /// Record fields in canonical (name-sorted) order.
    Record(Vec<(String, WireValue)>),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<WireValue>>,
    },
    Image {
        format: ImageFormat,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("value of kind '{0}' cannot cross a process boundary")]
    Unencodable(&'static str),
}

// ── Encode / decode ──────────────────────────────────────────────────────────

/// Encode a runtime value into its wire form.
pub fn encode_value(value: &Value) -> Result<WireValue, CodecError> {
    match value {
        Value::Null => Ok(WireValue::Null),
        Value::Bool(b) => Ok(WireValue::Bool(*b)),
        Value::Int(i) => Ok(WireValue::Int(*i)),
        Value::Float(f) => Ok(WireValue::Float(*f)),
        Value::Text(s) => Ok(WireValue::Text(s.clone())),
        Value::List(items) => Ok(WireValue::List(
            items.iter().map(encode_value).collect::<Result<_, _>>()?,
        )),
        Value::Record(fields) => Ok(WireValue::Record(
            fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), encode_value(v)?)))
                .collect::<Result<_, CodecError>>()?,
        )),
        Value::Table { columns, rows } => Ok(WireValue::Table {
            columns: columns.clone(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(encode_value).collect::<Result<_, _>>())
                .collect::<Result<_, _>>()?,
        }),
        Value::Image { format, data } => Ok(WireValue::Image {
            format: *format,
            data: data.clone(),
        }),
        Value::Opaque { .. } => Err(CodecError::Unencodable(value.kind())),
    }
}

/// Check whether a value would encode, without building the wire form.
/// Used by workers before caching a computed value.
pub fn check_encodable(value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Opaque { .. } => Err(CodecError::Unencodable(value.kind())),
        Value::List(items) => items.iter().try_for_each(check_encodable),
        Value::Record(fields) => fields.values().try_for_each(check_encodable),
        Value::Table { rows, .. } => rows
            .iter()
            .flat_map(|row| row.iter())
            .try_for_each(check_encodable),
        _ => Ok(()),
    }
}

/// Decode a wire value back into a runtime value. Total: every wire form
/// has a runtime counterpart.
pub fn decode_value(wire: WireValue) -> Value {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(i) => Value::Int(i),
        WireValue::Float(f) => Value::Float(f),
        WireValue::Text(s) => Value::Text(s),
        WireValue::List(items) => Value::List(items.into_iter().map(decode_value).collect()),
        WireValue::Record(fields) => Value::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k, decode_value(v)))
                .collect(),
        ),
        WireValue::Table { columns, rows } => Value::Table {
            columns,
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(decode_value).collect())
                .collect(),
        },
        WireValue::Image { format, data } => Value::Image { format, data },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
