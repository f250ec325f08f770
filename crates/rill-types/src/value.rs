//! Runtime value model for pipeline calls.
//!
//! Pipeline callables consume and produce [`Value`]s. The model is closed:
//! the engine never needs reflection, only structural traversal (for
//! fingerprinting, size estimation and wire encoding).
//!
//! `Opaque` is the odd one out. It stands for values that wrap a live
//! resource (an open connection, a device handle). Such values carry no
//! stable identity, so they can neither be fingerprinted nor cross the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Value ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    /// String-keyed record. `BTreeMap` keeps field order canonical, so two
    /// structurally equal records traverse identically.
    Record(BTreeMap<String, Value>),
    Table {
        columns: Vec<String>,
        /// Row-major cells; every row has `columns.len()` entries.
        rows: Vec<Vec<Value>>,
    },
    Image {
        format: ImageFormat,
        data: Vec<u8>,
    },
    /// Handle to a live resource. Identity is per-process and unstable.
    Opaque {
        token: u64,
        kind: String,
    },
}

/// Format tag for image values on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ImageFormat {
    Png = 0,
    Jpeg = 1,
    Svg = 2,
}

impl Value {
    /// Short kind name, used in log messages and codec errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Table { .. } => "table",
            Self::Image { .. } => "image",
            Self::Opaque { .. } => "opaque",
        }
    }

    /// Recursive estimate of the memory this value occupies, in bytes.
    ///
    /// Feeds the cache capacity accounting; precision matters less than
    /// monotonicity (bigger values report bigger sizes).
    pub fn approx_size(&self) -> usize {
        let immediate = std::mem::size_of::<Self>();
        match self {
            Self::Text(s) => immediate + s.len(),
            Self::List(items) => immediate + items.iter().map(Self::approx_size).sum::<usize>(),
            Self::Record(fields) => {
                immediate
                    + fields
                        .iter()
                        .map(|(k, v)| k.len() + v.approx_size())
                        .sum::<usize>()
            }
            Self::Table { columns, rows } => {
                immediate
                    + columns.iter().map(String::len).sum::<usize>()
                    + rows
                        .iter()
                        .flat_map(|row| row.iter())
                        .map(Self::approx_size)
                        .sum::<usize>()
            }
            Self::Image { data, .. } => immediate + data.len(),
            Self::Opaque { kind, .. } => immediate + kind.len(),
            _ => immediate,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_size_grows_with_content() {
        let small = Value::Text("ab".into());
        let large = Value::Text("a".repeat(1024));
        assert!(large.approx_size() > small.approx_size());

        let nested = Value::List(vec![small.clone(), small.clone(), small]);
        assert!(nested.approx_size() > Value::List(vec![]).approx_size());
    }

    #[test]
    fn table_size_counts_cells() {
        let empty = Value::Table {
            columns: vec!["a".into()],
            rows: vec![],
        };
        let filled = Value::Table {
            columns: vec!["a".into()],
            rows: vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        };
        assert!(filled.approx_size() > empty.approx_size());
    }

    #[test]
    fn value_serde_round_trip() {
        let mut fields = BTreeMap::new();
        fields.insert("count".to_string(), Value::Int(3));
        let value = Value::List(vec![
            Value::Record(fields),
            Value::Float(1.5),
            Value::Null,
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let round: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(round, value);
    }

    #[test]
    fn kind_names() {
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(
            Value::Opaque {
                token: 7,
                kind: "connection".into()
            }
            .kind(),
            "opaque"
        );
    }
}
