//! Stable call fingerprinting.
//!
//! A fingerprint is a BLAKE3 digest over the callable identity, the
//! positional arguments in order, and the keyword arguments in name-sorted
//! order. Every section and every value variant is domain-separated with a
//! tag byte, so `f(1)` and `f("1")` can never collide structurally.
//!
//! Values that carry unstable identity (open resource handles) make a call
//! unhashable. That is a per-call cache bypass, never a run failure: the
//! caller executes the call without consulting or populating the cache.

use rill_types::Value;
use tracing::{debug, warn};

/// Traversal guard: values nested deeper than this are treated as
/// unhashable rather than risking a stack overflow.
const MAX_DEPTH: usize = 64;

// ── Fingerprint ──────────────────────────────────────────────────────────────

/// Deterministic key for a memoizable call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallFingerprint([u8; 32]);

impl CallFingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for CallFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Result of an attempted fingerprint computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintOutcome {
    Hashed(CallFingerprint),
    /// At least one argument cannot be deterministically hashed. The call
    /// must run uncached.
    Unhashable,
}

// Section and variant tags. Sections keep positional and keyword arguments
// from bleeding into each other; variant tags keep value kinds apart.
const SECTION_CALLABLE: u8 = 0xC0;
const SECTION_POSITIONAL: u8 = 0xC1;
const SECTION_KEYWORD: u8 = 0xC2;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;
const TAG_LIST: u8 = 0x05;
const TAG_RECORD: u8 = 0x06;
const TAG_TABLE: u8 = 0x07;
const TAG_IMAGE: u8 = 0x08;

enum HashError {
    /// The value wraps a live resource with per-process identity.
    Unstable(&'static str),
    /// Structural traversal gave up (nesting beyond [`MAX_DEPTH`]).
    DepthExceeded,
}

/// Compute the fingerprint for a call.
///
/// Keyword argument order at the call site never changes the result: pairs
/// are hashed in name-sorted order.
pub fn fingerprint(
    callable: &str,
    positional: &[Value],
    keyword: &[(String, Value)],
) -> FingerprintOutcome {
    let mut hasher = blake3::Hasher::new();

    hasher.update(&[SECTION_CALLABLE]);
    write_str(&mut hasher, callable);

    hasher.update(&[SECTION_POSITIONAL]);
    hasher.update(&(positional.len() as u64).to_le_bytes());
    for value in positional {
        if let Err(err) = write_value(&mut hasher, value, 0) {
            return downgrade(callable, err);
        }
    }

    hasher.update(&[SECTION_KEYWORD]);
    let mut pairs: Vec<&(String, Value)> = keyword.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    hasher.update(&(pairs.len() as u64).to_le_bytes());
    for (name, value) in pairs {
        write_str(&mut hasher, name);
        if let Err(err) = write_value(&mut hasher, value, 0) {
            return downgrade(callable, err);
        }
    }

    FingerprintOutcome::Hashed(CallFingerprint(*hasher.finalize().as_bytes()))
}

fn downgrade(callable: &str, err: HashError) -> FingerprintOutcome {
    match err {
        HashError::Unstable(kind) => {
            debug!(callable, kind, "argument has unstable identity, bypassing cache");
        }
        HashError::DepthExceeded => {
            warn!(callable, "argument nesting exceeds hash depth limit, bypassing cache");
        }
    }
    FingerprintOutcome::Unhashable
}

fn write_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn write_value(hasher: &mut blake3::Hasher, value: &Value, depth: usize) -> Result<(), HashError> {
    if depth > MAX_DEPTH {
        return Err(HashError::DepthExceeded);
    }
    match value {
        Value::Null => {
            hasher.update(&[TAG_NULL]);
        }
        Value::Bool(b) => {
            hasher.update(&[TAG_BOOL, *b as u8]);
        }
        Value::Int(i) => {
            hasher.update(&[TAG_INT]);
            hasher.update(&i.to_le_bytes());
        }
        Value::Float(f) => {
            // Bit pattern, so 0.0 and -0.0 (and distinct NaNs) stay distinct.
            hasher.update(&[TAG_FLOAT]);
            hasher.update(&f.to_bits().to_le_bytes());
        }
        Value::Text(s) => {
            hasher.update(&[TAG_TEXT]);
            write_str(hasher, s);
        }
        Value::List(items) => {
            hasher.update(&[TAG_LIST]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_value(hasher, item, depth + 1)?;
            }
        }
        Value::Record(fields) => {
            // BTreeMap iterates in key order, so field order is canonical.
            hasher.update(&[TAG_RECORD]);
            hasher.update(&(fields.len() as u64).to_le_bytes());
            for (key, field) in fields {
                write_str(hasher, key);
                write_value(hasher, field, depth + 1)?;
            }
        }
        Value::Table { columns, rows } => {
            hasher.update(&[TAG_TABLE]);
            hasher.update(&(columns.len() as u64).to_le_bytes());
            for column in columns {
                write_str(hasher, column);
            }
            hasher.update(&(rows.len() as u64).to_le_bytes());
            for row in rows {
                // Row length too, so ragged tables with equal flattened
                // cells cannot collide.
                hasher.update(&(row.len() as u64).to_le_bytes());
                for cell in row {
                    write_value(hasher, cell, depth + 1)?;
                }
            }
        }
        Value::Image { format, data } => {
            hasher.update(&[TAG_IMAGE, *format as u8]);
            hasher.update(&(data.len() as u64).to_le_bytes());
            hasher.update(data);
        }
        Value::Opaque { .. } => return Err(HashError::Unstable(value.kind())),
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
