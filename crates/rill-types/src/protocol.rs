//! Wire protocol between IDE clients and the server.
//!
//! Messages are serialized with bincode and sent as `[u32 BE length][payload]`
//! frames (framing lives in `rill-node::net`). One connection per client,
//! bidirectional, message-oriented.

use serde::{Deserialize, Serialize};

use crate::codec::WireValue;

#[derive(Debug, thiserror::Error)]
#[error("protocol decode error: {0}")]
pub struct ProtocolDecodeError(pub String);

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToServer {
    /// Start a pipeline run. Only the named placeholders (and their
    /// transitive dependencies) are computed.
    RunRequest {
        run_id: String,
        /// Reference to a graph registered by the front-end.
        graph_ref: String,
        placeholders: Vec<String>,
    },

    /// Stop dispatching further calls for a run.
    CancelRequest { run_id: String },

    /// Request cumulative memoization statistics.
    StatsRequest,

    /// Cancel all runs across all sessions and terminate. Idempotent.
    Shutdown,
}

// ── Server → client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FromServer {
    /// A requested placeholder resolved. Emitted per placeholder, in
    /// completion order.
    PlaceholderValue {
        run_id: String,
        name: String,
        value: WireValue,
    },

    /// A requested placeholder resolved but could not be encoded for
    /// delivery. Sibling placeholders are unaffected.
    PlaceholderFailed {
        run_id: String,
        name: String,
        message: String,
    },

    RunCompleted {
        run_id: String,
    },

    RunFailed {
        run_id: String,
        error_kind: String,
        message: String,
    },

    RunCancelled {
        run_id: String,
    },

    StatsResponse {
        lookups: u64,
        hits: u64,
        misses: u64,
        entries: u64,
    },

    /// Acknowledgment that the server is shutting down.
    Shutdown,
}

// ── Encode / decode ──────────────────────────────────────────────────────────

pub fn encode_to_server(msg: &ToServer) -> Result<Vec<u8>, ProtocolDecodeError> {
    bincode::serde::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| ProtocolDecodeError(e.to_string()))
}

pub fn decode_to_server(data: &[u8]) -> Result<ToServer, ProtocolDecodeError> {
    let (msg, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| ProtocolDecodeError(e.to_string()))?;
    Ok(msg)
}

pub fn encode_from_server(msg: &FromServer) -> Result<Vec<u8>, ProtocolDecodeError> {
    bincode::serde::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| ProtocolDecodeError(e.to_string()))
}

pub fn decode_from_server(data: &[u8]) -> Result<FromServer, ProtocolDecodeError> {
    let (msg, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| ProtocolDecodeError(e.to_string()))?;
    Ok(msg)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
