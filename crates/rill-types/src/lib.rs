//! `rill-types` — shared types for the Rill execution backend.
//!
//! Everything that crosses a crate boundary lives here: the runtime value
//! model, the compiled call graph consumed from the front-end, the wire
//! protocol spoken to IDE clients, and the value codec that turns runtime
//! values into their wire form.

pub mod codec;
pub mod config;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod value;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use codec::{check_encodable, decode_value, encode_value, CodecError, WireValue};
pub use config::{CacheConfig, EvictionOrder, PoolConfig, ServerConfig};
pub use error::GraphError;
pub use graph::{ArgExpr, CallGraph, CallNode, NodeId};
pub use protocol::{
    decode_from_server, decode_to_server, encode_from_server, encode_to_server, FromServer,
    ProtocolDecodeError, ToServer,
};
pub use value::{ImageFormat, Value};
