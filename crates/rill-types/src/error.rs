// Shared error types. Component-specific errors live with their component.

/// Structural problems in a compiled call graph.
///
/// These indicate a front-end bug, not a user pipeline error: the compiler
/// is expected to hand us well-formed graphs.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate node id: n{0}")]
    DuplicateNode(u32),

    #[error("reference to unknown node: n{0}")]
    UnknownNode(u32),

    #[error("call graph contains a dependency cycle")]
    Cycle,
}
