//! Rill server binary.
//!
//! ```bash
//! # Start the server with a demo graph registered under "demo"
//! RUST_LOG=info cargo run --bin rill-node -- serve --port 5000 --workers 4
//! ```
//!
//! The graph front-end is out of scope for this binary; it registers a small
//! built-in dataset pipeline so the wire protocol can be exercised end to
//! end with any client that speaks the frame format.

mod net;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rill_engine::SessionManager;
use rill_memo::MemoCache;
use rill_pool::error::CallError;
use rill_pool::{CallArgs, CallableRegistry, WorkerPool};
use rill_types::{
    ArgExpr, CacheConfig, CallGraph, CallNode, GraphError, NodeId, PoolConfig, ServerConfig, Value,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "rill-node",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Rill — memoizing pipeline execution server"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for client connections and execute pipeline runs.
    Serve {
        /// Interface to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// TCP port to listen on.
        #[arg(long, default_value_t = 5000)]
        port: u16,

        /// Maximum concurrently executing calls.
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Default log level: INFO. Override with RUST_LOG=rill_engine=debug etc.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { host, port, workers } => run_server(host, port, workers).await,
    }
}

async fn run_server(host: String, port: u16, workers: usize) -> Result<()> {
    let config = ServerConfig {
        host,
        port,
        ..ServerConfig::default()
    };
    let pool_config = PoolConfig {
        max_workers: workers,
        ..PoolConfig::default()
    };

    let pool = WorkerPool::new(
        pool_config,
        Arc::new(MemoCache::new(CacheConfig::default())),
        Arc::new(demo_registry()),
    );
    pool.prewarm(workers).await;

    let manager = Arc::new(SessionManager::new(pool));
    manager.register_graph("demo", demo_graph()?);
    info!(workers, "server ready");

    tokio::select! {
        result = net::serve(config, Arc::clone(&manager)) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, shutting down");
            manager.shutdown().await;
            Ok(())
        }
    }
}

// ── Demo pipeline ─────────────────────────────────────────────────────────────

/// A tiny dataset pipeline: load a table, then derive a row count and a
/// column mean from it. Enough to exercise memoization, partial evaluation
/// and placeholder streaming from a real client.
fn demo_registry() -> CallableRegistry {
    let mut registry = CallableRegistry::new();

    registry.register("demo.load_table", |_: &CallArgs| {
        Ok(Value::Table {
            columns: vec!["age".into(), "fare".into()],
            rows: vec![
                vec![Value::Int(22), Value::Float(7.25)],
                vec![Value::Int(38), Value::Float(71.28)],
                vec![Value::Int(26), Value::Float(7.92)],
                vec![Value::Int(35), Value::Float(53.10)],
            ],
        })
    });

    registry.register("demo.row_count", |args: &CallArgs| {
        match args.positional.first() {
            Some(Value::Table { rows, .. }) => Ok(Value::Int(rows.len() as i64)),
            _ => Err(CallError::Failed {
                callable: "demo.row_count".into(),
                message: "expected a table".into(),
            }),
        }
    });

    registry.register("demo.column_mean", |args: &CallArgs| {
        let (Some(Value::Table { columns, rows }), Some(Value::Text(wanted))) =
            (args.positional.first(), args.positional.get(1))
        else {
            return Err(CallError::Failed {
                callable: "demo.column_mean".into(),
                message: "expected a table and a column name".into(),
            });
        };
        let index = columns.iter().position(|c| c == wanted).ok_or_else(|| {
            CallError::Failed {
                callable: "demo.column_mean".into(),
                message: format!("no column named '{wanted}'"),
            }
        })?;

        let mut sum = 0.0;
        for row in rows {
            sum += match &row[index] {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                other => {
                    return Err(CallError::Failed {
                        callable: "demo.column_mean".into(),
                        message: format!("non-numeric cell of kind {}", other.kind()),
                    })
                }
            };
        }
        Ok(Value::Float(sum / rows.len().max(1) as f64))
    });

    registry
}

fn demo_graph() -> Result<CallGraph, GraphError> {
    let nodes = vec![
        CallNode {
            id: NodeId(0),
            callable: "demo.load_table".into(),
            positional: vec![],
            keyword: vec![],
            placeholder: Some("table".into()),
            impure: false,
        },
        CallNode {
            id: NodeId(1),
            callable: "demo.row_count".into(),
            positional: vec![ArgExpr::Node(NodeId(0))],
            keyword: vec![],
            placeholder: Some("rows".into()),
            impure: false,
        },
        CallNode {
            id: NodeId(2),
            callable: "demo.column_mean".into(),
            positional: vec![
                ArgExpr::Node(NodeId(0)),
                ArgExpr::Literal(Value::Text("age".into())),
            ],
            keyword: vec![],
            placeholder: Some("mean_age".into()),
            impure: false,
        },
    ];
    CallGraph::new(nodes)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_graph_is_valid() {
        let graph = demo_graph().unwrap();
        assert_eq!(graph.nodes().len(), 3);
        assert!(graph.placeholder_node("mean_age").is_some());
    }

    #[test]
    fn demo_callables_compute() {
        let registry = demo_registry();
        let table = registry
            .resolve("demo.load_table")
            .unwrap()(&CallArgs {
            positional: vec![],
            keyword: vec![],
        })
        .unwrap();

        let mean = registry.resolve("demo.column_mean").unwrap()(&CallArgs {
            positional: vec![table, Value::Text("age".into())],
            keyword: vec![],
        })
        .unwrap();
        match mean {
            Value::Float(f) => assert!((f - 30.25).abs() < 1e-9),
            other => panic!("expected float, got {other:?}"),
        }
    }
}
