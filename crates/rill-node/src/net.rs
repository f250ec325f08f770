//! TCP transport.
//!
//! Wire format: `[u32 big-endian length][bincode payload]` frames carrying
//! the messages defined in `rill-types::protocol`. One connection per
//! client; each connection becomes one engine session, and the connection
//! closing (cleanly or not) disconnects that session and cancels its runs.

use std::io;
use std::sync::Arc;

use rill_engine::SessionManager;
use rill_types::{decode_to_server, encode_from_server, ServerConfig, ToServer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

// ── Framing ──────────────────────────────────────────────────────────────────

/// Read a `[u32 BE length][payload]` frame.
pub async fn read_frame<S>(io: &mut S, max_bytes: usize) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {max_bytes})"),
        ));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a `[u32 BE length][payload]` frame.
pub async fn write_frame<S>(io: &mut S, data: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("payload exceeds u32::MAX: {} bytes", data.len()),
        )
    })?;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await?;
    Ok(())
}

// ── Server loop ──────────────────────────────────────────────────────────────

/// Accept connections until the manager signals shutdown.
pub async fn serve(config: ServerConfig, manager: Arc<SessionManager>) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "listening");

    let mut shutdown = manager.shutdown_signal();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("accept loop stopped");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!(%addr, "client connected");
                let manager = Arc::clone(&manager);
                let max_frame_bytes = config.max_frame_bytes;
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, manager, max_frame_bytes).await {
                        warn!(%addr, %err, "connection closed with error");
                    }
                    info!(%addr, "client disconnected");
                });
            }
        }
    }
}

/// Serve one client connection as one engine session.
pub async fn handle_connection<S>(
    stream: S,
    manager: Arc<SessionManager>,
    max_frame_bytes: usize,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outgoing, mut incoming) = mpsc::channel(64);
    let session_id = manager.connect(outgoing);

    // Drains the session's message queue onto the socket. Exits when every
    // sender is gone, which happens after disconnect cancels the runs.
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = incoming.recv().await {
            let bytes = match encode_from_server(&msg) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%err, "dropping unencodable server message");
                    continue;
                }
            };
            if write_frame(&mut writer, &bytes).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown = manager.shutdown_signal();
    let result = loop {
        let read = tokio::select! {
            // Global shutdown closes every connection, not only new accepts.
            _ = shutdown.changed() => break Ok(()),
            read = read_frame(&mut reader, max_frame_bytes) => read,
        };
        let frame = match read {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
            Err(err) => break Err(err),
        };
        let msg = match decode_to_server(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(session_id = %session_id, %err, "undecodable frame, closing connection");
                break Ok(());
            }
        };

        let was_shutdown = matches!(msg, ToServer::Shutdown);
        if let Err(err) = manager.handle_message(session_id, msg).await {
            warn!(session_id = %session_id, %err, "message rejected");
        }
        if was_shutdown {
            break Ok(());
        }
    };

    manager.disconnect(session_id);
    let _ = writer_task.await;
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
