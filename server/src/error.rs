//! Error types for the server.

/// Errors raised while running the server.
///
/// Only `Bind` is fatal to the process; the remaining variants end a single
/// connection and are logged by the task that owns it.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] shared::ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server loop is gone")]
    LoopClosed,
}
