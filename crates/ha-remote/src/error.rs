use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("authentication rejected: {0}")]
    AuthInvalid(String),

    #[error("unexpected message from Home Assistant: {0}")]
    Protocol(String),

    #[error("connection closed by Home Assistant")]
    Closed,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
