use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("could not encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("gave up connecting after {attempts} attempts: {last}")]
    ConnectFailed {
        attempts: u32,
        last: Box<ClientError>,
    },
}
