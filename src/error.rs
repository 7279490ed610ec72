use std::time::Duration;

/// Errors surfaced by the public client API.
///
/// Placement rejections are not errors: they arrive as a
/// [`PlacementVerdict`](crate::protocol::PlacementVerdict) carrying a
/// non-success [`ReturnCode`](crate::protocol::ReturnCode).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Coordinates ({x}, {y}) are out of canvas bounds [-{half}, {half}]")]
    OutOfRange { x: i32, y: i32, half: i32 },
    #[error("Canvas {0} not found")]
    UnknownCanvas(u8),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Chunk bitmap has {actual} bytes, expected {expected}")]
    InvalidChunk { expected: usize, actual: usize },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Connection not ready after {duration:?}")]
    ReadyTimeout { duration: Duration },
    #[error("No placement verdict received after {duration:?}")]
    VerdictTimeout { duration: Duration },
    #[error("Connection lost before the placement verdict arrived")]
    Disconnected,
    #[error("Connection closed")]
    ConnectionClosed,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
