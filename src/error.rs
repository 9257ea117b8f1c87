//! Error types for the messenger core.

/// Top-level error type for the messenger widget.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    /// The attachment source format cannot be rasterized.
    ///
    /// This is the one failure the widget surfaces to the host: the
    /// attachment UI is expected to catch it, show the message, and reset
    /// the file picker.
    #[error("unsupported image format: {0}")]
    UnsupportedImage(String),

    /// Attachment decode/resize/encode error.
    #[error("image error: {0}")]
    Image(String),

    /// Key-value persistence backend error.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Speech synthesis engine error.
    #[error("speech output error: {0}")]
    Speech(String),

    /// Speech recognition engine error.
    #[error("speech input error: {0}")]
    Recognition(String),

    /// Persisted record (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MessengerError>;
