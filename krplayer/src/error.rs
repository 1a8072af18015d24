//! Error types for the playback core

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the playback core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request for the stream failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The stream endpoint answered with a non-success status
    #[error("Stream endpoint returned status {0}")]
    BadStatus(u16),

    /// No audio output device is available on this host
    #[error("No audio output device available")]
    NoOutputDevice,

    /// Building or starting the audio output stream failed
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// The decoder could not make sense of the stream
    #[error("Decode error: {0}")]
    Decode(String),

    /// The engine was asked to resume before a source was prepared
    #[error("Engine has no prepared source")]
    NotPrepared,

    /// A channel to a collaborator task is closed
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
