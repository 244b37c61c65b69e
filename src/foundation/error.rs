pub type KinoResult<T> = Result<T, KinoError>;

/// Error taxonomy for the detection/decode/playback/export pipeline.
///
/// Recognition and structural errors are deliberately message-free variants:
/// the resolver's fallthrough logic matches on them, and the display strings
/// double as the user-facing reason text.
#[derive(thiserror::Error, Debug)]
pub enum KinoError {
    /// Archive carried the zip signature but could not be extracted.
    #[error("failed to extract archive")]
    UnzipFailed,

    /// No supported format matched the input.
    #[error("unrecognized file")]
    UnrecognizedFile,

    /// Vector bundle directory without a `data.json` manifest.
    #[error("vector bundle error: no data.json manifest")]
    MissingManifest,

    /// Vector bundle directory without an `images/` asset directory.
    #[error("vector bundle error: no images directory")]
    MissingAssetDirectory,

    /// Frame-sequence container matched the magic but failed to decode.
    #[error("sequence decode failed: {0}")]
    DecodeSequenceFailed(String),

    /// Format matched but the decoder rejected the payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid caller-supplied parameters.
    #[error("validation error: {0}")]
    Validation(String),

    /// Terminal writer/export failure; partial output has been cleaned up.
    #[error("writer error: {0}")]
    Writer(String),

    /// Playback-side failure (engine handoff, state machine misuse).
    #[error("playback error: {0}")]
    Playback(String),

    /// Filesystem failure; never retried, never treated as fallthrough.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KinoError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn writer(msg: impl Into<String>) -> Self {
        Self::Writer(msg.into())
    }

    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback(msg.into())
    }
}
