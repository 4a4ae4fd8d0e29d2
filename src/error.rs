use thiserror::Error;

/// Library error type for grid preparation and rendering.
#[derive(Debug, Error)]
pub enum Error {
    /// A source image could not be read, decoded or sliced.
    #[error("failed to decode image {source_name}: {reason}")]
    Decode { source_name: String, reason: String },

    /// A preparation job was superseded or its surface went away.
    #[error("preparation cancelled")]
    Cancelled,

    /// The host could not hand out a drawable buffer for this frame.
    #[error("drawable surface unavailable")]
    SurfaceUnavailable,

    /// The configured grid cannot be laid out at the resolved width.
    #[error("invalid grid geometry: {0}")]
    Geometry(String),

    /// The blocking preparation task died before returning.
    #[error("preparation worker failed: {0}")]
    Worker(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn decode(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}
