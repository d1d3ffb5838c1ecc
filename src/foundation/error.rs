/// Convenience result type used across trajview.
pub type TrajviewResult<T> = Result<T, TrajviewError>;

/// Error taxonomy shared by loading, playback, annotation, and rendering.
#[derive(thiserror::Error, Debug)]
pub enum TrajviewError {
    /// Malformed track, tag, annotation, or background input.
    #[error("data format error: {0}")]
    DataFormat(String),

    /// Lookup of a track or frame that holds no data.
    #[error("not found: {0}")]
    NotFound(String),

    /// Annotation rows could not be written to durable storage.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration or user-provided value.
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation on a store or controller that has already shut down.
    #[error("closed: {0}")]
    Closed(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrajviewError {
    /// Build a [`TrajviewError::DataFormat`] value.
    pub fn data_format(msg: impl Into<String>) -> Self {
        Self::DataFormat(msg.into())
    }

    /// Build a [`TrajviewError::NotFound`] value.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Build a [`TrajviewError::Persistence`] value.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Build a [`TrajviewError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`TrajviewError::Closed`] value.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }
}
