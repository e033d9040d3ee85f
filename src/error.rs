//! Error types for the nobg crate.

/// Errors that can occur during segmentation, compositing and file handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-bounds parameters (empty image, degenerate rectangle).
    ///
    /// Not retryable: the caller has to fix its inputs.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The graph cut could not produce a finite partition.
    ///
    /// Recoverable: treat the whole initialization rectangle as foreground.
    #[error("segmentation did not converge in iteration {iteration}: {reason}")]
    ConvergenceFailure {
        /// Zero-based refinement round that failed.
        iteration: usize,
        /// What went wrong inside the solver.
        reason: String,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image decoding or encoding.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The shell association store could not be read or written.
    #[error("association store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether the caller may fall back to the unrefined rectangle mask.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConvergenceFailure { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let invalid = Error::InvalidInput("rectangle 0x4 has zero area".to_string());
        assert!(invalid.to_string().contains("0x4"));

        let failed = Error::ConvergenceFailure {
            iteration: 3,
            reason: "non-finite flow".to_string(),
        };
        let msg = failed.to_string();
        assert!(msg.contains("iteration 3"));
        assert!(msg.contains("non-finite flow"));
    }

    #[test]
    fn only_convergence_failure_is_recoverable() {
        let failed = Error::ConvergenceFailure {
            iteration: 0,
            reason: String::new(),
        };
        assert!(failed.is_recoverable());
        assert!(!Error::InvalidInput(String::new()).is_recoverable());
        assert!(!Error::Store(String::new()).is_recoverable());
    }
}
