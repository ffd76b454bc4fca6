//! Error type for identifier parsing and layout checks.

/// Common error type for classcast identifiers and paths.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier could not be parsed.
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// A path escapes the directory it must stay inside.
    #[error("Path escapes media root: {0}")]
    PathEscape(String),
}

impl Error {
    /// Create a new InvalidId error.
    pub fn invalid_id<S: Into<String>>(msg: S) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_id("no separator");
        assert_eq!(err.to_string(), "Invalid id: no separator");
    }
}
