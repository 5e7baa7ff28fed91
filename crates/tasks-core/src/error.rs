use thiserror::Error;

/// Opaque error raised by a store implementation.
pub type StoreSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Inconsistent recurrence rule: {0}")]
    InconsistentRule(String),

    #[error("Malformed exception: {0}")]
    MalformedException(String),

    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    #[error("Store failure")]
    StoreFailure(#[source] StoreSource),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Wraps any store-side error so it passes through the engine untouched.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CoreError::StoreFailure(Box::new(err))
    }

    /// True for the errors that reject a mutation because of its own content,
    /// as opposed to a failing store.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CoreError::StoreFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_store_failure_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = CoreError::store(io);
        assert!(!err.is_rejection());
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk gone".to_string()));
    }

    #[test]
    fn test_rejections() {
        assert!(CoreError::MalformedException("both set".into()).is_rejection());
        assert_eq!(
            CoreError::InvalidTimeRange("due before start".into()).to_string(),
            "Invalid time range: due before start"
        );
    }
}
