use thiserror::Error;

/// Failures surfaced by write operations and component setup.
///
/// Read-path lookups (unknown class, missing metadata) are not errors: those
/// return `None`/empty collections with a diagnostic log entry, so callers can
/// distinguish "no result" from an actual failure.
#[derive(Debug, Error)]
pub enum OrmError {
    #[error("no registered connection satisfies the requested mutability")]
    PoolExhausted,

    #[error("driver error: {0}")]
    Driver(String),

    #[error("query builder error: {0}")]
    QueryBuilder(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("write affected {actual} rows, expected {expected}")]
    WriteConflict { expected: u64, actual: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for OrmError {
    fn from(err: config::ConfigError) -> Self {
        OrmError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OrmError::WriteConflict {
            expected: 1,
            actual: 3,
        };
        assert_eq!(err.to_string(), "write affected 3 rows, expected 1");

        let err = OrmError::Driver("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
