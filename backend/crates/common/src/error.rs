use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynclineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SynclineResult<T> = Result<T, SynclineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_prefix() {
        let err = SynclineError::Validation("cursor must not be negative".to_string());
        assert_eq!(
            err.to_string(),
            "validation error: cursor must not be negative"
        );

        let err = SynclineError::Conflict("edit already acknowledged".to_string());
        assert_eq!(err.to_string(), "conflict: edit already acknowledged");
    }
}
