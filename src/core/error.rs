use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },
}

impl ProjectionError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ProjectionError::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}
