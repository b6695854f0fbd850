use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("record `{id}` is not a valid {entity}: {message}")]
    InvalidRecord {
        entity: &'static str,
        id: String,
        message: String,
    },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn invalid_record(
        entity: &'static str,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRecord {
            entity,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
