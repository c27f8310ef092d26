use thiserror::Error;

pub type ForwarderResult<T> = Result<T, ForwarderError>;

#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Malformed ecommerce payload: {0}")]
    MalformedEcommercePayload(String),

    #[error("Dispatch failure: {0}")]
    DispatchFailure(String),

    #[error("Identity store error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ForwarderError {
    /// Short label used for metrics and structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingRequiredField(_) => "missing_required_field",
            Self::MalformedEcommercePayload(_) => "malformed_ecommerce_payload",
            Self::DispatchFailure(_) => "dispatch_failure",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error originates from the inbound event itself rather
    /// than from infrastructure.
    pub fn is_event_error(&self) -> bool {
        matches!(
            self,
            Self::MissingRequiredField(_) | Self::MalformedEcommercePayload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(
            ForwarderError::MissingRequiredField("name".into()).kind(),
            "missing_required_field"
        );
        assert_eq!(ForwarderError::Storage("down".into()).kind(), "storage");
    }

    #[test]
    fn test_event_errors() {
        assert!(ForwarderError::MalformedEcommercePayload("x".into()).is_event_error());
        assert!(!ForwarderError::DispatchFailure("503".into()).is_event_error());
        assert!(!ForwarderError::Storage("down".into()).is_event_error());
    }
}
