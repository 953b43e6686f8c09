//! Error types shared by the session, the prompt composer and the generation client.

use thiserror::Error;

use crate::catalog::Axis;
use crate::session::MessageId;

/// Composition refused before any request is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    /// Every required axis that is unset, collected in one pass, in catalog order.
    #[error("Please select values for: {}", join_labels(.0))]
    MissingParameter(Vec<Axis>),
}

impl ComposeError {
    pub fn missing_labels(&self) -> Vec<&'static str> {
        match self {
            ComposeError::MissingParameter(axes) => axes.iter().map(|axis| axis.label()).collect(),
        }
    }
}

/// Violations of the session's submission contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A submission was requested while another is in flight. The view is expected to
    /// disable its submit control, so this indicates a caller bug.
    #[error("a submission is already in flight")]
    AlreadySubmitting,

    #[error("message {0} is not in this session")]
    UnknownMessage(MessageId),

    #[error("message {0} is not an assistant message")]
    NotAssistantMessage(MessageId),

    #[error("image generation already in flight for message {0}")]
    ImageAlreadyPending(MessageId),
}

/// Failure of a call to the generation backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Transport failure, non-success status or an unparseable response.
    #[error("generation request failed: {0}")]
    RequestFailed(String),

    /// Success status, but the expected field is absent.
    #[error("generation response missing `{0}`")]
    MissingPayload(String),
}

impl GenerationError {
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::RequestFailed(message.into())
    }

    pub fn missing_payload(field: impl Into<String>) -> Self {
        Self::MissingPayload(field.into())
    }

    /// Both variants read the same to the user.
    pub fn user_notice(&self) -> &'static str {
        "Failed to generate response. Please try again."
    }
}

fn join_labels(axes: &[Axis]) -> String {
    axes.iter()
        .map(|axis| axis.label())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_message_lists_every_field() {
        let err = ComposeError::MissingParameter(vec![Axis::Choice, Axis::TextStyle]);
        assert_eq!(err.to_string(), "Please select values for: Choice, Text Style");
        assert_eq!(err.missing_labels(), vec!["Choice", "Text Style"]);
    }

    #[test]
    fn generation_errors_share_one_notice() {
        let failed = GenerationError::request_failed("connection refused");
        let missing = GenerationError::missing_payload("response");
        assert_eq!(failed.user_notice(), missing.user_notice());
        assert_eq!(missing.to_string(), "generation response missing `response`");
    }
}
