use axum::http::StatusCode;

use crate::{
    core::domain::{ClassifiedOutcome, ErrorKind},
    http::models::ExecuteResponse,
};

impl From<ClassifiedOutcome> for ExecuteResponse {
    fn from(outcome: ClassifiedOutcome) -> Self {
        let (error_message, error_kind) = match outcome.error {
            Some(error) => (Some(error.message), Some(error.kind)),
            None => (None, None),
        };

        ExecuteResponse {
            output: outcome.output,
            error_message,
            error_kind,
            execution_time_ms: outcome.execution_time_ms,
            output_truncated: outcome.output_truncated,
        }
    }
}

/// Status code for an outcome. Clients should branch on `error_kind`; the
/// status only separates caller mistakes, snippet failures and server trouble.
pub fn status_code(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        None => StatusCode::OK,
        Some(ErrorKind::NoInput) => StatusCode::BAD_REQUEST,
        Some(
            ErrorKind::SyntaxError
            | ErrorKind::RuntimeError
            | ErrorKind::Timeout
            | ErrorKind::ResourceExceeded,
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::Overloaded) => StatusCode::SERVICE_UNAVAILABLE,
        Some(ErrorKind::SpawnFailure | ErrorKind::InternalError) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let response: ExecuteResponse =
            ClassifiedOutcome::success("Hello, World!\n".to_string(), 12).into();

        assert_eq!(
            response,
            ExecuteResponse {
                output: "Hello, World!\n".to_string(),
                error_message: None,
                error_kind: None,
                execution_time_ms: 12,
                output_truncated: false,
            }
        );
    }

    #[test]
    fn test_failure_response_keeps_partial_output() {
        let outcome = ClassifiedOutcome::failure(ErrorKind::Timeout, "too slow")
            .with_output("partial".to_string());
        let response: ExecuteResponse = outcome.into();

        assert_eq!(response.output, "partial");
        assert_eq!(response.error_message.as_deref(), Some("too slow"));
        assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
        assert!(!response.output_truncated);
    }

    #[test]
    fn test_truncation_flag_is_mapped() {
        let outcome = ClassifiedOutcome::success("xxxx".to_string(), 3).with_output_truncated(true);
        let response: ExecuteResponse = outcome.into();

        assert_eq!(response.output, "xxxx");
        assert!(response.output_truncated);
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (None, StatusCode::OK),
            (Some(ErrorKind::NoInput), StatusCode::BAD_REQUEST),
            (Some(ErrorKind::SyntaxError), StatusCode::UNPROCESSABLE_ENTITY),
            (Some(ErrorKind::RuntimeError), StatusCode::UNPROCESSABLE_ENTITY),
            (Some(ErrorKind::Timeout), StatusCode::UNPROCESSABLE_ENTITY),
            (Some(ErrorKind::ResourceExceeded), StatusCode::UNPROCESSABLE_ENTITY),
            (Some(ErrorKind::Overloaded), StatusCode::SERVICE_UNAVAILABLE),
            (Some(ErrorKind::SpawnFailure), StatusCode::INTERNAL_SERVER_ERROR),
            (Some(ErrorKind::InternalError), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (kind, expected) in cases {
            assert_eq!(status_code(kind), expected, "kind: {:?}", kind);
        }
    }
}
