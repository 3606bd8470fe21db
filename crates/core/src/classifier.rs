//! Pure, table-driven mapping from a tool failure signal to an
//! [`ErrorClassification`]. Infrastructure failures are retried by the
//! provider/tool layer before this ever runs — by the time a signal reaches
//! the classifier it is either a retry-exhausted infra failure or a
//! business-level one the backtrack ladder can reason about.

use sa_domain::model::{BusinessKind, ErrorClassification, InfrastructureKind};

/// The raw signal a tool invocation failed with, as observed by the executor.
/// Constructed from whatever the tool handler or provider call raised —
/// never from user-facing text.
#[derive(Debug, Clone)]
pub enum FailureSignal {
    /// `retry_after` carries a provider-supplied `Retry-After` hint (seconds),
    /// when the response included one — most relevant for 429s, but some
    /// providers also stamp overload 5xx responses with it.
    HttpStatus { status: u16, retry_after: Option<u64> },
    NetworkError,
    ToolTimeout,
    JsonSchemaViolation,
    EmptyResult,
    ValidatorRejected,
    IntentUnclear,
    /// Anything else raised from inside a tool handler that doesn't match
    /// one of the named signals above.
    Other,
}

/// Stateless classifier: one pure function per signal → classification.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, signal: &FailureSignal) -> ErrorClassification {
        match signal {
            FailureSignal::HttpStatus { status: 429, retry_after } => ErrorClassification::Infrastructure {
                kind: InfrastructureKind::RateLimit,
                retry_after: *retry_after,
            },
            FailureSignal::HttpStatus { status, retry_after } if *status >= 500 => ErrorClassification::Infrastructure {
                kind: InfrastructureKind::Provider5xx,
                retry_after: *retry_after,
            },
            FailureSignal::NetworkError => ErrorClassification::Infrastructure {
                kind: InfrastructureKind::Network,
                retry_after: None,
            },
            FailureSignal::ToolTimeout => ErrorClassification::Infrastructure {
                kind: InfrastructureKind::Timeout,
                retry_after: None,
            },
            FailureSignal::JsonSchemaViolation => ErrorClassification::Business {
                kind: BusinessKind::BadParam,
            },
            FailureSignal::EmptyResult => ErrorClassification::Business {
                kind: BusinessKind::EmptyResult,
            },
            FailureSignal::ValidatorRejected => ErrorClassification::Business {
                kind: BusinessKind::ValidationFailed,
            },
            FailureSignal::IntentUnclear => ErrorClassification::Business {
                kind: BusinessKind::IntentUnclear,
            },
            FailureSignal::HttpStatus { .. } | FailureSignal::Other => ErrorClassification::Business {
                kind: BusinessKind::WrongTool,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_infrastructure() {
        let c = ErrorClassifier::new().classify(&FailureSignal::HttpStatus { status: 429, retry_after: None });
        assert!(!c.is_business());
        assert!(matches!(
            c,
            ErrorClassification::Infrastructure {
                kind: InfrastructureKind::RateLimit,
                ..
            }
        ));
    }

    #[test]
    fn rate_limit_surfaces_retry_after_when_the_provider_sent_one() {
        let c = ErrorClassifier::new().classify(&FailureSignal::HttpStatus { status: 429, retry_after: Some(30) });
        assert!(matches!(
            c,
            ErrorClassification::Infrastructure {
                kind: InfrastructureKind::RateLimit,
                retry_after: Some(30),
            }
        ));
    }

    #[test]
    fn server_error_is_provider_5xx() {
        let c = ErrorClassifier::new().classify(&FailureSignal::HttpStatus { status: 503, retry_after: None });
        assert!(matches!(
            c,
            ErrorClassification::Infrastructure {
                kind: InfrastructureKind::Provider5xx,
                ..
            }
        ));
    }

    #[test]
    fn schema_violation_is_bad_param() {
        let c = ErrorClassifier::new().classify(&FailureSignal::JsonSchemaViolation);
        assert!(c.is_business());
        assert!(matches!(
            c,
            ErrorClassification::Business {
                kind: BusinessKind::BadParam
            }
        ));
    }

    #[test]
    fn unrecognized_client_error_falls_back_to_wrong_tool() {
        let c = ErrorClassifier::new().classify(&FailureSignal::HttpStatus { status: 418, retry_after: None });
        assert!(matches!(
            c,
            ErrorClassification::Business {
                kind: BusinessKind::WrongTool
            }
        ));
    }

    #[test]
    fn other_falls_back_to_wrong_tool() {
        let c = ErrorClassifier::new().classify(&FailureSignal::Other);
        assert!(matches!(
            c,
            ErrorClassification::Business {
                kind: BusinessKind::WrongTool
            }
        ));
    }
}
