//! Errors produced by the harness and helpers to classify errors returned by the cluster.
use std::time::Duration;

use kube::{core::GroupVersionKind, error::ErrorResponse};

/// Errors returned by a single call against the cluster.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The kind is not registered with the cluster.
    #[error("no matches for kind \"{}\" in version \"{}\"", .gvk.kind, .gvk.api_version())]
    NoMatch {
        /// The kind that could not be resolved.
        gvk: GroupVersionKind,
    },
    /// The API server answered with a status error.
    #[error("{} ({}): {}", .0.reason, .0.code, .0.message)]
    Api(ErrorResponse),
    /// Any other error from the kube client.
    #[error("Kube error: {source}")]
    Kube {
        /// The underlying client error.
        #[from]
        source: kube::Error,
    },
    /// An object could not be converted between its typed and dynamic shapes.
    #[error("Serialization error: {source}")]
    Serialization {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// Construct a status error the way the API server reports it.
    pub fn status(code: u16, reason: &str, message: impl Into<String>) -> Self {
        ClientError::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: message.into(),
            reason: reason.to_owned(),
            code,
        })
    }

    /// Map a kube error, lifting status errors into [`ClientError::Api`].
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ClientError::Api(response),
            other => ClientError::Kube { source: other },
        }
    }

    fn response(&self) -> Option<&ErrorResponse> {
        match self {
            ClientError::Api(response) => Some(response),
            _ => None,
        }
    }

    fn has_reason(&self, reason: &str, code: u16) -> bool {
        self.response()
            .map(|r| r.reason == reason || (r.reason.is_empty() && r.code == code))
            .unwrap_or(false)
    }

    /// No instance with the requested identity exists.
    pub fn is_not_found(&self) -> bool {
        self.has_reason("NotFound", 404)
    }

    /// The kind itself is not registered with the cluster.
    pub fn is_no_match(&self) -> bool {
        matches!(self, ClientError::NoMatch { .. })
    }

    /// The write lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        self.has_reason("Conflict", 409)
    }

    /// The write was denied, typically by an admission webhook.
    pub fn is_forbidden(&self) -> bool {
        self.has_reason("Forbidden", 403)
    }

    /// The request was malformed or rejected by an erroring webhook.
    pub fn is_bad_request(&self) -> bool {
        self.has_reason("BadRequest", 400)
    }

    /// The object failed schema validation.
    pub fn is_invalid(&self) -> bool {
        self.has_reason("Invalid", 422)
    }

    /// The server failed internally, which includes webhooks that errored.
    pub fn is_internal(&self) -> bool {
        self.has_reason("InternalError", 500)
    }

    /// The object already exists.
    pub fn is_already_exists(&self) -> bool {
        self.has_reason("AlreadyExists", 409)
    }

    /// The error is one an admission webhook produces when it rejects a write.
    ///
    /// Denials are reported as 403 while webhook failures surface as 400 or 500.
    pub fn is_webhook_rejection(&self) -> bool {
        self.is_forbidden() || self.is_bad_request() || self.is_internal()
    }
}

/// Errors produced by harness operations.
///
/// Every variant that refers to a resource carries its kind and namespaced name so
/// a failing test reports what it was waiting on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The condition never held before the deadline.
    #[error("{message}: timed out after {elapsed:?} waiting on {kind} '{id}': {last}")]
    Timeout {
        /// Kind of the resource.
        kind: String,
        /// Namespaced name of the resource.
        id: String,
        /// Time spent polling.
        elapsed: Duration,
        /// The last observed failure.
        last: String,
        /// Default or caller supplied description.
        message: String,
    },
    /// A condition expected to hold for a duration stopped holding.
    #[error("{message}: {kind} '{id}' stopped satisfying its condition after {elapsed:?}: {last}")]
    NotConsistent {
        /// Kind of the resource.
        kind: String,
        /// Namespaced name of the resource.
        id: String,
        /// Time elapsed before the failure.
        elapsed: Duration,
        /// The observed failure.
        last: String,
        /// Default or caller supplied description.
        message: String,
    },
    /// A client error that retrying cannot fix, such as an unregistered kind.
    #[error("{kind} '{id}': {source}")]
    Client {
        /// Kind of the resource.
        kind: String,
        /// Namespaced name of the resource.
        id: String,
        /// The terminal client error.
        #[source]
        source: ClientError,
    },
    /// The harness was called incorrectly. Never retried.
    #[error("invalid use of the harness: {0}")]
    Precondition(String),
    /// A mutation function failed.
    #[error("failed to mutate {kind} '{id}': {source}")]
    Mutation {
        /// Kind of the resource.
        kind: String,
        /// Namespaced name of the resource.
        id: String,
        /// The mutation error.
        #[source]
        source: anyhow::Error,
    },
    /// A dynamic object could not be projected into a typed one.
    #[error("failed to convert {kind} '{id}' into {target}: {source}")]
    Projection {
        /// Kind of the resource.
        kind: String,
        /// Namespaced name of the resource.
        id: String,
        /// The requested Rust type.
        target: &'static str,
        /// The serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A write expected to be rejected by admission control was not rejected as expected.
    #[error("{message}: {operation} of {kind} '{id}' was not rejected as expected: {observed}")]
    WebhookNotEnforced {
        /// Kind of the resource.
        kind: String,
        /// Namespaced name of the resource.
        id: String,
        /// The write that was attempted, e.g. `create`.
        operation: &'static str,
        /// What happened instead.
        observed: String,
        /// Default or caller supplied description.
        message: String,
    },
    /// A single-shot assertion did not hold.
    #[error("{0}")]
    Assertion(String),
}

impl Error {
    /// Report whether the error was caused by the deadline elapsing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Result type used by harness operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_errors_by_reason() {
        assert!(ClientError::status(404, "NotFound", "gone").is_not_found());
        assert!(ClientError::status(409, "Conflict", "stale").is_conflict());
        assert!(!ClientError::status(409, "AlreadyExists", "dup").is_conflict());
        assert!(ClientError::status(409, "AlreadyExists", "dup").is_already_exists());
        assert!(ClientError::status(422, "Invalid", "bad").is_invalid());
    }

    #[test]
    fn falls_back_to_code_without_reason() {
        assert!(ClientError::status(404, "", "gone").is_not_found());
        assert!(!ClientError::status(404, "Gone", "gone").is_not_found());
    }

    #[test]
    fn webhook_rejections_cover_denied_and_errored() {
        assert!(ClientError::status(403, "Forbidden", "denied").is_webhook_rejection());
        assert!(ClientError::status(400, "BadRequest", "bad").is_webhook_rejection());
        assert!(ClientError::status(500, "InternalError", "boom").is_webhook_rejection());
        assert!(!ClientError::status(422, "Invalid", "schema").is_webhook_rejection());
    }

    #[test]
    fn no_match_is_not_a_status_error() {
        let err = ClientError::NoMatch {
            gvk: GroupVersionKind::gvk("example.com", "v1", "Widget"),
        };
        assert!(err.is_no_match());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "no matches for kind \"Widget\" in version \"example.com/v1\""
        );
    }
}
