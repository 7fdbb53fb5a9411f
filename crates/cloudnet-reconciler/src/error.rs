//! Error types for network reconciliation.

use cloudnet_common::{ErrorCode, ScopeError, WaitTimeout};
use cloudnet_ec2::CloudError;
use cloudnet_types::{ParseError, TagError};
use itertools::Itertools;
use thiserror::Error;

/// Result type alias for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur while reconciling or deleting a network.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Provider or describe-level error without extra context.
    #[error(transparent)]
    Provider(#[from] CloudError),

    /// Provider error with the resource it happened on.
    #[error("{context}: {source}")]
    Cloud {
        context: String,
        #[source]
        source: CloudError,
    },

    /// The desired network cannot be realized.
    #[error("{message}")]
    InvalidSpec { message: String },

    /// CIDR parsing or splitting failed.
    #[error("{context}: {source}")]
    Cidr {
        context: String,
        #[source]
        source: ParseError,
    },

    /// User-supplied tags break provider tag rules.
    #[error("invalid additional tags: [{}]", .errors.iter().join(", "))]
    InvalidTags { errors: Vec<TagError> },

    /// A resource reached a state it does not recover from.
    #[error("{message}")]
    ResourceFailed { message: String },

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("timed out waiting for the condition")]
    Timeout,

    /// Several independent steps failed.
    #[error("[{}]", .0.iter().join(", "))]
    Aggregate(Vec<NetworkError>),

    /// A network stage failed.
    #[error("failed to {operation}: {source}")]
    Stage {
        operation: &'static str,
        #[source]
        source: Box<NetworkError>,
    },
}

impl NetworkError {
    /// Wraps a provider error with context.
    pub fn cloud(context: impl Into<String>, source: CloudError) -> Self {
        Self::Cloud {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }

    pub fn cidr(context: impl Into<String>, source: ParseError) -> Self {
        Self::Cidr {
            context: context.into(),
            source,
        }
    }

    pub fn resource_failed(message: impl Into<String>) -> Self {
        Self::ResourceFailed {
            message: message.into(),
        }
    }

    pub fn stage(operation: &'static str, source: NetworkError) -> Self {
        Self::Stage {
            operation,
            source: Box::new(source),
        }
    }

    /// Adds context to an error that came straight from the provider.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            NetworkError::Provider(source) => NetworkError::cloud(context, source),
            other => other,
        }
    }

    /// Collapses a list of errors: none is Ok, one is returned as is.
    pub fn aggregate(mut errors: Vec<NetworkError>) -> NetworkResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }

    /// Returns the provider error at the root of this error, if any.
    pub fn cloud_error(&self) -> Option<&CloudError> {
        match self {
            NetworkError::Provider(e) | NetworkError::Cloud { source: e, .. } => Some(e),
            NetworkError::Stage { source, .. } => source.cloud_error(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.cloud_error().is_some_and(CloudError::is_not_found)
    }

    pub fn is_conflict(&self) -> bool {
        self.cloud_error().is_some_and(CloudError::is_conflict)
    }

    pub fn is_failed_dependency(&self) -> bool {
        self.cloud_error().is_some_and(CloudError::is_failed_dependency)
    }
}

impl ErrorCode for NetworkError {
    fn code(&self) -> Option<&str> {
        self.cloud_error().and_then(ErrorCode::code)
    }
}

impl From<WaitTimeout> for NetworkError {
    fn from(_: WaitTimeout) -> Self {
        NetworkError::Timeout
    }
}

/// Adds resource context to provider results.
pub trait CloudResultExt<T> {
    fn context<F>(self, context: F) -> NetworkResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> CloudResultExt<T> for Result<T, CloudError> {
    fn context<F>(self, context: F) -> NetworkResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| NetworkError::cloud(context(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_ec2::codes;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_context_display() {
        let err: NetworkResult<()> = Err(CloudError::sdk(codes::DEPENDENCY_VIOLATION, "has dependencies"))
            .context(|| "failed to delete vpc \"vpc-1\"".to_string());
        assert_eq!(
            err.unwrap_err().to_string(),
            "failed to delete vpc \"vpc-1\": DependencyViolation: has dependencies"
        );
    }

    #[test]
    fn test_classification_through_stage() {
        let inner = NetworkError::cloud("describe", CloudError::sdk(codes::VPC_NOT_FOUND, "gone"));
        let err = NetworkError::stage("reconcile vpc", inner);
        assert!(err.is_not_found());
        assert_eq!(err.code(), Some(codes::VPC_NOT_FOUND));
        assert!(!NetworkError::invalid_spec("x").is_not_found());
    }

    #[test]
    fn test_aggregate() {
        assert!(NetworkError::aggregate(vec![]).is_ok());

        let one = NetworkError::aggregate(vec![NetworkError::invalid_spec("a")]).unwrap_err();
        assert_eq!(one.to_string(), "a");

        let two = NetworkError::aggregate(vec![
            NetworkError::invalid_spec("a"),
            NetworkError::invalid_spec("b"),
        ])
        .unwrap_err();
        assert_eq!(two.to_string(), "[a, b]");
        assert_eq!(two.code(), None);
    }

    #[test]
    fn test_failed_dependency() {
        let err = NetworkError::from(CloudError::failed_dependency("no nat gateways"));
        assert!(err.is_failed_dependency());
        assert_eq!(err.to_string(), "no nat gateways");
    }
}
