//! Cloud API error type and provider error code classification.
//!
//! Every provider call returns [`CloudResult`]. Errors either carry a
//! provider code ([`CloudError::Sdk`]) or are raised locally when a describe
//! call returned an unusable result (not found, ambiguous, missing
//! dependency).

use cloudnet_common::{ErrorCode, WaitTimeout};
use thiserror::Error;

/// Result type alias for cloud API calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Provider error codes the reconcilers act on.
pub mod codes {
    pub const AUTH_FAILURE: &str = "AuthFailure";
    pub const DEPENDENCY_VIOLATION: &str = "DependencyViolation";
    pub const MISSING_PARAMETER: &str = "MissingParameter";
    pub const IN_USE_IP_ADDRESS: &str = "InvalidIPAddress.InUse";
    pub const INVALID_SUBNET: &str = "InvalidSubnet";
    pub const INVALID_PARAMETER_VALUE: &str = "InvalidParameterValue";

    pub const VPC_NOT_FOUND: &str = "InvalidVpcID.NotFound";
    pub const SUBNET_NOT_FOUND: &str = "InvalidSubnetID.NotFound";
    pub const INTERNET_GATEWAY_NOT_FOUND: &str = "InvalidInternetGatewayID.NotFound";
    pub const EGRESS_ONLY_GATEWAY_NOT_FOUND: &str = "InvalidEgressOnlyInternetGatewayID.NotFound";
    pub const CARRIER_GATEWAY_NOT_FOUND: &str = "InvalidCarrierGatewayID.NotFound";
    pub const NAT_GATEWAY_NOT_FOUND: &str = "InvalidNatGatewayID.NotFound";
    pub const GATEWAY_NOT_FOUND: &str = "InvalidGatewayID.NotFound";
    pub const ROUTE_TABLE_NOT_FOUND: &str = "InvalidRouteTableID.NotFound";
    pub const ALLOCATION_NOT_FOUND: &str = "InvalidAllocationID.NotFound";
    pub const ASSOCIATION_NOT_FOUND: &str = "InvalidAssociationID.NotFound";
    pub const RESOURCE_NOT_FOUND: &str = "InvalidResourceID.NotFound";
}

const NOT_FOUND_SUFFIX: &str = ".NotFound";

/// Error type for cloud API calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// A describe call found nothing.
    #[error("{message}")]
    NotFound { message: String },

    /// A describe call found more than one match where one was expected.
    #[error("{message}")]
    Conflict { message: String },

    /// A resource this one depends on does not exist yet.
    #[error("{message}")]
    FailedDependency { message: String },

    /// The provider rejected the call.
    #[error("{code}: {message}")]
    Sdk { code: String, message: String },

    /// A waiter or retry loop ran out of time.
    #[error("timed out waiting for {what}")]
    Timeout { what: String },
}

impl CloudError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn failed_dependency(message: impl Into<String>) -> Self {
        Self::FailedDependency {
            message: message.into(),
        }
    }

    pub fn sdk(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sdk {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    /// Returns true for local not-found errors and for any provider code
    /// ending in `.NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            CloudError::NotFound { .. } => true,
            CloudError::Sdk { code, .. } => code.ends_with(NOT_FOUND_SUFFIX),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudError::Conflict { .. })
    }

    pub fn is_failed_dependency(&self) -> bool {
        matches!(self, CloudError::FailedDependency { .. })
    }

    /// Returns true if the provider reported `code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }
}

impl ErrorCode for CloudError {
    fn code(&self) -> Option<&str> {
        match self {
            CloudError::Sdk { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<WaitTimeout> for CloudError {
    fn from(_: WaitTimeout) -> Self {
        CloudError::timeout("the condition")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_not_found_classification() {
        assert!(CloudError::not_found("no vpc").is_not_found());
        assert!(CloudError::sdk(codes::VPC_NOT_FOUND, "gone").is_not_found());
        assert!(CloudError::sdk(codes::ROUTE_TABLE_NOT_FOUND, "gone").is_not_found());
        assert!(!CloudError::sdk(codes::DEPENDENCY_VIOLATION, "in use").is_not_found());
        assert!(!CloudError::conflict("two vpcs").is_not_found());
    }

    #[test]
    fn test_code_only_for_sdk_errors() {
        assert_eq!(CloudError::sdk(codes::AUTH_FAILURE, "x").code(), Some("AuthFailure"));
        assert_eq!(CloudError::not_found("x").code(), None);
        assert_eq!(CloudError::timeout("nat").code(), None);
    }

    #[test]
    fn test_retryable() {
        let err = CloudError::sdk(codes::IN_USE_IP_ADDRESS, "in use");
        assert!(err.is_retryable(&[codes::AUTH_FAILURE, codes::IN_USE_IP_ADDRESS]));
        assert!(!err.is_retryable(&[codes::AUTH_FAILURE]));
        assert!(!CloudError::not_found("x").is_retryable(&[codes::VPC_NOT_FOUND]));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CloudError::sdk(codes::MISSING_PARAMETER, "vpc id required").to_string(),
            "MissingParameter: vpc id required"
        );
        assert_eq!(CloudError::timeout("nat gateway nat-1").to_string(), "timed out waiting for nat gateway nat-1");
    }
}
