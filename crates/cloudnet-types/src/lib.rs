//! Common cloud network types for topology reconciliation.
//!
//! This crate provides the value types shared by the reconciler, the cloud
//! API port and the test infrastructure:
//!
//! - [`Ipv4Cidr`]: IPv4 CIDR blocks and equal-size splitting
//! - [`Tags`]: ordered tag maps with build, diff and validation rules
//! - [`BuildParams`]: inputs for the canonical tag set of a resource
//! - [`VpcSpec`], [`SubnetSpec`], [`Subnets`], [`NetworkSpec`]: desired and
//!   observed network topology

mod cidr;
mod network;
mod tags;

pub use cidr::{split_into_subnets, Ipv4Cidr};
pub use network::{
    AzSelectionScheme, Ipv6Spec, NetworkSpec, SubnetSpec, Subnets, VpcSpec, ZoneType,
    DEFAULT_AZ_USAGE_LIMIT,
};
pub use tags::{
    cluster_tag_key, BuildParams, ResourceLifecycle, TagError, Tags, AWS_RESERVED_PREFIX,
    COMMON_ROLE, EXTERNAL_LOAD_BALANCER_TAG, INTERNAL_LOAD_BALANCER_TAG,
    KUBERNETES_CLUSTER_PREFIX, NAME_TAG, PRIVATE_ROLE, PROVIDER_CLUSTER_PREFIX,
    PROVIDER_ROLE_TAG, PUBLIC_ROLE,
};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IPv4 CIDR block: {0}")]
    InvalidCidr(String),

    #[error("could not split cidr {cidr:?} into {count} subnets")]
    SplitFailed { cidr: String, count: usize },

    #[error("invalid zone type: {0}")]
    InvalidZoneType(String),
}
