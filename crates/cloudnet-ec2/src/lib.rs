//! Port to the cloud compute API.
//!
//! This crate defines what the network reconcilers need from the provider,
//! without tying them to an SDK:
//!
//! - [`api`]: the [`Ec2Api`] capability trait
//! - [`model`]: typed request and response shapes
//! - [`filter`]: describe-call filter builders
//! - [`error`]: [`CloudError`] and the provider error code classifier
//!
//! # Example
//!
//! ```ignore
//! use cloudnet_ec2::{filter, CloudResult, Ec2Api};
//!
//! async fn count_subnets(ec2: &dyn Ec2Api, vpc_id: &str) -> CloudResult<usize> {
//!     let subnets = ec2.describe_subnets(&[], &[filter::vpc(vpc_id)]).await?;
//!     Ok(subnets.len())
//! }
//! ```

pub mod api;
pub mod error;
pub mod filter;
pub mod model;

pub use api::Ec2Api;
pub use error::{codes, CloudError, CloudResult};
pub use filter::Filter;
pub use model::{
    Address, AvailabilityZone, CarrierGateway, CidrBlockAssociation, CidrBlockState,
    CreateSubnetInput, CreateVpcInput, EgressOnlyInternetGateway, InternetGateway, NatGateway,
    NatGatewayState, ResourceState, Route, RouteDestination, RouteTable, RouteTableAssociation,
    RouteTarget, Subnet, SubnetAttribute, Vpc, VpcAttribute,
};
