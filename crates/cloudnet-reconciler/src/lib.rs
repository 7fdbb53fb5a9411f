//! Cloud network topology reconciler.
//!
//! Converges a cluster's VPC, subnets, gateways, elastic IPs and route tables
//! to the [`NetworkSpec`](cloudnet_types::NetworkSpec) held by its scope, and
//! tears the topology down again in reverse dependency order.
//!
//! # Architecture
//!
//! [`NetworkService`] borrows the scope and the cloud API client for one
//! pass. Each resource kind has its own reconciler module:
//!
//! 1. [`vpc`]: find or create the VPC, DNS attributes, tags
//! 2. [`secondary_cidr`]: extra IPv4 block for managed control planes
//! 3. [`subnets`]: discovery, default layout, creation
//! 4. [`gateways`], [`carrier_gateways`], [`egress_only_gateways`]
//! 5. [`nat_gateways`] with [`eips`]
//! 6. [`route_tables`]
//!
//! [`network`] chains them and records a condition per stage. Every step is
//! idempotent: a second pass over a converged network makes no create or
//! modify calls.
//!
//! # Example
//!
//! ```ignore
//! use cloudnet_reconciler::{NetworkConfig, NetworkService};
//!
//! async fn reconcile(scope: &mut ClusterScope, ec2: &Ec2Client) -> NetworkResult<()> {
//!     NetworkService::new(scope, ec2)
//!         .with_config(NetworkConfig::default())
//!         .reconcile_network()
//!         .await
//! }
//! ```

pub mod carrier_gateways;
pub mod config;
pub mod egress_only_gateways;
pub mod eips;
pub mod error;
pub mod gateways;
pub mod nat_gateways;
pub mod network;
pub mod route_tables;
pub mod secondary_cidr;
mod service;
pub mod subnets;
pub mod tags;
pub mod vpc;

pub use config::{ConfigError, NetworkConfig, DEFAULT_VPC_CIDR};
pub use error::{CloudResultExt, NetworkError, NetworkResult};
pub use service::NetworkService;
