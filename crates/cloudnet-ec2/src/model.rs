//! Request and response shapes of the cloud compute API.

use cloudnet_types::{Tags, ZoneType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state shared by VPCs, subnets and carrier gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Pending,
    Available,
    Deleting,
    Deleted,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Pending => "pending",
            ResourceState::Available => "available",
            ResourceState::Deleting => "deleting",
            ResourceState::Deleted => "deleted",
        }
    }

    pub fn is_pending_or_available(&self) -> bool {
        matches!(self, ResourceState::Pending | ResourceState::Available)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatGatewayState {
    Pending,
    Available,
    Deleting,
    Deleted,
    Failed,
}

impl NatGatewayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NatGatewayState::Pending => "pending",
            NatGatewayState::Available => "available",
            NatGatewayState::Deleting => "deleting",
            NatGatewayState::Deleted => "deleted",
            NatGatewayState::Failed => "failed",
        }
    }
}

impl fmt::Display for NatGatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a VPC CIDR block association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CidrBlockState {
    Associating,
    Associated,
    Disassociating,
    Disassociated,
    Failed,
}

impl CidrBlockState {
    /// Associated or on its way there.
    pub fn is_active(&self) -> bool {
        matches!(self, CidrBlockState::Associating | CidrBlockState::Associated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VpcAttribute {
    EnableDnsHostnames,
    EnableDnsSupport,
}

impl VpcAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            VpcAttribute::EnableDnsHostnames => "enableDnsHostnames",
            VpcAttribute::EnableDnsSupport => "enableDnsSupport",
        }
    }
}

impl fmt::Display for VpcAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubnetAttribute {
    MapPublicIpOnLaunch,
    AssignIpv6AddressOnCreation,
}

impl SubnetAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetAttribute::MapPublicIpOnLaunch => "mapPublicIpOnLaunch",
            SubnetAttribute::AssignIpv6AddressOnCreation => "assignIpv6AddressOnCreation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidrBlockAssociation {
    pub association_id: String,
    pub cidr_block: String,
    pub state: CidrBlockState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub vpc_id: String,
    /// Primary IPv4 block.
    pub cidr_block: String,
    pub state: ResourceState,
    /// All IPv4 blocks, the primary one included.
    pub cidr_block_associations: Vec<CidrBlockAssociation>,
    pub ipv6_cidr_block: Option<String>,
    pub ipv6_pool: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVpcInput {
    pub cidr_block: String,
    /// Ask the provider for an IPv6 block.
    pub amazon_provided_ipv6_cidr_block: bool,
    pub ipv6_cidr_block: Option<String>,
    pub ipv6_pool: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub state: ResourceState,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubnetInput {
    pub vpc_id: String,
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub availability_zone: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub zone_name: String,
    pub zone_type: ZoneType,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetGateway {
    pub internet_gateway_id: String,
    /// Ids of the VPCs the gateway is attached to.
    pub attachments: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressOnlyInternetGateway {
    pub egress_only_internet_gateway_id: String,
    pub attachments: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierGateway {
    pub carrier_gateway_id: String,
    pub vpc_id: String,
    pub state: ResourceState,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGateway {
    pub nat_gateway_id: String,
    pub subnet_id: String,
    pub vpc_id: String,
    pub state: NatGatewayState,
    pub allocation_id: Option<String>,
    pub public_ip: Option<String>,
    pub failure_message: Option<String>,
    pub tags: Tags,
}

/// An elastic IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub allocation_id: String,
    pub public_ip: String,
    pub association_id: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteDestination {
    Ipv4(String),
    Ipv6(String),
    PrefixList(String),
}

impl fmt::Display for RouteDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDestination::Ipv4(cidr) | RouteDestination::Ipv6(cidr) => f.write_str(cidr),
            RouteDestination::PrefixList(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteTarget {
    /// Internet gateway, virtual private gateway or `local`.
    Gateway(String),
    NatGateway(String),
    EgressOnlyInternetGateway(String),
    CarrierGateway(String),
    Instance(String),
}

impl RouteTarget {
    pub fn id(&self) -> &str {
        match self {
            RouteTarget::Gateway(id)
            | RouteTarget::NatGateway(id)
            | RouteTarget::EgressOnlyInternetGateway(id)
            | RouteTarget::CarrierGateway(id)
            | RouteTarget::Instance(id) => id,
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub destination: RouteDestination,
    pub target: RouteTarget,
}

impl Route {
    pub fn new(destination: RouteDestination, target: RouteTarget) -> Self {
        Self {
            destination,
            target,
        }
    }

    /// Returns true if the route sends traffic to an internet gateway.
    pub fn is_internet_gateway(&self) -> bool {
        matches!(&self.target, RouteTarget::Gateway(id) if id.starts_with("igw"))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.destination, self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableAssociation {
    pub association_id: String,
    pub subnet_id: Option<String>,
    pub main: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub route_table_id: String,
    pub vpc_id: String,
    pub routes: Vec<Route>,
    pub associations: Vec<RouteTableAssociation>,
    pub tags: Tags,
}

impl RouteTable {
    pub fn is_main(&self) -> bool {
        self.associations.iter().any(|a| a.main)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_is_internet_gateway() {
        let igw = Route::new(
            RouteDestination::Ipv4("0.0.0.0/0".into()),
            RouteTarget::Gateway("igw-1".into()),
        );
        let local = Route::new(
            RouteDestination::Ipv4("10.0.0.0/16".into()),
            RouteTarget::Gateway("local".into()),
        );
        let nat = Route::new(
            RouteDestination::Ipv4("0.0.0.0/0".into()),
            RouteTarget::NatGateway("nat-1".into()),
        );
        assert!(igw.is_internet_gateway());
        assert!(!local.is_internet_gateway());
        assert!(!nat.is_internet_gateway());
        assert_eq!(nat.to_string(), "0.0.0.0/0 -> nat-1");
    }

    #[test]
    fn test_cidr_block_state_active() {
        assert!(CidrBlockState::Associating.is_active());
        assert!(CidrBlockState::Associated.is_active());
        assert!(!CidrBlockState::Disassociated.is_active());
    }
}
