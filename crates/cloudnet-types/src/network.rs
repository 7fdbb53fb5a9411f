//! Desired and observed network topology.

use crate::tags::Tags;
use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of availability zones used for default subnets when the VPC
/// does not set a limit.
pub const DEFAULT_AZ_USAGE_LIMIT: usize = 3;

/// How availability zones are picked when a region has more than the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AzSelectionScheme {
    /// Zones sorted by name; the first N are used.
    #[default]
    Ordered,
    /// Zones shuffled; N random zones are used.
    Random,
}

/// Kind of zone a subnet lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneType {
    #[default]
    AvailabilityZone,
    LocalZone,
    WavelengthZone,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::AvailabilityZone => "availability-zone",
            ZoneType::LocalZone => "local-zone",
            ZoneType::WavelengthZone => "wavelength-zone",
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "availability-zone" => Ok(ZoneType::AvailabilityZone),
            "local-zone" => Ok(ZoneType::LocalZone),
            "wavelength-zone" => Ok(ZoneType::WavelengthZone),
            _ => Err(ParseError::InvalidZoneType(s.to_string())),
        }
    }
}

/// IPv6 settings of a VPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ipv6Spec {
    /// IPv6 block of the VPC; provider-assigned when empty.
    pub cidr_block: Option<String>,
    /// BYO IPv6 pool to allocate the block from.
    pub pool_id: Option<String>,
    pub egress_only_internet_gateway_id: Option<String>,
}

/// A virtual private cloud.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VpcSpec {
    /// Provider id; empty until the VPC is created or discovered.
    pub id: String,
    pub cidr_block: String,
    pub ipv6: Option<Ipv6Spec>,
    pub internet_gateway_id: Option<String>,
    pub carrier_gateway_id: Option<String>,
    pub tags: Tags,
    pub availability_zone_usage_limit: Option<usize>,
    pub availability_zone_selection: Option<AzSelectionScheme>,
}

impl VpcSpec {
    /// Returns true if the VPC was supplied by the user rather than created
    /// for `cluster_name`. Unmanaged VPCs are never modified.
    pub fn is_unmanaged(&self, cluster_name: &str) -> bool {
        !self.id.is_empty() && !self.tags.has_owned(cluster_name)
    }

    pub fn is_ipv6_enabled(&self) -> bool {
        self.ipv6.is_some()
    }

    /// Zone limit for default subnets.
    pub fn az_usage_limit(&self) -> usize {
        self.availability_zone_usage_limit
            .unwrap_or(DEFAULT_AZ_USAGE_LIMIT)
    }

    pub fn az_selection(&self) -> AzSelectionScheme {
        self.availability_zone_selection.unwrap_or_default()
    }
}

/// A subnet inside the VPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Provider id; empty until created.
    pub id: String,
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub availability_zone: String,
    pub is_public: bool,
    pub route_table_id: Option<String>,
    pub nat_gateway_id: Option<String>,
    pub tags: Tags,
    pub zone_type: Option<ZoneType>,
}

impl SubnetSpec {
    /// A new, not yet created subnet.
    pub fn new(
        cidr_block: impl Into<String>,
        availability_zone: impl Into<String>,
        is_public: bool,
    ) -> Self {
        Self {
            cidr_block: cidr_block.into(),
            availability_zone: availability_zone.into(),
            is_public,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_ipv6(&self) -> bool {
        self.ipv6_cidr_block.is_some()
    }

    pub fn is_wavelength(&self) -> bool {
        self.zone_type == Some(ZoneType::WavelengthZone)
    }

    /// Returns true if `other` describes the same subnet: same id, or same
    /// CIDR block in the same availability zone.
    pub fn matches(&self, other: &SubnetSpec) -> bool {
        (!other.id.is_empty() && self.id == other.id)
            || (self.cidr_block == other.cidr_block
                && self.availability_zone == other.availability_zone)
    }
}

/// Ordered collection of subnets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subnets(Vec<SubnetSpec>);

impl Subnets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, subnet: SubnetSpec) {
        self.0.push(subnet);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubnetSpec> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SubnetSpec> {
        self.0.iter_mut()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&SubnetSpec> {
        self.0.iter().find(|s| s.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut SubnetSpec> {
        self.0.iter_mut().find(|s| s.id == id)
    }

    /// Finds a subnet equal to `spec`, see [`SubnetSpec::matches`].
    pub fn find_equal(&self, spec: &SubnetSpec) -> Option<&SubnetSpec> {
        self.0.iter().find(|s| s.matches(spec))
    }

    pub fn filter_public(&self) -> Subnets {
        self.0.iter().filter(|s| s.is_public).cloned().collect()
    }

    pub fn filter_private(&self) -> Subnets {
        self.0.iter().filter(|s| !s.is_public).cloned().collect()
    }

    /// Returns the distinct availability zones, in first-seen order.
    pub fn unique_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = Vec::new();
        for subnet in &self.0 {
            if !zones.contains(&subnet.availability_zone) {
                zones.push(subnet.availability_zone.clone());
            }
        }
        zones
    }

    pub fn has_public_subnet_wavelength(&self) -> bool {
        self.0.iter().any(|s| s.is_public && s.is_wavelength())
    }

    pub fn as_slice(&self) -> &[SubnetSpec] {
        &self.0
    }
}

impl From<Vec<SubnetSpec>> for Subnets {
    fn from(subnets: Vec<SubnetSpec>) -> Self {
        Subnets(subnets)
    }
}

impl FromIterator<SubnetSpec> for Subnets {
    fn from_iter<I: IntoIterator<Item = SubnetSpec>>(iter: I) -> Self {
        Subnets(iter.into_iter().collect())
    }
}

impl IntoIterator for Subnets {
    type Item = SubnetSpec;
    type IntoIter = std::vec::IntoIter<SubnetSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Subnets {
    type Item = &'a SubnetSpec;
    type IntoIter = std::slice::Iter<'a, SubnetSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The complete network of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkSpec {
    pub vpc: VpcSpec,
    pub subnets: Subnets,
    /// Extra block associated with the VPC for managed control planes.
    pub secondary_cidr_block: Option<String>,
    /// Public IPs of the NAT gateways, observed during reconcile.
    pub nat_gateway_ips: Vec<String>,
}
