//! Subnet reconciliation.
//!
//! Declared subnets are matched against the subnets the provider reports for
//! the VPC, by id or by CIDR block and zone. A managed VPC without declared
//! subnets gets one public and one private subnet per availability zone.
//!
//! Matching and the public/private check run before anything is created, so
//! a layout without a public or without a private subnet fails without side
//! effects.

use crate::error::{CloudResultExt, NetworkError, NetworkResult};
use crate::route_tables::MAIN_ROUTE_TABLE_KEY;
use crate::service::NetworkService;
use crate::tags::ensure_tags;
use crate::vpc::TEMPORARY_RESOURCE_ID;
use cloudnet_common::{retry_with_backoff, NetworkScope};
use cloudnet_ec2::{
    codes, filter, CreateSubnetInput, Ec2Api, NatGateway, RouteTable, Subnet, SubnetAttribute,
};
use cloudnet_types::{
    split_into_subnets, AzSelectionScheme, BuildParams, ResourceLifecycle, SubnetSpec, Subnets,
    Tags, EXTERNAL_LOAD_BALANCER_TAG, INTERNAL_LOAD_BALANCER_TAG, KUBERNETES_CLUSTER_PREFIX,
    PRIVATE_ROLE, PUBLIC_ROLE,
};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Picks the zones used for default subnets.
///
/// Zones are only reordered and truncated when there are more than `limit`.
pub fn select_zones(mut zones: Vec<String>, limit: usize, scheme: AzSelectionScheme) -> Vec<String> {
    if zones.len() > limit {
        match scheme {
            AzSelectionScheme::Ordered => zones.sort(),
            AzSelectionScheme::Random => zones.shuffle(&mut rand::thread_rng()),
        }
        zones.truncate(limit);
    }
    zones
}

/// Lays out one public and one private subnet per zone inside `vpc_cidr`.
///
/// The VPC block is split into `zones + 1` blocks. The first block is split
/// again into one public block per zone; the following blocks are the
/// private ones.
pub fn default_subnet_layout(vpc_cidr: &str, zones: &[String]) -> NetworkResult<Subnets> {
    if zones.is_empty() {
        return Err(NetworkError::invalid_spec(
            "no availability zones available for default subnets",
        ));
    }

    let blocks = split_into_subnets(vpc_cidr, zones.len() + 1).map_err(|e| {
        NetworkError::cidr(
            format!("failed splitting VPC CIDR {} into subnets", vpc_cidr),
            e,
        )
    })?;
    let public_parent = blocks
        .first()
        .map(ToString::to_string)
        .unwrap_or_default();
    let public_blocks = split_into_subnets(&public_parent, zones.len()).map_err(|e| {
        NetworkError::cidr(
            format!("failed splitting CIDR {} into public subnets", public_parent),
            e,
        )
    })?;

    let mut subnets = Subnets::new();
    for ((zone, public), private) in zones.iter().zip(&public_blocks).zip(blocks.iter().skip(1)) {
        subnets.push(SubnetSpec::new(public.to_string(), zone.as_str(), true));
        subnets.push(SubnetSpec::new(private.to_string(), zone.as_str(), false));
    }
    Ok(subnets)
}

/// Converts a described subnet, deriving the fields the provider does not
/// report directly.
///
/// A subnet is public if it carries the public role tag or its route table
/// routes to an internet gateway. Subnets without an explicit association
/// use the main route table.
pub(crate) fn subnet_to_spec(
    subnet: &Subnet,
    route_tables: &HashMap<String, RouteTable>,
    nat_gateways: &HashMap<String, NatGateway>,
) -> SubnetSpec {
    let mut spec = SubnetSpec {
        id: subnet.subnet_id.clone(),
        cidr_block: subnet.cidr_block.clone(),
        ipv6_cidr_block: subnet.ipv6_cidr_block.clone(),
        availability_zone: subnet.availability_zone.clone(),
        is_public: subnet.tags.role() == Some(PUBLIC_ROLE),
        tags: subnet.tags.clone(),
        ..Default::default()
    };

    let route_table = route_tables
        .get(&subnet.subnet_id)
        .or_else(|| route_tables.get(MAIN_ROUTE_TABLE_KEY));
    if let Some(rt) = route_table {
        spec.route_table_id = Some(rt.route_table_id.clone());
        if rt.routes.iter().any(|r| r.is_internet_gateway()) {
            spec.is_public = true;
        }
    }

    if let Some(ngw) = nat_gateways.get(&subnet.subnet_id) {
        spec.nat_gateway_id = Some(ngw.nat_gateway_id.clone());
    }
    spec
}

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Matches, validates and creates the subnets of the VPC and writes the
    /// result back to the scope.
    ///
    /// The scope is updated even when a later subnet fails, so subnets that
    /// were already created keep their ids.
    #[instrument(skip(self))]
    pub async fn reconcile_subnets(&mut self) -> NetworkResult<()> {
        debug!("Reconciling subnets");

        let existing = self.describe_vpc_subnets().await?;
        let unmanaged = self.is_unmanaged();

        let mut subnets = self.scope.subnets().clone();
        if subnets.is_empty() {
            if unmanaged {
                let message =
                    "no subnets specified, you must specify the subnets when using an unmanaged vpc";
                warn!(reason = "FailedNoSubnets", "{}", message);
                return Err(NetworkError::invalid_spec(message));
            }
            subnets = self.default_subnets().await.map_err(|e| {
                warn!(reason = "FailedDefaultSubnets", error = %e, "Failed getting default subnets");
                e
            })?;
        }

        let result = self.converge_subnets(&existing, &mut subnets, unmanaged).await;
        self.scope.set_subnets(subnets);
        result
    }

    /// Deletes every subnet of a managed VPC. The first failure aborts.
    #[instrument(skip(self))]
    pub async fn delete_subnets(&self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping subnets deletion in unmanaged mode");
            return Ok(());
        }

        let existing = self.describe_vpc_subnets().await?;
        for subnet in &existing {
            self.delete_subnet(&subnet.id).await?;
        }
        Ok(())
    }

    /// Describes the pending and available subnets of the VPC.
    pub(crate) async fn describe_vpc_subnets(&self) -> NetworkResult<Subnets> {
        let vpc_id = self.scope.vpc().id.as_str();
        let mut filters = vec![filter::pending_or_available()];
        if vpc_id.is_empty() {
            filters.push(filter::cluster(self.scope.name()));
        } else {
            filters.push(filter::vpc(vpc_id));
        }

        let described = self.ec2.describe_subnets(&[], &filters).await.map_err(|e| {
            warn!(reason = "FailedDescribeSubnet", vpc_id, error = %e, "Failed to describe subnets");
            NetworkError::cloud(format!("failed to describe subnets in vpc {:?}", vpc_id), e)
        })?;

        let route_tables = self.describe_vpc_route_tables_by_subnet().await?;
        let nat_gateways = self.describe_nat_gateways_by_subnet().await?;

        Ok(described
            .iter()
            .map(|s| subnet_to_spec(s, &route_tables, &nat_gateways))
            .collect())
    }

    async fn default_subnets(&self) -> NetworkResult<Subnets> {
        let zones = self
            .ec2
            .describe_availability_zones(&filter::available_zones())
            .await
            .context(|| "failed to describe availability zones".to_string())?;
        let names: Vec<String> = zones.into_iter().map(|z| z.zone_name).collect();

        let vpc = self.scope.vpc();
        let limit = vpc
            .availability_zone_usage_limit
            .unwrap_or(self.config.default_az_usage_limit);
        if names.len() > limit {
            debug!(
                region = self.scope.region(),
                limit, "Region has more zones than the usage limit, picking zones to use"
            );
        }
        let selected = select_zones(names, limit, vpc.az_selection());
        debug!(zones = ?selected, "Zones selected for default subnets");

        default_subnet_layout(&vpc.cidr_block, &selected)
    }

    async fn converge_subnets(
        &self,
        existing: &Subnets,
        subnets: &mut Subnets,
        unmanaged: bool,
    ) -> NetworkResult<()> {
        let backoff = &self.config.backoff;
        let ec2 = self.ec2;

        for subnet in subnets.iter_mut() {
            let Some(found) = existing.find_equal(subnet) else {
                if unmanaged {
                    warn!(
                        reason = "FailedMatchSubnet",
                        subnet_id = %subnet.id,
                        cidr_block = %subnet.cidr_block,
                        "Using unmanaged VPC and failed to find existing subnet"
                    );
                    return Err(NetworkError::invalid_spec(format!(
                        "using unmanaged vpc and subnet {} (cidr {}) specified but it doesn't exist in vpc {}",
                        subnet.id,
                        subnet.cidr_block,
                        self.scope.vpc().id
                    )));
                }
                continue;
            };

            let mut observed = found.clone();
            observed.is_public |= subnet.is_public;

            if !unmanaged {
                let params = self.subnet_tag_params(
                    &found.id,
                    observed.is_public,
                    &found.availability_zone,
                    &subnet.tags,
                );
                let (desired, current) = (&params, &found.tags);
                retry_with_backoff(backoff, &[codes::SUBNET_NOT_FOUND], move || {
                    ensure_tags(ec2, desired, current)
                })
                .await
                .map_err(|e| {
                    warn!(reason = "FailedTagSubnet", subnet_id = %found.id, error = %e, "Failed tagging managed subnet");
                    NetworkError::cloud(format!("failed to ensure tags on subnet {:?}", found.id), e)
                })?;
                observed.tags.merge(&params.build());
            }

            if observed.zone_type.is_none() {
                observed.zone_type = subnet.zone_type;
            }
            *subnet = observed;
        }

        if !subnets.iter().any(|s| !s.is_public) {
            warn!(reason = "FailedNoPrivateSubnet", "Expected at least 1 private subnet but got 0");
            return Err(NetworkError::invalid_spec(
                "expected at least 1 private subnet but got 0",
            ));
        }
        if !subnets.iter().any(|s| s.is_public) {
            warn!(reason = "FailedNoPublicSubnet", "Expected at least 1 public subnet but got 0");
            return Err(NetworkError::invalid_spec(
                "expected at least 1 public subnet but got 0",
            ));
        }

        if unmanaged {
            return Ok(());
        }

        for subnet in subnets.iter_mut().filter(|s| s.id.is_empty()) {
            *subnet = self.create_subnet(subnet).await?;
        }

        debug!(count = subnets.len(), "Subnets available");
        Ok(())
    }

    async fn create_subnet(&self, spec: &SubnetSpec) -> NetworkResult<SubnetSpec> {
        let params = self.subnet_tag_params(
            TEMPORARY_RESOURCE_ID,
            spec.is_public,
            &spec.availability_zone,
            &spec.tags,
        );
        let input = CreateSubnetInput {
            vpc_id: self.scope.vpc().id.clone(),
            cidr_block: spec.cidr_block.clone(),
            ipv6_cidr_block: spec.ipv6_cidr_block.clone(),
            availability_zone: spec.availability_zone.clone(),
            tags: params.build(),
        };

        let subnet = self.ec2.create_subnet(input).await.map_err(|e| {
            warn!(reason = "FailedCreateSubnet", error = %e, "Failed creating new managed subnet");
            NetworkError::cloud("failed to create subnet", e)
        })?;
        let subnet_id = subnet.subnet_id.as_str();
        info!(reason = "SuccessfulCreateSubnet", subnet_id, "Created new managed subnet");

        self.ec2
            .wait_until_subnet_available(subnet_id)
            .await
            .context(|| format!("failed to wait for subnet {:?}", subnet_id))?;

        if spec.is_public {
            self.enable_subnet_attribute(subnet_id, SubnetAttribute::MapPublicIpOnLaunch)
                .await?;
        }
        if spec.is_ipv6() {
            self.enable_subnet_attribute(subnet_id, SubnetAttribute::AssignIpv6AddressOnCreation)
                .await?;
        }

        debug!(
            subnet_id,
            vpc_id = %subnet.vpc_id,
            cidr_block = %subnet.cidr_block,
            availability_zone = %subnet.availability_zone,
            "Created new subnet in VPC"
        );

        Ok(SubnetSpec {
            id: subnet.subnet_id.clone(),
            cidr_block: subnet.cidr_block.clone(),
            ipv6_cidr_block: subnet.ipv6_cidr_block.clone(),
            availability_zone: subnet.availability_zone.clone(),
            is_public: spec.is_public,
            tags: subnet.tags.clone(),
            zone_type: spec.zone_type,
            ..Default::default()
        })
    }

    async fn enable_subnet_attribute(
        &self,
        subnet_id: &str,
        attribute: SubnetAttribute,
    ) -> NetworkResult<()> {
        let ec2 = self.ec2;
        retry_with_backoff(&self.config.backoff, &[codes::SUBNET_NOT_FOUND], move || {
            ec2.modify_subnet_attribute(subnet_id, attribute, true)
        })
        .await
        .map_err(|e| {
            warn!(reason = "FailedModifySubnetAttributes", subnet_id, error = %e, "Failed modifying managed subnet attributes");
            NetworkError::cloud(format!("failed to set subnet {:?} attributes", subnet_id), e)
        })?;
        info!(
            reason = "SuccessfulModifySubnetAttributes",
            subnet_id,
            attribute = attribute.as_str(),
            "Modified managed subnet attributes"
        );
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> NetworkResult<()> {
        match self.ec2.delete_subnet(subnet_id).await {
            Ok(()) => {
                info!(reason = "SuccessfulDeleteSubnet", subnet_id, "Deleted managed subnet");
                Ok(())
            }
            Err(e) => {
                warn!(reason = "FailedDeleteSubnet", subnet_id, error = %e, "Failed to delete managed subnet");
                Err(NetworkError::cloud(format!("failed to delete subnet {:?}", subnet_id), e))
            }
        }
    }

    /// Tag params of a subnet: role, load balancer discovery tag and the
    /// cloud provider's cluster tag, then the subnet's declared tags.
    fn subnet_tag_params(&self, id: &str, public: bool, zone: &str, declared: &Tags) -> BuildParams {
        let (role, lb_tag) = if public {
            (PUBLIC_ROLE, EXTERNAL_LOAD_BALANCER_TAG)
        } else {
            (PRIVATE_ROLE, INTERNAL_LOAD_BALANCER_TAG)
        };

        let name = self.scope.name();
        let mut additional = self.scope.additional_tags();
        additional.insert(lb_tag, "1");
        additional.insert(
            format!("{}{}", KUBERNETES_CLUSTER_PREFIX, name),
            ResourceLifecycle::Shared.as_str(),
        );
        additional.merge(declared);

        BuildParams::owned(name, id)
            .with_name(format!("{}-subnet-{}-{}", name, role, zone))
            .with_role(role)
            .with_additional(additional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_ec2::{
        NatGatewayState, ResourceState, Route, RouteDestination, RouteTableAssociation,
        RouteTarget,
    };
    use cloudnet_types::PROVIDER_ROLE_TAG;
    use pretty_assertions::assert_eq;

    fn zones(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn layout(subnets: &Subnets) -> Vec<(String, String, bool)> {
        subnets
            .iter()
            .map(|s| (s.cidr_block.clone(), s.availability_zone.clone(), s.is_public))
            .collect()
    }

    fn subnet(id: &str, tags: Tags) -> Subnet {
        Subnet {
            subnet_id: id.to_string(),
            vpc_id: "vpc-1".to_string(),
            cidr_block: "10.0.0.0/24".to_string(),
            ipv6_cidr_block: None,
            availability_zone: "us-east-1a".to_string(),
            map_public_ip_on_launch: false,
            state: ResourceState::Available,
            tags,
        }
    }

    fn route_table(id: &str, target: RouteTarget, main: bool) -> RouteTable {
        RouteTable {
            route_table_id: id.to_string(),
            vpc_id: "vpc-1".to_string(),
            routes: vec![Route::new(RouteDestination::Ipv4("0.0.0.0/0".into()), target)],
            associations: vec![RouteTableAssociation {
                association_id: format!("{}-assoc", id),
                subnet_id: None,
                main,
            }],
            tags: Tags::new(),
        }
    }

    #[test]
    fn test_default_layout_one_zone() {
        let subnets = default_subnet_layout("10.0.0.0/16", &zones(&["us-east-1a"])).unwrap();
        assert_eq!(
            layout(&subnets),
            vec![
                ("10.0.0.0/17".to_string(), "us-east-1a".to_string(), true),
                ("10.0.128.0/17".to_string(), "us-east-1a".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_default_layout_two_zones() {
        let subnets =
            default_subnet_layout("10.0.0.0/16", &zones(&["us-east-1a", "us-east-1b"])).unwrap();
        assert_eq!(
            layout(&subnets),
            vec![
                ("10.0.0.0/19".to_string(), "us-east-1a".to_string(), true),
                ("10.0.64.0/18".to_string(), "us-east-1a".to_string(), false),
                ("10.0.32.0/19".to_string(), "us-east-1b".to_string(), true),
                ("10.0.128.0/18".to_string(), "us-east-1b".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_default_layout_three_zones_one_pair_per_zone() {
        let subnets =
            default_subnet_layout("10.0.0.0/16", &zones(&["a", "b", "c"])).unwrap();
        assert_eq!(subnets.len(), 6);
        for zone in ["a", "b", "c"] {
            let in_zone: Vec<_> = subnets.iter().filter(|s| s.availability_zone == zone).collect();
            assert_eq!(in_zone.len(), 2);
            assert!(in_zone.iter().any(|s| s.is_public));
            assert!(in_zone.iter().any(|s| !s.is_public));
        }

        let blocks: Vec<cloudnet_types::Ipv4Cidr> =
            subnets.iter().map(|s| s.cidr_block.parse().unwrap()).collect();
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                assert!(!a.overlaps(b), "{} overlaps {}", a, b);
            }
        }
    }

    #[test]
    fn test_default_layout_errors() {
        assert!(default_subnet_layout("10.0.0.0/16", &[]).is_err());
        let err = default_subnet_layout("not-a-cidr", &zones(&["a"])).unwrap_err();
        assert!(err.to_string().starts_with("failed splitting VPC CIDR not-a-cidr"));
    }

    #[test]
    fn test_select_zones_ordered() {
        let picked = select_zones(zones(&["c", "a", "d", "b"]), 2, AzSelectionScheme::Ordered);
        assert_eq!(picked, zones(&["a", "b"]));
    }

    #[test]
    fn test_select_zones_within_limit_keeps_order() {
        let picked = select_zones(zones(&["b", "a"]), 3, AzSelectionScheme::Ordered);
        assert_eq!(picked, zones(&["b", "a"]));
    }

    #[test]
    fn test_select_zones_random_picks_subset() {
        let all = zones(&["a", "b", "c", "d", "e"]);
        let picked = select_zones(all.clone(), 3, AzSelectionScheme::Random);
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|z| all.contains(z)));
    }

    #[test]
    fn test_subnet_public_from_role_tag() {
        let tags = Tags::new().with(PROVIDER_ROLE_TAG, PUBLIC_ROLE);
        let spec = subnet_to_spec(&subnet("subnet-1", tags), &HashMap::new(), &HashMap::new());
        assert!(spec.is_public);
        assert_eq!(spec.route_table_id, None);
    }

    #[test]
    fn test_subnet_public_from_main_table_igw_route() {
        let mut tables = HashMap::new();
        tables.insert(
            MAIN_ROUTE_TABLE_KEY.to_string(),
            route_table("rtb-main", RouteTarget::Gateway("igw-1".into()), true),
        );
        let spec = subnet_to_spec(&subnet("subnet-1", Tags::new()), &tables, &HashMap::new());
        assert!(spec.is_public);
        assert_eq!(spec.route_table_id.as_deref(), Some("rtb-main"));
    }

    #[test]
    fn test_subnet_explicit_table_wins_over_main() {
        let mut tables = HashMap::new();
        tables.insert(
            MAIN_ROUTE_TABLE_KEY.to_string(),
            route_table("rtb-main", RouteTarget::Gateway("igw-1".into()), true),
        );
        tables.insert(
            "subnet-1".to_string(),
            route_table("rtb-1", RouteTarget::NatGateway("nat-1".into()), false),
        );

        let mut nats = HashMap::new();
        nats.insert(
            "subnet-1".to_string(),
            NatGateway {
                nat_gateway_id: "nat-9".to_string(),
                subnet_id: "subnet-1".to_string(),
                vpc_id: "vpc-1".to_string(),
                state: NatGatewayState::Available,
                allocation_id: None,
                public_ip: None,
                failure_message: None,
                tags: Tags::new(),
            },
        );

        let spec = subnet_to_spec(&subnet("subnet-1", Tags::new()), &tables, &nats);
        assert!(!spec.is_public);
        assert_eq!(spec.route_table_id.as_deref(), Some("rtb-1"));
        assert_eq!(spec.nat_gateway_id.as_deref(), Some("nat-9"));
    }
}
