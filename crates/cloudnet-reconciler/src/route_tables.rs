//! Route table reconciliation.
//!
//! Every subnet of a managed VPC gets its own route table with the default
//! routes its role needs:
//!
//! - public: `0.0.0.0/0` (and `::/0` for IPv6 subnets) via the internet
//!   gateway, or via the carrier gateway in a wavelength zone
//! - private: `0.0.0.0/0` via the NAT gateway of the zone, and `::/0` via
//!   the egress-only gateway for IPv6 subnets
//!
//! A subnet that already has an explicitly associated table keeps it; only
//! the default routes in it are brought in line. Other routes, such as
//! prefix-list routes added by users, are never touched.

use crate::error::{NetworkError, NetworkResult};
use crate::nat_gateways::nat_gateway_for_subnet;
use crate::service::NetworkService;
use crate::tags::{apply_tags, ensure_tags};
use cloudnet_common::{retry_with_backoff, NetworkScope};
use cloudnet_ec2::{
    codes, filter, CloudError, Ec2Api, Route, RouteDestination, RouteTable, RouteTarget,
};
use cloudnet_types::{BuildParams, SubnetSpec, Subnets, COMMON_ROLE};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Key under which the VPC's main route table is indexed.
pub const MAIN_ROUTE_TABLE_KEY: &str = "main";

pub const ANY_IPV4_CIDR_BLOCK: &str = "0.0.0.0/0";
pub const ANY_IPV6_CIDR_BLOCK: &str = "::/0";

/// A change needed to put one default route in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange<'a> {
    /// No route for the destination exists yet.
    Create(&'a Route),
    /// A route for the destination exists but points elsewhere.
    Replace(&'a Route),
}

/// Compares the routes of a table with the default routes it needs.
///
/// Destinations are unique within a table, so a route is stale when its
/// destination matches a desired one and its target does not.
pub fn plan_route_changes<'a>(current: &[Route], desired: &'a [Route]) -> Vec<RouteChange<'a>> {
    desired
        .iter()
        .filter_map(|want| {
            match current.iter().find(|r| r.destination == want.destination) {
                Some(have) if have.target == want.target => None,
                Some(_) => Some(RouteChange::Replace(want)),
                None => Some(RouteChange::Create(want)),
            }
        })
        .collect()
}

/// Indexes route tables by explicitly associated subnet. The main table is
/// also stored under [`MAIN_ROUTE_TABLE_KEY`].
pub(crate) fn index_by_subnet(tables: Vec<RouteTable>) -> HashMap<String, RouteTable> {
    let mut index = HashMap::new();
    for table in tables {
        for association in &table.associations {
            if association.main {
                index.insert(MAIN_ROUTE_TABLE_KEY.to_string(), table.clone());
            }
            if let Some(subnet_id) = &association.subnet_id {
                index.insert(subnet_id.clone(), table.clone());
            }
        }
    }
    index
}

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Ensures every subnet has an associated route table with its default
    /// routes, and records the table id on the subnet.
    #[instrument(skip(self))]
    pub async fn reconcile_route_tables(&mut self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping routing tables reconcile in unmanaged mode");
            return Ok(());
        }

        debug!("Reconciling routing tables");
        let by_subnet = self.describe_vpc_route_tables_by_subnet().await?;
        let subnets = self.scope.subnets().clone();

        for subnet in subnets.iter() {
            let routes = self.default_routes(subnet, &subnets)?;

            let route_table_id = match by_subnet.get(&subnet.id) {
                Some(rt) => {
                    debug!(
                        subnet_id = %subnet.id,
                        route_table_id = %rt.route_table_id,
                        "Subnet is already associated with route table"
                    );
                    self.converge_routes(rt, &routes).await?;
                    self.ensure_route_table_tags(rt, subnet).await?;
                    rt.route_table_id.clone()
                }
                None => {
                    let rt_id = self
                        .create_route_table_with_routes(&routes, subnet.is_public, &subnet.availability_zone)
                        .await?;
                    self.associate_route_table(&rt_id, &subnet.id).await?;
                    debug!(subnet_id = %subnet.id, route_table_id = %rt_id, "Subnet has been associated with route table");
                    rt_id
                }
            };

            if let Some(sn) = self.scope.network_mut().subnets.find_by_id_mut(&subnet.id) {
                sn.route_table_id = Some(route_table_id);
            }
        }
        Ok(())
    }

    /// Disassociates and deletes every route table of a managed VPC. The
    /// first failure aborts.
    #[instrument(skip(self))]
    pub async fn delete_route_tables(&self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping routing tables deletion in unmanaged mode");
            return Ok(());
        }

        for rt in self.describe_vpc_route_tables().await? {
            let route_table_id = rt.route_table_id.as_str();
            for association in &rt.associations {
                let Some(subnet_id) = association.subnet_id.as_deref() else {
                    continue;
                };
                self.ec2
                    .disassociate_route_table(&association.association_id)
                    .await
                    .map_err(|e| {
                        warn!(reason = "FailedDisassociateRouteTable", route_table_id, subnet_id, error = %e, "Failed to disassociate managed route table");
                        NetworkError::cloud(
                            format!("failed to disassociate route table {:?} from subnet {:?}", route_table_id, subnet_id),
                            e,
                        )
                    })?;
                info!(reason = "SuccessfulDisassociateRouteTable", route_table_id, subnet_id, "Disassociated managed route table from subnet");
            }

            self.ec2.delete_route_table(route_table_id).await.map_err(|e| {
                warn!(reason = "FailedDeleteRouteTable", route_table_id, error = %e, "Failed to delete managed route table");
                NetworkError::cloud(format!("failed to delete route table {:?}", route_table_id), e)
            })?;
            info!(reason = "SuccessfulDeleteRouteTable", route_table_id, "Deleted managed route table");
        }
        Ok(())
    }

    /// Route tables of the VPC, indexed by subnet. See [`index_by_subnet`].
    pub(crate) async fn describe_vpc_route_tables_by_subnet(
        &self,
    ) -> NetworkResult<HashMap<String, RouteTable>> {
        Ok(index_by_subnet(self.describe_vpc_route_tables().await?))
    }

    /// Describes the route tables of the VPC. For a managed VPC only the
    /// tables tagged for the cluster are returned.
    async fn describe_vpc_route_tables(&self) -> NetworkResult<Vec<RouteTable>> {
        let vpc_id = self.scope.vpc().id.as_str();
        let mut filters = vec![filter::vpc(vpc_id)];
        if !self.is_unmanaged() {
            filters.push(filter::cluster(self.scope.name()));
        }

        self.ec2.describe_route_tables(&filters).await.map_err(|e| {
            warn!(reason = "FailedDescribeVPCRouteTable", vpc_id, error = %e, "Failed to describe route tables");
            NetworkError::cloud(format!("failed to describe route tables in vpc {:?}", vpc_id), e)
        })
    }

    /// Default routes a subnet needs for its role.
    fn default_routes(&self, subnet: &SubnetSpec, subnets: &Subnets) -> NetworkResult<Vec<Route>> {
        let vpc = self.scope.vpc();
        let any_ipv4 = || RouteDestination::Ipv4(ANY_IPV4_CIDR_BLOCK.to_string());
        let any_ipv6 = || RouteDestination::Ipv6(ANY_IPV6_CIDR_BLOCK.to_string());
        let mut routes = Vec::new();

        if subnet.is_public && subnet.is_wavelength() {
            let carrier_gateway_id = vpc.carrier_gateway_id.clone().ok_or_else(|| {
                CloudError::failed_dependency(format!(
                    "failed to create carrier routing table: carrier gateway for {:?} is nil",
                    vpc.id
                ))
            })?;
            routes.push(Route::new(any_ipv4(), RouteTarget::CarrierGateway(carrier_gateway_id)));
        } else if subnet.is_public {
            let gateway_id = vpc.internet_gateway_id.clone().ok_or_else(|| {
                CloudError::failed_dependency(format!(
                    "failed to create routing tables: internet gateway for {:?} is nil",
                    vpc.id
                ))
            })?;
            routes.push(Route::new(any_ipv4(), RouteTarget::Gateway(gateway_id.clone())));
            if subnet.is_ipv6() {
                routes.push(Route::new(any_ipv6(), RouteTarget::Gateway(gateway_id)));
            }
        } else {
            let nat_gateway_id = nat_gateway_for_subnet(subnet, subnets)?;
            routes.push(Route::new(any_ipv4(), RouteTarget::NatGateway(nat_gateway_id)));
            if subnet.is_ipv6() {
                let egress_id = vpc
                    .ipv6
                    .as_ref()
                    .and_then(|ipv6| ipv6.egress_only_internet_gateway_id.clone())
                    .ok_or_else(|| {
                        CloudError::failed_dependency(format!(
                            "failed to create routing tables: egress only internet gateway for {:?} is nil",
                            vpc.id
                        ))
                    })?;
                routes.push(Route::new(any_ipv6(), RouteTarget::EgressOnlyInternetGateway(egress_id)));
            }
        }
        Ok(routes)
    }

    async fn converge_routes(&self, rt: &RouteTable, desired: &[Route]) -> NetworkResult<()> {
        let route_table_id = rt.route_table_id.as_str();
        for change in plan_route_changes(&rt.routes, desired) {
            match change {
                RouteChange::Create(route) => self.create_route(route_table_id, route).await?,
                RouteChange::Replace(route) => self.replace_route(route_table_id, route).await?,
            }
        }
        Ok(())
    }

    async fn replace_route(&self, route_table_id: &str, route: &Route) -> NetworkResult<()> {
        let ec2 = self.ec2;
        retry_with_backoff(&self.config.backoff, &[], move || {
            ec2.replace_route(route_table_id, route)
        })
        .await
        .map_err(|e| {
            warn!(reason = "FailedReplaceRoute", route_table_id, error = %e, "Failed to replace outdated route on managed route table");
            NetworkError::cloud(
                format!("failed to replace outdated route on route table {:?}", route_table_id),
                e,
            )
        })?;
        info!(reason = "SuccessfulReplaceRoute", route_table_id, route = %route, "Replaced outdated route");
        Ok(())
    }

    async fn create_route(&self, route_table_id: &str, route: &Route) -> NetworkResult<()> {
        let ec2 = self.ec2;
        let retryable = [
            codes::ROUTE_TABLE_NOT_FOUND,
            codes::NAT_GATEWAY_NOT_FOUND,
            codes::GATEWAY_NOT_FOUND,
        ];
        retry_with_backoff(&self.config.backoff, &retryable, move || {
            ec2.create_route(route_table_id, route)
        })
        .await
        .map_err(|e| {
            warn!(reason = "FailedCreateRoute", route_table_id, route = %route, error = %e, "Failed to create route");
            NetworkError::cloud(
                format!("failed to create route in route table {:?}: {}", route_table_id, route),
                e,
            )
        })?;
        info!(reason = "SuccessfulCreateRoute", route_table_id, route = %route, "Created route");
        Ok(())
    }

    /// Creates a tagged route table holding `routes` and returns its id.
    ///
    /// A table whose routes could not be created is left behind.
    async fn create_route_table_with_routes(
        &self,
        routes: &[Route],
        public: bool,
        zone: &str,
    ) -> NetworkResult<String> {
        let vpc_id = self.scope.vpc().id.as_str();
        let rt = self.ec2.create_route_table(vpc_id).await.map_err(|e| {
            warn!(reason = "FailedCreateRouteTable", vpc_id, error = %e, "Failed to create managed route table");
            NetworkError::cloud(format!("failed to create route table in vpc {:?}", vpc_id), e)
        })?;
        let route_table_id = rt.route_table_id.as_str();
        info!(reason = "SuccessfulCreateRouteTable", route_table_id, "Created managed route table");

        let params = self.route_table_tag_params(route_table_id, public, zone);
        let (ec2, desired) = (self.ec2, &params);
        retry_with_backoff(&self.config.backoff, &[codes::ROUTE_TABLE_NOT_FOUND], move || {
            apply_tags(ec2, desired)
        })
        .await
        .map_err(|e| {
            warn!(reason = "FailedTagRouteTable", route_table_id, error = %e, "Failed to tag managed route table");
            NetworkError::cloud(format!("failed to tag route table {:?}", route_table_id), e)
        })?;
        info!(reason = "SuccessfulTagRouteTable", route_table_id, "Tagged managed route table");

        for route in routes {
            self.create_route(route_table_id, route).await?;
        }
        Ok(rt.route_table_id)
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> NetworkResult<()> {
        let ec2 = self.ec2;
        retry_with_backoff(
            &self.config.backoff,
            &[codes::ROUTE_TABLE_NOT_FOUND, codes::SUBNET_NOT_FOUND],
            move || ec2.associate_route_table(route_table_id, subnet_id),
        )
        .await
        .map_err(|e| {
            warn!(reason = "FailedAssociateRouteTable", route_table_id, subnet_id, error = %e, "Failed to associate managed route table with subnet");
            NetworkError::cloud(
                format!("failed to associate route table {:?} to subnet {:?}", route_table_id, subnet_id),
                e,
            )
        })?;
        info!(reason = "SuccessfulAssociateRouteTable", route_table_id, subnet_id, "Associated managed route table with subnet");
        Ok(())
    }

    async fn ensure_route_table_tags(&self, rt: &RouteTable, subnet: &SubnetSpec) -> NetworkResult<()> {
        let route_table_id = rt.route_table_id.as_str();
        let params = self.route_table_tag_params(route_table_id, subnet.is_public, &subnet.availability_zone);
        let (ec2, desired, current) = (self.ec2, &params, &rt.tags);
        retry_with_backoff(&self.config.backoff, &[codes::ROUTE_TABLE_NOT_FOUND], move || {
            ensure_tags(ec2, desired, current)
        })
        .await
        .map_err(|e| {
            warn!(reason = "FailedTagRouteTable", route_table_id, error = %e, "Failed to tag managed route table");
            NetworkError::cloud(format!("failed to ensure tags on route table {:?}", route_table_id), e)
        })
    }

    fn route_table_tag_params(&self, id: &str, public: bool, zone: &str) -> BuildParams {
        let role = if public { "public" } else { "private" };
        self.owned_params(id, format!("{}-rt-{}-{}", self.scope.name(), role, zone), COMMON_ROLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_ec2::RouteTableAssociation;
    use cloudnet_types::Tags;
    use pretty_assertions::assert_eq;

    fn ipv4(target: RouteTarget) -> Route {
        Route::new(RouteDestination::Ipv4(ANY_IPV4_CIDR_BLOCK.into()), target)
    }

    fn table(id: &str, associations: Vec<RouteTableAssociation>) -> RouteTable {
        RouteTable {
            route_table_id: id.to_string(),
            vpc_id: "vpc-1".to_string(),
            routes: vec![],
            associations,
            tags: Tags::new(),
        }
    }

    fn association(subnet_id: Option<&str>, main: bool) -> RouteTableAssociation {
        RouteTableAssociation {
            association_id: "rtbassoc-1".to_string(),
            subnet_id: subnet_id.map(str::to_string),
            main,
        }
    }

    #[test]
    fn test_plan_nothing_when_consistent() {
        let current = vec![
            Route::new(RouteDestination::Ipv4("10.0.0.0/16".into()), RouteTarget::Gateway("local".into())),
            ipv4(RouteTarget::NatGateway("nat-1".into())),
        ];
        let desired = vec![ipv4(RouteTarget::NatGateway("nat-1".into()))];
        assert_eq!(plan_route_changes(&current, &desired), vec![]);
    }

    #[test]
    fn test_plan_replaces_only_stale_route() {
        let prefix_list = Route::new(
            RouteDestination::PrefixList("pl-1".into()),
            RouteTarget::Gateway("vgw-1".into()),
        );
        let current = vec![prefix_list, ipv4(RouteTarget::NatGateway("nat-old".into()))];
        let desired = vec![ipv4(RouteTarget::NatGateway("nat-new".into()))];

        assert_eq!(
            plan_route_changes(&current, &desired),
            vec![RouteChange::Replace(&desired[0])]
        );
    }

    #[test]
    fn test_plan_creates_missing_route() {
        let current = vec![ipv4(RouteTarget::Gateway("igw-1".into()))];
        let desired = vec![
            ipv4(RouteTarget::Gateway("igw-1".into())),
            Route::new(
                RouteDestination::Ipv6(ANY_IPV6_CIDR_BLOCK.into()),
                RouteTarget::Gateway("igw-1".into()),
            ),
        ];
        assert_eq!(
            plan_route_changes(&current, &desired),
            vec![RouteChange::Create(&desired[1])]
        );
    }

    #[test]
    fn test_index_by_subnet() {
        let index = index_by_subnet(vec![
            table("rtb-main", vec![association(None, true)]),
            table(
                "rtb-1",
                vec![association(Some("subnet-1"), false), association(Some("subnet-2"), false)],
            ),
        ]);

        let id = |key: &str| index.get(key).map(|rt| rt.route_table_id.clone());
        assert_eq!(id(MAIN_ROUTE_TABLE_KEY).as_deref(), Some("rtb-main"));
        assert_eq!(id("subnet-1").as_deref(), Some("rtb-1"));
        assert_eq!(id("subnet-2").as_deref(), Some("rtb-1"));
        assert_eq!(index.len(), 3);
    }
}
