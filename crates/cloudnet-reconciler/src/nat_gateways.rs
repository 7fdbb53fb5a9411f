//! NAT gateways for private subnets.
//!
//! Every availability zone with both public and private subnets gets one NAT
//! gateway, placed in the first public subnet of the zone. The private
//! subnets of the zone route through it.

use crate::error::{NetworkError, NetworkResult};
use crate::service::NetworkService;
use crate::tags::ensure_tags;
use crate::vpc::TEMPORARY_RESOURCE_ID;
use cloudnet_common::{retry_with_backoff, wait_for_with_retryable, NetworkScope};
use cloudnet_ec2::{codes, filter, CloudError, Ec2Api, NatGateway, NatGatewayState};
use cloudnet_types::{BuildParams, SubnetSpec, Subnets, Tags, COMMON_ROLE};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Returns the NAT gateway a private subnet routes through: the one held by
/// a public subnet in the same availability zone.
pub(crate) fn nat_gateway_for_subnet(subnet: &SubnetSpec, subnets: &Subnets) -> NetworkResult<String> {
    if subnet.is_public {
        return Err(NetworkError::invalid_spec(format!(
            "cannot get NAT gateway for a public subnet, got id {:?}",
            subnet.id
        )));
    }

    subnets
        .iter()
        .filter(|s| s.is_public && s.availability_zone == subnet.availability_zone)
        .find_map(|s| s.nat_gateway_id.clone())
        .ok_or_else(|| {
            CloudError::failed_dependency(format!(
                "no nat gateways available in {:?} for private subnet {:?}",
                subnet.availability_zone, subnet.id
            ))
            .into()
        })
}

/// Public subnets that should host a NAT gateway: the first public subnet
/// of every zone that also has a private subnet, in zone order.
pub fn nat_gateway_placements(subnets: &Subnets) -> Vec<&SubnetSpec> {
    subnets
        .unique_zones()
        .iter()
        .filter(|zone| {
            subnets
                .iter()
                .any(|s| !s.is_public && &s.availability_zone == *zone)
        })
        .filter_map(|zone| {
            subnets
                .iter()
                .find(|s| s.is_public && &s.availability_zone == zone)
        })
        .collect()
}

/// Polls a NAT gateway that is being deleted. Gone counts as deleted.
async fn nat_gateway_deleted<C>(ec2: &C, nat_gateway_id: &str) -> NetworkResult<bool>
where
    C: Ec2Api + ?Sized,
{
    let gateways = match ec2
        .describe_nat_gateways(&[nat_gateway_id.to_string()], &[])
        .await
    {
        Ok(gateways) => gateways,
        Err(e) if e.is_not_found() => return Ok(true),
        Err(e) => return Err(e.into()),
    };

    let Some(gateway) = gateways.first() else {
        return Err(NetworkError::resource_failed(format!(
            "no NAT gateway returned for id {:?}",
            nat_gateway_id
        )));
    };

    match gateway.state {
        NatGatewayState::Pending | NatGatewayState::Available | NatGatewayState::Deleting => {
            Ok(false)
        }
        NatGatewayState::Deleted => Ok(true),
        NatGatewayState::Failed => Err(NetworkError::resource_failed(format!(
            "in failed state: {} - {}",
            nat_gateway_id,
            gateway.failure_message.as_deref().unwrap_or_default()
        ))),
    }
}

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Ensures a NAT gateway in every zone with private subnets, and records
    /// the gateway ids on the public subnets and the gateway IPs on the
    /// network.
    #[instrument(skip(self))]
    pub async fn reconcile_nat_gateways(&mut self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping NAT gateway reconcile in unmanaged mode");
            return Ok(());
        }

        let subnets = self.scope.subnets().clone();
        if subnets.filter_private().is_empty() {
            debug!("No private subnets available, skipping NAT gateways");
            return Ok(());
        }
        if subnets.filter_public().is_empty() {
            debug!("No public subnets available. Cannot create NAT gateways for private subnets, this might be a configuration error.");
            return Ok(());
        }

        debug!("Reconciling NAT gateways");
        let existing = self.describe_nat_gateways_by_subnet().await?;

        let mut assigned: Vec<(String, String)> = Vec::new();
        let mut ips: Vec<String> = Vec::new();
        let mut missing: Vec<&SubnetSpec> = Vec::new();

        for placement in nat_gateway_placements(&subnets) {
            let reusable = subnets
                .iter()
                .filter(|s| s.is_public && s.availability_zone == placement.availability_zone)
                .find_map(|s| existing.get(&s.id));

            match reusable {
                Some(gateway) => {
                    self.ensure_nat_gateway_tags(gateway).await?;
                    assigned.push((gateway.subnet_id.clone(), gateway.nat_gateway_id.clone()));
                    ips.extend(gateway.public_ip.clone());
                }
                None => missing.push(placement),
            }
        }

        if !missing.is_empty() {
            let addresses = self
                .get_or_allocate_addresses(missing.len(), COMMON_ROLE)
                .await?;

            let mut created = Vec::new();
            for (subnet, address) in missing.iter().zip(&addresses) {
                let gateway = self
                    .create_nat_gateway(&subnet.id, &address.allocation_id)
                    .await?;
                assigned.push((subnet.id.clone(), gateway.nat_gateway_id.clone()));
                ips.push(address.public_ip.clone());
                created.push(gateway);
            }

            for gateway in &created {
                self.ec2
                    .wait_until_nat_gateway_available(&gateway.nat_gateway_id)
                    .await
                    .map_err(|e| {
                        NetworkError::cloud(
                            format!(
                                "failed to wait for nat gateway {:?} in subnet {:?}",
                                gateway.nat_gateway_id, gateway.subnet_id
                            ),
                            e,
                        )
                    })?;
                debug!(nat_gateway_id = %gateway.nat_gateway_id, "NAT gateway is available");
            }
        }

        let network = self.scope.network_mut();
        for (subnet_id, nat_gateway_id) in assigned {
            if let Some(subnet) = network.subnets.find_by_id_mut(&subnet_id) {
                subnet.nat_gateway_id = Some(nat_gateway_id);
            }
        }
        network.nat_gateway_ips = ips;
        Ok(())
    }

    /// Deletes every NAT gateway of a managed VPC and waits until each is
    /// gone. Failures are collected so every gateway gets a delete call.
    #[instrument(skip(self))]
    pub async fn delete_nat_gateways(&self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping NAT gateway deletion in unmanaged mode");
            return Ok(());
        }

        let existing = self.describe_vpc_nat_gateways().await?;
        let mut errors = Vec::new();
        for gateway in &existing {
            if let Err(e) = self.delete_nat_gateway(&gateway.nat_gateway_id).await {
                errors.push(e);
            }
        }
        NetworkError::aggregate(errors)
    }

    /// Pending and available NAT gateways of the VPC, indexed by subnet.
    pub(crate) async fn describe_nat_gateways_by_subnet(
        &self,
    ) -> NetworkResult<HashMap<String, NatGateway>> {
        let mut index = HashMap::new();
        for gateway in self.describe_vpc_nat_gateways().await? {
            index.entry(gateway.subnet_id.clone()).or_insert(gateway);
        }
        Ok(index)
    }

    async fn describe_vpc_nat_gateways(&self) -> NetworkResult<Vec<NatGateway>> {
        let vpc_id = self.scope.vpc().id.as_str();
        let filters = [filter::vpc(vpc_id), filter::pending_or_available()];
        self.ec2
            .describe_nat_gateways(&[], &filters)
            .await
            .map_err(|e| {
                warn!(reason = "FailedDescribeNATGateways", vpc_id, error = %e, "Failed to describe NAT gateways");
                NetworkError::cloud(format!("failed to describe nat gateways with vpc ID {:?}", vpc_id), e)
            })
    }

    async fn create_nat_gateway(&self, subnet_id: &str, allocation_id: &str) -> NetworkResult<NatGateway> {
        let tags: Tags = self.nat_gateway_tag_params(TEMPORARY_RESOURCE_ID).build();
        let (ec2, tags) = (self.ec2, &tags);
        let gateway = retry_with_backoff(&self.config.backoff, &[codes::INVALID_SUBNET], move || {
            ec2.create_nat_gateway(subnet_id, allocation_id, tags)
        })
        .await
        .map_err(|e| {
            warn!(reason = "FailedCreateNATGateway", subnet_id, error = %e, "Failed to create new NAT gateway");
            NetworkError::cloud(format!("failed to create NAT gateway for subnet ID {:?}", subnet_id), e)
        })?;
        info!(
            reason = "SuccessfulCreateNATGateway",
            nat_gateway_id = %gateway.nat_gateway_id,
            subnet_id,
            "Created new NAT gateway"
        );
        Ok(gateway)
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> NetworkResult<()> {
        self.ec2.delete_nat_gateway(nat_gateway_id).await.map_err(|e| {
            warn!(reason = "FailedDeleteNATGateway", nat_gateway_id, error = %e, "Failed to delete NAT gateway");
            NetworkError::cloud(format!("failed to delete nat gateway {:?}", nat_gateway_id), e)
        })?;

        let ec2 = self.ec2;
        wait_for_with_retryable(&self.config.backoff, &[], move || {
            nat_gateway_deleted(ec2, nat_gateway_id)
        })
        .await
        .map_err(|e| {
            e.with_context(format!(
                "failed to wait for NAT gateway deletion {:?}",
                nat_gateway_id
            ))
        })?;

        info!(reason = "SuccessfulDeleteNATGateway", nat_gateway_id, "Deleted NAT gateway");
        Ok(())
    }

    async fn ensure_nat_gateway_tags(&self, gateway: &NatGateway) -> NetworkResult<()> {
        let params = self.nat_gateway_tag_params(&gateway.nat_gateway_id);
        let (ec2, desired, current) = (self.ec2, &params, &gateway.tags);
        retry_with_backoff(
            &self.config.backoff,
            &[codes::RESOURCE_NOT_FOUND, codes::NAT_GATEWAY_NOT_FOUND],
            move || ensure_tags(ec2, desired, current),
        )
        .await
        .map_err(|e| {
            warn!(reason = "FailedTagNATGateway", nat_gateway_id = %gateway.nat_gateway_id, error = %e, "Failed to tag managed NAT gateway");
            NetworkError::cloud(
                format!("failed to ensure tags on nat gateway {:?}", gateway.nat_gateway_id),
                e,
            )
        })
    }

    fn nat_gateway_tag_params(&self, id: &str) -> BuildParams {
        self.owned_params(id, format!("{}-nat", self.scope.name()), COMMON_ROLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn subnets(specs: &[(&str, &str, bool, Option<&str>)]) -> Subnets {
        specs
            .iter()
            .map(|(id, zone, public, nat)| SubnetSpec {
                nat_gateway_id: nat.map(str::to_string),
                ..SubnetSpec::new("10.0.0.0/24", *zone, *public).with_id(*id)
            })
            .collect()
    }

    #[test]
    fn test_nat_gateway_for_private_subnet_in_same_zone() {
        let all = subnets(&[
            ("subnet-pub-a", "a", true, Some("nat-a")),
            ("subnet-pub-b", "b", true, Some("nat-b")),
            ("subnet-priv-b", "b", false, None),
        ]);
        let private = all.find_by_id("subnet-priv-b").unwrap();
        assert_eq!(nat_gateway_for_subnet(private, &all).unwrap(), "nat-b");
    }

    #[test]
    fn test_nat_gateway_missing_in_zone() {
        let all = subnets(&[
            ("subnet-pub-a", "us-east-1a", true, Some("nat-a")),
            ("subnet-priv-c", "us-east-1c", false, None),
        ]);
        let private = all.find_by_id("subnet-priv-c").unwrap();
        let err = nat_gateway_for_subnet(private, &all).unwrap_err();
        assert!(err.is_failed_dependency());
        assert_eq!(
            err.to_string(),
            "no nat gateways available in \"us-east-1c\" for private subnet \"subnet-priv-c\""
        );
    }

    #[test]
    fn test_nat_gateway_for_public_subnet_is_an_error() {
        let all = subnets(&[("subnet-pub-a", "a", true, Some("nat-a"))]);
        let public = all.find_by_id("subnet-pub-a").unwrap();
        assert!(nat_gateway_for_subnet(public, &all).is_err());
    }

    #[test]
    fn test_placements_need_both_roles_in_zone() {
        let all = subnets(&[
            ("subnet-pub-a1", "a", true, None),
            ("subnet-pub-a2", "a", true, None),
            ("subnet-priv-a", "a", false, None),
            ("subnet-pub-b", "b", true, None),
            ("subnet-priv-c", "c", false, None),
        ]);
        let ids: Vec<&str> = nat_gateway_placements(&all)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["subnet-pub-a1"]);
    }
}
