//! Egress-only internet gateway for IPv6 traffic out of private subnets.

use crate::error::{NetworkError, NetworkResult};
use crate::service::NetworkService;
use crate::tags::ensure_tags;
use crate::vpc::TEMPORARY_RESOURCE_ID;
use cloudnet_common::{retry_with_backoff, NetworkScope};
use cloudnet_ec2::{codes, filter, CloudError, Ec2Api, EgressOnlyInternetGateway};
use cloudnet_types::{BuildParams, COMMON_ROLE};
use tracing::{debug, info, instrument, warn};

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Ensures exactly one egress-only gateway is attached to an IPv6 VPC
    /// and records its id.
    #[instrument(skip(self))]
    pub async fn reconcile_egress_only_internet_gateways(&mut self) -> NetworkResult<()> {
        if !self.scope.vpc().is_ipv6_enabled() {
            debug!("IPv6 is not enabled, skipping egress only internet gateway");
            return Ok(());
        }
        if self.is_unmanaged() {
            debug!("Skipping egress only internet gateways reconcile in unmanaged mode");
            return Ok(());
        }

        debug!("Reconciling egress only internet gateways");
        let gateway = match self.describe_egress_only_internet_gateways().await {
            Ok(gateways) if gateways.len() > 1 => {
                return Err(CloudError::conflict(format!(
                    "found {} egress only internet gateways attached to vpc {:?}, expected at most one",
                    gateways.len(),
                    self.scope.vpc().id
                ))
                .into());
            }
            Ok(mut gateways) => gateways.remove(0),
            Err(e) if e.is_not_found() => self.create_egress_only_internet_gateway().await?,
            Err(e) => return Err(e),
        };

        let gateway_id = gateway.egress_only_internet_gateway_id.as_str();
        let params = self.egress_only_gateway_tag_params(gateway_id);
        let (ec2, desired, current) = (self.ec2, &params, &gateway.tags);
        retry_with_backoff(
            &self.config.backoff,
            &[codes::EGRESS_ONLY_GATEWAY_NOT_FOUND],
            move || ensure_tags(ec2, desired, current),
        )
        .await
        .map_err(|e| {
            warn!(reason = "FailedTagEgressOnlyInternetGateway", gateway_id, error = %e, "Failed to tag managed egress only internet gateway");
            NetworkError::cloud(
                format!("failed to tag egress only internet gateway {:?}", gateway_id),
                e,
            )
        })?;

        self.scope
            .vpc_mut()
            .ipv6
            .get_or_insert_with(Default::default)
            .egress_only_internet_gateway_id = Some(gateway.egress_only_internet_gateway_id);
        Ok(())
    }

    /// Deletes the egress-only gateways of a managed IPv6 VPC.
    #[instrument(skip(self))]
    pub async fn delete_egress_only_internet_gateways(&self) -> NetworkResult<()> {
        if !self.scope.vpc().is_ipv6_enabled() {
            debug!("IPv6 is not enabled, skipping egress only internet gateway deletion");
            return Ok(());
        }
        if self.is_unmanaged() {
            debug!("Skipping egress only internet gateway deletion in unmanaged mode");
            return Ok(());
        }

        let gateways = match self.describe_egress_only_internet_gateways().await {
            Ok(gateways) => gateways,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        for gateway in &gateways {
            let gateway_id = gateway.egress_only_internet_gateway_id.as_str();
            self.ec2
                .delete_egress_only_internet_gateway(gateway_id)
                .await
                .map_err(|e| {
                    warn!(reason = "FailedDeleteEgressOnlyInternetGateway", gateway_id, error = %e, "Failed to delete egress only internet gateway");
                    NetworkError::cloud(
                        format!("failed to delete egress only internet gateway {:?}", gateway_id),
                        e,
                    )
                })?;
            info!(reason = "SuccessfulDeleteEgressOnlyInternetGateway", gateway_id, "Deleted egress only internet gateway");
        }
        Ok(())
    }

    /// Owned egress-only gateways attached to the VPC. None is a not-found
    /// error.
    async fn describe_egress_only_internet_gateways(
        &self,
    ) -> NetworkResult<Vec<EgressOnlyInternetGateway>> {
        let vpc_id = self.scope.vpc().id.as_str();
        let gateways: Vec<EgressOnlyInternetGateway> = self
            .ec2
            .describe_egress_only_internet_gateways(&[filter::cluster_owned(self.scope.name())])
            .await
            .map_err(|e| {
                warn!(reason = "FailedDescribeEgressOnlyInternetGateway", vpc_id, error = %e, "Failed to describe egress only internet gateways");
                NetworkError::cloud(
                    format!("failed to describe egress only internet gateways in vpc {:?}", vpc_id),
                    e,
                )
            })?
            .into_iter()
            .filter(|g| g.attachments.iter().any(|v| v == vpc_id))
            .collect();

        if gateways.is_empty() {
            return Err(CloudError::not_found(format!(
                "no egress only internet gateways found in vpc {:?}",
                vpc_id
            ))
            .into());
        }
        Ok(gateways)
    }

    async fn create_egress_only_internet_gateway(&self) -> NetworkResult<EgressOnlyInternetGateway> {
        let vpc_id = self.scope.vpc().id.as_str();
        let tags = self
            .egress_only_gateway_tag_params(TEMPORARY_RESOURCE_ID)
            .build();
        let gateway = self
            .ec2
            .create_egress_only_internet_gateway(vpc_id, &tags)
            .await
            .map_err(|e| {
                warn!(reason = "FailedCreateEgressOnlyInternetGateway", vpc_id, error = %e, "Failed to create new managed egress only internet gateway");
                NetworkError::cloud("failed to create egress only internet gateway", e)
            })?;
        info!(
            reason = "SuccessfulCreateEgressOnlyInternetGateway",
            gateway_id = %gateway.egress_only_internet_gateway_id,
            vpc_id,
            "Created new managed egress only internet gateway"
        );
        Ok(gateway)
    }

    fn egress_only_gateway_tag_params(&self, id: &str) -> BuildParams {
        self.owned_params(id, format!("{}-eigw", self.scope.name()), COMMON_ROLE)
    }
}
