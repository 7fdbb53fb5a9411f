//! Carrier gateway for public subnets in wavelength zones.

use crate::error::{NetworkError, NetworkResult};
use crate::service::NetworkService;
use crate::tags::ensure_tags;
use crate::vpc::TEMPORARY_RESOURCE_ID;
use cloudnet_common::{retry_with_backoff, NetworkScope};
use cloudnet_ec2::{codes, filter, CarrierGateway, CloudError, Ec2Api};
use cloudnet_types::{BuildParams, COMMON_ROLE};
use tracing::{debug, info, instrument, warn};

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Ensures a carrier gateway exists in the VPC when a public subnet
    /// lives in a wavelength zone, and records its id.
    #[instrument(skip(self))]
    pub async fn reconcile_carrier_gateway(&mut self) -> NetworkResult<()> {
        if !self.config.carrier_gateway || !self.scope.subnets().has_public_subnet_wavelength() {
            debug!("No public subnets in wavelength zones, skipping carrier gateway");
            return Ok(());
        }
        if self.is_unmanaged() {
            debug!("Skipping carrier gateway reconcile in unmanaged mode");
            return Ok(());
        }

        debug!("Reconciling carrier gateway");
        let gateway = match self.describe_vpc_carrier_gateway().await {
            Ok(gateway) => gateway,
            Err(e) if e.is_not_found() => self.create_carrier_gateway().await?,
            Err(e) => return Err(e),
        };

        let gateway_id = gateway.carrier_gateway_id.as_str();
        let params = self.carrier_gateway_tag_params(gateway_id);
        let (ec2, desired, current) = (self.ec2, &params, &gateway.tags);
        retry_with_backoff(
            &self.config.backoff,
            &[codes::CARRIER_GATEWAY_NOT_FOUND],
            move || ensure_tags(ec2, desired, current),
        )
        .await
        .map_err(|e| {
            warn!(reason = "FailedTagCarrierGateway", gateway_id, error = %e, "Failed to tag managed carrier gateway");
            NetworkError::cloud(format!("failed to tag carrier gateway {:?}", gateway_id), e)
        })?;

        self.scope.vpc_mut().carrier_gateway_id = Some(gateway.carrier_gateway_id);
        Ok(())
    }

    /// Deletes the carrier gateway of a managed VPC, if it ever had one.
    #[instrument(skip(self))]
    pub async fn delete_carrier_gateway(&self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping carrier gateway deletion in unmanaged mode");
            return Ok(());
        }
        if self.scope.vpc().carrier_gateway_id.is_none()
            && !self.scope.subnets().has_public_subnet_wavelength()
        {
            debug!("No carrier gateway recorded, skipping deletion");
            return Ok(());
        }

        let gateway = match self.describe_vpc_carrier_gateway().await {
            Ok(gateway) => gateway,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let gateway_id = gateway.carrier_gateway_id.as_str();
        match self.ec2.delete_carrier_gateway(gateway_id).await {
            Ok(()) => {
                info!(reason = "SuccessfulDeleteCarrierGateway", gateway_id, "Deleted carrier gateway");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => {
                warn!(reason = "FailedDeleteCarrierGateway", gateway_id, error = %e, "Failed to delete carrier gateway");
                Err(NetworkError::cloud(
                    format!("failed to delete carrier gateway {:?}", gateway_id),
                    e,
                ))
            }
        }
    }

    async fn describe_vpc_carrier_gateway(&self) -> NetworkResult<CarrierGateway> {
        let vpc_id = self.scope.vpc().id.as_str();
        let gateways = self
            .ec2
            .describe_carrier_gateways(&[filter::vpc(vpc_id)])
            .await
            .map_err(|e| {
                warn!(reason = "FailedDescribeCarrierGateway", vpc_id, error = %e, "Failed to describe carrier gateways");
                NetworkError::cloud(
                    format!("failed to describe carrier gateways in vpc {:?}", vpc_id),
                    e,
                )
            })?;

        gateways.into_iter().next().ok_or_else(|| {
            CloudError::not_found(format!("no carrier gateway found in vpc {:?}", vpc_id)).into()
        })
    }

    async fn create_carrier_gateway(&self) -> NetworkResult<CarrierGateway> {
        let vpc_id = self.scope.vpc().id.as_str();
        let tags = self.carrier_gateway_tag_params(TEMPORARY_RESOURCE_ID).build();
        let gateway = self
            .ec2
            .create_carrier_gateway(vpc_id, &tags)
            .await
            .map_err(|e| {
                warn!(reason = "FailedCreateCarrierGateway", vpc_id, error = %e, "Failed to create new managed carrier gateway");
                NetworkError::cloud("failed to create carrier gateway", e)
            })?;
        info!(
            reason = "SuccessfulCreateCarrierGateway",
            gateway_id = %gateway.carrier_gateway_id,
            vpc_id,
            "Created new managed carrier gateway"
        );
        Ok(gateway)
    }

    fn carrier_gateway_tag_params(&self, id: &str) -> BuildParams {
        self.owned_params(id, format!("{}-cagw", self.scope.name()), COMMON_ROLE)
    }
}
