//! Internet gateway reconciliation.

use crate::error::{NetworkError, NetworkResult};
use crate::service::NetworkService;
use crate::tags::{apply_tags, ensure_tags};
use cloudnet_common::{retry_with_backoff, NetworkScope};
use cloudnet_ec2::{codes, filter, CloudError, Ec2Api, InternetGateway};
use cloudnet_types::{BuildParams, COMMON_ROLE};
use tracing::{debug, info, instrument, warn};

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Ensures an internet gateway is attached to the VPC when it has public
    /// subnets, and records its id on the VPC.
    #[instrument(skip(self))]
    pub async fn reconcile_internet_gateways(&mut self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping internet gateways reconcile in unmanaged mode");
            return Ok(());
        }
        if !self.scope.subnets().iter().any(|s| s.is_public) {
            debug!("No public subnets available, skipping internet gateway");
            return Ok(());
        }

        debug!("Reconciling internet gateways");
        let gateway = match self.describe_vpc_internet_gateways().await {
            Ok(mut gateways) => gateways.remove(0),
            Err(e) if e.is_not_found() => self.create_internet_gateway().await?,
            Err(e) => return Err(e),
        };

        let gateway_id = gateway.internet_gateway_id.as_str();
        let params = self.internet_gateway_tag_params(gateway_id);
        let (ec2, desired, current) = (self.ec2, &params, &gateway.tags);
        retry_with_backoff(
            &self.config.backoff,
            &[codes::INTERNET_GATEWAY_NOT_FOUND],
            move || ensure_tags(ec2, desired, current),
        )
        .await
        .map_err(|e| {
            warn!(reason = "FailedTagInternetGateway", gateway_id, error = %e, "Failed to tag managed internet gateway");
            NetworkError::cloud(format!("failed to tag internet gateway {:?}", gateway_id), e)
        })?;

        self.scope.vpc_mut().internet_gateway_id = Some(gateway.internet_gateway_id);
        Ok(())
    }

    /// Detaches and deletes every internet gateway attached to a managed VPC.
    #[instrument(skip(self))]
    pub async fn delete_internet_gateways(&self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping internet gateway deletion in unmanaged mode");
            return Ok(());
        }

        let gateways = match self.describe_vpc_internet_gateways().await {
            Ok(gateways) => gateways,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let vpc_id = self.scope.vpc().id.as_str();
        for gateway in &gateways {
            let gateway_id = gateway.internet_gateway_id.as_str();
            self.ec2
                .detach_internet_gateway(gateway_id, vpc_id)
                .await
                .map_err(|e| {
                    warn!(reason = "FailedDetachInternetGateway", gateway_id, vpc_id, error = %e, "Failed to detach internet gateway");
                    NetworkError::cloud(format!("failed to detach internet gateway {:?}", gateway_id), e)
                })?;
            info!(reason = "SuccessfulDetachInternetGateway", gateway_id, vpc_id, "Detached internet gateway from VPC");

            self.ec2
                .delete_internet_gateway(gateway_id)
                .await
                .map_err(|e| {
                    warn!(reason = "FailedDeleteInternetGateway", gateway_id, error = %e, "Failed to delete internet gateway");
                    NetworkError::cloud(format!("failed to delete internet gateway {:?}", gateway_id), e)
                })?;
            info!(reason = "SuccessfulDeleteInternetGateway", gateway_id, "Deleted internet gateway");
        }
        Ok(())
    }

    /// Internet gateways attached to the VPC. None is a not-found error.
    async fn describe_vpc_internet_gateways(&self) -> NetworkResult<Vec<InternetGateway>> {
        let vpc_id = self.scope.vpc().id.as_str();
        let gateways = self
            .ec2
            .describe_internet_gateways(&[filter::vpc_attachment(vpc_id)])
            .await
            .map_err(|e| {
                warn!(reason = "FailedDescribeInternetGateway", vpc_id, error = %e, "Failed to describe internet gateways");
                NetworkError::cloud(
                    format!("failed to describe internet gateways in vpc {:?}", vpc_id),
                    e,
                )
            })?;

        if gateways.is_empty() {
            return Err(CloudError::not_found(format!(
                "no internet gateways found in vpc {:?}",
                vpc_id
            ))
            .into());
        }
        Ok(gateways)
    }

    async fn create_internet_gateway(&self) -> NetworkResult<InternetGateway> {
        let mut gateway = self.ec2.create_internet_gateway().await.map_err(|e| {
            warn!(reason = "FailedCreateInternetGateway", error = %e, "Failed to create new managed internet gateway");
            NetworkError::cloud("failed to create internet gateway", e)
        })?;
        let gateway_id = gateway.internet_gateway_id.as_str();
        info!(reason = "SuccessfulCreateInternetGateway", gateway_id, "Created new managed internet gateway");

        let ec2 = self.ec2;
        let params = self.internet_gateway_tag_params(gateway_id);
        let desired = &params;
        retry_with_backoff(
            &self.config.backoff,
            &[codes::INTERNET_GATEWAY_NOT_FOUND],
            move || apply_tags(ec2, desired),
        )
        .await
        .map_err(|e| {
            warn!(reason = "FailedTagInternetGateway", gateway_id, error = %e, "Failed to tag managed internet gateway");
            NetworkError::cloud(format!("failed to tag internet gateway {:?}", gateway_id), e)
        })?;

        let vpc_id = self.scope.vpc().id.as_str();
        retry_with_backoff(
            &self.config.backoff,
            &[codes::INTERNET_GATEWAY_NOT_FOUND],
            move || ec2.attach_internet_gateway(gateway_id, vpc_id),
        )
        .await
        .map_err(|e| {
            warn!(reason = "FailedAttachInternetGateway", gateway_id, vpc_id, error = %e, "Failed to attach internet gateway");
            NetworkError::cloud(
                format!("failed to attach internet gateway {:?} to vpc {:?}", gateway_id, vpc_id),
                e,
            )
        })?;
        info!(reason = "SuccessfulAttachInternetGateway", gateway_id, vpc_id, "Internet gateway attached to VPC");

        gateway.tags.merge(&params.build());
        if !gateway.attachments.iter().any(|v| v == vpc_id) {
            gateway.attachments.push(vpc_id.to_string());
        }
        Ok(gateway)
    }

    fn internet_gateway_tag_params(&self, id: &str) -> BuildParams {
        self.owned_params(id, format!("{}-igw", self.scope.name()), COMMON_ROLE)
    }
}
