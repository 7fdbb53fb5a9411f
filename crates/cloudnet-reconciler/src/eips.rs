//! Elastic IP allocation and release.
//!
//! Addresses are tagged with the cluster and a role, so unassociated ones
//! left over from an earlier pass are picked up again before new ones are
//! allocated.

use crate::error::{CloudResultExt, NetworkError, NetworkResult};
use crate::service::NetworkService;
use crate::tags::apply_tags;
use cloudnet_common::{retry_with_backoff, NetworkScope};
use cloudnet_ec2::{codes, filter, Address, CloudResult, Ec2Api};
use tracing::{debug, info, instrument, warn};

/// Releases one address. A failed release of an associated address
/// disassociates it again before the error is handed back for a retry.
async fn release_address<C>(
    ec2: &C,
    allocation_id: &str,
    association_id: Option<&str>,
) -> CloudResult<()>
where
    C: Ec2Api + ?Sized,
{
    let Err(err) = ec2.release_address(allocation_id).await else {
        return Ok(());
    };

    if let Some(association_id) = association_id {
        match ec2.disassociate_address(association_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(reason = "FailedDisassociateEIP", allocation_id, error = %e, "Failed to disassociate Elastic IP");
                return Err(e);
            }
        }
    }
    Err(err)
}

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Returns `count` unassociated addresses for `role`, reusing existing
    /// ones before allocating new ones.
    pub async fn get_or_allocate_addresses(
        &self,
        count: usize,
        role: &str,
    ) -> NetworkResult<Vec<Address>> {
        let mut addresses: Vec<Address> = self
            .describe_addresses(role)
            .await?
            .into_iter()
            .filter(|a| a.association_id.is_none())
            .take(count)
            .collect();
        debug!(reused = addresses.len(), count, role, "Collected unassociated Elastic IPs");

        while addresses.len() < count {
            addresses.push(self.allocate_address(role).await?);
        }
        Ok(addresses)
    }

    /// Disassociates and releases every address tagged for the cluster.
    #[instrument(skip(self))]
    pub async fn release_addresses(&self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping Elastic IP release in unmanaged mode");
            return Ok(());
        }

        let addresses = self
            .ec2
            .describe_addresses(&[filter::cluster(self.scope.name())])
            .await
            .context(|| "failed to describe elastic IPs".to_string())?;

        for address in &addresses {
            let allocation_id = address.allocation_id.as_str();
            let association_id = address.association_id.as_deref();

            if let Some(association_id) = association_id {
                self.ec2
                    .disassociate_address(association_id)
                    .await
                    .map_err(|e| {
                        warn!(reason = "FailedDisassociateEIP", allocation_id, error = %e, "Failed to disassociate Elastic IP");
                        NetworkError::cloud(
                            format!("failed to disassociate Elastic IP {:?}", allocation_id),
                            e,
                        )
                    })?;
            }

            let ec2 = self.ec2;
            retry_with_backoff(
                &self.config.backoff,
                &[codes::AUTH_FAILURE, codes::IN_USE_IP_ADDRESS],
                move || release_address(ec2, allocation_id, association_id),
            )
            .await
            .map_err(|e| {
                warn!(reason = "FailedReleaseEIP", allocation_id, error = %e, "Failed to release Elastic IP");
                NetworkError::cloud(format!("failed to release ElasticIP {:?}", allocation_id), e)
            })?;

            info!(
                reason = "SuccessfulReleaseEIP",
                allocation_id,
                public_ip = %address.public_ip,
                "Released Elastic IP"
            );
        }
        Ok(())
    }

    async fn describe_addresses(&self, role: &str) -> NetworkResult<Vec<Address>> {
        let filters = [filter::cluster(self.scope.name()), filter::provider_role(role)];
        self.ec2
            .describe_addresses(&filters)
            .await
            .context(|| format!("failed to query addresses for role {:?}", role))
    }

    async fn allocate_address(&self, role: &str) -> NetworkResult<Address> {
        let mut address = self.ec2.allocate_address().await.map_err(|e| {
            warn!(reason = "FailedAllocateEIP", role, error = %e, "Failed to allocate Elastic IP");
            NetworkError::cloud(format!("failed to create Elastic IP address for role {:?}", role), e)
        })?;

        let params = self.owned_params(
            &address.allocation_id,
            format!("{}-eip-{}", self.scope.name(), role),
            role,
        );
        let (ec2, desired) = (self.ec2, &params);
        retry_with_backoff(&self.config.backoff, &[codes::ALLOCATION_NOT_FOUND], move || {
            apply_tags(ec2, desired)
        })
        .await
        .map_err(|e| {
            NetworkError::cloud(
                format!("failed to tag elastic IP {:?}", address.allocation_id),
                e,
            )
        })?;

        info!(
            reason = "SuccessfulAllocateEIP",
            allocation_id = %address.allocation_id,
            public_ip = %address.public_ip,
            role,
            "Allocated Elastic IP"
        );
        address.tags.merge(&params.build());
        Ok(address)
    }
}
