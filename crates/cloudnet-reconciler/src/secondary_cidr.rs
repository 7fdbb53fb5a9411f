//! Secondary IPv4 block of the VPC, used by managed control planes for pod
//! networking.

use crate::error::{CloudResultExt, NetworkError, NetworkResult};
use crate::service::NetworkService;
use cloudnet_common::NetworkScope;
use cloudnet_ec2::{CloudError, Ec2Api, Vpc};
use tracing::{debug, info, instrument, warn};

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Associates the secondary block with the VPC unless it already is.
    #[instrument(skip(self))]
    pub async fn associate_secondary_cidr(&self) -> NetworkResult<()> {
        let Some(cidr_block) = self.scope.secondary_cidr_block() else {
            return Ok(());
        };

        let vpc = self.describe_vpc_by_id_raw().await?;
        if vpc
            .cidr_block_associations
            .iter()
            .any(|a| a.cidr_block == cidr_block && a.state.is_active())
        {
            debug!(cidr_block, "Secondary CIDR already associated");
            return Ok(());
        }

        match self.ec2.associate_vpc_cidr_block(&vpc.vpc_id, cidr_block).await {
            Ok(association_id) => {
                info!(
                    reason = "SuccessfulAssociateSecondaryCidr",
                    cidr_block,
                    association_id = %association_id,
                    "Associated secondary CIDR with VPC"
                );
                Ok(())
            }
            Err(e) => {
                warn!(reason = "FailedAssociateSecondaryCidr", cidr_block, error = %e, "Failed to associate secondary CIDR");
                Err(NetworkError::cloud(
                    format!("failed to associate secondary CIDR {:?}", cidr_block),
                    e,
                ))
            }
        }
    }

    /// Removes the secondary block from the VPC if it is associated.
    #[instrument(skip(self))]
    pub async fn disassociate_secondary_cidr(&self) -> NetworkResult<()> {
        let Some(cidr_block) = self.scope.secondary_cidr_block() else {
            return Ok(());
        };

        let vpc = self.describe_vpc_by_id_raw().await?;
        for association in vpc
            .cidr_block_associations
            .iter()
            .filter(|a| a.cidr_block == cidr_block && a.state.is_active())
        {
            self.ec2
                .disassociate_vpc_cidr_block(&association.association_id)
                .await
                .map_err(|e| {
                    warn!(reason = "FailedDisassociateSecondaryCidr", cidr_block, error = %e, "Failed to disassociate secondary CIDR");
                    e
                })
                .context(|| format!("failed to disassociate secondary CIDR {:?}", cidr_block))?;
            info!(
                reason = "SuccessfulDisassociateSecondaryCidr",
                cidr_block, "Disassociated secondary CIDR from VPC"
            );
        }
        Ok(())
    }

    async fn describe_vpc_by_id_raw(&self) -> NetworkResult<Vpc> {
        let vpc_id = self.scope.vpc().id.clone();
        let vpcs = self
            .ec2
            .describe_vpcs(std::slice::from_ref(&vpc_id), &[])
            .await
            .context(|| format!("failed to describe vpc {:?}", vpc_id))?;
        vpcs.into_iter()
            .next()
            .ok_or_else(|| CloudError::not_found(format!("no VPC with ID {:?} found", vpc_id)).into())
    }
}
