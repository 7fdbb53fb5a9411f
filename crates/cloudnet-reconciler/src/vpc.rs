//! VPC reconciliation.
//!
//! The VPC is looked up by id when the scope carries one, otherwise by the
//! cluster tag. A missing VPC is created; an unmanaged VPC is only read.

use crate::error::{CloudResultExt, NetworkError, NetworkResult};
use crate::service::NetworkService;
use crate::tags::ensure_tags;
use cloudnet_common::{retry_with_backoff, ConditionType, NetworkScope, Severity};
use cloudnet_ec2::{codes, filter, CloudError, CreateVpcInput, Ec2Api, Vpc, VpcAttribute};
use cloudnet_types::{BuildParams, Ipv6Spec, VpcSpec, COMMON_ROLE};
use tracing::{debug, info, instrument, warn};

/// Resource id used in tag params before the provider assigned one.
pub(crate) const TEMPORARY_RESOURCE_ID: &str = "temp-resource-id";

/// Converts a described VPC into the fields a `VpcSpec` tracks.
pub(crate) fn vpc_to_spec(vpc: &Vpc) -> VpcSpec {
    VpcSpec {
        id: vpc.vpc_id.clone(),
        cidr_block: vpc.cidr_block.clone(),
        tags: vpc.tags.clone(),
        ipv6: vpc.ipv6_cidr_block.as_ref().map(|cidr| Ipv6Spec {
            cidr_block: Some(cidr.clone()),
            pool_id: vpc.ipv6_pool.clone(),
            egress_only_internet_gateway_id: None,
        }),
        ..Default::default()
    }
}

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Ensures the VPC exists, carries the cluster tags and has DNS support
    /// and DNS hostnames enabled.
    #[instrument(skip(self))]
    pub async fn reconcile_vpc(&mut self) -> NetworkResult<()> {
        debug!("Reconciling VPC");

        let mut vpc = match self.describe_vpc().await {
            Ok(vpc) => vpc,
            Err(e) if e.is_not_found() => {
                if !self.scope.has_condition(ConditionType::VpcReady) {
                    self.scope.mark_false(
                        ConditionType::VpcReady,
                        "VpcCreationStarted",
                        Severity::Info,
                        "",
                    );
                    self.scope.patch_object().await?;
                }
                self.create_vpc().await?
            }
            Err(e) => return Err(e),
        };

        if vpc.is_unmanaged(self.scope.name()) {
            debug!(vpc_id = %vpc.id, "Using unmanaged VPC");
            self.apply_observed_vpc(vpc);
            self.scope.patch_object().await?;
            return Ok(());
        }

        let backoff = self.config.backoff.clone();
        let this = &*self;
        let vpc_id = vpc.id.as_str();
        retry_with_backoff(&backoff, &[codes::VPC_NOT_FOUND], move || {
            this.ensure_managed_vpc_attributes(vpc_id)
        })
        .await
        .map_err(|e| e.with_context(format!("failed to set vpc attributes for {:?}", vpc_id)))?;

        let params = self.vpc_tag_params(&vpc.id);
        let ec2 = self.ec2;
        let (desired, current) = (&params, &vpc.tags);
        retry_with_backoff(&backoff, &[codes::VPC_NOT_FOUND], move || {
            ensure_tags(ec2, desired, current)
        })
        .await
        .context(|| format!("failed to tag vpc {:?}", vpc.id))?;
        vpc.tags.merge(&params.build());

        self.apply_observed_vpc(vpc);
        Ok(())
    }

    /// Deletes a managed VPC. A VPC that is already gone counts as deleted.
    #[instrument(skip(self))]
    pub async fn delete_vpc(&self) -> NetworkResult<()> {
        if self.is_unmanaged() {
            debug!("Skipping VPC deletion in unmanaged mode");
            return Ok(());
        }

        let vpc_id = self.scope.vpc().id.as_str();
        match self.ec2.delete_vpc(vpc_id).await {
            Ok(()) => {
                info!(reason = "SuccessfulDeleteVPC", vpc_id, "Deleted managed VPC");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(vpc_id, "Skipping VPC deletion, VPC not found");
                Ok(())
            }
            Err(e) if e.has_code(codes::MISSING_PARAMETER) => {
                debug!("Skipping VPC deletion, VPC id not set");
                Ok(())
            }
            Err(e) => {
                warn!(reason = "FailedDeleteVPC", vpc_id, error = %e, "Failed to delete managed VPC");
                Err(NetworkError::cloud(format!("failed to delete vpc {:?}", vpc_id), e))
            }
        }
    }

    /// Describes the VPC of the scope, by id or by cluster tag.
    ///
    /// No match, or a match in a state other than pending or available, is
    /// a not-found error. More than one match is a conflict.
    pub(crate) async fn describe_vpc(&self) -> NetworkResult<VpcSpec> {
        let vpc_id = self.scope.vpc().id.clone();
        let mut filters = vec![filter::pending_or_available()];
        let ids = if vpc_id.is_empty() {
            filters.push(filter::cluster(self.scope.name()));
            Vec::new()
        } else {
            vec![vpc_id.clone()]
        };

        let vpcs = match self.ec2.describe_vpcs(&ids, &filters).await {
            Ok(vpcs) => vpcs,
            Err(e) if e.is_not_found() => return Err(e.into()),
            Err(e) => {
                warn!(reason = "FailedDescribeVPC", vpc_id = %vpc_id, error = %e, "Failed to describe VPC");
                return Err(NetworkError::cloud(
                    format!("failed to describe vpc {:?}", vpc_id),
                    e,
                ));
            }
        };

        match vpcs.as_slice() {
            [] => Err(CloudError::not_found(format!("could not find vpc {:?}", vpc_id)).into()),
            [vpc] if !vpc.state.is_pending_or_available() => Err(CloudError::not_found(
                format!("could not find available or pending vpc {:?}", vpc.vpc_id),
            )
            .into()),
            [vpc] => Ok(vpc_to_spec(vpc)),
            many => Err(CloudError::conflict(format!(
                "found more than one vpc with supplied filters, please clean up extra VPCs: {}",
                many.iter().map(|v| v.vpc_id.as_str()).collect::<Vec<_>>().join(", ")
            ))
            .into()),
        }
    }

    async fn create_vpc(&mut self) -> NetworkResult<VpcSpec> {
        if self.scope.vpc().cidr_block.is_empty() {
            self.scope.vpc_mut().cidr_block = self.config.default_vpc_cidr.clone();
        }

        let spec = self.scope.vpc().clone();
        let ipv6 = spec.ipv6.clone().unwrap_or_default();
        let input = CreateVpcInput {
            cidr_block: spec.cidr_block.clone(),
            amazon_provided_ipv6_cidr_block: spec.ipv6.is_some()
                && ipv6.cidr_block.is_none()
                && ipv6.pool_id.is_none(),
            ipv6_cidr_block: ipv6.cidr_block,
            ipv6_pool: ipv6.pool_id,
            tags: self.vpc_tag_params(TEMPORARY_RESOURCE_ID).build(),
        };

        let vpc = self.ec2.create_vpc(input).await.map_err(|e| {
            warn!(reason = "FailedCreateVPC", error = %e, "Failed to create new managed VPC");
            NetworkError::cloud("failed to create new vpc", e)
        })?;
        info!(reason = "SuccessfulCreateVPC", vpc_id = %vpc.vpc_id, cidr = %vpc.cidr_block, "Created new managed VPC");

        self.ec2
            .wait_until_vpc_available(&vpc.vpc_id)
            .await
            .context(|| format!("failed to wait for vpc {:?}", vpc.vpc_id))?;

        Ok(vpc_to_spec(&vpc))
    }

    /// Enables DNS hostnames and DNS support.
    ///
    /// Each attribute is checked and set on its own and failures are
    /// collected. A VPC-not-found error is returned directly so the caller
    /// can retry it.
    async fn ensure_managed_vpc_attributes(&self, vpc_id: &str) -> NetworkResult<()> {
        let mut errors = Vec::new();
        let mut updated = false;

        for attribute in [VpcAttribute::EnableDnsHostnames, VpcAttribute::EnableDnsSupport] {
            match self.ec2.describe_vpc_attribute(vpc_id, attribute).await {
                Ok(true) => {}
                Ok(false) => match self.ec2.modify_vpc_attribute(vpc_id, attribute, true).await {
                    Ok(()) => updated = true,
                    Err(e) => errors.push(NetworkError::cloud(
                        format!("failed to set {} vpc attribute", attribute),
                        e,
                    )),
                },
                Err(e) if e.has_code(codes::VPC_NOT_FOUND) => return Err(e.into()),
                Err(e) => errors.push(NetworkError::cloud(
                    format!("failed to describe {} vpc attribute", attribute),
                    e,
                )),
            }
        }

        if !errors.is_empty() {
            warn!(reason = "FailedSetVPCAttributes", vpc_id, "Failed to set managed VPC attributes");
        } else if updated {
            info!(reason = "SuccessfulSetVPCAttributes", vpc_id, "Set managed VPC attributes");
        }
        NetworkError::aggregate(errors)
    }

    /// Copies described VPC fields into the scope, keeping the fields only
    /// the scope tracks on its own.
    pub(crate) fn apply_observed_vpc(&mut self, observed: VpcSpec) {
        let vpc = self.scope.vpc_mut();
        vpc.id = observed.id;
        vpc.cidr_block = observed.cidr_block;
        vpc.tags = observed.tags;
        if let Some(observed_ipv6) = observed.ipv6 {
            let ipv6 = vpc.ipv6.get_or_insert_with(Default::default);
            ipv6.cidr_block = observed_ipv6.cidr_block;
            if observed_ipv6.pool_id.is_some() {
                ipv6.pool_id = observed_ipv6.pool_id;
            }
        }
    }

    fn vpc_tag_params(&self, id: &str) -> BuildParams {
        self.owned_params(id, format!("{}-vpc", self.scope.name()), COMMON_ROLE)
    }
}
