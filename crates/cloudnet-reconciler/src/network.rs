//! Network orchestration.
//!
//! `reconcile_network` runs the resource reconcilers in dependency order and
//! stops at the first failure. `delete_network` tears the topology down in
//! reverse, persisting a `Deleting` condition before every stage so an
//! interrupted delete is visible on the cluster.

use crate::error::{NetworkError, NetworkResult};
use crate::service::NetworkService;
use cloudnet_common::{ConditionType, NetworkScope, Severity};
use cloudnet_ec2::Ec2Api;
use tracing::{debug, instrument, warn};

/// Condition reason while a stage is being deleted.
pub const DELETING_REASON: &str = "Deleting";
/// Condition reason after a stage failed to delete.
pub const DELETING_FAILED_REASON: &str = "DeletingFailed";
/// Condition reason after a stage was deleted.
pub const DELETED_REASON: &str = "Deleted";

/// Reconcile steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStage {
    Vpc,
    SecondaryCidr,
    Subnets,
    InternetGateway,
    CarrierGateway,
    EgressOnlyInternetGateway,
    NatGateways,
    RouteTables,
}

impl ReconcileStage {
    pub const ALL: [ReconcileStage; 8] = [
        ReconcileStage::Vpc,
        ReconcileStage::SecondaryCidr,
        ReconcileStage::Subnets,
        ReconcileStage::InternetGateway,
        ReconcileStage::CarrierGateway,
        ReconcileStage::EgressOnlyInternetGateway,
        ReconcileStage::NatGateways,
        ReconcileStage::RouteTables,
    ];

    pub fn condition(&self) -> ConditionType {
        match self {
            ReconcileStage::Vpc => ConditionType::VpcReady,
            ReconcileStage::SecondaryCidr => ConditionType::SecondaryCidrsReady,
            ReconcileStage::Subnets => ConditionType::SubnetsReady,
            ReconcileStage::InternetGateway => ConditionType::InternetGatewayReady,
            ReconcileStage::CarrierGateway => ConditionType::CarrierGatewayReady,
            ReconcileStage::EgressOnlyInternetGateway => {
                ConditionType::EgressOnlyInternetGatewayReady
            }
            ReconcileStage::NatGateways => ConditionType::NatGatewaysReady,
            ReconcileStage::RouteTables => ConditionType::RouteTablesReady,
        }
    }

    /// Reason recorded on the stage condition when the stage fails.
    pub fn failure_reason(&self) -> &'static str {
        match self {
            ReconcileStage::Vpc => "VpcReconciliationFailed",
            ReconcileStage::SecondaryCidr => "SecondaryCidrReconciliationFailed",
            ReconcileStage::Subnets => "SubnetsReconciliationFailed",
            ReconcileStage::InternetGateway => "InternetGatewayReconciliationFailed",
            ReconcileStage::CarrierGateway => "CarrierGatewayReconciliationFailed",
            ReconcileStage::EgressOnlyInternetGateway => {
                "EgressOnlyInternetGatewayReconciliationFailed"
            }
            ReconcileStage::NatGateways => "NatGatewaysReconciliationFailed",
            ReconcileStage::RouteTables => "RouteTablesReconciliationFailed",
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            ReconcileStage::Vpc => "reconcile vpc",
            ReconcileStage::SecondaryCidr => "associate secondary cidr",
            ReconcileStage::Subnets => "reconcile subnets",
            ReconcileStage::InternetGateway => "reconcile internet gateways",
            ReconcileStage::CarrierGateway => "reconcile carrier gateway",
            ReconcileStage::EgressOnlyInternetGateway => {
                "reconcile egress only internet gateways"
            }
            ReconcileStage::NatGateways => "reconcile nat gateways",
            ReconcileStage::RouteTables => "reconcile route tables",
        }
    }
}

/// Delete steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStage {
    SecondaryCidr,
    RouteTables,
    NatGateways,
    ElasticIps,
    InternetGateway,
    CarrierGateway,
    EgressOnlyInternetGateway,
    Subnets,
    Vpc,
}

impl DeleteStage {
    pub const ALL: [DeleteStage; 9] = [
        DeleteStage::SecondaryCidr,
        DeleteStage::RouteTables,
        DeleteStage::NatGateways,
        DeleteStage::ElasticIps,
        DeleteStage::InternetGateway,
        DeleteStage::CarrierGateway,
        DeleteStage::EgressOnlyInternetGateway,
        DeleteStage::Subnets,
        DeleteStage::Vpc,
    ];

    /// Condition tracking the stage. Elastic IPs have none.
    pub fn condition(&self) -> Option<ConditionType> {
        match self {
            DeleteStage::SecondaryCidr => Some(ConditionType::SecondaryCidrsReady),
            DeleteStage::RouteTables => Some(ConditionType::RouteTablesReady),
            DeleteStage::NatGateways => Some(ConditionType::NatGatewaysReady),
            DeleteStage::ElasticIps => None,
            DeleteStage::InternetGateway => Some(ConditionType::InternetGatewayReady),
            DeleteStage::CarrierGateway => Some(ConditionType::CarrierGatewayReady),
            DeleteStage::EgressOnlyInternetGateway => {
                Some(ConditionType::EgressOnlyInternetGatewayReady)
            }
            DeleteStage::Subnets => Some(ConditionType::SubnetsReady),
            DeleteStage::Vpc => Some(ConditionType::VpcReady),
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            DeleteStage::SecondaryCidr => "disassociate secondary cidr",
            DeleteStage::RouteTables => "delete route tables",
            DeleteStage::NatGateways => "delete nat gateways",
            DeleteStage::ElasticIps => "release elastic ips",
            DeleteStage::InternetGateway => "delete internet gateways",
            DeleteStage::CarrierGateway => "delete carrier gateway",
            DeleteStage::EgressOnlyInternetGateway => "delete egress only internet gateways",
            DeleteStage::Subnets => "delete subnets",
            DeleteStage::Vpc => "delete vpc",
        }
    }
}

impl<S, C> NetworkService<'_, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Converges the whole network of the cluster.
    ///
    /// Each stage marks its condition true on success. The first failing
    /// stage marks its condition false with the error text and ends the
    /// pass; there is no rollback of what earlier stages created.
    #[instrument(skip(self), fields(namespace = %self.scope.namespace(), cluster = %self.scope.name()))]
    pub async fn reconcile_network(&mut self) -> NetworkResult<()> {
        debug!("Reconciling network for cluster");

        let errors = self.scope.additional_tags().validate();
        if !errors.is_empty() {
            return Err(NetworkError::InvalidTags { errors });
        }

        for stage in ReconcileStage::ALL {
            if let Err(e) = self.run_reconcile_stage(stage).await {
                warn!(stage = ?stage, error = %e, "Network reconcile stage failed");
                self.scope.mark_false(
                    stage.condition(),
                    stage.failure_reason(),
                    Severity::Error,
                    &e.to_string(),
                );
                return Err(NetworkError::stage(stage.operation(), e));
            }
            self.scope.mark_true(stage.condition());
        }

        debug!("Reconcile network completed successfully");
        Ok(())
    }

    /// Deletes the network of the cluster.
    ///
    /// A VPC that no longer exists means there is nothing to delete.
    #[instrument(skip(self), fields(namespace = %self.scope.namespace(), cluster = %self.scope.name()))]
    pub async fn delete_network(&mut self) -> NetworkResult<()> {
        debug!("Deleting network");

        // Without a recorded id the VPC is looked up by cluster tag.
        let by_tag = self.scope.vpc().id.is_empty();
        match self.describe_vpc().await {
            Ok(observed) => {
                if by_tag {
                    debug!(vpc_id = %observed.id, "Found VPC by cluster tag");
                }
                self.apply_observed_vpc(observed);
            }
            Err(e) if e.is_not_found() && by_tag => {
                warn!("VPC id is missing, deleting what can be found by cluster tag");
            }
            Err(e) if e.is_not_found() => {
                debug!(vpc_id = %self.scope.vpc().id, "VPC not found, nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        for stage in DeleteStage::ALL {
            let condition = stage.condition();
            if let Some(condition) = condition {
                self.scope
                    .mark_false(condition, DELETING_REASON, Severity::Info, "");
                self.scope.patch_object().await?;
            }

            if let Err(e) = self.run_delete_stage(stage).await {
                warn!(stage = ?stage, error = %e, "Network delete stage failed");
                if let Some(condition) = condition {
                    self.scope.mark_false(
                        condition,
                        DELETING_FAILED_REASON,
                        Severity::Warning,
                        &e.to_string(),
                    );
                }
                return Err(NetworkError::stage(stage.operation(), e));
            }

            if let Some(condition) = condition {
                self.scope
                    .mark_false(condition, DELETED_REASON, Severity::Info, "");
            }
        }

        debug!("Delete network completed successfully");
        Ok(())
    }

    async fn run_reconcile_stage(&mut self, stage: ReconcileStage) -> NetworkResult<()> {
        match stage {
            ReconcileStage::Vpc => self.reconcile_vpc().await,
            ReconcileStage::SecondaryCidr => self.associate_secondary_cidr().await,
            ReconcileStage::Subnets => self.reconcile_subnets().await,
            ReconcileStage::InternetGateway => self.reconcile_internet_gateways().await,
            ReconcileStage::CarrierGateway => self.reconcile_carrier_gateway().await,
            ReconcileStage::EgressOnlyInternetGateway => {
                self.reconcile_egress_only_internet_gateways().await
            }
            ReconcileStage::NatGateways => self.reconcile_nat_gateways().await,
            ReconcileStage::RouteTables => self.reconcile_route_tables().await,
        }
    }

    async fn run_delete_stage(&self, stage: DeleteStage) -> NetworkResult<()> {
        match stage {
            DeleteStage::SecondaryCidr => self.disassociate_secondary_cidr().await,
            DeleteStage::RouteTables => self.delete_route_tables().await,
            DeleteStage::NatGateways => self.delete_nat_gateways().await,
            DeleteStage::ElasticIps => self.release_addresses().await,
            DeleteStage::InternetGateway => self.delete_internet_gateways().await,
            DeleteStage::CarrierGateway => self.delete_carrier_gateway().await,
            DeleteStage::EgressOnlyInternetGateway => {
                self.delete_egress_only_internet_gateways().await
            }
            DeleteStage::Subnets => self.delete_subnets().await,
            DeleteStage::Vpc => self.delete_vpc().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reconcile_stage_conditions_are_distinct() {
        let mut conditions: Vec<ConditionType> =
            ReconcileStage::ALL.iter().map(|s| s.condition()).collect();
        conditions.sort();
        conditions.dedup();
        assert_eq!(conditions.len(), ReconcileStage::ALL.len());
    }

    #[test]
    fn test_failure_reasons() {
        assert_eq!(ReconcileStage::Vpc.failure_reason(), "VpcReconciliationFailed");
        assert_eq!(
            ReconcileStage::RouteTables.failure_reason(),
            "RouteTablesReconciliationFailed"
        );
        assert!(ReconcileStage::ALL
            .iter()
            .all(|s| s.failure_reason().ends_with("ReconciliationFailed")));
    }

    #[test]
    fn test_delete_runs_dependents_first() {
        let position = |stage: DeleteStage| {
            DeleteStage::ALL
                .iter()
                .position(|s| *s == stage)
                .unwrap_or(usize::MAX)
        };
        assert!(position(DeleteStage::RouteTables) < position(DeleteStage::NatGateways));
        assert!(position(DeleteStage::NatGateways) < position(DeleteStage::ElasticIps));
        assert!(position(DeleteStage::NatGateways) < position(DeleteStage::Subnets));
        assert!(position(DeleteStage::InternetGateway) < position(DeleteStage::Vpc));
        assert_eq!(DeleteStage::ALL.last(), Some(&DeleteStage::Vpc));
        assert_eq!(DeleteStage::ElasticIps.condition(), None);
    }

    #[test]
    fn test_stage_error_display() {
        let err = NetworkError::stage(
            ReconcileStage::Subnets.operation(),
            NetworkError::invalid_spec("expected at least 1 private subnet but got 0"),
        );
        assert_eq!(
            err.to_string(),
            "failed to reconcile subnets: expected at least 1 private subnet but got 0"
        );
    }
}
