//! Cluster scope: the state accessor the network service works against.

use crate::conditions::{ConditionType, Conditions, Severity};
use async_trait::async_trait;
use cloudnet_types::{NetworkSpec, Subnets, Tags, VpcSpec};

/// Errors raised by a scope while persisting state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("failed to patch {kind} {namespace}/{name}: {message}")]
    Patch {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },
}

impl ScopeError {
    pub fn patch(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Patch {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Mutable view of one cluster's network state.
///
/// The service reads the desired network from here, writes observed state
/// back and calls [`patch_object`](NetworkScope::patch_object) to persist it.
#[async_trait]
pub trait NetworkScope: Send + Sync {
    /// Cluster name; used in tag keys and resource names.
    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    fn region(&self) -> &str;

    fn network(&self) -> &NetworkSpec;

    fn network_mut(&mut self) -> &mut NetworkSpec;

    /// Tags added to every resource created for the cluster.
    fn additional_tags(&self) -> Tags;

    fn conditions(&self) -> &Conditions;

    fn conditions_mut(&mut self) -> &mut Conditions;

    /// Persists the current state.
    async fn patch_object(&mut self) -> Result<(), ScopeError>;

    fn vpc(&self) -> &VpcSpec {
        &self.network().vpc
    }

    fn vpc_mut(&mut self) -> &mut VpcSpec {
        &mut self.network_mut().vpc
    }

    fn subnets(&self) -> &Subnets {
        &self.network().subnets
    }

    fn set_subnets(&mut self, subnets: Subnets) {
        self.network_mut().subnets = subnets;
    }

    fn secondary_cidr_block(&self) -> Option<&str> {
        self.network().secondary_cidr_block.as_deref()
    }

    fn mark_true(&mut self, condition_type: ConditionType) {
        self.conditions_mut().mark_true(condition_type);
    }

    fn mark_false(
        &mut self,
        condition_type: ConditionType,
        reason: &str,
        severity: Severity,
        message: &str,
    ) {
        self.conditions_mut()
            .mark_false(condition_type, reason, severity, message);
    }

    fn has_condition(&self, condition_type: ConditionType) -> bool {
        self.conditions().has(condition_type)
    }
}
