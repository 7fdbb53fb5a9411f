//! In-memory cluster scope.

use async_trait::async_trait;
use cloudnet_common::{Conditions, NetworkScope, ScopeError};
use cloudnet_types::{NetworkSpec, Tags};
use tracing::debug;

/// A [`NetworkScope`] that keeps the cluster object in memory and counts
/// patches instead of writing them anywhere.
#[derive(Debug, Clone, Default)]
pub struct MemoryScope {
    pub name: String,
    pub namespace: String,
    pub region: String,
    pub network: NetworkSpec,
    pub additional_tags: Tags,
    pub conditions: Conditions,
    /// Number of successful patches.
    pub patches: usize,
    /// Makes every patch fail.
    pub fail_patch: bool,
}

impl MemoryScope {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: "default".to_string(),
            region: "us-east-1".to_string(),
            ..Default::default()
        }
    }

    pub fn with_network(mut self, network: NetworkSpec) -> Self {
        self.network = network;
        self
    }

    pub fn with_additional_tags(mut self, tags: Tags) -> Self {
        self.additional_tags = tags;
        self
    }
}

#[async_trait]
impl NetworkScope for MemoryScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn network(&self) -> &NetworkSpec {
        &self.network
    }

    fn network_mut(&mut self) -> &mut NetworkSpec {
        &mut self.network
    }

    fn additional_tags(&self) -> Tags {
        self.additional_tags.clone()
    }

    fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.conditions
    }

    async fn patch_object(&mut self) -> Result<(), ScopeError> {
        if self.fail_patch {
            return Err(ScopeError::patch(
                "Cluster",
                self.namespace.as_str(),
                self.name.as_str(),
                "injected patch failure",
            ));
        }
        self.patches += 1;
        debug!(cluster = %self.name, patches = self.patches, "Patched cluster object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_common::{ConditionType, Severity};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_patch_counts_and_fails_on_demand() {
        let mut scope = MemoryScope::new("test");
        scope.patch_object().await.unwrap();
        assert_eq!(scope.patches, 1);

        scope.fail_patch = true;
        let err = scope.patch_object().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to patch Cluster default/test: injected patch failure"
        );
        assert_eq!(scope.patches, 1);
    }

    #[test]
    fn test_conditions_through_trait() {
        let mut scope = MemoryScope::new("test");
        scope.mark_false(ConditionType::SubnetsReady, "Deleting", Severity::Info, "");
        assert!(scope.has_condition(ConditionType::SubnetsReady));
        assert_eq!(
            scope.conditions.reason(ConditionType::SubnetsReady),
            Some("Deleting")
        );
    }
}
