use crate::config::NetworkConfig;
use cloudnet_common::NetworkScope;
use cloudnet_ec2::Ec2Api;
use cloudnet_types::BuildParams;

/// Reconciles the network of one cluster.
///
/// Holds the scope mutably for the whole pass; provider calls are made one
/// at a time.
pub struct NetworkService<'a, S, C: ?Sized> {
    pub(crate) scope: &'a mut S,
    pub(crate) ec2: &'a C,
    pub(crate) config: NetworkConfig,
}

impl<'a, S, C> NetworkService<'a, S, C>
where
    S: NetworkScope,
    C: Ec2Api + ?Sized,
{
    /// Creates a service with the default configuration.
    pub fn new(scope: &'a mut S, ec2: &'a C) -> Self {
        Self {
            scope,
            ec2,
            config: NetworkConfig::default(),
        }
    }

    pub fn with_config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn scope(&self) -> &S {
        self.scope
    }

    pub(crate) fn cluster_name(&self) -> String {
        self.scope.name().to_string()
    }

    /// True if the VPC was brought by the user. Such networks are only read.
    pub(crate) fn is_unmanaged(&self) -> bool {
        self.scope.vpc().is_unmanaged(self.scope.name())
    }

    /// Tag params for an owned resource with the scope's additional tags.
    pub(crate) fn owned_params(&self, resource_id: &str, name: String, role: &str) -> BuildParams {
        BuildParams::owned(self.scope.name(), resource_id)
            .with_name(name)
            .with_role(role)
            .with_additional(self.scope.additional_tags())
    }
}
