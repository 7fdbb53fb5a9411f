//! Shared fixtures for reconciler tests.

use cloudnet_common::Backoff;
use cloudnet_types::{cluster_tag_key, ResourceLifecycle, SubnetSpec, Tags};
use once_cell::sync::Lazy;

static INIT_LOGGING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

/// Installs a test-writer subscriber once per process. Honors `RUST_LOG`.
pub fn init_test_logging() {
    Lazy::force(&INIT_LOGGING);
}

/// Backoff that retries `steps` times without sleeping.
pub fn fast_backoff(steps: u32) -> Backoff {
    Backoff::immediate(steps)
}

/// Tags marking a resource as owned by `cluster`.
pub fn owned_tags(cluster: &str) -> Tags {
    Tags::new().with(cluster_tag_key(cluster), ResourceLifecycle::Owned.as_str())
}

pub fn public_subnet(cidr_block: &str, zone: &str) -> SubnetSpec {
    SubnetSpec::new(cidr_block, zone, true)
}

pub fn private_subnet(cidr_block: &str, zone: &str) -> SubnetSpec {
    SubnetSpec::new(cidr_block, zone, false)
}
