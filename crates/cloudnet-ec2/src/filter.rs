//! Filters for describe calls.

use cloudnet_types::{cluster_tag_key, ResourceLifecycle, PROVIDER_ROLE_TAG};
use serde::{Deserialize, Serialize};

/// A describe filter: the resource matches if any of its values for `name`
/// is one of `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if any of `candidates` is one of the filter values.
    pub fn matches<S: AsRef<str>>(&self, candidates: &[S]) -> bool {
        candidates
            .iter()
            .any(|c| self.values.iter().any(|v| v == c.as_ref()))
    }
}

/// Resources in the given VPC.
pub fn vpc(vpc_id: &str) -> Filter {
    Filter::new("vpc-id", [vpc_id])
}

/// Gateways attached to the given VPC.
pub fn vpc_attachment(vpc_id: &str) -> Filter {
    Filter::new("attachment.vpc-id", [vpc_id])
}

/// Resources carrying the cluster tag, whatever its value.
pub fn cluster(cluster_name: &str) -> Filter {
    Filter::new("tag-key", [cluster_tag_key(cluster_name)])
}

/// Resources owned by the cluster.
pub fn cluster_owned(cluster_name: &str) -> Filter {
    Filter::new(
        format!("tag:{}", cluster_tag_key(cluster_name)),
        [ResourceLifecycle::Owned.as_str()],
    )
}

/// Resources with the given role tag.
pub fn provider_role(role: &str) -> Filter {
    Filter::new(format!("tag:{}", PROVIDER_ROLE_TAG), [role])
}

/// Resources in one of the given states.
pub fn states<'a>(states: impl IntoIterator<Item = &'a str>) -> Filter {
    Filter::new("state", states)
}

/// Resources that are pending or available.
pub fn pending_or_available() -> Filter {
    states(["pending", "available"])
}

/// Availability zones that are usable and not local or wavelength zones.
pub fn available_zones() -> Vec<Filter> {
    vec![
        states(["available"]),
        Filter::new("zone-type", ["availability-zone"]),
    ]
}
