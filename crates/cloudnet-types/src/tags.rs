//! Resource tags and the canonical tag set built for owned resources.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag key carrying the display name of a resource.
pub const NAME_TAG: &str = "Name";

/// Prefix of the ownership tag written on every resource this system creates.
pub const PROVIDER_CLUSTER_PREFIX: &str = "sigs.k8s.io/cluster-api-provider-aws/cluster/";

/// Tag key carrying the role of a resource.
pub const PROVIDER_ROLE_TAG: &str = "sigs.k8s.io/cluster-api-provider-aws/role";

/// Prefix of the tag the in-cluster cloud provider uses to discover subnets.
pub const KUBERNETES_CLUSTER_PREFIX: &str = "kubernetes.io/cluster/";

/// Subnet tag marking public subnets as usable for external load balancers.
pub const EXTERNAL_LOAD_BALANCER_TAG: &str = "kubernetes.io/role/elb";

/// Subnet tag marking private subnets as usable for internal load balancers.
pub const INTERNAL_LOAD_BALANCER_TAG: &str = "kubernetes.io/role/internal-elb";

/// Reserved key prefix; such tags are never written back to the provider.
pub const AWS_RESERVED_PREFIX: &str = "aws:";

/// Role value for public subnets.
pub const PUBLIC_ROLE: &str = "public";
/// Role value for private subnets.
pub const PRIVATE_ROLE: &str = "private";
/// Role value for shared infrastructure (VPC, gateways, route tables).
pub const COMMON_ROLE: &str = "common";

const MAX_KEY_LEN: usize = 128;
const MAX_VALUE_LEN: usize = 256;

static TAG_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z_.:/=+\-@ ]*$").expect("Invalid regex pattern"));

/// Returns the ownership tag key for a cluster.
pub fn cluster_tag_key(cluster_name: &str) -> String {
    format!("{}{}", PROVIDER_CLUSTER_PREFIX, cluster_name)
}

/// Lifecycle of a resource relative to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceLifecycle {
    /// Created and deleted by this cluster.
    Owned,
    /// Used by this cluster but managed elsewhere.
    Shared,
}

impl ResourceLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceLifecycle::Owned => "owned",
            ResourceLifecycle::Shared => "shared",
        }
    }
}

impl fmt::Display for ResourceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failure for a single tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("key cannot be empty")]
    EmptyKey,

    #[error("key cannot be longer than 128 characters: {key}")]
    KeyTooLong { key: String },

    #[error("value cannot be longer than 256 characters: {key}")]
    ValueTooLong { key: String },

    #[error("user created tag's key cannot have prefix aws: {key}")]
    ReservedPrefix { key: String },

    #[error("key cannot have characters other than alphabets, numbers, spaces and _ . : / = + - @ .: {key}")]
    InvalidKeyCharacters { key: String },

    #[error("value cannot have characters other than alphabets, numbers, spaces and _ . : / = + - @ .: {key}")]
    InvalidValueCharacters { key: String },
}

/// An ordered map of tag keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    /// Creates an empty tag map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if the cluster ownership tag is present with value `owned`.
    pub fn has_owned(&self, cluster_name: &str) -> bool {
        self.get(&cluster_tag_key(cluster_name)) == Some(ResourceLifecycle::Owned.as_str())
    }

    /// Returns the role tag value, if any.
    pub fn role(&self) -> Option<&str> {
        self.get(PROVIDER_ROLE_TAG)
    }

    /// Returns the tags in `self` that are missing from `other` or carry a
    /// different value there.
    ///
    /// Keys present only in `other` are ignored, so tags added by third
    /// parties never show up in the result.
    pub fn difference(&self, other: &Tags) -> Tags {
        self.0
            .iter()
            .filter(|(k, v)| other.0.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Merges `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: &Tags) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Returns a copy without keys using the reserved `aws:` prefix.
    pub fn without_reserved(&self) -> Tags {
        self.0
            .iter()
            .filter(|(k, _)| !k.starts_with(AWS_RESERVED_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Checks user-supplied tags against provider tag rules.
    ///
    /// Returns every violation, in key order.
    pub fn validate(&self) -> Vec<TagError> {
        let mut errors = Vec::new();
        for (key, value) in &self.0 {
            if key.is_empty() {
                errors.push(TagError::EmptyKey);
                continue;
            }
            if key.chars().count() > MAX_KEY_LEN {
                errors.push(TagError::KeyTooLong { key: key.clone() });
            }
            if value.chars().count() > MAX_VALUE_LEN {
                errors.push(TagError::ValueTooLong { key: key.clone() });
            }
            if key.starts_with(AWS_RESERVED_PREFIX) {
                errors.push(TagError::ReservedPrefix { key: key.clone() });
            }
            if !TAG_CHARSET.is_match(key) {
                errors.push(TagError::InvalidKeyCharacters { key: key.clone() });
            }
            if !TAG_CHARSET.is_match(value) {
                errors.push(TagError::InvalidValueCharacters { key: key.clone() });
            }
        }
        errors
    }

    /// Builds the canonical tag set for a resource.
    ///
    /// Additional tags go in first; the ownership, role and name tags are
    /// written over them.
    pub fn build(params: &BuildParams) -> Tags {
        let mut tags = params.additional.clone();
        tags.insert(
            cluster_tag_key(&params.cluster_name),
            params.lifecycle.as_str(),
        );
        if let Some(role) = &params.role {
            tags.insert(PROVIDER_ROLE_TAG, role.clone());
        }
        if let Some(name) = &params.name {
            tags.insert(NAME_TAG, name.clone());
        }
        tags
    }
}

impl FromIterator<(String, String)> for Tags {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Tags(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Tags {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Tags(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl IntoIterator for Tags {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Inputs for [`Tags::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildParams {
    pub cluster_name: String,
    /// Provider id of the resource being tagged.
    pub resource_id: String,
    pub lifecycle: ResourceLifecycle,
    pub name: Option<String>,
    pub role: Option<String>,
    pub additional: Tags,
}

impl BuildParams {
    /// Creates params for a resource owned by `cluster_name`.
    pub fn owned(cluster_name: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            resource_id: resource_id.into(),
            lifecycle: ResourceLifecycle::Owned,
            name: None,
            role: None,
            additional: Tags::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_additional(mut self, additional: Tags) -> Self {
        self.additional = additional;
        self
    }

    /// Returns the canonical tag set for these params.
    pub fn build(&self) -> Tags {
        Tags::build(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_build_overrides_additional() {
        let params = BuildParams::owned("test", "vpc-1")
            .with_name("test-vpc")
            .with_role(COMMON_ROLE)
            .with_additional(tags(&[("team", "net"), (NAME_TAG, "user-name")]));

        let built = params.build();
        assert_eq!(
            built,
            tags(&[
                ("team", "net"),
                (NAME_TAG, "test-vpc"),
                ("sigs.k8s.io/cluster-api-provider-aws/cluster/test", "owned"),
                (PROVIDER_ROLE_TAG, COMMON_ROLE),
            ])
        );
    }

    #[test]
    fn test_build_without_name_or_role() {
        let built = BuildParams::owned("test", "eip-1").build();
        assert_eq!(built.len(), 1);
        assert!(built.has_owned("test"));
        assert_eq!(built.role(), None);
    }

    #[test]
    fn test_difference_ignores_extra_current_tags() {
        let want = tags(&[("a", "1"), ("b", "2")]);
        let current = tags(&[("a", "1"), ("b", "2"), ("external", "x")]);
        assert!(want.difference(&current).is_empty());
    }

    #[test]
    fn test_difference_reports_changed_and_missing() {
        let want = tags(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let current = tags(&[("a", "1"), ("b", "old")]);
        assert_eq!(want.difference(&current), tags(&[("b", "2"), ("c", "3")]));
    }

    #[test]
    fn test_merge_other_wins() {
        let mut base = tags(&[("a", "1"), ("b", "2")]);
        base.merge(&tags(&[("b", "3"), ("c", "4")]));
        assert_eq!(base, tags(&[("a", "1"), ("b", "3"), ("c", "4")]));
    }

    #[test]
    fn test_has_owned() {
        let owned = tags(&[(cluster_tag_key("c1").as_str(), "owned")]);
        assert!(owned.has_owned("c1"));
        assert!(!owned.has_owned("c2"));

        let shared = tags(&[(cluster_tag_key("c1").as_str(), "shared")]);
        assert!(!shared.has_owned("c1"));
    }

    #[test]
    fn test_without_reserved() {
        let t = tags(&[("aws:cloudformation:stack", "x"), ("keep", "y")]);
        assert_eq!(t.without_reserved(), tags(&[("keep", "y")]));
    }

    #[test]
    fn test_validate_accepts_allowed_characters() {
        let t = tags(&[("key_1.a:b/c=d+e-f@g h", "value 1/2")]);
        assert_eq!(t.validate(), vec![]);
    }

    #[test]
    fn test_validate_rejects() {
        let long_key = "k".repeat(129);
        let long_value = "v".repeat(257);
        let t = tags(&[
            ("", "empty"),
            ("aws:reserved", "x"),
            ("bad*key", "ok"),
            ("good", "bad#value"),
            (long_key.as_str(), "x"),
            ("long", long_value.as_str()),
        ]);

        let errors = t.validate();
        assert_eq!(
            errors,
            vec![
                TagError::EmptyKey,
                TagError::ReservedPrefix {
                    key: "aws:reserved".to_string()
                },
                TagError::InvalidKeyCharacters {
                    key: "bad*key".to_string()
                },
                TagError::InvalidValueCharacters {
                    key: "good".to_string()
                },
                TagError::KeyTooLong {
                    key: long_key.clone()
                },
                TagError::ValueTooLong {
                    key: "long".to_string()
                },
            ]
        );
    }
}
