//! Tag reconciliation for provider resources.
//!
//! The desired tag set of a resource is [`BuildParams::build`]; only keys in
//! that set are compared, so tags added by other tools never trigger a
//! re-tag.

use cloudnet_ec2::{CloudResult, Ec2Api};
use cloudnet_types::{BuildParams, Tags};
use tracing::debug;

/// Tags that have to be written for `current` to match `params`.
pub fn compute_diff(params: &BuildParams, current: &Tags) -> Tags {
    params.build().difference(current)
}

/// Writes the full tag set of `params` to the resource.
///
/// Reserved `aws:` keys are never sent.
pub async fn apply_tags<C>(ec2: &C, params: &BuildParams) -> CloudResult<()>
where
    C: Ec2Api + ?Sized,
{
    let tags = params.build().without_reserved();
    ec2.create_tags(&params.resource_id, &tags).await
}

/// Applies tags only when the desired set differs from `current`.
pub async fn ensure_tags<C>(ec2: &C, params: &BuildParams, current: &Tags) -> CloudResult<()>
where
    C: Ec2Api + ?Sized,
{
    let diff = compute_diff(params, current);
    if diff.is_empty() {
        return Ok(());
    }
    debug!(
        resource_id = %params.resource_id,
        changed = diff.len(),
        "Updating resource tags"
    );
    apply_tags(ec2, params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_types::{cluster_tag_key, COMMON_ROLE, NAME_TAG, PROVIDER_ROLE_TAG};
    use pretty_assertions::assert_eq;

    fn params() -> BuildParams {
        BuildParams::owned("test", "igw-1")
            .with_name("test-igw")
            .with_role(COMMON_ROLE)
    }

    #[test]
    fn test_diff_empty_when_current_is_superset() {
        let mut current = params().build();
        current.insert("owner", "someone-else");
        assert!(compute_diff(&params(), &current).is_empty());
    }

    #[test]
    fn test_diff_lists_stale_values() {
        let current = Tags::new()
            .with(cluster_tag_key("test"), "owned")
            .with(NAME_TAG, "old-name");
        assert_eq!(
            compute_diff(&params(), &current),
            Tags::new()
                .with(NAME_TAG, "test-igw")
                .with(PROVIDER_ROLE_TAG, COMMON_ROLE)
        );
    }
}
