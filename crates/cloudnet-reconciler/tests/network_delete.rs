//! Network delete integration tests
//!
//! Builds a network with a reconcile pass, then tears it down and checks the
//! order of provider calls, the conditions left on the scope and how failed
//! stages stop the delete.

use cloudnet_common::ConditionType;
use cloudnet_ec2::{codes, CloudError};
use cloudnet_reconciler::{NetworkConfig, NetworkResult, NetworkService};
use cloudnet_test::{
    fast_backoff, init_test_logging, owned_tags, private_subnet, public_subnet, FakeEc2,
    MemoryScope, Operation,
};
use cloudnet_types::{NetworkSpec, Subnets, Tags};
use pretty_assertions::assert_eq;

const CLUSTER: &str = "test-cluster";

fn config() -> NetworkConfig {
    NetworkConfig {
        backoff: fast_backoff(3),
        ..Default::default()
    }
}

async fn reconcile(scope: &mut MemoryScope, ec2: &FakeEc2) -> NetworkResult<()> {
    NetworkService::new(scope, ec2)
        .with_config(config())
        .reconcile_network()
        .await
}

async fn delete(scope: &mut MemoryScope, ec2: &FakeEc2) -> NetworkResult<()> {
    NetworkService::new(scope, ec2)
        .with_config(config())
        .delete_network()
        .await
}

/// A converged single-zone network, with the call log cleared.
async fn converged() -> (MemoryScope, FakeEc2) {
    let ec2 = FakeEc2::with_zones(&["us-east-1a", "us-east-1b"]);
    let mut scope = MemoryScope::new(CLUSTER).with_network(NetworkSpec {
        subnets: Subnets::from(vec![
            public_subnet("10.0.0.0/24", "us-east-1a"),
            private_subnet("10.0.10.0/24", "us-east-1a"),
        ]),
        ..Default::default()
    });
    reconcile(&mut scope, &ec2).await.expect("reconcile failed");
    ec2.clear_calls();
    scope.patches = 0;
    (scope, ec2)
}

/// Full teardown of a managed network
///
/// Scenario:
/// 1. Converge a network with one public and one private subnet
/// 2. Delete it
/// 3. Verify dependents go before the resources they depend on
/// 4. Verify nothing is left in the region
#[tokio::test]
async fn test_delete_removes_everything_in_dependency_order() {
    init_test_logging();
    let (mut scope, ec2) = converged().await;

    delete(&mut scope, &ec2).await.expect("delete failed");

    assert_eq!(
        ec2.mutating_operations(),
        vec![
            Operation::DisassociateRouteTable,
            Operation::DeleteRouteTable,
            Operation::DisassociateRouteTable,
            Operation::DeleteRouteTable,
            Operation::DeleteNatGateway,
            Operation::ReleaseAddress,
            Operation::DetachInternetGateway,
            Operation::DeleteInternetGateway,
            Operation::DeleteSubnet,
            Operation::DeleteSubnet,
            Operation::DeleteVpc,
        ]
    );

    let state = ec2.state();
    assert!(state.vpcs.is_empty());
    assert!(state.subnets.is_empty());
    assert!(state.route_tables.is_empty());
    assert!(state.internet_gateways.is_empty());
    assert!(state.addresses.is_empty());
    assert_eq!(state.live_nat_gateways().count(), 0);
}

/// Every stage with a condition is persisted as deleting before it runs
#[tokio::test]
async fn test_delete_patches_before_each_stage() {
    init_test_logging();
    let (mut scope, ec2) = converged().await;

    delete(&mut scope, &ec2).await.expect("delete failed");

    assert_eq!(scope.patches, 8);
    for condition in [
        ConditionType::VpcReady,
        ConditionType::SubnetsReady,
        ConditionType::InternetGatewayReady,
        ConditionType::NatGatewaysReady,
        ConditionType::RouteTablesReady,
        ConditionType::SecondaryCidrsReady,
    ] {
        assert!(scope.conditions.is_false(condition), "{} not false", condition);
        assert_eq!(scope.conditions.reason(condition), Some("Deleted"));
    }
}

/// A failed patch stops the delete before anything is removed
#[tokio::test]
async fn test_delete_stops_when_patch_fails() {
    init_test_logging();
    let (mut scope, ec2) = converged().await;
    scope.fail_patch = true;

    let err = delete(&mut scope, &ec2).await.unwrap_err();

    assert!(err.to_string().contains("injected patch failure"));
    assert_eq!(ec2.mutating_operations(), Vec::<Operation>::new());
}

/// A second delete after a completed one is a no-op
#[tokio::test]
async fn test_delete_of_deleted_network_is_noop() {
    init_test_logging();
    let (mut scope, ec2) = converged().await;
    delete(&mut scope, &ec2).await.expect("first delete failed");
    ec2.clear_calls();
    scope.patches = 0;

    delete(&mut scope, &ec2).await.expect("second delete failed");

    assert_eq!(ec2.mutating_operations(), Vec::<Operation>::new());
    assert_eq!(scope.patches, 0);
}

/// Address release retries while the provider still sees the address in use
#[tokio::test]
async fn test_release_retries_in_use_address() {
    init_test_logging();
    let (mut scope, ec2) = converged().await;
    ec2.fail_next(
        Operation::ReleaseAddress,
        CloudError::sdk(codes::IN_USE_IP_ADDRESS, "address is in use"),
    );

    delete(&mut scope, &ec2).await.expect("delete failed");

    assert_eq!(ec2.count(Operation::ReleaseAddress), 2);
    assert!(ec2.state().addresses.is_empty());
}

/// Any other release error stops the delete before subnets are touched
#[tokio::test]
async fn test_release_failure_stops_delete() {
    init_test_logging();
    let (mut scope, ec2) = converged().await;
    ec2.fail_next(
        Operation::ReleaseAddress,
        CloudError::sdk(codes::INVALID_PARAMETER_VALUE, "bad allocation"),
    );

    let err = delete(&mut scope, &ec2).await.unwrap_err();

    assert!(err
        .to_string()
        .starts_with("failed to release elastic ips: failed to release ElasticIP"));
    assert_eq!(ec2.count(Operation::ReleaseAddress), 1);
    assert_eq!(ec2.count(Operation::DeleteInternetGateway), 0);
    assert_eq!(ec2.count(Operation::DeleteSubnet), 0);
    assert_eq!(ec2.state().vpcs.len(), 1);
}

/// A failed stage leaves its condition as deleting failed
#[tokio::test]
async fn test_failed_stage_marks_deleting_failed() {
    init_test_logging();
    let (mut scope, ec2) = converged().await;
    ec2.fail_next(
        Operation::DeleteSubnet,
        CloudError::sdk(codes::DEPENDENCY_VIOLATION, "subnet has dependencies"),
    );

    let err = delete(&mut scope, &ec2).await.unwrap_err();

    assert!(err.to_string().starts_with("failed to delete subnets:"));
    assert_eq!(
        scope.conditions.reason(ConditionType::SubnetsReady),
        Some("DeletingFailed")
    );
    assert_eq!(
        scope.conditions.reason(ConditionType::InternetGatewayReady),
        Some("Deleted")
    );
    assert!(scope.conditions.is_true(ConditionType::VpcReady));
    assert_eq!(ec2.count(Operation::DeleteVpc), 0);
}

/// A VPC that is already gone means there is nothing to delete
#[tokio::test]
async fn test_delete_when_vpc_already_gone() {
    init_test_logging();
    let ec2 = FakeEc2::with_zones(&["us-east-1a"]);
    let mut scope = MemoryScope::new(CLUSTER);
    scope.network.vpc.id = "vpc-0000dead".to_string();
    scope.network.vpc.tags = owned_tags(CLUSTER);

    delete(&mut scope, &ec2).await.expect("delete failed");

    assert_eq!(ec2.mutating_operations(), Vec::<Operation>::new());
    assert_eq!(scope.patches, 0);
}

/// A VPC whose id was never recorded is found by cluster tag
///
/// Scenario:
/// 1. Seed an owned VPC and subnet without recording the VPC id
/// 2. Delete the network
/// 3. Verify the VPC id is recovered and both resources are removed
#[tokio::test]
async fn test_delete_finds_vpc_by_cluster_tag() {
    init_test_logging();
    let ec2 = FakeEc2::with_zones(&["us-east-1a"]);
    let vpc_id = {
        let mut state = ec2.state();
        let vpc_id = state.insert_vpc("10.30.0.0/16", owned_tags(CLUSTER));
        state.insert_subnet(&vpc_id, "10.30.0.0/24", "us-east-1a", owned_tags(CLUSTER));
        vpc_id
    };
    let mut scope = MemoryScope::new(CLUSTER);

    delete(&mut scope, &ec2).await.expect("delete failed");

    assert_eq!(scope.network.vpc.id, vpc_id);
    assert_eq!(ec2.count(Operation::DeleteSubnet), 1);
    assert_eq!(ec2.count(Operation::DeleteVpc), 1);
    let state = ec2.state();
    assert!(state.vpcs.is_empty());
    assert!(state.subnets.is_empty());
}

/// Nothing in a user-supplied VPC is removed
#[tokio::test]
async fn test_delete_leaves_unmanaged_vpc_alone() {
    init_test_logging();
    let ec2 = FakeEc2::with_zones(&["us-east-1a"]);
    let vpc_id = {
        let mut state = ec2.state();
        let vpc_id = state.insert_vpc("10.20.0.0/16", Tags::new());
        state.insert_subnet(&vpc_id, "10.20.0.0/24", "us-east-1a", Tags::new());
        vpc_id
    };
    let mut scope = MemoryScope::new(CLUSTER);
    scope.network.vpc.id = vpc_id;

    delete(&mut scope, &ec2).await.expect("delete failed");

    assert_eq!(ec2.mutating_operations(), Vec::<Operation>::new());
    let state = ec2.state();
    assert_eq!(state.vpcs.len(), 1);
    assert_eq!(state.subnets.len(), 1);
}

/// The secondary block is removed first
#[tokio::test]
async fn test_delete_disassociates_secondary_cidr() {
    init_test_logging();
    let ec2 = FakeEc2::with_zones(&["us-east-1a"]);
    let mut scope = MemoryScope::new(CLUSTER);
    scope.network.secondary_cidr_block = Some("100.64.0.0/16".to_string());
    reconcile(&mut scope, &ec2).await.expect("reconcile failed");
    ec2.clear_calls();

    delete(&mut scope, &ec2).await.expect("delete failed");

    let mutating = ec2.mutating_operations();
    assert_eq!(mutating.first(), Some(&Operation::DisassociateVpcCidrBlock));
    assert_eq!(ec2.count(Operation::DisassociateVpcCidrBlock), 1);
    assert_eq!(mutating.last(), Some(&Operation::DeleteVpc));
}

/// An egress-only gateway goes before the subnets and the VPC
#[tokio::test]
async fn test_delete_removes_egress_only_gateway() {
    init_test_logging();
    let ec2 = FakeEc2::with_zones(&["us-east-1a"]);
    let mut scope = MemoryScope::new(CLUSTER);
    scope.network.vpc.ipv6 = Some(Default::default());
    reconcile(&mut scope, &ec2).await.expect("reconcile failed");
    ec2.clear_calls();

    delete(&mut scope, &ec2).await.expect("delete failed");

    let mutating = ec2.mutating_operations();
    let position = |op: Operation| mutating.iter().position(|o| *o == op);
    assert!(position(Operation::DeleteEgressOnlyInternetGateway) < position(Operation::DeleteSubnet));
    assert!(ec2.state().egress_only_internet_gateways.is_empty());
    assert!(ec2.state().vpcs.is_empty());
}
