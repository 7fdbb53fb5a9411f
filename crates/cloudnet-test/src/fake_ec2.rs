//! [`Ec2Api`] implementation backed by [`CloudState`].
//!
//! Every call is recorded before it runs, so tests can assert on the exact
//! sequence of provider calls a reconcile pass made. Failures can be queued
//! per operation to exercise retry and error paths.

use crate::cloud::CloudState;
use async_trait::async_trait;
use cloudnet_ec2::{
    Address, AvailabilityZone, CarrierGateway, CloudError, CloudResult, CreateSubnetInput,
    CreateVpcInput, Ec2Api, EgressOnlyInternetGateway, Filter, InternetGateway, NatGateway, Route,
    RouteTable, Subnet, SubnetAttribute, Vpc, VpcAttribute,
};
use cloudnet_types::{Tags, ZoneType};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// One operation of the cloud compute API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    DescribeVpcs,
    CreateVpc,
    DeleteVpc,
    WaitUntilVpcAvailable,
    DescribeVpcAttribute,
    ModifyVpcAttribute,
    AssociateVpcCidrBlock,
    DisassociateVpcCidrBlock,
    DescribeSubnets,
    CreateSubnet,
    DeleteSubnet,
    WaitUntilSubnetAvailable,
    ModifySubnetAttribute,
    DescribeAvailabilityZones,
    DescribeInternetGateways,
    CreateInternetGateway,
    AttachInternetGateway,
    DetachInternetGateway,
    DeleteInternetGateway,
    DescribeEgressOnlyInternetGateways,
    CreateEgressOnlyInternetGateway,
    DeleteEgressOnlyInternetGateway,
    DescribeCarrierGateways,
    CreateCarrierGateway,
    DeleteCarrierGateway,
    DescribeNatGateways,
    CreateNatGateway,
    DeleteNatGateway,
    WaitUntilNatGatewayAvailable,
    DescribeRouteTables,
    CreateRouteTable,
    DeleteRouteTable,
    CreateRoute,
    ReplaceRoute,
    AssociateRouteTable,
    DisassociateRouteTable,
    DescribeAddresses,
    AllocateAddress,
    DisassociateAddress,
    ReleaseAddress,
    CreateTags,
}

impl Operation {
    /// Returns true if the operation changes provider state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Operation::DescribeVpcs
                | Operation::WaitUntilVpcAvailable
                | Operation::DescribeVpcAttribute
                | Operation::DescribeSubnets
                | Operation::WaitUntilSubnetAvailable
                | Operation::DescribeAvailabilityZones
                | Operation::DescribeInternetGateways
                | Operation::DescribeEgressOnlyInternetGateways
                | Operation::DescribeCarrierGateways
                | Operation::DescribeNatGateways
                | Operation::WaitUntilNatGatewayAvailable
                | Operation::DescribeRouteTables
                | Operation::DescribeAddresses
        )
    }
}

/// A recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    /// Id the call acted on; empty for describes and id-less creates.
    pub target: String,
}

/// In-memory cloud compute API.
#[derive(Debug, Default)]
pub struct FakeEc2 {
    cloud: Mutex<CloudState>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<Operation, VecDeque<CloudError>>>,
}

impl FakeEc2 {
    pub fn new() -> Self {
        Self::default()
    }

    /// A region with the given regular availability zones.
    pub fn with_zones(zones: &[&str]) -> Self {
        let fake = Self::new();
        {
            let mut cloud = fake.cloud.lock();
            for zone in zones {
                cloud.add_zone(zone, ZoneType::AvailabilityZone);
            }
        }
        fake
    }

    /// Direct access to the simulated resources, for seeding and
    /// assertions. Seeding through this does not record calls.
    pub fn state(&self) -> MutexGuard<'_, CloudState> {
        self.cloud.lock()
    }

    /// Makes the next call of `operation` fail with `error`. Queued errors
    /// are consumed in order, one per call.
    pub fn fail_next(&self, operation: Operation, error: CloudError) {
        self.failures
            .lock()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Makes the next `times` calls of `operation` fail with `error`.
    pub fn fail_times(&self, operation: Operation, times: usize, error: CloudError) {
        for _ in 0..times {
            self.fail_next(operation, error.clone());
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Calls that changed provider state, in order.
    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation.is_mutating())
            .cloned()
            .collect()
    }

    /// Number of calls made to `operation`.
    pub fn count(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Operations of the mutating calls, in order.
    pub fn mutating_operations(&self) -> Vec<Operation> {
        self.mutating_calls()
            .into_iter()
            .map(|c| c.operation)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Records the call and returns the state lock, or the queued failure.
    fn begin(&self, operation: Operation, target: &str) -> CloudResult<MutexGuard<'_, CloudState>> {
        debug!(?operation, resource = target, "Cloud API call");
        self.calls.lock().push(Call {
            operation,
            target: target.to_string(),
        });

        let injected = self
            .failures
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(error) => {
                debug!(?operation, resource = target, %error, "Returning injected failure");
                Err(error)
            }
            None => Ok(self.cloud.lock()),
        }
    }
}

#[async_trait]
impl Ec2Api for FakeEc2 {
    async fn describe_vpcs(&self, ids: &[String], filters: &[Filter]) -> CloudResult<Vec<Vpc>> {
        self.begin(Operation::DescribeVpcs, "")?
            .describe_vpcs(ids, filters)
    }

    async fn create_vpc(&self, input: CreateVpcInput) -> CloudResult<Vpc> {
        self.begin(Operation::CreateVpc, "")?.create_vpc(input)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> CloudResult<()> {
        self.begin(Operation::DeleteVpc, vpc_id)?.delete_vpc(vpc_id)
    }

    async fn wait_until_vpc_available(&self, vpc_id: &str) -> CloudResult<()> {
        self.begin(Operation::WaitUntilVpcAvailable, vpc_id)?
            .wait_until_vpc_available(vpc_id)
    }

    async fn describe_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: VpcAttribute,
    ) -> CloudResult<bool> {
        self.begin(Operation::DescribeVpcAttribute, vpc_id)?
            .describe_vpc_attribute(vpc_id, attribute)
    }

    async fn modify_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: VpcAttribute,
        value: bool,
    ) -> CloudResult<()> {
        self.begin(Operation::ModifyVpcAttribute, vpc_id)?
            .modify_vpc_attribute(vpc_id, attribute, value)
    }

    async fn associate_vpc_cidr_block(
        &self,
        vpc_id: &str,
        cidr_block: &str,
    ) -> CloudResult<String> {
        self.begin(Operation::AssociateVpcCidrBlock, vpc_id)?
            .associate_vpc_cidr_block(vpc_id, cidr_block)
    }

    async fn disassociate_vpc_cidr_block(&self, association_id: &str) -> CloudResult<()> {
        self.begin(Operation::DisassociateVpcCidrBlock, association_id)?
            .disassociate_vpc_cidr_block(association_id)
    }

    async fn describe_subnets(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> CloudResult<Vec<Subnet>> {
        self.begin(Operation::DescribeSubnets, "")?
            .describe_subnets(ids, filters)
    }

    async fn create_subnet(&self, input: CreateSubnetInput) -> CloudResult<Subnet> {
        let target = input.cidr_block.clone();
        self.begin(Operation::CreateSubnet, &target)?
            .create_subnet(input)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> CloudResult<()> {
        self.begin(Operation::DeleteSubnet, subnet_id)?
            .delete_subnet(subnet_id)
    }

    async fn wait_until_subnet_available(&self, subnet_id: &str) -> CloudResult<()> {
        self.begin(Operation::WaitUntilSubnetAvailable, subnet_id)?
            .wait_until_subnet_available(subnet_id)
    }

    async fn modify_subnet_attribute(
        &self,
        subnet_id: &str,
        attribute: SubnetAttribute,
        value: bool,
    ) -> CloudResult<()> {
        self.begin(Operation::ModifySubnetAttribute, subnet_id)?
            .modify_subnet_attribute(subnet_id, attribute, value)
    }

    async fn describe_availability_zones(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<AvailabilityZone>> {
        self.begin(Operation::DescribeAvailabilityZones, "")?
            .describe_availability_zones(filters)
    }

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<InternetGateway>> {
        self.begin(Operation::DescribeInternetGateways, "")?
            .describe_internet_gateways(filters)
    }

    async fn create_internet_gateway(&self) -> CloudResult<InternetGateway> {
        self.begin(Operation::CreateInternetGateway, "")?
            .create_internet_gateway()
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()> {
        self.begin(Operation::AttachInternetGateway, gateway_id)?
            .attach_internet_gateway(gateway_id, vpc_id)
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()> {
        self.begin(Operation::DetachInternetGateway, gateway_id)?
            .detach_internet_gateway(gateway_id, vpc_id)
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> CloudResult<()> {
        self.begin(Operation::DeleteInternetGateway, gateway_id)?
            .delete_internet_gateway(gateway_id)
    }

    async fn describe_egress_only_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<EgressOnlyInternetGateway>> {
        self.begin(Operation::DescribeEgressOnlyInternetGateways, "")?
            .describe_egress_only_internet_gateways(filters)
    }

    async fn create_egress_only_internet_gateway(
        &self,
        vpc_id: &str,
        tags: &Tags,
    ) -> CloudResult<EgressOnlyInternetGateway> {
        self.begin(Operation::CreateEgressOnlyInternetGateway, vpc_id)?
            .create_egress_only_internet_gateway(vpc_id, tags)
    }

    async fn delete_egress_only_internet_gateway(&self, gateway_id: &str) -> CloudResult<()> {
        self.begin(Operation::DeleteEgressOnlyInternetGateway, gateway_id)?
            .delete_egress_only_internet_gateway(gateway_id)
    }

    async fn describe_carrier_gateways(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<CarrierGateway>> {
        self.begin(Operation::DescribeCarrierGateways, "")?
            .describe_carrier_gateways(filters)
    }

    async fn create_carrier_gateway(
        &self,
        vpc_id: &str,
        tags: &Tags,
    ) -> CloudResult<CarrierGateway> {
        self.begin(Operation::CreateCarrierGateway, vpc_id)?
            .create_carrier_gateway(vpc_id, tags)
    }

    async fn delete_carrier_gateway(&self, gateway_id: &str) -> CloudResult<()> {
        self.begin(Operation::DeleteCarrierGateway, gateway_id)?
            .delete_carrier_gateway(gateway_id)
    }

    async fn describe_nat_gateways(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> CloudResult<Vec<NatGateway>> {
        self.begin(Operation::DescribeNatGateways, "")?
            .describe_nat_gateways(ids, filters)
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: &Tags,
    ) -> CloudResult<NatGateway> {
        self.begin(Operation::CreateNatGateway, subnet_id)?
            .create_nat_gateway(subnet_id, allocation_id, tags)
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> CloudResult<()> {
        self.begin(Operation::DeleteNatGateway, nat_gateway_id)?
            .delete_nat_gateway(nat_gateway_id)
    }

    async fn wait_until_nat_gateway_available(&self, nat_gateway_id: &str) -> CloudResult<()> {
        self.begin(Operation::WaitUntilNatGatewayAvailable, nat_gateway_id)?
            .wait_until_nat_gateway_available(nat_gateway_id)
    }

    async fn describe_route_tables(&self, filters: &[Filter]) -> CloudResult<Vec<RouteTable>> {
        self.begin(Operation::DescribeRouteTables, "")?
            .describe_route_tables(filters)
    }

    async fn create_route_table(&self, vpc_id: &str) -> CloudResult<RouteTable> {
        self.begin(Operation::CreateRouteTable, vpc_id)?
            .create_route_table(vpc_id)
    }

    async fn delete_route_table(&self, route_table_id: &str) -> CloudResult<()> {
        self.begin(Operation::DeleteRouteTable, route_table_id)?
            .delete_route_table(route_table_id)
    }

    async fn create_route(&self, route_table_id: &str, route: &Route) -> CloudResult<()> {
        self.begin(Operation::CreateRoute, route_table_id)?
            .create_route(route_table_id, route)
    }

    async fn replace_route(&self, route_table_id: &str, route: &Route) -> CloudResult<()> {
        self.begin(Operation::ReplaceRoute, route_table_id)?
            .replace_route(route_table_id, route)
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> CloudResult<String> {
        self.begin(Operation::AssociateRouteTable, route_table_id)?
            .associate_route_table(route_table_id, subnet_id)
    }

    async fn disassociate_route_table(&self, association_id: &str) -> CloudResult<()> {
        self.begin(Operation::DisassociateRouteTable, association_id)?
            .disassociate_route_table(association_id)
    }

    async fn describe_addresses(&self, filters: &[Filter]) -> CloudResult<Vec<Address>> {
        self.begin(Operation::DescribeAddresses, "")?
            .describe_addresses(filters)
    }

    async fn allocate_address(&self) -> CloudResult<Address> {
        self.begin(Operation::AllocateAddress, "")?
            .allocate_address()
    }

    async fn disassociate_address(&self, association_id: &str) -> CloudResult<()> {
        self.begin(Operation::DisassociateAddress, association_id)?
            .disassociate_address(association_id)
    }

    async fn release_address(&self, allocation_id: &str) -> CloudResult<()> {
        self.begin(Operation::ReleaseAddress, allocation_id)?
            .release_address(allocation_id)
    }

    async fn create_tags(&self, resource_id: &str, tags: &Tags) -> CloudResult<()> {
        self.begin(Operation::CreateTags, resource_id)?
            .create_tags(resource_id, tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_ec2::codes;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let ec2 = FakeEc2::with_zones(&["us-east-1a"]);
        let vpc = ec2
            .create_vpc(CreateVpcInput {
                cidr_block: "10.0.0.0/16".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        ec2.wait_until_vpc_available(&vpc.vpc_id).await.unwrap();
        ec2.describe_vpcs(&[vpc.vpc_id.clone()], &[]).await.unwrap();

        assert_eq!(
            ec2.calls().iter().map(|c| c.operation).collect::<Vec<_>>(),
            vec![
                Operation::CreateVpc,
                Operation::WaitUntilVpcAvailable,
                Operation::DescribeVpcs
            ]
        );
        assert_eq!(ec2.mutating_operations(), vec![Operation::CreateVpc]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_once() {
        let ec2 = FakeEc2::new();
        ec2.fail_next(
            Operation::AllocateAddress,
            CloudError::sdk(codes::AUTH_FAILURE, "denied"),
        );

        let err = ec2.allocate_address().await.unwrap_err();
        assert!(err.has_code(codes::AUTH_FAILURE));
        assert!(ec2.allocate_address().await.is_ok());
        assert_eq!(ec2.count(Operation::AllocateAddress), 2);
        assert_eq!(ec2.state().addresses.len(), 1);
    }

    #[test]
    fn test_describes_and_waits_are_not_mutating() {
        assert!(!Operation::DescribeRouteTables.is_mutating());
        assert!(!Operation::WaitUntilNatGatewayAvailable.is_mutating());
        assert!(Operation::CreateTags.is_mutating());
        assert!(Operation::ReplaceRoute.is_mutating());
    }
}
