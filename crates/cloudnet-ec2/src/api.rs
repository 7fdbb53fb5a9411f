//! The cloud compute API capability trait.

use crate::error::CloudResult;
use crate::filter::Filter;
use crate::model::{
    Address, AvailabilityZone, CarrierGateway, CreateSubnetInput, CreateVpcInput,
    EgressOnlyInternetGateway, InternetGateway, NatGateway, Route, RouteTable, Subnet,
    SubnetAttribute, Vpc, VpcAttribute,
};
use async_trait::async_trait;
use cloudnet_types::Tags;

/// Operations the network reconcilers need from the provider.
///
/// Describe calls take explicit ids and/or filters; an empty id list means
/// "no id restriction". Create calls that accept `tags` apply them
/// atomically with the creation.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    // VPC

    async fn describe_vpcs(&self, ids: &[String], filters: &[Filter]) -> CloudResult<Vec<Vpc>>;

    async fn create_vpc(&self, input: CreateVpcInput) -> CloudResult<Vpc>;

    async fn delete_vpc(&self, vpc_id: &str) -> CloudResult<()>;

    async fn wait_until_vpc_available(&self, vpc_id: &str) -> CloudResult<()>;

    async fn describe_vpc_attribute(&self, vpc_id: &str, attribute: VpcAttribute)
        -> CloudResult<bool>;

    async fn modify_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: VpcAttribute,
        value: bool,
    ) -> CloudResult<()>;

    /// Returns the association id.
    async fn associate_vpc_cidr_block(&self, vpc_id: &str, cidr_block: &str)
        -> CloudResult<String>;

    async fn disassociate_vpc_cidr_block(&self, association_id: &str) -> CloudResult<()>;

    // Subnets

    async fn describe_subnets(&self, ids: &[String], filters: &[Filter])
        -> CloudResult<Vec<Subnet>>;

    async fn create_subnet(&self, input: CreateSubnetInput) -> CloudResult<Subnet>;

    async fn delete_subnet(&self, subnet_id: &str) -> CloudResult<()>;

    async fn wait_until_subnet_available(&self, subnet_id: &str) -> CloudResult<()>;

    async fn modify_subnet_attribute(
        &self,
        subnet_id: &str,
        attribute: SubnetAttribute,
        value: bool,
    ) -> CloudResult<()>;

    async fn describe_availability_zones(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<AvailabilityZone>>;

    // Internet gateways

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<InternetGateway>>;

    async fn create_internet_gateway(&self) -> CloudResult<InternetGateway>;

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn delete_internet_gateway(&self, gateway_id: &str) -> CloudResult<()>;

    // Egress-only internet gateways

    async fn describe_egress_only_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<EgressOnlyInternetGateway>>;

    async fn create_egress_only_internet_gateway(
        &self,
        vpc_id: &str,
        tags: &Tags,
    ) -> CloudResult<EgressOnlyInternetGateway>;

    async fn delete_egress_only_internet_gateway(&self, gateway_id: &str) -> CloudResult<()>;

    // Carrier gateways

    async fn describe_carrier_gateways(&self, filters: &[Filter])
        -> CloudResult<Vec<CarrierGateway>>;

    async fn create_carrier_gateway(&self, vpc_id: &str, tags: &Tags)
        -> CloudResult<CarrierGateway>;

    async fn delete_carrier_gateway(&self, gateway_id: &str) -> CloudResult<()>;

    // NAT gateways

    async fn describe_nat_gateways(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> CloudResult<Vec<NatGateway>>;

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: &Tags,
    ) -> CloudResult<NatGateway>;

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> CloudResult<()>;

    async fn wait_until_nat_gateway_available(&self, nat_gateway_id: &str) -> CloudResult<()>;

    // Route tables

    async fn describe_route_tables(&self, filters: &[Filter]) -> CloudResult<Vec<RouteTable>>;

    async fn create_route_table(&self, vpc_id: &str) -> CloudResult<RouteTable>;

    async fn delete_route_table(&self, route_table_id: &str) -> CloudResult<()>;

    async fn create_route(&self, route_table_id: &str, route: &Route) -> CloudResult<()>;

    async fn replace_route(&self, route_table_id: &str, route: &Route) -> CloudResult<()>;

    /// Returns the association id.
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
        -> CloudResult<String>;

    async fn disassociate_route_table(&self, association_id: &str) -> CloudResult<()>;

    // Elastic IPs

    async fn describe_addresses(&self, filters: &[Filter]) -> CloudResult<Vec<Address>>;

    async fn allocate_address(&self) -> CloudResult<Address>;

    async fn disassociate_address(&self, association_id: &str) -> CloudResult<()>;

    async fn release_address(&self, allocation_id: &str) -> CloudResult<()>;

    // Tags

    /// Adds or overwrites tags on a resource; other tags are left alone.
    async fn create_tags(&self, resource_id: &str, tags: &Tags) -> CloudResult<()>;
}
