//! In-memory model of one region of the cloud compute API.
//!
//! [`CloudState`] holds every resource kind the reconcilers touch and applies
//! the same dependency rules the provider does: a VPC with subnets cannot be
//! deleted, an associated address cannot be released, and so on. Errors use
//! the provider's error codes so retry allow-lists behave as in production.

use cloudnet_ec2::{
    codes, Address, AvailabilityZone, CarrierGateway, CidrBlockAssociation, CidrBlockState,
    CloudError, CloudResult, CreateSubnetInput, CreateVpcInput, EgressOnlyInternetGateway, Filter,
    InternetGateway, NatGateway, NatGatewayState, ResourceState, Route, RouteDestination,
    RouteTable, RouteTableAssociation, RouteTarget, Subnet, SubnetAttribute, Vpc, VpcAttribute,
};
use cloudnet_types::{Ipv4Cidr, Tags, ZoneType};
use std::collections::HashMap;

/// IPv6 block handed out for provider-assigned and pool-assigned requests.
pub const PROVIDER_IPV6_CIDR: &str = "2001:db8:1234:1a00::/56";

const ROUTE_ALREADY_EXISTS: &str = "RouteAlreadyExists";
const ALREADY_ASSOCIATED: &str = "Resource.AlreadyAssociated";
const GATEWAY_NOT_ATTACHED: &str = "Gateway.NotAttached";
const SUBNET_CONFLICT: &str = "InvalidSubnet.Conflict";
const SUBNET_RANGE: &str = "InvalidSubnet.Range";
const CIDR_ASSOCIATION_NOT_FOUND: &str = "InvalidVpcCidrBlockAssociationID.NotFound";

fn not_found(code: &str, kind: &str, id: &str) -> CloudError {
    CloudError::sdk(code, format!("The {} ID '{}' does not exist", kind, id))
}

fn dependency_violation(message: String) -> CloudError {
    CloudError::sdk(codes::DEPENDENCY_VIOLATION, message)
}

fn invalid_parameter(message: impl Into<String>) -> CloudError {
    CloudError::sdk(codes::INVALID_PARAMETER_VALUE, message)
}

/// Not-found error for a tag target, coded by the id prefix.
fn tag_target_not_found(resource_id: &str) -> CloudError {
    let code = [
        ("vpc-", codes::VPC_NOT_FOUND),
        ("subnet-", codes::SUBNET_NOT_FOUND),
        ("igw-", codes::INTERNET_GATEWAY_NOT_FOUND),
        ("eigw-", codes::EGRESS_ONLY_GATEWAY_NOT_FOUND),
        ("cagw-", codes::CARRIER_GATEWAY_NOT_FOUND),
        ("nat-", codes::NAT_GATEWAY_NOT_FOUND),
        ("rtb-", codes::ROUTE_TABLE_NOT_FOUND),
        ("eipalloc-", codes::ALLOCATION_NOT_FOUND),
    ]
    .iter()
    .find(|(prefix, _)| resource_id.starts_with(prefix))
    .map_or(codes::RESOURCE_NOT_FOUND, |(_, code)| *code);
    not_found(code, "resource", resource_id)
}

fn local_route(cidr_block: &str) -> Route {
    Route::new(
        RouteDestination::Ipv4(cidr_block.to_string()),
        RouteTarget::Gateway("local".to_string()),
    )
}

/// A resource that describe calls can select by id and filter.
trait Filterable: Clone {
    fn id(&self) -> &str;

    /// Values the resource has for filter `name`. Unknown names yield none,
    /// so a filter the model does not know never matches.
    fn filter_values(&self, name: &str) -> Vec<String>;
}

fn tag_values(tags: &Tags, name: &str) -> Vec<String> {
    if name == "tag-key" {
        return tags.iter().map(|(k, _)| k.to_string()).collect();
    }
    name.strip_prefix("tag:")
        .and_then(|key| tags.get(key))
        .map(|v| vec![v.to_string()])
        .unwrap_or_default()
}

fn select<T: Filterable>(
    items: &[T],
    ids: &[String],
    filters: &[Filter],
    code: &str,
    kind: &str,
) -> CloudResult<Vec<T>> {
    if let Some(missing) = ids
        .iter()
        .find(|id| !items.iter().any(|item| item.id() == id.as_str()))
    {
        return Err(not_found(code, kind, missing));
    }
    Ok(items
        .iter()
        .filter(|item| ids.is_empty() || ids.iter().any(|id| id == item.id()))
        .filter(|item| filters.iter().all(|f| f.matches(&item.filter_values(&f.name))))
        .cloned()
        .collect())
}

impl Filterable for Vpc {
    fn id(&self) -> &str {
        &self.vpc_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "vpc-id" => vec![self.vpc_id.clone()],
            "state" => vec![self.state.as_str().to_string()],
            "cidr" => vec![self.cidr_block.clone()],
            _ => tag_values(&self.tags, name),
        }
    }
}

impl Filterable for Subnet {
    fn id(&self) -> &str {
        &self.subnet_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "subnet-id" => vec![self.subnet_id.clone()],
            "vpc-id" => vec![self.vpc_id.clone()],
            "state" => vec![self.state.as_str().to_string()],
            "availability-zone" => vec![self.availability_zone.clone()],
            "cidr-block" => vec![self.cidr_block.clone()],
            _ => tag_values(&self.tags, name),
        }
    }
}

impl Filterable for AvailabilityZone {
    fn id(&self) -> &str {
        &self.zone_name
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "zone-name" => vec![self.zone_name.clone()],
            "zone-type" => vec![self.zone_type.as_str().to_string()],
            "state" => vec![self.state.clone()],
            _ => Vec::new(),
        }
    }
}

impl Filterable for InternetGateway {
    fn id(&self) -> &str {
        &self.internet_gateway_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "internet-gateway-id" => vec![self.internet_gateway_id.clone()],
            "attachment.vpc-id" => self.attachments.clone(),
            _ => tag_values(&self.tags, name),
        }
    }
}

impl Filterable for EgressOnlyInternetGateway {
    fn id(&self) -> &str {
        &self.egress_only_internet_gateway_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "egress-only-internet-gateway-id" => vec![self.egress_only_internet_gateway_id.clone()],
            "attachment.vpc-id" => self.attachments.clone(),
            _ => tag_values(&self.tags, name),
        }
    }
}

impl Filterable for CarrierGateway {
    fn id(&self) -> &str {
        &self.carrier_gateway_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "carrier-gateway-id" => vec![self.carrier_gateway_id.clone()],
            "vpc-id" => vec![self.vpc_id.clone()],
            "state" => vec![self.state.as_str().to_string()],
            _ => tag_values(&self.tags, name),
        }
    }
}

impl Filterable for NatGateway {
    fn id(&self) -> &str {
        &self.nat_gateway_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "nat-gateway-id" => vec![self.nat_gateway_id.clone()],
            "subnet-id" => vec![self.subnet_id.clone()],
            "vpc-id" => vec![self.vpc_id.clone()],
            "state" => vec![self.state.as_str().to_string()],
            _ => tag_values(&self.tags, name),
        }
    }
}

impl Filterable for RouteTable {
    fn id(&self) -> &str {
        &self.route_table_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "route-table-id" => vec![self.route_table_id.clone()],
            "vpc-id" => vec![self.vpc_id.clone()],
            "association.subnet-id" => self
                .associations
                .iter()
                .filter_map(|a| a.subnet_id.clone())
                .collect(),
            "association.main" => vec![self.is_main().to_string()],
            _ => tag_values(&self.tags, name),
        }
    }
}

impl Filterable for Address {
    fn id(&self) -> &str {
        &self.allocation_id
    }

    fn filter_values(&self, name: &str) -> Vec<String> {
        match name {
            "allocation-id" => vec![self.allocation_id.clone()],
            "public-ip" => vec![self.public_ip.clone()],
            _ => tag_values(&self.tags, name),
        }
    }
}

/// Every resource of the simulated region.
///
/// Fields are public so tests can seed pre-existing infrastructure and
/// inspect the outcome of a reconcile pass directly.
#[derive(Debug, Clone, Default)]
pub struct CloudState {
    pub vpcs: Vec<Vpc>,
    pub vpc_attributes: HashMap<(String, VpcAttribute), bool>,
    pub subnets: Vec<Subnet>,
    pub subnet_attributes: HashMap<(String, SubnetAttribute), bool>,
    pub zones: Vec<AvailabilityZone>,
    pub internet_gateways: Vec<InternetGateway>,
    pub egress_only_internet_gateways: Vec<EgressOnlyInternetGateway>,
    pub carrier_gateways: Vec<CarrierGateway>,
    pub nat_gateways: Vec<NatGateway>,
    pub route_tables: Vec<RouteTable>,
    pub addresses: Vec<Address>,
    counter: u64,
}

impl CloudState {
    /// Next provider-style id with the given prefix, e.g. `subnet-0000000a`.
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}-{:08x}", prefix, self.counter)
    }

    pub fn add_zone(&mut self, zone_name: &str, zone_type: ZoneType) {
        self.zones.push(AvailabilityZone {
            zone_name: zone_name.to_string(),
            zone_type,
            state: "available".to_string(),
        });
    }

    /// Seeds an available VPC with its main route table and returns its id.
    pub fn insert_vpc(&mut self, cidr_block: &str, tags: Tags) -> String {
        self.new_vpc(cidr_block, None, None, tags, ResourceState::Available)
            .vpc_id
    }

    /// Seeds an available subnet and returns its id.
    pub fn insert_subnet(&mut self, vpc_id: &str, cidr_block: &str, zone: &str, tags: Tags) -> String {
        let subnet_id = self.next_id("subnet");
        self.subnets.push(Subnet {
            subnet_id: subnet_id.clone(),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr_block.to_string(),
            ipv6_cidr_block: None,
            availability_zone: zone.to_string(),
            map_public_ip_on_launch: false,
            state: ResourceState::Available,
            tags,
        });
        subnet_id
    }

    /// Seeds a route table associated with `subnet_id` and returns its id.
    pub fn insert_route_table(
        &mut self,
        vpc_id: &str,
        subnet_id: &str,
        routes: Vec<Route>,
        tags: Tags,
    ) -> String {
        let route_table_id = self.next_id("rtb");
        let association_id = self.next_id("rtbassoc");
        self.route_tables.push(RouteTable {
            route_table_id: route_table_id.clone(),
            vpc_id: vpc_id.to_string(),
            routes,
            associations: vec![RouteTableAssociation {
                association_id,
                subnet_id: Some(subnet_id.to_string()),
                main: false,
            }],
            tags,
        });
        route_table_id
    }

    pub fn vpc(&self, vpc_id: &str) -> Option<&Vpc> {
        self.vpcs.iter().find(|v| v.vpc_id == vpc_id)
    }

    pub fn subnet(&self, subnet_id: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.subnet_id == subnet_id)
    }

    pub fn route_table(&self, route_table_id: &str) -> Option<&RouteTable> {
        self.route_tables
            .iter()
            .find(|rt| rt.route_table_id == route_table_id)
    }

    /// The route table explicitly associated with `subnet_id`.
    pub fn route_table_for_subnet(&self, subnet_id: &str) -> Option<&RouteTable> {
        self.route_tables.iter().find(|rt| {
            rt.associations
                .iter()
                .any(|a| a.subnet_id.as_deref() == Some(subnet_id))
        })
    }

    /// NAT gateways that are not deleted.
    pub fn live_nat_gateways(&self) -> impl Iterator<Item = &NatGateway> {
        self.nat_gateways
            .iter()
            .filter(|n| n.state != NatGatewayState::Deleted)
    }

    fn new_vpc(
        &mut self,
        cidr_block: &str,
        ipv6_cidr_block: Option<String>,
        ipv6_pool: Option<String>,
        tags: Tags,
        state: ResourceState,
    ) -> Vpc {
        let vpc_id = self.next_id("vpc");
        let association_id = self.next_id("vpc-cidr-assoc");
        let vpc = Vpc {
            vpc_id: vpc_id.clone(),
            cidr_block: cidr_block.to_string(),
            state,
            cidr_block_associations: vec![CidrBlockAssociation {
                association_id,
                cidr_block: cidr_block.to_string(),
                state: CidrBlockState::Associated,
            }],
            ipv6_cidr_block,
            ipv6_pool,
            tags,
        };
        self.vpcs.push(vpc.clone());

        let route_table_id = self.next_id("rtb");
        let association_id = self.next_id("rtbassoc");
        self.route_tables.push(RouteTable {
            route_table_id,
            vpc_id,
            routes: vec![local_route(cidr_block)],
            associations: vec![RouteTableAssociation {
                association_id,
                subnet_id: None,
                main: true,
            }],
            tags: Tags::new(),
        });
        vpc
    }

    fn vpc_mut(&mut self, vpc_id: &str) -> CloudResult<&mut Vpc> {
        self.vpcs
            .iter_mut()
            .find(|v| v.vpc_id == vpc_id)
            .ok_or_else(|| not_found(codes::VPC_NOT_FOUND, "vpc", vpc_id))
    }

    fn require_vpc(&self, vpc_id: &str) -> CloudResult<&Vpc> {
        self.vpc(vpc_id)
            .ok_or_else(|| not_found(codes::VPC_NOT_FOUND, "vpc", vpc_id))
    }

    fn require_subnet(&self, subnet_id: &str) -> CloudResult<&Subnet> {
        self.subnet(subnet_id)
            .ok_or_else(|| not_found(codes::SUBNET_NOT_FOUND, "subnet", subnet_id))
    }

    fn route_table_mut(&mut self, route_table_id: &str) -> CloudResult<&mut RouteTable> {
        self.route_tables
            .iter_mut()
            .find(|rt| rt.route_table_id == route_table_id)
            .ok_or_else(|| not_found(codes::ROUTE_TABLE_NOT_FOUND, "route table", route_table_id))
    }

    // VPC

    pub fn describe_vpcs(&self, ids: &[String], filters: &[Filter]) -> CloudResult<Vec<Vpc>> {
        select(&self.vpcs, ids, filters, codes::VPC_NOT_FOUND, "vpc")
    }

    pub fn create_vpc(&mut self, input: CreateVpcInput) -> CloudResult<Vpc> {
        let cidr = input
            .cidr_block
            .parse::<Ipv4Cidr>()
            .map_err(|e| invalid_parameter(e.to_string()))?;
        let ipv6_cidr_block = input.ipv6_cidr_block.or_else(|| {
            (input.amazon_provided_ipv6_cidr_block || input.ipv6_pool.is_some())
                .then(|| PROVIDER_IPV6_CIDR.to_string())
        });
        Ok(self.new_vpc(
            &cidr.to_string(),
            ipv6_cidr_block,
            input.ipv6_pool,
            input.tags,
            ResourceState::Pending,
        ))
    }

    pub fn delete_vpc(&mut self, vpc_id: &str) -> CloudResult<()> {
        if vpc_id.is_empty() {
            return Err(CloudError::sdk(
                codes::MISSING_PARAMETER,
                "The request must contain the parameter vpcId",
            ));
        }
        self.require_vpc(vpc_id)?;

        let attached = |attachments: &[String]| attachments.iter().any(|a| a == vpc_id);
        let has_dependencies = self.subnets.iter().any(|s| s.vpc_id == vpc_id)
            || self.internet_gateways.iter().any(|g| attached(&g.attachments))
            || self
                .egress_only_internet_gateways
                .iter()
                .any(|g| attached(&g.attachments))
            || self.carrier_gateways.iter().any(|g| g.vpc_id == vpc_id)
            || self.live_nat_gateways().any(|n| n.vpc_id == vpc_id)
            || self
                .route_tables
                .iter()
                .any(|rt| rt.vpc_id == vpc_id && !rt.is_main());
        if has_dependencies {
            return Err(dependency_violation(format!(
                "The vpc '{}' has dependencies and cannot be deleted.",
                vpc_id
            )));
        }

        self.vpcs.retain(|v| v.vpc_id != vpc_id);
        self.route_tables.retain(|rt| rt.vpc_id != vpc_id);
        self.vpc_attributes.retain(|(id, _), _| id != vpc_id);
        Ok(())
    }

    pub fn wait_until_vpc_available(&mut self, vpc_id: &str) -> CloudResult<()> {
        self.vpc_mut(vpc_id)?.state = ResourceState::Available;
        Ok(())
    }

    /// DNS support is on for new VPCs, DNS hostnames are off.
    pub fn describe_vpc_attribute(&self, vpc_id: &str, attribute: VpcAttribute) -> CloudResult<bool> {
        self.require_vpc(vpc_id)?;
        let default = attribute == VpcAttribute::EnableDnsSupport;
        Ok(self
            .vpc_attributes
            .get(&(vpc_id.to_string(), attribute))
            .copied()
            .unwrap_or(default))
    }

    pub fn modify_vpc_attribute(
        &mut self,
        vpc_id: &str,
        attribute: VpcAttribute,
        value: bool,
    ) -> CloudResult<()> {
        self.require_vpc(vpc_id)?;
        self.vpc_attributes
            .insert((vpc_id.to_string(), attribute), value);
        Ok(())
    }

    pub fn associate_vpc_cidr_block(&mut self, vpc_id: &str, cidr_block: &str) -> CloudResult<String> {
        cidr_block
            .parse::<Ipv4Cidr>()
            .map_err(|e| invalid_parameter(e.to_string()))?;
        let association_id = self.next_id("vpc-cidr-assoc");
        self.vpc_mut(vpc_id)?
            .cidr_block_associations
            .push(CidrBlockAssociation {
                association_id: association_id.clone(),
                cidr_block: cidr_block.to_string(),
                state: CidrBlockState::Associated,
            });
        Ok(association_id)
    }

    pub fn disassociate_vpc_cidr_block(&mut self, association_id: &str) -> CloudResult<()> {
        for vpc in &mut self.vpcs {
            let Some(index) = vpc
                .cidr_block_associations
                .iter()
                .position(|a| a.association_id == association_id)
            else {
                continue;
            };
            if vpc.cidr_block_associations[index].cidr_block == vpc.cidr_block {
                return Err(invalid_parameter(format!(
                    "The vpc CIDR block with association ID {} may not be disassociated. It is the primary IPv4 CIDR block of the VPC",
                    association_id
                )));
            }
            vpc.cidr_block_associations.remove(index);
            return Ok(());
        }
        Err(not_found(CIDR_ASSOCIATION_NOT_FOUND, "association", association_id))
    }

    // Subnets

    pub fn describe_subnets(&self, ids: &[String], filters: &[Filter]) -> CloudResult<Vec<Subnet>> {
        select(&self.subnets, ids, filters, codes::SUBNET_NOT_FOUND, "subnet")
    }

    pub fn create_subnet(&mut self, input: CreateSubnetInput) -> CloudResult<Subnet> {
        let cidr = input
            .cidr_block
            .parse::<Ipv4Cidr>()
            .map_err(|e| invalid_parameter(e.to_string()))?;

        let vpc = self.require_vpc(&input.vpc_id)?;
        let in_range = vpc
            .cidr_block_associations
            .iter()
            .filter(|a| a.state.is_active())
            .filter_map(|a| a.cidr_block.parse::<Ipv4Cidr>().ok())
            .any(|block| block.contains(cidr.network()) && block.prefix_len() <= cidr.prefix_len());
        if !in_range {
            return Err(CloudError::sdk(
                SUBNET_RANGE,
                format!("The CIDR '{}' is invalid.", input.cidr_block),
            ));
        }

        let conflicts = self
            .subnets
            .iter()
            .filter(|s| s.vpc_id == input.vpc_id)
            .filter_map(|s| s.cidr_block.parse::<Ipv4Cidr>().ok())
            .any(|existing| existing.overlaps(&cidr));
        if conflicts {
            return Err(CloudError::sdk(
                SUBNET_CONFLICT,
                format!("The CIDR '{}' conflicts with another subnet", input.cidr_block),
            ));
        }

        if !self.zones.is_empty() && !self.zones.iter().any(|z| z.zone_name == input.availability_zone) {
            return Err(invalid_parameter(format!(
                "Value ({}) for parameter availabilityZone is invalid.",
                input.availability_zone
            )));
        }

        let subnet = Subnet {
            subnet_id: self.next_id("subnet"),
            vpc_id: input.vpc_id,
            cidr_block: cidr.to_string(),
            ipv6_cidr_block: input.ipv6_cidr_block,
            availability_zone: input.availability_zone,
            map_public_ip_on_launch: false,
            state: ResourceState::Pending,
            tags: input.tags,
        };
        self.subnets.push(subnet.clone());
        Ok(subnet)
    }

    pub fn delete_subnet(&mut self, subnet_id: &str) -> CloudResult<()> {
        self.require_subnet(subnet_id)?;
        if self.live_nat_gateways().any(|n| n.subnet_id == subnet_id) {
            return Err(dependency_violation(format!(
                "The subnet '{}' has dependencies and cannot be deleted.",
                subnet_id
            )));
        }

        self.subnets.retain(|s| s.subnet_id != subnet_id);
        self.subnet_attributes.retain(|(id, _), _| id != subnet_id);
        for rt in &mut self.route_tables {
            rt.associations
                .retain(|a| a.subnet_id.as_deref() != Some(subnet_id));
        }
        Ok(())
    }

    pub fn wait_until_subnet_available(&mut self, subnet_id: &str) -> CloudResult<()> {
        let subnet = self
            .subnets
            .iter_mut()
            .find(|s| s.subnet_id == subnet_id)
            .ok_or_else(|| not_found(codes::SUBNET_NOT_FOUND, "subnet", subnet_id))?;
        subnet.state = ResourceState::Available;
        Ok(())
    }

    pub fn modify_subnet_attribute(
        &mut self,
        subnet_id: &str,
        attribute: SubnetAttribute,
        value: bool,
    ) -> CloudResult<()> {
        let subnet = self
            .subnets
            .iter_mut()
            .find(|s| s.subnet_id == subnet_id)
            .ok_or_else(|| not_found(codes::SUBNET_NOT_FOUND, "subnet", subnet_id))?;
        if attribute == SubnetAttribute::MapPublicIpOnLaunch {
            subnet.map_public_ip_on_launch = value;
        }
        self.subnet_attributes
            .insert((subnet_id.to_string(), attribute), value);
        Ok(())
    }

    pub fn describe_availability_zones(&self, filters: &[Filter]) -> CloudResult<Vec<AvailabilityZone>> {
        select(&self.zones, &[], filters, codes::INVALID_PARAMETER_VALUE, "zone")
    }

    // Internet gateways

    pub fn describe_internet_gateways(&self, filters: &[Filter]) -> CloudResult<Vec<InternetGateway>> {
        select(
            &self.internet_gateways,
            &[],
            filters,
            codes::INTERNET_GATEWAY_NOT_FOUND,
            "internet gateway",
        )
    }

    pub fn create_internet_gateway(&mut self) -> CloudResult<InternetGateway> {
        let gateway = InternetGateway {
            internet_gateway_id: self.next_id("igw"),
            attachments: Vec::new(),
            tags: Tags::new(),
        };
        self.internet_gateways.push(gateway.clone());
        Ok(gateway)
    }

    pub fn attach_internet_gateway(&mut self, gateway_id: &str, vpc_id: &str) -> CloudResult<()> {
        self.require_vpc(vpc_id)?;
        let gateway = self
            .internet_gateways
            .iter_mut()
            .find(|g| g.internet_gateway_id == gateway_id)
            .ok_or_else(|| not_found(codes::INTERNET_GATEWAY_NOT_FOUND, "internet gateway", gateway_id))?;
        if !gateway.attachments.is_empty() {
            return Err(CloudError::sdk(
                ALREADY_ASSOCIATED,
                format!("resource {} is already attached to network {}", gateway_id, gateway.attachments[0]),
            ));
        }
        gateway.attachments.push(vpc_id.to_string());
        Ok(())
    }

    pub fn detach_internet_gateway(&mut self, gateway_id: &str, vpc_id: &str) -> CloudResult<()> {
        let gateway = self
            .internet_gateways
            .iter_mut()
            .find(|g| g.internet_gateway_id == gateway_id)
            .ok_or_else(|| not_found(codes::INTERNET_GATEWAY_NOT_FOUND, "internet gateway", gateway_id))?;
        if !gateway.attachments.iter().any(|a| a == vpc_id) {
            return Err(CloudError::sdk(
                GATEWAY_NOT_ATTACHED,
                format!("resource {} is not attached to network {}", gateway_id, vpc_id),
            ));
        }
        gateway.attachments.retain(|a| a != vpc_id);
        Ok(())
    }

    pub fn delete_internet_gateway(&mut self, gateway_id: &str) -> CloudResult<()> {
        let gateway = self
            .internet_gateways
            .iter()
            .find(|g| g.internet_gateway_id == gateway_id)
            .ok_or_else(|| not_found(codes::INTERNET_GATEWAY_NOT_FOUND, "internet gateway", gateway_id))?;
        if !gateway.attachments.is_empty() {
            return Err(dependency_violation(format!(
                "The internetGateway '{}' has dependencies and cannot be deleted.",
                gateway_id
            )));
        }
        self.internet_gateways
            .retain(|g| g.internet_gateway_id != gateway_id);
        Ok(())
    }

    // Egress-only internet gateways

    pub fn describe_egress_only_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> CloudResult<Vec<EgressOnlyInternetGateway>> {
        select(
            &self.egress_only_internet_gateways,
            &[],
            filters,
            codes::EGRESS_ONLY_GATEWAY_NOT_FOUND,
            "egress only internet gateway",
        )
    }

    pub fn create_egress_only_internet_gateway(
        &mut self,
        vpc_id: &str,
        tags: &Tags,
    ) -> CloudResult<EgressOnlyInternetGateway> {
        self.require_vpc(vpc_id)?;
        let gateway = EgressOnlyInternetGateway {
            egress_only_internet_gateway_id: self.next_id("eigw"),
            attachments: vec![vpc_id.to_string()],
            tags: tags.clone(),
        };
        self.egress_only_internet_gateways.push(gateway.clone());
        Ok(gateway)
    }

    pub fn delete_egress_only_internet_gateway(&mut self, gateway_id: &str) -> CloudResult<()> {
        let before = self.egress_only_internet_gateways.len();
        self.egress_only_internet_gateways
            .retain(|g| g.egress_only_internet_gateway_id != gateway_id);
        if self.egress_only_internet_gateways.len() == before {
            return Err(not_found(
                codes::EGRESS_ONLY_GATEWAY_NOT_FOUND,
                "egress only internet gateway",
                gateway_id,
            ));
        }
        Ok(())
    }

    // Carrier gateways

    pub fn describe_carrier_gateways(&self, filters: &[Filter]) -> CloudResult<Vec<CarrierGateway>> {
        select(
            &self.carrier_gateways,
            &[],
            filters,
            codes::CARRIER_GATEWAY_NOT_FOUND,
            "carrier gateway",
        )
    }

    pub fn create_carrier_gateway(&mut self, vpc_id: &str, tags: &Tags) -> CloudResult<CarrierGateway> {
        self.require_vpc(vpc_id)?;
        let gateway = CarrierGateway {
            carrier_gateway_id: self.next_id("cagw"),
            vpc_id: vpc_id.to_string(),
            state: ResourceState::Available,
            tags: tags.clone(),
        };
        self.carrier_gateways.push(gateway.clone());
        Ok(gateway)
    }

    pub fn delete_carrier_gateway(&mut self, gateway_id: &str) -> CloudResult<()> {
        let before = self.carrier_gateways.len();
        self.carrier_gateways
            .retain(|g| g.carrier_gateway_id != gateway_id);
        if self.carrier_gateways.len() == before {
            return Err(not_found(codes::CARRIER_GATEWAY_NOT_FOUND, "carrier gateway", gateway_id));
        }
        Ok(())
    }

    // NAT gateways

    pub fn describe_nat_gateways(&self, ids: &[String], filters: &[Filter]) -> CloudResult<Vec<NatGateway>> {
        select(
            &self.nat_gateways,
            ids,
            filters,
            codes::NAT_GATEWAY_NOT_FOUND,
            "nat gateway",
        )
    }

    /// Creates a pending NAT gateway and associates the address with it.
    pub fn create_nat_gateway(
        &mut self,
        subnet_id: &str,
        allocation_id: &str,
        tags: &Tags,
    ) -> CloudResult<NatGateway> {
        let vpc_id = self.require_subnet(subnet_id)?.vpc_id.clone();
        let nat_gateway_id = self.next_id("nat");
        let association_id = self.next_id("eipassoc");

        let address = self
            .addresses
            .iter_mut()
            .find(|a| a.allocation_id == allocation_id)
            .ok_or_else(|| not_found(codes::ALLOCATION_NOT_FOUND, "allocation", allocation_id))?;
        if address.association_id.is_some() {
            return Err(CloudError::sdk(
                ALREADY_ASSOCIATED,
                format!("Elastic IP address [{}] is already associated", allocation_id),
            ));
        }
        address.association_id = Some(association_id);

        let gateway = NatGateway {
            nat_gateway_id,
            subnet_id: subnet_id.to_string(),
            vpc_id,
            state: NatGatewayState::Pending,
            allocation_id: Some(allocation_id.to_string()),
            public_ip: Some(address.public_ip.clone()),
            failure_message: None,
            tags: tags.clone(),
        };
        self.nat_gateways.push(gateway.clone());
        Ok(gateway)
    }

    /// Marks the gateway deleted and frees its address. Deleted gateways
    /// stay visible to describe calls.
    pub fn delete_nat_gateway(&mut self, nat_gateway_id: &str) -> CloudResult<()> {
        let gateway = self
            .nat_gateways
            .iter_mut()
            .find(|n| n.nat_gateway_id == nat_gateway_id && n.state != NatGatewayState::Deleted)
            .ok_or_else(|| not_found(codes::NAT_GATEWAY_NOT_FOUND, "nat gateway", nat_gateway_id))?;
        gateway.state = NatGatewayState::Deleted;

        if let Some(allocation_id) = gateway.allocation_id.clone() {
            if let Some(address) = self
                .addresses
                .iter_mut()
                .find(|a| a.allocation_id == allocation_id)
            {
                address.association_id = None;
            }
        }
        Ok(())
    }

    pub fn wait_until_nat_gateway_available(&mut self, nat_gateway_id: &str) -> CloudResult<()> {
        let gateway = self
            .nat_gateways
            .iter_mut()
            .find(|n| n.nat_gateway_id == nat_gateway_id)
            .ok_or_else(|| not_found(codes::NAT_GATEWAY_NOT_FOUND, "nat gateway", nat_gateway_id))?;
        match gateway.state {
            NatGatewayState::Pending | NatGatewayState::Available => {
                gateway.state = NatGatewayState::Available;
                Ok(())
            }
            state => Err(CloudError::timeout(format!(
                "nat gateway {} to become available, state is {}",
                nat_gateway_id, state
            ))),
        }
    }

    // Route tables

    pub fn describe_route_tables(&self, filters: &[Filter]) -> CloudResult<Vec<RouteTable>> {
        select(
            &self.route_tables,
            &[],
            filters,
            codes::ROUTE_TABLE_NOT_FOUND,
            "route table",
        )
    }

    pub fn create_route_table(&mut self, vpc_id: &str) -> CloudResult<RouteTable> {
        let cidr_block = self.require_vpc(vpc_id)?.cidr_block.clone();
        let route_table = RouteTable {
            route_table_id: self.next_id("rtb"),
            vpc_id: vpc_id.to_string(),
            routes: vec![local_route(&cidr_block)],
            associations: Vec::new(),
            tags: Tags::new(),
        };
        self.route_tables.push(route_table.clone());
        Ok(route_table)
    }

    pub fn delete_route_table(&mut self, route_table_id: &str) -> CloudResult<()> {
        if !self.route_table_mut(route_table_id)?.associations.is_empty() {
            return Err(dependency_violation(format!(
                "The routeTable '{}' has dependencies and cannot be deleted.",
                route_table_id
            )));
        }
        self.route_tables
            .retain(|rt| rt.route_table_id != route_table_id);
        Ok(())
    }

    /// Checks that the target of a route exists.
    fn check_route_target(&self, target: &RouteTarget) -> CloudResult<()> {
        let exists = match target {
            RouteTarget::Gateway(id) if id == "local" => true,
            RouteTarget::Gateway(id) => self
                .internet_gateways
                .iter()
                .any(|g| &g.internet_gateway_id == id),
            RouteTarget::NatGateway(id) => self.live_nat_gateways().any(|n| &n.nat_gateway_id == id),
            RouteTarget::EgressOnlyInternetGateway(id) => self
                .egress_only_internet_gateways
                .iter()
                .any(|g| &g.egress_only_internet_gateway_id == id),
            RouteTarget::CarrierGateway(id) => self
                .carrier_gateways
                .iter()
                .any(|g| &g.carrier_gateway_id == id),
            RouteTarget::Instance(_) => true,
        };
        if exists {
            return Ok(());
        }
        Err(match target {
            RouteTarget::NatGateway(id) => not_found(codes::NAT_GATEWAY_NOT_FOUND, "nat gateway", id),
            other => not_found(codes::GATEWAY_NOT_FOUND, "gateway", other.id()),
        })
    }

    pub fn create_route(&mut self, route_table_id: &str, route: &Route) -> CloudResult<()> {
        self.check_route_target(&route.target)?;
        let rt = self.route_table_mut(route_table_id)?;
        if rt.routes.iter().any(|r| r.destination == route.destination) {
            return Err(CloudError::sdk(
                ROUTE_ALREADY_EXISTS,
                format!(
                    "The route identified by {} already exists.",
                    route.destination
                ),
            ));
        }
        rt.routes.push(route.clone());
        Ok(())
    }

    pub fn replace_route(&mut self, route_table_id: &str, route: &Route) -> CloudResult<()> {
        self.check_route_target(&route.target)?;
        let rt = self.route_table_mut(route_table_id)?;
        let existing = rt
            .routes
            .iter_mut()
            .find(|r| r.destination == route.destination)
            .ok_or_else(|| {
                invalid_parameter(format!(
                    "There is no route defined for '{}' in the route table. Use CreateRoute instead.",
                    route.destination
                ))
            })?;
        existing.target = route.target.clone();
        Ok(())
    }

    pub fn associate_route_table(&mut self, route_table_id: &str, subnet_id: &str) -> CloudResult<String> {
        self.require_subnet(subnet_id)?;
        if self.route_table_for_subnet(subnet_id).is_some() {
            return Err(CloudError::sdk(
                ALREADY_ASSOCIATED,
                format!("the specified association for route table {} conflicts with an existing association", route_table_id),
            ));
        }
        let association_id = self.next_id("rtbassoc");
        self.route_table_mut(route_table_id)?
            .associations
            .push(RouteTableAssociation {
                association_id: association_id.clone(),
                subnet_id: Some(subnet_id.to_string()),
                main: false,
            });
        Ok(association_id)
    }

    pub fn disassociate_route_table(&mut self, association_id: &str) -> CloudResult<()> {
        for rt in &mut self.route_tables {
            let Some(index) = rt
                .associations
                .iter()
                .position(|a| a.association_id == association_id)
            else {
                continue;
            };
            if rt.associations[index].main {
                return Err(invalid_parameter(format!(
                    "cannot disassociate the main route table association {}",
                    association_id
                )));
            }
            rt.associations.remove(index);
            return Ok(());
        }
        Err(not_found(codes::ASSOCIATION_NOT_FOUND, "association", association_id))
    }

    // Elastic IPs

    pub fn describe_addresses(&self, filters: &[Filter]) -> CloudResult<Vec<Address>> {
        select(&self.addresses, &[], filters, codes::ALLOCATION_NOT_FOUND, "allocation")
    }

    pub fn allocate_address(&mut self) -> CloudResult<Address> {
        let allocation_id = self.next_id("eipalloc");
        let address = Address {
            allocation_id,
            public_ip: format!("203.0.113.{}", self.counter % 250 + 1),
            association_id: None,
            tags: Tags::new(),
        };
        self.addresses.push(address.clone());
        Ok(address)
    }

    /// Addresses held by a live NAT gateway cannot be disassociated.
    pub fn disassociate_address(&mut self, association_id: &str) -> CloudResult<()> {
        let address = self
            .addresses
            .iter()
            .find(|a| a.association_id.as_deref() == Some(association_id))
            .ok_or_else(|| not_found(codes::ASSOCIATION_NOT_FOUND, "association", association_id))?;
        let allocation_id = address.allocation_id.clone();

        if self
            .live_nat_gateways()
            .any(|n| n.allocation_id.as_deref() == Some(allocation_id.as_str()))
        {
            return Err(CloudError::sdk(
                codes::AUTH_FAILURE,
                "You do not have permission to access the specified resource.",
            ));
        }

        for address in &mut self.addresses {
            if address.allocation_id == allocation_id {
                address.association_id = None;
            }
        }
        Ok(())
    }

    pub fn release_address(&mut self, allocation_id: &str) -> CloudResult<()> {
        let address = self
            .addresses
            .iter()
            .find(|a| a.allocation_id == allocation_id)
            .ok_or_else(|| not_found(codes::ALLOCATION_NOT_FOUND, "allocation", allocation_id))?;
        if address.association_id.is_some() {
            return Err(CloudError::sdk(
                codes::IN_USE_IP_ADDRESS,
                format!("Address {} is in use.", address.public_ip),
            ));
        }
        self.addresses.retain(|a| a.allocation_id != allocation_id);
        Ok(())
    }

    // Tags

    fn tags_mut(&mut self, resource_id: &str) -> Option<&mut Tags> {
        if let Some(v) = self.vpcs.iter_mut().find(|v| v.vpc_id == resource_id) {
            return Some(&mut v.tags);
        }
        if let Some(s) = self.subnets.iter_mut().find(|s| s.subnet_id == resource_id) {
            return Some(&mut s.tags);
        }
        if let Some(g) = self
            .internet_gateways
            .iter_mut()
            .find(|g| g.internet_gateway_id == resource_id)
        {
            return Some(&mut g.tags);
        }
        if let Some(g) = self
            .egress_only_internet_gateways
            .iter_mut()
            .find(|g| g.egress_only_internet_gateway_id == resource_id)
        {
            return Some(&mut g.tags);
        }
        if let Some(g) = self
            .carrier_gateways
            .iter_mut()
            .find(|g| g.carrier_gateway_id == resource_id)
        {
            return Some(&mut g.tags);
        }
        if let Some(n) = self
            .nat_gateways
            .iter_mut()
            .find(|n| n.nat_gateway_id == resource_id)
        {
            return Some(&mut n.tags);
        }
        if let Some(rt) = self
            .route_tables
            .iter_mut()
            .find(|rt| rt.route_table_id == resource_id)
        {
            return Some(&mut rt.tags);
        }
        self.addresses
            .iter_mut()
            .find(|a| a.allocation_id == resource_id)
            .map(|a| &mut a.tags)
    }

    pub fn create_tags(&mut self, resource_id: &str, tags: &Tags) -> CloudResult<()> {
        self.tags_mut(resource_id)
            .ok_or_else(|| tag_target_not_found(resource_id))?
            .merge(tags);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_ec2::filter;
    use pretty_assertions::assert_eq;

    fn owned(cluster: &str) -> Tags {
        Tags::new().with(cloudnet_types::cluster_tag_key(cluster), "owned")
    }

    #[test]
    fn test_new_vpc_has_untagged_main_route_table() {
        let mut state = CloudState::default();
        let vpc_id = state.insert_vpc("10.0.0.0/16", owned("test"));

        let tables = state
            .describe_route_tables(&[filter::vpc(&vpc_id)])
            .unwrap();
        assert_eq!(tables.len(), 1);
        assert!(tables[0].is_main());

        let tagged = state
            .describe_route_tables(&[filter::vpc(&vpc_id), filter::cluster("test")])
            .unwrap();
        assert!(tagged.is_empty());
    }

    #[test]
    fn test_describe_unknown_id_is_not_found() {
        let state = CloudState::default();
        let err = state
            .describe_vpcs(&["vpc-missing".to_string()], &[])
            .unwrap_err();
        assert!(err.has_code(codes::VPC_NOT_FOUND));
    }

    #[test]
    fn test_filters_match_tags_and_state() {
        let mut state = CloudState::default();
        state.insert_vpc("10.0.0.0/16", owned("a"));
        state.insert_vpc("10.1.0.0/16", owned("b"));

        let found = state
            .describe_vpcs(&[], &[filter::pending_or_available(), filter::cluster("b")])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cidr_block, "10.1.0.0/16");
        assert!(state
            .describe_vpcs(&[], &[filter::cluster_owned("c")])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_vpc_with_subnet_cannot_be_deleted() {
        let mut state = CloudState::default();
        let vpc_id = state.insert_vpc("10.0.0.0/16", Tags::new());
        let subnet_id = state.insert_subnet(&vpc_id, "10.0.0.0/24", "us-east-1a", Tags::new());

        let err = state.delete_vpc(&vpc_id).unwrap_err();
        assert!(err.has_code(codes::DEPENDENCY_VIOLATION));

        state.delete_subnet(&subnet_id).unwrap();
        state.delete_vpc(&vpc_id).unwrap();
        assert!(state.vpcs.is_empty());
        assert!(state.route_tables.is_empty());
    }

    #[test]
    fn test_create_subnet_rejects_overlap_and_out_of_range() {
        let mut state = CloudState::default();
        let vpc_id = state.insert_vpc("10.0.0.0/16", Tags::new());
        state.insert_subnet(&vpc_id, "10.0.0.0/24", "us-east-1a", Tags::new());

        let input = |cidr: &str| CreateSubnetInput {
            vpc_id: vpc_id.clone(),
            cidr_block: cidr.to_string(),
            availability_zone: "us-east-1a".to_string(),
            ..Default::default()
        };
        assert!(state
            .create_subnet(input("10.0.0.128/25"))
            .unwrap_err()
            .has_code(SUBNET_CONFLICT));
        assert!(state
            .create_subnet(input("192.168.0.0/24"))
            .unwrap_err()
            .has_code(SUBNET_RANGE));
        assert_eq!(state.create_subnet(input("10.0.1.0/24")).unwrap().state, ResourceState::Pending);
    }

    #[test]
    fn test_nat_gateway_holds_address_until_deleted() {
        let mut state = CloudState::default();
        let vpc_id = state.insert_vpc("10.0.0.0/16", Tags::new());
        let subnet_id = state.insert_subnet(&vpc_id, "10.0.0.0/24", "us-east-1a", Tags::new());
        let address = state.allocate_address().unwrap();

        let nat = state
            .create_nat_gateway(&subnet_id, &address.allocation_id, &Tags::new())
            .unwrap();
        assert!(state
            .release_address(&address.allocation_id)
            .unwrap_err()
            .has_code(codes::IN_USE_IP_ADDRESS));
        assert!(state
            .delete_subnet(&subnet_id)
            .unwrap_err()
            .has_code(codes::DEPENDENCY_VIOLATION));

        state.delete_nat_gateway(&nat.nat_gateway_id).unwrap();
        assert_eq!(state.nat_gateways[0].state, NatGatewayState::Deleted);
        state.release_address(&address.allocation_id).unwrap();
        state.delete_subnet(&subnet_id).unwrap();
    }

    #[test]
    fn test_route_target_must_exist() {
        let mut state = CloudState::default();
        let vpc_id = state.insert_vpc("10.0.0.0/16", Tags::new());
        let rt = state.create_route_table(&vpc_id).unwrap();
        let route = Route::new(
            RouteDestination::Ipv4("0.0.0.0/0".to_string()),
            RouteTarget::NatGateway("nat-missing".to_string()),
        );
        assert!(state
            .create_route(&rt.route_table_id, &route)
            .unwrap_err()
            .has_code(codes::NAT_GATEWAY_NOT_FOUND));
    }

    #[test]
    fn test_create_tags_unknown_resource_code() {
        let mut state = CloudState::default();
        let err = state.create_tags("rtb-missing", &Tags::new()).unwrap_err();
        assert!(err.has_code(codes::ROUTE_TABLE_NOT_FOUND));
        let err = state.create_tags("something", &Tags::new()).unwrap_err();
        assert!(err.has_code(codes::RESOURCE_NOT_FOUND));
    }
}
