//! ec2.vpc resource

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, ResourceType as Ec2ResourceType, Tenancy, Vpc, VpcAttributeName};
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::retry::StateChangeConf;
use cumulus_core::schema::ResourceSchema;

use super::{attribute_bool, ec2_arn};
use crate::config::AwsClient;
use crate::error::{is_not_found, retry_on_aws_code, sdk_error};
use crate::resources::{ResourceHandler, changed_value, read_after_create, wait_error};
use crate::schemas::ec2::vpc_schema;
use crate::tags::{
    desired_tags, ec2_tag_specification, ec2_tags_to_map, state_tags, tag_changes, update_ec2_tags,
};

const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct VpcHandler;

/// Describe one VPC; `None` when it does not exist
async fn find_vpc(client: &AwsClient, vpc_id: &str) -> ProviderResult<Option<Vpc>> {
    match client.ec2.describe_vpcs().vpc_ids(vpc_id).send().await {
        Ok(output) => Ok(output.vpcs().first().cloned()),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(sdk_error(&format!("Failed to describe VPC {}", vpc_id), e)),
    }
}

async fn wait_available(client: &AwsClient, vpc_id: &str) -> ProviderResult<()> {
    log::debug!("Waiting for VPC {} to become available", vpc_id);
    StateChangeConf::new(move || async move {
        let vpc = find_vpc(client, vpc_id).await?;
        Ok::<_, ProviderError>(vpc.map(|v| {
            let state = v.state().map(|s| s.as_str().to_string()).unwrap_or_default();
            (v, state)
        }))
    })
    .pending(["pending"])
    .target(["available"])
    .timeout(CREATE_TIMEOUT)
    .wait_for_state()
    .await
    .map_err(|e| wait_error(&format!("Error waiting for VPC {} to become available", vpc_id), e))?;
    Ok(())
}

async fn dns_attribute(
    client: &AwsClient,
    vpc_id: &str,
    attribute: VpcAttributeName,
) -> ProviderResult<Option<bool>> {
    let output = client
        .ec2
        .describe_vpc_attribute()
        .vpc_id(vpc_id)
        .attribute(attribute.clone())
        .send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to read {} of VPC {}", attribute.as_str(), vpc_id), e))?;
    let value = match attribute {
        VpcAttributeName::EnableDnsHostnames => output.enable_dns_hostnames(),
        _ => output.enable_dns_support(),
    };
    Ok(value.and_then(|v| v.value()))
}

async fn set_dns_attribute(
    client: &AwsClient,
    vpc_id: &str,
    attribute: VpcAttributeName,
    enabled: bool,
) -> ProviderResult<()> {
    log::debug!("Setting {} = {} on VPC {}", attribute.as_str(), enabled, vpc_id);
    let req = client.ec2.modify_vpc_attribute().vpc_id(vpc_id);
    // ModifyVpcAttribute accepts one attribute per call
    let req = match attribute {
        VpcAttributeName::EnableDnsHostnames => req.enable_dns_hostnames(attribute_bool(enabled)),
        _ => req.enable_dns_support(attribute_bool(enabled)),
    };
    req.send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to modify VPC {}", vpc_id), e))?;
    Ok(())
}

async fn default_network_acl_id(client: &AwsClient, vpc_id: &str) -> ProviderResult<Option<String>> {
    let output = client
        .ec2
        .describe_network_acls()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .filters(Filter::builder().name("default").values("true").build())
        .send()
        .await
        .map_err(|e| sdk_error("Failed to describe default network ACL", e))?;
    Ok(output
        .network_acls()
        .first()
        .and_then(|acl| acl.network_acl_id().map(String::from)))
}

async fn default_security_group_id(
    client: &AwsClient,
    vpc_id: &str,
) -> ProviderResult<Option<String>> {
    let output = client
        .ec2
        .describe_security_groups()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .filters(Filter::builder().name("group-name").values("default").build())
        .send()
        .await
        .map_err(|e| sdk_error("Failed to describe default security group", e))?;
    Ok(output
        .security_groups()
        .first()
        .and_then(|sg| sg.group_id().map(String::from)))
}

/// Current IPv6 association of the VPC as (association id, cidr block)
fn ipv6_association(vpc: &Vpc) -> Option<(String, String)> {
    vpc.ipv6_cidr_block_association_set()
        .iter()
        .find(|a| {
            a.ipv6_cidr_block_state()
                .and_then(|s| s.state())
                .is_some_and(|s| matches!(s.as_str(), "associated" | "associating"))
        })
        .map(|a| {
            (
                a.association_id().unwrap_or_default().to_string(),
                a.ipv6_cidr_block().unwrap_or_default().to_string(),
            )
        })
}

#[async_trait]
impl ResourceHandler for VpcHandler {
    fn resource_type(&self) -> &'static str {
        "ec2.vpc"
    }

    fn schema(&self) -> ResourceSchema {
        vpc_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let cidr_block = resource.require_str("cidr_block")?;
        let tags = desired_tags(client, resource);

        let mut req = client
            .ec2
            .create_vpc()
            .cidr_block(cidr_block)
            .set_tag_specifications(ec2_tag_specification(Ec2ResourceType::Vpc, &tags).map(|s| vec![s]));
        if let Some(tenancy) = resource.get_str("instance_tenancy") {
            req = req.instance_tenancy(Tenancy::from(tenancy));
        }
        if let Some(ipv6) = resource.get_bool("assign_generated_ipv6_cidr_block") {
            req = req.amazon_provided_ipv6_cidr_block(ipv6);
        }

        let output = req.send().await.map_err(|e| {
            sdk_error("Failed to create VPC", e).for_resource(resource.id.clone())
        })?;
        let vpc_id = output
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| {
                ProviderError::new("VPC created but no ID returned").for_resource(resource.id.clone())
            })?
            .to_string();
        log::info!("Created VPC {}", vpc_id);

        wait_available(client, &vpc_id)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        // DNS support defaults to on, hostnames to off
        if resource.get_bool("enable_dns_support") == Some(false) {
            set_dns_attribute(client, &vpc_id, VpcAttributeName::EnableDnsSupport, false).await?;
        }
        if resource.get_bool("enable_dns_hostnames") == Some(true) {
            set_dns_attribute(client, &vpc_id, VpcAttributeName::EnableDnsHostnames, true).await?;
        }

        read_after_create(self, client, &resource.id, &vpc_id).await
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let Some(vpc) = find_vpc(client, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?
        else {
            log::warn!("VPC {} not found", identifier);
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert(
            "cidr_block".to_string(),
            Value::from(vpc.cidr_block().unwrap_or_default()),
        );
        attributes.insert(
            "instance_tenancy".to_string(),
            Value::from(vpc.instance_tenancy().map(|t| t.as_str()).unwrap_or("default")),
        );
        attributes.insert("tags".to_string(), state_tags(client, ec2_tags_to_map(vpc.tags())));

        let ipv6 = ipv6_association(&vpc);
        attributes.insert(
            "assign_generated_ipv6_cidr_block".to_string(),
            Value::Bool(ipv6.is_some()),
        );

        let mut state = State::existing(id.clone(), attributes).with_identifier(identifier);
        state.set_opt("ipv6_cidr_block", ipv6.map(|(_, cidr)| cidr));
        if let Some(owner_id) = vpc.owner_id() {
            state = state
                .with_attribute("owner_id", owner_id)
                .with_attribute("arn", ec2_arn(&client.region, owner_id, "vpc", identifier));
        }

        state.set_opt(
            "enable_dns_support",
            dns_attribute(client, identifier, VpcAttributeName::EnableDnsSupport).await?,
        );
        state.set_opt(
            "enable_dns_hostnames",
            dns_attribute(client, identifier, VpcAttributeName::EnableDnsHostnames).await?,
        );
        state.set_opt(
            "default_network_acl_id",
            default_network_acl_id(client, identifier).await?,
        );
        state.set_opt(
            "default_security_group_id",
            default_security_group_id(client, identifier).await?,
        );

        Ok(state)
    }

    async fn update(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        if let Some(Value::Bool(enabled)) = changed_value(from, to, "enable_dns_support") {
            set_dns_attribute(client, identifier, VpcAttributeName::EnableDnsSupport, *enabled)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        if let Some(Value::Bool(enabled)) = changed_value(from, to, "enable_dns_hostnames") {
            set_dns_attribute(client, identifier, VpcAttributeName::EnableDnsHostnames, *enabled)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }

        if let Some(Value::Bool(assign)) = changed_value(from, to, "assign_generated_ipv6_cidr_block") {
            if *assign {
                client
                    .ec2
                    .associate_vpc_cidr_block()
                    .vpc_id(identifier)
                    .amazon_provided_ipv6_cidr_block(true)
                    .send()
                    .await
                    .map_err(|e| sdk_error("Failed to associate IPv6 CIDR block", e).for_resource(id.clone()))?;
            } else if let Some(vpc) = find_vpc(client, identifier).await?
                && let Some((association_id, _)) = ipv6_association(&vpc)
            {
                client
                    .ec2
                    .disassociate_vpc_cidr_block()
                    .association_id(association_id)
                    .send()
                    .await
                    .map_err(|e| {
                        sdk_error("Failed to disassociate IPv6 CIDR block", e).for_resource(id.clone())
                    })?;
            }
        }

        if let Some((old, new)) = tag_changes(client, from, to) {
            update_ec2_tags(client, identifier, &old, &new)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }

        self.read(client, id, identifier).await
    }

    async fn delete(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
    ) -> ProviderResult<()> {
        log::info!("Deleting VPC {}", identifier);
        // Dependent network interfaces can take a while to disappear
        let result = retry_on_aws_code("DependencyViolation", DELETE_TIMEOUT, || {
            client.ec2.delete_vpc().vpc_id(identifier).send()
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(sdk_error(&format!("Failed to delete VPC {}", identifier), e)
                .for_resource(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ec2, ec2_error, replay_client};
    use aws_smithy_http_client::test_util::ReplayEvent;

    const VPC_ID: &str = "vpc-0abc";

    fn vpc_set(state: &str) -> String {
        format!(
            "<vpcSet><item><vpcId>{}</vpcId><ownerId>123456789012</ownerId><state>{}</state>\
             <cidrBlock>10.0.0.0/16</cidrBlock><instanceTenancy>default</instanceTenancy>\
             <tagSet><item><key>Name</key><value>main</value></item></tagSet></item></vpcSet>",
            VPC_ID, state
        )
    }

    fn read_events() -> Vec<ReplayEvent> {
        vec![
            ec2("DescribeVpcs", &vpc_set("available")),
            ec2(
                "DescribeVpcAttribute",
                "<vpcId>vpc-0abc</vpcId><enableDnsSupport><value>true</value></enableDnsSupport>",
            ),
            ec2(
                "DescribeVpcAttribute",
                "<vpcId>vpc-0abc</vpcId><enableDnsHostnames><value>false</value></enableDnsHostnames>",
            ),
            ec2(
                "DescribeNetworkAcls",
                "<networkAclSet><item><networkAclId>acl-0def</networkAclId></item></networkAclSet>",
            ),
            ec2(
                "DescribeSecurityGroups",
                "<securityGroupInfo><item><groupId>sg-0123</groupId></item></securityGroupInfo>",
            ),
        ]
    }

    fn resource() -> Resource {
        Resource::new("ec2.vpc", "main")
            .with_attribute("cidr_block", "10.0.0.0/16")
            .with_attribute("tags", Value::string_map([("Name", "main")]))
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_for_available_then_reads() {
        let mut events = vec![
            ec2(
                "CreateVpc",
                "<vpc><vpcId>vpc-0abc</vpcId><state>pending</state><cidrBlock>10.0.0.0/16</cidrBlock></vpc>",
            ),
            ec2("DescribeVpcs", &vpc_set("pending")),
            ec2("DescribeVpcs", &vpc_set("available")),
        ];
        events.extend(read_events());
        let (client, http) = replay_client(events);

        let state = VpcHandler.create(&client, &resource()).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.identifier.as_deref(), Some(VPC_ID));
        assert_eq!(state.get_str("cidr_block"), Some("10.0.0.0/16"));
        assert_eq!(state.get_str("instance_tenancy"), Some("default"));
        assert_eq!(state.get_bool("enable_dns_support"), Some(true));
        assert_eq!(state.get_bool("enable_dns_hostnames"), Some(false));
        assert_eq!(state.get_bool("assign_generated_ipv6_cidr_block"), Some(false));
        assert_eq!(state.get_str("default_network_acl_id"), Some("acl-0def"));
        assert_eq!(state.get_str("default_security_group_id"), Some("sg-0123"));
        assert_eq!(
            state.get_str("arn"),
            Some(ec2_arn("us-east-1", "123456789012", "vpc", VPC_ID).as_str())
        );
        assert_eq!(
            state.attributes.get("tags"),
            Some(&Value::string_map([("Name", "main")]))
        );
        assert_eq!(http.actual_requests().count(), 8);
    }

    #[tokio::test]
    async fn read_without_ipv6_association() {
        let (client, _) = replay_client(read_events());
        let id = ResourceId::new("ec2.vpc", "main");

        let state = VpcHandler.read(&client, &id, VPC_ID).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.get_str("cidr_block"), Some("10.0.0.0/16"));
        assert!(!state.attributes.contains_key("ipv6_cidr_block"));
    }

    #[tokio::test]
    async fn read_missing_vpc_is_not_found() {
        let (client, _) = replay_client(vec![ec2_error("InvalidVpcID.NotFound")]);
        let id = ResourceId::new("ec2.vpc", "main");

        let state = VpcHandler.read(&client, &id, VPC_ID).await.unwrap();
        assert!(!state.exists);
        assert_eq!(state.id, id);
    }

    #[tokio::test]
    async fn delete_missing_vpc_succeeds() {
        let (client, http) = replay_client(vec![ec2_error("InvalidVpcID.NotFound")]);
        let id = ResourceId::new("ec2.vpc", "main");
        let from = State::not_found(id.clone());

        VpcHandler.delete(&client, &id, VPC_ID, &from).await.unwrap();
        assert_eq!(http.actual_requests().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_retries_while_dependencies_remain() {
        let (client, http) = replay_client(vec![
            ec2_error("DependencyViolation"),
            ec2("DeleteVpc", "<return>true</return>"),
        ]);
        let id = ResourceId::new("ec2.vpc", "main");
        let from = State::not_found(id.clone());

        VpcHandler.delete(&client, &id, VPC_ID, &from).await.unwrap();
        assert_eq!(http.actual_requests().count(), 2);
    }

    #[tokio::test]
    async fn delete_surfaces_other_errors() {
        let (client, _) = replay_client(vec![ec2_error("UnauthorizedOperation")]);
        let id = ResourceId::new("ec2.vpc", "main");
        let from = State::not_found(id.clone());

        let err = VpcHandler.delete(&client, &id, VPC_ID, &from).await.unwrap_err();
        assert!(err.to_string().contains("UnauthorizedOperation"));
    }
}
