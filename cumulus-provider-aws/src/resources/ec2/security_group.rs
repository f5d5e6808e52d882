//! ec2.security_group resource

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::types::{IpPermission, IpRange, ResourceType as Ec2ResourceType, SecurityGroup};
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::schema::ResourceSchema;

use super::ec2_arn;
use crate::config::AwsClient;
use crate::error::{is_not_found, retry_on_aws_code, sdk_error};
use crate::resources::{ResourceHandler, read_after_create};
use crate::schemas::ec2::security_group_schema;
use crate::tags::{
    desired_tags, ec2_tag_specification, ec2_tags_to_map, state_tags, tag_changes, update_ec2_tags,
};

const DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct SecurityGroupHandler;

pub(crate) async fn find_security_group(
    client: &AwsClient,
    group_id: &str,
) -> ProviderResult<Option<SecurityGroup>> {
    match client.ec2.describe_security_groups().group_ids(group_id).send().await {
        Ok(output) => Ok(output.security_groups().first().cloned()),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(sdk_error(&format!("Failed to describe security group {}", group_id), e)),
    }
}

/// The allow-all IPv4 egress rule AWS adds to new VPC security groups
fn default_egress_permission() -> IpPermission {
    IpPermission::builder()
        .ip_protocol("-1")
        .from_port(0)
        .to_port(0)
        .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
        .build()
}

async fn revoke_default_egress(client: &AwsClient, group_id: &str) -> ProviderResult<()> {
    log::debug!("Revoking default egress rule of {}", group_id);
    let result = client
        .ec2
        .revoke_security_group_egress()
        .group_id(group_id)
        .ip_permissions(default_egress_permission())
        .send()
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => {
            log::warn!("Default egress rule of {} already removed", group_id);
            Ok(())
        }
        Err(e) => Err(sdk_error(
            &format!("Failed to revoke default egress rule of {}", group_id),
            e,
        )),
    }
}

/// Attributes the API cannot report back
fn with_config_attributes(state: State, resource: &Resource) -> State {
    state.with_attribute(
        "revoke_default_egress",
        resource.get_bool("revoke_default_egress").unwrap_or(false),
    )
}

#[async_trait]
impl ResourceHandler for SecurityGroupHandler {
    fn resource_type(&self) -> &'static str {
        "ec2.security_group"
    }

    fn schema(&self) -> ResourceSchema {
        security_group_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let name = resource.require_str("name")?;
        let description = resource.get_str("description").unwrap_or("Managed by Cumulus");
        let tags = desired_tags(client, resource);

        let output = client
            .ec2
            .create_security_group()
            .group_name(name)
            .description(description)
            .set_vpc_id(resource.get_str("vpc_id").map(String::from))
            .set_tag_specifications(
                ec2_tag_specification(Ec2ResourceType::SecurityGroup, &tags).map(|s| vec![s]),
            )
            .send()
            .await
            .map_err(|e| {
                sdk_error("Failed to create security group", e).for_resource(resource.id.clone())
            })?;
        let group_id = output
            .group_id()
            .ok_or_else(|| {
                ProviderError::new("Security group created but no ID returned")
                    .for_resource(resource.id.clone())
            })?
            .to_string();
        log::info!("Created security group {}", group_id);

        // Wait for the group to be readable before changing its rules
        let state = read_after_create(self, client, &resource.id, &group_id).await?;

        if resource.get_bool("revoke_default_egress") == Some(true) {
            revoke_default_egress(client, &group_id)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))?;
        }

        Ok(with_config_attributes(state, resource))
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let Some(group) = find_security_group(client, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?
        else {
            log::warn!("Security group {} not found", identifier);
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(group.group_name().unwrap_or_default()));
        attributes.insert(
            "description".to_string(),
            Value::from(group.description().unwrap_or_default()),
        );
        attributes.insert("tags".to_string(), state_tags(client, ec2_tags_to_map(group.tags())));

        let mut state = State::existing(id.clone(), attributes).with_identifier(identifier);
        state.set_opt("vpc_id", group.vpc_id());
        if let Some(owner_id) = group.owner_id() {
            state = state.with_attribute("owner_id", owner_id).with_attribute(
                "arn",
                ec2_arn(&client.region, owner_id, "security-group", identifier),
            );
        }
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
        if let Some((old, new)) = tag_changes(client, from, to) {
            update_ec2_tags(client, identifier, &old, &new)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }

        // Revocation only applies once; turning the flag off does not restore the rule
        if to.get_bool("revoke_default_egress") == Some(true)
            && from.get_bool("revoke_default_egress") != Some(true)
        {
            revoke_default_egress(client, identifier)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }

        let state = self.read(client, id, identifier).await?;
        Ok(with_config_attributes(state, to))
    }

    async fn delete(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
    ) -> ProviderResult<()> {
        log::info!("Deleting security group {}", identifier);
        // Network interfaces of deleted instances release the group slowly
        let result = retry_on_aws_code("DependencyViolation", DELETE_TIMEOUT, || {
            client.ec2.delete_security_group().group_id(identifier).send()
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(
                sdk_error(&format!("Failed to delete security group {}", identifier), e)
                    .for_resource(id.clone()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_egress_allows_everything() {
        let permission = default_egress_permission();
        assert_eq!(permission.ip_protocol(), Some("-1"));
        assert_eq!(permission.from_port(), Some(0));
        assert_eq!(permission.ip_ranges()[0].cidr_ip(), Some("0.0.0.0/0"));
    }

    #[test]
    fn config_attributes_default_to_false() {
        let resource = Resource::new("ec2.security_group", "web").with_attribute("name", "web");
        let state = with_config_attributes(
            State::existing(resource.id.clone(), HashMap::new()),
            &resource,
        );
        assert_eq!(state.get_bool("revoke_default_egress"), Some(false));

        let resource = resource.with_attribute("revoke_default_egress", true);
        let state = with_config_attributes(
            State::existing(resource.id.clone(), HashMap::new()),
            &resource,
        );
        assert_eq!(state.get_bool("revoke_default_egress"), Some(true));
    }
}
