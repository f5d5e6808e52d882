//! iam.role resource

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_iam::types::{Role, Tag};
use aws_smithy_types::date_time::Format;
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::schema::ResourceSchema;
use percent_encoding::percent_decode_str;

use crate::config::AwsClient;
use crate::error::{
    PROPAGATION_TIMEOUT, is_not_found, retry_on_aws_code, retry_on_aws_message, sdk_error,
};
use crate::resources::{ResourceHandler, changed_value, read_after_create};
use crate::schemas::iam::role_schema;
use crate::tags::{desired_tags, diff_tags, state_tags, tag_changes};

/// IAM rejects principals it has not seen yet with this message
const INVALID_PRINCIPAL: &str = "Invalid principal in policy";

pub struct RoleHandler;

fn iam_tags<'a>(tags: impl IntoIterator<Item = (&'a String, &'a String)>) -> ProviderResult<Vec<Tag>> {
    tags.into_iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| ProviderError::new(format!("Invalid tag {}: {}", k, e)))
        })
        .collect()
}

/// IAM returns policy documents URL-encoded
pub fn decode_policy_document(document: &str) -> String {
    percent_decode_str(document).decode_utf8_lossy().into_owned()
}

async fn find_role(client: &AwsClient, name: &str) -> ProviderResult<Option<Role>> {
    match client.iam.get_role().role_name(name).send().await {
        Ok(output) => Ok(output.role().cloned()),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(sdk_error(&format!("Failed to read IAM role {}", name), e)),
    }
}

async fn update_role_tags(
    client: &AwsClient,
    name: &str,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> ProviderResult<()> {
    let (upsert, remove) = diff_tags(old, new);
    if !remove.is_empty() {
        client
            .iam
            .untag_role()
            .role_name(name)
            .set_tag_keys(Some(remove))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to untag IAM role {}", name), e))?;
    }
    if !upsert.is_empty() {
        client
            .iam
            .tag_role()
            .role_name(name)
            .set_tags(Some(iam_tags(upsert.iter())?))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to tag IAM role {}", name), e))?;
    }
    Ok(())
}

/// Roles attached to instance profiles or policies cannot be deleted
async fn detach_role(client: &AwsClient, name: &str, inline_policies: bool) -> ProviderResult<()> {
    let profiles = client
        .iam
        .list_instance_profiles_for_role()
        .role_name(name)
        .send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to list instance profiles of {}", name), e))?;
    for profile in profiles.instance_profiles() {
        log::debug!(
            "Removing role {} from instance profile {}",
            name,
            profile.instance_profile_name()
        );
        client
            .iam
            .remove_role_from_instance_profile()
            .role_name(name)
            .instance_profile_name(profile.instance_profile_name())
            .send()
            .await
            .map_err(|e| sdk_error("Failed to remove role from instance profile", e))?;
    }

    let attached = client
        .iam
        .list_attached_role_policies()
        .role_name(name)
        .send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to list policies of {}", name), e))?;
    for policy in attached.attached_policies() {
        let Some(arn) = policy.policy_arn() else {
            continue;
        };
        log::debug!("Detaching {} from role {}", arn, name);
        let result = client
            .iam
            .detach_role_policy()
            .role_name(name)
            .policy_arn(arn)
            .send()
            .await;
        match result {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(sdk_error(&format!("Failed to detach {}", arn), e)),
        }
    }

    if inline_policies {
        let inline = client
            .iam
            .list_role_policies()
            .role_name(name)
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to list inline policies of {}", name), e))?;
        for policy_name in inline.policy_names() {
            log::debug!("Deleting inline policy {} of role {}", policy_name, name);
            let result = client
                .iam
                .delete_role_policy()
                .role_name(name)
                .policy_name(policy_name)
                .send()
                .await;
            match result {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(sdk_error(&format!("Failed to delete policy {}", policy_name), e)),
            }
        }
    }
    Ok(())
}

fn with_config_attributes(state: State, resource: &Resource) -> State {
    state.with_attribute(
        "force_detach_policies",
        resource.get_bool("force_detach_policies").unwrap_or(false),
    )
}

#[async_trait]
impl ResourceHandler for RoleHandler {
    fn resource_type(&self) -> &'static str {
        "iam.role"
    }

    fn schema(&self) -> ResourceSchema {
        role_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let name = resource.require_str("name")?;
        let policy = resource.require_str("assume_role_policy")?;
        let tags = desired_tags(client, resource);

        let req = client
            .iam
            .create_role()
            .role_name(name)
            .path(resource.get_str("path").unwrap_or("/"))
            .assume_role_policy_document(policy)
            .set_description(resource.get_str("description").map(String::from))
            .set_max_session_duration(resource.get_int("max_session_duration").map(|d| d as i32))
            .set_permissions_boundary(resource.get_str("permissions_boundary").map(String::from))
            .set_tags((!tags.is_empty()).then(|| iam_tags(tags.iter())).transpose()?);

        // A principal created moments ago may not be visible to IAM yet
        retry_on_aws_message("MalformedPolicyDocument", INVALID_PRINCIPAL, PROPAGATION_TIMEOUT, || {
            req.clone().send()
        })
        .await
        .map_err(|e| {
            sdk_error(&format!("Failed to create IAM role {}", name), e)
                .for_resource(resource.id.clone())
        })?;
        log::info!("Created IAM role {}", name);

        let state = read_after_create(self, client, &resource.id, name).await?;
        Ok(with_config_attributes(state, resource))
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let Some(role) = find_role(client, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?
        else {
            log::warn!("IAM role {} not found", identifier);
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(role.role_name()));
        attributes.insert("path".to_string(), Value::from(role.path()));
        attributes.insert("arn".to_string(), Value::from(role.arn()));
        attributes.insert("unique_id".to_string(), Value::from(role.role_id()));
        attributes.insert(
            "max_session_duration".to_string(),
            Value::Int(role.max_session_duration().unwrap_or(3600) as i64),
        );
        let tags = role
            .tags()
            .iter()
            .map(|t| (t.key().to_string(), t.value().to_string()))
            .collect();
        attributes.insert("tags".to_string(), state_tags(client, tags));

        let mut state = State::existing(id.clone(), attributes).with_identifier(identifier);
        state.set_opt("description", role.description());
        state.set_opt("create_date", role.create_date().fmt(Format::DateTime).ok());
        state.set_opt(
            "assume_role_policy",
            role.assume_role_policy_document().map(decode_policy_document),
        );
        state.set_opt(
            "permissions_boundary",
            role.permissions_boundary()
                .and_then(|b| b.permissions_boundary_arn()),
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
        if let Some(policy) = changed_value(from, to, "assume_role_policy").and_then(Value::as_str) {
            log::debug!("Updating trust policy of {}", identifier);
            retry_on_aws_message("MalformedPolicyDocument", INVALID_PRINCIPAL, PROPAGATION_TIMEOUT, || {
                client
                    .iam
                    .update_assume_role_policy()
                    .role_name(identifier)
                    .policy_document(policy)
                    .send()
            })
            .await
            .map_err(|e| sdk_error("Failed to update trust policy", e).for_resource(id.clone()))?;
        }

        // An empty description clears the one AWS holds
        let cleared = from.get_str("description").is_some() && to.get_str("description").is_none();
        let description = match changed_value(from, to, "description") {
            Some(value) => value.as_str(),
            None if cleared => Some(""),
            None => None,
        };
        let max_session = changed_value(from, to, "max_session_duration").and_then(Value::as_int);
        if description.is_some() || max_session.is_some() {
            client
                .iam
                .update_role()
                .role_name(identifier)
                .set_description(description.map(String::from))
                .set_max_session_duration(max_session.map(|d| d as i32))
                .send()
                .await
                .map_err(|e| sdk_error("Failed to update IAM role", e).for_resource(id.clone()))?;
        }

        let old_boundary = from.get_str("permissions_boundary");
        let new_boundary = to.get_str("permissions_boundary");
        if old_boundary != new_boundary {
            let context = "Failed to update permissions boundary";
            match new_boundary {
                Some(arn) => {
                    client
                        .iam
                        .put_role_permissions_boundary()
                        .role_name(identifier)
                        .permissions_boundary(arn)
                        .send()
                        .await
                        .map_err(|e| sdk_error(context, e).for_resource(id.clone()))?;
                }
                None => {
                    client
                        .iam
                        .delete_role_permissions_boundary()
                        .role_name(identifier)
                        .send()
                        .await
                        .map_err(|e| sdk_error(context, e).for_resource(id.clone()))?;
                }
            }
        }

        if let Some((old, new)) = tag_changes(client, from, to) {
            update_role_tags(client, identifier, &old, &new)
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
        from: &State,
    ) -> ProviderResult<()> {
        let inline_policies = from.get_bool("force_detach_policies").unwrap_or(false);
        match detach_role(client, identifier, inline_policies).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.for_resource(id.clone())),
        }

        log::info!("Deleting IAM role {}", identifier);
        // Detached policies take a moment to stop counting as attached
        let result = retry_on_aws_code("DeleteConflict", PROPAGATION_TIMEOUT, || {
            client.iam.delete_role().role_name(identifier).send()
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(sdk_error(&format!("Failed to delete IAM role {}", identifier), e)
                .for_resource(id.clone())),
        }
    }
}
