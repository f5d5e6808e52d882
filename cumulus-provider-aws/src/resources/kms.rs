//! kms.key resource and kms.public_key data source

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_kms::types::{KeyMetadata, KeySpec, KeyState, KeyUsageType, Tag};
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::retry::StateChangeConf;
use cumulus_core::schema::ResourceSchema;

use crate::config::AwsClient;
use crate::error::{
    NOT_FOUND_RETRY_TIMEOUT, PROPAGATION_TIMEOUT, is_not_found, retry_on_aws_code, sdk_error,
};
use crate::resources::{
    DataSourceHandler, ResourceHandler, changed_value, read_after_create, wait_error,
};
use crate::schemas::kms::{key_schema, public_key_schema};
use crate::tags::{desired_tags, diff_tags, state_tags, tag_changes};

const DEFAULT_POLICY_NAME: &str = "default";
const DELETE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub struct KmsKeyHandler;

pub struct PublicKeyHandler;

fn kms_tags<'a>(tags: impl IntoIterator<Item = (&'a String, &'a String)>) -> ProviderResult<Vec<Tag>> {
    tags.into_iter()
        .map(|(k, v)| {
            Tag::builder()
                .tag_key(k)
                .tag_value(v)
                .build()
                .map_err(|e| ProviderError::new(format!("Invalid tag {}: {}", k, e)))
        })
        .collect()
}

async fn find_key(client: &AwsClient, key_id: &str) -> ProviderResult<Option<KeyMetadata>> {
    match client.kms.describe_key().key_id(key_id).send().await {
        Ok(output) => Ok(output.key_metadata().cloned()),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(sdk_error(&format!("Failed to describe KMS key {}", key_id), e)),
    }
}

async fn set_key_enabled(client: &AwsClient, key_id: &str, enabled: bool) -> ProviderResult<()> {
    log::debug!("Setting KMS key {} enabled = {}", key_id, enabled);
    let context = format!("Failed to update enabled state of {}", key_id);
    if enabled {
        client
            .kms
            .enable_key()
            .key_id(key_id)
            .send()
            .await
            .map_err(|e| sdk_error(&context, e))?;
    } else {
        client
            .kms
            .disable_key()
            .key_id(key_id)
            .send()
            .await
            .map_err(|e| sdk_error(&context, e))?;
    }
    Ok(())
}

async fn set_key_rotation(client: &AwsClient, key_id: &str, enabled: bool) -> ProviderResult<()> {
    log::debug!("Setting KMS key {} rotation = {}", key_id, enabled);
    let context = format!("Failed to update rotation of {}", key_id);
    // A fresh key may not be visible to the rotation API yet
    if enabled {
        retry_on_aws_code("NotFoundException", NOT_FOUND_RETRY_TIMEOUT, || {
            client.kms.enable_key_rotation().key_id(key_id).send()
        })
        .await
        .map_err(|e| sdk_error(&context, e))?;
    } else {
        retry_on_aws_code("NotFoundException", NOT_FOUND_RETRY_TIMEOUT, || {
            client.kms.disable_key_rotation().key_id(key_id).send()
        })
        .await
        .map_err(|e| sdk_error(&context, e))?;
    }
    Ok(())
}

async fn put_policy(client: &AwsClient, key_id: &str, policy: &str) -> ProviderResult<()> {
    log::debug!("Updating policy of KMS key {}", key_id);
    retry_on_aws_code("MalformedPolicyDocumentException", PROPAGATION_TIMEOUT, || {
        client
            .kms
            .put_key_policy()
            .key_id(key_id)
            .policy_name(DEFAULT_POLICY_NAME)
            .policy(policy)
            .send()
    })
    .await
    .map_err(|e| sdk_error(&format!("Failed to update policy of {}", key_id), e))?;
    Ok(())
}

async fn update_kms_tags(
    client: &AwsClient,
    key_id: &str,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> ProviderResult<()> {
    let (upsert, remove) = diff_tags(old, new);
    if !remove.is_empty() {
        client
            .kms
            .untag_resource()
            .key_id(key_id)
            .set_tag_keys(Some(remove))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to untag {}", key_id), e))?;
    }
    if !upsert.is_empty() {
        client
            .kms
            .tag_resource()
            .key_id(key_id)
            .set_tags(Some(kms_tags(upsert.iter())?))
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to tag {}", key_id), e))?;
    }
    Ok(())
}

/// The deletion window only matters when the key is deleted; AWS never reports it
fn with_config_attributes(state: State, resource: &Resource) -> State {
    state.with_attribute(
        "deletion_window_in_days",
        resource.get_int("deletion_window_in_days").unwrap_or(30),
    )
}

/// DER bytes as a PEM `PUBLIC KEY` block with 64 character lines
pub fn public_key_pem(der: &[u8]) -> String {
    let encoded = aws_smithy_types::base64::encode(der);
    let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem
}

#[async_trait]
impl ResourceHandler for KmsKeyHandler {
    fn resource_type(&self) -> &'static str {
        "kms.key"
    }

    fn schema(&self) -> ResourceSchema {
        key_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let tags = desired_tags(client, resource);
        let req = client
            .kms
            .create_key()
            .set_description(resource.get_str("description").map(String::from))
            .set_key_usage(resource.get_str("key_usage").map(KeyUsageType::from))
            .set_key_spec(resource.get_str("customer_master_key_spec").map(KeySpec::from))
            .set_policy(resource.get_str("policy").map(String::from))
            .set_tags((!tags.is_empty()).then(|| kms_tags(tags.iter())).transpose()?);

        // Principals named in the policy may not have propagated through IAM yet
        let output = retry_on_aws_code("MalformedPolicyDocumentException", PROPAGATION_TIMEOUT, || {
            req.clone().send()
        })
        .await
        .map_err(|e| sdk_error("Failed to create KMS key", e).for_resource(resource.id.clone()))?;
        let key_id = output
            .key_metadata()
            .map(|m| m.key_id().to_string())
            .ok_or_else(|| {
                ProviderError::new("KMS key created but no metadata returned")
                    .for_resource(resource.id.clone())
            })?;
        log::info!("Created KMS key {}", key_id);

        if resource.get_bool("enable_key_rotation") == Some(true) {
            set_key_rotation(client, &key_id, true)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))?;
        }
        if resource.get_bool("is_enabled") == Some(false) {
            set_key_enabled(client, &key_id, false)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))?;
        }

        let state = read_after_create(self, client, &resource.id, &key_id).await?;
        Ok(with_config_attributes(state, resource))
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let metadata = find_key(client, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        let Some(metadata) = metadata.filter(|m| m.key_state() != Some(&KeyState::PendingDeletion))
        else {
            log::warn!("KMS key {} not found or pending deletion", identifier);
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert("key_id".to_string(), Value::from(metadata.key_id()));
        attributes.insert("is_enabled".to_string(), Value::Bool(metadata.enabled()));
        attributes.insert(
            "description".to_string(),
            Value::from(metadata.description().unwrap_or_default()),
        );
        let mut state = State::existing(id.clone(), attributes).with_identifier(identifier);
        state.set_opt("arn", metadata.arn());
        state.set_opt("key_usage", metadata.key_usage().map(|u| u.as_str()));
        state.set_opt("customer_master_key_spec", metadata.key_spec().map(|s| s.as_str()));

        let policy = client
            .kms
            .get_key_policy()
            .key_id(identifier)
            .policy_name(DEFAULT_POLICY_NAME)
            .send()
            .await
            .map_err(|e| sdk_error("Failed to read key policy", e).for_resource(id.clone()))?;
        state.set_opt("policy", policy.policy());

        let rotation = client
            .kms
            .get_key_rotation_status()
            .key_id(identifier)
            .send()
            .await
            .map_err(|e| sdk_error("Failed to read key rotation status", e).for_resource(id.clone()))?;
        state.set_opt("enable_key_rotation", Some(rotation.key_rotation_enabled()));

        let tags = client
            .kms
            .list_resource_tags()
            .key_id(identifier)
            .send()
            .await
            .map_err(|e| sdk_error("Failed to list key tags", e).for_resource(id.clone()))?;
        let tags = tags
            .tags()
            .iter()
            .map(|t| (t.tag_key().to_string(), t.tag_value().to_string()))
            .collect();
        state.set_opt("tags", Some(state_tags(client, tags)));

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
        let enabled_change = changed_value(from, to, "is_enabled").and_then(Value::as_bool);

        // Rotation can only change on an enabled key
        if enabled_change == Some(true) {
            set_key_enabled(client, identifier, true)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        if let Some(rotation) = changed_value(from, to, "enable_key_rotation").and_then(Value::as_bool) {
            set_key_rotation(client, identifier, rotation)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        if let Some(description) = changed_value(from, to, "description").and_then(Value::as_str) {
            client
                .kms
                .update_key_description()
                .key_id(identifier)
                .description(description)
                .send()
                .await
                .map_err(|e| {
                    sdk_error("Failed to update key description", e).for_resource(id.clone())
                })?;
        }
        if let Some(policy) = changed_value(from, to, "policy").and_then(Value::as_str) {
            put_policy(client, identifier, policy)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        if enabled_change == Some(false) {
            set_key_enabled(client, identifier, false)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }
        if let Some((old, new)) = tag_changes(client, from, to) {
            update_kms_tags(client, identifier, &old, &new)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
        }

        let state = self.read(client, id, identifier).await?;
        Ok(with_config_attributes(state, to))
    }

    /// Schedule deletion and wait until AWS reports it as pending.
    ///
    /// KMS keys cannot be deleted immediately; a key already pending deletion
    /// counts as deleted.
    async fn delete(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> ProviderResult<()> {
        let window_days = from.get_int("deletion_window_in_days");
        let Some(metadata) = find_key(client, identifier).await? else {
            return Ok(());
        };
        if metadata.key_state() == Some(&KeyState::PendingDeletion) {
            log::warn!("KMS key {} is already pending deletion", identifier);
            return Ok(());
        }

        log::info!("Scheduling deletion of KMS key {}", identifier);
        let result = client
            .kms
            .schedule_key_deletion()
            .key_id(identifier)
            .set_pending_window_in_days(window_days.map(|d| d as i32))
            .send()
            .await;
        match result {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => {
                return Err(sdk_error(&format!("Failed to schedule deletion of {}", identifier), e)
                    .for_resource(id.clone()));
            }
        }

        // KMS is eventually consistent; wait until every read agrees
        StateChangeConf::new(move || async move {
            let key = find_key(client, identifier).await?;
            Ok::<_, ProviderError>(key.map(|k| {
                let state = k.key_state().map(|s| s.as_str().to_string()).unwrap_or_default();
                (k, state)
            }))
        })
        .pending(["Enabled", "Disabled"])
        .target(["PendingDeletion"])
        .timeout(DELETE_TIMEOUT)
        .min_timeout(Duration::from_secs(2))
        .continuous_target_occurence(10)
        .wait_for_state()
        .await
        .map_err(|e| {
            wait_error(&format!("Error waiting for KMS key {} deletion", identifier), e)
                .for_resource(id.clone())
        })?;
        Ok(())
    }
}

#[async_trait]
impl DataSourceHandler for PublicKeyHandler {
    fn resource_type(&self) -> &'static str {
        "kms.public_key"
    }

    fn schema(&self) -> ResourceSchema {
        public_key_schema()
    }

    async fn read(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let key_id = resource.require_str("key_id")?;
        let grant_tokens = resource.get_string_list("grant_tokens");

        log::debug!("Reading public key of {}", key_id);
        let output = client
            .kms
            .get_public_key()
            .key_id(key_id)
            .set_grant_tokens((!grant_tokens.is_empty()).then_some(grant_tokens))
            .send()
            .await
            .map_err(|e| {
                sdk_error(&format!("Failed to get public key of {}", key_id), e)
                    .for_resource(resource.id.clone())
            })?;

        let arn = output.key_id().unwrap_or(key_id).to_string();
        let mut attributes: HashMap<String, Value> = resource.attributes.clone();
        attributes.insert("arn".to_string(), Value::from(arn.as_str()));
        if let Some(der) = output.public_key() {
            attributes.insert(
                "public_key".to_string(),
                Value::from(aws_smithy_types::base64::encode(der.as_ref())),
            );
            attributes.insert("public_key_pem".to_string(), Value::from(public_key_pem(der.as_ref())));
        }
        let mut state = State::existing(resource.id.clone(), attributes).with_identifier(arn);
        state.set_opt("key_usage", output.key_usage().map(|u| u.as_str()));
        state.set_opt("customer_master_key_spec", output.key_spec().map(|s| s.as_str()));
        state.set_opt(
            "encryption_algorithms",
            Some(Value::string_list(
                output.encryption_algorithms().iter().map(|a| a.as_str()),
            )),
        );
        state.set_opt(
            "signing_algorithms",
            Some(Value::string_list(
                output.signing_algorithms().iter().map(|a| a.as_str()),
            )),
        );
        Ok(state)
    }
}
