//! sagemaker.notebook_instance resource
//!
//! Most settings of a notebook instance can only change while it is stopped,
//! so updates stop the instance, apply the change and start it again.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sagemaker::operation::describe_notebook_instance::DescribeNotebookInstanceOutput;
use aws_sdk_sagemaker::types::{DirectInternetAccess, InstanceType, RootAccess, Tag};
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::retry::StateChangeConf;
use cumulus_core::schema::ResourceSchema;

use crate::config::AwsClient;
use crate::error::{is_aws_err, sdk_error};
use crate::resources::{ResourceHandler, changed_value, wait_error};
use crate::schemas::sagemaker::notebook_instance_schema;
use crate::tags::{desired_tags, diff_tags, state_tags, tag_changes};

const STATUS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Settings that can only be changed while the instance is stopped
const STOPPED_UPDATE_ATTRIBUTES: &[&str] = &[
    "instance_type",
    "role_arn",
    "volume_size",
    "lifecycle_config_name",
    "root_access",
];

pub struct NotebookInstanceHandler;

fn sagemaker_tags<'a>(
    tags: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> ProviderResult<Vec<Tag>> {
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

/// SageMaker reports a missing notebook as a validation error
async fn find_notebook(
    client: &AwsClient,
    name: &str,
) -> ProviderResult<Option<DescribeNotebookInstanceOutput>> {
    let result = client
        .sagemaker
        .describe_notebook_instance()
        .notebook_instance_name(name)
        .send()
        .await;
    match result {
        Ok(output) => Ok(Some(output)),
        Err(e) if is_aws_err(&e, "ValidationException", "RecordNotFound") => Ok(None),
        Err(e) => Err(sdk_error(&format!("Failed to describe notebook instance {}", name), e)),
    }
}

fn notebook_status(output: &DescribeNotebookInstanceOutput) -> String {
    output
        .notebook_instance_status()
        .map(|s| s.as_str().to_string())
        .unwrap_or_default()
}

/// Wait until the notebook reaches one of `target`; an empty target waits for deletion
async fn wait_for_status(
    client: &AwsClient,
    name: &str,
    pending: &[&str],
    target: &[&str],
) -> ProviderResult<()> {
    log::debug!("Waiting for notebook instance {} to reach {:?}", name, target);
    StateChangeConf::new(move || async move {
        let notebook = find_notebook(client, name).await?;
        Ok::<_, ProviderError>(notebook.map(|n| {
            let status = notebook_status(&n);
            (n, status)
        }))
    })
    .pending(pending.iter().copied())
    .target(target.iter().copied())
    .timeout(STATUS_TIMEOUT)
    .min_timeout(Duration::from_secs(10))
    .wait_for_state()
    .await
    .map_err(|e| {
        wait_error(
            &format!("Error waiting for notebook instance {} to reach {:?}", name, target),
            e,
        )
    })?;
    Ok(())
}

async fn stop_notebook(client: &AwsClient, name: &str) -> ProviderResult<()> {
    let Some(notebook) = find_notebook(client, name).await? else {
        return Ok(());
    };
    match notebook_status(&notebook).as_str() {
        "Stopped" | "Failed" => return Ok(()),
        "Pending" | "Updating" => {
            wait_for_status(client, name, &["Pending", "Updating"], &["InService", "Stopped"]).await?;
        }
        _ => {}
    }

    log::info!("Stopping notebook instance {}", name);
    let result = client
        .sagemaker
        .stop_notebook_instance()
        .notebook_instance_name(name)
        .send()
        .await;
    if let Err(e) = result {
        // Already stopping or stopped
        if !is_aws_err(&e, "ValidationException", "") {
            return Err(sdk_error(&format!("Failed to stop notebook instance {}", name), e));
        }
        log::debug!("Stop of {} skipped: {}", name, e);
    }
    wait_for_status(client, name, &["Stopping", "InService"], &["Stopped"]).await
}

async fn start_notebook(client: &AwsClient, name: &str) -> ProviderResult<()> {
    log::info!("Starting notebook instance {}", name);
    client
        .sagemaker
        .start_notebook_instance()
        .notebook_instance_name(name)
        .send()
        .await
        .map_err(|e| sdk_error(&format!("Failed to start notebook instance {}", name), e))?;
    wait_for_status(client, name, &["Pending", "Stopped"], &["InService"]).await
}

async fn update_notebook_tags(
    client: &AwsClient,
    arn: &str,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> ProviderResult<()> {
    let (upsert, remove) = diff_tags(old, new);
    if !remove.is_empty() {
        client
            .sagemaker
            .delete_tags()
            .resource_arn(arn)
            .set_tag_keys(Some(remove))
            .send()
            .await
            .map_err(|e| sdk_error("Failed to remove notebook tags", e))?;
    }
    if !upsert.is_empty() {
        client
            .sagemaker
            .add_tags()
            .resource_arn(arn)
            .set_tags(Some(sagemaker_tags(upsert.iter())?))
            .send()
            .await
            .map_err(|e| sdk_error("Failed to tag notebook", e))?;
    }
    Ok(())
}

async fn read_tags(client: &AwsClient, arn: &str) -> ProviderResult<HashMap<String, String>> {
    let output = client
        .sagemaker
        .list_tags()
        .resource_arn(arn)
        .send()
        .await
        .map_err(|e| sdk_error("Failed to list notebook tags", e))?;
    Ok(output
        .tags()
        .iter()
        .map(|t| (t.key().to_string(), t.value().to_string()))
        .collect())
}

/// Whether an update needs the instance stopped
fn needs_stop(from: &State, to: &Resource) -> bool {
    STOPPED_UPDATE_ATTRIBUTES.iter().any(|key| {
        changed_value(from, to, key).is_some() || (to.attr(key).is_none() && from.attr(key).is_some())
    })
}

#[async_trait]
impl ResourceHandler for NotebookInstanceHandler {
    fn resource_type(&self) -> &'static str {
        "sagemaker.notebook_instance"
    }

    fn schema(&self) -> ResourceSchema {
        notebook_instance_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let name = resource.require_str("name")?;
        let tags = desired_tags(client, resource);
        let security_groups = resource.get_string_list("security_groups");

        client
            .sagemaker
            .create_notebook_instance()
            .notebook_instance_name(name)
            .instance_type(InstanceType::from(resource.require_str("instance_type")?))
            .role_arn(resource.require_str("role_arn")?)
            .set_subnet_id(resource.get_str("subnet_id").map(String::from))
            .set_security_group_ids((!security_groups.is_empty()).then_some(security_groups))
            .set_kms_key_id(resource.get_str("kms_key_id").map(String::from))
            .set_lifecycle_config_name(resource.get_str("lifecycle_config_name").map(String::from))
            .set_direct_internet_access(
                resource.get_str("direct_internet_access").map(DirectInternetAccess::from),
            )
            .set_root_access(resource.get_str("root_access").map(RootAccess::from))
            .set_volume_size_in_gb(resource.get_int("volume_size").map(|v| v as i32))
            .set_tags((!tags.is_empty()).then(|| sagemaker_tags(tags.iter())).transpose()?)
            .send()
            .await
            .map_err(|e| {
                sdk_error(&format!("Failed to create notebook instance {}", name), e)
                    .for_resource(resource.id.clone())
            })?;
        log::info!("Created notebook instance {}", name);

        wait_for_status(client, name, &["Pending"], &["InService"])
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        self.read(client, &resource.id, name).await
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let Some(notebook) = find_notebook(client, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?
        else {
            log::warn!("Notebook instance {} not found", identifier);
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(identifier));
        attributes.insert(
            "security_groups".to_string(),
            Value::string_list(notebook.security_groups().iter().map(String::as_str)),
        );
        let mut state = State::existing(id.clone(), attributes).with_identifier(identifier);
        state.set_opt("instance_type", notebook.instance_type().map(|t| t.as_str()));
        state.set_opt("role_arn", notebook.role_arn());
        state.set_opt("subnet_id", notebook.subnet_id());
        state.set_opt("kms_key_id", notebook.kms_key_id());
        state.set_opt(
            "lifecycle_config_name",
            notebook.notebook_instance_lifecycle_config_name(),
        );
        state.set_opt(
            "direct_internet_access",
            notebook.direct_internet_access().map(|d| d.as_str()),
        );
        state.set_opt("root_access", notebook.root_access().map(|r| r.as_str()));
        state.set_opt("volume_size", notebook.volume_size_in_gb().map(i64::from));
        state.set_opt("url", notebook.url());
        state.set_opt("network_interface_id", notebook.network_interface_id());

        if let Some(arn) = notebook.notebook_instance_arn() {
            let tags = read_tags(client, arn)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
            state = state
                .with_attribute("arn", arn)
                .with_attribute("tags", state_tags(client, tags));
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
        let apply = async {
            if needs_stop(from, to) {
                stop_notebook(client, identifier).await?;

                let mut req = client
                    .sagemaker
                    .update_notebook_instance()
                    .notebook_instance_name(identifier)
                    .set_instance_type(
                        changed_value(from, to, "instance_type")
                            .and_then(Value::as_str)
                            .map(InstanceType::from),
                    )
                    .set_role_arn(
                        changed_value(from, to, "role_arn")
                            .and_then(Value::as_str)
                            .map(String::from),
                    )
                    .set_volume_size_in_gb(
                        changed_value(from, to, "volume_size")
                            .and_then(Value::as_int)
                            .map(|v| v as i32),
                    )
                    .set_root_access(
                        changed_value(from, to, "root_access")
                            .and_then(Value::as_str)
                            .map(RootAccess::from),
                    );
                match to.get_str("lifecycle_config_name") {
                    Some(config) if from.get_str("lifecycle_config_name") != Some(config) => {
                        req = req.lifecycle_config_name(config);
                    }
                    None if from.get_str("lifecycle_config_name").is_some() => {
                        req = req.disassociate_lifecycle_config(true);
                    }
                    _ => {}
                }

                log::info!("Updating notebook instance {}", identifier);
                req.send().await.map_err(|e| {
                    sdk_error(&format!("Failed to update notebook instance {}", identifier), e)
                })?;
                wait_for_status(client, identifier, &["Updating"], &["Stopped"]).await?;
                start_notebook(client, identifier).await?;
            }

            if let Some((old, new)) = tag_changes(client, from, to)
                && let Some(arn) = from.get_str("arn")
            {
                update_notebook_tags(client, arn, &old, &new).await?;
            }
            Ok::<_, ProviderError>(())
        };
        apply.await.map_err(|e| e.for_resource(id.clone()))?;

        self.read(client, id, identifier).await
    }

    async fn delete(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
    ) -> ProviderResult<()> {
        let remove = async {
            if find_notebook(client, identifier).await?.is_none() {
                return Ok::<_, ProviderError>(());
            }
            stop_notebook(client, identifier).await?;

            log::info!("Deleting notebook instance {}", identifier);
            let result = client
                .sagemaker
                .delete_notebook_instance()
                .notebook_instance_name(identifier)
                .send()
                .await;
            match result {
                Ok(_) => {}
                Err(e) if is_aws_err(&e, "ValidationException", "RecordNotFound") => return Ok(()),
                Err(e) => {
                    return Err(sdk_error(
                        &format!("Failed to delete notebook instance {}", identifier),
                        e,
                    ));
                }
            }
            wait_for_status(client, identifier, &["Deleting"], &[]).await
        };
        remove.await.map_err(|e| e.for_resource(id.clone()))
    }
}
