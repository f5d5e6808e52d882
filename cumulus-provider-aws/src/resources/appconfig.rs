//! appconfig.hosted_configuration_version resource

use std::collections::HashMap;

use async_trait::async_trait;
use aws_smithy_types::Blob;
use cumulus_core::provider::ProviderResult;
use cumulus_core::resource::{Resource, ResourceId, State, Value};
use cumulus_core::schema::ResourceSchema;

use crate::config::AwsClient;
use crate::error::{is_not_found, sdk_error};
use crate::id::{hosted_configuration_version_id, parse_hosted_configuration_version_id};
use crate::resources::ResourceHandler;
use crate::schemas::appconfig::hosted_configuration_version_schema;

pub struct HostedConfigurationVersionHandler;

#[async_trait]
impl ResourceHandler for HostedConfigurationVersionHandler {
    fn resource_type(&self) -> &'static str {
        "appconfig.hosted_configuration_version"
    }

    fn schema(&self) -> ResourceSchema {
        hosted_configuration_version_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let app_id = resource.require_str("application_id")?;
        let profile_id = resource.require_str("configuration_profile_id")?;
        let content = resource.require_str("content")?;

        let output = client
            .appconfig
            .create_hosted_configuration_version()
            .application_id(app_id)
            .configuration_profile_id(profile_id)
            .content(Blob::new(content.as_bytes()))
            .content_type(resource.require_str("content_type")?)
            .set_description(resource.get_str("description").map(String::from))
            .send()
            .await
            .map_err(|e| {
                sdk_error("Failed to create hosted configuration version", e)
                    .for_resource(resource.id.clone())
            })?;

        let identifier =
            hosted_configuration_version_id(app_id, profile_id, output.version_number() as i64);
        log::info!("Created hosted configuration version {}", identifier);
        self.read(client, &resource.id, &identifier).await
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let (app_id, profile_id, version) = parse_hosted_configuration_version_id(identifier)
            .map_err(|e| e.for_resource(id.clone()))?;

        let result = client
            .appconfig
            .get_hosted_configuration_version()
            .application_id(&app_id)
            .configuration_profile_id(&profile_id)
            .version_number(version as i32)
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => {
                log::warn!("Hosted configuration version {} not found", identifier);
                return Ok(State::not_found(id.clone()));
            }
            Err(e) => {
                return Err(sdk_error("Failed to read hosted configuration version", e)
                    .for_resource(id.clone()));
            }
        };

        let mut attributes = HashMap::new();
        attributes.insert("application_id".to_string(), Value::from(app_id));
        attributes.insert("configuration_profile_id".to_string(), Value::from(profile_id));
        attributes.insert("version_number".to_string(), Value::Int(version));
        let content = output
            .content()
            .map(|blob| String::from_utf8_lossy(blob.as_ref()).into_owned())
            .unwrap_or_default();
        attributes.insert("content".to_string(), Value::from(content));

        let mut state = State::existing(id.clone(), attributes).with_identifier(identifier);
        state.set_opt("content_type", output.content_type());
        state.set_opt("description", output.description());
        Ok(state)
    }

    async fn delete(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
    ) -> ProviderResult<()> {
        let (app_id, profile_id, version) = parse_hosted_configuration_version_id(identifier)
            .map_err(|e| e.for_resource(id.clone()))?;

        log::info!("Deleting hosted configuration version {}", identifier);
        let result = client
            .appconfig
            .delete_hosted_configuration_version()
            .application_id(app_id)
            .configuration_profile_id(profile_id)
            .version_number(version as i32)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(sdk_error("Failed to delete hosted configuration version", e)
                .for_resource(id.clone())),
        }
    }

    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        let (app_id, profile_id, version) = parse_hosted_configuration_version_id(import_id)?;
        Ok(hosted_configuration_version_id(&app_id, &profile_id, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_rejected() {
        let handler = HostedConfigurationVersionHandler;
        let schema = handler.schema();
        assert!(schema.attributes.values().all(|a| a.force_new || a.computed));
    }

    #[test]
    fn import_normalizes_identifier() {
        let handler = HostedConfigurationVersionHandler;
        assert_eq!(
            handler.import_identifier("app1/prof2/007").unwrap(),
            "app1/prof2/7"
        );
        assert!(handler.import_identifier("app1/prof2").is_err());
        assert!(handler.import_identifier("app1/prof2/latest").is_err());
    }
}
