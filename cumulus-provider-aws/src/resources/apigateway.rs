//! apigateway.method_response resource

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_apigateway::types::{Op, PatchOperation};
use cumulus_core::provider::ProviderResult;
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::schema::ResourceSchema;

use crate::config::AwsClient;
use crate::error::{is_not_found, retry_on_aws_code, sdk_error};
use crate::id::{MethodResponseKey, parse_method_response_id, parse_method_response_import_id};
use crate::resources::{ResourceHandler, read_after_create};
use crate::schemas::apigateway::method_response_schema;

/// API Gateway rejects concurrent changes to the same REST API
const CONFLICT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct MethodResponseHandler;

fn key_from_resource(resource: &Resource) -> ProviderResult<MethodResponseKey> {
    Ok(MethodResponseKey {
        rest_api_id: resource.require_str("rest_api_id")?.to_string(),
        resource_id: resource.require_str("resource_id")?.to_string(),
        http_method: resource.require_str("http_method")?.to_string(),
        status_code: resource.require_str("status_code")?.to_string(),
    })
}

fn response_parameters<M: AttributeMap + ?Sized>(attrs: &M) -> HashMap<String, bool> {
    attrs
        .get_map("response_parameters")
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_bool()?)))
                .collect()
        })
        .unwrap_or_default()
}

/// JSON pointer escaping for patch paths
fn escape_path(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn patch(op: Op, path: String, value: Option<String>) -> PatchOperation {
    PatchOperation::builder()
        .op(op)
        .path(path)
        .set_value(value)
        .build()
}

/// Patch operations that turn one map into another under `prefix`
fn map_patch_operations<V: PartialEq + ToString>(
    prefix: &str,
    old: &HashMap<String, V>,
    new: &HashMap<String, V>,
) -> Vec<PatchOperation> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let path = format!("{}/{}", prefix, escape_path(key));
            match (old.get(key), new.get(key)) {
                (Some(_), None) => Some(patch(Op::Remove, path, None)),
                (None, Some(v)) => Some(patch(Op::Add, path, Some(v.to_string()))),
                (Some(a), Some(b)) if a != b => Some(patch(Op::Replace, path, Some(b.to_string()))),
                _ => None,
            }
        })
        .collect()
}

pub fn method_response_patch_operations(from: &State, to: &Resource) -> Vec<PatchOperation> {
    let mut ops = map_patch_operations(
        "/responseModels",
        &from.get_string_map("response_models"),
        &to.get_string_map("response_models"),
    );
    ops.extend(map_patch_operations(
        "/responseParameters",
        &response_parameters(from),
        &response_parameters(to),
    ));
    ops
}

#[async_trait]
impl ResourceHandler for MethodResponseHandler {
    fn resource_type(&self) -> &'static str {
        "apigateway.method_response"
    }

    fn schema(&self) -> ResourceSchema {
        method_response_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let key = key_from_resource(resource)?;
        let models = resource.get_string_map("response_models");
        let parameters = response_parameters(resource);

        let req = client
            .apigateway
            .put_method_response()
            .rest_api_id(&key.rest_api_id)
            .resource_id(&key.resource_id)
            .http_method(&key.http_method)
            .status_code(&key.status_code)
            .set_response_models((!models.is_empty()).then_some(models))
            .set_response_parameters((!parameters.is_empty()).then_some(parameters));

        {
            let _guard = client.locks.lock(&key.rest_api_id).await;
            retry_on_aws_code("ConflictException", CONFLICT_TIMEOUT, || req.clone().send())
                .await
                .map_err(|e| {
                    sdk_error("Failed to create method response", e).for_resource(resource.id.clone())
                })?;
        }
        let identifier = key.id();
        log::info!("Created method response {}", identifier);

        read_after_create(self, client, &resource.id, &identifier).await
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let key = parse_method_response_id(identifier).map_err(|e| e.for_resource(id.clone()))?;
        let result = client
            .apigateway
            .get_method_response()
            .rest_api_id(&key.rest_api_id)
            .resource_id(&key.resource_id)
            .http_method(&key.http_method)
            .status_code(&key.status_code)
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => {
                log::warn!("Method response {} not found", identifier);
                return Ok(State::not_found(id.clone()));
            }
            Err(e) => {
                return Err(sdk_error("Failed to read method response", e).for_resource(id.clone()));
            }
        };

        let mut attributes = HashMap::new();
        attributes.insert("rest_api_id".to_string(), Value::from(key.rest_api_id.as_str()));
        attributes.insert("resource_id".to_string(), Value::from(key.resource_id.as_str()));
        attributes.insert("http_method".to_string(), Value::from(key.http_method.as_str()));
        attributes.insert(
            "status_code".to_string(),
            Value::from(output.status_code().unwrap_or(key.status_code.as_str())),
        );
        if let Some(models) = output.response_models()
            && !models.is_empty()
        {
            attributes.insert(
                "response_models".to_string(),
                Value::string_map(models.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            );
        }
        if let Some(parameters) = output.response_parameters()
            && !parameters.is_empty()
        {
            attributes.insert(
                "response_parameters".to_string(),
                Value::Map(
                    parameters
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::Bool(*v)))
                        .collect(),
                ),
            );
        }

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let key = parse_method_response_id(identifier).map_err(|e| e.for_resource(id.clone()))?;
        let ops = method_response_patch_operations(from, to);
        if !ops.is_empty() {
            log::debug!("Applying {} patch operations to {}", ops.len(), identifier);
            let _guard = client.locks.lock(&key.rest_api_id).await;
            retry_on_aws_code("ConflictException", CONFLICT_TIMEOUT, || {
                client
                    .apigateway
                    .update_method_response()
                    .rest_api_id(&key.rest_api_id)
                    .resource_id(&key.resource_id)
                    .http_method(&key.http_method)
                    .status_code(&key.status_code)
                    .set_patch_operations(Some(ops.clone()))
                    .send()
            })
            .await
            .map_err(|e| sdk_error("Failed to update method response", e).for_resource(id.clone()))?;
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
        let key = parse_method_response_id(identifier).map_err(|e| e.for_resource(id.clone()))?;
        log::info!("Deleting method response {}", identifier);
        let _guard = client.locks.lock(&key.rest_api_id).await;
        let result = retry_on_aws_code("ConflictException", CONFLICT_TIMEOUT, || {
            client
                .apigateway
                .delete_method_response()
                .rest_api_id(&key.rest_api_id)
                .resource_id(&key.resource_id)
                .http_method(&key.http_method)
                .status_code(&key.status_code)
                .send()
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(sdk_error("Failed to delete method response", e).for_resource(id.clone())),
        }
    }

    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        Ok(parse_method_response_import_id(import_id)?.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(models: &[(&str, &str)], params: &[(&str, bool)]) -> State {
        let id = ResourceId::new("apigateway.method_response", "ok");
        State::existing(id, HashMap::new())
            .with_attribute("response_models", Value::string_map(models.iter().copied()))
            .with_attribute(
                "response_parameters",
                Value::Map(
                    params
                        .iter()
                        .map(|(k, v)| (k.to_string(), Value::Bool(*v)))
                        .collect(),
                ),
            )
    }

    #[test]
    fn patch_paths_are_escaped() {
        let from = state(&[("application/json", "Empty")], &[]);
        let to = Resource::new("apigateway.method_response", "ok")
            .with_attribute("response_models", Value::string_map([("application/json", "Error")]));
        let ops = method_response_patch_operations(&from, &to);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op(), Some(&Op::Replace));
        assert_eq!(ops[0].path(), Some("/responseModels/application~1json"));
        assert_eq!(ops[0].value(), Some("Error"));
    }

    #[test]
    fn parameters_added_and_removed() {
        let from = state(&[], &[("method.response.header.Old", true)]);
        let to = Resource::new("apigateway.method_response", "ok").with_attribute(
            "response_parameters",
            Value::Map(HashMap::from([(
                "method.response.header.New".to_string(),
                Value::Bool(false),
            )])),
        );
        let ops = method_response_patch_operations(&from, &to);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op(), Some(&Op::Add));
        assert_eq!(ops[0].path(), Some("/responseParameters/method.response.header.New"));
        assert_eq!(ops[0].value(), Some("false"));
        assert_eq!(ops[1].op(), Some(&Op::Remove));
        assert_eq!(ops[1].value(), None);
    }

    #[test]
    fn no_changes_no_operations() {
        let from = state(&[("application/json", "Empty")], &[("h", true)]);
        let to = Resource::new("apigateway.method_response", "ok")
            .with_attribute("response_models", Value::string_map([("application/json", "Empty")]))
            .with_attribute(
                "response_parameters",
                Value::Map(HashMap::from([("h".to_string(), Value::Bool(true))])),
            );
        assert!(method_response_patch_operations(&from, &to).is_empty());
    }

    #[test]
    fn import_id_maps_to_identifier() {
        let handler = MethodResponseHandler;
        assert_eq!(
            handler.import_identifier("a1b2c3/r4s5/GET/200").unwrap(),
            "agmr-a1b2c3-r4s5-GET-200"
        );
        assert!(handler.import_identifier("a1b2c3/r4s5/GET").is_err());
    }
}
