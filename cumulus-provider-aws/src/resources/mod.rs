//! Resource and data source handlers
//!
//! Each AWS resource type is one handler. [`AwsProvider`](crate::AwsProvider)
//! looks handlers up by type name and passes them the shared [`AwsClient`].

pub mod apigateway;
pub mod appconfig;
pub mod ec2;
pub mod iam;
pub mod kms;
pub mod s3;
pub mod sagemaker;

use async_trait::async_trait;
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{Resource, ResourceId, State, Value};
use cumulus_core::retry::{RetryError, WaitError, retry};
use cumulus_core::schema::ResourceSchema;

use crate::config::AwsClient;
use crate::error::NOT_FOUND_RETRY_TIMEOUT;

/// Create, read, update and delete for one resource type
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource type name (e.g., "ec2.vpc")
    fn resource_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    /// Create the remote object; the returned state carries its identifier
    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State>;

    /// Read the remote object; a missing object is `State::not_found`, not an error
    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State>;

    async fn update(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let _ = (client, identifier, from, to);
        Err(ProviderError::new(format!(
            "{} does not support in-place updates",
            self.resource_type()
        ))
        .for_resource(id.clone()))
    }

    /// Delete the remote object; deleting an object that is already gone succeeds.
    /// `from` is the last stored state.
    async fn delete(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> ProviderResult<()>;

    /// Map a user-supplied import id to the identifier kept in state
    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        Ok(import_id.to_string())
    }
}

/// Read-only lookup driven by configured arguments
#[async_trait]
pub trait DataSourceHandler: Send + Sync {
    fn resource_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    async fn read(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State>;
}

/// Every managed resource type
pub fn resource_handlers() -> Vec<&'static dyn ResourceHandler> {
    vec![
        &ec2::vpc::VpcHandler,
        &ec2::network_acl::NetworkAclHandler,
        &ec2::security_group::SecurityGroupHandler,
        &ec2::security_group_rule::SecurityGroupRuleHandler,
        &kms::KmsKeyHandler,
        &iam::RoleHandler,
        &s3::BucketHandler,
        &apigateway::MethodResponseHandler,
        &appconfig::HostedConfigurationVersionHandler,
        &sagemaker::NotebookInstanceHandler,
    ]
}

/// Every data source type
pub fn data_source_handlers() -> Vec<&'static dyn DataSourceHandler> {
    vec![
        &ec2::availability_zones::AvailabilityZonesHandler,
        &kms::PublicKeyHandler,
    ]
}

pub fn find_resource(resource_type: &str) -> Option<&'static dyn ResourceHandler> {
    resource_handlers()
        .into_iter()
        .find(|h| h.resource_type() == resource_type)
}

pub fn find_data_source(resource_type: &str) -> Option<&'static dyn DataSourceHandler> {
    data_source_handlers()
        .into_iter()
        .find(|h| h.resource_type() == resource_type)
}

/// Read an object that was just created, retrying while it is not yet visible
pub async fn read_after_create<H>(
    handler: &H,
    client: &AwsClient,
    id: &ResourceId,
    identifier: &str,
) -> ProviderResult<State>
where
    H: ResourceHandler + ?Sized,
{
    retry(NOT_FOUND_RETRY_TIMEOUT, move || async move {
        match handler.read(client, id, identifier).await {
            Ok(state) if state.exists => Ok(state),
            Ok(_) => Err(RetryError::Retryable(ProviderError::not_found(format!(
                "{} {} not found after creation",
                handler.resource_type(),
                identifier
            )))),
            Err(e) => Err(RetryError::NonRetryable(e)),
        }
    })
    .await
    .map_err(|e| e.for_resource(id.clone()))
}

/// The configured value of `key` when it differs from the stored state
pub fn changed_value<'a>(from: &State, to: &'a Resource, key: &str) -> Option<&'a Value> {
    to.attributes
        .get(key)
        .filter(|v| from.attributes.get(key) != Some(*v))
}

/// Flatten a wait failure into a provider error; refresh errors pass through
pub fn wait_error(context: &str, err: WaitError<ProviderError>) -> ProviderError {
    match err {
        WaitError::Refresh(e) => e,
        other => ProviderError::new(format!("{}: {}", context, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn handler_names_are_unique() {
        let mut seen = HashSet::new();
        for h in resource_handlers() {
            assert!(seen.insert(h.resource_type()), "duplicate {}", h.resource_type());
        }
        for h in data_source_handlers() {
            assert!(seen.insert(h.resource_type()), "duplicate {}", h.resource_type());
        }
    }

    #[test]
    fn schema_names_match_handlers() {
        for h in resource_handlers() {
            let schema = h.schema();
            assert_eq!(schema.resource_type, h.resource_type());
            assert!(!schema.data_source);
        }
        for h in data_source_handlers() {
            let schema = h.schema();
            assert_eq!(schema.resource_type, h.resource_type());
            assert!(schema.data_source);
        }
    }

    #[test]
    fn lookup_by_type() {
        assert!(find_resource("ec2.vpc").is_some());
        assert!(find_resource("ec2.availability_zones").is_none());
        assert!(find_data_source("ec2.availability_zones").is_some());
        assert!(find_data_source("kms.public_key").is_some());
    }

    #[test]
    fn changed_value_ignores_unset_and_equal() {
        let id = ResourceId::new("ec2.vpc", "main");
        let from = State::existing(id.clone(), Default::default())
            .with_attribute("enable_dns_support", true)
            .with_attribute("enable_dns_hostnames", false);
        let to = Resource::new("ec2.vpc", "main")
            .with_attribute("enable_dns_support", true)
            .with_attribute("enable_dns_hostnames", true);
        assert_eq!(changed_value(&from, &to, "enable_dns_support"), None);
        assert_eq!(
            changed_value(&from, &to, "enable_dns_hostnames"),
            Some(&Value::Bool(true))
        );
        assert_eq!(changed_value(&from, &to, "tags"), None);
    }

    #[test]
    fn wait_error_passes_refresh_through() {
        let err = wait_error(
            "waiting for VPC",
            WaitError::Refresh(ProviderError::not_found("gone")),
        );
        assert!(err.is_not_found());

        let err = wait_error("waiting for VPC", WaitError::NotFound { checks: 20 });
        assert!(err.to_string().starts_with("waiting for VPC: "));
    }
}
