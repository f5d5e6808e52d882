//! s3.bucket resource

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, BucketLocationConstraint, BucketVersioningStatus,
    CreateBucketConfiguration, ExpirationStatus, LifecycleExpiration, LifecycleRule,
    LifecycleRuleFilter, Tag, Tagging, VersioningConfiguration,
};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use cumulus_core::provider::{ProviderError, ProviderResult};
use cumulus_core::resource::{AttributeMap, Resource, ResourceId, State, Value};
use cumulus_core::schema::ResourceSchema;

use crate::config::AwsClient;
use crate::error::{is_aws_err, is_not_found, sdk_error};
use crate::resources::{ResourceHandler, read_after_create};
use crate::schemas::s3::bucket_schema;
use crate::tags::{desired_tags, state_tags, tag_changes};

/// Id of the lifecycle rule managed through `expiration_days`
const EXPIRATION_RULE_ID: &str = "auto-expiration";

pub struct BucketHandler;

/// 403 is returned when the bucket does not exist or is owned by another account,
/// 301 when it lives in another region
fn bucket_absent<E: ProvideErrorMetadata>(err: &SdkError<E>) -> bool {
    if is_not_found(err) {
        return true;
    }
    match err {
        SdkError::ServiceError(service_err) => {
            matches!(service_err.raw().status().as_u16(), 301 | 403 | 404)
        }
        _ => false,
    }
}

/// Buckets in us-east-1 report no location constraint, legacy EU buckets report "EU"
fn region_from_location(constraint: Option<&str>) -> String {
    match constraint {
        None | Some("") => "us-east-1".to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

fn versioning_configuration(status: &str) -> VersioningConfiguration {
    let status = if status == "Enabled" {
        BucketVersioningStatus::Enabled
    } else {
        BucketVersioningStatus::Suspended
    };
    VersioningConfiguration::builder().status(status).build()
}

fn expiration_rule(days: i64) -> ProviderResult<LifecycleRule> {
    LifecycleRule::builder()
        .id(EXPIRATION_RULE_ID)
        .status(ExpirationStatus::Enabled)
        .filter(LifecycleRuleFilter::builder().prefix("").build())
        .expiration(LifecycleExpiration::builder().days(days as i32).build())
        .build()
        .map_err(|e| ProviderError::new(format!("Failed to build lifecycle rule: {}", e)))
}

fn s3_tagging<'a>(tags: impl IntoIterator<Item = (&'a String, &'a String)>) -> ProviderResult<Tagging> {
    let tag_set = tags
        .into_iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| ProviderError::new(format!("Invalid tag {}: {}", k, e)))
        })
        .collect::<ProviderResult<Vec<_>>>()?;
    Tagging::builder()
        .set_tag_set(Some(tag_set))
        .build()
        .map_err(|e| ProviderError::new(format!("Failed to build tagging: {}", e)))
}

async fn put_versioning(client: &AwsClient, bucket: &str, status: &str) -> ProviderResult<()> {
    log::debug!("Setting versioning of {} to {}", bucket, status);
    client
        .s3
        .put_bucket_versioning()
        .bucket(bucket)
        .versioning_configuration(versioning_configuration(status))
        .send()
        .await
        .map_err(|e| sdk_error("Failed to configure versioning", e))?;
    Ok(())
}

async fn put_expiration(client: &AwsClient, bucket: &str, days: Option<i64>) -> ProviderResult<()> {
    let Some(days) = days else {
        log::debug!("Removing lifecycle configuration of {}", bucket);
        client
            .s3
            .delete_bucket_lifecycle()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("Failed to remove lifecycle", e))?;
        return Ok(());
    };

    let config = BucketLifecycleConfiguration::builder()
        .rules(expiration_rule(days)?)
        .build()
        .map_err(|e| ProviderError::new(format!("Failed to build lifecycle config: {}", e)))?;
    client
        .s3
        .put_bucket_lifecycle_configuration()
        .bucket(bucket)
        .lifecycle_configuration(config)
        .send()
        .await
        .map_err(|e| sdk_error("Failed to set lifecycle", e))?;
    Ok(())
}

async fn put_tags(client: &AwsClient, bucket: &str, tags: &HashMap<String, String>) -> ProviderResult<()> {
    if tags.is_empty() {
        client
            .s3
            .delete_bucket_tagging()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("Failed to remove bucket tags", e))?;
        return Ok(());
    }
    client
        .s3
        .put_bucket_tagging()
        .bucket(bucket)
        .tagging(s3_tagging(tags.iter())?)
        .send()
        .await
        .map_err(|e| sdk_error("Failed to tag bucket", e))?;
    Ok(())
}

async fn read_tags(client: &AwsClient, bucket: &str) -> ProviderResult<HashMap<String, String>> {
    match client.s3.get_bucket_tagging().bucket(bucket).send().await {
        Ok(output) => Ok(output
            .tag_set()
            .iter()
            .map(|t| (t.key().to_string(), t.value().to_string()))
            .collect()),
        Err(e) if is_aws_err(&e, "NoSuchTagSet", "") => Ok(HashMap::new()),
        Err(e) => Err(sdk_error("Failed to read bucket tags", e)),
    }
}

async fn read_expiration(client: &AwsClient, bucket: &str) -> ProviderResult<Option<i64>> {
    let result = client
        .s3
        .get_bucket_lifecycle_configuration()
        .bucket(bucket)
        .send()
        .await;
    match result {
        Ok(lifecycle) => Ok(lifecycle
            .rules()
            .iter()
            .filter(|rule| rule.id() == Some(EXPIRATION_RULE_ID))
            .find_map(|rule| rule.expiration().and_then(|e| e.days()))
            .map(i64::from)),
        Err(e) if is_aws_err(&e, "NoSuchLifecycleConfiguration", "") => Ok(None),
        Err(e) => Err(sdk_error("Failed to read lifecycle", e)),
    }
}

/// Delete every object version and delete marker so the bucket can be removed
async fn empty_bucket(client: &AwsClient, bucket: &str) -> ProviderResult<()> {
    log::info!("Deleting all objects in bucket {}", bucket);
    let mut key_marker: Option<String> = None;
    let mut version_marker: Option<String> = None;
    loop {
        let page = client
            .s3
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(key_marker.clone())
            .set_version_id_marker(version_marker.clone())
            .send()
            .await
            .map_err(|e| sdk_error(&format!("Failed to list objects in {}", bucket), e))?;

        let versions = page
            .versions()
            .iter()
            .filter_map(|v| Some((v.key()?, v.version_id())));
        let markers = page
            .delete_markers()
            .iter()
            .filter_map(|m| Some((m.key()?, m.version_id())));
        for (key, version_id) in versions.chain(markers) {
            log::debug!("Deleting {} ({})", key, version_id.unwrap_or("null"));
            client
                .s3
                .delete_object()
                .bucket(bucket)
                .key(key)
                .set_version_id(version_id.map(String::from))
                .send()
                .await
                .map_err(|e| sdk_error(&format!("Failed to delete object {}", key), e))?;
        }

        if page.is_truncated() != Some(true) {
            return Ok(());
        }
        key_marker = page.next_key_marker().map(String::from);
        version_marker = page.next_version_id_marker().map(String::from);
    }
}

fn with_config_attributes(state: State, resource: &Resource) -> State {
    state.with_attribute(
        "force_destroy",
        resource.get_bool("force_destroy").unwrap_or(false),
    )
}

#[async_trait]
impl ResourceHandler for BucketHandler {
    fn resource_type(&self) -> &'static str {
        "s3.bucket"
    }

    fn schema(&self) -> ResourceSchema {
        bucket_schema()
    }

    async fn create(&self, client: &AwsClient, resource: &Resource) -> ProviderResult<State> {
        let bucket = resource.require_str("name")?;
        let region = resource.get_str("region").unwrap_or(client.region.as_str());

        let mut req = client.s3.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint
        if region != "us-east-1" {
            let config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build();
            req = req.create_bucket_configuration(config);
        }
        req.send().await.map_err(|e| {
            sdk_error(&format!("Failed to create bucket {}", bucket), e)
                .for_resource(resource.id.clone())
        })?;
        log::info!("Created bucket {} in {}", bucket, region);

        // New buckets answer NoSuchBucket for a short while
        read_after_create(self, client, &resource.id, bucket).await?;

        let configure = async {
            if let Some(status) = resource.get_str("versioning") {
                put_versioning(client, bucket, status).await?;
            }
            if let Some(days) = resource.get_int("expiration_days") {
                put_expiration(client, bucket, Some(days)).await?;
            }
            let tags = desired_tags(client, resource);
            if !tags.is_empty() {
                put_tags(client, bucket, &tags).await?;
            }
            Ok::<_, ProviderError>(())
        };
        configure
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        let state = self.read(client, &resource.id, bucket).await?;
        Ok(with_config_attributes(state, resource))
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        if let Err(e) = client.s3.head_bucket().bucket(identifier).send().await {
            if bucket_absent(&e) {
                log::warn!("Bucket {} not found", identifier);
                return Ok(State::not_found(id.clone()));
            }
            return Err(sdk_error(&format!("Failed to read bucket {}", identifier), e)
                .for_resource(id.clone()));
        }

        let read = async {
            let location = client
                .s3
                .get_bucket_location()
                .bucket(identifier)
                .send()
                .await
                .map_err(|e| sdk_error("Failed to read bucket location", e))?;
            let versioning = client
                .s3
                .get_bucket_versioning()
                .bucket(identifier)
                .send()
                .await
                .map_err(|e| sdk_error("Failed to read versioning", e))?;
            let expiration = read_expiration(client, identifier).await?;
            let tags = read_tags(client, identifier).await?;
            Ok::<_, ProviderError>((location, versioning, expiration, tags))
        };
        let (location, versioning, expiration, tags) =
            read.await.map_err(|e| e.for_resource(id.clone()))?;

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(identifier));
        attributes.insert(
            "region".to_string(),
            Value::from(region_from_location(
                location.location_constraint().map(|c| c.as_str()),
            )),
        );
        // Buckets that never had versioning report no status
        attributes.insert(
            "versioning".to_string(),
            Value::from(versioning.status().map(|s| s.as_str()).unwrap_or("Suspended")),
        );
        attributes.insert("tags".to_string(), state_tags(client, tags));
        attributes.insert("arn".to_string(), Value::from(format!("arn:aws:s3:::{}", identifier)));
        attributes.insert(
            "bucket_domain_name".to_string(),
            Value::from(format!("{}.s3.amazonaws.com", identifier)),
        );

        let mut state = State::existing(id.clone(), attributes).with_identifier(identifier);
        state.set_opt("expiration_days", expiration);
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
            if let Some(status) = to.get_str("versioning")
                && from.get_str("versioning") != Some(status)
            {
                put_versioning(client, identifier, status).await?;
            }
            let days = to.get_int("expiration_days");
            if from.get_int("expiration_days") != days {
                put_expiration(client, identifier, days).await?;
            }
            if let Some((_, new)) = tag_changes(client, from, to) {
                log::debug!("Retagging bucket {} with {} tags", identifier, new.len());
                // Bucket tagging replaces the whole set
                put_tags(client, identifier, &new).await?;
            }
            Ok::<_, ProviderError>(())
        };
        apply.await.map_err(|e| e.for_resource(id.clone()))?;

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
        if from.get_bool("force_destroy") == Some(true) {
            match empty_bucket(client, identifier).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.for_resource(id.clone())),
            }
        }

        log::info!("Deleting bucket {}", identifier);
        match client.s3.delete_bucket().bucket(identifier).send().await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) if is_aws_err(&e, "BucketNotEmpty", "") => Err(ProviderError::new(format!(
                "Bucket {} is not empty; set force_destroy to delete its objects",
                identifier
            ))
            .with_cause(e)
            .for_resource(id.clone())),
            Err(e) => Err(sdk_error(&format!("Failed to delete bucket {}", identifier), e)
                .for_resource(id.clone())),
        }
    }
}
