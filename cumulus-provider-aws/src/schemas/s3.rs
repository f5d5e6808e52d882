//! S3 bucket schema definition

use cumulus_core::resource::Value;
use cumulus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types::{aws_region, bucket_name, versioning_status};

/// Returns the schema for S3 buckets
pub fn bucket_schema() -> ResourceSchema {
    ResourceSchema::new("s3.bucket")
        .with_description("An S3 bucket for object storage")
        .attribute(
            AttributeSchema::new("name", bucket_name())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("region", aws_region())
                .optional_computed()
                .force_new()
                .with_description("The AWS region for the bucket (inherited from provider if not specified)"),
        )
        .attribute(
            AttributeSchema::new("versioning", versioning_status())
                .optional_computed()
                .with_description("Versioning status of the bucket"),
        )
        .attribute(
            AttributeSchema::new("expiration_days", types::positive_int())
                .with_description("Number of days before objects expire"),
        )
        .attribute(
            AttributeSchema::new("force_destroy", AttributeType::Bool)
                .config_only()
                .with_default(Value::Bool(false))
                .with_description("Delete every object version before destroying the bucket"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("bucket_domain_name", AttributeType::String).computed())
}

/// Returns all S3-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![bucket_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn bucket(name: &str) -> HashMap<String, Value> {
        HashMap::from([("name".to_string(), Value::from(name))])
    }

    #[test]
    fn valid_bucket() {
        let mut attrs = bucket("my-bucket");
        attrs.insert("region".to_string(), Value::from("ap-northeast-1"));
        attrs.insert("versioning".to_string(), Value::from("Enabled"));
        assert!(bucket_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn invalid_bucket_name() {
        // too short
        assert!(bucket_schema().validate(&bucket("ab")).is_err());
        assert!(bucket_schema().validate(&bucket("My_Bucket")).is_err());
    }

    #[test]
    fn invalid_region() {
        let mut attrs = bucket("my-bucket");
        attrs.insert("region".to_string(), Value::from("mars-north-1"));
        assert!(bucket_schema().validate(&attrs).is_err());
    }

    #[test]
    fn region_is_optional() {
        assert!(bucket_schema().validate(&bucket("my-bucket")).is_ok());
    }

    #[test]
    fn invalid_expiration_days() {
        let mut attrs = bucket("my-bucket");
        attrs.insert("expiration_days".to_string(), Value::Int(-1));
        assert!(bucket_schema().validate(&attrs).is_err());
    }

    #[test]
    fn versioning_is_enabled_or_suspended() {
        let mut attrs = bucket("my-bucket");
        attrs.insert("versioning".to_string(), Value::from("On"));
        assert!(bucket_schema().validate(&attrs).is_err());
    }
}
