//! IAM schema definitions

use cumulus_core::resource::Value;
use cumulus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types::{iam_role_name, int_range, policy_document, suppress_equivalent_json};

fn max_session_duration() -> AttributeType {
    AttributeType::Custom {
        name: "MaxSessionDuration".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| int_range(value, 3600, 43200),
    }
}

/// Returns the schema for IAM roles
pub fn role_schema() -> ResourceSchema {
    ResourceSchema::new("iam.role")
        .with_description("An IAM role")
        .attribute(
            AttributeSchema::new("name", iam_role_name())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("path", AttributeType::String)
                .force_new()
                .with_default(Value::from("/")),
        )
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(
            AttributeSchema::new("assume_role_policy", policy_document())
                .required()
                .with_diff_suppress(suppress_equivalent_json)
                .with_description("Trust policy naming who may assume the role"),
        )
        .attribute(
            AttributeSchema::new("max_session_duration", max_session_duration())
                .with_default(Value::Int(3600))
                .with_description("Maximum session length in seconds, 1 to 12 hours"),
        )
        .attribute(AttributeSchema::new("permissions_boundary", types::arn()))
        .attribute(
            AttributeSchema::new("force_detach_policies", AttributeType::Bool)
                .config_only()
                .with_default(Value::Bool(false))
                .with_description("Delete inline policies before destroying the role"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("unique_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("create_date", AttributeType::String).computed())
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![role_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TRUST: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"ec2.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

    #[test]
    fn valid_role() {
        let attrs = HashMap::from([
            ("name".to_string(), Value::from("app-role")),
            ("assume_role_policy".to_string(), Value::from(TRUST)),
            ("max_session_duration".to_string(), Value::Int(7200)),
        ]);
        assert!(role_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn session_duration_bounds() {
        let attrs = HashMap::from([
            ("name".to_string(), Value::from("app-role")),
            ("assume_role_policy".to_string(), Value::from(TRUST)),
            ("max_session_duration".to_string(), Value::Int(60)),
        ]);
        assert!(role_schema().validate(&attrs).is_err());
    }

    #[test]
    fn role_name_characters() {
        let attrs = HashMap::from([
            ("name".to_string(), Value::from("app role")),
            ("assume_role_policy".to_string(), Value::from(TRUST)),
        ]);
        assert!(role_schema().validate(&attrs).is_err());
    }
}
