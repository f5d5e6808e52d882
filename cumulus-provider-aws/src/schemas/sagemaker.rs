//! SageMaker schema definitions

use cumulus_core::resource::Value;
use cumulus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types::{int_range, one_of, sagemaker_name};

fn volume_size() -> AttributeType {
    AttributeType::Custom {
        name: "VolumeSizeInGB".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| int_range(value, 5, 16384),
    }
}

fn instance_type() -> AttributeType {
    AttributeType::Custom {
        name: "NotebookInstanceType".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if s.starts_with("ml.") && s.len() > 3 => Ok(()),
            Value::String(s) => Err(format!("Invalid instance type '{}', expected ml.*", s)),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Returns the schema for SageMaker notebook instances
pub fn notebook_instance_schema() -> ResourceSchema {
    ResourceSchema::new("sagemaker.notebook_instance")
        .with_description("A SageMaker notebook instance")
        .attribute(
            AttributeSchema::new("name", sagemaker_name())
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new("instance_type", instance_type()).required())
        .attribute(AttributeSchema::new("role_arn", types::arn()).required())
        .attribute(AttributeSchema::new("subnet_id", AttributeType::String).force_new())
        .attribute(
            AttributeSchema::new(
                "security_groups",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .optional_computed()
            .force_new(),
        )
        .attribute(AttributeSchema::new("kms_key_id", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("lifecycle_config_name", AttributeType::String))
        .attribute(
            AttributeSchema::new("direct_internet_access", one_of(&["Enabled", "Disabled"]))
                .force_new()
                .with_default(Value::from("Enabled")),
        )
        .attribute(
            AttributeSchema::new("root_access", one_of(&["Enabled", "Disabled"]))
                .with_default(Value::from("Enabled")),
        )
        .attribute(
            AttributeSchema::new("volume_size", volume_size())
                .with_default(Value::Int(5))
                .with_description("ML storage volume size in GB"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("url", AttributeType::String).computed())
        .attribute(AttributeSchema::new("network_interface_id", AttributeType::String).computed())
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![notebook_instance_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn attrs(instance_type: &str) -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), Value::from("research-notebook")),
            ("instance_type".to_string(), Value::from(instance_type)),
            (
                "role_arn".to_string(),
                Value::from("arn:aws:iam::123456789012:role/sagemaker"),
            ),
        ])
    }

    #[test]
    fn valid_notebook() {
        assert!(notebook_instance_schema().validate(&attrs("ml.t3.medium")).is_ok());
    }

    #[test]
    fn instance_type_prefix() {
        assert!(notebook_instance_schema().validate(&attrs("t3.medium")).is_err());
    }

    #[test]
    fn volume_size_bounds() {
        let mut attrs = attrs("ml.t3.medium");
        attrs.insert("volume_size".to_string(), Value::Int(4));
        assert!(notebook_instance_schema().validate(&attrs).is_err());
    }

    #[test]
    fn name_rejects_underscores() {
        let mut attrs = attrs("ml.t3.medium");
        attrs.insert("name".to_string(), Value::from("research_notebook"));
        assert!(notebook_instance_schema().validate(&attrs).is_err());
    }
}
