//! AppConfig schema definitions

use cumulus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

/// Returns the schema for hosted configuration versions.
///
/// Versions are immutable, so every argument forces a new version.
pub fn hosted_configuration_version_schema() -> ResourceSchema {
    ResourceSchema::new("appconfig.hosted_configuration_version")
        .with_description("One immutable version of a hosted configuration")
        .attribute(
            AttributeSchema::new("application_id", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("configuration_profile_id", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("content", AttributeType::String)
                .required()
                .force_new()
                .sensitive(),
        )
        .attribute(
            AttributeSchema::new("content_type", types::non_empty_string())
                .required()
                .force_new()
                .with_description("MIME type of the content, e.g. application/json"),
        )
        .attribute(AttributeSchema::new("description", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("version_number", AttributeType::Int).computed())
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![hosted_configuration_version_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_core::resource::Value;
    use std::collections::HashMap;

    #[test]
    fn every_argument_forces_replacement() {
        let schema = hosted_configuration_version_schema();
        for attr in schema.attributes.values() {
            assert!(attr.force_new || attr.computed, "{} is updatable", attr.name);
        }
        assert!(schema.attributes["content"].sensitive);
    }

    #[test]
    fn content_type_required() {
        let attrs = HashMap::from([
            ("application_id".to_string(), Value::from("abc1234")),
            ("configuration_profile_id".to_string(), Value::from("def5678")),
            ("content".to_string(), Value::from("{}")),
        ]);
        assert!(hosted_configuration_version_schema().validate(&attrs).is_err());
    }
}
