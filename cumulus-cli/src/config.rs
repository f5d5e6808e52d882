//! Configuration file (`cumulus.json`)

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use cumulus_core::differ::dependency_order;
use cumulus_core::resource::{Resource, ResourceId, Value};
use cumulus_core::schema::ResourceSchema;
use cumulus_provider_aws::ProviderConfig;
use cumulus_state::BackendConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CumulusConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Data sources, read on every plan
    #[serde(default)]
    pub data: Vec<ResourceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ResourceConfig {
    fn to_resource(&self, read_only: bool) -> Resource {
        let mut resource = Resource::new(&self.resource_type, &self.name).with_read_only(read_only);
        for (key, value) in &self.attributes {
            if let Some(value) = Value::from_json(value) {
                resource.attributes.insert(key.clone(), value);
            }
        }
        resource
    }
}

impl CumulusConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("Parse error: {}", e))
    }

    /// Declared resources followed by data sources
    pub fn resources(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .map(|r| r.to_resource(false))
            .chain(self.data.iter().map(|r| r.to_resource(true)))
            .collect()
    }
}

/// Check declared resources against their schemas.
///
/// Collects every problem instead of stopping at the first one.
pub fn validate_resources(
    resources: &[Resource],
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(), String> {
    let mut errors = Vec::new();
    let mut seen: HashSet<&ResourceId> = HashSet::new();

    for resource in resources {
        if !seen.insert(&resource.id) {
            errors.push(format!("{}: declared more than once", resource.id));
            continue;
        }

        let Some(schema) = schemas.get(&resource.id.resource_type) else {
            errors.push(format!(
                "{}: unknown resource type '{}'",
                resource.id, resource.id.resource_type
            ));
            continue;
        };

        if schema.data_source != resource.is_data_source() {
            let expected = if schema.data_source { "data" } else { "resources" };
            errors.push(format!(
                "{}: must be declared under '{}'",
                resource.id, expected
            ));
        }

        if let Err(type_errors) = schema.validate(&resource.attributes) {
            errors.extend(
                type_errors
                    .into_iter()
                    .map(|e| format!("{}: {}", resource.id, e)),
            );
        }
    }

    for resource in resources {
        for dep in resource.dependencies() {
            if !seen.contains(&dep) {
                errors.push(format!(
                    "{}: references undeclared resource {}",
                    resource.id, dep
                ));
            }
        }
    }

    if let Err(e) = dependency_order(resources) {
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("\n  "))
    }
}

/// Fill in schema defaults so that unset attributes diff against their defaults
pub fn apply_defaults(resources: &mut [Resource], schemas: &HashMap<String, ResourceSchema>) {
    for resource in resources {
        if let Some(schema) = schemas.get(&resource.id.resource_type) {
            schema.apply_defaults(&mut resource.attributes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_provider_aws::schemas::all_schemas;
    use std::io::Write;

    fn schemas() -> HashMap<String, ResourceSchema> {
        all_schemas()
            .into_iter()
            .map(|s| (s.resource_type.clone(), s))
            .collect()
    }

    const CONFIG: &str = r#"{
        "provider": {"region": "eu-west-1"},
        "backend": {"type": "local", "path": "test.state.json"},
        "resources": [
            {"type": "ec2.vpc", "name": "main", "attributes": {"cidr_block": "10.0.0.0/16"}},
            {"type": "ec2.security_group", "name": "web", "attributes": {
                "name": "web",
                "vpc_id": "${ec2.vpc.main.id}"
            }}
        ],
        "data": [
            {"type": "ec2.availability_zones", "name": "available", "attributes": {"state": "available"}}
        ]
    }"#;

    #[test]
    fn parses_resources_and_data_sources() {
        let config = CumulusConfig::parse(CONFIG).unwrap();
        assert_eq!(config.provider.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.backend, BackendConfig::local("test.state.json"));

        let resources = config.resources();
        assert_eq!(resources.len(), 3);
        assert!(!resources[0].is_data_source());
        assert!(resources[2].is_data_source());
        assert_eq!(
            resources[1].attributes.get("vpc_id"),
            Some(&Value::ResourceRef(
                ResourceId::new("ec2.vpc", "main"),
                "id".to_string()
            ))
        );
    }

    #[test]
    fn empty_config_uses_local_backend() {
        let config = CumulusConfig::parse("{}").unwrap();
        assert_eq!(config.backend, BackendConfig::default());
        assert!(config.resources().is_empty());
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        assert!(CumulusConfig::parse(r#"{"providers": {}}"#).is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = CumulusConfig::load(file.path()).unwrap_err();
        assert!(err.contains("Parse error"));
        assert!(err.contains(&file.path().display().to_string()));
    }

    #[test]
    fn valid_config_passes_validation() {
        let config = CumulusConfig::parse(CONFIG).unwrap();
        validate_resources(&config.resources(), &schemas()).unwrap();
    }

    #[test]
    fn validation_collects_all_problems() {
        let resources = vec![
            Resource::new("ec2.vpc", "main").with_attribute("cidr_block", "10.0.0.1/16"),
            Resource::new("ec2.vpc", "main").with_attribute("cidr_block", "10.0.0.0/16"),
            Resource::new("ec2.subnet", "a"),
            Resource::new("ec2.availability_zones", "azs"),
        ];
        let err = validate_resources(&resources, &schemas()).unwrap_err();
        assert!(err.contains("ec2.vpc.main: declared more than once"));
        assert!(err.contains("unknown resource type 'ec2.subnet'"));
        assert!(err.contains("ec2.availability_zones.azs: must be declared under 'data'"));
        assert!(err.contains("10.0.0.0/16"));
    }

    #[test]
    fn dangling_references_are_rejected() {
        let resources = vec![
            Resource::new("ec2.security_group", "web")
                .with_attribute("name", "web")
                .with_attribute(
                    "vpc_id",
                    Value::ResourceRef(ResourceId::new("ec2.vpc", "other"), "id".to_string()),
                ),
        ];
        let err = validate_resources(&resources, &schemas()).unwrap_err();
        assert!(err.contains("references undeclared resource ec2.vpc.other"));
    }

    #[test]
    fn defaults_fill_unset_attributes() {
        let mut resources = vec![Resource::new("s3.bucket", "logs").with_attribute("name", "logs")];
        apply_defaults(&mut resources, &schemas());
        assert_eq!(
            resources[0].attributes.get("force_destroy"),
            Some(&Value::Bool(false))
        );
    }
}
