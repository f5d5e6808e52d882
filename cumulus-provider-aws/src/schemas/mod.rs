//! AWS resource schema definitions

pub mod apigateway;
pub mod appconfig;
pub mod ec2;
pub mod iam;
pub mod kms;
pub mod s3;
pub mod sagemaker;
pub mod types;

use cumulus_core::schema::ResourceSchema;

/// Returns all AWS schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    let mut schemas = Vec::new();
    schemas.extend(ec2::schemas());
    schemas.extend(kms::schemas());
    schemas.extend(iam::schemas());
    schemas.extend(s3::schemas());
    schemas.extend(apigateway::schemas());
    schemas.extend(appconfig::schemas());
    schemas.extend(sagemaker::schemas());
    schemas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{data_source_handlers, resource_handlers};

    #[test]
    fn every_handler_has_a_schema() {
        let schemas = all_schemas();
        let handlers = resource_handlers().len() + data_source_handlers().len();
        assert_eq!(schemas.len(), handlers);
        for h in resource_handlers() {
            assert!(schemas.iter().any(|s| s.resource_type == h.resource_type()));
        }
    }
}
