//! KMS schema definitions

use cumulus_core::resource::Value;
use cumulus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types::{int_range, one_of, policy_document, suppress_equivalent_json};

const KEY_SPECS: &[&str] = &[
    "SYMMETRIC_DEFAULT",
    "RSA_2048",
    "RSA_3072",
    "RSA_4096",
    "ECC_NIST_P256",
    "ECC_NIST_P384",
    "ECC_NIST_P521",
    "ECC_SECG_P256K1",
    "HMAC_224",
    "HMAC_256",
    "HMAC_384",
    "HMAC_512",
];

fn deletion_window() -> AttributeType {
    AttributeType::Custom {
        name: "DeletionWindowInDays".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| int_range(value, 7, 30),
    }
}

/// Returns the schema for a customer managed KMS key
pub fn key_schema() -> ResourceSchema {
    ResourceSchema::new("kms.key")
        .with_description("A customer managed KMS key")
        .attribute(AttributeSchema::new("description", AttributeType::String).optional_computed())
        .attribute(
            AttributeSchema::new(
                "key_usage",
                one_of(&["ENCRYPT_DECRYPT", "SIGN_VERIFY", "GENERATE_VERIFY_MAC"]),
            )
            .force_new()
            .with_default(Value::from("ENCRYPT_DECRYPT")),
        )
        .attribute(
            AttributeSchema::new("customer_master_key_spec", one_of(KEY_SPECS))
                .force_new()
                .with_default(Value::from("SYMMETRIC_DEFAULT")),
        )
        .attribute(
            AttributeSchema::new("policy", policy_document())
                .optional_computed()
                .with_diff_suppress(suppress_equivalent_json)
                .with_description("Key policy; AWS applies a default policy when omitted"),
        )
        .attribute(
            AttributeSchema::new("is_enabled", AttributeType::Bool).with_default(Value::Bool(true)),
        )
        .attribute(
            AttributeSchema::new("enable_key_rotation", AttributeType::Bool)
                .with_default(Value::Bool(false)),
        )
        .attribute(
            AttributeSchema::new("deletion_window_in_days", deletion_window())
                .config_only()
                .with_default(Value::Int(30))
                .with_description("Waiting period before the key is deleted, 7 to 30 days"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("key_id", AttributeType::String).computed())
}

/// Returns the schema for the public key data source
pub fn public_key_schema() -> ResourceSchema {
    let string_list = || AttributeType::List(Box::new(AttributeType::String));
    ResourceSchema::data_source("kms.public_key")
        .with_description("Public half of an asymmetric KMS key")
        .attribute(
            AttributeSchema::new("key_id", types::non_empty_string())
                .required()
                .with_description("Key id, key ARN, alias name or alias ARN"),
        )
        .attribute(AttributeSchema::new("grant_tokens", string_list()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new("public_key", AttributeType::String)
                .computed()
                .with_description("Base64 encoded DER public key"),
        )
        .attribute(AttributeSchema::new("public_key_pem", AttributeType::String).computed())
        .attribute(AttributeSchema::new("key_usage", AttributeType::String).computed())
        .attribute(AttributeSchema::new("customer_master_key_spec", AttributeType::String).computed())
        .attribute(AttributeSchema::new("encryption_algorithms", string_list()).computed())
        .attribute(AttributeSchema::new("signing_algorithms", string_list()).computed())
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![key_schema(), public_key_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn deletion_window_bounds() {
        let mut attrs = HashMap::new();
        attrs.insert("deletion_window_in_days".to_string(), Value::Int(7));
        assert!(key_schema().validate(&attrs).is_ok());

        attrs.insert("deletion_window_in_days".to_string(), Value::Int(31));
        assert!(key_schema().validate(&attrs).is_err());
    }

    #[test]
    fn policy_must_be_json() {
        let mut attrs = HashMap::new();
        attrs.insert("policy".to_string(), Value::from("{\"Version\":"));
        assert!(key_schema().validate(&attrs).is_err());
    }

    #[test]
    fn public_key_requires_key_id() {
        let schema = public_key_schema();
        assert!(schema.data_source);
        assert!(schema.validate(&HashMap::new()).is_err());
    }
}
