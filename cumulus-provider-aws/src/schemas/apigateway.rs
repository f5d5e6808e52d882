//! API Gateway schema definitions

use cumulus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use super::types::{http_status_code, one_of};

pub const HTTP_METHODS: &[&str] = &["ANY", "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

/// Returns the schema for a method response of a REST API
pub fn method_response_schema() -> ResourceSchema {
    ResourceSchema::new("apigateway.method_response")
        .with_description("A response a REST API method can return")
        .attribute(
            AttributeSchema::new("rest_api_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("resource_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("http_method", one_of(HTTP_METHODS))
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("status_code", http_status_code())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new(
                "response_models",
                AttributeType::Map(Box::new(AttributeType::String)),
            )
            .with_description("Model name per content type"),
        )
        .attribute(
            AttributeSchema::new(
                "response_parameters",
                AttributeType::Map(Box::new(AttributeType::Bool)),
            )
            .with_description("Response header names mapped to whether they are required"),
        )
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![method_response_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_core::resource::Value;
    use std::collections::HashMap;

    fn attrs(method: &str, status: &str) -> HashMap<String, Value> {
        HashMap::from([
            ("rest_api_id".to_string(), Value::from("a1b2c3")),
            ("resource_id".to_string(), Value::from("r4s5")),
            ("http_method".to_string(), Value::from(method)),
            ("status_code".to_string(), Value::from(status)),
        ])
    }

    #[test]
    fn valid_method_response() {
        let mut attrs = attrs("GET", "200");
        attrs.insert(
            "response_parameters".to_string(),
            Value::Map(HashMap::from([(
                "method.response.header.Content-Type".to_string(),
                Value::Bool(true),
            )])),
        );
        assert!(method_response_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn rejects_bad_status_and_method() {
        assert!(method_response_schema().validate(&attrs("GET", "2000")).is_err());
        assert!(method_response_schema().validate(&attrs("FETCH", "200")).is_err());
    }

    #[test]
    fn response_parameters_are_bools() {
        let mut attrs = attrs("POST", "201");
        attrs.insert(
            "response_parameters".to_string(),
            Value::string_map([("method.response.header.Location", "yes")]),
        );
        assert!(method_response_schema().validate(&attrs).is_err());
    }
}
