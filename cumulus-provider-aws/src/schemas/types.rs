//! AWS-specific attribute types

use std::sync::LazyLock;

use cumulus_core::resource::Value;
use cumulus_core::schema::{AttributeType, types::check_length};
use regex::Regex;

/// Regions accepted by the region attribute
const VALID_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-south-1",
    "ca-central-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-north-1",
    "eu-south-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-gov-east-1",
    "us-gov-west-1",
    "us-west-1",
    "us-west-2",
];

static BUCKET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("valid regex"));

static IAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w+=,.@-]+$").expect("valid regex"));

static SAGEMAKER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9](-*[a-zA-Z0-9])*$").expect("valid regex"));

static HTTP_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-5]\d\d$").expect("valid regex"));

/// AWS region in API format (e.g., "ap-northeast-1")
pub fn aws_region() -> AttributeType {
    AttributeType::Custom {
        name: "Region".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if VALID_REGIONS.contains(&s.as_str()) => Ok(()),
            Value::String(s) => Err(format!(
                "Invalid region '{}', expected one of: {}",
                s,
                VALID_REGIONS.join(", ")
            )),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Enum over a fixed set of API values
pub fn one_of(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|v| v.to_string()).collect())
}

/// S3 bucket versioning status
pub fn versioning_status() -> AttributeType {
    one_of(&["Enabled", "Suspended"])
}

/// S3 bucket name: 3-63 lowercase letters, digits, dots and hyphens
pub fn bucket_name() -> AttributeType {
    AttributeType::Custom {
        name: "BucketName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if s.contains("..") => {
                Err(format!("Bucket name '{}' must not contain '..'", s))
            }
            Value::String(s) if BUCKET_NAME.is_match(s) => Ok(()),
            Value::String(s) => Err(format!(
                "Invalid bucket name '{}': use 3-63 lowercase letters, digits, '.' and '-'",
                s
            )),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// IAM role name: up to 64 of `[\w+=,.@-]`
pub fn iam_role_name() -> AttributeType {
    AttributeType::Custom {
        name: "IamRoleName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => {
                check_length(s, 1, 64)?;
                if IAM_NAME.is_match(s) {
                    Ok(())
                } else {
                    Err(format!(
                        "Invalid IAM name '{}': only alphanumerics and +=,.@-_ are allowed",
                        s
                    ))
                }
            }
            _ => Err("Expected string".to_string()),
        },
    }
}

/// SageMaker resource name: alphanumerics separated by hyphens, up to 63
pub fn sagemaker_name() -> AttributeType {
    AttributeType::Custom {
        name: "SageMakerName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => {
                check_length(s, 1, 63)?;
                if SAGEMAKER_NAME.is_match(s) {
                    Ok(())
                } else {
                    Err(format!(
                        "Invalid name '{}': only alphanumerics and single hyphens are allowed",
                        s
                    ))
                }
            }
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Three-digit HTTP status code as a string
pub fn http_status_code() -> AttributeType {
    AttributeType::Custom {
        name: "HttpStatusCode".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if HTTP_STATUS.is_match(s) => Ok(()),
            Value::String(s) => Err(format!("Invalid HTTP status code '{}'", s)),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// JSON policy document; compared semantically by [`suppress_equivalent_json`]
pub fn policy_document() -> AttributeType {
    AttributeType::Custom {
        name: "PolicyDocument".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                .map(|_| ())
                .map_err(|e| format!("Invalid JSON policy document: {}", e)),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Integer within `min..=max`
pub fn int_range(value: &Value, min: i64, max: i64) -> Result<(), String> {
    match value {
        Value::Int(n) if (min..=max).contains(n) => Ok(()),
        Value::Int(n) => Err(format!("Value {} must be between {} and {}", n, min, max)),
        _ => Err("Expected integer".to_string()),
    }
}

/// Two JSON strings that parse to the same document are equal
pub fn suppress_equivalent_json(old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(a), Some(b)) => {
            match (
                serde_json::from_str::<serde_json::Value>(a),
                serde_json::from_str::<serde_json::Value>(b),
            ) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn region_accepts_api_format() {
        assert!(aws_region().validate(&s("ap-northeast-1")).is_ok());
        assert!(aws_region().validate(&s("us-gov-west-1")).is_ok());
    }

    #[test]
    fn region_rejects_availability_zone() {
        let err = aws_region().validate(&s("ap-northeast-1a")).unwrap_err();
        assert!(err.to_string().contains("Invalid region"));
    }

    #[test]
    fn versioning_is_case_sensitive() {
        assert!(versioning_status().validate(&s("Enabled")).is_ok());
        assert!(versioning_status().validate(&s("enabled")).is_err());
        assert!(versioning_status().validate(&Value::Bool(true)).is_err());
    }

    #[test]
    fn bucket_names() {
        let t = bucket_name();
        assert!(t.validate(&s("my-bucket.logs")).is_ok());
        assert!(t.validate(&s("ab")).is_err());
        assert!(t.validate(&s("My-Bucket")).is_err());
        assert!(t.validate(&s("-bucket")).is_err());
        assert!(t.validate(&s("my..bucket")).is_err());
    }

    #[test]
    fn iam_role_names() {
        let t = iam_role_name();
        assert!(t.validate(&s("deploy-role_1@prod")).is_ok());
        assert!(t.validate(&s("bad role")).is_err());
        assert!(t.validate(&s(&"r".repeat(65))).is_err());
    }

    #[test]
    fn sagemaker_names() {
        let t = sagemaker_name();
        assert!(t.validate(&s("notebook-1")).is_ok());
        assert!(t.validate(&s("notebook_1")).is_err());
        assert!(t.validate(&s("-notebook")).is_err());
    }

    #[test]
    fn status_codes() {
        assert!(http_status_code().validate(&s("200")).is_ok());
        assert!(http_status_code().validate(&s("600")).is_err());
        assert!(http_status_code().validate(&s("20")).is_err());
    }

    #[test]
    fn policy_documents() {
        assert!(policy_document().validate(&s(r#"{"Version":"2012-10-17"}"#)).is_ok());
        assert!(policy_document().validate(&s("{not json")).is_err());
    }

    #[test]
    fn int_ranges() {
        assert!(int_range(&Value::Int(7), 7, 30).is_ok());
        assert!(int_range(&Value::Int(31), 7, 30).is_err());
        assert!(int_range(&s("7"), 7, 30).is_err());
    }

    #[test]
    fn equivalent_json_is_suppressed() {
        let a = s(r#"{"Version": "2012-10-17", "Statement": []}"#);
        let b = s(r#"{"Statement":[],"Version":"2012-10-17"}"#);
        assert!(suppress_equivalent_json(&a, &b));
        assert!(!suppress_equivalent_json(&a, &s(r#"{"Version":"2008-10-17"}"#)));
    }
}
