//! Canned AWS responses for handler tests

use std::collections::HashMap;

use aws_config::retry::RetryConfig;
use aws_config::stalled_stream_protection::StalledStreamProtectionConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::config::{Credentials, SharedCredentialsProvider};
use aws_smithy_http_client::test_util::{ReplayEvent, StaticReplayClient};
use aws_smithy_types::body::SdkBody;

use crate::config::AwsClient;

/// A client whose calls are answered by `events`, in order.
///
/// Requests are not checked; the returned replay client records them.
pub fn replay_client(events: Vec<ReplayEvent>) -> (AwsClient, StaticReplayClient) {
    let http_client = StaticReplayClient::new(events);
    let sdk_config = SdkConfig::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
            "AKIDTEST", "secret", None, None, "test",
        )))
        .http_client(http_client.clone())
        .retry_config(RetryConfig::disabled())
        .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
        .build();
    let client = AwsClient::from_sdk_config(&sdk_config, true, HashMap::new())
        .expect("test config has a region");
    (client, http_client)
}

fn event(status: u16, content_type: &str, body: impl Into<SdkBody>) -> ReplayEvent {
    let request = http::Request::builder()
        .uri("https://aws.test/")
        .body(SdkBody::empty())
        .expect("valid request");
    let response = http::Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(body.into())
        .expect("valid response");
    ReplayEvent::new(request, response)
}

/// EC2 and S3 answer in XML
pub fn xml(status: u16, body: &str) -> ReplayEvent {
    event(status, "text/xml", body.to_string())
}

/// KMS and SageMaker speak awsJson 1.1
pub fn json(body: &str) -> ReplayEvent {
    event(200, "application/x-amz-json-1.1", body.to_string())
}

pub fn json_error(code: &str, message: &str) -> ReplayEvent {
    let body = serde_json::json!({ "__type": code, "message": message });
    event(400, "application/x-amz-json-1.1", body.to_string())
}

pub fn ec2_error(code: &str) -> ReplayEvent {
    xml(
        400,
        &format!(
            "<Response><Errors><Error><Code>{}</Code><Message>{} (test)</Message></Error></Errors>\
             <RequestID>req-1</RequestID></Response>",
            code, code
        ),
    )
}

pub fn s3_error(status: u16, code: &str) -> ReplayEvent {
    xml(
        status,
        &format!(
            "<Error><Code>{}</Code><Message>{} (test)</Message></Error>",
            code, code
        ),
    )
}

/// A bodiless answer, as S3 gives for HEAD and most writes
pub fn empty(status: u16) -> ReplayEvent {
    event(status, "application/xml", SdkBody::empty())
}

/// Wrap an EC2 query response body in its `<Operation>Response` root
pub fn ec2(operation: &str, body: &str) -> ReplayEvent {
    xml(
        200,
        &format!(
            "<{op}Response xmlns=\"http://ec2.amazonaws.com/doc/2016-11-15/\">\
             <requestId>req-1</requestId>{body}</{op}Response>",
            op = operation,
            body = body
        ),
    )
}
