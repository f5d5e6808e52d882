//! AWS error classification and retry helpers
//!
//! Errors are classified with the `.code()` of `ProvideErrorMetadata`, which
//! every SDK operation error and `SdkError` implement.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use cumulus_core::provider::ProviderError;
use cumulus_core::retry::retry_when;

/// How long to retry calls that fail while IAM changes propagate
pub const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// How long a just-created object may stay invisible to reads
pub const NOT_FOUND_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Known AWS error codes for "not found" conditions
pub const NOT_FOUND_CODES: &[&str] = &[
    "NotFound",
    "NotFoundException",
    "ResourceNotFoundException",
    "NoSuchBucket",
    "NoSuchEntity",
    "NoSuchLifecycleConfiguration",
    "NoSuchTagSet",
    "InvalidVpcID.NotFound",
    "InvalidNetworkAclID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidGroupId.Malformed",
    "InvalidPermission.NotFound",
];

pub fn error_code<E: ProvideErrorMetadata>(err: &E) -> Option<&str> {
    err.code()
}

pub fn error_message<E: ProvideErrorMetadata>(err: &E) -> Option<&str> {
    err.message()
}

/// Whether `err` carries `code` and, when `message` is non-empty, a message containing it
pub fn is_aws_err<E: ProvideErrorMetadata>(err: &E, code: &str, message: &str) -> bool {
    err.code() == Some(code)
        && (message.is_empty() || err.message().is_some_and(|m| m.contains(message)))
}

pub fn is_not_found<E: ProvideErrorMetadata>(err: &E) -> bool {
    err.code().is_some_and(|c| NOT_FOUND_CODES.contains(&c))
}

/// Wrap an SDK error with context, keeping it as the cause
pub fn sdk_error<E>(context: &str, err: E) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = match err.code() {
        Some(code) => format!(
            "{} ({}): {}",
            context,
            code,
            err.message().unwrap_or("no message")
        ),
        None => format!("{}: {}", context, DisplayErrorContext(&err)),
    };
    let error = if is_not_found(&err) {
        ProviderError::not_found(message)
    } else {
        ProviderError::new(message)
    };
    error.with_cause(err)
}

/// Retry `f` while it fails with error code `code`
pub async fn retry_on_aws_code<T, E, F, Fut>(code: &str, timeout: Duration, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ProvideErrorMetadata + fmt::Display,
{
    retry_when(timeout, f, |e: &E| is_aws_err(e, code, "")).await
}

/// Retry `f` while it fails with any of `codes`
pub async fn retry_on_aws_codes<T, E, F, Fut>(
    codes: &[&str],
    timeout: Duration,
    f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ProvideErrorMetadata + fmt::Display,
{
    retry_when(timeout, f, |e: &E| {
        e.code().is_some_and(|c| codes.contains(&c))
    })
    .await
}

/// Retry `f` while it fails with `code` and a message containing `message`
pub async fn retry_on_aws_message<T, E, F, Fut>(
    code: &str,
    message: &str,
    timeout: Duration,
    f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ProvideErrorMetadata + fmt::Display,
{
    retry_when(timeout, f, |e: &E| is_aws_err(e, code, message)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_smithy_types::error::ErrorMetadata;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn aws_err(code: &str, message: &str) -> ErrorMetadata {
        ErrorMetadata::builder().code(code).message(message).build()
    }

    #[test]
    fn matches_code_and_message() {
        let err = aws_err("MalformedPolicyDocument", "Invalid principal in policy");
        assert!(is_aws_err(&err, "MalformedPolicyDocument", ""));
        assert!(is_aws_err(&err, "MalformedPolicyDocument", "Invalid principal"));
        assert!(!is_aws_err(&err, "MalformedPolicyDocument", "Syntax"));
        assert!(!is_aws_err(&err, "DeleteConflict", ""));
        assert_eq!(error_code(&err), Some("MalformedPolicyDocument"));
        assert_eq!(error_message(&err), Some("Invalid principal in policy"));
    }

    #[test]
    fn not_found_codes() {
        assert!(is_not_found(&aws_err("NoSuchEntity", "role missing")));
        assert!(is_not_found(&aws_err("InvalidVpcID.NotFound", "vpc missing")));
        assert!(!is_not_found(&aws_err("DependencyViolation", "in use")));
    }

    #[test]
    fn sdk_error_keeps_code_and_not_found() {
        let err = sdk_error("Failed to read role", aws_err("NoSuchEntity", "gone"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Failed to read role (NoSuchEntity): gone");

        let err = sdk_error("Failed to delete VPC", aws_err("DependencyViolation", "in use"));
        assert!(!err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_named_code_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_on_aws_code("DependencyViolation", PROPAGATION_TIMEOUT, || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(aws_err("DependencyViolation", "has dependencies"))
                } else {
                    Ok("deleted")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "deleted");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn other_codes_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> =
            retry_on_aws_codes(&["ConflictException", "TooManyRequestsException"], PROPAGATION_TIMEOUT, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(aws_err("BadRequestException", "invalid")) }
            })
            .await;
        assert!(is_aws_err(&result.unwrap_err(), "BadRequestException", ""));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn message_filter_limits_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_on_aws_message(
            "MalformedPolicyDocument",
            "Invalid principal",
            Duration::from_secs(10),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(aws_err("MalformedPolicyDocument", "Syntax errors in policy")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
