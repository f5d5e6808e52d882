//! Provider configuration and the shared AWS client bundle

use std::collections::HashMap;

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use cumulus_core::sync::KeyedMutex;
use serde::{Deserialize, Serialize};

/// Provider configuration block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// AWS region; falls back to `AWS_REGION` and then the SDK default chain
    pub region: Option<String>,
    /// Named profile from the shared config files
    pub profile: Option<String>,
    /// Maximum attempts for the SDK's own retry of throttled or transient calls
    pub max_attempts: Option<u32>,
    /// Custom endpoint, e.g. a local emulator
    pub endpoint_url: Option<String>,
    /// Tags added to every taggable resource
    pub default_tags: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No AWS region configured; set `region` in the provider block or AWS_REGION")]
    MissingRegion,

    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,
}

impl ProviderConfig {
    /// Region from configuration or the `AWS_REGION` environment variable
    pub fn resolved_region(&self) -> Option<String> {
        self.region
            .clone()
            .or_else(|| std::env::var("AWS_REGION").ok())
            .filter(|r| !r.is_empty())
    }
}

/// One SDK client per service, plus provider-wide settings.
///
/// Every resource operation receives this bundle; nothing else is shared
/// between operations.
pub struct AwsClient {
    pub ec2: aws_sdk_ec2::Client,
    pub s3: aws_sdk_s3::Client,
    pub iam: aws_sdk_iam::Client,
    pub kms: aws_sdk_kms::Client,
    pub apigateway: aws_sdk_apigateway::Client,
    pub appconfig: aws_sdk_appconfig::Client,
    pub sagemaker: aws_sdk_sagemaker::Client,
    pub region: String,
    pub default_tags: HashMap<String, String>,
    /// Serializes calls that conflict on a shared parent object
    pub locks: KeyedMutex,
}

impl AwsClient {
    /// Load SDK configuration and build every service client
    pub async fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = config.resolved_region() {
            loader = loader.region(Region::new(region));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(max_attempts) = config.max_attempts {
            if max_attempts == 0 {
                return Err(ConfigError::InvalidMaxAttempts);
            }
            loader = loader.retry_config(RetryConfig::standard().with_max_attempts(max_attempts));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        // Emulators generally only support path-style bucket addressing
        let client = Self::from_sdk_config(
            &sdk_config,
            config.endpoint_url.is_some(),
            config.default_tags.clone(),
        )?;
        log::debug!("AWS provider configured for region {}", client.region);
        Ok(client)
    }

    /// Build every service client from an already loaded SDK configuration
    pub fn from_sdk_config(
        sdk_config: &SdkConfig,
        force_path_style: bool,
        default_tags: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .ok_or(ConfigError::MissingRegion)?;

        let s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
            .force_path_style(force_path_style)
            .build();

        Ok(Self {
            ec2: aws_sdk_ec2::Client::new(sdk_config),
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            iam: aws_sdk_iam::Client::new(sdk_config),
            kms: aws_sdk_kms::Client::new(sdk_config),
            apigateway: aws_sdk_apigateway::Client::new(sdk_config),
            appconfig: aws_sdk_appconfig::Client::new(sdk_config),
            sagemaker: aws_sdk_sagemaker::Client::new(sdk_config),
            region,
            default_tags,
            locks: KeyedMutex::new(),
        })
    }
}
