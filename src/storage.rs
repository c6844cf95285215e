//! Object-storage access configuration.
//!
//! Credentials are resolved once at startup into an explicit
//! [`CredentialsProvider`] that is passed by reference to every component
//! needing object-storage access; there is no process-wide holder. The rare
//! third-party integration that insists on a zero-argument factory hook gets
//! a closure from [`CredentialsProvider::hook`] that closes over the
//! explicitly constructed provider.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Extension key selecting the authentication mode of a bucket.
pub const AUTH_TYPE_KEY: &str = "authType";

/// Extension key carrying the static access key.
pub const ACCESS_KEY_KEY: &str = "accessKey";

/// Extension key carrying the static secret key.
pub const SECRET_KEY_KEY: &str = "secretKey";

const STATIC_AUTH_TYPE: &str = "static";
const INSTANCE_AUTH_TYPE: &str = "instance";

const ACCESS_KEY_ENV: &str = "KAFKA_S3_ACCESS_KEY";
const SECRET_KEY_ENV: &str = "KAFKA_S3_SECRET_KEY";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration names a mode this build does not support.
    ///
    /// Fatal to the constructing call; surfaced immediately and never
    /// retried.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
}

/// Location and access options of an object-storage bucket, parsed from the
/// broker configuration.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    protocol: String,
    bucket: String,
    extensions: HashMap<String, String>,
}

impl BucketConfig {
    pub fn new(protocol: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            bucket: bucket.into(),
            extensions: HashMap::new(),
        }
    }

    /// Adds one `key=value` extension option.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }
}

/// A single source of credentials in the resolution chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Fixed access/secret key pair from configuration or environment.
    Static {
        access_key: String,
        secret_key: String,
    },

    /// Credentials obtained from the instance metadata service.
    InstanceProfile,

    /// No credentials; only viable against publicly accessible buckets.
    Anonymous,
}

/// Ordered chain of credential sources for one bucket.
///
/// The first source wins and is reused for subsequent lookups. Construct it
/// once at startup and share it by reference; components must not look
/// credentials up through any ambient state.
#[derive(Debug)]
pub struct CredentialsProvider {
    chain: Vec<Credentials>,
    resolved: Mutex<Option<Credentials>>,
}

impl CredentialsProvider {
    /// Builds the provider chain for a bucket.
    ///
    /// Sources configured on the bucket come first; instance-profile and
    /// anonymous fallbacks are appended to the end of the chain.
    pub fn from_bucket(bucket: &BucketConfig) -> Result<Self, ConfigError> {
        let mut chain = configured_credentials(bucket)?;
        chain.push(Credentials::InstanceProfile);
        chain.push(Credentials::Anonymous);

        Ok(Self {
            chain,
            resolved: Mutex::new(None),
        })
    }

    /// Resolves the credentials to use, caching the winning source.
    pub fn resolve(&self) -> Credentials {
        let mut resolved = self.resolved.lock();
        if let Some(credentials) = &*resolved {
            return credentials.clone();
        }

        // the chain always ends with Anonymous
        let credentials = self.chain[0].clone();
        *resolved = Some(credentials.clone());
        credentials
    }

    /// Zero-argument factory adapter for third-party hooks.
    ///
    /// The returned closure closes over this provider; it exists so that
    /// libraries demanding a no-argument credentials factory don't force a
    /// process-wide holder back into the design.
    pub fn hook(self: &Arc<Self>) -> impl Fn() -> Credentials + Send + Sync + 'static {
        let provider = Arc::clone(self);
        move || provider.resolve()
    }
}

/// Credential sources explicitly configured on the bucket.
fn configured_credentials(bucket: &BucketConfig) -> Result<Vec<Credentials>, ConfigError> {
    let auth_type = bucket.extension(AUTH_TYPE_KEY).unwrap_or(STATIC_AUTH_TYPE);

    match auth_type {
        STATIC_AUTH_TYPE => {
            let access_key = bucket
                .extension(ACCESS_KEY_KEY)
                .map(str::to_owned)
                .or_else(|| std::env::var(ACCESS_KEY_ENV).ok());
            let secret_key = bucket
                .extension(SECRET_KEY_KEY)
                .map(str::to_owned)
                .or_else(|| std::env::var(SECRET_KEY_ENV).ok());

            match (access_key, secret_key) {
                (Some(access_key), Some(secret_key))
                    if !access_key.trim().is_empty() && !secret_key.trim().is_empty() =>
                {
                    Ok(vec![Credentials::Static {
                        access_key,
                        secret_key,
                    }])
                }
                // nothing usable configured, fall through to the defaults
                _ => Ok(vec![]),
            }
        }
        INSTANCE_AUTH_TYPE => match bucket.protocol() {
            "s3" => Ok(vec![Credentials::InstanceProfile]),
            other => Err(ConfigError::UnsupportedConfiguration(format!(
                "protocol {other:?} does not support instance credentials",
            ))),
        },
        other => Err(ConfigError::UnsupportedConfiguration(format!(
            "unknown auth type {other:?}",
        ))),
    }
}
