use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

mod error;
pub mod registry;
pub mod watcher;

use crate::registry::cache::CacheStoreConfig;
use crate::registry::repository::{PullPolicy, RepositoryAccessPolicyConfig};
use crate::registry::token::TokenConfig;
use crate::registry::data_store;
pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub server: ServerConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub cache_store: CacheStoreConfig,
    pub blob_store: BlobStorageConfig,
    #[serde(default)]
    pub metadata_store: Option<MetadataStoreConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub repository: HashMap<String, RepositoryConfig>, // hashmap of namespace <-> repository_config
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`. Only enable behind a proxy
    /// that overwrites these headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
    pub tls: Option<ServerTlsConfig>,
}

impl ServerConfig {
    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ServerTlsConfig {
    pub server_certificate_bundle: String,
    pub server_private_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Extra attempts per upstream after a transient fetch failure.
    #[serde(default = "GlobalConfig::default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "GlobalConfig::default_fetch_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,
    /// Seconds a tag resolved from an upstream is remembered.
    #[serde(default = "GlobalConfig::default_tag_cache_ttl")]
    pub tag_cache_ttl: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            max_concurrent_requests: GlobalConfig::default_max_concurrent_requests(),
            fetch_retries: GlobalConfig::default_fetch_retries(),
            fetch_retry_delay_ms: GlobalConfig::default_fetch_retry_delay_ms(),
            tag_cache_ttl: GlobalConfig::default_tag_cache_ttl(),
        }
    }
}

impl GlobalConfig {
    fn default_max_concurrent_requests() -> usize {
        4
    }

    fn default_fetch_retries() -> u32 {
        3
    }

    fn default_fetch_retry_delay_ms() -> u64 {
        200
    }

    fn default_tag_cache_ttl() -> u64 {
        60
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub enum BlobStorageConfig {
    #[serde(rename = "fs")]
    FS(data_store::fs::BackendConfig),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub enum MetadataStoreConfig {
    #[serde(rename = "fs")]
    FS(data_store::fs::BackendConfig),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: Option<TokenConfig>,
    #[serde(default)]
    pub identity: HashMap<String, IdentityConfig>, // hashmap of identity_id <-> identity_config (username, password)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IdentityConfig {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub policy: PullPolicy,
    #[serde(default)]
    pub upstream: Vec<RepositoryUpstreamConfig>,
    #[serde(default)]
    pub access_policy: RepositoryAccessPolicyConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RepositoryUpstreamConfig {
    pub url: String,
    /// Repository name on the upstream; defaults to the local namespace below the repository.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "RepositoryUpstreamConfig::default_max_redirect")]
    pub max_redirect: u8,
    pub server_ca_bundle: Option<String>,
    pub client_certificate: Option<String>,
    pub client_private_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RepositoryUpstreamConfig {
    fn default_max_redirect() -> u8 {
        5
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let mut config: Configuration = toml::from_str(slice)?;

        if config.metadata_store.is_none() {
            let BlobStorageConfig::FS(blob_config) = &config.blob_store;
            config.metadata_store = Some(MetadataStoreConfig::FS(blob_config.clone()));
        }

        for (name, repository) in &config.repository {
            if repository.policy == PullPolicy::OnDemand && repository.upstream.is_empty() {
                return Err(Error::ConfigurationFileFormat(format!(
                    "repository '{name}' pulls on demand but has no upstream"
                )));
            }
        }

        Ok(config)
    }
}
