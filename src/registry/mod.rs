use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::instrument;

pub mod blob;
pub mod blob_store;
pub mod cache;
pub mod data_store;
mod error;
pub mod manifest;
pub mod metadata_store;
pub mod oci;
pub mod repository;
pub mod resolver;
pub mod server;
pub mod tags;
#[cfg(test)]
pub mod tests;
pub mod token;

use crate::configuration;
use crate::configuration::{GlobalConfig, RepositoryConfig};
use crate::registry::blob_store::BlobStore;
use crate::registry::cache::CacheStore;
use crate::registry::metadata_store::MetadataStore;
use crate::registry::resolver::Resolver;
use crate::registry::server::DOCKER_DISTRIBUTION_API_VERSION;
pub use error::Error;
pub use repository::Repository;
pub use server::response_body::ResponseBody;

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$")
        .expect("namespace pattern is valid")
});

pub struct Registry {
    blob_store: Arc<dyn BlobStore>,
    metadata_store: Arc<dyn MetadataStore>,
    cache: Arc<CacheStore>,
    repositories: HashMap<String, Repository>,
    resolver: Resolver,
    tag_cache_ttl: u64,
}

impl Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("repositories", &self.repositories)
            .finish()
    }
}

impl Registry {
    #[instrument(skip(repositories_config, blob_store, metadata_store, cache))]
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        metadata_store: Arc<dyn MetadataStore>,
        repositories_config: HashMap<String, RepositoryConfig>,
        global_config: &GlobalConfig,
        cache: Arc<CacheStore>,
    ) -> Result<Self, configuration::Error> {
        let mut repositories = HashMap::new();
        for (repository_name, repository_config) in repositories_config {
            let repository = Repository::new(&repository_name, repository_config, &cache)?;
            repositories.insert(repository_name, repository);
        }

        let resolver = Resolver::new(
            blob_store.clone(),
            global_config.fetch_retries,
            Duration::from_millis(global_config.fetch_retry_delay_ms),
        );

        Ok(Self {
            blob_store,
            metadata_store,
            cache,
            repositories,
            resolver,
            tag_cache_ttl: global_config.tag_cache_ttl,
        })
    }

    /// Returns the repository serving `namespace`.
    ///
    /// When repositories are nested (`library` and `library/nginx`), the most specific one wins.
    #[instrument(skip(self))]
    pub fn validate_namespace(&self, namespace: &str) -> Result<&Repository, Error> {
        if !NAMESPACE_RE.is_match(namespace) {
            return Err(Error::NameInvalid);
        }

        self.repositories
            .values()
            .filter(|repository| repository.serves(namespace))
            .max_by_key(|repository| repository.name.len())
            .ok_or(Error::NameUnknown)
    }

    pub fn handle_get_api_version(&self) -> Result<Response<ResponseBody>, Error> {
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(DOCKER_DISTRIBUTION_API_VERSION, "registry/2.0")
            .header(CONTENT_TYPE, "application/json")
            .body(ResponseBody::json(&serde_json::json!({})))?)
    }

    #[cfg(test)]
    pub fn set_access_policy(
        &mut self,
        repository: &str,
        config: &repository::RepositoryAccessPolicyConfig,
    ) {
        let access_policy = repository::AccessPolicy::new(config).unwrap();
        self.repositories
            .get_mut(repository)
            .expect("repository is configured")
            .access_policy = access_policy;
    }
}
