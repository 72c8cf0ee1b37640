use crate::configuration::{Error, RepositoryConfig};
use crate::registry::cache::CacheStore;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

pub mod access_policy;
mod repository_upstream;
pub mod upstream;
mod upstream_auth;

pub use access_policy::{AccessPolicy, AccessRequest, RepositoryAccessPolicyConfig};
pub use repository_upstream::RepositoryUpstream;
pub use upstream::{ContentKind, UpstreamClient};

#[cfg(test)]
pub use upstream::MockUpstreamClient;

/// When content missing from the local store may be fetched from upstream.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    /// Content is synced ahead of time; a miss is final.
    #[default]
    Immediate,
    /// Content is fetched from upstream on first request.
    OnDemand,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullPolicy::Immediate => write!(f, "immediate"),
            PullPolicy::OnDemand => write!(f, "on_demand"),
        }
    }
}

pub struct Repository {
    pub name: String,
    pub policy: PullPolicy,
    pub upstreams: Vec<Arc<dyn UpstreamClient>>,
    pub access_policy: AccessPolicy,
}

impl Repository {
    pub fn new(
        name: &str,
        config: RepositoryConfig,
        token_cache: &Arc<CacheStore>,
    ) -> Result<Self, Error> {
        let access_policy = AccessPolicy::new(&config.access_policy)?;

        let mut upstreams: Vec<Arc<dyn UpstreamClient>> = Vec::new();
        for upstream_config in config.upstream {
            upstreams.push(Arc::new(RepositoryUpstream::new(
                name,
                upstream_config,
                token_cache.clone(),
            )?));
        }

        Ok(Self {
            name: name.to_string(),
            policy: config.policy,
            upstreams,
            access_policy,
        })
    }

    /// Whether local misses may be resolved from an upstream.
    pub fn fetches_on_demand(&self) -> bool {
        self.policy == PullPolicy::OnDemand && !self.upstreams.is_empty()
    }

    /// Whether `namespace` belongs to this repository: same name, or nested below it.
    pub fn serves(&self, namespace: &str) -> bool {
        namespace == self.name
            || namespace
                .strip_prefix(&self.name)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("upstreams", &self.upstreams.len())
            .finish()
    }
}
