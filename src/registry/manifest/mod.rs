//! Manifest retrieval and media type negotiation.

use crate::registry::oci::{Digest, Manifest, MediaType, Reference};
use crate::registry::repository::{ContentKind, Repository};
use crate::registry::server::DOCKER_CONTENT_DIGEST;
use crate::registry::{metadata_store, Error, Registry, ResponseBody};
use bytes::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use tracing::{debug, instrument, warn};

pub mod convert;
pub mod signature;

const DEFAULT_OS: &str = "linux";
const DEFAULT_ARCHITECTURE: &str = "amd64";

/// A manifest as it is served: stored bytes or a representation derived from them.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestView {
    pub media_type: MediaType,
    pub digest: Digest,
    pub content: Bytes,
}

/// Media types listed by a client in its `Accept` headers.
#[derive(Debug, Default)]
pub struct AcceptedMediaTypes {
    any: bool,
    types: Vec<MediaType>,
}

impl AcceptedMediaTypes {
    /// Parses raw `Accept` header values. Values may hold comma separated lists and
    /// parameters; unknown media types are ignored. No value at all, or `*/*`, accepts anything.
    pub fn from_headers(values: &[String]) -> Self {
        let mut accepted = Self::default();
        let mut seen_any_value = false;

        for value in values.iter().flat_map(|v| v.split(',')) {
            let essence = value.split(';').next().unwrap_or_default().trim();
            if essence.is_empty() {
                continue;
            }
            seen_any_value = true;

            if essence == "*/*" {
                accepted.any = true;
            } else if let Some(media_type) = MediaType::parse(essence) {
                accepted.types.push(media_type);
            }
        }

        accepted.any |= !seen_any_value;
        accepted
    }

    pub fn accepts(&self, media_type: MediaType) -> bool {
        self.any || self.types.contains(&media_type)
    }

    fn accepts_schema1(&self) -> bool {
        self.accepts(MediaType::ManifestV1) || self.accepts(MediaType::ManifestV1Signed)
    }
}

impl Registry {
    /// Resolves `tag` to a manifest digest.
    ///
    /// Tags are read from the metadata store. Repositories pulled on demand fall back to asking
    /// their upstreams; answers are cached but never written to the metadata store.
    #[instrument(skip(self, repository))]
    pub async fn resolve_tag(
        &self,
        repository: &Repository,
        namespace: &str,
        tag: &str,
    ) -> Result<Digest, Error> {
        match self.metadata_store.read_tag(namespace, tag).await {
            Ok(digest) => return Ok(digest),
            Err(metadata_store::Error::ReferenceNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        if !repository.fetches_on_demand() {
            return Err(Error::ManifestUnknown);
        }

        let cache_key = format!("tag:{namespace}:{tag}");
        if let Ok(cached) = self.cache.retrieve(&cache_key).await {
            if let Ok(digest) = cached.parse() {
                debug!("Tag {namespace}:{tag} resolved from cache");
                return Ok(digest);
            }
        }

        for upstream in &repository.upstreams {
            match upstream.fetch_tag(namespace, tag).await {
                Ok(digest) => {
                    self.cache
                        .store(&cache_key, &digest.to_string(), self.tag_cache_ttl)
                        .await?;
                    return Ok(digest);
                }
                Err(e) => debug!("Upstream cannot resolve {namespace}:{tag}: {e}"),
            }
        }

        Err(Error::ManifestUnknown)
    }

    /// Returns the manifest `reference` points to, in a media type the client accepts.
    ///
    /// # Errors
    ///
    /// * `Error::ManifestUnknown` if the tag is unknown
    /// * `Error::ContentUnavailable` if the manifest or something it references is missing and
    ///   cannot be fetched
    /// * `Error::UnsupportedMediaType` if no accepted representation can be derived
    #[instrument(skip(self))]
    pub async fn get_manifest(
        &self,
        namespace: &str,
        reference: &Reference,
        accepted: &[String],
    ) -> Result<ManifestView, Error> {
        let repository = self.validate_namespace(namespace)?;
        let accepted = AcceptedMediaTypes::from_headers(accepted);

        let digest = match reference {
            Reference::Tag(tag) => self.resolve_tag(repository, namespace, tag).await?,
            Reference::Digest(digest) => digest.clone(),
        };

        let content = self
            .resolve_manifest_content(repository, namespace, &digest)
            .await?;
        let manifest = Manifest::from_slice(&content)?;
        let stored = manifest.media_type()?;
        self.ensure_servable(repository, &manifest).await?;

        if accepted.accepts(stored) || (stored.is_schema1() && accepted.accepts_schema1()) {
            return Ok(ManifestView {
                media_type: stored,
                digest,
                content,
            });
        }

        let (manifest, content, digest) = if stored.is_index() {
            let child = manifest
                .select_child(DEFAULT_OS, DEFAULT_ARCHITECTURE)
                .ok_or_else(|| Error::ManifestInvalid("manifest list is empty".to_string()))?;
            debug!("Client does not accept {stored}, serving child {}", child.digest);

            let child_digest = child.digest.clone();
            let child_content = self
                .resolve_manifest_content(repository, namespace, &child_digest)
                .await?;
            let child_manifest = Manifest::from_slice(&child_content)?;
            self.ensure_servable(repository, &child_manifest).await?;

            let child_type = child_manifest.media_type()?;
            if accepted.accepts(child_type) {
                return Ok(ManifestView {
                    media_type: child_type,
                    digest: child_digest,
                    content: child_content,
                });
            }
            if !child_type.is_image() {
                return Err(Error::UnsupportedMediaType(child_type.to_string()));
            }
            (child_manifest, child_content, child_digest)
        } else {
            (manifest, content, digest)
        };

        let media_type = manifest.media_type()?;
        if !media_type.is_image() || !accepted.accepts_schema1() {
            debug!("No accepted representation of {digest} ({media_type})");
            return Err(Error::UnsupportedMediaType(media_type.to_string()));
        }

        let config = manifest
            .config
            .as_ref()
            .ok_or_else(|| Error::ManifestInvalid("image manifest has no config".to_string()))?;
        let config = self
            .resolver
            .resolve(repository, namespace, ContentKind::Blob, &config.digest)
            .await?;

        let payload =
            convert::to_schema1(namespace, &reference.to_string(), &manifest, &config)?;
        debug!("Converted {digest} ({} bytes) to schema 1", content.len());
        let payload_digest = Digest::from_content(&payload);

        if accepted.accepts(MediaType::ManifestV1Signed) {
            Ok(ManifestView {
                media_type: MediaType::ManifestV1Signed,
                digest: payload_digest,
                content: Bytes::from(signature::sign(&payload)?),
            })
        } else {
            Ok(ManifestView {
                media_type: MediaType::ManifestV1,
                digest: payload_digest,
                content: Bytes::from(payload),
            })
        }
    }

    async fn resolve_manifest_content(
        &self,
        repository: &Repository,
        namespace: &str,
        digest: &Digest,
    ) -> Result<Bytes, Error> {
        match self
            .resolver
            .resolve(repository, namespace, ContentKind::Manifest, digest)
            .await
        {
            Err(Error::BlobUnknown) => Err(Error::ManifestUnknown),
            result => result,
        }
    }

    /// Repositories without on-demand fetching only serve manifests whose references are all
    /// present locally.
    pub(crate) async fn ensure_servable(
        &self,
        repository: &Repository,
        manifest: &Manifest,
    ) -> Result<(), Error> {
        if repository.fetches_on_demand() {
            return Ok(());
        }

        for digest in manifest.references() {
            if !self.blob_store.contains(digest).await? {
                warn!("Manifest references {digest}, which is not available locally");
                return Err(Error::ContentUnavailable(
                    ContentKind::Manifest,
                    format!("{digest} is not available in {}", repository.name),
                ));
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn handle_get_manifest(
        &self,
        namespace: &str,
        reference: &Reference,
        accepted: &[String],
    ) -> Result<Response<ResponseBody>, Error> {
        let manifest = self.get_manifest(namespace, reference, accepted).await?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, manifest.media_type.as_str())
            .header(DOCKER_CONTENT_DIGEST, manifest.digest.to_string())
            .header(CONTENT_LENGTH, manifest.content.len())
            .body(ResponseBody::fixed(manifest.content))?)
    }

    #[instrument(skip(self))]
    pub async fn handle_head_manifest(
        &self,
        namespace: &str,
        reference: &Reference,
        accepted: &[String],
    ) -> Result<Response<ResponseBody>, Error> {
        let manifest = self.get_manifest(namespace, reference, accepted).await?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, manifest.media_type.as_str())
            .header(DOCKER_CONTENT_DIGEST, manifest.digest.to_string())
            .header(CONTENT_LENGTH, manifest.content.len())
            .body(ResponseBody::empty())?)
    }
}
