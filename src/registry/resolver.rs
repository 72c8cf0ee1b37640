//! Read-through resolution of content-addressed objects.
//!
//! A local miss in an `on_demand` repository is streamed from the repository's upstreams into the
//! blob store, which verifies it against its digest before it becomes visible. Concurrent requests
//! for the same digest share a single fetch: the first caller spawns it and every caller waits on
//! the same watch channel until the content is stored or the fetch failed.

use crate::metrics_provider::METRICS_PROVIDER;
use crate::registry::blob_store::{self, BlobStore};
use crate::registry::oci::Digest;
use crate::registry::repository::{ContentKind, Repository, UpstreamClient};
use crate::registry::Error;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

type Outcome = Option<Result<(), Error>>;
type InFlight = Arc<Mutex<HashMap<Digest, watch::Receiver<Outcome>>>>;

pub struct Resolver {
    blob_store: Arc<dyn BlobStore>,
    in_flight: InFlight,
    fetch_retries: u32,
    fetch_retry_delay: Duration,
}

impl Resolver {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        fetch_retries: u32,
        fetch_retry_delay: Duration,
    ) -> Self {
        Self {
            blob_store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            fetch_retries,
            fetch_retry_delay,
        }
    }

    /// Returns the bytes stored under `digest`, fetching them when `repository` allows it.
    ///
    /// Meant for manifests and image configs; blobs are served with [`Resolver::ensure_stored`]
    /// and a store reader.
    pub async fn resolve(
        &self,
        repository: &Repository,
        namespace: &str,
        kind: ContentKind,
        digest: &Digest,
    ) -> Result<Bytes, Error> {
        self.ensure_stored(repository, namespace, kind, digest)
            .await?;

        match self.blob_store.get(digest).await {
            Ok(content) => Ok(content),
            Err(blob_store::Error::BlobNotFound) => Err(Error::ContentUnavailable(
                kind,
                format!("{digest} disappeared from the store"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Makes sure `digest` is in the blob store, fetching it when `repository` allows it.
    ///
    /// # Errors
    ///
    /// * `Error::ContentUnavailable` if the content is absent and cannot be fetched
    /// * `Error::DigestMismatch` if an upstream served bytes that do not hash to `digest`
    #[instrument(skip(self, repository), fields(repository = %repository.name))]
    pub async fn ensure_stored(
        &self,
        repository: &Repository,
        namespace: &str,
        kind: ContentKind,
        digest: &Digest,
    ) -> Result<(), Error> {
        if self.blob_store.contains(digest).await? {
            METRICS_PROVIDER
                .store_hits
                .with_label_values(&[kind.as_str()])
                .inc();
            return Ok(());
        }

        if !repository.fetches_on_demand() {
            warn!("{kind} {digest} is missing and {namespace} is not pulled on demand");
            return Err(Error::ContentUnavailable(
                kind,
                format!("{digest} is not available in {namespace}"),
            ));
        }

        let (mut receiver, sender) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(digest) {
                Some(receiver) => {
                    debug!("Joining in-flight fetch of {digest}");
                    (receiver.clone(), None)
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(digest.clone(), receiver.clone());
                    (receiver, Some(sender))
                }
            }
        };

        if let Some(sender) = sender {
            self.spawn_fetch(repository, namespace, kind, digest, sender);
        }

        let outcome = receiver.wait_for(Option::is_some).await.map_err(|_| {
            Error::Internal(format!("Fetch of {digest} ended without an outcome"))
        })?;

        outcome
            .clone()
            .unwrap_or_else(|| Err(Error::Internal(format!("Fetch of {digest} has no outcome"))))
    }

    fn spawn_fetch(
        &self,
        repository: &Repository,
        namespace: &str,
        kind: ContentKind,
        digest: &Digest,
        sender: watch::Sender<Outcome>,
    ) {
        let task = FetchTask {
            blob_store: self.blob_store.clone(),
            upstreams: repository.upstreams.clone(),
            namespace: namespace.to_string(),
            kind,
            digest: digest.clone(),
            fetch_retries: self.fetch_retries,
            fetch_retry_delay: self.fetch_retry_delay,
        };
        let entry = InFlightEntry {
            in_flight: self.in_flight.clone(),
            digest: digest.clone(),
            sender,
        };

        tokio::spawn(async move {
            let outcome = task.run().await;
            entry.sender.send_replace(Some(outcome));
        });
    }
}

/// Owns a digest's slot in the in-flight map for the lifetime of its fetch task.
///
/// Dropping it, including while a panicking task unwinds, frees the slot and hands waiters an
/// outcome, so a later request starts a fresh fetch.
struct InFlightEntry {
    in_flight: InFlight,
    digest: Digest,
    sender: watch::Sender<Outcome>,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.remove(&self.digest);

        if self.sender.borrow().is_none() {
            warn!("Fetch of {} was aborted", self.digest);
            self.sender.send_replace(Some(Err(Error::Internal(format!(
                "Fetch of {} was aborted",
                self.digest
            )))));
        }
    }
}

struct FetchTask {
    blob_store: Arc<dyn BlobStore>,
    upstreams: Vec<Arc<dyn UpstreamClient>>,
    namespace: String,
    kind: ContentKind,
    digest: Digest,
    fetch_retries: u32,
    fetch_retry_delay: Duration,
}

impl FetchTask {
    fn is_transient(error: &Error) -> bool {
        matches!(error, Error::Internal(_))
    }

    async fn fetch_into_store(&self, upstream: &dyn UpstreamClient) -> Result<u64, Error> {
        let reader = upstream
            .fetch(&self.namespace, self.kind, &self.digest)
            .await?;
        Ok(self.blob_store.put_reader(&self.digest, reader).await?)
    }

    async fn run(&self) -> Result<(), Error> {
        // A previous winner may have stored the content after this caller's lookup.
        if self.blob_store.contains(&self.digest).await? {
            return Ok(());
        }

        let kind = self.kind.as_str();
        let mut last_error = Error::NotFound;

        for upstream in &self.upstreams {
            for attempt in 0..=self.fetch_retries {
                if attempt > 0 {
                    tokio::time::sleep(self.fetch_retry_delay * attempt).await;
                }

                match self.fetch_into_store(upstream.as_ref()).await {
                    Ok(size) => {
                        METRICS_PROVIDER
                            .upstream_fetches
                            .with_label_values(&[kind, "fetched"])
                            .inc();
                        info!(
                            "Fetched {} {} ({size} bytes) from upstream",
                            self.kind, self.digest
                        );
                        return Ok(());
                    }
                    Err(e @ Error::DigestMismatch(_)) => {
                        METRICS_PROVIDER
                            .upstream_fetches
                            .with_label_values(&[kind, "digest_mismatch"])
                            .inc();
                        warn!("Upstream served corrupted {} {}", self.kind, self.digest);
                        return Err(e);
                    }
                    Err(e) if Self::is_transient(&e) => {
                        debug!("Attempt {} to fetch {} failed: {e}", attempt + 1, self.digest);
                        last_error = e;
                    }
                    Err(e) => {
                        debug!("Upstream cannot serve {}: {e}", self.digest);
                        last_error = e;
                        break;
                    }
                }
            }
        }

        METRICS_PROVIDER
            .upstream_fetches
            .with_label_values(&[kind, "failed"])
            .inc();
        warn!("Unable to fetch {} {}: {last_error}", self.kind, self.digest);
        Err(Error::ContentUnavailable(
            self.kind,
            format!("{} could not be fetched from upstream", self.digest),
        ))
    }
}
