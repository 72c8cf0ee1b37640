use crate::registry::blob_store::BoxedReader;
use crate::registry::oci::Digest;
use crate::registry::Error;
use async_trait::async_trait;
use std::fmt::{Display, Formatter};

/// Which v2 endpoint an upstream object lives behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Manifest,
    Blob,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Manifest => "manifests",
            ContentKind::Blob => "blobs",
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote registry content can be pulled from.
///
/// `namespace` is always the name the client asked for; implementations translate it to the
/// remote repository name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Opens the content stored under `digest` as a stream. Callers verify the content.
    async fn fetch(
        &self,
        namespace: &str,
        kind: ContentKind,
        digest: &Digest,
    ) -> Result<BoxedReader, Error>;

    /// Asks the upstream which manifest digest `tag` currently points to.
    async fn fetch_tag(&self, namespace: &str, tag: &str) -> Result<Digest, Error>;
}
