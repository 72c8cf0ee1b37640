use crate::registry::oci::Digest;
use async_trait::async_trait;
use std::fmt;

pub mod fs;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    ReferenceNotFound,
    InvalidData(String),
    StorageBackend(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ReferenceNotFound => write!(f, "Reference not found"),
            Error::InvalidData(e) => write!(f, "Invalid metadata: {e}"),
            Error::StorageBackend(e) => write!(f, "Storage backend error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::ReferenceNotFound
        } else {
            Error::StorageBackend(err.to_string())
        }
    }
}

/// Repository metadata: the tag to manifest-digest mapping.
///
/// Tags are owned by the sync process that populates repositories; the serving path only reads
/// them.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn read_tag(&self, namespace: &str, tag: &str) -> Result<Digest, Error>;

    async fn write_tag(&self, namespace: &str, tag: &str, digest: &Digest) -> Result<(), Error>;

    /// Lists tag names of `namespace` in lexical order.
    async fn list_tags(&self, namespace: &str) -> Result<Vec<String>, Error>;
}
