use crate::registry::oci::Digest;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

mod error;
pub mod fs;

pub use error::Error;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content-addressed storage for blobs and manifests.
///
/// Content is keyed by its digest and never mutated once written. Implementations must refuse
/// content that does not hash to its key, and writing a digest that is already present is a
/// no-op.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, digest: &Digest, content: &[u8]) -> Result<(), Error>;

    /// Streams `reader` into the store under `digest`, returning the stored size.
    ///
    /// Content is hashed as it is written and only becomes visible once the digest is verified.
    async fn put_reader(&self, digest: &Digest, reader: BoxedReader) -> Result<u64, Error>;

    async fn get(&self, digest: &Digest) -> Result<Bytes, Error>;

    async fn contains(&self, digest: &Digest) -> Result<bool, Error>;

    async fn size(&self, digest: &Digest) -> Result<u64, Error>;

    async fn build_reader(&self, digest: &Digest, offset: Option<u64>)
        -> Result<BoxedReader, Error>;
}
