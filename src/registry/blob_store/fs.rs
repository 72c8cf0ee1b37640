use crate::registry::blob_store::{BlobStore, BoxedReader, Error};
use crate::registry::data_store;
use crate::registry::oci::{Digest, DigestHasher};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, instrument};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct Backend {
    store: data_store::fs::Backend,
}

impl Backend {
    pub fn new(config: &data_store::fs::BackendConfig) -> Self {
        Self {
            store: data_store::fs::Backend::new(config),
        }
    }

    fn blob_path(digest: &Digest) -> String {
        format!(
            "blobs/{}/{}/{}/data",
            digest.algorithm(),
            digest.hash_prefix(),
            digest.hash()
        )
    }
}

#[async_trait]
impl BlobStore for Backend {
    #[instrument(skip(self, content))]
    async fn put(&self, digest: &Digest, content: &[u8]) -> Result<(), Error> {
        let computed = Digest::from_content(content);
        if &computed != digest {
            return Err(Error::DigestMismatch {
                expected: digest.clone(),
                computed,
            });
        }

        let path = Self::blob_path(digest);
        if self.store.exists(&path).await? {
            debug!("Blob {digest} already stored");
            return Ok(());
        }

        self.store.write(&path, content).await?;
        Ok(())
    }

    #[instrument(skip(self, reader))]
    async fn put_reader(&self, digest: &Digest, mut reader: BoxedReader) -> Result<u64, Error> {
        let path = Self::blob_path(digest);
        if self.store.exists(&path).await? {
            debug!("Blob {digest} already stored");
            return self.size(digest).await;
        }

        let mut staged = self.store.stage(&path).await?;
        let mut hasher = DigestHasher::default();
        let mut buffer = BytesMut::with_capacity(COPY_BUFFER_SIZE);
        let mut size = 0;

        loop {
            buffer.clear();
            if reader.read_buf(&mut buffer).await? == 0 {
                break;
            }
            hasher.update(&buffer);
            staged.write_all(&buffer).await?;
            size += buffer.len() as u64;
        }

        let computed = hasher.finalize();
        if &computed != digest {
            return Err(Error::DigestMismatch {
                expected: digest.clone(),
                computed,
            });
        }

        staged.commit().await?;
        Ok(size)
    }

    #[instrument(skip(self))]
    async fn get(&self, digest: &Digest) -> Result<Bytes, Error> {
        let content = self.store.read(&Self::blob_path(digest)).await?;
        Ok(Bytes::from(content))
    }

    async fn contains(&self, digest: &Digest) -> Result<bool, Error> {
        Ok(self.store.exists(&Self::blob_path(digest)).await?)
    }

    async fn size(&self, digest: &Digest) -> Result<u64, Error> {
        Ok(self.store.file_size(&Self::blob_path(digest)).await?)
    }

    #[instrument(skip(self))]
    async fn build_reader(
        &self,
        digest: &Digest,
        offset: Option<u64>,
    ) -> Result<BoxedReader, Error> {
        let mut file = self.store.open_file(&Self::blob_path(digest)).await?;
        if let Some(offset) = offset {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        Ok(Box::new(file))
    }
}
