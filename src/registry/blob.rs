use crate::metrics_provider::METRICS_PROVIDER;
use crate::registry::blob_store::{self, BoxedReader};
use crate::registry::oci::Digest;
use crate::registry::repository::{ContentKind, Repository};
use crate::registry::server::DOCKER_CONTENT_DIGEST;
use crate::registry::{Error, Registry, ResponseBody};
use hyper::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use tokio::io::AsyncReadExt;
use tracing::instrument;

pub enum GetBlobResponse {
    RangedReader(BoxedReader, (u64, u64), u64),
    Reader(BoxedReader, u64),
}

/// Clamps a requested byte range to a blob of `total_length` bytes.
fn satisfiable_range(
    range: (u64, Option<u64>),
    total_length: u64,
) -> Result<(u64, u64), Error> {
    let (start, end) = range;
    if start >= total_length {
        return Err(Error::RangeNotSatisfiable);
    }

    let last = total_length - 1;
    Ok((start, end.map_or(last, |end| end.min(last))))
}

impl Registry {
    /// Size of `digest`, fetching it into the store first when it is missing locally.
    async fn stored_size(
        &self,
        repository: &Repository,
        namespace: &str,
        digest: &Digest,
    ) -> Result<u64, Error> {
        match self.blob_store.size(digest).await {
            Ok(size) => {
                METRICS_PROVIDER
                    .store_hits
                    .with_label_values(&[ContentKind::Blob.as_str()])
                    .inc();
                Ok(size)
            }
            Err(blob_store::Error::BlobNotFound) => {
                self.resolver
                    .ensure_stored(repository, namespace, ContentKind::Blob, digest)
                    .await?;
                Ok(self.blob_store.size(digest).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Opens `digest` for reading, fetching it into the store first when it is missing locally.
    #[instrument(skip(self, repository))]
    pub async fn get_blob(
        &self,
        repository: &Repository,
        namespace: &str,
        digest: &Digest,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<GetBlobResponse, Error> {
        let total_length = self.stored_size(repository, namespace, digest).await?;

        match range {
            Some(range) => {
                let range = satisfiable_range(range, total_length)?;
                let reader = self.blob_store.build_reader(digest, Some(range.0)).await?;
                Ok(GetBlobResponse::RangedReader(reader, range, total_length))
            }
            None => {
                let reader = self.blob_store.build_reader(digest, None).await?;
                Ok(GetBlobResponse::Reader(reader, total_length))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn handle_get_blob(
        &self,
        namespace: &str,
        digest: &Digest,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<Response<ResponseBody>, Error> {
        let repository = self.validate_namespace(namespace)?;

        let res = match self.get_blob(repository, namespace, digest, range).await? {
            GetBlobResponse::RangedReader(reader, (start, end), total_length) => {
                let length = end - start + 1;
                let stream = reader.take(length);
                let range = format!("bytes {start}-{end}/{total_length}");

                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .header(DOCKER_CONTENT_DIGEST, digest.to_string())
                    .header(ACCEPT_RANGES, "bytes")
                    .header(CONTENT_LENGTH, length.to_string())
                    .header(CONTENT_RANGE, range)
                    .body(ResponseBody::streaming(stream))?
            }
            GetBlobResponse::Reader(reader, total_length) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(DOCKER_CONTENT_DIGEST, digest.to_string())
                .header(ACCEPT_RANGES, "bytes")
                .header(CONTENT_LENGTH, total_length)
                .body(ResponseBody::streaming(reader))?,
        };

        Ok(res)
    }

    #[instrument(skip(self))]
    pub async fn handle_head_blob(
        &self,
        namespace: &str,
        digest: &Digest,
    ) -> Result<Response<ResponseBody>, Error> {
        let repository = self.validate_namespace(namespace)?;

        let size = self.stored_size(repository, namespace, digest).await?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(DOCKER_CONTENT_DIGEST, digest.to_string())
            .header(ACCEPT_RANGES, "bytes")
            .header(CONTENT_LENGTH, size)
            .body(ResponseBody::empty())?)
    }
}
