use crate::registry::data_store;
use crate::registry::metadata_store::{Error, MetadataStore};
use crate::registry::oci::Digest;
use async_trait::async_trait;
use std::str::FromStr;
use tracing::instrument;

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

    fn tags_dir(namespace: &str) -> String {
        format!("repositories/{namespace}/_tags")
    }

    fn tag_link_path(namespace: &str, tag: &str) -> String {
        format!("{}/{tag}/link", Self::tags_dir(namespace))
    }
}

#[async_trait]
impl MetadataStore for Backend {
    #[instrument(skip(self))]
    async fn read_tag(&self, namespace: &str, tag: &str) -> Result<Digest, Error> {
        let link = self
            .store
            .read_to_string(&Self::tag_link_path(namespace, tag))
            .await?;

        Digest::from_str(link.trim()).map_err(|e| Error::InvalidData(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn write_tag(&self, namespace: &str, tag: &str, digest: &Digest) -> Result<(), Error> {
        self.store
            .write(
                &Self::tag_link_path(namespace, tag),
                digest.to_string().as_bytes(),
            )
            .await?;
        Ok(())
    }

    async fn list_tags(&self, namespace: &str) -> Result<Vec<String>, Error> {
        let mut tags = self.store.list_dir(&Self::tags_dir(namespace)).await?;
        tags.sort();
        Ok(tags)
    }
}
