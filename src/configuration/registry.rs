use crate::configuration::{BlobStorageConfig, Configuration, Error, MetadataStoreConfig};
use crate::registry::blob_store::BlobStore;
use crate::registry::cache::CacheStore;
use crate::registry::metadata_store::MetadataStore;
use crate::registry::{blob_store, metadata_store, Registry};
use std::sync::Arc;

pub fn create_blob_store(config: &BlobStorageConfig) -> Arc<dyn BlobStore> {
    match config {
        BlobStorageConfig::FS(fs_config) => Arc::new(blob_store::fs::Backend::new(fs_config)),
    }
}

pub fn create_metadata_store(config: &MetadataStoreConfig) -> Arc<dyn MetadataStore> {
    match config {
        MetadataStoreConfig::FS(fs_config) => {
            Arc::new(metadata_store::fs::Backend::new(fs_config))
        }
    }
}

pub fn create_registry(config: &Configuration) -> Result<Registry, Error> {
    let blob_store = create_blob_store(&config.blob_store);
    let metadata_store = match &config.metadata_store {
        Some(metadata_config) => create_metadata_store(metadata_config),
        None => {
            let BlobStorageConfig::FS(fs_config) = &config.blob_store;
            create_metadata_store(&MetadataStoreConfig::FS(fs_config.clone()))
        }
    };
    let cache = Arc::new(CacheStore::new(&config.cache_store)?);

    Registry::new(
        blob_store,
        metadata_store,
        config.repository.clone(),
        &config.global,
        cache,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_registry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = format!(
            r#"
            [server]
            bind_address = "127.0.0.1"

            [blob_store.fs]
            root_dir = "{}"

            [repository."library"]
            "#,
            temp_dir.path().display()
        );
        let config = Configuration::load_from_str(&config).unwrap();

        let registry = create_registry(&config).unwrap();
        assert!(registry.validate_namespace("library/nginx").is_ok());
    }

    #[test]
    fn test_create_registry_rejects_invalid_rule() {
        let config = r#"
            [server]
            bind_address = "127.0.0.1"

            [blob_store.fs]
            root_dir = "/tmp/unused"

            [repository."library".access_policy]
            rules = ["identity.username =="]
            "#;
        let config = Configuration::load_from_str(config).unwrap();

        assert!(matches!(
            create_registry(&config),
            Err(Error::PolicyCompilation(_))
        ));
    }
}
