use crate::registry::oci::Manifest;
use crate::registry::{blob_store, metadata_store, Error, Registry, Repository, ResponseBody};
use hyper::header::{CONTENT_TYPE, LINK};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::{instrument, warn};

/// Returns up to `n` items of `items` (sorted) strictly after `last`, and the token of the next
/// page when items remain.
fn paginate_sorted(
    items: &[String],
    n: Option<u16>,
    last: Option<&str>,
) -> (Vec<String>, Option<String>) {
    let start_idx = last.map_or(0, |last_item| {
        items
            .iter()
            .position(|item| item.as_str() > last_item)
            .unwrap_or(items.len())
    });

    let end_idx = n.map_or(items.len(), |n| (start_idx + usize::from(n)).min(items.len()));
    let result = items[start_idx..end_idx].to_vec();

    let next_token = if end_idx < items.len() {
        result.last().cloned()
    } else {
        None
    };

    (result, next_token)
}

impl Registry {
    #[instrument(skip(self))]
    pub async fn list_tags(
        &self,
        namespace: &str,
        n: Option<u16>,
        last: Option<String>,
    ) -> Result<(Vec<String>, Option<String>), Error> {
        let repository = self.validate_namespace(namespace)?;

        let mut tags = self.metadata_store.list_tags(namespace).await?;
        if !repository.fetches_on_demand() {
            let mut servable = Vec::with_capacity(tags.len());
            for tag in tags {
                if self.is_tag_servable(repository, namespace, &tag).await? {
                    servable.push(tag);
                }
            }
            tags = servable;
        }

        let (tags, next_last) = paginate_sorted(&tags, n, last.as_deref());

        let link = next_last.map(|next_last| {
            let n = n.unwrap_or_default();
            format!("/v2/{namespace}/tags/list?n={n}&last={next_last}")
        });

        Ok((tags, link))
    }

    /// Whether `tag` points to a manifest whose content is entirely present locally.
    async fn is_tag_servable(
        &self,
        repository: &Repository,
        namespace: &str,
        tag: &str,
    ) -> Result<bool, Error> {
        let digest = match self.metadata_store.read_tag(namespace, tag).await {
            Ok(digest) => digest,
            Err(metadata_store::Error::ReferenceNotFound) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let content = match self.blob_store.get(&digest).await {
            Ok(content) => content,
            Err(blob_store::Error::BlobNotFound) => {
                warn!("Tag {namespace}:{tag} points to {digest}, which is not available locally");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let manifest = match Manifest::from_slice(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Tag {namespace}:{tag} points to an unreadable manifest: {e}");
                return Ok(false);
            }
        };

        match self.ensure_servable(repository, &manifest).await {
            Ok(()) => Ok(true),
            Err(Error::ContentUnavailable(..)) => {
                warn!("Tag {namespace}:{tag} is not listed until its content is synced");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn handle_list_tags(
        &self,
        namespace: &str,
        n: Option<u16>,
        last: Option<String>,
    ) -> Result<Response<ResponseBody>, Error> {
        #[derive(Serialize, Debug)]
        struct TagsResponse<'a> {
            name: &'a str,
            tags: Vec<String>,
        }

        let (tags, link) = self.list_tags(namespace, n, last).await?;

        let body = serde_json::to_vec(&TagsResponse {
            name: namespace,
            tags,
        })?;

        let res = match link {
            Some(link) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .header(LINK, format!("<{link}>; rel=\"next\""))
                .body(ResponseBody::fixed(body))?,
            None => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(ResponseBody::fixed(body))?,
        };

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::manifest::convert::tests::{
        demo_config, demo_image_manifest, LAYER_A, LAYER_B,
    };
    use crate::registry::oci::Digest;
    use crate::registry::tests::FSRegistryTestCase;
    use http_body_util::BodyExt;
    use serde_json::Value;

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_paginate_sorted() {
        let all = items(&["a", "b", "c", "d"]);

        assert_eq!(paginate_sorted(&all, None, None), (all.clone(), None));
        assert_eq!(
            paginate_sorted(&all, Some(2), None),
            (items(&["a", "b"]), Some("b".to_string()))
        );
        assert_eq!(
            paginate_sorted(&all, Some(2), Some("b")),
            (items(&["c", "d"]), None)
        );
        assert_eq!(paginate_sorted(&all, Some(2), Some("z")), (vec![], None));
        assert_eq!(
            paginate_sorted(&all, None, Some("bb")),
            (items(&["c", "d"]), None)
        );
    }

    /// Stores a complete image and returns its manifest digest.
    async fn store_image(test_case: &FSRegistryTestCase) -> Digest {
        let config = demo_config();
        let manifest = demo_image_manifest(&config);
        for content in [config.as_slice(), LAYER_A, LAYER_B, manifest.as_slice()] {
            test_case
                .blob_store()
                .put(&Digest::from_content(content), content)
                .await
                .unwrap();
        }
        Digest::from_content(&manifest)
    }

    #[tokio::test]
    async fn test_handle_list_tags_paginated() {
        let test_case = FSRegistryTestCase::new();
        let digest = store_image(&test_case).await;
        for tag in ["v2", "latest", "v1"] {
            test_case
                .metadata_store()
                .write_tag("library/app", tag, &digest)
                .await
                .unwrap();
        }

        let response = test_case
            .registry()
            .handle_list_tags("library/app", Some(2), None)
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(LINK).unwrap(),
            "</v2/library/app/tags/list?n=2&last=v1>; rel=\"next\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["name"], "library/app");
        assert_eq!(body["tags"], serde_json::json!(["latest", "v1"]));

        let response = test_case
            .registry()
            .handle_list_tags("library/app", Some(2), Some("v1".to_string()))
            .await
            .unwrap();
        assert!(response.headers().get(LINK).is_none());
    }

    #[tokio::test]
    async fn test_list_tags_unknown_repository() {
        let test_case = FSRegistryTestCase::new();

        let result = test_case.registry().list_tags("unknown/app", None, None).await;
        assert_eq!(result, Err(Error::NameUnknown));
    }

    #[tokio::test]
    async fn test_list_tags_empty() {
        let test_case = FSRegistryTestCase::new();

        let (tags, link) = test_case
            .registry()
            .list_tags("library/empty", None, None)
            .await
            .unwrap();
        assert!(tags.is_empty());
        assert!(link.is_none());
    }

    #[tokio::test]
    async fn test_unsynced_tags_are_not_listed() {
        let test_case = FSRegistryTestCase::new();
        let synced = store_image(&test_case).await;
        let metadata_store = test_case.metadata_store();
        metadata_store
            .write_tag("library/app", "stable", &synced)
            .await
            .unwrap();
        metadata_store
            .write_tag("library/app", "latest", &Digest::from_content(b"never synced"))
            .await
            .unwrap();

        let registry = test_case.registry();
        let (tags, link) = registry.list_tags("library/app", None, None).await.unwrap();
        assert_eq!(tags, vec!["stable".to_string()]);
        assert!(link.is_none());

        let (tags, link) = registry.list_tags("library/app", Some(1), None).await.unwrap();
        assert_eq!(tags, vec!["stable".to_string()]);
        assert!(link.is_none());
    }

    #[tokio::test]
    async fn test_tags_with_missing_layers_are_not_listed() {
        let test_case = FSRegistryTestCase::new();
        let manifest = demo_image_manifest(&demo_config());
        let digest = Digest::from_content(&manifest);
        test_case.blob_store().put(&digest, &manifest).await.unwrap();
        test_case
            .metadata_store()
            .write_tag("library/app", "partial", &digest)
            .await
            .unwrap();

        let (tags, link) = test_case
            .registry()
            .list_tags("library/app", None, None)
            .await
            .unwrap();
        assert!(tags.is_empty());
        assert!(link.is_none());
    }
}
