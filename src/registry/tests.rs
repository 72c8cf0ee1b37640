use crate::configuration::{GlobalConfig, RepositoryConfig};
use crate::registry::blob_store::{BlobStore, BoxedReader};
use crate::registry::cache::{CacheStore, CacheStoreConfig};
use crate::registry::metadata_store::MetadataStore;
use crate::registry::oci::Digest;
use crate::registry::repository::{
    AccessPolicy, ContentKind, PullPolicy, RepositoryAccessPolicyConfig, UpstreamClient,
};
use crate::registry::{blob_store, data_store, metadata_store, Error, Registry, Repository};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_REPOSITORY: &str = "library";

pub struct FSRegistryTestCase {
    blob_store: Arc<dyn BlobStore>,
    metadata_store: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

impl FSRegistryTestCase {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for FSBackendConfig");
        let config = data_store::fs::BackendConfig {
            root_dir: temp_dir.path().to_string_lossy().to_string(),
            sync_to_disk: false,
        };

        Self {
            blob_store: Arc::new(blob_store::fs::Backend::new(&config)),
            metadata_store: Arc::new(metadata_store::fs::Backend::new(&config)),
            _temp_dir: temp_dir,
        }
    }

    fn global_config() -> GlobalConfig {
        GlobalConfig {
            fetch_retries: 1,
            fetch_retry_delay_ms: 1,
            ..GlobalConfig::default()
        }
    }

    /// A registry over this test case's stores with `repositories`.
    pub fn registry_with_config(&self, repositories: HashMap<String, RepositoryConfig>) -> Registry {
        let cache = Arc::new(CacheStore::new(&CacheStoreConfig::default()).unwrap());

        Registry::new(
            self.blob_store.clone(),
            self.metadata_store.clone(),
            repositories,
            &Self::global_config(),
            cache,
        )
        .unwrap()
    }

    /// A registry with a single `library` repository, synced ahead of time, without upstream.
    pub fn registry(&self) -> Registry {
        let mut repositories = HashMap::new();
        repositories.insert(TEST_REPOSITORY.to_string(), RepositoryConfig::default());
        self.registry_with_config(repositories)
    }

    /// A registry whose `library` repository is backed by `upstream`.
    pub fn registry_with_upstream<U>(&self, policy: PullPolicy, upstream: U) -> Registry
    where
        U: UpstreamClient + 'static,
    {
        let mut registry = self.registry_with_config(HashMap::new());
        registry.repositories.insert(
            TEST_REPOSITORY.to_string(),
            Repository {
                name: TEST_REPOSITORY.to_string(),
                policy,
                upstreams: vec![Arc::new(upstream)],
                access_policy: AccessPolicy::new(&RepositoryAccessPolicyConfig::default())
                    .unwrap(),
            },
        );
        registry
    }

    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        self.blob_store.clone()
    }

    pub fn metadata_store(&self) -> Arc<dyn MetadataStore> {
        self.metadata_store.clone()
    }
}

/// An upstream registry held in memory, counting the requests it serves.
#[derive(Default)]
pub struct FakeUpstream {
    pub content: HashMap<Digest, Bytes>,
    pub tags: HashMap<String, Digest>,
    pub fetches: Arc<AtomicUsize>,
    pub tag_fetches: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn with_content(mut self, content: &[u8]) -> Self {
        self.content
            .insert(Digest::from_content(content), Bytes::copy_from_slice(content));
        self
    }

    pub fn with_tag(mut self, tag: &str, digest: &Digest) -> Self {
        self.tags.insert(tag.to_string(), digest.clone());
        self
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn fetch(
        &self,
        _: &str,
        _: ContentKind,
        digest: &Digest,
    ) -> Result<BoxedReader, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let content = self.content.get(digest).cloned().ok_or(Error::NotFound)?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn fetch_tag(&self, _: &str, tag: &str) -> Result<Digest, Error> {
        self.tag_fetches.fetch_add(1, Ordering::SeqCst);
        self.tags.get(tag).cloned().ok_or(Error::NotFound)
    }
}

mod scenarios {
    use super::*;
    use crate::registry::manifest::convert::tests::{
        demo_config, demo_image_manifest, LAYER_A, LAYER_B,
    };
    use crate::registry::oci::media_type::{DOCKER_MANIFEST_V1_SIGNED, DOCKER_MANIFEST_V2};
    use crate::registry::server::basic_auth::tests::test_identities;
    use crate::registry::server::http_server::handle_request;
    use crate::registry::server::{ServerContext, DOCKER_CONTENT_DIGEST};
    use crate::registry::token::tests::test_token_config;
    use crate::registry::ResponseBody;
    use http_body_util::BodyExt;
    use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
    use hyper::{Request, Response, StatusCode};
    use serde_json::Value;

    fn server(registry: Registry) -> Arc<ServerContext> {
        Arc::new(
            ServerContext::new(&test_identities(), Some(&test_token_config()), registry).unwrap(),
        )
    }

    async fn send(
        context: &Arc<ServerContext>,
        uri: &str,
        headers: &[(&str, String)],
    ) -> Response<ResponseBody> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let request = builder.body(()).unwrap();
        handle_request(context.clone(), request).await.unwrap()
    }

    async fn body(response: Response<ResponseBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    async fn pull_token(context: &Arc<ServerContext>, namespace: &str) -> String {
        let response = send(
            context,
            &format!("/token?service=registry.test&scope=repository:{namespace}:pull"),
            &[],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(&body(response).await).unwrap();
        format!("Bearer {}", body["token"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_missing_token_is_challenged() {
        let test_case = FSRegistryTestCase::new();
        let context = server(test_case.registry());

        let response = send(&context, "/v2/library/nginx/manifests/latest", &[]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.starts_with("Bearer "));
        assert!(challenge.contains(r#"realm="https://registry.test/token""#));
        assert!(challenge.contains(r#"service="registry.test""#));
        assert!(challenge.contains(r#"scope="repository:library/nginx:pull""#));

        let response = send(&context, "/v2/", &[]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers().get(WWW_AUTHENTICATE).unwrap();
        assert!(!challenge.to_str().unwrap().contains("scope="));
    }

    #[tokio::test]
    async fn test_api_version_with_token() {
        let test_case = FSRegistryTestCase::new();
        let context = server(test_case.registry());
        let token = pull_token(&context, "library/nginx").await;

        let response = send(&context, "/v2/", &[(AUTHORIZATION.as_str(), token)]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn test_token_scope_is_enforced() {
        let test_case = FSRegistryTestCase::new();
        let context = server(test_case.registry());
        let token = pull_token(&context, "library/nginx").await;

        let response = send(
            &context,
            "/v2/library/redis/manifests/latest",
            &[(AUTHORIZATION.as_str(), token.clone())],
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(
            &context,
            "/v2/unknown/app/manifests/latest",
            &[(AUTHORIZATION.as_str(), token.clone())],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            &context,
            "/v2/library/nginx/blobs/sha256:short",
            &[(AUTHORIZATION.as_str(), token)],
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_on_demand_pull_fetches_once() {
        let test_case = FSRegistryTestCase::new();
        let config = demo_config();
        let manifest = demo_image_manifest(&config);
        let manifest_digest = Digest::from_content(&manifest);

        let upstream = FakeUpstream::default()
            .with_content(&manifest)
            .with_content(&config)
            .with_content(LAYER_A)
            .with_content(LAYER_B)
            .with_tag("latest", &manifest_digest);
        let fetches = upstream.fetches.clone();
        let tag_fetches = upstream.tag_fetches.clone();

        let context = server(test_case.registry_with_upstream(PullPolicy::OnDemand, upstream));
        let token = pull_token(&context, "library/app").await;
        let headers = [
            (AUTHORIZATION.as_str(), token),
            (ACCEPT.as_str(), DOCKER_MANIFEST_V2.to_string()),
        ];

        let response = send(&context, "/v2/library/app/manifests/latest", &headers).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(DOCKER_CONTENT_DIGEST).unwrap(),
            manifest_digest.to_string().as_str()
        );
        assert_eq!(body(response).await, Bytes::from(manifest.clone()));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(tag_fetches.load(Ordering::SeqCst), 1);
        assert!(test_case
            .blob_store()
            .contains(&manifest_digest)
            .await
            .unwrap());

        let response = send(&context, "/v2/library/app/manifests/latest", &headers).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, Bytes::from(manifest));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(tag_fetches.load(Ordering::SeqCst), 1);

        let layer = Digest::from_content(LAYER_A);
        let response = send(
            &context,
            &format!("/v2/library/app/blobs/{layer}"),
            &headers[..1],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, Bytes::from_static(LAYER_A));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_immediate_miss_never_fetches() {
        let test_case = FSRegistryTestCase::new();
        let upstream = FakeUpstream::default().with_content(LAYER_A);
        let fetches = upstream.fetches.clone();

        let context = server(test_case.registry_with_upstream(PullPolicy::Immediate, upstream));
        let token = pull_token(&context, "library/app").await;
        let layer = Digest::from_content(LAYER_A);

        let response = send(
            &context,
            &format!("/v2/library/app/blobs/{layer}"),
            &[(AUTHORIZATION.as_str(), token)],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body: Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(body["errors"][0]["code"], "BLOB_UNKNOWN");
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_immediate_unsynced_manifest_never_fetches() {
        let test_case = FSRegistryTestCase::new();
        let config = demo_config();
        let manifest = demo_image_manifest(&config);
        let digest = Digest::from_content(&manifest);
        test_case
            .metadata_store()
            .write_tag("library/app", "latest", &digest)
            .await
            .unwrap();

        let upstream = FakeUpstream::default()
            .with_content(&manifest)
            .with_tag("latest", &digest);
        let fetches = upstream.fetches.clone();
        let tag_fetches = upstream.tag_fetches.clone();

        let context = server(test_case.registry_with_upstream(PullPolicy::Immediate, upstream));
        let token = pull_token(&context, "library/app").await;

        let response = send(
            &context,
            "/v2/library/app/manifests/latest",
            &[(AUTHORIZATION.as_str(), token)],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body: Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(body["errors"][0]["code"], "MANIFEST_UNKNOWN");
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert_eq!(tag_fetches.load(Ordering::SeqCst), 0);
        assert!(!test_case.blob_store().contains(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn test_signed_schema1_is_fresh_per_request() {
        let test_case = FSRegistryTestCase::new();
        let config = demo_config();
        let manifest = demo_image_manifest(&config);
        let digest = Digest::from_content(&manifest);
        for content in [config.as_slice(), LAYER_A, LAYER_B, manifest.as_slice()] {
            test_case
                .blob_store()
                .put(&Digest::from_content(content), content)
                .await
                .unwrap();
        }
        test_case
            .metadata_store()
            .write_tag("library/app", "latest", &digest)
            .await
            .unwrap();

        let context = server(test_case.registry());
        let token = pull_token(&context, "library/app").await;
        let headers = [
            (AUTHORIZATION.as_str(), token),
            (ACCEPT.as_str(), DOCKER_MANIFEST_V1_SIGNED.to_string()),
        ];

        let first = send(&context, "/v2/library/app/manifests/latest", &headers).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(
            first.headers().get(CONTENT_TYPE).unwrap(),
            DOCKER_MANIFEST_V1_SIGNED
        );
        let first_digest = first.headers().get(DOCKER_CONTENT_DIGEST).unwrap().clone();
        let first = body(first).await;

        let second = send(&context, "/v2/library/app/manifests/latest", &headers).await;
        assert_eq!(
            second.headers().get(DOCKER_CONTENT_DIGEST).unwrap(),
            &first_digest
        );
        let second = body(second).await;

        assert_ne!(first, second);
        let first: Value = serde_json::from_slice(&first).unwrap();
        let second: Value = serde_json::from_slice(&second).unwrap();
        assert_eq!(first["fsLayers"], second["fsLayers"]);
        assert_eq!(first["name"], "library/app");
        assert_eq!(first["tag"], "latest");
    }

    #[tokio::test]
    async fn test_unacceptable_media_type() {
        let test_case = FSRegistryTestCase::new();
        let config = demo_config();
        let manifest = demo_image_manifest(&config);
        let digest = Digest::from_content(&manifest);
        test_case.blob_store().put(&digest, &manifest).await.unwrap();
        for content in [config.as_slice(), LAYER_A, LAYER_B] {
            test_case
                .blob_store()
                .put(&Digest::from_content(content), content)
                .await
                .unwrap();
        }

        let context = server(test_case.registry());
        let token = pull_token(&context, "library/app").await;

        let response = send(
            &context,
            &format!("/v2/library/app/manifests/{digest}"),
            &[
                (AUTHORIZATION.as_str(), token),
                (
                    ACCEPT.as_str(),
                    "application/vnd.oci.image.index.v1+json".to_string(),
                ),
            ],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_healthz_needs_no_token() {
        let test_case = FSRegistryTestCase::new();
        let context = server(test_case.registry());

        let response = send(&context, "/healthz", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
