use crate::configuration::{Error, RepositoryUpstreamConfig};
use crate::registry;
use crate::registry::cache::CacheStore;
use crate::registry::oci::media_type::MediaType;
use crate::registry::oci::Digest;
use crate::registry::repository::upstream::{ContentKind, UpstreamClient};
use crate::registry::repository::upstream_auth::{Challenge, TokenResponse};
use crate::registry::blob_store::BoxedReader;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCEPT, AUTHORIZATION, LOCATION, WWW_AUTHENTICATE};
use hyper::http::request;
use hyper::{Method, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, instrument, warn};

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// HTTP client for one upstream registry serving a local repository.
#[derive(Debug)]
pub struct RepositoryUpstream {
    token_cache: Arc<CacheStore>,
    repository: String,
    remote_name: Option<String>,
    pub url: String,
    pub max_redirect: u8,
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    basic_auth_header: Option<String>,
}

impl RepositoryUpstream {
    pub fn new(
        repository: &str,
        config: RepositoryUpstreamConfig,
        token_cache: Arc<CacheStore>,
    ) -> Result<Self, Error> {
        let client = Self::build_http_client(
            config.server_ca_bundle,
            config.client_certificate,
            config.client_private_key,
        )?;

        let mut upstream = Self {
            token_cache,
            repository: repository.to_string(),
            remote_name: config.name,
            url: config.url.trim_end_matches('/').to_string(),
            max_redirect: config.max_redirect,
            client,
            basic_auth_header: None,
        };

        match (config.username, config.password) {
            (Some(username), Some(password)) => {
                upstream.set_basic_auth(&username, &password);
            }
            (Some(_), None) | (None, Some(_)) => {
                warn!("Username and password must be both provided");
            }
            _ => {}
        }

        Ok(upstream)
    }

    fn set_basic_auth(&mut self, username: &str, password: &str) {
        let header = format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{username}:{password}"))
        );

        self.basic_auth_header = Some(header);
    }

    fn build_http_client(
        server_ca_bundle: Option<String>,
        client_certificate: Option<String>,
        client_private_key: Option<String>,
    ) -> Result<Client<HttpsConnector<HttpConnector>, Empty<Bytes>>, Error> {
        let mut root_store = RootCertStore::empty();
        let certs = if let Some(server_ca_bundle) = server_ca_bundle {
            CertificateDer::pem_file_iter(server_ca_bundle)?.collect::<Result<Vec<_>, _>>()?
        } else {
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                warn!("Unable to load a platform certificate: {e}");
            }
            native.certs
        };
        root_store.add_parsable_certificates(certs);

        let tls_config = match (client_certificate, client_private_key) {
            (Some(client_certificate), Some(client_private_key)) => {
                let certs = CertificateDer::pem_file_iter(client_certificate)?
                    .collect::<Result<Vec<_>, _>>()?;
                let key = PrivateKeyDer::from_pem_file(client_private_key)?;

                rustls::ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_client_auth_cert(certs, key)?
            }
            (None, Some(_)) | (Some(_), None) => {
                warn!("Client certificate and private key must be both provided");
                rustls::ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
            _ => rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        };

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Client::builder(TokioExecutor::new()).build(connector))
    }

    /// Maps a client namespace to the repository name on the upstream.
    ///
    /// The local repository prefix is replaced by the configured remote name. Without a remote
    /// name the remainder is used as is, or the full namespace if nothing remains.
    pub fn remote_namespace(&self, namespace: &str) -> String {
        let remainder = namespace
            .strip_prefix(&self.repository)
            .unwrap_or(namespace)
            .trim_start_matches('/');

        match (self.remote_name.as_deref(), remainder.is_empty()) {
            (Some(remote), true) => remote.to_string(),
            (Some(remote), false) => format!("{remote}/{remainder}"),
            (None, true) => namespace.to_string(),
            (None, false) => remainder.to_string(),
        }
    }

    fn token_cache_key(&self, namespace: &str) -> String {
        format!("upstream-token:{}:{namespace}", self.url)
    }

    fn get_basic_auth_header(&self) -> Result<(String, u64), registry::Error> {
        if let Some(header) = &self.basic_auth_header {
            return Ok((header.clone(), 60));
        }

        debug!("Basic authentication required by upstream");
        Err(registry::Error::Unauthorized(
            "Authentication required by upstream".to_string(),
        ))
    }

    #[instrument(skip(self, parameters))]
    async fn query_bearer_token(
        &self,
        realm: &str,
        parameters: &[(String, String)],
    ) -> Result<(String, u64), registry::Error> {
        let parameters = serde_urlencoded::to_string(parameters).map_err(|e| {
            debug!("Failed to encode token request parameters: {e}");
            registry::Error::Internal("Failed to build upstream token request".to_string())
        })?;

        let auth_location = if parameters.is_empty() {
            realm.to_string()
        } else {
            format!("{realm}?{parameters}")
        };

        let mut req = request::Builder::new()
            .method(Method::GET)
            .uri(&auth_location);
        if let Some(basic_auth_header) = &self.basic_auth_header {
            req = req.header(AUTHORIZATION, basic_auth_header);
        }

        let req = req.body(Empty::new())?;

        debug!("Requesting token from upstream");

        let response = match self.client.request(req).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to authenticate with upstream: {e:?}");
                return Err(registry::Error::Unauthorized(
                    "Failed to authenticate with upstream".to_string(),
                ));
            }
        };

        if !response.status().is_success() {
            debug!("Upstream token endpoint answered {}", response.status());
            return Err(registry::Error::Unauthorized(
                "Upstream refused to issue a token".to_string(),
            ));
        }

        let content = response.into_body().collect().await?.to_bytes();
        let token = TokenResponse::from_slice(&content)?;
        let ttl = token.cache_ttl();

        Ok((token.into_authorization()?, ttl))
    }

    async fn get_auth_token_from_cache(&self, namespace: &str) -> Option<HeaderValue> {
        let Ok(token) = self.token_cache.retrieve(&self.token_cache_key(namespace)).await else {
            return None;
        };

        debug!("Retrieved upstream token from cache for namespace: {namespace}");
        HeaderValue::from_str(&token).ok()
    }

    /// Sends `method` to `location`, following redirects and answering one auth challenge.
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        namespace: &str,
        method: &Method,
        location: &str,
    ) -> Result<Response<Incoming>, registry::Error> {
        let mut authorization_header = self.get_auth_token_from_cache(namespace).await;

        let mut location = location.to_string();
        let mut redirect_count = 0;
        let mut authenticate_count = 0;

        let response = loop {
            info!("Requesting {location} from upstream");

            let mut request = request::Builder::new().method(method).uri(&location);
            for media_type in MediaType::ALL {
                request = request.header(ACCEPT, media_type.as_str());
            }

            if let Some(authorization_header) = &authorization_header {
                request = request.header(AUTHORIZATION, authorization_header);
            }

            let request = request.body(Empty::new())?;
            let response = match self.client.request(request).await {
                Ok(res) => res,
                Err(e) => {
                    error!("Failed to query upstream: {e:?}");
                    return Err(registry::Error::Internal(
                        "Failed to query upstream".to_string(),
                    ));
                }
            };

            if response.status().is_redirection() {
                if let Some(new_location) = response.headers().get(LOCATION).cloned() {
                    let new_location = new_location.to_str().map_err(|e| {
                        error!("Failed to parse Location header: {e:?}");
                        registry::Error::Internal("Failed to parse Location header".to_string())
                    })?;
                    let target = redirect_target(&location, new_location)?;

                    // Presigned storage URLs reject requests carrying registry credentials.
                    if !same_authority(&location, &target) && authorization_header.take().is_some()
                    {
                        debug!("Not forwarding upstream credentials to {target}");
                    }

                    location = target;
                    redirect_count += 1;

                    if redirect_count >= self.max_redirect {
                        error!("Too many upstream redirections");
                        return Err(registry::Error::Internal(
                            "Too many upstream redirections".to_string(),
                        ));
                    }
                    continue;
                }
            }

            if response.status() == StatusCode::UNAUTHORIZED {
                if authenticate_count > 0 {
                    debug!("Too many upstream authentication requests");
                    return Err(registry::Error::Unauthorized(
                        "Too many upstream authentication requests".to_string(),
                    ));
                }

                let (token, token_ttl) = if let Some(www_authenticate_header) = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|header| header.to_str().ok())
                {
                    match Challenge::parse(www_authenticate_header)? {
                        Challenge::Bearer { realm, parameters } => {
                            self.query_bearer_token(&realm, &parameters).await
                        }
                        Challenge::Basic => self.get_basic_auth_header(),
                    }
                } else {
                    self.get_basic_auth_header()
                }?;

                self.token_cache
                    .store(&self.token_cache_key(namespace), &token, token_ttl)
                    .await?;

                authorization_header = Some(HeaderValue::from_str(&token).map_err(|e| {
                    debug!("Failed to build upstream authorization header: {e:?}");
                    registry::Error::Internal(
                        "Failed to build authorization header for upstream".to_string(),
                    )
                })?);

                authenticate_count += 1;
                continue;
            }

            break response;
        };

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(registry::Error::NotFound),
            StatusCode::UNAUTHORIZED => Err(registry::Error::Unauthorized(
                "Failed to authenticate with upstream".to_string(),
            )),
            StatusCode::FORBIDDEN => Err(registry::Error::Denied(
                "Access to upstream is forbidden".to_string(),
            )),
            status => {
                error!("Upstream answered {status} for {location}");
                Err(registry::Error::Internal(format!(
                    "Upstream answered {status}"
                )))
            }
        }
    }
}

/// Resolves a `Location` header against the URL it was received from.
fn redirect_target(current: &str, location: &str) -> Result<String, registry::Error> {
    let invalid = || {
        error!("Unusable redirect from {current} to {location}");
        registry::Error::Internal("Failed to parse Location header".to_string())
    };

    let target = location.parse::<Uri>().map_err(|_| invalid())?;
    if target.authority().is_some() {
        return Ok(location.to_string());
    }

    let current = current.parse::<Uri>().map_err(|_| invalid())?;
    match (current.scheme_str(), current.authority()) {
        (Some(scheme), Some(authority)) if location.starts_with('/') => {
            Ok(format!("{scheme}://{authority}{location}"))
        }
        _ => Err(invalid()),
    }
}

fn same_authority(a: &str, b: &str) -> bool {
    match (a.parse::<Uri>(), b.parse::<Uri>()) {
        (Ok(a), Ok(b)) => a.authority() == b.authority(),
        _ => false,
    }
}

#[async_trait]
impl UpstreamClient for RepositoryUpstream {
    async fn fetch(
        &self,
        namespace: &str,
        kind: ContentKind,
        digest: &Digest,
    ) -> Result<BoxedReader, registry::Error> {
        let remote = self.remote_namespace(namespace);
        let location = format!("{}/v2/{remote}/{kind}/{digest}", self.url);

        let response = self.query(&remote, &Method::GET, &location).await?;
        let stream = response
            .into_body()
            .into_data_stream()
            .map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn fetch_tag(&self, namespace: &str, tag: &str) -> Result<Digest, registry::Error> {
        let remote = self.remote_namespace(namespace);
        let location = format!("{}/v2/{remote}/manifests/{tag}", self.url);

        let response = self.query(&remote, &Method::HEAD, &location).await?;
        if let Some(digest) = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|value| value.to_str().ok())
        {
            return digest.parse();
        }

        debug!("Upstream did not send a digest for {remote}:{tag}, hashing the manifest");
        let response = self.query(&remote, &Method::GET, &location).await?;
        let content = response.into_body().collect().await?.to_bytes();
        Ok(Digest::from_content(&content))
    }
}
