use crate::configuration::{Error as ConfigError, IdentityConfig};
use crate::metrics_provider::METRICS_PROVIDER;
use crate::registry::repository::AccessRequest;
use crate::registry::server::basic_auth::{extract_basic_auth, BasicAuthValidator};
use crate::registry::server::request_ext::HeaderExt;
use crate::registry::server::route::Route;
use crate::registry::server::ClientIdentity;
use crate::registry::token::{TokenConfig, TokenService};
use crate::registry::{Error, Registry};
use hyper::http::request::Parts;
use std::collections::HashMap;
use tracing::{debug, instrument};

fn record_auth_attempt<T>(method: &str, result: &Result<T, Error>) {
    let outcome = if result.is_ok() { "success" } else { "failure" };
    METRICS_PROVIDER
        .auth_attempts
        .with_label_values(&[method, outcome])
        .inc();
}

pub struct ServerContext {
    basic_auth: BasicAuthValidator,
    trust_forwarded_headers: bool,
    pub token_service: Option<TokenService>,
    pub registry: Registry,
}

impl ServerContext {
    pub fn new(
        identities: &HashMap<String, IdentityConfig>,
        token_config: Option<&TokenConfig>,
        registry: Registry,
    ) -> Result<Self, ConfigError> {
        let token_service = token_config.map(TokenService::new).transpose()?;

        Ok(Self {
            basic_auth: BasicAuthValidator::new(identities),
            trust_forwarded_headers: false,
            token_service,
            registry,
        })
    }

    /// Takes client addresses from proxy headers instead of the connection peer.
    pub fn with_forwarded_headers(mut self, trust_forwarded_headers: bool) -> Self {
        self.trust_forwarded_headers = trust_forwarded_headers;
        self
    }

    pub fn token_path(&self) -> Option<&str> {
        self.token_service.as_ref().map(TokenService::path)
    }

    /// Identity from Basic credentials, used by the token endpoint.
    ///
    /// Missing credentials yield an anonymous identity; wrong ones are rejected.
    #[instrument(skip(self, parts))]
    pub fn authenticate_basic(&self, parts: &Parts) -> Result<ClientIdentity, Error> {
        let mut identity = ClientIdentity {
            client_ip: parts.client_ip(self.trust_forwarded_headers),
            ..ClientIdentity::default()
        };

        if let Some((username, password)) = extract_basic_auth(parts) {
            let identity_id = self.basic_auth.validate_credentials(&username, &password);
            record_auth_attempt("basic", &identity_id);
            let identity_id = identity_id?;
            identity.id = Some(identity_id);
            identity.username = Some(username);
        }

        Ok(identity)
    }

    /// Admits or rejects a request before it is dispatched.
    ///
    /// Checks run in order: a valid token (401), a known repository (400/404), then the token's
    /// grant on that repository (403). Without a token service the repository access policy is
    /// applied to the anonymous client instead.
    #[instrument(skip(self, parts))]
    pub fn authorize_request(&self, route: &Route, parts: &Parts) -> Result<(), Error> {
        if !route.requires_token() {
            return Ok(());
        }

        let Some(token_service) = &self.token_service else {
            return self.authorize_anonymous(route, parts);
        };

        let token = parts
            .bearer_token()
            .ok_or_else(|| Error::Unauthorized("bearer token required".to_string()))?;
        let claims = token_service.authenticate(&token);
        record_auth_attempt("bearer", &claims);
        let claims = claims?;
        debug!("Authenticated {} for {route:?}", claims.sub);

        let Some(namespace) = route.namespace() else {
            return Ok(());
        };

        self.registry.validate_namespace(namespace)?;
        TokenService::authorize(&claims, namespace, route.action())
    }

    fn authorize_anonymous(&self, route: &Route, parts: &Parts) -> Result<(), Error> {
        let Some(namespace) = route.namespace() else {
            return Ok(());
        };

        let repository = self.registry.validate_namespace(namespace)?;
        let identity = ClientIdentity {
            client_ip: parts.client_ip(self.trust_forwarded_headers),
            ..ClientIdentity::default()
        };
        let request = AccessRequest {
            action: route.action(),
            namespace,
        };

        if repository.access_policy.evaluate(&request, &identity)? {
            Ok(())
        } else {
            Err(Error::Denied(format!(
                "{} denied on {namespace}",
                route.action()
            )))
        }
    }

    /// `WWW-Authenticate` value to send with a 401 on `route`.
    pub fn challenge(&self, route: &Route) -> Option<String> {
        self.token_service
            .as_ref()
            .map(|token_service| token_service.challenge(route.scope().as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::oci::Reference;
    use crate::registry::repository::RepositoryAccessPolicyConfig;
    use crate::registry::server::basic_auth::tests::test_identities;
    use crate::registry::tests::FSRegistryTestCase;
    use crate::registry::token::tests::test_token_config;
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use hyper::header::AUTHORIZATION;
    use hyper::Request;

    fn parts(authorization: Option<String>) -> Parts {
        let mut builder = Request::builder();
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn manifest_route(namespace: &str) -> Route<'_> {
        Route::GetManifest {
            namespace,
            reference: Reference::Tag("latest".to_string()),
        }
    }

    fn context(test_case: &FSRegistryTestCase) -> ServerContext {
        ServerContext::new(
            &test_identities(),
            Some(&test_token_config()),
            test_case.registry(),
        )
        .unwrap()
    }

    #[test]
    fn test_authenticate_basic() {
        let test_case = FSRegistryTestCase::new();
        let context = context(&test_case);

        let anonymous = context.authenticate_basic(&parts(None)).unwrap();
        assert!(anonymous.username.is_none());

        let credentials = BASE64_STANDARD.encode("alice:wonderland");
        let alice = context
            .authenticate_basic(&parts(Some(format!("Basic {credentials}"))))
            .unwrap();
        assert_eq!(alice.id, Some("alice-id".to_string()));
        assert_eq!(alice.username, Some("alice".to_string()));

        let credentials = BASE64_STANDARD.encode("alice:wrong");
        assert!(matches!(
            context.authenticate_basic(&parts(Some(format!("Basic {credentials}")))),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_authorize_request_order() {
        let test_case = FSRegistryTestCase::new();
        let context = context(&test_case);
        let token_service = context.token_service.as_ref().unwrap();

        assert!(matches!(
            context.authorize_request(&manifest_route("library/nginx"), &parts(None)),
            Err(Error::Unauthorized(_))
        ));

        let issued = token_service
            .issue(
                &context.registry,
                &ClientIdentity::default(),
                None,
                &["repository:library/nginx:pull".to_string()],
            )
            .unwrap();
        let bearer = Some(format!("Bearer {}", issued.token));

        assert!(context
            .authorize_request(&manifest_route("library/nginx"), &parts(bearer.clone()))
            .is_ok());
        assert_eq!(
            context.authorize_request(&manifest_route("unknown/app"), &parts(bearer.clone())),
            Err(Error::NameUnknown)
        );
        assert_eq!(
            context.authorize_request(&manifest_route("Library/Bad"), &parts(bearer.clone())),
            Err(Error::NameInvalid)
        );
        assert!(matches!(
            context.authorize_request(&manifest_route("library/redis"), &parts(bearer.clone())),
            Err(Error::Denied(_))
        ));
        assert!(context
            .authorize_request(&Route::ApiVersion, &parts(bearer))
            .is_ok());
        assert!(context
            .authorize_request(&Route::Healthz, &parts(None))
            .is_ok());
    }

    #[test]
    fn test_authorize_without_token_service() {
        let test_case = FSRegistryTestCase::new();
        let mut registry = test_case.registry();
        registry.set_access_policy(
            "library",
            &RepositoryAccessPolicyConfig {
                default_allow: true,
                rules: vec!["request.namespace == 'library/secret'".to_string()],
            },
        );
        let context = ServerContext::new(&HashMap::new(), None, registry).unwrap();

        assert!(context
            .authorize_request(&manifest_route("library/nginx"), &parts(None))
            .is_ok());
        assert!(matches!(
            context.authorize_request(&manifest_route("library/secret"), &parts(None)),
            Err(Error::Denied(_))
        ));
        assert!(context.challenge(&manifest_route("library/nginx")).is_none());
    }

    #[test]
    fn test_forwarded_headers_need_explicit_trust() {
        let test_case = FSRegistryTestCase::new();
        let policy = RepositoryAccessPolicyConfig {
            default_allow: true,
            rules: vec!["identity.client_ip == '10.0.0.1'".to_string()],
        };
        let spoofed = || {
            Request::builder()
                .header("X-Forwarded-For", "10.0.0.1")
                .body(())
                .unwrap()
                .into_parts()
                .0
        };

        let mut registry = test_case.registry();
        registry.set_access_policy("library", &policy);
        let context = ServerContext::new(&HashMap::new(), None, registry).unwrap();
        assert!(context
            .authorize_request(&manifest_route("library/nginx"), &spoofed())
            .is_ok());

        let mut registry = test_case.registry();
        registry.set_access_policy("library", &policy);
        let context = ServerContext::new(&HashMap::new(), None, registry)
            .unwrap()
            .with_forwarded_headers(true);
        assert!(matches!(
            context.authorize_request(&manifest_route("library/nginx"), &spoofed()),
            Err(Error::Denied(_))
        ));
    }

    #[test]
    fn test_challenge() {
        let test_case = FSRegistryTestCase::new();
        let context = context(&test_case);

        assert_eq!(
            context.challenge(&manifest_route("library/nginx")),
            Some(
                r#"Bearer realm="https://registry.test/token",service="registry.test",scope="repository:library/nginx:pull""#
                    .to_string()
            )
        );
        assert_eq!(
            context.challenge(&Route::ApiVersion),
            Some(r#"Bearer realm="https://registry.test/token",service="registry.test""#.to_string())
        );
    }
}
