//! Stateless bearer tokens for the pull path.
//!
//! Tokens are JWTs signed by the registry itself. Nothing is stored server side: validation only
//! checks the signature, the expiry, the issuer and the audience (the configured service).

use crate::configuration::Error as ConfigError;
use crate::registry::repository::AccessRequest;
use crate::registry::server::ClientIdentity;
use crate::registry::{Error, Registry};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::Deserialize;
use tracing::{debug, instrument};

mod jwt;
mod scope;

pub use jwt::{RegistryTokenClaims, TokenSigner};
pub use scope::{parse_scope, parse_scopes, pull_scope, AccessEntry, ACTION_PULL};

use scope::RESOURCE_REPOSITORY;

#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
    /// URL advertised in challenges; clients fetch tokens from it.
    pub realm: String,
    pub service: String,
    #[serde(default = "TokenConfig::default_issuer")]
    pub issuer: String,
    #[serde(default = "TokenConfig::default_path")]
    pub path: String,
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default = "TokenConfig::default_ttl")]
    pub ttl: u64,
}

impl TokenConfig {
    fn default_issuer() -> String {
        "pull-registry".to_string()
    }

    fn default_path() -> String {
        "/token".to_string()
    }

    fn default_ttl() -> u64 {
        300
    }
}

/// A freshly signed token, as returned by the token endpoint.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
}

pub struct TokenService {
    signer: TokenSigner,
    realm: String,
    service: String,
    path: String,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Result<Self, ConfigError> {
        let (algorithm, encoding_key, decoding_key) = Self::load_keys(config)?;
        let ttl = i64::try_from(config.ttl)
            .map_err(|_| ConfigError::Token(format!("token ttl out of range: {}", config.ttl)))?;

        let signer = TokenSigner::new(
            encoding_key,
            decoding_key,
            algorithm,
            config.issuer.clone(),
            config.service.clone(),
            Duration::seconds(ttl),
        );

        Ok(Self {
            signer,
            realm: config.realm.clone(),
            service: config.service.clone(),
            path: config.path.clone(),
        })
    }

    fn load_keys(config: &TokenConfig) -> Result<(Algorithm, EncodingKey, DecodingKey), ConfigError> {
        if let Some(secret) = &config.secret {
            let algorithm = config.algorithm.unwrap_or(Algorithm::HS256);
            if !matches!(
                algorithm,
                Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
            ) {
                return Err(ConfigError::Token(format!(
                    "algorithm {algorithm:?} cannot be used with a shared secret"
                )));
            }

            return Ok((
                algorithm,
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            ));
        }

        let (Some(private_key), Some(public_key)) = (&config.private_key, &config.public_key)
        else {
            return Err(ConfigError::Token(
                "either a secret or a private_key/public_key pair is required".to_string(),
            ));
        };

        let private_pem = std::fs::read(private_key)?;
        let public_pem = std::fs::read(public_key)?;
        let algorithm = config.algorithm.unwrap_or(Algorithm::ES256);
        let key_error = |e: jsonwebtoken::errors::Error| ConfigError::Token(e.to_string());

        let keys = match algorithm {
            Algorithm::ES256 | Algorithm::ES384 => (
                EncodingKey::from_ec_pem(&private_pem).map_err(key_error)?,
                DecodingKey::from_ec_pem(&public_pem).map_err(key_error)?,
            ),
            Algorithm::EdDSA => (
                EncodingKey::from_ed_pem(&private_pem).map_err(key_error)?,
                DecodingKey::from_ed_pem(&public_pem).map_err(key_error)?,
            ),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => (
                EncodingKey::from_rsa_pem(&private_pem).map_err(key_error)?,
                DecodingKey::from_rsa_pem(&public_pem).map_err(key_error)?,
            ),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                return Err(ConfigError::Token(format!(
                    "algorithm {algorithm:?} requires a shared secret"
                )));
            }
        };

        Ok((algorithm, keys.0, keys.1))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Value of the `WWW-Authenticate` header sent with a 401.
    pub fn challenge(&self, scope: Option<&str>) -> String {
        let mut challenge = format!(
            "Bearer realm=\"{}\",service=\"{}\"",
            self.realm, self.service
        );
        if let Some(scope) = scope {
            challenge.push_str(&format!(",scope=\"{scope}\""));
        }
        challenge
    }

    /// Issues a token granting the requested scopes that `identity` is entitled to.
    ///
    /// Only `pull` on repositories served by this registry can be granted; anything else is
    /// silently left out of the token, and a scope nothing can be granted for yields a token with
    /// empty access.
    #[instrument(skip(self, registry, identity))]
    pub fn issue(
        &self,
        registry: &Registry,
        identity: &ClientIdentity,
        service: Option<&str>,
        scopes: &[String],
    ) -> Result<IssuedToken, Error> {
        if let Some(service) = service {
            if service != self.service {
                return Err(Error::Unauthorized(format!("unknown service: {service}")));
            }
        }

        let requested = parse_scopes(scopes)?;
        let mut granted = Vec::new();
        for entry in requested {
            if let Some(entry) = Self::grant(registry, identity, entry)? {
                granted.push(entry);
            }
        }

        let subject = identity
            .username
            .as_ref()
            .or(identity.id.as_ref())
            .map_or("anonymous", String::as_str);

        debug!("Granting {granted:?} to {subject}");
        let (token, issued_at) = self.signer.generate_token(subject, granted)?;

        Ok(IssuedToken {
            token,
            expires_in: u64::try_from(self.signer.ttl().num_seconds()).unwrap_or(0),
            issued_at,
        })
    }

    fn grant(
        registry: &Registry,
        identity: &ClientIdentity,
        entry: AccessEntry,
    ) -> Result<Option<AccessEntry>, Error> {
        if entry.resource_type != RESOURCE_REPOSITORY {
            debug!("Ignoring scope on resource type {}", entry.resource_type);
            return Ok(None);
        }

        let Ok(repository) = registry.validate_namespace(&entry.name) else {
            debug!("Ignoring scope on unknown repository {}", entry.name);
            return Ok(None);
        };

        let mut actions = Vec::new();
        for action in entry.actions.iter().filter(|a| *a == ACTION_PULL) {
            let request = AccessRequest {
                action,
                namespace: &entry.name,
            };
            if repository.access_policy.evaluate(&request, identity)? {
                actions.push(action.clone());
            }
        }

        if actions.is_empty() {
            return Ok(None);
        }

        Ok(Some(AccessEntry { actions, ..entry }))
    }

    /// Checks signature, expiry, issuer and audience.
    pub fn authenticate(&self, token: &str) -> Result<RegistryTokenClaims, Error> {
        self.signer.validate_token(token)
    }

    /// Checks that the token's grants cover `action` on `namespace`.
    pub fn authorize(
        claims: &RegistryTokenClaims,
        namespace: &str,
        action: &str,
    ) -> Result<(), Error> {
        if claims
            .access
            .iter()
            .any(|entry| entry.covers(namespace, action))
        {
            Ok(())
        } else {
            Err(Error::Denied(format!(
                "token does not grant {action} on {namespace}"
            )))
        }
    }

    /// Authenticates and authorizes in one step, skipping the repository lookup between them.
    #[cfg(test)]
    pub fn validate(
        &self,
        token: &str,
        namespace: &str,
        action: &str,
    ) -> Result<RegistryTokenClaims, Error> {
        let claims = self.authenticate(token)?;
        Self::authorize(&claims, namespace, action)?;
        Ok(claims)
    }
}
