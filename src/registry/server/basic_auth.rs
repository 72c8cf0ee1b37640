use crate::configuration::IdentityConfig;
use crate::registry::server::request_ext::HeaderExt;
use crate::registry::Error;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use hyper::header::AUTHORIZATION;
use hyper::http::request::Parts;
use std::collections::HashMap;
use tracing::{debug, error, instrument};

pub struct BasicAuthValidator {
    credentials: HashMap<String, (String, String)>, // username -> (identity_id, password_hash)
}

impl BasicAuthValidator {
    pub fn new(identities: &HashMap<String, IdentityConfig>) -> Self {
        let mut credentials = HashMap::new();
        for (identity_id, identity_config) in identities {
            credentials.insert(
                identity_config.username.clone(),
                (identity_id.clone(), identity_config.password.clone()),
            );
        }

        Self { credentials }
    }

    fn deny() -> Error {
        Error::Unauthorized("Access denied".to_string())
    }

    /// Returns the identity id owning `username` when `password` matches its argon2 hash.
    #[instrument(skip(self, password))]
    pub fn validate_credentials(&self, username: &str, password: &str) -> Result<String, Error> {
        let (identity_id, identity_password) =
            self.credentials.get(username).ok_or_else(Self::deny)?;

        let identity_password = PasswordHash::new(identity_password).map_err(|error| {
            error!("Unable to hash password: {error}");
            Self::deny()
        })?;

        Argon2::default()
            .verify_password(password.as_bytes(), &identity_password)
            .map_err(|error| {
                debug!("Unable to verify password: {error}");
                Self::deny()
            })?;

        Ok(identity_id.clone())
    }
}

/// Extracts Basic authentication credentials from the Authorization header.
pub fn extract_basic_auth(parts: &Parts) -> Option<(String, String)> {
    let Some(authorization) = parts.header_str(AUTHORIZATION) else {
        debug!("No authorization header found");
        return None;
    };

    let value = authorization.strip_prefix("Basic ")?;
    let value = BASE64_STANDARD.decode(value).ok()?;
    let value = String::from_utf8(value).ok()?;

    let (username, password) = value.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
