use crate::registry::token::AccessEntry;
use crate::registry::Error;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub access: Vec<AccessEntry>,
}

pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(
        encoding_key: EncodingKey,
        decoding_key: DecodingKey,
        algorithm: Algorithm,
        issuer: String,
        audience: String,
        ttl: Duration,
    ) -> Self {
        Self {
            encoding_key,
            decoding_key,
            algorithm,
            issuer,
            audience,
            ttl,
        }
    }

    /// Signs a token for `subject` granting `access`; returns it with its issue time.
    pub fn generate_token(
        &self,
        subject: &str,
        access: Vec<AccessEntry>,
    ) -> Result<(String, DateTime<Utc>), Error> {
        let now = Utc::now();

        let claims = RegistryTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: self.audience.clone(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            access,
        };

        let header = Header::new(self.algorithm);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))?;

        Ok((token, now))
    }

    pub fn validate_token(&self, token: &str) -> Result<RegistryTokenClaims, Error> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = 0;
        validation.validate_nbf = false;

        decode::<RegistryTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Unauthorized(format!("Invalid token: {e}")))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
