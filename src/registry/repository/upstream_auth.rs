//! Authentication against upstream registries: parsing their challenges and token responses.

use crate::registry::Error;
use serde::Deserialize;

/// Lifetime assumed when an upstream token response carries none.
const DEFAULT_TOKEN_TTL: u64 = 60;

/// Seconds shaved off a token lifetime so a cached token never outlives the upstream's copy.
const TOKEN_TTL_MARGIN: u64 = 5;

/// Challenge sent by an upstream in `WWW-Authenticate` along with a 401.
#[derive(Debug, PartialEq)]
pub enum Challenge {
    /// Token-based: ask `realm` for a token, forwarding the other parameters as the query.
    Bearer {
        realm: String,
        parameters: Vec<(String, String)>,
    },
    Basic,
}

impl Challenge {
    pub fn parse(header: &str) -> Result<Self, Error> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Ok(Self::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(Error::Internal(format!(
                "Unsupported upstream authentication scheme: {scheme}"
            )));
        }

        let mut realm = None;
        let mut parameters = Vec::new();
        for (key, value) in parse_auth_params(rest) {
            if key.eq_ignore_ascii_case("realm") {
                realm = Some(value);
            } else if !key.eq_ignore_ascii_case("error") {
                parameters.push((key.to_ascii_lowercase(), value));
            }
        }

        let realm = realm.ok_or_else(|| {
            Error::Internal("Upstream bearer challenge has no realm".to_string())
        })?;
        parameters.sort();

        Ok(Self::Bearer { realm, parameters })
    }
}

/// Splits `key="value", key=value` pairs; commas inside quoted values are kept.
fn parse_auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while let Some((key, after_key)) = rest.split_once('=') {
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let after_key = after_key.trim_start();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, remainder)) => (value.to_string(), remainder),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after_key.split_once(',') {
                Some((value, remainder)) => (value.trim().to_string(), remainder),
                None => (after_key.trim().to_string(), ""),
            }
        };

        if !key.is_empty() {
            params.push((key, value));
        }
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

/// Body returned by an upstream token endpoint.
///
/// Older servers send `token`, OAuth2-style ones `access_token`; some send both.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

impl TokenResponse {
    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(slice)?)
    }

    /// Seconds the token may be cached for.
    pub fn cache_ttl(&self) -> u64 {
        self.expires_in
            .unwrap_or(DEFAULT_TOKEN_TTL)
            .saturating_sub(TOKEN_TTL_MARGIN)
            .max(1)
    }

    pub fn into_authorization(self) -> Result<String, Error> {
        let token = self
            .token
            .or(self.access_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::Internal("Upstream token response has no token".to_string()))?;

        Ok(format!("Bearer {token}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();

        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                parameters: vec![
                    (
                        "scope".to_string(),
                        "repository:library/nginx:pull".to_string()
                    ),
                    ("service".to_string(), "registry.docker.io".to_string()),
                ],
            }
        );
    }

    #[test]
    fn test_parse_bearer_challenge_loose_syntax() {
        let challenge = Challenge::parse(
            r#"bearer realm=https://ghcr.io/token, service="ghcr.io", scope="repository:a/b:pull,push", error="insufficient_scope""#,
        )
        .unwrap();

        let Challenge::Bearer { realm, parameters } = challenge else {
            panic!("expected a bearer challenge");
        };
        assert_eq!(realm, "https://ghcr.io/token");
        assert_eq!(
            parameters,
            vec![
                ("scope".to_string(), "repository:a/b:pull,push".to_string()),
                ("service".to_string(), "ghcr.io".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_other_challenges() {
        assert_eq!(
            Challenge::parse(r#"Basic realm="registry""#),
            Ok(Challenge::Basic)
        );
        assert!(Challenge::parse(r#"Bearer service="no-realm""#).is_err());
        assert!(Challenge::parse(r#"Negotiate abc"#).is_err());
    }

    #[test]
    fn test_token_response() {
        let response = TokenResponse::from_slice(br#"{"token":"abc","expires_in":300}"#).unwrap();
        assert_eq!(response.cache_ttl(), 295);
        assert_eq!(response.into_authorization(), Ok("Bearer abc".to_string()));

        let response = TokenResponse::from_slice(br#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(response.cache_ttl(), 55);
        assert_eq!(response.into_authorization(), Ok("Bearer xyz".to_string()));

        let response = TokenResponse::from_slice(br#"{"token":"t","expires_in":2}"#).unwrap();
        assert_eq!(response.cache_ttl(), 1);

        let response = TokenResponse::from_slice(br#"{"expires_in":300}"#).unwrap();
        assert!(response.into_authorization().is_err());
    }
}
