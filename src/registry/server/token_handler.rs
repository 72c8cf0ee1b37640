use crate::metrics_provider::METRICS_PROVIDER;
use crate::registry::server::ServerContext;
use crate::registry::{Error, ResponseBody};
use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use hyper::{Response, StatusCode};
use serde_json::json;
use tracing::{debug, instrument};

/// Query of a token request: `service` once, `scope` any number of times.
#[derive(Debug, Default, PartialEq)]
pub struct TokenQuery {
    pub service: Option<String>,
    pub scopes: Vec<String>,
}

impl TokenQuery {
    pub fn parse(query: Option<&str>) -> Result<Self, Error> {
        let Some(query) = query else {
            return Ok(Self::default());
        };

        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|e| Error::Unauthorized(format!("Invalid token request: {e}")))?;

        let mut token_query = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "service" => token_query.service = Some(value),
                "scope" => token_query.scopes.extend(
                    value
                        .split(' ')
                        .filter(|scope| !scope.is_empty())
                        .map(String::from),
                ),
                _ => {}
            }
        }

        Ok(token_query)
    }
}

impl ServerContext {
    #[instrument(skip(self, parts))]
    pub fn handle_token(
        &self,
        parts: &Parts,
        query: Option<&str>,
    ) -> Result<Response<ResponseBody>, Error> {
        let token_service = self
            .token_service
            .as_ref()
            .ok_or_else(|| Error::Internal("Token authentication is not enabled".to_string()))?;

        let query = TokenQuery::parse(query)?;
        let identity = self.authenticate_basic(parts)?;

        debug!(
            "Token request from identity: {:?}, scopes: {:?}",
            identity, query.scopes
        );

        let issued = token_service.issue(
            &self.registry,
            &identity,
            query.service.as_deref(),
            &query.scopes,
        )?;
        METRICS_PROVIDER.tokens_issued.inc();

        let body = json!({
            "token": issued.token,
            "access_token": issued.token,
            "expires_in": issued.expires_in,
            "issued_at": issued.issued_at.to_rfc3339(),
        });

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(ResponseBody::json(&body))?)
    }
}
