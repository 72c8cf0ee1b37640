use crate::registry::oci::{Digest, Reference};
use crate::registry::token::{pull_scope, ACTION_PULL};
use crate::registry::Error;

/// Parsed request path and action.
#[derive(Debug)]
pub enum Route<'a> {
    Healthz,
    Metrics,
    Token {
        query: Option<&'a str>,
    },
    ApiVersion,
    ListTags {
        namespace: &'a str,
        n: Option<u16>,
        last: Option<String>,
    },
    GetBlob {
        namespace: &'a str,
        digest: Digest,
    },
    HeadBlob {
        namespace: &'a str,
        digest: Digest,
    },
    GetManifest {
        namespace: &'a str,
        reference: Reference,
    },
    HeadManifest {
        namespace: &'a str,
        reference: Reference,
    },
    /// A repository endpoint whose digest or reference does not parse.
    Malformed {
        namespace: &'a str,
        error: Error,
    },
    Unknown,
}

impl Route<'_> {
    /// Repository the request operates on, if any.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Route::ListTags { namespace, .. }
            | Route::GetBlob { namespace, .. }
            | Route::HeadBlob { namespace, .. }
            | Route::GetManifest { namespace, .. }
            | Route::HeadManifest { namespace, .. }
            | Route::Malformed { namespace, .. } => Some(namespace),
            _ => None,
        }
    }

    /// Low-cardinality name used as a metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Route::Healthz => "healthz",
            Route::Metrics => "metrics",
            Route::Token { .. } => "token",
            Route::ApiVersion => "api_version",
            Route::ListTags { .. } => "list_tags",
            Route::GetBlob { .. } => "get_blob",
            Route::HeadBlob { .. } => "head_blob",
            Route::GetManifest { .. } => "get_manifest",
            Route::HeadManifest { .. } => "head_manifest",
            Route::Malformed { .. } => "malformed",
            Route::Unknown => "unknown",
        }
    }

    pub fn action(&self) -> &'static str {
        ACTION_PULL
    }

    /// Whether a bearer token is needed to reach this route.
    pub fn requires_token(&self) -> bool {
        !matches!(
            self,
            Route::Healthz | Route::Metrics | Route::Token { .. } | Route::Unknown
        )
    }

    /// Scope a client needs for this route, advertised in challenges.
    pub fn scope(&self) -> Option<String> {
        self.namespace().map(pull_scope)
    }
}
