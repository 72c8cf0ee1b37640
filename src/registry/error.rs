use crate::registry::repository::ContentKind;
use crate::registry::{blob_store, cache, metadata_store};
use std::fmt::Display;
use std::string::FromUtf8Error;
use tracing::{debug, warn};

/// Request-level errors. `Clone` so a single upstream fetch outcome can be handed to every waiter.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    BlobUnknown,
    DigestInvalid,
    TagInvalid,
    ManifestInvalid(String),
    ManifestUnknown,
    NameInvalid,
    NameUnknown,
    Unauthorized(String),
    Denied(String),
    Unsupported,
    UnsupportedMediaType(String),
    ContentUnavailable(ContentKind, String),
    DigestMismatch(String),
    RangeNotSatisfiable,
    NotFound,
    Internal(String),
    Initialization(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BlobUnknown => write!(f, "blob unknown to registry"),
            Error::DigestInvalid => write!(f, "provided digest is invalid"),
            Error::TagInvalid => write!(f, "provided reference is neither a tag nor a digest"),
            Error::ManifestInvalid(s) => write!(f, "manifest invalid: {s}"),
            Error::ManifestUnknown => write!(f, "manifest unknown to registry"),
            Error::NameInvalid => write!(f, "invalid repository name"),
            Error::NameUnknown => write!(f, "repository name not known to registry"),
            Error::Unauthorized(s) => write!(f, "authentication required: {s}"),
            Error::Denied(s) => write!(f, "requested access to the resource is denied: {s}"),
            Error::Unsupported => write!(f, "the operation is unsupported"),
            Error::UnsupportedMediaType(s) => {
                write!(f, "manifest cannot be served in an accepted media type: {s}")
            }
            Error::ContentUnavailable(kind, s) => write!(f, "{kind} content unavailable: {s}"),
            Error::DigestMismatch(s) => write!(f, "upstream content failed verification: {s}"),
            Error::RangeNotSatisfiable => write!(f, "range not satisfiable"),
            Error::NotFound => write!(f, "resource not found"),
            Error::Internal(s) => write!(f, "internal server error: {s}"),
            Error::Initialization(s) => write!(f, "initialization error: {s}"),
        }
    }
}

impl From<blob_store::Error> for Error {
    fn from(error: blob_store::Error) -> Self {
        match error {
            blob_store::Error::BlobNotFound => Error::BlobUnknown,
            blob_store::Error::DigestMismatch { expected, computed } => {
                warn!("Refusing content for {expected}: computed digest is {computed}");
                Error::DigestMismatch(format!("expected {expected}, got {computed}"))
            }
            blob_store::Error::StorageBackend(e) => {
                warn!("Blob store error: {e}");
                Error::Internal("Blob store error during operations".to_string())
            }
        }
    }
}

impl From<metadata_store::Error> for Error {
    fn from(error: metadata_store::Error) -> Self {
        match error {
            metadata_store::Error::ReferenceNotFound => Error::ManifestUnknown,
            metadata_store::Error::InvalidData(e) | metadata_store::Error::StorageBackend(e) => {
                warn!("Metadata store error: {e}");
                Error::Internal("Metadata store error during operations".to_string())
            }
        }
    }
}

impl From<cache::Error> for Error {
    fn from(error: cache::Error) -> Self {
        warn!("Cache error: {error:?}");
        Error::Internal("Cache error during operations".to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        debug!("I/O error: {error:?}");
        Error::Internal("I/O error during operations".to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(error: hyper::Error) -> Self {
        debug!("Hyper error: {error:?}");
        Error::Internal("HTTP error during operations".to_string())
    }
}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        debug!("Hyper HTTP error: {error:?}");
        Error::Internal("HTTP error during operations".to_string())
    }
}

impl From<hyper::http::uri::InvalidUri> for Error {
    fn from(error: hyper::http::uri::InvalidUri) -> Self {
        debug!("Invalid URI: {error:?}");
        Error::Internal("Invalid URI during operations".to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Serde JSON error: {error:?}");
        Error::Internal("(De)Serialization error during operations".to_string())
    }
}

impl From<FromUtf8Error> for Error {
    fn from(error: FromUtf8Error) -> Self {
        debug!("UTF-8 error: {error:?}");
        Error::Internal("UTF-8 error during operations".to_string())
    }
}
