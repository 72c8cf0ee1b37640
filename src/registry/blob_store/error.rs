use crate::registry::oci::Digest;
use std::{fmt, io};

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    BlobNotFound,
    DigestMismatch { expected: Digest, computed: Digest },
    StorageBackend(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BlobNotFound => write!(f, "Blob not found"),
            Error::DigestMismatch { expected, computed } => {
                write!(f, "Digest mismatch: expected {expected}, computed {computed}")
            }
            Error::StorageBackend(e) => write!(f, "Storage backend error: {e}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::BlobNotFound
        } else {
            Error::StorageBackend(err.to_string())
        }
    }
}
