use redis::RedisError;
use std::fmt;
use tracing::debug;

#[derive(Debug, PartialEq)]
pub enum Error {
    /// No live entry for the key.
    Miss,
    Backend(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Miss => write!(f, "cache miss"),
            Error::Backend(err) => write!(f, "cache backend failure: {err}"),
        }
    }
}

impl From<RedisError> for Error {
    fn from(error: RedisError) -> Self {
        debug!("Redis error: {error}");
        Error::Backend(format!("redis: {error}"))
    }
}
