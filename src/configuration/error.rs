use crate::registry::cache;
use opentelemetry_otlp::ExporterBuildError;
use opentelemetry_sdk::trace::TraceError;
use rustls_pki_types::pem;
use std::{fmt, io};
use tracing::debug;

#[derive(Debug)]
pub enum Error {
    Cache(cache::Error),
    Io(io::Error),
    MissingExpectedTLSSection(String),
    ConfigurationFileFormat(String),
    Tls(String),
    TracingInit(TraceError),
    ExporterInit(ExporterBuildError),
    PolicyCompilation(String),
    Token(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Cache(err) => write!(f, "cache store: {err}"),
            Error::Io(err) => write!(f, "unable to read configuration: {err}"),
            Error::MissingExpectedTLSSection(err) => write!(f, "missing [server.tls]: {err}"),
            Error::ConfigurationFileFormat(err) => write!(f, "invalid configuration: {err}"),
            Error::Tls(err) => write!(f, "TLS setup failed: {err}"),
            Error::TracingInit(err) => write!(f, "tracing setup failed: {err}"),
            Error::ExporterInit(err) => write!(f, "OTLP exporter setup failed: {err}"),
            Error::PolicyCompilation(err) => write!(f, "invalid access policy: {err}"),
            Error::Token(err) => write!(f, "invalid token service setting: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<cache::Error> for Error {
    fn from(error: cache::Error) -> Self {
        debug!("Cache error: {error}");
        Error::Cache(error)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        debug!("TOML error: {error}");
        Error::ConfigurationFileFormat(error.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<pem::Error> for Error {
    fn from(err: pem::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<TraceError> for Error {
    fn from(error: TraceError) -> Self {
        Error::TracingInit(error)
    }
}

impl From<ExporterBuildError> for Error {
    fn from(error: ExporterBuildError) -> Self {
        Error::ExporterInit(error)
    }
}
