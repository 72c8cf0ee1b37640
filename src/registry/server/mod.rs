pub mod basic_auth;
pub mod client_identity;
pub mod http_server;
pub mod listeners;
pub mod request_ext;
pub mod response_body;
pub mod route;
pub mod router;
pub mod server_context;
mod token_handler;

pub use client_identity::ClientIdentity;
pub use http_server::serve_request;
pub use server_context::ServerContext;

pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";
pub const DOCKER_DISTRIBUTION_API_VERSION: &str = "docker-distribution-api-version";
