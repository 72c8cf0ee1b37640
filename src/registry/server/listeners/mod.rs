pub mod insecure;
pub mod tls;

use crate::configuration::ServerConfig;
use std::time::Duration;

/// Query timeout, then the grace period granted after asking the connection to shut down.
fn timeouts(server_config: &ServerConfig) -> [Duration; 2] {
    [
        Duration::from_secs(server_config.query_timeout),
        Duration::from_secs(server_config.query_timeout_grace_period),
    ]
}
