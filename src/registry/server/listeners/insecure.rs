use crate::configuration::ServerConfig;
use crate::registry::server::listeners::timeouts;
use crate::registry::server::serve_request;
use crate::registry::server::ServerContext;
use crate::registry::Error;
use arc_swap::ArcSwap;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct InsecureListener {
    binding_address: SocketAddr,
    context: ArcSwap<ServerContext>,
    timeouts: ArcSwap<[Duration; 2]>,
}

impl InsecureListener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Self {
        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);

        Self {
            binding_address,
            context: ArcSwap::from_pointee(context),
            timeouts: ArcSwap::from_pointee(timeouts(server_config)),
        }
    }

    pub fn notify_config_change(&self, server_config: &ServerConfig, context: ServerContext) {
        self.timeouts.store(Arc::new(timeouts(server_config)));
        self.context.store(Arc::new(context));
    }

    pub async fn serve(&self) -> Result<(), Error> {
        info!("Listening on {} (non-TLS)", self.binding_address);
        let listener = TcpListener::bind(self.binding_address).await?;

        loop {
            debug!("Waiting for incoming connection");
            let (tcp, remote_address) = listener.accept().await?;

            debug!("Accepted connection from {remote_address}");
            let stream = TokioIo::new(tcp);
            let context = Arc::clone(&self.context.load());
            let timeouts = Arc::clone(&self.timeouts.load());

            tokio::spawn(Box::pin(serve_request(
                stream,
                remote_address,
                context,
                timeouts,
            )));
        }
    }
}
