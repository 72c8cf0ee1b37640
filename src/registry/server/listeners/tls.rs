use crate::configuration::{Error, ServerConfig, ServerTlsConfig};
use crate::registry;
use crate::registry::server::listeners::timeouts;
use crate::registry::server::serve_request;
use crate::registry::server::ServerContext;
use arc_swap::ArcSwap;
use hyper_util::rt::TokioIo;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TlsListener {
    binding_address: SocketAddr,
    tls_acceptor: ArcSwap<TlsAcceptor>,
    context: ArcSwap<ServerContext>,
    timeouts: ArcSwap<[Duration; 2]>,
}

impl TlsListener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Result<Self, Error> {
        let tls_config = server_config.tls.as_ref().ok_or_else(|| {
            Error::MissingExpectedTLSSection("TLS configuration is missing".to_string())
        })?;

        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);
        let tls_acceptor = ArcSwap::new(Arc::new(Self::build_tls_acceptor(tls_config)?));

        Ok(Self {
            binding_address,
            tls_acceptor,
            context: ArcSwap::new(Arc::new(context)),
            timeouts: ArcSwap::from_pointee(timeouts(server_config)),
        })
    }

    pub fn notify_config_change(
        &self,
        server_config: &ServerConfig,
        context: ServerContext,
    ) -> Result<(), Error> {
        let tls_config = server_config.tls.as_ref().ok_or_else(|| {
            Error::MissingExpectedTLSSection("TLS configuration is missing".to_string())
        })?;

        let tls_acceptor = Arc::new(Self::build_tls_acceptor(tls_config)?);
        self.tls_acceptor.store(tls_acceptor);
        self.timeouts.store(Arc::new(timeouts(server_config)));

        self.context.store(Arc::new(context));
        Ok(())
    }

    fn build_tls_acceptor(tls_config: &ServerTlsConfig) -> Result<TlsAcceptor, Error> {
        debug!("Detected TLS configuration");
        let server_certs = CertificateDer::pem_file_iter(&tls_config.server_certificate_bundle)?
            .collect::<Result<_, _>>()?;
        let server_key = PrivateKeyDer::from_pem_file(&tls_config.server_private_key)?;

        let mut server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(server_certs, server_key)?;
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    pub async fn serve(&self) -> Result<(), registry::Error> {
        info!("Listening on {} (TLS)", self.binding_address);
        let listener = TcpListener::bind(self.binding_address).await?;

        loop {
            let (tcp, remote_address) = listener.accept().await?;
            debug!("Accepted connection from {remote_address}");

            let tls_acceptor = Arc::clone(&self.tls_acceptor.load());
            let context = Arc::clone(&self.context.load());
            let timeouts = Arc::clone(&self.timeouts.load());

            // a slow handshake must not hold up the accept loop
            tokio::spawn(async move {
                let handshake =
                    tokio::time::timeout(HANDSHAKE_TIMEOUT, tls_acceptor.accept(tcp)).await;
                match handshake {
                    Ok(Ok(tls)) => {
                        serve_request(TokioIo::new(tls), remote_address, context, timeouts).await;
                    }
                    Ok(Err(error)) => debug!("TLS handshake with {remote_address} failed: {error}"),
                    Err(_) => debug!("TLS handshake with {remote_address} timed out"),
                }
            });
        }
    }
}
