use crate::configuration::Configuration;
use crate::registry::server::listeners::insecure::InsecureListener;
use crate::registry::server::listeners::tls::TlsListener;
use crate::registry::server::ServerContext;
use crate::registry::Registry;
use crate::{command, configuration};
use argh::FromArgs;

pub enum ServiceListener {
    Insecure(InsecureListener),
    Secure(TlsListener),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Serve the registry pull API"
)]
pub struct Options {}

pub struct Command {
    listener: ServiceListener,
}

impl Command {
    pub fn new(config: &Configuration, registry: Registry) -> Result<Command, configuration::Error> {
        let context = Self::build_context(config, registry)?;

        let listener = if config.server.tls.is_some() {
            ServiceListener::Secure(TlsListener::new(&config.server, context)?)
        } else {
            ServiceListener::Insecure(InsecureListener::new(&config.server, context))
        };

        Ok(Command { listener })
    }

    fn build_context(
        config: &Configuration,
        registry: Registry,
    ) -> Result<ServerContext, configuration::Error> {
        Ok(
            ServerContext::new(&config.auth.identity, config.auth.token.as_ref(), registry)?
                .with_forwarded_headers(config.server.trust_forwarded_headers),
        )
    }

    /// Swaps in a context built from `config`.
    ///
    /// The listener kind is fixed at startup: switching between TLS and plain TCP needs a restart.
    pub fn notify_config_change(
        &self,
        config: &Configuration,
        registry: Registry,
    ) -> Result<(), configuration::Error> {
        let context = Self::build_context(config, registry)?;

        match &self.listener {
            ServiceListener::Insecure(listener) => {
                listener.notify_config_change(&config.server, context);
            }
            ServiceListener::Secure(listener) => {
                listener.notify_config_change(&config.server, context)?;
            }
        }

        Ok(())
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        match &self.listener {
            ServiceListener::Insecure(listener) => listener.serve().await?,
            ServiceListener::Secure(listener) => listener.serve().await?,
        }

        Ok(())
    }
}
