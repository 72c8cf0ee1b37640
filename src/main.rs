#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use crate::command::{argon, server};
use crate::configuration::registry::create_registry;
use crate::configuration::watcher::ConfigWatcher;
use crate::configuration::{Configuration, TracingConfig};
use argh::FromArgs;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

mod command;
mod configuration;
mod metrics_provider;
mod registry;

const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_tracer(tracing_config: &TracingConfig) -> Result<SdkTracer, configuration::Error> {
    let resource = Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&tracing_config.endpoint)
        .with_timeout(OTLP_EXPORT_TIMEOUT)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_sampler(Sampler::TraceIdRatioBased(
            tracing_config.sampling_rate.clamp(0.0, 1.0),
        ))
        .build();

    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
    let _ = global::set_tracer_provider(provider);
    Ok(tracer)
}

/// JSON logs filtered by `RUST_LOG` (default `info`), plus OTLP spans when tracing is configured.
fn set_tracing(config: &Configuration) -> Result<(), configuration::Error> {
    let tracing_config = config
        .observability
        .as_ref()
        .and_then(|observability| observability.tracing.as_ref());

    let telemetry = match tracing_config {
        Some(tracing_config) => {
            Some(tracing_opentelemetry::layer().with_tracer(build_tracer(tracing_config)?))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(telemetry)
        .try_init();

    Ok(())
}

#[derive(FromArgs, PartialEq, Debug)]
/// A Docker registry serving image pulls from local storage and upstream mirrors
struct GlobalArguments {
    #[argh(option, short = 'c', default = "String::from(\"config.toml\")")]
    /// the path to the configuration file, defaults to `config.toml`
    config: String,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Argon(argon::Options),
    Serve(server::Options),
}

fn main() -> Result<(), command::Error> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli_args: GlobalArguments = argh::from_env();

    // hashing a password needs neither a configuration nor a runtime
    if let SubCommand::Argon(_) = cli_args.subcommand {
        return argon::Command::run();
    }

    let config = Configuration::load(&cli_args.config)?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.global.max_concurrent_requests)
        .enable_all()
        .build()?
        .block_on(serve(&cli_args.config, config))
}

async fn serve(config_path: &str, config: Configuration) -> Result<(), command::Error> {
    set_tracing(&config)?;

    let registry = create_registry(&config)?;
    let server = Arc::new(server::Command::new(&config, registry)?);

    let _watcher = ConfigWatcher::new(config_path, server.clone())?;
    server.run().await
}
