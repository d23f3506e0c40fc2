use clap::Parser;
use loggingproxy::{
    config::{Arguments, Configuration},
    endpoint::Endpoint,
};
use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::Arc,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // generate configuration values from arguments
    let configuration = Configuration::try_from(Arguments::parse())?;

    // configure logging, letting RUST_LOG override the verbosity flag
    let default_filter = if configuration.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let address = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, configuration.listen_port);
    let endpoint = Endpoint::bind(address.into()).await?;

    // accept connections until the process is killed or accepting fails
    endpoint.serve(Arc::new(configuration)).await
}
