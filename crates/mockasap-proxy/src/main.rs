use anyhow::Context;
use clap::Parser;
use mockasap_proxy::{Config, MockProxy};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mockasap-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file; 0 picks a free port)
    #[arg(short, long, env = "MOCKASAP_PORT")]
    port: Option<u16>,

    /// YAML config file
    #[arg(short, long, env = "MOCKASAP_CONFIG")]
    config: Option<PathBuf>,

    /// Write the interception CA certificate (PEM) to this file
    #[arg(long)]
    ca_cert_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }

    let proxy = MockProxy::new(config)?;
    if let Some(path) = &args.ca_cert_out {
        let pem = proxy
            .ca_certificate_pem()
            .context("--ca-cert-out needs HTTPS interception enabled")?;
        std::fs::write(path, pem)
            .with_context(|| format!("failed to write CA certificate to {}", path.display()))?;
        info!("Wrote interception CA to {}", path.display());
    }

    let addr = proxy.start()?;
    info!("mockasap proxy ready at http://{}", addr);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    proxy.stop().await?;
    Ok(())
}
