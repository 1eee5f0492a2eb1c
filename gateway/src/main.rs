mod config;
mod metrics;
mod proxy;
mod upstream;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use config::{GatewayConfig, LoggingConfig};
use proxy::ProxyState;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use upstream::HttpUpstream;

#[derive(Parser)]
#[command(name = "medrag-gateway")]
#[command(about = "Same-origin proxy in front of the MedRAG backend", long_about = None)]
struct Args {
    /// YAML or TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL, overriding config and MEDRAG_UPSTREAM_URL
    #[arg(long)]
    upstream: Option<String>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::default();
    if let Some(ref path) = args.config {
        config.merge(GatewayConfig::from_file(path)?);
    }
    config.apply_env();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = args.upstream {
        config.upstream.base_url = url;
    }

    setup_logging(&config.logging)?;
    log::info!("Starting medrag-gateway...");
    log::info!("Forwarding to {}", config.upstream.base_url);

    let upstream = HttpUpstream::new(&config.upstream)
        .context("Failed to build upstream HTTP client")?;
    let state = web::Data::new(ProxyState::new(Arc::new(upstream), &config.upstream));

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(proxy::configure)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    let addr = (config.server.bind_address.as_str(), config.server.port);
    log::info!("Listening on {}:{}", addr.0, addr.1);
    server
        .bind(addr)
        .with_context(|| format!("Failed to bind {}:{}", addr.0, addr.1))?
        .run()
        .await?;

    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = log::LevelFilter::from_str(&config.level).unwrap_or(log::LevelFilter::Info);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(ref path) = config.output {
        dispatch = dispatch.chain(
            fern::log_file(path).with_context(|| format!("Failed to open log file {:?}", path))?,
        );
    }

    dispatch.apply()?;
    Ok(())
}
