use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use weir_server::app;
use weir_server::bootstrap::build_state;
use weir_server::config::ServerConfig;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  weird [config.toml]    Start the server");
}

#[tokio::main]
async fn main() -> Result<()> {
    weir_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("weir=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        path => {
            let config = match path {
                Some(path) => ServerConfig::load(path)?,
                None => ServerConfig::default(),
            };
            run_server(config).await
        }
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        "weir server starting"
    );

    let http_port = config.http_port;
    let state = build_state(config).await?;

    let addr: SocketAddr = format!("0.0.0.0:{http_port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(http = %addr, "server started");

    let app = app::build_http_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("shutting down gracefully");
        })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
