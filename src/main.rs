use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pylsd::acceptor::{serve, ServeMode};
use pylsd::analysis::StaticAnalysis;

#[derive(Parser, Debug)]
#[command(name = "pylsd", version, about = "Python language-analysis host")]
struct Args {
    /// Serve a single session over stdin/stdout instead of a socket.
    #[arg(long)]
    stdio: bool,

    /// Interface to bind the WebSocket listener to.
    #[arg(long, env = "PYLSD_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port for the WebSocket listener.
    #[arg(long, env = "PYLSD_PORT", default_value_t = 4288)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The stdout stream may carry protocol frames, so diagnostics go to
    // stderr unconditionally.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("pylsd=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let analysis = Arc::new(StaticAnalysis::new());
    let mode = if args.stdio {
        ServeMode::Stdio
    } else {
        let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
        ServeMode::Network { addr }
    };

    serve(mode, analysis).await
}
