use clap::Parser;
use warden_server::WardenServer;
use warden_server::config::{DEFAULT_CONFIG_PATH, loader::load_config};

#[derive(Debug, Parser)]
#[command(name = "warden-server", version, about = "Session and token authority")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Overrides `server.listen`
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let args = Args::parse();
    let explicit = args.config != DEFAULT_CONFIG_PATH;
    let mut cfg = match load_config(explicit.then_some(args.config.as_str())) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    if let Some(listen) = args.listen {
        cfg.server.listen = listen;
    }

    warden_server::observability::init_tracing(&cfg.logging);
    tracing::info!(
        path = %args.config,
        storage = ?cfg.storage.backend,
        issuer = %cfg.auth.issuer,
        "Configuration loaded"
    );

    let server = WardenServer::bind(&cfg).await?;
    server.run().await
}
