//! Corabus node - main entry point.
//!
//! - `serve`: root hub with the echo service, accepting bus connections
//! - `echo`: connect to a server and send one `echo` request

use clap::{Parser, Subcommand};
use corabus::message::Session;
use corabus::net::{NetworkConnection, NetworkServer, ProtocolRegistry};
use corabus::node::{AppContext, BusHub, EchoService};
use corabus::{BusPath, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "corabus-node")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "CORABUS_CONFIG")]
    config: Option<PathBuf>,

    /// Wire protocol scheme (corabus, corabus+json)
    #[arg(long, default_value = "corabus")]
    scheme: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a root hub with the echo service and accept connections
    Serve {
        /// Listen address (overrides configuration)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Send one echo request to a server
    Echo {
        /// Server address
        addr: String,
        /// Bus path of the echo node on the server
        path: BusPath,
        /// JSON payload
        #[arg(default_value = "null")]
        payload: String,
        /// Seconds to wait for the response
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .apply_env();
    corabus::observability::init_tracing(&config.observability);

    let protocols = ProtocolRegistry::with_defaults(config.network.max_frame_bytes);
    let protocol = protocols.get(&args.scheme)?;

    let app = AppContext::new(config)?;
    let root = BusHub::new(&app);
    root.provide(Arc::new(EchoService))?;
    app.install_root(&root).standby().await.into_result()?;

    match args.command {
        Command::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| app.config().network.listen_addr.clone());
            let server = Arc::new(NetworkServer::bind(&app, &root, addr, protocol).await?);
            tracing::info!("bus root {} serving on {}", app.root_path(), server.local_addr()?);

            let serving = server.clone();
            let accept = tokio::spawn(async move { serving.serve().await });
            tokio::signal::ctrl_c().await?;
            server.shutdown();
            accept.await??;
        }
        Command::Echo {
            addr,
            path,
            payload,
            timeout,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let connection = NetworkConnection::connect(&app, addr, protocol).await?;
            root.join(connection.node(), "uplink")
                .standby()
                .await
                .into_result()?;

            let voucher = connection
                .request(&path, EchoService::NAME, payload, &Session::new())
                .await;
            voucher
                .standby_timeout(Duration::from_secs(timeout))
                .await?
                .into_result()?;
            println!("{}", serde_json::to_string_pretty(&voucher.value()?)?);
        }
    }

    root.shutdown().standby().await.into_result()?;
    app.shutdown();
    Ok(())
}
