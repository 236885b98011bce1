use clap::Parser;
use log::{debug, info};
use server::{broadcast, registry};
use shared::store::MemoryStore;
use tokio::net::TcpListener;
use tokio::time::{interval, Duration};

/// Parses command-line arguments, binds the listener, and runs the hub
/// until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let listener = TcpListener::bind(&address).await?;
    info!("Hub listening on {}", address);

    let registry = registry::shared();
    let store = MemoryStore::new();

    // Periodic registry size report
    let stats_registry = registry.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let reg = stats_registry.read().await;
            if !reg.is_empty() {
                debug!(
                    "{} connections ({} active)",
                    reg.len(),
                    reg.active_count()
                );
            }
        }
    });

    let serve_handle = tokio::spawn(broadcast::serve(listener, registry, store));

    tokio::select! {
        result = serve_handle => {
            if let Ok(Err(e)) = result {
                eprintln!("Accept loop failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
