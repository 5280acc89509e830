use clap::Parser;
use log::info;
use server::config;
use server::network::MasterServer;
use std::path::PathBuf;
use std::time::Duration;

/// Main-method of the registry daemon.
/// Parses command-line arguments, loads the persisted signature seed, then
/// runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
        port: u16,
        /// Elo tolerance window; 0 disables skill filtering
        #[clap(short, long, default_value_t = 0)]
        elo_range: i32,
        /// File holding the persisted signature seed
        #[clap(long, default_value = config::DEFAULT_SEED_FILE)]
        seed_file: PathBuf,
        /// Keep-alive broadcast interval in seconds
        #[clap(long, default_value_t = shared::PING_INTERVAL_SECS)]
        ping_interval: u64,
    }

    env_logger::init();
    let args = Args::parse();

    let seed = config::get_or_create_seed(&args.seed_file)?;

    let address = format!("{}:{}", args.host, args.port);
    let server = MasterServer::bind(&address, seed, Duration::from_secs(args.ping_interval)).await?;

    let handle = server.handle();
    handle.set_elo_range(args.elo_range);
    if args.elo_range != 0 {
        info!("Elo range set to {}", args.elo_range);
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
