use clap::Parser;
use client::MasterClient;
use shared::{GetRequest, MODE_ALL, TYPE_ANY};

/// One-shot matchmaking query against a discovery registry.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Registry address to query
        #[clap(short, long, default_value = "127.0.0.1:15940")]
        address: String,
        /// Game id to look for
        #[clap(short, long)]
        id: String,
        /// Game type filter ("any" matches every type)
        #[clap(short = 't', long, default_value = TYPE_ANY)]
        game_type: String,
        /// Game mode filter ("all" matches every mode)
        #[clap(short, long, default_value = MODE_ALL)]
        mode: String,
        /// Skill rating to match against hosts with Elo filtering enabled
        #[clap(short, long, default_value_t = 0)]
        elo: i32,
    }

    env_logger::init();
    let args = Args::parse();

    let mut client = MasterClient::connect(&args.address).await?;
    let hosts = client
        .request_hosts(GetRequest {
            id: args.id,
            game_type: args.game_type,
            mode: args.mode,
            elo: args.elo,
            sig: None,
        })
        .await?;

    if hosts.is_empty() {
        println!("No hosts found");
        return Ok(());
    }

    for host in &hosts {
        println!(
            "{} {}:{} [{}/{}] type={} mode={} elo={} delta={}",
            host.name,
            host.address,
            host.port,
            host.players,
            host.max_players,
            host.game_type,
            host.mode,
            host.elo,
            host.elo_delta
        );
    }
    println!("{} host(s) discovered", hosts.len());

    Ok(())
}
