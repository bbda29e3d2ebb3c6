use clap::Parser;
use server::accounts::{AccountLoader, DefaultAccounts};
use server::entity::Location;
use server::network::Server;
use std::sync::Arc;
use std::time::Duration;

/// Parses command-line arguments, seeds the world, and runs the server
/// until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "43594")]
        port: u16,
        /// World tick length in milliseconds
        #[clap(short, long, default_value = "600")]
        tick_ms: u64,
        /// Maximum connected players
        #[clap(short, long, default_value = "2000")]
        max_players: usize,
        /// Reject clients declaring a different protocol revision
        #[clap(long)]
        enforce_revision: bool,
    }

    env_logger::init();
    let args = Args::parse();

    let spawn = Location::new(3222, 3218, 0);
    let accounts: Arc<dyn AccountLoader> = Arc::new(DefaultAccounts::new(spawn));

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        Duration::from_millis(args.tick_ms),
        args.max_players,
        accounts,
        args.enforce_revision,
    )
    .await?;

    // Seed the area around the spawn point
    {
        let world = server.world();
        let mut world = world.write().await;
        world.spawn_npc(1, Location::new(3222, 3222, 0), 7);
        world.spawn_npc(2, Location::new(3224, 3220, 0), 7);
        world.spawn_npc(41, Location::new(3219, 3216, 0), 3);
    }

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            eprintln!("Server exited with error: {}", e);
        }
    });

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                eprintln!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
