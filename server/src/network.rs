//! Server network layer: accepting connections and driving the world tick.

use crate::accounts::AccountLoader;
use crate::game::World;
use crate::session;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};

/// Main server owning the listener and the tick scheduler. Connection tasks
/// and the tick loop share the world behind one lock.
pub struct Server {
    listener: TcpListener,
    world: Arc<RwLock<World>>,
    accounts: Arc<dyn AccountLoader>,
    tick_duration: Duration,
    enforce_revision: bool,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_players: usize,
        accounts: Arc<dyn AccountLoader>,
        enforce_revision: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);

        Ok(Server {
            listener,
            world: Arc::new(RwLock::new(World::new(max_players))),
            accounts,
            tick_duration,
            enforce_revision,
        })
    }

    /// Shared world handle, e.g. for spawning content before `run`.
    pub fn world(&self) -> Arc<RwLock<World>> {
        Arc::clone(&self.world)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop and the tick scheduler until the task is
    /// cancelled. A slow tick is skipped rather than replayed in a burst.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            if let Err(error) = stream.set_nodelay(true) {
                                debug!("Failed to set nodelay for {}: {}", peer, error);
                            }
                            tokio::spawn(session::run_session(
                                stream,
                                peer,
                                Arc::clone(&self.world),
                                Arc::clone(&self.accounts),
                                self.enforce_revision,
                            ));
                        }
                        Err(error) => {
                            error!("Failed to accept connection: {}", error);
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let mut world = self.world.write().await;
                    world.pulse().await;

                    if world.tick % 100 == 0 {
                        debug!("Tick {}: {} players, {} npcs",
                               world.tick, world.player_count(), world.npc_count());
                    }
                },
            }
        }
    }
}
