use log::{debug, info, warn};
use std::mem;

use crate::accounts::Profile;
use crate::entity::{Location, Npc, Player};
use crate::repository::Repository;
use crate::session::SessionHandle;
use crate::sync;

const NPC_CAPACITY: usize = 8192;

// Add records carry slot indices in a 14-bit field whose top value is the
// end-of-block marker, so no repository may hand out an index that reaches it.
const PLAYER_CAPACITY_LIMIT: usize = protocol::SYNC_TERMINATOR as usize;

#[derive(Debug)]
pub struct World {
    pub tick: u64,
    players: Repository<Player>,
    npcs: Repository<Npc>,
}

impl World {
    pub fn new(player_capacity: usize) -> Self {
        if player_capacity > PLAYER_CAPACITY_LIMIT {
            warn!(
                "Player capacity {} exceeds the slot index range, using {}",
                player_capacity, PLAYER_CAPACITY_LIMIT
            );
        }
        World {
            tick: 0,
            players: Repository::new(player_capacity.min(PLAYER_CAPACITY_LIMIT)),
            npcs: Repository::new(NPC_CAPACITY),
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_capacity(&self) -> usize {
        self.players.capacity()
    }

    pub fn npc_count(&self) -> usize {
        self.npcs.len()
    }

    pub fn player(&self, index: usize) -> Option<&Player> {
        self.players.get(index)
    }

    pub fn player_mut(&mut self, index: usize) -> Option<&mut Player> {
        self.players.get_mut(index)
    }

    pub fn npc(&self, index: usize) -> Option<&Npc> {
        self.npcs.get(index)
    }

    pub fn npc_mut(&mut self, index: usize) -> Option<&mut Npc> {
        self.npcs.get_mut(index)
    }

    pub fn register_player(
        &mut self,
        username: &str,
        profile: &Profile,
        session: SessionHandle,
    ) -> Option<usize> {
        let index = self.players.insert_with(|index, serial| {
            Player::new(
                index,
                serial,
                username.to_owned(),
                profile.privilege,
                profile.location,
                profile.hitpoints,
                profile.max_hitpoints,
                session,
            )
        })?;
        info!("Registered player '{}' in slot {}", username, index);
        Some(index)
    }

    pub fn remove_player(&mut self, index: usize) -> Option<Player> {
        let player = self.players.remove(index)?;
        info!("Removed player '{}' from slot {}", player.username, index);
        Some(player)
    }

    pub fn spawn_npc(&mut self, npc_type: u16, location: Location, hitpoints: u32) -> Option<usize> {
        let index = self.npcs.insert_with(|index, serial| {
            Npc::new(index, serial, npc_type, location, hitpoints, hitpoints)
        })?;
        debug!("Spawned npc type {} in slot {}", npc_type, index);
        Some(index)
    }

    pub fn remove_npc(&mut self, index: usize) -> Option<Npc> {
        self.npcs.remove(index)
    }

    // Advances the world one tick: builds and sends both synchronization
    // frames for every observer, then clears per-tick state in a single
    // pass once the last observer has been served.
    pub async fn pulse(&mut self) {
        self.tick += 1;

        let observers: Vec<usize> = self.players.iter().map(|player| player.index).collect();
        for &index in &observers {
            let (location, mut local_players, mut local_npcs, session) =
                match self.players.get_mut(index) {
                    Some(observer) => (
                        observer.location,
                        mem::take(&mut observer.local_players),
                        mem::take(&mut observer.local_npcs),
                        observer.session.clone(),
                    ),
                    None => continue,
                };

            {
                let mut cipher = session.cipher.lock().await;
                match sync::build_sync_frame(
                    location,
                    Some(index),
                    &mut local_players,
                    &self.players,
                    &mut cipher,
                ) {
                    Ok(frame) => session.send(frame),
                    Err(error) => warn!("Skipping player sync for slot {}: {}", index, error),
                }
                match sync::build_sync_frame(
                    location,
                    None,
                    &mut local_npcs,
                    &self.npcs,
                    &mut cipher,
                ) {
                    Ok(frame) => session.send(frame),
                    Err(error) => warn!("Skipping npc sync for slot {}: {}", index, error),
                }
            }

            if let Some(observer) = self.players.get_mut(index) {
                observer.local_players = local_players;
                observer.local_npcs = local_npcs;
            }
        }

        for player in self.players.iter_mut() {
            player.flags.clear();
            player.mobility.reset();
        }
        for npc in self.npcs.iter_mut() {
            npc.flags.clear();
            npc.mobility.reset();
        }
    }
}
