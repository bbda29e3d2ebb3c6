//! Account loading seam used by the login flow.

use crate::entity::Location;

/// Everything the world needs to materialize a freshly authenticated player.
#[derive(Debug, Clone)]
pub struct Profile {
    pub privilege: u8,
    pub location: Location,
    pub hitpoints: u32,
    pub max_hitpoints: u32,
}

/// Resolves credentials to a player profile during login.
pub trait AccountLoader: Send + Sync {
    /// Returns the stored profile, or `None` when the account cannot be
    /// loaded. A `None` here surfaces as the bad-credentials login response.
    fn load_profile(&self, username: &str, password: &str) -> Option<Profile>;
}

/// Accepts every credential pair and spawns all players at one location.
/// Stands in until persistent account storage exists.
#[derive(Debug, Clone)]
pub struct DefaultAccounts {
    spawn: Location,
}

impl DefaultAccounts {
    pub fn new(spawn: Location) -> Self {
        DefaultAccounts { spawn }
    }
}

impl AccountLoader for DefaultAccounts {
    fn load_profile(&self, _username: &str, _password: &str) -> Option<Profile> {
        Some(Profile {
            privilege: 0,
            location: self.spawn,
            hitpoints: 10,
            max_hitpoints: 10,
        })
    }
}
