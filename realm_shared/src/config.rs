//! Configuration system.
//!
//! Loads world and server configuration from JSON strings (file IO left to
//! the app). Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};

/// Simulation tuning shared by the world and the tick scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Length of one tick in milliseconds.
    pub tick_ms: u64,
    /// Aggro sweep runs every `aggro_interval` ticks.
    pub aggro_interval: u64,
    /// HP/mana regeneration runs every `regen_interval` ticks.
    pub regen_interval: u64,
    /// Loiter and cheat-score decay run every `housekeeping_interval` ticks.
    pub housekeeping_interval: u64,

    /// Region width in tiles.
    pub region_width: i32,
    /// Region height in tiles.
    pub region_height: i32,
    /// Number of regions around the current one a player subscribes to.
    pub visibility_radius: i32,

    /// Chance (0..=100) that a thorns chestplate reflects a hit.
    pub thorns_chance_percent: u32,
    /// Reflected share of the damage per thorns level, in percent.
    pub thorns_percent_per_level: u32,
    /// Chance (0..=100) that a poisonous attacker poisons on a hit.
    pub poison_chance_percent: u32,

    /// Cheat score above which the player is relocated and disconnected.
    pub cheat_score_ceiling: u32,

    /// Pet is told to follow once farther than this.
    pub pet_follow_distance: i32,
    /// Pet is despawned and respawned next to its owner once farther than this.
    pub pet_resync_distance: i32,

    /// Hit points restored per regeneration pass, out of combat.
    pub hp_regen: u32,
    /// Mana restored per regeneration pass.
    pub mana_regen: u32,

    /// Seed for thorns/poison/damage rolls.
    pub rng_seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_ms: 600,
            aggro_interval: 4,
            regen_interval: 16,
            housekeeping_interval: 32,
            region_width: 16,
            region_height: 12,
            visibility_radius: 1,
            thorns_chance_percent: 40,
            thorns_percent_per_level: 10,
            poison_chance_percent: 15,
            cheat_score_ceiling: 15,
            pet_follow_distance: 2,
            pet_resync_distance: 10,
            hp_regen: 2,
            mana_regen: 1,
            rng_seed: 0x5eed,
        }
    }
}

impl WorldConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Root configuration for the server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:9001`.
    pub server_addr: String,
    /// Path to the JSON map description. `None` starts on a generated open field.
    #[serde(default)]
    pub map_path: Option<String>,
    #[serde(default)]
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9001".to_string(),
            map_path: None,
            world: WorldConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
