//! Map description.
//!
//! A map is loaded once from JSON: dimensions, colliding tiles, the player
//! spawn point, doors, lights and the mobs and npcs placed on it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    entity::{AttackStyle, PoisonSpec},
    position::Position,
    region::Light,
};

/// A tile that teleports players who walk through it, subject to requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Door {
    pub id: u32,
    /// Tile the door sits on.
    pub position: Position,
    pub destination: Position,
    /// Minimum level; checked against `skill` when set, combat level otherwise.
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub skill: Option<String>,
    /// Quest whose door trigger decides what happens.
    #[serde(default)]
    pub quest: Option<String>,
    /// Achievement finished by passing through.
    #[serde(default)]
    pub achievement: Option<String>,
    #[serde(default)]
    pub req_quest: Option<String>,
    #[serde(default)]
    pub req_achievement: Option<String>,
    /// Key item consumed on passing.
    #[serde(default)]
    pub req_item: Option<String>,
    #[serde(default)]
    pub req_item_count: Option<u32>,
}

impl Door {
    pub fn new(id: u32, position: Position, destination: Position) -> Self {
        Self {
            id,
            position,
            destination,
            level: None,
            skill: None,
            quest: None,
            achievement: None,
            req_quest: None,
            req_achievement: None,
            req_item: None,
            req_item_count: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobSpawn {
    pub key: String,
    pub position: Position,
    pub hit_points: u32,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub attack: u32,
    #[serde(default)]
    pub defense: u32,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default = "default_aggro_range")]
    pub aggro_range: i32,
    #[serde(default = "default_attack_interval")]
    pub attack_interval: u64,
    #[serde(default)]
    pub style: AttackStyle,
    #[serde(default)]
    pub experience: u32,
    #[serde(default)]
    pub poison: Option<PoisonSpec>,
}

fn default_level() -> u32 {
    1
}

fn default_aggro_range() -> i32 {
    2
}

fn default_attack_interval() -> u64 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NpcRoleDef {
    Talker { lines: Vec<String> },
    Banker,
    Enchanter,
    Store { store: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcSpawn {
    pub key: String,
    pub position: Position,
    pub role: NpcRoleDef,
}

/// Static map content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapData {
    pub width: i32,
    pub height: i32,
    pub spawn: Position,
    #[serde(default)]
    pub collisions: Vec<Position>,
    #[serde(default)]
    pub doors: Vec<Door>,
    #[serde(default)]
    pub lights: Vec<Light>,
    #[serde(default)]
    pub mobs: Vec<MobSpawn>,
    #[serde(default)]
    pub npcs: Vec<NpcSpawn>,
}

/// Map content that cannot be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    EmptyMap,
    SpawnOutOfBounds(Position),
    SpawnBlocked(Position),
    DoorOutOfBounds(u32),
    PlacementOutOfBounds(String),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::EmptyMap => write!(f, "map has no tiles"),
            MapError::SpawnOutOfBounds(p) => write!(f, "spawn {p:?} is outside the map"),
            MapError::SpawnBlocked(p) => write!(f, "spawn {p:?} is a colliding tile"),
            MapError::DoorOutOfBounds(id) => write!(f, "door {id} leads outside the map"),
            MapError::PlacementOutOfBounds(key) => write!(f, "{key} is placed outside the map"),
        }
    }
}

impl std::error::Error for MapError {}

impl MapData {
    /// Parses a map from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// An empty walkable field, spawning in the middle.
    pub fn open_field(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            spawn: Position::new(width / 2, height / 2),
            collisions: Vec::new(),
            doors: Vec::new(),
            lights: Vec::new(),
            mobs: Vec::new(),
            npcs: Vec::new(),
        }
    }

    fn in_bounds(&self, p: Position) -> bool {
        p.x >= 0 && p.y >= 0 && p.x < self.width && p.y < self.height
    }

    /// Rejects maps that would put something outside the grid.
    pub fn validate(&self) -> Result<(), MapError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(MapError::EmptyMap);
        }
        if !self.in_bounds(self.spawn) {
            return Err(MapError::SpawnOutOfBounds(self.spawn));
        }
        if self.collisions.contains(&self.spawn) {
            return Err(MapError::SpawnBlocked(self.spawn));
        }
        if let Some(door) = self
            .doors
            .iter()
            .find(|d| !self.in_bounds(d.position) || !self.in_bounds(d.destination))
        {
            return Err(MapError::DoorOutOfBounds(door.id));
        }
        let placements = self
            .mobs
            .iter()
            .map(|m| (&m.key, m.position))
            .chain(self.npcs.iter().map(|n| (&n.key, n.position)));
        for (key, pos) in placements {
            if !self.in_bounds(pos) {
                return Err(MapError::PlacementOutOfBounds(key.clone()));
            }
        }
        if let Some(light) = self.lights.iter().find(|l| !self.in_bounds(l.position)) {
            return Err(MapError::PlacementOutOfBounds(format!("light {}", light.id)));
        }
        Ok(())
    }
}
