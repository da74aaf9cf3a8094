//! Client intents.
//!
//! Network tasks decode intents and push them onto the tick queue; they are
//! only applied inside the tick, against the world state of that moment.

use serde::{Deserialize, Serialize};

use crate::entity::Instance;

/// Coordinates beyond this are junk regardless of the map.
const MAX_COORDINATE: i32 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Step to a tile.
    Move { x: i32, y: i32 },
    /// Start attacking a character.
    Attack { target: Instance },
    /// Stop attacking.
    Stop,
    /// Talk to an npc.
    Talk { npc: Instance },
    /// Walk through a door.
    Door { door: u32 },
}

impl Intent {
    /// Cheap shape check done on receipt, before queueing.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Intent::Move { x, y } => x.abs() <= MAX_COORDINATE && y.abs() <= MAX_COORDINATE,
            _ => true,
        }
    }
}

/// An intent tagged with the player it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedIntent {
    pub player: Instance,
    pub intent: Intent,
}
