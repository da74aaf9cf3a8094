//! Collaborator hooks.
//!
//! Quests, achievements, inventory, skills and persistence live outside the
//! simulation. The world only asks them simple questions and invokes named
//! triggers; it never looks at how they are implemented.

use crate::{
    entity::{EntityKind, Instance},
    map::Door,
    position::Position,
};

/// What a trigger wants the dispatcher to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Not interested; carry on with the default behaviour.
    Continue,
    /// The trigger took care of everything; stop here.
    Handled,
    /// Move the player.
    Teleport(Position),
    /// Tell the player something and stop.
    Notify(String),
}

/// Everything the dispatcher needs from outside the simulation.
///
/// All methods have permissive defaults so implementors only override what
/// they care about.
pub trait GameHooks: Send {
    /// Quest door trigger for doors that carry a quest.
    fn door(&mut self, _player: Instance, _door: &Door) -> TriggerOutcome {
        TriggerOutcome::Continue
    }

    /// Quest/achievement talk trigger.
    fn talk(&mut self, _player: Instance, _npc: Instance, _npc_key: &str) -> TriggerOutcome {
        TriggerOutcome::Continue
    }

    /// Quest/achievement kill trigger.
    fn kill(&mut self, _killer: Instance, _victim_key: &str, _victim_kind: EntityKind) -> TriggerOutcome {
        TriggerOutcome::Continue
    }

    /// Experience for one damage table entry of a killed mob.
    fn kill_credit(&mut self, _player: Instance, _mob_key: &str, _damage: u32, _experience: u32) {}

    /// Persist the player. Fire-and-forget.
    fn save(&mut self, _player: Instance) {}

    fn skill_level(&self, _player: Instance, _skill: &str) -> u32 {
        1
    }

    fn quest_finished(&self, _player: Instance, _quest: &str) -> bool {
        false
    }

    fn achievement_finished(&self, _player: Instance, _achievement: &str) -> bool {
        false
    }

    fn finish_achievement(&mut self, _player: Instance, _achievement: &str) {}

    fn has_item(&self, _player: Instance, _key: &str, _count: u32) -> bool {
        false
    }

    fn remove_item(&mut self, _player: Instance, _key: &str, _count: u32) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default)]
pub struct NullHooks;

impl GameHooks for NullHooks {}
