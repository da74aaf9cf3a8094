//! World events.
//!
//! Every state change the simulation makes that somebody may need to hear
//! about is recorded as a typed [`WorldEvent`] in emission order. The event
//! dispatcher drains the queue after each tick and turns events into packets
//! and hook calls; nothing in the simulation talks to a connection directly.
//!
//! Events carry what the dispatcher needs at emission time (snapshots,
//! observer lists) because the entity may be gone by the time it is drained.

use std::collections::VecDeque;

use crate::{
    entity::{EntityKind, Instance, RegionId},
    packet::EntitySnapshot,
    position::Position,
};

/// Resource a player-initiated attack could not pay for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Mana,
    Arrows,
}

/// How a hit was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    /// A regular attack. May trigger retaliation, poison and thorns.
    Attack,
    /// Reflected by a thorns chestplate. Never reflects again.
    Thorns,
    /// Poison ticking down.
    Poison,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// `observer` starts seeing `entity`.
    Sighted {
        observer: Instance,
        entity: EntitySnapshot,
    },
    /// `observer` stops seeing `entity`. `regions` lists the regions left
    /// behind when the loss comes from a player walking away.
    Lost {
        observer: Instance,
        entity: Instance,
        regions: Vec<RegionId>,
    },
    /// Entity changed tile; `observers` saw it before and after.
    Moved {
        instance: Instance,
        kind: EntityKind,
        position: Position,
        observers: Vec<Instance>,
    },
    /// Entity was placed somewhere without walking.
    Teleported {
        instance: Instance,
        position: Position,
        observers: Vec<Instance>,
    },
    /// A player's region changed (or they just joined).
    RegionChanged { player: Instance, region: RegionId },
    /// A player-initiated attack paid its cost and went through.
    Attacked { attacker: Instance, target: Instance },
    /// A player-initiated attack was skipped.
    ResourceShortage { attacker: Instance, resource: Resource },
    Damaged {
        target: Instance,
        attacker: Option<Instance>,
        amount: u32,
        kind: HitKind,
        observers: Vec<Instance>,
    },
    /// Hit points or mana of a player changed.
    PointsChanged {
        instance: Instance,
        hit_points: u32,
        max_hit_points: u32,
        mana: u32,
        max_mana: u32,
    },
    Poisoned { instance: Instance },
    PoisonWornOff { instance: Instance },
    /// A mob engaged a player on its own.
    Aggro { mob: Instance, player: Instance },
    Died {
        instance: Instance,
        kind: EntityKind,
        killer: Option<Instance>,
    },
    /// `killer` landed the killing blow.
    Killed {
        killer: Instance,
        victim: Instance,
        victim_key: String,
        victim_kind: EntityKind,
    },
    /// Share of a mob kill for one entry of its damage table.
    KillCredit {
        player: Instance,
        mob_key: String,
        damage: u32,
        experience: u32,
    },
    /// Pet was told to walk after its owner.
    Follow {
        instance: Instance,
        target: Instance,
        observers: Vec<Instance>,
    },
}

/// Ordered queue of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<WorldEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: WorldEvent) {
        self.queue.push_back(event);
    }

    pub fn pop(&mut self) -> Option<WorldEvent> {
        self.queue.pop_front()
    }

    /// Drains all queued events in emission order.
    pub fn drain(&mut self) -> Vec<WorldEvent> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldEvent> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_emission_order() {
        let mut q = EventQueue::default();
        q.push(WorldEvent::Poisoned { instance: Instance(1) });
        q.push(WorldEvent::PoisonWornOff { instance: Instance(1) });
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(WorldEvent::Poisoned { instance: Instance(1) }));
        assert_eq!(q.drain(), vec![WorldEvent::PoisonWornOff { instance: Instance(1) }]);
        assert!(q.is_empty());
    }
}
