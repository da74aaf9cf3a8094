//! Outbound packet records.
//!
//! These are abstract: they describe what a client should learn, not how it
//! is encoded. Encoding belongs to the transport (see `net`). The core only
//! ever hands packets to a [`PacketSink`].

use serde::{Deserialize, Serialize};

use crate::{
    entity::{Entity, EntityKind, Instance, RegionId},
    position::Position,
    region::Light,
};

/// What a client needs to render an entity it just started seeing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub instance: Instance,
    pub key: String,
    pub kind: EntityKind,
    pub position: Position,
    pub hit_points: Option<u32>,
    pub max_hit_points: Option<u32>,
}

impl From<&Entity> for EntitySnapshot {
    fn from(e: &Entity) -> Self {
        Self {
            instance: e.instance,
            key: e.key.clone(),
            kind: e.kind,
            position: e.position,
            hit_points: e.character.as_ref().map(|c| c.hit_points),
            max_hit_points: e.character.as_ref().map(|c| c.max_hit_points),
        }
    }
}

/// NPC interaction outcome shown by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NpcAction {
    Talk { text: String },
    Bank,
    Enchant,
    Store { store: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Sent once on join.
    Welcome { instance: Instance, position: Position },
    Spawn(EntitySnapshot),
    Despawn {
        instance: Instance,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regions: Option<Vec<RegionId>>,
    },
    Movement { instance: Instance, position: Position },
    Follow { instance: Instance, target: Instance },
    Teleport { instance: Instance, position: Position },
    Damage {
        instance: Instance,
        attacker: Option<Instance>,
        amount: u32,
        thorns: bool,
    },
    Death { instance: Instance },
    Points {
        instance: Instance,
        hit_points: u32,
        max_hit_points: u32,
        mana: u32,
        max_mana: u32,
    },
    Poison { active: bool },
    /// Lamp overlay for one light.
    Overlay { light: Light },
    Notify { message: String },
    Npc { instance: Instance, action: NpcAction },
}

/// The "send" capability the simulation is given.
///
/// Sends are fire-and-forget: the sink queues or drops, it never blocks the
/// tick and never reports failure back.
pub trait PacketSink {
    fn send(&mut self, to: Instance, packet: Packet);

    /// Terminates the player's connection after flushing what was queued.
    fn disconnect(&mut self, to: Instance, reason: &str);
}

/// Buffers packets for one tick; the server flushes it to connections.
#[derive(Debug, Default)]
pub struct Outbox {
    pub packets: Vec<(Instance, Packet)>,
    pub disconnects: Vec<(Instance, String)>,
}

impl Outbox {
    /// Packets addressed to `player`, in send order.
    pub fn to(&self, player: Instance) -> Vec<&Packet> {
        self.packets
            .iter()
            .filter(|(to, _)| *to == player)
            .map(|(_, p)| p)
            .collect()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.disconnects.clear();
    }

    pub fn take(&mut self) -> (Vec<(Instance, Packet)>, Vec<(Instance, String)>) {
        (
            std::mem::take(&mut self.packets),
            std::mem::take(&mut self.disconnects),
        )
    }
}

impl PacketSink for Outbox {
    fn send(&mut self, to: Instance, packet: Packet) {
        self.packets.push((to, packet));
    }

    fn disconnect(&mut self, to: Instance, reason: &str) {
        self.disconnects.push((to, reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Character;

    #[test]
    fn snapshot_carries_character_points() {
        let e = Entity::new(Instance(3), "rat", EntityKind::Mob, Position::new(4, 5))
            .with_character(Character::new(30));
        let snap = EntitySnapshot::from(&e);
        assert_eq!(snap.hit_points, Some(30));
        assert_eq!(snap.position, Position::new(4, 5));
    }

    #[test]
    fn outbox_filters_by_recipient() {
        let mut out = Outbox::default();
        out.send(Instance(1), Packet::Death { instance: Instance(1) });
        out.send(Instance(2), Packet::Poison { active: true });
        out.disconnect(Instance(2), "cheating");

        assert_eq!(out.to(Instance(2)), vec![&Packet::Poison { active: true }]);
        let (packets, disconnects) = out.take();
        assert_eq!(packets.len(), 2);
        assert_eq!(disconnects, vec![(Instance(2), "cheating".to_string())]);
        assert!(out.packets.is_empty());
    }
}
