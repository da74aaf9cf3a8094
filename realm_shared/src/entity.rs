//! Entities, characters and the central registry.
//!
//! The registry is the single owner of every live entity. Relations between
//! characters (target, attackers, damage table, pet owner) are stored as
//! [`Instance`] ids and resolved through the registry on use, so removing an
//! entity is one map removal rather than a graph walk.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Unique per-spawn entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instance(pub u64);

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a region in the region manager.
pub type RegionId = usize;

/// What an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Mob,
    Npc,
    Item,
    Projectile,
    Pet,
}

impl EntityKind {
    /// Kinds whose tile cannot be walked onto.
    pub fn blocks_movement(self) -> bool {
        matches!(self, EntityKind::Npc)
    }
}

bitflags! {
    /// Standing status effects. Cleared on death.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u8 {
        /// Hidden from mob aggro.
        const INVISIBLE = 1 << 0;
        /// Movement intents are refused.
        const FROZEN = 1 << 1;
    }
}

/// How a character attacks. Determines which resource an attack consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttackStyle {
    #[default]
    Melee,
    Archery,
    Magic,
}

/// The slice of equipment combat cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Equipment {
    pub style: AttackStyle,
    /// Weapon attack power fed to the damage model.
    pub attack: u32,
    /// Armour defense fed to the damage model.
    pub defense: u32,
    /// Mana consumed per magic attack.
    pub mana_cost: u32,
    /// Arrows left for archery.
    pub arrows: u32,
    /// Thorns enchantment level on the chestplate, 0 when absent.
    pub thorns_level: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mana {
    pub current: u32,
    pub max: u32,
}

impl Mana {
    pub fn new(max: u32) -> Self {
        Self { current: max, max }
    }
}

/// Poison a character inflicts on hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoisonSpec {
    /// Damage per application.
    pub damage: u32,
    /// Ticks between applications.
    pub rate: u32,
    /// Total ticks before it wears off.
    pub duration: u32,
}

/// Active poison on a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poison {
    pub spec: PoisonSpec,
    pub source: Option<Instance>,
    pub elapsed: u32,
}

/// Per-life kill statistics.
#[derive(Debug, Clone, Default)]
pub struct KillStats {
    pub pvp_kills: u32,
    pub pvp_deaths: u32,
    pub mob_kills: BTreeMap<String, u32>,
}

/// Fighting state shared by players, mobs and npcs.
#[derive(Debug, Clone)]
pub struct Character {
    pub hit_points: u32,
    pub max_hit_points: u32,
    pub level: u32,
    pub dead: bool,

    /// Who this character is engaging.
    pub target: Option<Instance>,
    /// Characters that have hit this one during the current life.
    pub attackers: BTreeSet<Instance>,
    /// Attacker -> accumulated damage for the current life.
    pub damage_table: BTreeMap<Instance, u32>,

    /// Ticks between two attack resolutions.
    pub attack_interval: u64,
    /// Reach in tiles.
    pub attack_range: i32,
    pub equipment: Equipment,
    pub mana: Mana,

    pub status: Status,
    pub poison: Option<Poison>,
    pub inflicts_poison: Option<PoisonSpec>,

    /// Mobs: engage players on sight.
    pub aggressive: bool,
    pub aggro_range: i32,
    /// Mobs: how far they may stray from `spawn` before walking back.
    pub roam_distance: i32,
    pub spawn: Position,
    /// Mobs: experience shared between everyone in the damage table.
    pub experience: u32,

    pub stats: KillStats,
}

impl Character {
    pub fn new(max_hit_points: u32) -> Self {
        Self {
            hit_points: max_hit_points,
            max_hit_points,
            level: 1,
            dead: false,
            target: None,
            attackers: BTreeSet::new(),
            damage_table: BTreeMap::new(),
            attack_interval: 2,
            attack_range: 1,
            equipment: Equipment::default(),
            mana: Mana::default(),
            status: Status::empty(),
            poison: None,
            inflicts_poison: None,
            aggressive: false,
            aggro_range: 2,
            roam_distance: 6,
            spawn: Position::default(),
            experience: 0,
            stats: KillStats::default(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead || self.hit_points == 0
    }

    /// Applies `damage`, clamped to the remaining hit points, and records it
    /// against `attacker`. Returns the damage actually applied.
    pub fn take_damage(&mut self, attacker: Option<Instance>, damage: u32) -> u32 {
        let applied = damage.min(self.hit_points);
        self.hit_points -= applied;

        if let Some(attacker) = attacker {
            self.attackers.insert(attacker);
            *self.damage_table.entry(attacker).or_insert(0) += applied;
        }

        applied
    }

    pub fn heal(&mut self, amount: u32) {
        self.hit_points = (self.hit_points + amount).min(self.max_hit_points);
    }

    /// Restores full health and forgets who dealt damage.
    pub fn reset(&mut self) {
        self.hit_points = self.max_hit_points;
        self.damage_table.clear();
        self.attackers.clear();
    }

    /// Whether a player-initiated attack can pay for itself.
    pub fn has_mana_for_attack(&self) -> bool {
        self.mana.current >= self.equipment.mana_cost
    }
}

/// Non-player character behaviour when talked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NpcRole {
    /// Cycles through lines of dialogue.
    Talker(Vec<String>),
    Banker,
    Enchanter,
    Store(String),
}

/// Anything that exists in the world.
#[derive(Debug, Clone)]
pub struct Entity {
    pub instance: Instance,
    /// Template id.
    pub key: String,
    pub kind: EntityKind,
    pub position: Position,
    /// Region the entity is currently registered in.
    pub region: RegionId,
    pub character: Option<Character>,
    pub role: Option<NpcRole>,
    /// Pets: the player they belong to.
    pub owner: Option<Instance>,
    /// Entity this one walks towards each tick.
    pub follow: Option<Instance>,
}

impl Entity {
    pub fn new(instance: Instance, key: &str, kind: EntityKind, position: Position) -> Self {
        Self {
            instance,
            key: key.to_string(),
            kind,
            position,
            region: 0,
            character: None,
            role: None,
            owner: None,
            follow: None,
        }
    }

    pub fn with_character(mut self, character: Character) -> Self {
        self.character = Some(character);
        self
    }

    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::Player
    }

    pub fn is_mob(&self) -> bool {
        self.kind == EntityKind::Mob
    }

    /// Dead characters are hidden from other players until they respawn.
    pub fn is_visible(&self) -> bool {
        self.character.as_ref().map_or(true, |c| !c.is_dead())
    }
}

/// Arena of live entities keyed by instance, iterated in id order.
#[derive(Debug, Default)]
pub struct Registry {
    next_id: u64,
    entities: BTreeMap<Instance, Entity>,
}

impl Registry {
    /// Reserves a fresh instance id.
    pub fn allocate(&mut self) -> Instance {
        self.next_id += 1;
        Instance(self.next_id)
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.instance, entity);
    }

    pub fn remove(&mut self, instance: Instance) -> Option<Entity> {
        self.entities.remove(&instance)
    }

    pub fn contains(&self, instance: Instance) -> bool {
        self.entities.contains_key(&instance)
    }

    pub fn get(&self, instance: Instance) -> Option<&Entity> {
        self.entities.get(&instance)
    }

    pub fn get_mut(&mut self, instance: Instance) -> Option<&mut Entity> {
        self.entities.get_mut(&instance)
    }

    pub fn character(&self, instance: Instance) -> Option<&Character> {
        self.get(instance).and_then(|e| e.character.as_ref())
    }

    pub fn character_mut(&mut self, instance: Instance) -> Option<&mut Character> {
        self.get_mut(instance).and_then(|e| e.character.as_mut())
    }

    /// Live (not dead) character.
    pub fn living(&self, instance: Instance) -> Option<&Character> {
        self.character(instance).filter(|c| !c.is_dead())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Instances of a given kind, in id order.
    pub fn instances_of(&self, kind: EntityKind) -> Vec<Instance> {
        self.entities
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.instance)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_accumulates_per_attacker_and_clamps() {
        let mut c = Character::new(100);
        let a = Instance(7);

        assert_eq!(c.take_damage(Some(a), 40), 40);
        assert_eq!(c.take_damage(Some(a), 40), 40);
        assert_eq!(c.take_damage(Some(a), 30), 20);

        assert_eq!(c.hit_points, 0);
        assert!(c.is_dead());
        assert_eq!(c.damage_table.len(), 1);
        assert_eq!(c.damage_table[&a], 100);
        assert!(c.attackers.contains(&a));
    }

    #[test]
    fn reset_clears_damage_table() {
        let mut c = Character::new(50);
        c.take_damage(Some(Instance(1)), 10);
        c.reset();
        assert_eq!(c.hit_points, 50);
        assert!(c.damage_table.is_empty());
        assert!(c.attackers.is_empty());
    }

    #[test]
    fn registry_allocates_unique_ids_in_order() {
        let mut reg = Registry::default();
        let a = reg.allocate();
        let b = reg.allocate();
        assert_ne!(a, b);

        reg.insert(Entity::new(b, "rat", EntityKind::Mob, Position::new(1, 1)));
        reg.insert(Entity::new(a, "tree", EntityKind::Npc, Position::new(0, 0)));

        let order: Vec<_> = reg.iter().map(|e| e.instance).collect();
        assert_eq!(order, vec![a, b]);
        assert_eq!(reg.instances_of(EntityKind::Mob), vec![b]);
    }

    #[test]
    fn dead_characters_are_not_visible() {
        let mut e = Entity::new(Instance(1), "p", EntityKind::Player, Position::default())
            .with_character(Character::new(10));
        assert!(e.is_visible());
        e.character.as_mut().unwrap().take_damage(None, 10);
        assert!(!e.is_visible());

        let item = Entity::new(Instance(2), "coin", EntityKind::Item, Position::default());
        assert!(item.is_visible());
    }
}
