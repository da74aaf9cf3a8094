//! World state.
//!
//! The world owns the registry, the grid, the region manager and the combat
//! sessions, and is only ever mutated from the tick's synchronous phase.
//! Every mutating entry point validates first and mutates second, so a
//! rejected intent leaves no trace.
//!
//! Visibility is expressed purely through [`WorldEvent::Sighted`] and
//! [`WorldEvent::Lost`]: one `Sighted` each time an entity's region enters a
//! player's neighborhood (or the entity appears inside it), one `Lost` each
//! time it leaves (or the entity disappears). Dead characters count as gone.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use crate::{
    combat::CombatState,
    config::WorldConfig,
    entity::{Character, Entity, EntityKind, Instance, Mana, NpcRole, Registry, Status},
    event::{EventQueue, WorldEvent},
    grid::Grid,
    map::{Door, MapData, MapError, MobSpawn, NpcRoleDef, NpcSpawn},
    packet::EntitySnapshot,
    position::Position,
    region::{InvariantViolation, RegionManager},
};

/// Why a movement or placement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    UnknownEntity,
    Dead,
    Frozen,
    OutOfBounds,
    /// Not an adjacent tile.
    TooFar,
    /// Tile collides.
    Blocked,
}

impl MoveError {
    /// Errors an honest client does not produce.
    pub fn is_suspicious(self) -> bool {
        matches!(self, MoveError::TooFar | MoveError::Blocked)
    }
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::UnknownEntity => write!(f, "unknown entity"),
            MoveError::Dead => write!(f, "entity is dead"),
            MoveError::Frozen => write!(f, "entity is frozen"),
            MoveError::OutOfBounds => write!(f, "position is outside the map"),
            MoveError::TooFar => write!(f, "position is not adjacent"),
            MoveError::Blocked => write!(f, "position is blocked"),
        }
    }
}

impl std::error::Error for MoveError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Travel {
    Step,
    Teleport,
}

pub struct World {
    pub config: WorldConfig,
    pub grid: Grid,
    pub regions: RegionManager,
    pub entities: Registry,
    pub combat: CombatState,
    pub events: EventQueue,
    pub doors: BTreeMap<u32, Door>,
    spawn_point: Position,
    tick: u64,
}

impl World {
    /// Builds the world for a map and places its mobs and npcs.
    pub fn new(config: WorldConfig, map: &MapData) -> Result<Self, MapError> {
        map.validate()?;

        let mut regions = RegionManager::new(
            map.width,
            map.height,
            config.region_width,
            config.region_height,
            config.visibility_radius,
        );
        for light in &map.lights {
            regions.add_light(light.clone());
        }

        let combat = CombatState::new(config.rng_seed);
        let mut world = Self {
            grid: Grid::with_collisions(map.width, map.height, &map.collisions),
            regions,
            entities: Registry::default(),
            combat,
            events: EventQueue::default(),
            doors: map.doors.iter().map(|d| (d.id, d.clone())).collect(),
            spawn_point: map.spawn,
            tick: 0,
            config,
        };

        for mob in &map.mobs {
            world
                .spawn_mob(mob)
                .map_err(|_| MapError::PlacementOutOfBounds(mob.key.clone()))?;
        }
        for npc in &map.npcs {
            world
                .spawn_npc(npc)
                .map_err(|_| MapError::PlacementOutOfBounds(npc.key.clone()))?;
        }

        info!(
            width = map.width,
            height = map.height,
            regions = world.regions.len(),
            entities = world.entities.len(),
            "World loaded"
        );
        Ok(world)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Sets the tick number the following phases run under.
    pub fn begin_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn spawn_point(&self) -> Position {
        self.spawn_point
    }

    /// Checks the exactly-one-region invariant for every entity.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        self.regions.verify(&self.entities)
    }

    /// Players that currently see `instance`, not counting itself.
    pub fn observers_of(&self, instance: Instance) -> Vec<Instance> {
        self.entities
            .get(instance)
            .map(|e| self.regions.observers(e.region, instance))
            .unwrap_or_default()
    }

    /// Whether `entity` is in `observer`'s neighborhood and visible.
    pub fn can_see(&self, observer: Instance, entity: Instance) -> bool {
        self.entities.get(entity).map_or(false, |e| {
            e.is_visible()
                && self
                    .regions
                    .get(e.region)
                    .map_or(false, |r| r.players.contains(&observer))
        })
    }

    fn snapshot(&self, instance: Instance) -> Option<EntitySnapshot> {
        self.entities
            .get(instance)
            .filter(|e| e.is_visible())
            .map(EntitySnapshot::from)
    }

    /// Places a new entity. Its instance must come from `entities.allocate()`.
    pub fn spawn(&mut self, mut entity: Entity) -> Result<Instance, MoveError> {
        let pos = entity.position;
        if self.grid.is_out_of_bounds(pos.x, pos.y) {
            return Err(MoveError::OutOfBounds);
        }

        let instance = entity.instance;
        self.grid
            .add_entity(instance, pos, entity.kind.blocks_movement());
        let (region, subscription) = self.regions.add(&mut entity);
        let visible = entity.is_visible();
        let snapshot = EntitySnapshot::from(&entity);
        self.entities.insert(entity);

        if visible {
            for observer in self.regions.observers(region, instance) {
                self.events.push(WorldEvent::Sighted {
                    observer,
                    entity: snapshot.clone(),
                });
            }
        }

        if let Some(diff) = subscription {
            for other in diff.spawned {
                if let Some(entity) = self.snapshot(other) {
                    self.events.push(WorldEvent::Sighted {
                        observer: instance,
                        entity,
                    });
                }
            }
            self.events
                .push(WorldEvent::RegionChanged { player: instance, region });
        }

        debug!(%instance, kind = ?snapshot.kind, key = %snapshot.key, x = pos.x, y = pos.y, "Spawned");
        Ok(instance)
    }

    pub fn spawn_player(
        &mut self,
        key: &str,
        position: Position,
        mut character: Character,
    ) -> Result<Instance, MoveError> {
        let instance = self.entities.allocate();
        character.spawn = position;
        self.spawn(
            Entity::new(instance, key, EntityKind::Player, position).with_character(character),
        )
    }

    pub fn spawn_mob(&mut self, def: &MobSpawn) -> Result<Instance, MoveError> {
        let mut c = Character::new(def.hit_points);
        c.level = def.level;
        c.equipment.attack = def.attack;
        c.equipment.defense = def.defense;
        c.equipment.style = def.style;
        c.aggressive = def.aggressive;
        c.aggro_range = def.aggro_range;
        c.attack_interval = def.attack_interval.max(1);
        c.experience = def.experience;
        c.inflicts_poison = def.poison;
        c.spawn = def.position;

        let instance = self.entities.allocate();
        self.spawn(Entity::new(instance, &def.key, EntityKind::Mob, def.position).with_character(c))
    }

    pub fn spawn_npc(&mut self, def: &NpcSpawn) -> Result<Instance, MoveError> {
        let role = match &def.role {
            NpcRoleDef::Talker { lines } => NpcRole::Talker(lines.clone()),
            NpcRoleDef::Banker => NpcRole::Banker,
            NpcRoleDef::Enchanter => NpcRole::Enchanter,
            NpcRoleDef::Store { store } => NpcRole::Store(store.clone()),
        };
        let mut c = Character::new(1);
        c.spawn = def.position;

        let instance = self.entities.allocate();
        let mut npc = Entity::new(instance, &def.key, EntityKind::Npc, def.position).with_character(c);
        npc.role = Some(role);
        self.spawn(npc)
    }

    /// Spawns a pet next to its owner and has it follow them.
    pub fn spawn_pet(&mut self, owner: Instance, key: &str) -> Option<Instance> {
        let position = self.entities.get(owner)?.position;
        let instance = self.entities.allocate();
        let mut pet = Entity::new(instance, key, EntityKind::Pet, position);
        pet.owner = Some(owner);
        pet.follow = Some(owner);
        self.spawn(pet).ok()
    }

    /// Pets owned by `owner`.
    pub fn pets_of(&self, owner: Instance) -> Vec<Instance> {
        self.entities
            .iter()
            .filter(|e| e.kind == EntityKind::Pet && e.owner == Some(owner))
            .map(|e| e.instance)
            .collect()
    }

    /// Removes an entity, telling everyone who saw it and cutting every
    /// combat relation that points at it.
    pub fn despawn(&mut self, instance: Instance) -> Option<Entity> {
        if !self.entities.contains(instance) {
            return None;
        }
        self.announce_removal(instance);
        self.remove_silently(instance)
    }

    /// Emits `Lost` to every observer of a still-visible entity.
    pub(crate) fn announce_removal(&mut self, instance: Instance) {
        if self.snapshot(instance).is_some() {
            self.announce_lost(instance);
        }
    }

    /// Emits `Lost` to every observer, visible or not.
    pub(crate) fn announce_lost(&mut self, instance: Instance) {
        for observer in self.observers_of(instance) {
            self.events.push(WorldEvent::Lost {
                observer,
                entity: instance,
                regions: Vec::new(),
            });
        }
    }

    /// Removes an entity without visibility events.
    pub(crate) fn remove_silently(&mut self, instance: Instance) -> Option<Entity> {
        self.disengage(instance);

        for pet in self.pets_of(instance) {
            self.despawn(pet);
        }
        for follower in self.entities.iter_mut() {
            if follower.follow == Some(instance) {
                follower.follow = None;
            }
        }

        let entity = self.entities.remove(instance)?;
        self.grid.remove_entity(instance, entity.position);
        self.regions.remove(&entity);
        debug!(%instance, key = %entity.key, "Despawned");
        Some(entity)
    }

    /// Walks an entity one tile.
    pub fn move_entity(&mut self, instance: Instance, to: Position) -> Result<(), MoveError> {
        let entity = self.entities.get(instance).ok_or(MoveError::UnknownEntity)?;
        if let Some(c) = &entity.character {
            if c.is_dead() {
                return Err(MoveError::Dead);
            }
            if c.status.contains(Status::FROZEN) {
                return Err(MoveError::Frozen);
            }
        }
        if self.grid.is_out_of_bounds(to.x, to.y) {
            return Err(MoveError::OutOfBounds);
        }
        if entity.position == to {
            return Ok(());
        }
        if !entity.position.is_adjacent(to) {
            return Err(MoveError::TooFar);
        }
        if self.grid.is_colliding(to.x, to.y) {
            return Err(MoveError::Blocked);
        }

        self.relocate(instance, to, Travel::Step);
        Ok(())
    }

    /// Places an entity on any walkable tile.
    pub fn teleport(&mut self, instance: Instance, to: Position) -> Result<(), MoveError> {
        if !self.entities.contains(instance) {
            return Err(MoveError::UnknownEntity);
        }
        if self.grid.is_out_of_bounds(to.x, to.y) {
            return Err(MoveError::OutOfBounds);
        }
        if self.grid.is_colliding(to.x, to.y) {
            return Err(MoveError::Blocked);
        }

        self.relocate(instance, to, Travel::Teleport);
        Ok(())
    }

    fn relocate(&mut self, instance: Instance, to: Position, travel: Travel) {
        let Some(entity) = self.entities.get_mut(instance) else {
            return;
        };
        let from = entity.position;
        self.grid.move_entity(instance, from, to);
        entity.position = to;
        let change = self.regions.handle(entity);

        let kind = entity.kind;
        let is_player = entity.is_player();
        let visible = entity.is_visible();
        let region = entity.region;
        let snapshot = EntitySnapshot::from(&*entity);

        let mut gained = Vec::new();
        if let Some(change) = change {
            if visible {
                for observer in &change.observers_gained {
                    self.events.push(WorldEvent::Sighted {
                        observer: *observer,
                        entity: snapshot.clone(),
                    });
                }
                let regions = if is_player {
                    change.regions_left.clone()
                } else {
                    Vec::new()
                };
                for observer in change.observers_lost {
                    self.events.push(WorldEvent::Lost {
                        observer,
                        entity: instance,
                        regions: regions.clone(),
                    });
                }
            }
            gained = change.observers_gained;

            if let Some(diff) = change.subscription {
                for other in diff.despawned {
                    if self.snapshot(other).is_some() {
                        self.events.push(WorldEvent::Lost {
                            observer: instance,
                            entity: other,
                            regions: Vec::new(),
                        });
                    }
                }
                for other in diff.spawned {
                    if let Some(entity) = self.snapshot(other) {
                        self.events.push(WorldEvent::Sighted {
                            observer: instance,
                            entity,
                        });
                    }
                }
                self.events
                    .push(WorldEvent::RegionChanged { player: instance, region });
            }
        }

        if !visible {
            return;
        }
        let mut observers: Vec<Instance> = self
            .regions
            .observers(region, instance)
            .into_iter()
            .filter(|o| !gained.contains(o))
            .collect();

        match travel {
            Travel::Step => self.events.push(WorldEvent::Moved {
                instance,
                kind,
                position: to,
                observers,
            }),
            Travel::Teleport => {
                if is_player {
                    observers.push(instance);
                }
                self.events.push(WorldEvent::Teleported {
                    instance,
                    position: to,
                    observers,
                });
            }
        }
    }

    /// Steps every following entity one tile towards whoever it follows.
    pub fn advance_followers(&mut self) {
        let followers: Vec<(Instance, Instance, Position)> = self
            .entities
            .iter()
            .filter_map(|e| e.follow.map(|t| (e.instance, t, e.position)))
            .collect();

        for (instance, target, position) in followers {
            let Some(goal) = self.entities.get(target).map(|t| t.position) else {
                if let Some(e) = self.entities.get_mut(instance) {
                    e.follow = None;
                }
                continue;
            };
            if position.distance(goal) <= 1 {
                continue;
            }
            let step = position.step_towards(goal);
            if !self.grid.is_colliding(step.x, step.y) {
                self.relocate(instance, step, Travel::Step);
            }
        }
    }

    /// Brings a dead player back at `position` with full health.
    pub fn respawn(&mut self, player: Instance, position: Position) -> Result<(), MoveError> {
        let entity = self.entities.get(player).ok_or(MoveError::UnknownEntity)?;
        if entity.character.as_ref().map_or(true, |c| !c.is_dead()) {
            return Ok(());
        }
        if self.grid.is_out_of_bounds(position.x, position.y) {
            return Err(MoveError::OutOfBounds);
        }

        // Moved while still dead so nobody sees the corpse travel.
        if entity.position != position {
            self.relocate(player, position, Travel::Teleport);
        }

        let Some(c) = self.entities.character_mut(player) else {
            return Ok(());
        };
        c.dead = false;
        c.reset();
        c.mana = Mana::new(c.mana.max);
        let points = WorldEvent::PointsChanged {
            instance: player,
            hit_points: c.hit_points,
            max_hit_points: c.max_hit_points,
            mana: c.mana.current,
            max_mana: c.mana.max,
        };

        if let Some(snapshot) = self.snapshot(player) {
            for observer in self.observers_of(player) {
                self.events.push(WorldEvent::Sighted {
                    observer,
                    entity: snapshot.clone(),
                });
            }
        }
        self.events.push(WorldEvent::Teleported {
            instance: player,
            position,
            observers: vec![player],
        });
        self.events.push(points);
        info!(%player, x = position.x, y = position.y, "Respawned");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 64 x 36 map, 4 x 3 regions of 16 x 12.
    pub(crate) fn world() -> World {
        World::new(WorldConfig::default(), &MapData::open_field(64, 36)).unwrap()
    }

    pub(crate) fn sighted(world: &World, observer: Instance, entity: Instance) -> usize {
        world
            .events
            .iter()
            .filter(|e| matches!(e, WorldEvent::Sighted { observer: o, entity: s } if *o == observer && s.instance == entity))
            .count()
    }

    pub(crate) fn lost(world: &World, observer: Instance, entity: Instance) -> usize {
        world
            .events
            .iter()
            .filter(|e| matches!(e, WorldEvent::Lost { observer: o, entity: l, .. } if *o == observer && *l == entity))
            .count()
    }

    pub(crate) fn mob(world: &mut World, x: i32, y: i32, hp: u32) -> Instance {
        world
            .spawn_mob(&MobSpawn {
                key: "rat".into(),
                position: Position::new(x, y),
                hit_points: hp,
                level: 1,
                attack: 0,
                defense: 0,
                aggressive: false,
                aggro_range: 2,
                attack_interval: 2,
                style: Default::default(),
                experience: 10,
                poison: None,
            })
            .unwrap()
    }

    #[test]
    fn joining_player_sees_nearby_entities() {
        let mut w = world();
        let near = mob(&mut w, 20, 5, 10);
        let far = mob(&mut w, 60, 30, 10);
        let p = w.spawn_player("alice", Position::new(5, 5), Character::new(50)).unwrap();

        assert_eq!(sighted(&w, p, near), 1);
        assert_eq!(sighted(&w, p, far), 0);
        assert!(w.events.iter().any(|e| matches!(e, WorldEvent::RegionChanged { player, region: 0 } if *player == p)));
        w.verify().unwrap();
    }

    #[test]
    fn other_players_see_a_spawn() {
        let mut w = world();
        let a = w.spawn_player("a", Position::new(5, 5), Character::new(50)).unwrap();
        w.events.drain();
        let b = w.spawn_player("b", Position::new(6, 5), Character::new(50)).unwrap();
        assert_eq!(sighted(&w, a, b), 1);
        assert_eq!(sighted(&w, b, a), 1);
    }

    #[test]
    fn invalid_moves_do_not_mutate() {
        let mut map = MapData::open_field(64, 36);
        map.collisions.push(Position::new(1, 1));
        let mut w = World::new(WorldConfig::default(), &map).unwrap();
        let p = w.spawn_player("a", Position::new(0, 0), Character::new(50)).unwrap();
        w.events.drain();

        assert_eq!(w.move_entity(p, Position::new(-1, 0)), Err(MoveError::OutOfBounds));
        assert_eq!(w.move_entity(p, Position::new(3, 0)), Err(MoveError::TooFar));
        assert_eq!(w.move_entity(p, Position::new(1, 1)), Err(MoveError::Blocked));
        assert_eq!(w.entities.get(p).unwrap().position, Position::new(0, 0));
        assert!(w.events.is_empty());

        w.move_entity(p, Position::new(1, 0)).unwrap();
        assert_eq!(w.grid.entities_at(1, 0), vec![p]);
        w.verify().unwrap();
    }

    #[test]
    fn moving_mob_is_seen_and_lost() {
        let mut w = world();
        let p = w.spawn_player("a", Position::new(5, 5), Character::new(50)).unwrap();
        let m = mob(&mut w, 32, 5, 10);
        w.events.drain();

        w.move_entity(m, Position::new(31, 5)).unwrap();
        assert_eq!(sighted(&w, p, m), 1);
        w.events.drain();

        w.move_entity(m, Position::new(30, 5)).unwrap();
        assert!(w.events.iter().any(|e| matches!(e, WorldEvent::Moved { instance, observers, .. } if *instance == m && observers == &vec![p])));
        w.events.drain();

        w.move_entity(m, Position::new(31, 5)).unwrap();
        w.move_entity(m, Position::new(32, 5)).unwrap();
        assert_eq!(lost(&w, p, m), 1);
    }

    #[test]
    fn despawn_notifies_observers_and_cleans_up() {
        let mut w = world();
        let p = w.spawn_player("a", Position::new(5, 5), Character::new(50)).unwrap();
        let m = mob(&mut w, 6, 5, 10);
        w.events.drain();

        let gone = w.despawn(m).unwrap();
        assert_eq!(gone.instance, m);
        assert_eq!(lost(&w, p, m), 1);
        assert!(w.grid.entities_at(6, 5).is_empty());
        assert!(w.despawn(m).is_none());
        w.verify().unwrap();
    }

    #[test]
    fn pets_follow_their_owner() {
        let mut w = world();
        let p = w.spawn_player("a", Position::new(5, 5), Character::new(50)).unwrap();
        let pet = w.spawn_pet(p, "dog").unwrap();
        for x in 6..=9 {
            w.move_entity(p, Position::new(x, 5)).unwrap();
        }
        w.advance_followers();
        assert_eq!(w.entities.get(pet).unwrap().position, Position::new(6, 5));

        w.despawn(p);
        assert!(!w.entities.contains(pet), "pets leave with their owner");
        w.verify().unwrap();
    }

    #[test]
    fn teleport_reports_to_the_player() {
        let mut w = world();
        let p = w.spawn_player("a", Position::new(5, 5), Character::new(50)).unwrap();
        let far = mob(&mut w, 60, 30, 10);
        w.events.drain();

        w.teleport(p, Position::new(58, 30)).unwrap();
        assert_eq!(sighted(&w, p, far), 1);
        assert!(w.events.iter().any(|e| matches!(e, WorldEvent::Teleported { observers, .. } if observers.contains(&p))));
        w.verify().unwrap();
    }
}
