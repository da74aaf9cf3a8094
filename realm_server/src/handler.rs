//! Event dispatcher.
//!
//! Turns the world's typed events into packets and hook calls, applies
//! player intents, and owns everything per-connection: sessions, cheat
//! score, light dedupe, dialogue progress and pets.
//!
//! Dispatch pops events one at a time, so events pushed while dispatching
//! (a pet follow, a teleport from a trigger) are handled in the same pass.

use std::collections::BTreeMap;
use std::fmt;

use realm_shared::{
    entity::{Character, EntityKind, Instance, NpcRole},
    event::{HitKind, Resource, WorldEvent},
    hooks::{GameHooks, TriggerOutcome},
    intent::{Intent, QueuedIntent},
    map::Door,
    packet::{NpcAction, Packet, PacketSink},
    position::Position,
    world::{MoveError, World},
};
use tracing::{debug, info, warn};

use crate::session::Session;

/// Why a door refused a player. Displays as the notice shown to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorError {
    UnknownDoor(u32),
    /// Player is not standing on or next to the door.
    NotReachable,
    LevelTooLow { required: u32, skill: Option<String> },
    AchievementRequired(String),
    QuestRequired(String),
    KeyRequired,
    /// Destination tile is blocked.
    Blocked,
}

impl DoorError {
    /// Whether an honest client could have sent the intent.
    pub fn is_suspicious(&self) -> bool {
        matches!(self, DoorError::UnknownDoor(_) | DoorError::NotReachable)
    }
}

impl fmt::Display for DoorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoorError::UnknownDoor(id) => write!(f, "There is no door {id}."),
            DoorError::NotReachable => write!(f, "You are too far away from that door."),
            DoorError::LevelTooLow { required, skill: Some(skill) } => {
                write!(f, "You need level {required} {skill} to pass through this door.")
            }
            DoorError::LevelTooLow { required, skill: None } => {
                write!(f, "You need to be level {required} to pass through this door.")
            }
            DoorError::AchievementRequired(a) => {
                write!(f, "You need to complete the achievement {a} to pass through this door.")
            }
            DoorError::QuestRequired(q) => {
                write!(f, "You need to complete the quest {q} to pass through this door.")
            }
            DoorError::KeyRequired => write!(f, "This door is locked and you do not have the key."),
            DoorError::Blocked => write!(f, "Something is blocking the way."),
        }
    }
}

impl std::error::Error for DoorError {}

fn notify(sink: &mut dyn PacketSink, to: Instance, message: impl Into<String>) {
    sink.send(to, Packet::Notify { message: message.into() });
}

pub struct Handler {
    sessions: BTreeMap<Instance, Session>,
    hooks: Box<dyn GameHooks>,
}

impl Handler {
    pub fn new(hooks: Box<dyn GameHooks>) -> Self {
        Self {
            sessions: BTreeMap::new(),
            hooks,
        }
    }

    pub fn session(&self, player: Instance) -> Option<&Session> {
        self.sessions.get(&player)
    }

    pub fn session_mut(&mut self, player: Instance) -> Option<&mut Session> {
        self.sessions.get_mut(&player)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Spawns a player at the map spawn point and opens their session.
    pub fn join(
        &mut self,
        world: &mut World,
        sink: &mut dyn PacketSink,
        username: &str,
        character: Character,
    ) -> Result<Instance, MoveError> {
        let position = world.spawn_point();
        let player = world.spawn_player(username, position, character)?;
        self.sessions.insert(player, Session::new(player, username));
        sink.send(player, Packet::Welcome { instance: player, position });
        info!(%player, username, x = position.x, y = position.y, "Player joined");
        Ok(player)
    }

    /// Saves and removes a player, their pet and every combat link.
    pub fn leave(&mut self, world: &mut World, player: Instance) {
        let Some(session) = self.sessions.remove(&player) else {
            return;
        };
        self.hooks.save(player);
        world.despawn(player);
        info!(%player, username = %session.username, "Player left");
    }

    /// Gives a player a pet that follows them around.
    pub fn adopt_pet(&mut self, world: &mut World, player: Instance, key: &str) -> Option<Instance> {
        let session = self.sessions.get_mut(&player)?;
        if let Some(old) = session.pet.take() {
            world.despawn(old);
        }
        session.pet = world.spawn_pet(player, key);
        session.pet
    }

    /// Decays every cheat score.
    pub fn housekeeping(&mut self) {
        for session in self.sessions.values_mut() {
            session.cheat_score = 0;
        }
    }

    /// Applies one intent against the current world state.
    pub fn apply_intent(&mut self, world: &mut World, sink: &mut dyn PacketSink, queued: QueuedIntent) {
        let QueuedIntent { player, intent } = queued;
        match self.sessions.get(&player) {
            None => {
                debug!(%player, ?intent, "Intent from unknown player");
                return;
            }
            Some(session) if session.terminated => {
                debug!(%player, ?intent, "Intent from disconnected player");
                return;
            }
            Some(_) => {}
        }
        let dead = world.entities.character(player).map_or(false, |c| c.is_dead());
        if dead && matches!(intent, Intent::Talk { .. } | Intent::Door { .. }) {
            debug!(%player, ?intent, "Intent from dead player");
            return;
        }

        match intent {
            Intent::Move { x, y } => {
                if let Err(e) = world.move_entity(player, Position::new(x, y)) {
                    debug!(%player, x, y, error = %e, "Movement rejected");
                    if e.is_suspicious() {
                        self.flag(world, sink, player);
                    }
                }
            }
            Intent::Attack { target } => {
                if let Err(e) = world.attack(player, target) {
                    debug!(%player, %target, error = %e, "Attack rejected");
                }
            }
            Intent::Stop => world.stop_attack(player),
            Intent::Talk { npc } => self.talk(world, sink, player, npc),
            Intent::Door { door } => {
                if let Err(e) = self.door(world, sink, player, door) {
                    debug!(%player, door, error = %e, "Door refused");
                    if e.is_suspicious() {
                        self.flag(world, sink, player);
                    } else {
                        notify(sink, player, e.to_string());
                    }
                }
            }
        }
    }

    /// Raises the cheat score; crossing the ceiling sends the player to spawn,
    /// cuts their combat and disconnects them.
    fn flag(&mut self, world: &mut World, sink: &mut dyn PacketSink, player: Instance) {
        let Some(session) = self.sessions.get_mut(&player) else {
            return;
        };
        let before = session.cheat_score;
        let score = session.flag(1);
        debug!(%player, username = %session.username, score, "Cheat score");

        let ceiling = world.config.cheat_score_ceiling;
        if before <= ceiling && score > ceiling {
            warn!(%player, username = %session.username, score, "Disconnecting for cheating");
            session.terminated = true;
            world.disengage(player);
            let spawn = world.spawn_point();
            if let Err(e) = world.teleport(player, spawn) {
                debug!(%player, error = %e, "Could not send cheater to spawn");
            }
            sink.disconnect(player, "cheating");
        }
    }

    fn door(
        &mut self,
        world: &mut World,
        sink: &mut dyn PacketSink,
        player: Instance,
        id: u32,
    ) -> Result<(), DoorError> {
        let door: Door = world.doors.get(&id).cloned().ok_or(DoorError::UnknownDoor(id))?;
        let (position, level) = world
            .entities
            .get(player)
            .and_then(|e| Some((e.position, e.character.as_ref()?.level)))
            .ok_or(DoorError::UnknownDoor(id))?;
        if position.distance(door.position) > 1 {
            return Err(DoorError::NotReachable);
        }

        if let Some(required) = door.level {
            let have = match &door.skill {
                Some(skill) => self.hooks.skill_level(player, skill),
                None => level,
            };
            if have < required {
                return Err(DoorError::LevelTooLow {
                    required,
                    skill: door.skill.clone(),
                });
            }
        }

        if door.quest.is_some() {
            match self.hooks.door(player, &door) {
                TriggerOutcome::Continue => {}
                TriggerOutcome::Handled => return Ok(()),
                TriggerOutcome::Notify(message) => {
                    notify(sink, player, message);
                    return Ok(());
                }
                TriggerOutcome::Teleport(to) => {
                    if world.grid.is_colliding(to.x, to.y) {
                        return Err(DoorError::Blocked);
                    }
                    self.pass(world, player, to);
                    return Ok(());
                }
            }
        }

        if let Some(a) = &door.req_achievement {
            if !self.hooks.achievement_finished(player, a) {
                return Err(DoorError::AchievementRequired(a.clone()));
            }
        }
        if let Some(q) = &door.req_quest {
            if !self.hooks.quest_finished(player, q) {
                return Err(DoorError::QuestRequired(q.clone()));
            }
        }
        let count = door.req_item_count.unwrap_or(1);
        if let Some(item) = &door.req_item {
            if !self.hooks.has_item(player, item, count) {
                return Err(DoorError::KeyRequired);
            }
        }
        let to = door.destination;
        if world.grid.is_colliding(to.x, to.y) {
            return Err(DoorError::Blocked);
        }

        if let Some(a) = &door.achievement {
            self.hooks.finish_achievement(player, a);
        }
        if let Some(item) = &door.req_item {
            self.hooks.remove_item(player, item, count);
            notify(sink, player, "The key crumbles to dust.");
        }
        self.pass(world, player, to);
        debug!(%player, door = id, x = to.x, y = to.y, "Went through door");
        Ok(())
    }

    fn pass(&mut self, world: &mut World, player: Instance, to: Position) {
        if let Some(session) = self.sessions.get_mut(&player) {
            session.talk_index = 0;
        }
        if let Err(e) = world.teleport(player, to) {
            debug!(%player, error = %e, "Teleport failed");
        }
    }

    fn talk(&mut self, world: &mut World, sink: &mut dyn PacketSink, player: Instance, npc: Instance) {
        let (Some(p), Some(n)) = (world.entities.get(player), world.entities.get(npc)) else {
            debug!(%player, %npc, "Talk to unknown entity");
            return;
        };
        let Some(role) = n.role.clone().filter(|_| n.kind == EntityKind::Npc) else {
            debug!(%player, %npc, "Talk to something that is not an npc");
            return;
        };
        let key = n.key.clone();
        if !p.position.is_adjacent(n.position) {
            warn!(%player, %npc, npc_key = %key, "Tried to talk to an npc that is not adjacent");
            return;
        }

        match self.hooks.talk(player, npc, &key) {
            TriggerOutcome::Continue => {}
            TriggerOutcome::Handled => return,
            TriggerOutcome::Notify(message) => return notify(sink, player, message),
            TriggerOutcome::Teleport(to) => return self.pass(world, player, to),
        }

        let action = match role {
            NpcRole::Banker => NpcAction::Bank,
            NpcRole::Enchanter => NpcAction::Enchant,
            NpcRole::Store(store) => NpcAction::Store { store },
            NpcRole::Talker(lines) => {
                let Some(session) = self.sessions.get_mut(&player) else {
                    return;
                };
                match session.next_line(&lines) {
                    Some(line) => NpcAction::Talk { text: line.to_string() },
                    None => return,
                }
            }
        };
        sink.send(player, Packet::Npc { instance: npc, action });
    }

    /// Drains the world's events, in order, into packets and hook calls.
    pub fn dispatch(&mut self, world: &mut World, sink: &mut dyn PacketSink) {
        while let Some(event) = world.events.pop() {
            self.handle(world, sink, event);
        }
    }

    fn handle(&mut self, world: &mut World, sink: &mut dyn PacketSink, event: WorldEvent) {
        match event {
            WorldEvent::Sighted { observer, entity } => sink.send(observer, Packet::Spawn(entity)),
            WorldEvent::Lost { observer, entity, regions } => sink.send(
                observer,
                Packet::Despawn {
                    instance: entity,
                    regions: (!regions.is_empty()).then_some(regions),
                },
            ),
            WorldEvent::Moved { instance, kind, position, observers } => {
                for observer in observers {
                    sink.send(observer, Packet::Movement { instance, position });
                }
                if kind == EntityKind::Player {
                    self.check_pet(world, instance);
                }
            }
            WorldEvent::Teleported { instance, position, observers } => {
                for observer in observers {
                    sink.send(observer, Packet::Teleport { instance, position });
                }
                if self.sessions.contains_key(&instance) {
                    self.check_pet(world, instance);
                }
            }
            WorldEvent::RegionChanged { player, region } => {
                debug!(%player, region, "Entered region");
                self.send_lights(world, sink, player, region);
            }
            WorldEvent::Attacked { attacker, .. } => {
                if let Some(session) = self.sessions.get_mut(&attacker) {
                    session.low_mana_warned = false;
                }
            }
            WorldEvent::ResourceShortage { attacker, resource } => match resource {
                Resource::Mana => {
                    let warn = self
                        .sessions
                        .get_mut(&attacker)
                        .map_or(false, |s| s.should_warn_low_mana());
                    if warn {
                        notify(sink, attacker, "You do not have enough mana to attack.");
                    }
                }
                Resource::Arrows => notify(sink, attacker, "You do not have any arrows."),
            },
            WorldEvent::Damaged { target, attacker, amount, kind, mut observers } => {
                if self.sessions.contains_key(&target) {
                    observers.push(target);
                }
                let packet = Packet::Damage {
                    instance: target,
                    attacker,
                    amount,
                    thorns: kind == HitKind::Thorns,
                };
                for observer in observers {
                    sink.send(observer, packet.clone());
                }
            }
            WorldEvent::PointsChanged { instance, hit_points, max_hit_points, mana, max_mana } => {
                if self.sessions.contains_key(&instance) {
                    sink.send(
                        instance,
                        Packet::Points { instance, hit_points, max_hit_points, mana, max_mana },
                    );
                }
            }
            WorldEvent::Poisoned { instance } => {
                if self.sessions.contains_key(&instance) {
                    notify(sink, instance, "You have been poisoned.");
                    sink.send(instance, Packet::Poison { active: true });
                }
            }
            WorldEvent::PoisonWornOff { instance } => {
                if self.sessions.contains_key(&instance) {
                    notify(sink, instance, "The poison has worn off.");
                    sink.send(instance, Packet::Poison { active: false });
                }
            }
            WorldEvent::Aggro { mob, player } => debug!(%mob, %player, "Mob aggroed"),
            WorldEvent::Died { instance, kind, killer } => {
                if kind == EntityKind::Player {
                    if let Some(session) = self.sessions.get_mut(&instance) {
                        session.pet = None;
                        sink.send(instance, Packet::Death { instance });
                        self.hooks.save(instance);
                    }
                }
                debug!(%instance, ?kind, killer = ?killer, "Death dispatched");
            }
            WorldEvent::Killed { killer, victim_key, victim_kind, .. } => {
                match self.hooks.kill(killer, &victim_key, victim_kind) {
                    TriggerOutcome::Continue | TriggerOutcome::Handled => {}
                    TriggerOutcome::Notify(message) => notify(sink, killer, message),
                    TriggerOutcome::Teleport(to) => self.pass(world, killer, to),
                }
            }
            WorldEvent::KillCredit { player, mob_key, damage, experience } => {
                self.hooks.kill_credit(player, &mob_key, damage, experience);
            }
            WorldEvent::Follow { instance, target, observers } => {
                for observer in observers {
                    sink.send(observer, Packet::Follow { instance, target });
                }
            }
        }
    }

    /// Keeps a player's pet close: follow past one threshold, respawn next
    /// to the owner past the other.
    fn check_pet(&mut self, world: &mut World, player: Instance) {
        let Some(session) = self.sessions.get_mut(&player) else {
            return;
        };
        let Some(pet) = session.pet else {
            return;
        };
        let (Some(owner), Some(p)) = (world.entities.get(player), world.entities.get(pet)) else {
            session.pet = None;
            return;
        };
        let distance = owner.position.distance(p.position);
        let key = p.key.clone();

        let pet = if distance > world.config.pet_resync_distance {
            debug!(%player, %pet, distance, "Respawning pet next to owner");
            world.despawn(pet);
            session.pet = world.spawn_pet(player, &key);
            session.pet
        } else if distance > world.config.pet_follow_distance {
            if let Some(p) = world.entities.get_mut(pet) {
                p.follow = Some(player);
            }
            Some(pet)
        } else {
            None
        };

        if let Some(pet) = pet {
            let observers = world.observers_of(pet);
            world.events.push(WorldEvent::Follow {
                instance: pet,
                target: player,
                observers,
            });
        }
    }

    /// Sends overlays for lights around `region` the client has not seen.
    fn send_lights(&mut self, world: &World, sink: &mut dyn PacketSink, player: Instance, region: usize) {
        let Some(session) = self.sessions.get_mut(&player) else {
            return;
        };
        world.regions.for_each_surrounding_region(region, |id| {
            let Some(r) = world.regions.get(id) else {
                return;
            };
            for light in &r.lights {
                if session.load_light(light.id) {
                    sink.send(player, Packet::Overlay { light: light.clone() });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_shared::{config::WorldConfig, hooks::NullHooks, map::MapData, packet::Outbox};

    fn setup() -> (World, Handler, Outbox) {
        let world = World::new(WorldConfig::default(), &MapData::open_field(64, 36)).unwrap();
        (world, Handler::new(Box::new(NullHooks)), Outbox::default())
    }

    #[test]
    fn join_welcomes_before_anything_else() {
        let (mut w, mut h, mut out) = setup();
        let p = h.join(&mut w, &mut out, "alice", Character::new(10)).unwrap();
        h.dispatch(&mut w, &mut out);
        assert!(matches!(out.to(p)[0], Packet::Welcome { instance, .. } if *instance == p));
        assert!(h.session(p).is_some());
    }

    #[test]
    fn repeated_bad_steps_disconnect_the_cheater() {
        let (mut w, mut h, mut out) = setup();
        let p = h.join(&mut w, &mut out, "mallory", Character::new(10)).unwrap();
        for _ in 0..20 {
            h.apply_intent(&mut w, &mut out, QueuedIntent { player: p, intent: Intent::Move { x: 0, y: 0 } });
        }
        assert_eq!(out.disconnects, vec![(p, "cheating".to_string())]);
        assert_eq!(w.entities.get(p).unwrap().position, w.spawn_point());
        assert!(h.session(p).unwrap().terminated);
    }

    #[test]
    fn dead_players_cannot_use_doors() {
        let (mut w, mut h, mut out) = setup();
        let p = h.join(&mut w, &mut out, "alice", Character::new(10)).unwrap();
        let at = w.spawn_point();
        w.doors.insert(1, Door::new(1, at, Position::new(1, 1)));
        w.die(p, None);

        h.apply_intent(&mut w, &mut out, QueuedIntent { player: p, intent: Intent::Door { door: 1 } });
        assert_eq!(w.entities.get(p).unwrap().position, at);
        assert_eq!(h.session(p).unwrap().cheat_score, 0);
    }

    #[test]
    fn door_checks_run_before_any_side_effect() {
        let (mut w, mut h, mut out) = setup();
        let p = h.join(&mut w, &mut out, "alice", Character::new(10)).unwrap();
        let at = w.spawn_point();
        let mut door = Door::new(1, at, Position::new(1, 1));
        door.level = Some(5);
        w.doors.insert(1, door);
        h.session_mut(p).unwrap().talk_index = 3;

        h.apply_intent(&mut w, &mut out, QueuedIntent { player: p, intent: Intent::Door { door: 1 } });
        assert_eq!(w.entities.get(p).unwrap().position, at);
        assert_eq!(h.session(p).unwrap().talk_index, 3);
        assert!(out
            .to(p)
            .iter()
            .any(|pk| matches!(pk, Packet::Notify { message } if message.contains("level 5"))));

        w.entities.character_mut(p).unwrap().level = 5;
        h.apply_intent(&mut w, &mut out, QueuedIntent { player: p, intent: Intent::Door { door: 1 } });
        assert_eq!(w.entities.get(p).unwrap().position, Position::new(1, 1));
        assert_eq!(h.session(p).unwrap().talk_index, 0);
    }

    #[test]
    fn lights_are_sent_once() {
        let mut map = MapData::open_field(64, 36);
        map.lights.push(realm_shared::region::Light {
            id: 9,
            position: Position::new(20, 5),
            radius: 3,
            colour: "#ffaa00".into(),
        });
        let mut w = World::new(WorldConfig::default(), &map).unwrap();
        let mut h = Handler::new(Box::new(NullHooks));
        let mut out = Outbox::default();
        let p = w.spawn_player("a", Position::new(5, 5), Character::new(10)).unwrap();
        h.sessions.insert(p, Session::new(p, "a"));
        h.dispatch(&mut w, &mut out);

        w.teleport(p, Position::new(40, 30)).unwrap();
        w.teleport(p, Position::new(5, 5)).unwrap();
        h.dispatch(&mut w, &mut out);

        let overlays = out.to(p).iter().filter(|pk| matches!(pk, Packet::Overlay { .. })).count();
        assert_eq!(overlays, 1);
    }
}
