//! Shared fixtures for the integration tests and the scenario runner.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use realm_server::Realm;
use realm_shared::{
    combat::DamageModel,
    config::WorldConfig,
    entity::{Character, EntityKind, Instance},
    hooks::{GameHooks, TriggerOutcome},
    intent::Intent,
    map::{Door, MapData, MobSpawn},
    packet::{Outbox, Packet},
    position::Position,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Armed attackers deal a fixed sequence of damage values, then zeroes.
/// Unarmed attackers (equipment attack 0) always deal zero.
#[derive(Debug, Default)]
pub struct ScriptedDamage(pub VecDeque<u32>);

impl ScriptedDamage {
    pub fn new(hits: &[u32]) -> Self {
        Self(hits.iter().copied().collect())
    }
}

impl DamageModel for ScriptedDamage {
    fn roll(&mut self, attacker: &Character, _target: &Character, _rng: &mut StdRng) -> u32 {
        if attacker.equipment.attack == 0 {
            return 0;
        }
        self.0.pop_front().unwrap_or(0)
    }
}

/// What the recording hooks answer and what they were asked to do.
#[derive(Debug)]
pub struct HookState {
    pub items: BTreeMap<String, u32>,
    pub quests_finished: BTreeSet<String>,
    pub achievements_finished: BTreeSet<String>,
    pub door_outcome: TriggerOutcome,
    pub talk_outcome: TriggerOutcome,

    pub saves: Vec<Instance>,
    pub kills: Vec<(Instance, String, EntityKind)>,
    pub credits: Vec<(Instance, String, u32, u32)>,
    pub door_calls: u32,
}

impl Default for HookState {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            quests_finished: BTreeSet::new(),
            achievements_finished: BTreeSet::new(),
            door_outcome: TriggerOutcome::Continue,
            talk_outcome: TriggerOutcome::Continue,
            saves: Vec::new(),
            kills: Vec::new(),
            credits: Vec::new(),
            door_calls: 0,
        }
    }
}

/// Hooks backed by a shared [`HookState`] the test keeps a handle to.
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks(pub Arc<Mutex<HookState>>);

impl RecordingHooks {
    pub fn state(&self) -> std::sync::MutexGuard<'_, HookState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl GameHooks for RecordingHooks {
    fn door(&mut self, _player: Instance, _door: &Door) -> TriggerOutcome {
        let mut s = self.state();
        s.door_calls += 1;
        s.door_outcome.clone()
    }

    fn talk(&mut self, _player: Instance, _npc: Instance, _npc_key: &str) -> TriggerOutcome {
        self.state().talk_outcome.clone()
    }

    fn kill(&mut self, killer: Instance, victim_key: &str, victim_kind: EntityKind) -> TriggerOutcome {
        self.state()
            .kills
            .push((killer, victim_key.to_string(), victim_kind));
        TriggerOutcome::Continue
    }

    fn kill_credit(&mut self, player: Instance, mob_key: &str, damage: u32, experience: u32) {
        self.state()
            .credits
            .push((player, mob_key.to_string(), damage, experience));
    }

    fn save(&mut self, player: Instance) {
        self.state().saves.push(player);
    }

    fn quest_finished(&self, _player: Instance, quest: &str) -> bool {
        self.state().quests_finished.contains(quest)
    }

    fn achievement_finished(&self, _player: Instance, achievement: &str) -> bool {
        self.state().achievements_finished.contains(achievement)
    }

    fn finish_achievement(&mut self, _player: Instance, achievement: &str) {
        self.state()
            .achievements_finished
            .insert(achievement.to_string());
    }

    fn has_item(&self, _player: Instance, key: &str, count: u32) -> bool {
        self.state().items.get(key).copied().unwrap_or(0) >= count
    }

    fn remove_item(&mut self, _player: Instance, key: &str, count: u32) {
        if let Some(have) = self.state().items.get_mut(key) {
            *have = have.saturating_sub(count);
        }
    }
}

/// A 64 x 36 open field cut into 4 x 3 regions of 16 x 12.
pub fn field() -> MapData {
    MapData::open_field(64, 36)
}

/// A passive, unarmed mob worth 10 experience.
pub fn rat(x: i32, y: i32, hit_points: u32) -> MobSpawn {
    MobSpawn {
        key: "rat".to_string(),
        position: Position::new(x, y),
        hit_points,
        level: 1,
        attack: 0,
        defense: 0,
        aggressive: false,
        aggro_range: 2,
        attack_interval: 2,
        style: Default::default(),
        experience: 10,
        poison: None,
    }
}

/// A player character that hits for whatever the damage model rolls.
pub fn armed(hit_points: u32) -> Character {
    let mut c = Character::new(hit_points);
    c.equipment.attack = 1;
    c
}

pub fn realm_with(map: &MapData, hooks: RecordingHooks) -> Realm {
    match Realm::new(WorldConfig::default(), map, Box::new(hooks)) {
        Ok(realm) => realm,
        Err(e) => panic!("test map rejected: {e}"),
    }
}

/// Joins a player and puts them at `at`.
pub fn player_at(realm: &mut Realm, name: &str, at: Position, character: Character) -> Instance {
    let Ok(player) = realm.join_with(name, character) else {
        panic!("could not join {name}");
    };
    if let Err(e) = realm.world_mut().teleport(player, at) {
        panic!("could not place {name}: {e}");
    }
    realm.tick();
    player
}

/// Walks a player to `to` one tile per tick.
pub fn walk(realm: &mut Realm, player: Instance, to: Position) {
    loop {
        let Some(at) = realm.world().entities.get(player).map(|e| e.position) else {
            return;
        };
        if at == to {
            return;
        }
        let step = at.step_towards(to);
        realm.queue(player, Intent::Move { x: step.x, y: step.y });
        realm.tick();
        if realm.world().entities.get(player).map(|e| e.position) == Some(at) {
            panic!("{player} is stuck at {at:?} on the way to {to:?}");
        }
    }
}

pub fn spawns_of(outbox: &Outbox, to: Instance, entity: Instance) -> usize {
    outbox
        .to(to)
        .iter()
        .filter(|p| matches!(p, Packet::Spawn(s) if s.instance == entity))
        .count()
}

pub fn despawns_of(outbox: &Outbox, to: Instance, entity: Instance) -> usize {
    outbox
        .to(to)
        .iter()
        .filter(|p| matches!(p, Packet::Despawn { instance, .. } if *instance == entity))
        .count()
}

pub fn notices(outbox: &Outbox, to: Instance) -> Vec<String> {
    outbox
        .to(to)
        .iter()
        .filter_map(|p| match p {
            Packet::Notify { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}
