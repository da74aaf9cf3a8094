//! Combat engine.
//!
//! Each attacking character has at most one [`CombatSession`]
//! (`Idle -> Engaging(target) -> Idle`). Sessions fire on their own attack
//! interval inside the combat phase of the tick. A firing either ends the
//! session, waits, or lands a hit:
//!
//! - target gone, dead or out of sight: session ends silently
//! - out of reach: mobs chase (within twice their roaming radius), players wait
//! - player-initiated: mana or an arrow is paid first, or the step is skipped
//! - damage comes from the [`DamageModel`] and goes through [`World::hit`]
//!
//! `hit` owns the reactive rules (retaliation, poison, thorns) and hands
//! over to `die` when hit points reach zero. Death runs exactly once per life.

use std::collections::BTreeMap;
use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    entity::{AttackStyle, Character, EntityKind, Instance, Poison, Status},
    event::{HitKind, Resource, WorldEvent},
    position::Position,
    world::World,
};

/// Who started a session. Only player-initiated sessions pay resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Player,
    Mob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatSession {
    pub attacker: Instance,
    pub target: Instance,
    pub initiator: Initiator,
    /// Tick at which the next firing is due.
    pub next_attack: u64,
}

/// Rolls the raw damage of one attack.
pub trait DamageModel: Send {
    fn roll(&mut self, attacker: &Character, target: &Character, rng: &mut StdRng) -> u32;
}

/// Uniform roll up to attack + level, minus half the target's defense.
#[derive(Debug, Default)]
pub struct StatDamage;

impl DamageModel for StatDamage {
    fn roll(&mut self, attacker: &Character, target: &Character, rng: &mut StdRng) -> u32 {
        let max = (attacker.equipment.attack + attacker.level)
            .saturating_sub(target.equipment.defense / 2);
        rng.gen_range(0..=max)
    }
}

/// Decides whether an idle mob engages a player on sight.
pub trait AggroPolicy: Send {
    fn should_aggro(&self, mob: &Character, mob_at: Position, player: &Character, player_at: Position) -> bool;
}

#[derive(Debug, Default)]
pub struct DefaultAggro;

impl AggroPolicy for DefaultAggro {
    fn should_aggro(&self, mob: &Character, mob_at: Position, player: &Character, player_at: Position) -> bool {
        mob.aggressive
            && !mob.is_dead()
            && mob.target.is_none()
            && !player.is_dead()
            && !player.status.contains(Status::INVISIBLE)
            && mob_at.distance(player_at) <= mob.aggro_range
            // Mobs leave players above twice their level alone.
            && player.level <= mob.level.saturating_mul(2)
    }
}

/// Why an attack could not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackError {
    UnknownAttacker,
    /// Attacker is not a combat-capable character.
    CannotAttack,
    AttackerDead,
    SelfTarget,
    UnknownTarget,
    /// Target is not a player or mob.
    Untargetable,
    TargetDead,
    /// Target is outside the attacker's neighborhood.
    OutOfSight,
}

impl fmt::Display for AttackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackError::UnknownAttacker => write!(f, "unknown attacker"),
            AttackError::CannotAttack => write!(f, "attacker cannot fight"),
            AttackError::AttackerDead => write!(f, "attacker is dead"),
            AttackError::SelfTarget => write!(f, "cannot attack oneself"),
            AttackError::UnknownTarget => write!(f, "unknown target"),
            AttackError::Untargetable => write!(f, "target cannot be attacked"),
            AttackError::TargetDead => write!(f, "target is dead"),
            AttackError::OutOfSight => write!(f, "target is out of sight"),
        }
    }
}

impl std::error::Error for AttackError {}

/// Sessions plus the pluggable pieces of combat.
pub struct CombatState {
    pub(crate) sessions: BTreeMap<Instance, CombatSession>,
    pub(crate) rng: StdRng,
    pub(crate) damage: Box<dyn DamageModel>,
    pub(crate) aggro: Box<dyn AggroPolicy>,
}

impl CombatState {
    pub fn new(seed: u64) -> Self {
        Self {
            sessions: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
            damage: Box::new(StatDamage),
            aggro: Box::new(DefaultAggro),
        }
    }

    pub fn set_damage_model(&mut self, model: Box<dyn DamageModel>) {
        self.damage = model;
    }

    pub fn set_aggro_policy(&mut self, policy: Box<dyn AggroPolicy>) {
        self.aggro = policy;
    }

    pub fn session(&self, attacker: Instance) -> Option<&CombatSession> {
        self.sessions.get(&attacker)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl World {
    /// Starts (or retargets) an attack.
    pub fn attack(&mut self, attacker: Instance, target: Instance) -> Result<(), AttackError> {
        let a = self.entities.get(attacker).ok_or(AttackError::UnknownAttacker)?;
        let ac = a.character.as_ref().ok_or(AttackError::CannotAttack)?;
        if a.kind == EntityKind::Npc {
            return Err(AttackError::CannotAttack);
        }
        if ac.is_dead() {
            return Err(AttackError::AttackerDead);
        }
        if attacker == target {
            return Err(AttackError::SelfTarget);
        }

        let t = self.entities.get(target).ok_or(AttackError::UnknownTarget)?;
        if !matches!(t.kind, EntityKind::Player | EntityKind::Mob) {
            return Err(AttackError::Untargetable);
        }
        let tc = t.character.as_ref().ok_or(AttackError::Untargetable)?;
        if tc.is_dead() {
            return Err(AttackError::TargetDead);
        }
        if !self.regions.surrounding(a.region).contains(&t.region) {
            return Err(AttackError::OutOfSight);
        }

        let initiator = if a.is_player() {
            Initiator::Player
        } else {
            Initiator::Mob
        };
        self.engage(attacker, target, initiator);
        Ok(())
    }

    fn engage(&mut self, attacker: Instance, target: Instance, initiator: Initiator) {
        let tick = self.tick();
        let next_attack = self
            .combat
            .sessions
            .get(&attacker)
            .map_or(tick, |s| s.next_attack.max(tick));
        self.combat.sessions.insert(
            attacker,
            CombatSession {
                attacker,
                target,
                initiator,
                next_attack,
            },
        );
        if let Some(c) = self.entities.character_mut(attacker) {
            c.target = Some(target);
        }
        debug!(%attacker, %target, ?initiator, "Engaged");
    }

    /// Ends the attacker's session, if any.
    pub fn stop_attack(&mut self, attacker: Instance) {
        if self.combat.sessions.remove(&attacker).is_some() {
            debug!(%attacker, "Disengaged");
        }
        if let Some(c) = self.entities.character_mut(attacker) {
            c.target = None;
        }
    }

    /// Whether the character attacks or is attacked by anyone.
    pub fn is_engaged(&self, instance: Instance) -> bool {
        self.combat.sessions.contains_key(&instance)
            || self.combat.sessions.values().any(|s| s.target == instance)
    }

    fn sessions_targeting(&self, target: Instance) -> Vec<Instance> {
        self.combat
            .sessions
            .values()
            .filter(|s| s.target == target)
            .map(|s| s.attacker)
            .collect()
    }

    /// Cuts every combat relation of an entity that is leaving the world.
    pub fn disengage(&mut self, instance: Instance) {
        self.stop_attack(instance);
        for hunter in self.sessions_targeting(instance) {
            self.stop_attack(hunter);
        }
        for entity in self.entities.iter_mut() {
            if let Some(c) = entity.character.as_mut() {
                c.attackers.remove(&instance);
                if c.target == Some(instance) {
                    c.target = None;
                }
            }
        }
    }

    /// Fires every session that is due this tick.
    pub fn resolve_combat(&mut self) {
        let tick = self.tick();
        let due: Vec<Instance> = self
            .combat
            .sessions
            .values()
            .filter(|s| s.next_attack <= tick)
            .map(|s| s.attacker)
            .collect();

        for attacker in due {
            self.fire(attacker, tick);
        }
    }

    fn fire(&mut self, attacker: Instance, tick: u64) {
        // An earlier firing this tick may have ended it.
        let Some(session) = self.combat.sessions.get(&attacker).copied() else {
            return;
        };
        let Some(a) = self.entities.get(attacker) else {
            self.combat.sessions.remove(&attacker);
            return;
        };
        let Some(ac) = a.character.as_ref().filter(|c| !c.is_dead()) else {
            self.stop_attack(attacker);
            return;
        };
        let (a_pos, a_region, a_kind) = (a.position, a.region, a.kind);
        let (range, interval, roam, spawn) = (ac.attack_range, ac.attack_interval, ac.roam_distance, ac.spawn);

        let target = session.target;
        let Some((t_pos, t_region)) = self
            .entities
            .get(target)
            .filter(|t| t.character.as_ref().map_or(false, |c| !c.is_dead()))
            .map(|t| (t.position, t.region))
        else {
            self.stop_attack(attacker);
            return;
        };
        if !self.regions.surrounding(a_region).contains(&t_region) {
            debug!(%attacker, %target, "Target out of sight");
            self.stop_attack(attacker);
            return;
        }

        if a_pos.distance(t_pos) > range {
            if a_kind == EntityKind::Mob {
                if a_pos.distance(spawn) > roam.saturating_mul(2) {
                    debug!(%attacker, %target, "Mob gave up the chase");
                    self.stop_attack(attacker);
                    return;
                }
                let step = a_pos.step_towards(t_pos);
                if step != t_pos && !self.grid.is_colliding(step.x, step.y) {
                    let _ = self.move_entity(attacker, step);
                }
            }
            return;
        }

        if let Some(s) = self.combat.sessions.get_mut(&attacker) {
            s.next_attack = tick + interval.max(1);
        }

        if session.initiator == Initiator::Player {
            if !self.pay_for_attack(attacker) {
                return;
            }
            self.events.push(WorldEvent::Attacked { attacker, target });
        }

        let damage = match (self.entities.character(attacker), self.entities.character(target)) {
            (Some(ac), Some(tc)) => self.combat.damage.roll(ac, tc, &mut self.combat.rng),
            _ => return,
        };
        self.hit(target, Some(attacker), damage, HitKind::Attack);
    }

    /// Consumes mana or an arrow. False skips the attack step.
    fn pay_for_attack(&mut self, attacker: Instance) -> bool {
        let Some(c) = self.entities.character_mut(attacker) else {
            return false;
        };
        match c.equipment.style {
            AttackStyle::Melee => true,
            AttackStyle::Magic => {
                let cost = c.equipment.mana_cost;
                if !c.has_mana_for_attack() {
                    debug!(%attacker, mana = c.mana.current, cost, "Not enough mana");
                    self.events.push(WorldEvent::ResourceShortage {
                        attacker,
                        resource: Resource::Mana,
                    });
                    return false;
                }
                if cost > 0 {
                    c.mana.current -= cost;
                    let points = points_of(attacker, c);
                    self.events.push(points);
                }
                true
            }
            AttackStyle::Archery => {
                if c.equipment.arrows == 0 {
                    debug!(%attacker, "Out of arrows");
                    self.events.push(WorldEvent::ResourceShortage {
                        attacker,
                        resource: Resource::Arrows,
                    });
                    return false;
                }
                c.equipment.arrows -= 1;
                true
            }
        }
    }

    /// Lands `damage` on a live character and runs everything a hit causes.
    pub fn hit(&mut self, target: Instance, attacker: Option<Instance>, damage: u32, kind: HitKind) {
        let Some(entity) = self.entities.get_mut(target) else {
            return;
        };
        let target_kind = entity.kind;
        let Some(c) = entity.character.as_mut().filter(|c| !c.is_dead()) else {
            return;
        };

        let applied = c.take_damage(attacker, damage);
        let remaining = c.hit_points;
        let idle = c.target.is_none();
        let thorns_level = c.equipment.thorns_level;
        let points = points_of(target, c);

        let observers = self.observers_of(target);
        self.events.push(WorldEvent::Damaged {
            target,
            attacker,
            amount: applied,
            kind,
            observers,
        });
        if target_kind == EntityKind::Player {
            self.events.push(points);
        }

        if remaining == 0 {
            self.die(target, attacker);
            return;
        }

        let Some(attacker) = attacker.filter(|_| kind == HitKind::Attack) else {
            return;
        };
        let attacker_kind = self.entities.get(attacker).map(|e| e.kind);

        if target_kind == EntityKind::Mob && idle && !self.combat.sessions.contains_key(&target) {
            debug!(mob = %target, %attacker, "Mob retaliates");
            self.engage(target, attacker, Initiator::Mob);
        }

        self.try_poison(target, attacker);

        if thorns_level > 0
            && target_kind == EntityKind::Player
            && attacker_kind == Some(EntityKind::Player)
        {
            self.thorns(target, attacker, applied, thorns_level);
        }
    }

    fn try_poison(&mut self, target: Instance, attacker: Instance) {
        let Some(spec) = self.entities.character(attacker).and_then(|c| c.inflicts_poison) else {
            return;
        };
        if self.entities.character(target).map_or(true, |c| c.poison.is_some()) {
            return;
        }
        if self.combat.rng.gen_range(0..100) >= self.config.poison_chance_percent {
            return;
        }
        if let Some(c) = self.entities.character_mut(target) {
            c.poison = Some(Poison {
                spec,
                source: Some(attacker),
                elapsed: 0,
            });
            debug!(%target, %attacker, "Poisoned");
            self.events.push(WorldEvent::Poisoned { instance: target });
        }
    }

    fn thorns(&mut self, wearer: Instance, attacker: Instance, damage: u32, level: u32) {
        if self.combat.rng.gen_range(0..100) >= self.config.thorns_chance_percent {
            return;
        }
        let reflected = (damage as u64 * level as u64 * self.config.thorns_percent_per_level as u64 / 100) as u32;
        if reflected == 0 {
            return;
        }
        debug!(%wearer, %attacker, reflected, "Thorns");
        self.hit(attacker, Some(wearer), reflected, HitKind::Thorns);
    }

    /// Death resolution. No-op for characters already resolved as dead.
    pub fn die(&mut self, victim: Instance, killer: Option<Instance>) {
        let Some(entity) = self.entities.get(victim) else {
            return;
        };
        let Some(c) = entity.character.as_ref().filter(|c| !c.dead) else {
            return;
        };
        let kind = entity.kind;
        let key = entity.key.clone();
        let max_hit_points = c.max_hit_points.max(1);
        let experience = c.experience;
        let killer = killer.filter(|k| self.entities.contains(*k));

        // Observers lose sight before the flag makes the victim invisible.
        self.announce_lost(victim);

        let (attackers, damage_table) = match self.entities.character_mut(victim) {
            Some(c) => {
                c.dead = true;
                c.hit_points = 0;
                c.status = Status::empty();
                c.poison = None;
                c.target = None;
                (
                    std::mem::take(&mut c.attackers),
                    std::mem::take(&mut c.damage_table),
                )
            }
            None => return,
        };
        self.combat.sessions.remove(&victim);

        let mut hunters = self.sessions_targeting(victim);
        hunters.extend(attackers.iter().copied());
        for hunter in hunters {
            if self.combat.session(hunter).map_or(false, |s| s.target == victim) {
                self.combat.sessions.remove(&hunter);
            }
            if let Some(c) = self.entities.character_mut(hunter) {
                if c.target == Some(victim) {
                    c.target = None;
                }
            }
        }
        for entity in self.entities.iter_mut() {
            if let Some(c) = entity.character.as_mut() {
                c.attackers.remove(&victim);
            }
        }

        let killer_kind = killer.and_then(|k| self.entities.get(k)).map(|e| e.kind);
        match (kind, killer, killer_kind) {
            (EntityKind::Player, Some(killer), Some(EntityKind::Player)) => {
                if let Some(c) = self.entities.character_mut(killer) {
                    c.stats.pvp_kills += 1;
                }
                if let Some(c) = self.entities.character_mut(victim) {
                    c.stats.pvp_deaths += 1;
                }
                self.events.push(WorldEvent::Killed {
                    killer,
                    victim,
                    victim_key: key.clone(),
                    victim_kind: kind,
                });
            }
            (EntityKind::Mob, _, _) => {
                for (player, damage) in &damage_table {
                    let share = (experience as u64 * *damage as u64 / max_hit_points as u64) as u32;
                    self.events.push(WorldEvent::KillCredit {
                        player: *player,
                        mob_key: key.clone(),
                        damage: *damage,
                        experience: share,
                    });
                }
                if let (Some(killer), Some(EntityKind::Player)) = (killer, killer_kind) {
                    if let Some(c) = self.entities.character_mut(killer) {
                        *c.stats.mob_kills.entry(key.clone()).or_insert(0) += 1;
                    }
                    self.events.push(WorldEvent::Killed {
                        killer,
                        victim,
                        victim_key: key.clone(),
                        victim_kind: kind,
                    });
                }
            }
            _ => {}
        }

        self.events.push(WorldEvent::Died {
            instance: victim,
            kind,
            killer,
        });
        info!(%victim, key = %key, killer = ?killer, "Died");

        match kind {
            EntityKind::Mob => {
                self.remove_silently(victim);
            }
            EntityKind::Player => {
                for pet in self.pets_of(victim) {
                    self.despawn(pet);
                }
            }
            _ => {}
        }
    }

    /// Lets aggressive mobs engage players standing in their region.
    pub fn aggro_sweep(&mut self) {
        for player in self.entities.instances_of(EntityKind::Player) {
            let Some(p) = self.entities.get(player) else {
                continue;
            };
            let Some(pc) = p.character.as_ref().filter(|c| !c.is_dead()) else {
                continue;
            };
            let Some(region) = self.regions.get(p.region) else {
                continue;
            };

            let mut engaged = Vec::new();
            for mob in region.entities.iter().copied() {
                let Some(m) = self.entities.get(mob).filter(|m| m.is_mob()) else {
                    continue;
                };
                let Some(mc) = m.character.as_ref() else {
                    continue;
                };
                if !self.combat.sessions.contains_key(&mob)
                    && self.combat.aggro.should_aggro(mc, m.position, pc, p.position)
                {
                    engaged.push(mob);
                }
            }

            for mob in engaged {
                debug!(%mob, %player, "Aggro");
                self.engage(mob, player, Initiator::Mob);
                self.events.push(WorldEvent::Aggro { mob, player });
            }
        }
    }

    /// Advances every active poison by one tick.
    pub fn tick_poison(&mut self) {
        let poisoned: Vec<Instance> = self
            .entities
            .iter()
            .filter(|e| {
                e.character
                    .as_ref()
                    .map_or(false, |c| c.poison.is_some() && !c.is_dead())
            })
            .map(|e| e.instance)
            .collect();

        for instance in poisoned {
            let Some(c) = self.entities.character_mut(instance) else {
                continue;
            };
            let Some(poison) = c.poison.as_mut() else {
                continue;
            };
            poison.elapsed += 1;
            let Poison { spec, source, elapsed } = *poison;
            let due = elapsed % spec.rate.max(1) == 0;
            let worn_off = elapsed >= spec.duration;
            if worn_off {
                c.poison = None;
            }

            if due {
                let source = source.filter(|s| self.entities.contains(*s));
                self.hit(instance, source, spec.damage, HitKind::Poison);
            }
            let alive = self.entities.living(instance).is_some();
            if worn_off && alive {
                debug!(%instance, "Poison wore off");
                self.events.push(WorldEvent::PoisonWornOff { instance });
            }
        }
    }

    /// Restores hit points and mana of everyone out of combat.
    pub fn regenerate(&mut self) {
        let idle: Vec<Instance> = self
            .entities
            .iter()
            .filter(|e| matches!(e.kind, EntityKind::Player | EntityKind::Mob))
            .filter(|e| e.character.as_ref().map_or(false, |c| !c.is_dead()))
            .map(|e| e.instance)
            .filter(|i| !self.is_engaged(*i))
            .collect();

        let (hp_regen, mana_regen) = (self.config.hp_regen, self.config.mana_regen);
        for instance in idle {
            let Some(entity) = self.entities.get_mut(instance) else {
                continue;
            };
            let is_player = entity.is_player();
            let Some(c) = entity.character.as_mut() else {
                continue;
            };
            let before = (c.hit_points, c.mana.current);
            c.heal(hp_regen);
            c.mana.current = (c.mana.current + mana_regen).min(c.mana.max);
            if c.hit_points == c.max_hit_points {
                c.damage_table.clear();
                c.attackers.clear();
            }
            if is_player && before != (c.hit_points, c.mana.current) {
                let points = points_of(instance, c);
                self.events.push(points);
            }
        }
    }

    /// Walks idle mobs that strayed too far one step back towards spawn.
    pub fn loiter(&mut self) {
        let strays: Vec<(Instance, Position, Position)> = self
            .entities
            .iter()
            .filter(|e| e.is_mob())
            .filter_map(|e| {
                let c = e.character.as_ref()?;
                (!c.is_dead() && c.target.is_none() && e.position.distance(c.spawn) > c.roam_distance)
                    .then_some((e.instance, e.position, c.spawn))
            })
            .collect();

        for (mob, at, spawn) in strays {
            if self.is_engaged(mob) {
                continue;
            }
            let _ = self.move_entity(mob, at.step_towards(spawn));
        }
    }
}

fn points_of(instance: Instance, c: &Character) -> WorldEvent {
    WorldEvent::PointsChanged {
        instance,
        hit_points: c.hit_points,
        max_hit_points: c.max_hit_points,
        mana: c.mana.current,
        max_mana: c.mana.max,
    }
}
