//! Realm driver: one world, its dispatcher and the tick pipeline.
//!
//! Each tick runs, in order:
//! 1. queued intents, then followers step
//! 2. combat resolution and poison
//! 3. aggro sweep (every `aggro_interval` ticks)
//! 4. regeneration (every `regen_interval` ticks)
//! 5. housekeeping: loiter and cheat-score decay (every `housekeeping_interval` ticks)
//! 6. event dispatch into the outbox
//!
//! The realm is transport-agnostic: the server drains [`Realm::take_outbox`]
//! after every tick, tests read it directly.

use std::collections::VecDeque;

use realm_shared::{
    config::WorldConfig,
    entity::{Character, Instance},
    hooks::GameHooks,
    intent::{Intent, QueuedIntent},
    map::{MapData, MapError},
    packet::{Outbox, PacketSink},
    world::{MoveError, World},
};
use tracing::{debug, error, warn};

use crate::{handler::Handler, scheduler::TickScheduler};

pub struct Realm {
    world: World,
    handler: Handler,
    scheduler: TickScheduler,
    intents: VecDeque<QueuedIntent>,
    outbox: Outbox,
}

impl Realm {
    pub fn new(config: WorldConfig, map: &MapData, hooks: Box<dyn GameHooks>) -> Result<Self, MapError> {
        let scheduler = TickScheduler::new(&config);
        Ok(Self {
            world: World::new(config, map)?,
            handler: Handler::new(hooks),
            scheduler,
            intents: VecDeque::new(),
            outbox: Outbox::default(),
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn take_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    /// Spawns a new player with default stats.
    pub fn join(&mut self, username: &str) -> Result<Instance, MoveError> {
        self.join_with(username, Character::new(100))
    }

    pub fn join_with(&mut self, username: &str, character: Character) -> Result<Instance, MoveError> {
        let player = self
            .handler
            .join(&mut self.world, &mut self.outbox, username, character)?;
        self.handler.dispatch(&mut self.world, &mut self.outbox);
        Ok(player)
    }

    /// Removes a player whose connection closed.
    pub fn leave(&mut self, player: Instance) {
        self.handler.leave(&mut self.world, player);
        self.handler.dispatch(&mut self.world, &mut self.outbox);
    }

    /// Disconnects a player from the server side.
    pub fn kick(&mut self, player: Instance, reason: &str) -> bool {
        if self.handler.session(player).is_none() {
            return false;
        }
        self.outbox.disconnect(player, reason);
        self.leave(player);
        true
    }

    /// Brings a dead player back at the map spawn point.
    pub fn respawn(&mut self, player: Instance) -> Result<(), MoveError> {
        let spawn = self.world.spawn_point();
        self.world.respawn(player, spawn)?;
        self.handler.dispatch(&mut self.world, &mut self.outbox);
        Ok(())
    }

    pub fn adopt_pet(&mut self, player: Instance, key: &str) -> Option<Instance> {
        let pet = self.handler.adopt_pet(&mut self.world, player, key);
        self.handler.dispatch(&mut self.world, &mut self.outbox);
        pet
    }

    /// Queues an intent for the next tick. Malformed intents are dropped.
    pub fn queue(&mut self, player: Instance, intent: Intent) -> bool {
        if !intent.is_well_formed() {
            warn!(%player, ?intent, "Malformed intent dropped");
            return false;
        }
        self.intents.push_back(QueuedIntent { player, intent });
        true
    }

    /// Runs one tick.
    pub fn tick(&mut self) {
        let tick = self.scheduler.ticks();
        let due = self.scheduler.due();
        self.world.begin_tick(tick);

        while let Some(intent) = self.intents.pop_front() {
            self.handler
                .apply_intent(&mut self.world, &mut self.outbox, intent);
        }
        self.world.advance_followers();

        self.world.resolve_combat();
        self.world.tick_poison();

        if due.aggro {
            self.world.aggro_sweep();
        }
        if due.regen {
            self.world.regenerate();
        }
        if due.housekeeping {
            self.world.loiter();
            self.handler.housekeeping();
        }

        self.handler.dispatch(&mut self.world, &mut self.outbox);

        let dropped: Vec<Instance> = self
            .outbox
            .disconnects
            .iter()
            .map(|(player, _)| *player)
            .filter(|player| self.handler.session(*player).is_some())
            .collect();
        for player in dropped {
            self.leave(player);
        }

        if cfg!(debug_assertions) {
            if let Err(violation) = self.world.verify() {
                error!(tick, %violation, "Region invariant broken at tick boundary");
                panic!("region invariant violated: {violation}");
            }
        }

        debug!(tick, packets = self.outbox.packets.len(), "Tick done");
        self.scheduler.advance();
    }

    /// Human-readable summary for the console.
    pub fn status(&self) -> Vec<String> {
        let mut out = vec![
            format!("Tick: {}", self.scheduler.ticks()),
            format!("Entities: {}", self.world.entities.len()),
            format!("Combat sessions: {}", self.world.combat.len()),
            format!("Players: {}", self.handler.sessions().count()),
        ];
        for session in self.handler.sessions() {
            let position = self
                .world
                .entities
                .get(session.player)
                .map(|e| format!("({}, {})", e.position.x, e.position.y))
                .unwrap_or_else(|| "?".to_string());
            out.push(format!(
                "  {} {}: at {} cheat={}",
                session.player, session.username, position, session.cheat_score
            ));
        }
        out
    }
}
