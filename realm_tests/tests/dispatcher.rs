//! Intents, doors, dialogue, pets and cheat handling end to end.

use realm_server::Realm;
use realm_shared::{
    entity::{Character, Instance},
    hooks::TriggerOutcome,
    intent::Intent,
    map::{Door, MapData, NpcRoleDef, NpcSpawn},
    packet::{NpcAction, Packet},
    position::Position,
};
use realm_tests::{
    armed, field, init_tracing, notices, player_at, realm_with, walk, RecordingHooks, ScriptedDamage,
};

fn position(realm: &Realm, instance: Instance) -> Position {
    realm.world().entities.get(instance).unwrap().position
}

fn npc(realm: &Realm, key: &str) -> Instance {
    realm
        .world()
        .entities
        .iter()
        .find(|e| e.key == key)
        .map(|e| e.instance)
        .unwrap()
}

fn npc_actions(realm: &mut Realm, player: Instance) -> Vec<NpcAction> {
    realm
        .take_outbox()
        .to(player)
        .into_iter()
        .filter_map(|p| match p {
            Packet::Npc { action, .. } => Some(action.clone()),
            _ => None,
        })
        .collect()
}

fn door_map(door: Door) -> MapData {
    let mut map = field();
    map.doors.push(door);
    map
}

#[test]
fn locked_door_needs_a_key_which_it_consumes() {
    init_tracing();
    let mut door = Door::new(1, Position::new(10, 10), Position::new(50, 30));
    door.req_item = Some("rusty_key".to_string());
    door.achievement = Some("explorer".to_string());
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&door_map(door), hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(10, 11), Character::new(100));
    realm.take_outbox();

    realm.queue(alice, Intent::Door { door: 1 });
    realm.tick();
    let out = realm.take_outbox();
    assert_eq!(
        notices(&out, alice),
        vec!["This door is locked and you do not have the key.".to_string()]
    );
    assert_eq!(position(&realm, alice), Position::new(10, 11));
    assert!(hooks.state().achievements_finished.is_empty());

    hooks.state().items.insert("rusty_key".to_string(), 1);
    realm.queue(alice, Intent::Door { door: 1 });
    realm.tick();
    let out = realm.take_outbox();
    assert_eq!(notices(&out, alice), vec!["The key crumbles to dust.".to_string()]);
    assert_eq!(position(&realm, alice), Position::new(50, 30));
    let state = hooks.state();
    assert_eq!(state.items.get("rusty_key"), Some(&0));
    assert!(state.achievements_finished.contains("explorer"));
}

#[test]
fn level_is_checked_before_the_quest_trigger() {
    init_tracing();
    let mut door = Door::new(2, Position::new(10, 10), Position::new(50, 30));
    door.level = Some(3);
    door.quest = Some("lost_cat".to_string());
    let hooks = RecordingHooks::default();
    hooks.state().door_outcome = TriggerOutcome::Notify("The guard waves you off.".to_string());
    let mut realm = realm_with(&door_map(door), hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(10, 10), Character::new(100));
    realm.take_outbox();

    realm.queue(alice, Intent::Door { door: 2 });
    realm.tick();
    let out = realm.take_outbox();
    assert_eq!(
        notices(&out, alice),
        vec!["You need to be level 3 to pass through this door.".to_string()]
    );
    assert_eq!(hooks.state().door_calls, 0);

    realm.world_mut().entities.character_mut(alice).unwrap().level = 3;
    realm.queue(alice, Intent::Door { door: 2 });
    realm.tick();
    let out = realm.take_outbox();
    assert_eq!(notices(&out, alice), vec!["The guard waves you off.".to_string()]);
    assert_eq!(position(&realm, alice), Position::new(10, 10));

    hooks.state().door_outcome = TriggerOutcome::Teleport(Position::new(40, 20));
    realm.queue(alice, Intent::Door { door: 2 });
    realm.tick();
    assert_eq!(position(&realm, alice), Position::new(40, 20));
    assert_eq!(hooks.state().door_calls, 2);
}

#[test]
fn quest_and_achievement_requirements_block_the_door() {
    init_tracing();
    let mut door = Door::new(3, Position::new(10, 10), Position::new(50, 30));
    door.req_achievement = Some("brave".to_string());
    door.req_quest = Some("dragon".to_string());
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&door_map(door), hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(9, 9), Character::new(100));
    realm.take_outbox();

    realm.queue(alice, Intent::Door { door: 3 });
    realm.tick();
    hooks.state().achievements_finished.insert("brave".to_string());
    realm.queue(alice, Intent::Door { door: 3 });
    realm.tick();
    hooks.state().quests_finished.insert("dragon".to_string());
    realm.queue(alice, Intent::Door { door: 3 });
    realm.tick();

    let out = realm.take_outbox();
    assert_eq!(
        notices(&out, alice),
        vec![
            "You need to complete the achievement brave to pass through this door.".to_string(),
            "You need to complete the quest dragon to pass through this door.".to_string(),
        ]
    );
    assert_eq!(position(&realm, alice), Position::new(50, 30));
}

#[test]
fn npcs_answer_by_role() {
    init_tracing();
    let mut map = field();
    map.npcs.push(NpcSpawn {
        key: "elder".to_string(),
        position: Position::new(11, 10),
        role: NpcRoleDef::Talker {
            lines: vec!["Hello.".to_string(), "Go away.".to_string()],
        },
    });
    map.npcs.push(NpcSpawn {
        key: "banker".to_string(),
        position: Position::new(9, 10),
        role: NpcRoleDef::Banker,
    });
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&map, hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(10, 10), Character::new(100));
    let (elder, banker) = (npc(&realm, "elder"), npc(&realm, "banker"));
    realm.take_outbox();

    for _ in 0..3 {
        realm.queue(alice, Intent::Talk { npc: elder });
    }
    realm.queue(alice, Intent::Talk { npc: banker });
    realm.tick();
    assert_eq!(
        npc_actions(&mut realm, alice),
        vec![
            NpcAction::Talk { text: "Hello.".to_string() },
            NpcAction::Talk { text: "Go away.".to_string() },
            NpcAction::Talk { text: "Hello.".to_string() },
            NpcAction::Bank,
        ]
    );

    hooks.state().talk_outcome = TriggerOutcome::Notify("The elder is busy.".to_string());
    realm.queue(alice, Intent::Talk { npc: elder });
    realm.tick();
    let out = realm.take_outbox();
    assert_eq!(notices(&out, alice), vec!["The elder is busy.".to_string()]);
    assert!(!out.to(alice).iter().any(|p| matches!(p, Packet::Npc { .. })));

    hooks.state().talk_outcome = TriggerOutcome::Continue;
    walk(&mut realm, alice, Position::new(10, 20));
    realm.queue(alice, Intent::Talk { npc: elder });
    realm.tick();
    assert!(npc_actions(&mut realm, alice).is_empty());
}

#[test]
fn the_dead_cannot_talk_or_use_doors() {
    init_tracing();
    let mut map = door_map(Door::new(1, Position::new(10, 11), Position::new(50, 30)));
    map.npcs.push(NpcSpawn {
        key: "banker".to_string(),
        position: Position::new(9, 10),
        role: NpcRoleDef::Banker,
    });
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&map, hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(10, 10), Character::new(100));
    let banker = npc(&realm, "banker");
    realm.world_mut().die(alice, None);
    realm.tick();
    realm.take_outbox();

    realm.queue(alice, Intent::Talk { npc: banker });
    realm.queue(alice, Intent::Door { door: 1 });
    realm.tick();
    assert!(npc_actions(&mut realm, alice).is_empty());
    assert_eq!(position(&realm, alice), Position::new(10, 10));
    assert_eq!(hooks.state().door_calls, 0);
    assert_eq!(realm.handler().session(alice).unwrap().cheat_score, 0);
}

#[test]
fn pets_trail_their_owner_and_resync_after_a_jump() {
    init_tracing();
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    let pet = realm.adopt_pet(alice, "dog").unwrap();

    walk(&mut realm, alice, Position::new(10, 5));
    realm.tick();
    assert!(position(&realm, pet).distance(Position::new(10, 5)) <= 1);

    realm.world_mut().teleport(alice, Position::new(50, 30)).unwrap();
    realm.tick();
    let pets = realm.world().pets_of(alice);
    assert_eq!(pets.len(), 1);
    assert_ne!(pets[0], pet);
    assert!(!realm.world().entities.contains(pet));
    assert_eq!(position(&realm, pets[0]), Position::new(50, 30));
    assert_eq!(realm.handler().session(alice).unwrap().pet, Some(pets[0]));
}

#[test]
fn cheaters_are_sent_home_and_dropped() {
    init_tracing();
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&field(), hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    realm.take_outbox();

    for _ in 0..16 {
        realm.queue(alice, Intent::Move { x: 0, y: 0 });
    }
    realm.tick();

    let out = realm.take_outbox();
    assert_eq!(out.disconnects, vec![(alice, "cheating".to_string())]);
    assert!(!realm.world().entities.contains(alice));
    assert!(realm.handler().session(alice).is_none());
    assert_eq!(hooks.state().saves, vec![alice]);
}

#[test]
fn cheater_cannot_act_for_the_rest_of_the_tick() {
    init_tracing();
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let spawn = realm.world().spawn_point();
    let mallory = player_at(&mut realm, "mallory", Position::new(5, 5), armed(100));
    let bob = player_at(&mut realm, "bob", Position::new(spawn.x + 2, spawn.y), Character::new(100));
    realm
        .world_mut()
        .combat
        .set_damage_model(Box::new(ScriptedDamage::new(&[30])));
    realm.take_outbox();

    for _ in 0..16 {
        realm.queue(mallory, Intent::Move { x: 0, y: 0 });
    }
    realm.queue(mallory, Intent::Move { x: spawn.x + 1, y: spawn.y });
    realm.queue(mallory, Intent::Attack { target: bob });
    realm.tick();
    realm.tick();

    let out = realm.take_outbox();
    assert_eq!(out.disconnects, vec![(mallory, "cheating".to_string())]);
    let moved = out
        .to(bob)
        .iter()
        .filter(|p| matches!(p, Packet::Movement { instance, .. } if *instance == mallory))
        .count();
    assert_eq!(moved, 0);
    assert!(!out
        .to(bob)
        .iter()
        .any(|p| matches!(p, Packet::Damage { instance, .. } if *instance == bob)));
    assert_eq!(realm.world().entities.character(bob).unwrap().hit_points, 100);
    assert!(!realm.world().is_engaged(bob));
}

#[test]
fn a_few_bad_steps_are_forgiven() {
    init_tracing();
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));

    for _ in 0..10 {
        realm.queue(alice, Intent::Move { x: 0, y: 0 });
    }
    realm.tick();
    assert_eq!(realm.handler().session(alice).unwrap().cheat_score, 10);

    // Housekeeping runs every 32 ticks and forgets the score.
    while realm.scheduler().ticks() % 32 != 0 {
        realm.tick();
    }
    realm.tick();
    assert_eq!(realm.handler().session(alice).unwrap().cheat_score, 0);
    assert!(realm.take_outbox().disconnects.is_empty());
}

#[test]
fn kicked_players_are_removed() {
    init_tracing();
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));

    assert!(realm.kick(alice, "kicked"));
    assert!(!realm.kick(alice, "kicked"));
    assert_eq!(realm.outbox().disconnects, vec![(alice, "kicked".to_string())]);
    assert!(!realm.world().entities.contains(alice));
}
