//! Scenario runner.
//!
//! Plays a handful of scripted sessions against an in-process realm and
//! prints a pass/fail summary. Exits non-zero when any scenario fails.
//!
//! Usage:
//!   cargo run -p realm_tests --bin scenario_runner [filter]

use std::time::{Duration, Instant};

use anyhow::{ensure, Context};
use realm_shared::{
    entity::Character,
    intent::Intent,
    map::Door,
    packet::Packet,
    position::Position,
};
use realm_tests::{
    armed, despawns_of, field, init_tracing, notices, player_at, rat, realm_with, spawns_of, walk, RecordingHooks,
    ScriptedDamage,
};

type Scenario = fn() -> anyhow::Result<()>;

struct Outcome {
    name: &'static str,
    result: anyhow::Result<()>,
    duration: Duration,
}

fn main() {
    init_tracing();
    let filter = std::env::args().nth(1).unwrap_or_default();

    println!("Realm Scenario Runner");
    println!("=====================\n");

    let scenarios: [(&'static str, Scenario); 5] = [
        ("border crossing", border_crossing),
        ("shared kill", shared_kill),
        ("locked door", locked_door),
        ("cheat disconnect", cheat_disconnect),
        ("pet resync", pet_resync),
    ];

    let mut outcomes = Vec::new();
    for (name, run) in scenarios.into_iter().filter(|(name, _)| name.contains(filter.as_str())) {
        let started = Instant::now();
        let result = run();
        let duration = started.elapsed();
        match &result {
            Ok(()) => println!("  ✓ {name} ({:.1} ms)", duration.as_secs_f64() * 1000.0),
            Err(e) => println!("  ✗ {name}: {e:#}"),
        }
        outcomes.push(Outcome { name, result, duration });
    }

    let failed: Vec<&Outcome> = outcomes.iter().filter(|o| o.result.is_err()).collect();
    let total: Duration = outcomes.iter().map(|o| o.duration).sum();
    println!("\n=====================");
    println!("Total:    {}", outcomes.len());
    println!("Passed:   {}", outcomes.len() - failed.len());
    println!("Failed:   {}", failed.len());
    println!("Duration: {:.2}s", total.as_secs_f64());

    if !failed.is_empty() {
        for o in failed {
            eprintln!("FAILED {}", o.name);
        }
        std::process::exit(1);
    }
}

/// Two players approach and part; each sees the other appear and vanish once.
fn border_crossing() -> anyhow::Result<()> {
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    let bob = player_at(&mut realm, "bob", Position::new(60, 30), Character::new(100));
    realm.take_outbox();

    walk(&mut realm, bob, Position::new(6, 6));
    walk(&mut realm, bob, Position::new(60, 30));
    let out = realm.take_outbox();
    ensure!(spawns_of(&out, alice, bob) == 1, "alice saw bob spawn {} times", spawns_of(&out, alice, bob));
    ensure!(despawns_of(&out, alice, bob) == 1, "alice saw bob leave {} times", despawns_of(&out, alice, bob));
    realm.world().verify().context("region invariant")?;
    Ok(())
}

/// Two players split a kill; experience follows the damage table.
fn shared_kill() -> anyhow::Result<()> {
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&field(), hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), armed(100));
    let bob = player_at(&mut realm, "bob", Position::new(7, 5), armed(100));
    let mob = realm.world_mut().spawn_mob(&rat(6, 5, 100))?;
    realm
        .world_mut()
        .combat
        .set_damage_model(Box::new(ScriptedDamage::new(&[30, 30, 30, 30])));

    realm.queue(alice, Intent::Attack { target: mob });
    realm.queue(bob, Intent::Attack { target: mob });
    for _ in 0..10 {
        realm.tick();
    }

    ensure!(!realm.world().entities.contains(mob), "mob survived");
    let mut credits = hooks.state().credits.clone();
    credits.sort();
    ensure!(
        credits == vec![(alice, "rat".to_string(), 60, 6), (bob, "rat".to_string(), 40, 4)],
        "unexpected credit {credits:?}"
    );
    Ok(())
}

/// A key door refuses, then opens and eats the key.
fn locked_door() -> anyhow::Result<()> {
    let mut map = field();
    let mut door = Door::new(1, Position::new(10, 10), Position::new(50, 30));
    door.req_item = Some("key".to_string());
    map.doors.push(door);
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&map, hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(10, 10), Character::new(100));

    realm.queue(alice, Intent::Door { door: 1 });
    realm.tick();
    hooks.state().items.insert("key".to_string(), 1);
    realm.queue(alice, Intent::Door { door: 1 });
    realm.tick();

    let out = realm.take_outbox();
    let seen = notices(&out, alice);
    ensure!(seen.len() == 2, "expected two notices, got {seen:?}");
    let at = realm.world().entities.get(alice).map(|e| e.position);
    ensure!(at == Some(Position::new(50, 30)), "player ended at {at:?}");
    Ok(())
}

/// A flood of impossible steps sends the player home and drops them.
fn cheat_disconnect() -> anyhow::Result<()> {
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    for _ in 0..20 {
        realm.queue(alice, Intent::Move { x: 60, y: 30 });
    }
    realm.tick();
    let out = realm.take_outbox();
    ensure!(
        out.disconnects == vec![(alice, "cheating".to_string())],
        "disconnects: {:?}",
        out.disconnects
    );
    ensure!(!realm.world().entities.contains(alice), "cheater still in the world");
    Ok(())
}

/// A teleporting owner gets their pet back next to them.
fn pet_resync() -> anyhow::Result<()> {
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    let pet = realm.adopt_pet(alice, "cat").context("adopt pet")?;
    realm.world_mut().teleport(alice, Position::new(50, 30))?;
    realm.tick();

    let pets = realm.world().pets_of(alice);
    ensure!(pets.len() == 1 && pets[0] != pet, "pets after jump: {pets:?}");
    let out = realm.take_outbox();
    ensure!(
        out.to(alice)
            .iter()
            .any(|p| matches!(p, Packet::Spawn(s) if s.instance == pets[0])),
        "owner never saw the new pet"
    );
    Ok(())
}
