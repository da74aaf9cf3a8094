//! Region visibility as seen by connected players.

use realm_shared::{entity::Character, packet::Packet, position::Position};
use realm_tests::{despawns_of, field, init_tracing, player_at, realm_with, spawns_of, walk, RecordingHooks};

#[test]
fn crossing_into_view_spawns_once_and_leaving_despawns_once() {
    init_tracing();
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    let bob = player_at(&mut realm, "bob", Position::new(60, 5), Character::new(100));
    realm.take_outbox();

    walk(&mut realm, bob, Position::new(20, 5));
    let out = realm.take_outbox();
    assert_eq!(spawns_of(&out, alice, bob), 1);
    assert_eq!(spawns_of(&out, bob, alice), 1);
    assert_eq!(despawns_of(&out, alice, bob), 0);
    let movements = out
        .to(alice)
        .iter()
        .filter(|p| matches!(p, Packet::Movement { instance, .. } if *instance == bob))
        .count();
    assert_eq!(movements, 11);

    walk(&mut realm, bob, Position::new(60, 5));
    let out = realm.take_outbox();
    assert_eq!(spawns_of(&out, alice, bob), 0);
    assert_eq!(despawns_of(&out, alice, bob), 1);
    assert_eq!(despawns_of(&out, bob, alice), 1);

    assert!(realm.world().verify().is_ok());
}

#[test]
fn pacing_on_a_region_border_never_duplicates() {
    init_tracing();
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    let bob = player_at(&mut realm, "bob", Position::new(33, 5), Character::new(100));
    realm.take_outbox();

    // x = 32 starts region column 2, outside alice's neighborhood.
    let mut spawns = 0;
    let mut despawns = 0;
    for _ in 0..5 {
        walk(&mut realm, bob, Position::new(31, 5));
        walk(&mut realm, bob, Position::new(32, 5));
        let out = realm.take_outbox();
        spawns += spawns_of(&out, alice, bob);
        despawns += despawns_of(&out, alice, bob);
        assert!(!realm.world().can_see(alice, bob));
    }
    assert_eq!((spawns, despawns), (5, 5));
}

#[test]
fn leaving_player_disappears_for_everyone_nearby() {
    init_tracing();
    let hooks = RecordingHooks::default();
    let mut realm = realm_with(&field(), hooks.clone());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    let bob = player_at(&mut realm, "bob", Position::new(8, 5), Character::new(100));
    let carol = player_at(&mut realm, "carol", Position::new(60, 30), Character::new(100));
    realm.take_outbox();

    realm.leave(bob);
    let out = realm.take_outbox();
    assert_eq!(despawns_of(&out, alice, bob), 1);
    assert_eq!(despawns_of(&out, carol, bob), 0);
    assert!(!realm.world().entities.contains(bob));
    assert_eq!(hooks.state().saves, vec![bob]);
    assert!(realm.world().verify().is_ok());
}

#[test]
fn teleport_reports_both_sides_of_the_jump() {
    init_tracing();
    let mut realm = realm_with(&field(), RecordingHooks::default());
    let alice = player_at(&mut realm, "alice", Position::new(5, 5), Character::new(100));
    let bob = player_at(&mut realm, "bob", Position::new(6, 5), Character::new(100));
    let carol = player_at(&mut realm, "carol", Position::new(60, 30), Character::new(100));
    realm.take_outbox();

    realm.world_mut().teleport(bob, Position::new(59, 30)).unwrap();
    realm.tick();
    let out = realm.take_outbox();
    assert_eq!(despawns_of(&out, alice, bob), 1);
    assert_eq!(spawns_of(&out, carol, bob), 1);
    assert_eq!(spawns_of(&out, bob, carol), 1);
    assert!(out
        .to(bob)
        .iter()
        .any(|p| matches!(p, Packet::Teleport { instance, position } if *instance == bob && *position == Position::new(59, 30))));
}
