//! Region manager.
//!
//! The map is cut into fixed-size rectangular regions. Each region knows the
//! entities inside it and the players subscribed to it, where a player is
//! subscribed to every region in the neighborhood of the region it stands in
//! (its own region plus `radius` regions in every direction, clipped at the
//! map edge). Visibility work is bounded by only ever diffing neighborhoods.
//!
//! Input is assumed validated: positions handed in are in bounds. An entity
//! found in zero or several regions means the bookkeeping is broken, and
//! every visibility guarantee with it, so that is fatal.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    entity::{Entity, Instance, RegionId, Registry},
    position::{Position, Rect},
};

/// A light source shown to players through the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub id: u32,
    pub position: Position,
    pub radius: u32,
    pub colour: String,
}

/// One spatial partition.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub bounds: Rect,
    pub entities: BTreeSet<Instance>,
    /// Players whose neighborhood includes this region.
    pub players: BTreeSet<Instance>,
    pub lights: Vec<Light>,
}

/// Visibility diff for a player whose neighborhood changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub entered: Vec<RegionId>,
    pub left: Vec<RegionId>,
    /// Entities in entered regions, excluding the player.
    pub spawned: Vec<Instance>,
    /// Entities in left regions, excluding the player.
    pub despawned: Vec<Instance>,
}

/// Result of moving an entity into a different region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionChange {
    pub old: RegionId,
    pub new: RegionId,
    /// Players that could not see the entity before and now can.
    pub observers_gained: Vec<Instance>,
    /// Players that could see the entity before and now cannot.
    pub observers_lost: Vec<Instance>,
    /// Regions of the old neighborhood that are not in the new one.
    pub regions_left: Vec<RegionId>,
    /// Set when the entity is a player.
    pub subscription: Option<SubscriptionDiff>,
}

/// Broken region bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Entity is in no region.
    Missing { instance: Instance },
    /// Entity is in more than one region.
    Duplicate { instance: Instance, regions: Vec<RegionId> },
    /// Entity's recorded region disagrees with membership or position.
    Misplaced { instance: Instance, region: RegionId },
    /// A region holds an instance the registry does not know.
    Stale { instance: Instance, region: RegionId },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::Missing { instance } => {
                write!(f, "entity {instance} is in no region")
            }
            InvariantViolation::Duplicate { instance, regions } => {
                write!(f, "entity {instance} is in regions {regions:?}")
            }
            InvariantViolation::Misplaced { instance, region } => {
                write!(f, "entity {instance} is misplaced in region {region}")
            }
            InvariantViolation::Stale { instance, region } => {
                write!(f, "region {region} holds unknown entity {instance}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

fn fatal(violation: InvariantViolation) -> ! {
    error!(%violation, "region invariant violated");
    panic!("region invariant violated: {violation}");
}

#[derive(Debug, Clone)]
pub struct RegionManager {
    region_width: i32,
    region_height: i32,
    columns: i32,
    rows: i32,
    radius: i32,
    regions: Vec<Region>,
}

impl RegionManager {
    /// Partitions a `map_width` x `map_height` map. Regions on the right and
    /// bottom edges may be smaller than the nominal size.
    pub fn new(map_width: i32, map_height: i32, region_width: i32, region_height: i32, radius: i32) -> Self {
        let region_width = region_width.max(1);
        let region_height = region_height.max(1);
        let columns = (map_width.max(1) + region_width - 1) / region_width;
        let rows = (map_height.max(1) + region_height - 1) / region_height;

        let mut regions = Vec::with_capacity((columns * rows) as usize);
        for ry in 0..rows {
            for rx in 0..columns {
                let x = rx * region_width;
                let y = ry * region_height;
                regions.push(Region {
                    id: (ry * columns + rx) as RegionId,
                    bounds: Rect {
                        x,
                        y,
                        width: region_width.min(map_width - x),
                        height: region_height.min(map_height - y),
                    },
                    entities: BTreeSet::new(),
                    players: BTreeSet::new(),
                    lights: Vec::new(),
                });
            }
        }

        Self {
            region_width,
            region_height,
            columns,
            rows,
            radius: radius.max(0),
            regions,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Region containing `pos`, or `None` outside the map.
    pub fn region_at(&self, pos: Position) -> Option<RegionId> {
        if pos.x < 0 || pos.y < 0 {
            return None;
        }
        let rx = pos.x / self.region_width;
        let ry = pos.y / self.region_height;
        if rx >= self.columns || ry >= self.rows {
            return None;
        }
        let id = (ry * self.columns + rx) as RegionId;
        self.regions[id].bounds.contains(pos).then_some(id)
    }

    /// Invokes `f` for every region in the neighborhood of `id`, row-major,
    /// including `id` itself. Edge regions have fewer neighbors.
    pub fn for_each_surrounding_region(&self, id: RegionId, mut f: impl FnMut(RegionId)) {
        if id >= self.regions.len() {
            return;
        }
        let rx = id as i32 % self.columns;
        let ry = id as i32 / self.columns;
        for y in (ry - self.radius)..=(ry + self.radius) {
            if y < 0 || y >= self.rows {
                continue;
            }
            for x in (rx - self.radius)..=(rx + self.radius) {
                if x < 0 || x >= self.columns {
                    continue;
                }
                f((y * self.columns + x) as RegionId);
            }
        }
    }

    pub fn surrounding(&self, id: RegionId) -> Vec<RegionId> {
        let mut out = Vec::new();
        self.for_each_surrounding_region(id, |r| out.push(r));
        out
    }

    /// Places a light in the region containing it.
    pub fn add_light(&mut self, light: Light) {
        if let Some(id) = self.region_at(light.position) {
            self.regions[id].lights.push(light);
        }
    }

    /// Players subscribed to `id`, minus `except`.
    pub fn observers(&self, id: RegionId, except: Instance) -> Vec<Instance> {
        self.regions
            .get(id)
            .map(|r| r.players.iter().copied().filter(|p| *p != except).collect())
            .unwrap_or_default()
    }

    /// Registers a freshly spawned entity and, for players, subscribes them
    /// to their neighborhood. Sets `entity.region`.
    pub fn add(&mut self, entity: &mut Entity) -> (RegionId, Option<SubscriptionDiff>) {
        let Some(id) = self.region_at(entity.position) else {
            fatal(InvariantViolation::Missing { instance: entity.instance });
        };
        if !self.regions[id].entities.insert(entity.instance) {
            fatal(InvariantViolation::Duplicate {
                instance: entity.instance,
                regions: vec![id],
            });
        }
        entity.region = id;

        let diff = entity.is_player().then(|| {
            let mut diff = SubscriptionDiff::default();
            for r in self.surrounding(id) {
                self.enter(entity.instance, r, &mut diff);
            }
            diff
        });
        (id, diff)
    }

    /// Removes an entity from its region and drops any subscriptions it had.
    pub fn remove(&mut self, entity: &Entity) {
        if !self.regions[entity.region].entities.remove(&entity.instance) {
            fatal(InvariantViolation::Missing { instance: entity.instance });
        }
        if entity.is_player() {
            for r in self.surrounding(entity.region) {
                self.regions[r].players.remove(&entity.instance);
            }
        }
    }

    /// Re-evaluates the entity's region after a position change. Returns
    /// `None` when the region did not change.
    pub fn handle(&mut self, entity: &mut Entity) -> Option<RegionChange> {
        let Some(new) = self.region_at(entity.position) else {
            fatal(InvariantViolation::Misplaced {
                instance: entity.instance,
                region: entity.region,
            });
        };
        let old = entity.region;
        if new == old {
            return None;
        }

        let instance = entity.instance;
        if !self.regions[old].entities.remove(&instance) {
            fatal(InvariantViolation::Missing { instance });
        }
        if !self.regions[new].entities.insert(instance) {
            fatal(InvariantViolation::Duplicate {
                instance,
                regions: vec![old, new],
            });
        }
        entity.region = new;

        let before = &self.regions[old].players;
        let after = &self.regions[new].players;
        let observers_gained = after
            .difference(before)
            .copied()
            .filter(|p| *p != instance)
            .collect();
        let observers_lost = before
            .difference(after)
            .copied()
            .filter(|p| *p != instance)
            .collect();

        let old_hood = self.surrounding(old);
        let new_hood = self.surrounding(new);
        let regions_left: Vec<RegionId> = old_hood
            .iter()
            .copied()
            .filter(|r| !new_hood.contains(r))
            .collect();

        let subscription = entity.is_player().then(|| {
            let mut diff = SubscriptionDiff::default();
            for r in &regions_left {
                self.leave(instance, *r, &mut diff);
            }
            for r in new_hood.iter().copied().filter(|r| !old_hood.contains(r)) {
                self.enter(instance, r, &mut diff);
            }
            diff
        });

        Some(RegionChange {
            old,
            new,
            observers_gained,
            observers_lost,
            regions_left,
            subscription,
        })
    }

    fn enter(&mut self, player: Instance, id: RegionId, diff: &mut SubscriptionDiff) {
        let region = &mut self.regions[id];
        region.players.insert(player);
        diff.entered.push(id);
        diff.spawned
            .extend(region.entities.iter().copied().filter(|e| *e != player));
    }

    fn leave(&mut self, player: Instance, id: RegionId, diff: &mut SubscriptionDiff) {
        let region = &mut self.regions[id];
        region.players.remove(&player);
        diff.left.push(id);
        diff.despawned
            .extend(region.entities.iter().copied().filter(|e| *e != player));
    }

    /// Checks that every entity is in exactly one region, that region is the
    /// one it records, and the region bounds contain its position.
    pub fn verify(&self, registry: &Registry) -> Result<(), InvariantViolation> {
        for region in &self.regions {
            if let Some(stale) = region.entities.iter().find(|i| !registry.contains(**i)) {
                return Err(InvariantViolation::Stale {
                    instance: *stale,
                    region: region.id,
                });
            }
        }

        for entity in registry.iter() {
            let holders: Vec<RegionId> = self
                .regions
                .iter()
                .filter(|r| r.entities.contains(&entity.instance))
                .map(|r| r.id)
                .collect();
            match holders.as_slice() {
                [] => return Err(InvariantViolation::Missing { instance: entity.instance }),
                [only] => {
                    if *only != entity.region || !self.regions[*only].bounds.contains(entity.position) {
                        return Err(InvariantViolation::Misplaced {
                            instance: entity.instance,
                            region: *only,
                        });
                    }
                }
                _ => {
                    return Err(InvariantViolation::Duplicate {
                        instance: entity.instance,
                        regions: holders,
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

    fn manager() -> RegionManager {
        // 4 x 3 regions of 16 x 12 tiles.
        RegionManager::new(64, 36, 16, 12, 1)
    }

    fn spawn(reg: &mut Registry, rm: &mut RegionManager, kind: EntityKind, x: i32, y: i32) -> Instance {
        let instance = reg.allocate();
        let mut e = Entity::new(instance, "e", kind, Position::new(x, y));
        rm.add(&mut e);
        reg.insert(e);
        instance
    }

    fn walk(reg: &mut Registry, rm: &mut RegionManager, who: Instance, x: i32, y: i32) -> Option<RegionChange> {
        let e = reg.get_mut(who).unwrap();
        e.position = Position::new(x, y);
        rm.handle(e)
    }

    #[test]
    fn region_lookup_and_edges() {
        let rm = manager();
        assert_eq!(rm.len(), 12);
        assert_eq!(rm.region_at(Position::new(0, 0)), Some(0));
        assert_eq!(rm.region_at(Position::new(17, 0)), Some(1));
        assert_eq!(rm.region_at(Position::new(17, 13)), Some(5));
        assert_eq!(rm.region_at(Position::new(64, 0)), None);
        assert_eq!(rm.region_at(Position::new(-1, 0)), None);
    }

    #[test]
    fn surrounding_is_clipped_and_row_major() {
        let rm = manager();
        assert_eq!(rm.surrounding(0), vec![0, 1, 4, 5]);
        assert_eq!(rm.surrounding(5), vec![0, 1, 2, 4, 5, 6, 8, 9, 10]);
        assert_eq!(rm.surrounding(11), vec![6, 7, 10, 11]);
    }

    #[test]
    fn uneven_maps_have_smaller_edge_regions() {
        let rm = RegionManager::new(20, 12, 16, 12, 1);
        assert_eq!(rm.len(), 2);
        assert_eq!(rm.get(1).unwrap().bounds.width, 4);
        assert_eq!(rm.region_at(Position::new(19, 11)), Some(1));
    }

    #[test]
    fn same_region_move_is_noop() {
        let mut reg = Registry::default();
        let mut rm = manager();
        let p = spawn(&mut reg, &mut rm, EntityKind::Player, 1, 1);
        assert!(walk(&mut reg, &mut rm, p, 2, 2).is_none());
        rm.verify(&reg).unwrap();
    }

    #[test]
    fn player_crossing_gets_spawn_and_despawn_diff() {
        let mut reg = Registry::default();
        let mut rm = manager();
        let p = spawn(&mut reg, &mut rm, EntityKind::Player, 1, 1);
        // Region 2 is outside region 0's neighborhood, inside region 1's.
        let m = spawn(&mut reg, &mut rm, EntityKind::Mob, 40, 2);

        let change = walk(&mut reg, &mut rm, p, 17, 1).unwrap();
        let sub = change.subscription.unwrap();
        assert_eq!(sub.entered, vec![2, 6]);
        assert_eq!(sub.spawned, vec![m]);
        assert!(sub.despawned.is_empty());

        let back = walk(&mut reg, &mut rm, p, 1, 1).unwrap();
        let sub = back.subscription.unwrap();
        assert_eq!(sub.left, vec![2, 6]);
        assert_eq!(sub.despawned, vec![m]);
        rm.verify(&reg).unwrap();
    }

    #[test]
    fn moving_entity_reports_observer_changes() {
        let mut reg = Registry::default();
        let mut rm = manager();
        let p = spawn(&mut reg, &mut rm, EntityKind::Player, 1, 1);
        let m = spawn(&mut reg, &mut rm, EntityKind::Mob, 40, 2);

        let change = walk(&mut reg, &mut rm, m, 30, 2).unwrap();
        assert_eq!(change.observers_gained, vec![p]);
        assert!(change.observers_lost.is_empty());
        assert!(change.subscription.is_none());

        let change = walk(&mut reg, &mut rm, m, 40, 2).unwrap();
        assert_eq!(change.observers_lost, vec![p]);
    }

    #[test]
    fn reentry_restores_membership() {
        let mut reg = Registry::default();
        let mut rm = manager();
        let p = spawn(&mut reg, &mut rm, EntityKind::Player, 1, 1);
        let before: Vec<_> = (0..rm.len()).map(|r| rm.get(r).unwrap().players.clone()).collect();

        walk(&mut reg, &mut rm, p, 17, 1);
        walk(&mut reg, &mut rm, p, 1, 1);

        let after: Vec<_> = (0..rm.len()).map(|r| rm.get(r).unwrap().players.clone()).collect();
        assert_eq!(before, after);
        assert_eq!(rm.get(0).unwrap().entities.len(), 1);
        assert!(rm.get(1).unwrap().entities.is_empty());
        rm.verify(&reg).unwrap();
    }

    #[test]
    fn verify_detects_missing_membership() {
        let mut reg = Registry::default();
        let mut rm = manager();
        spawn(&mut reg, &mut rm, EntityKind::Mob, 1, 1);
        let orphan = reg.allocate();
        reg.insert(Entity::new(orphan, "ghost", EntityKind::Item, Position::new(2, 2)));

        assert_eq!(
            rm.verify(&reg),
            Err(InvariantViolation::Missing { instance: orphan })
        );
    }

    #[test]
    #[should_panic(expected = "region invariant violated")]
    fn removing_twice_is_fatal() {
        let mut reg = Registry::default();
        let mut rm = manager();
        let m = spawn(&mut reg, &mut rm, EntityKind::Mob, 1, 1);
        let e = reg.get(m).unwrap().clone();
        rm.remove(&e);
        rm.remove(&e);
    }
}
