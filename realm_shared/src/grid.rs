//! Per-tile occupancy index.
//!
//! Two independent lookups share one flat index over the whole map:
//! static collision from map data, and the set of entities standing on each
//! tile (used for blocking entities, aggro candidates and click targets).
//!
//! The grid is only mutated from the tick's synchronous phase, and a move
//! always removes from the old bucket and adds to the new one in the same
//! call, so no observer ever sees an entity on two tiles or on none.

use crate::{entity::Instance, position::Position};

#[derive(Debug, Clone)]
pub struct Grid {
    width: i32,
    height: i32,
    collisions: Vec<bool>,
    /// Entities standing on each tile, with whether they block movement.
    buckets: Vec<Vec<(Instance, bool)>>,
}

impl Grid {
    /// Creates an empty, fully walkable grid.
    pub fn new(width: i32, height: i32) -> Self {
        let tiles = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            collisions: vec![false; tiles],
            buckets: vec![Vec::new(); tiles],
        }
    }

    /// Creates a grid with the given tiles marked as colliding. Out-of-bounds
    /// entries are ignored.
    pub fn with_collisions(width: i32, height: i32, blocked: &[Position]) -> Self {
        let mut grid = Self::new(width, height);
        for pos in blocked {
            if let Some(idx) = grid.index(*pos) {
                grid.collisions[idx] = true;
            }
        }
        grid
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn is_out_of_bounds(&self, x: i32, y: i32) -> bool {
        x < 0 || y < 0 || x >= self.width || y >= self.height
    }

    fn index(&self, pos: Position) -> Option<usize> {
        if self.is_out_of_bounds(pos.x, pos.y) {
            return None;
        }
        Some((pos.y * self.width + pos.x) as usize)
    }

    /// True if the tile is blocked by map data or by a blocking entity.
    /// Tiles outside the map always collide.
    pub fn is_colliding(&self, x: i32, y: i32) -> bool {
        match self.index(Position::new(x, y)) {
            Some(idx) => self.collisions[idx] || self.buckets[idx].iter().any(|(_, b)| *b),
            None => true,
        }
    }

    /// Registers an entity on its tile. Ignored when out of bounds.
    pub fn add_entity(&mut self, instance: Instance, pos: Position, blocking: bool) {
        if let Some(idx) = self.index(pos) {
            let bucket = &mut self.buckets[idx];
            if !bucket.iter().any(|(i, _)| *i == instance) {
                bucket.push((instance, blocking));
            }
        }
    }

    pub fn remove_entity(&mut self, instance: Instance, pos: Position) {
        if let Some(idx) = self.index(pos) {
            self.buckets[idx].retain(|(i, _)| *i != instance);
        }
    }

    /// Moves an entity between tiles in one step.
    pub fn move_entity(&mut self, instance: Instance, from: Position, to: Position) {
        let blocking = self
            .index(from)
            .and_then(|idx| self.buckets[idx].iter().find(|(i, _)| *i == instance))
            .map_or(false, |(_, b)| *b);
        self.remove_entity(instance, from);
        self.add_entity(instance, to, blocking);
    }

    /// Invokes `f` for every entity on the tile, in insertion order.
    pub fn for_each_entity_at(&self, x: i32, y: i32, mut f: impl FnMut(Instance)) {
        if let Some(idx) = self.index(Position::new(x, y)) {
            for (instance, _) in &self.buckets[idx] {
                f(*instance);
            }
        }
    }

    /// Entities on the tile.
    pub fn entities_at(&self, x: i32, y: i32) -> Vec<Instance> {
        let mut out = Vec::new();
        self.for_each_entity_at(x, y, |i| out.push(i));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_collision_and_bounds() {
        let grid = Grid::with_collisions(4, 4, &[Position::new(1, 2), Position::new(9, 9)]);
        assert!(grid.is_colliding(1, 2));
        assert!(!grid.is_colliding(2, 1));
        assert!(grid.is_colliding(-1, 0));
        assert!(grid.is_colliding(4, 0));
        assert!(grid.is_out_of_bounds(0, 4));
    }

    #[test]
    fn blocking_entities_collide() {
        let mut grid = Grid::new(8, 8);
        grid.add_entity(Instance(1), Position::new(3, 3), true);
        grid.add_entity(Instance(2), Position::new(4, 4), false);
        assert!(grid.is_colliding(3, 3));
        assert!(!grid.is_colliding(4, 4));
    }

    #[test]
    fn move_updates_both_buckets() {
        let mut grid = Grid::new(8, 8);
        let a = Instance(5);
        grid.add_entity(a, Position::new(0, 0), true);
        grid.move_entity(a, Position::new(0, 0), Position::new(1, 0));

        assert!(grid.entities_at(0, 0).is_empty());
        assert_eq!(grid.entities_at(1, 0), vec![a]);
        assert!(grid.is_colliding(1, 0), "blocking flag follows the entity");
    }

    #[test]
    fn for_each_visits_every_occupant() {
        let mut grid = Grid::new(8, 8);
        for i in 1..=3 {
            grid.add_entity(Instance(i), Position::new(2, 2), false);
        }
        grid.add_entity(Instance(1), Position::new(2, 2), false);

        let mut seen = Vec::new();
        grid.for_each_entity_at(2, 2, |i| seen.push(i.0));
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
