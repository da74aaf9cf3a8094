//! Grid coordinates.
//!
//! Everything in the simulation lives on an integer tile grid. Distances are
//! Chebyshev (king-move) distances, which is what attack ranges, aggro radii
//! and the pet follow thresholds are expressed in.

use serde::{Deserialize, Serialize};

/// Integer tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chebyshev distance in tiles.
    pub fn distance(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// True when `other` is one of the eight surrounding tiles (or the same tile).
    pub fn is_adjacent(self, other: Self) -> bool {
        self.distance(other) <= 1
    }

    /// One step towards `to`, moving diagonally when both axes differ.
    pub fn step_towards(self, to: Self) -> Self {
        Self::new(
            self.x + (to.x - self.x).signum(),
            self.y + (to.y - self.y).signum(),
        )
    }
}

/// Inclusive-exclusive tile rectangle: `x..x + width`, `y..y + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= self.x
            && pos.y >= self.y
            && pos.x < self.x + self.width
            && pos.y < self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_chebyshev() {
        let a = Position::new(0, 0);
        assert_eq!(a.distance(Position::new(3, 1)), 3);
        assert_eq!(a.distance(Position::new(-2, 2)), 2);
        assert!(a.is_adjacent(Position::new(1, 1)));
        assert!(!a.is_adjacent(Position::new(2, 0)));
    }

    #[test]
    fn step_towards_moves_one_tile() {
        let a = Position::new(5, 5);
        assert_eq!(a.step_towards(Position::new(9, 5)), Position::new(6, 5));
        assert_eq!(a.step_towards(Position::new(1, 1)), Position::new(4, 4));
        assert_eq!(a.step_towards(a), a);
    }

    #[test]
    fn rect_bounds_are_half_open() {
        let r = Rect { x: 16, y: 0, width: 16, height: 12 };
        assert!(r.contains(Position::new(16, 0)));
        assert!(r.contains(Position::new(31, 11)));
        assert!(!r.contains(Position::new(32, 11)));
        assert!(!r.contains(Position::new(15, 5)));
    }
}
