//! Tile grid geometry
//!
//! Positions, the eight walking directions and the distance/visibility
//! helpers every decision component builds on. All functions here are pure.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::game::constants::map::{LAYER_VIEW_LIMIT, SURFACE_LAYER};

/// Tile coordinate. `z` is the floor, 0 is the highest, 7 is ground level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: u8,
}

impl Position {
    #[inline]
    pub const fn new(x: i32, y: i32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Signed horizontal offset `self.x - other.x`
    #[inline]
    pub fn offset_x(&self, other: Position) -> i32 {
        self.x - other.x
    }

    /// Signed vertical offset `self.y - other.y`
    #[inline]
    pub fn offset_y(&self, other: Position) -> i32 {
        self.y - other.y
    }

    #[inline]
    pub fn offset_z(&self, other: Position) -> i32 {
        self.z as i32 - other.z as i32
    }

    #[inline]
    pub fn distance_x(&self, other: Position) -> i32 {
        self.offset_x(other).abs()
    }

    #[inline]
    pub fn distance_y(&self, other: Position) -> i32 {
        self.offset_y(other).abs()
    }

    #[inline]
    pub fn distance_z(&self, other: Position) -> i32 {
        self.offset_z(other).abs()
    }

    /// Chebyshev distance on the horizontal plane (floors ignored)
    #[inline]
    pub fn distance(&self, other: Position) -> i32 {
        self.distance_x(other).max(self.distance_y(other))
    }

    /// Position one step away in `dir`
    #[inline]
    pub fn step(&self, dir: Direction) -> Position {
        let (dx, dy) = dir.delta();
        Position::new(self.x + dx, self.y + dy, self.z)
    }

    #[inline]
    pub fn translate(&self, dx: i32, dy: i32) -> Position {
        Position::new(self.x + dx, self.y + dy, self.z)
    }

    #[inline]
    pub fn is_underground(&self) -> bool {
        self.z > SURFACE_LAYER
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Walking direction. North is `y - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
    SouthWest,
    SouthEast,
    NorthWest,
    NorthEast,
}

impl Direction {
    /// Cardinal directions in the order random and push searches start from
    pub const CARDINALS: [Direction; 4] = [
        Direction::North,
        Direction::West,
        Direction::East,
        Direction::South,
    ];

    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
        Direction::SouthWest,
        Direction::SouthEast,
        Direction::NorthWest,
        Direction::NorthEast,
    ];

    #[inline]
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
            Direction::SouthWest => (-1, 1),
            Direction::SouthEast => (1, 1),
            Direction::NorthWest => (-1, -1),
            Direction::NorthEast => (1, -1),
        }
    }

    #[inline]
    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Direction::SouthWest | Direction::SouthEast | Direction::NorthWest | Direction::NorthEast
        )
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
            Direction::SouthWest => Direction::NorthEast,
            Direction::SouthEast => Direction::NorthWest,
            Direction::NorthWest => Direction::SouthEast,
            Direction::NorthEast => Direction::SouthWest,
        }
    }
}

/// Direction to take from `from` to get closer to `to`.
///
/// Diagonals are only returned when both axis distances are equal.
/// `None` when both positions share a tile.
pub fn direction_to(from: Position, to: Position) -> Option<Direction> {
    if from.x == to.x && from.y == to.y {
        return None;
    }

    let mut x_offset = from.offset_x(to);
    let mut dir = if x_offset < 0 {
        x_offset = x_offset.abs();
        Direction::East
    } else {
        Direction::West
    };

    let y_offset = from.offset_y(to);
    if y_offset >= 0 {
        if y_offset > x_offset {
            dir = Direction::North;
        } else if y_offset == x_offset {
            dir = if dir == Direction::East {
                Direction::NorthEast
            } else {
                Direction::NorthWest
            };
        }
    } else {
        let y_offset = y_offset.abs();
        if y_offset > x_offset {
            dir = Direction::South;
        } else if y_offset == x_offset {
            dir = if dir == Direction::East {
                Direction::SouthEast
            } else {
                Direction::SouthWest
            };
        }
    }

    Some(dir)
}

/// Whether a viewer standing at `from` has `to` inside its view port.
///
/// Above ground only floors up to the surface are visible; underground the
/// viewer sees `LAYER_VIEW_LIMIT` floors up and down. The horizontal window
/// shifts by one tile per floor of difference.
pub fn can_see(from: Position, to: Position, range_x: i32, range_y: i32) -> bool {
    if from.z <= SURFACE_LAYER {
        if to.z > SURFACE_LAYER {
            return false;
        }
    } else if from.distance_z(to) > LAYER_VIEW_LIMIT {
        return false;
    }

    let offset_z = from.offset_z(to);
    to.x >= from.x - range_x + offset_z
        && to.x <= from.x + range_x + offset_z
        && to.y >= from.y - range_y + offset_z
        && to.y <= from.y + range_y + offset_z
}

/// Square zone test around a spawn anchor. A radius of `-1` is unlimited.
pub fn is_in_zone(center: Position, radius: i32, pos: Position) -> bool {
    if radius == -1 {
        return true;
    }

    pos.x >= center.x - radius
        && pos.x <= center.x + radius
        && pos.y >= center.y - radius
        && pos.y <= center.y + radius
}

/// Tile offsets an item on the destination tile may be pushed to, given the
/// direction the pusher is travelling in.
pub fn push_item_offsets(dir: Direction) -> &'static [(i32, i32)] {
    match dir {
        Direction::West | Direction::East => &[(0, -1), (0, 1)],
        Direction::North | Direction::South => &[(-1, 0), (1, 0)],
        Direction::NorthWest => &[(0, -1), (-1, 0)],
        Direction::NorthEast => &[(0, -1), (1, 0)],
        Direction::SouthWest => &[(0, 1), (-1, 0)],
        Direction::SouthEast => &[(0, 1), (1, 0)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_is_chebyshev() {
        let a = Position::new(0, 0, 7);
        assert_eq!(a.distance(Position::new(3, 1, 7)), 3);
        assert_eq!(a.distance(Position::new(-2, -5, 7)), 5);
        assert_eq!(a.distance(a), 0);
    }

    #[test]
    fn test_offsets_are_signed() {
        let a = Position::new(0, 0, 7);
        let b = Position::new(3, -2, 7);
        assert_eq!(a.offset_x(b), -3);
        assert_eq!(a.offset_y(b), 2);
        assert_eq!(a.distance_x(b), 3);
        assert_eq!(a.distance_y(b), 2);
    }

    #[test]
    fn test_step_and_opposite() {
        let origin = Position::new(10, 10, 7);
        for dir in Direction::ALL {
            let there = origin.step(dir);
            assert_eq!(origin.distance(there), 1);
            assert_eq!(there.step(dir.opposite()), origin);
        }
        assert_eq!(origin.step(Direction::North), Position::new(10, 9, 7));
    }

    #[test]
    fn test_direction_to_axis_and_diagonal() {
        let from = Position::new(5, 5, 7);
        assert_eq!(direction_to(from, Position::new(9, 6, 7)), Some(Direction::East));
        assert_eq!(direction_to(from, Position::new(4, 1, 7)), Some(Direction::North));
        assert_eq!(direction_to(from, Position::new(3, 3, 7)), Some(Direction::NorthWest));
        assert_eq!(direction_to(from, Position::new(8, 8, 7)), Some(Direction::SouthEast));
        assert_eq!(direction_to(from, from), None);
    }

    #[test]
    fn test_can_see_surface_hides_underground() {
        let viewer = Position::new(100, 100, 7);
        assert!(can_see(viewer, Position::new(104, 103, 7), 8, 6));
        assert!(!can_see(viewer, Position::new(100, 100, 8), 8, 6));
        assert!(!can_see(viewer, Position::new(109, 100, 7), 8, 6));
    }

    #[test]
    fn test_can_see_underground_limit() {
        let viewer = Position::new(100, 100, 10);
        assert!(can_see(viewer, Position::new(100, 100, 12), 8, 6));
        assert!(!can_see(viewer, Position::new(100, 100, 13), 8, 6));
    }

    #[test]
    fn test_is_in_zone() {
        let center = Position::new(50, 50, 7);
        assert!(is_in_zone(center, 2, Position::new(52, 48, 7)));
        assert!(!is_in_zone(center, 2, Position::new(53, 50, 7)));
        assert!(is_in_zone(center, -1, Position::new(5000, 50, 7)));
    }

    #[test]
    fn test_push_offsets_are_perpendicular_for_cardinals() {
        for &(dx, dy) in push_item_offsets(Direction::North) {
            assert_eq!(dy, 0);
            assert_ne!(dx, 0);
        }
        for &(dx, dy) in push_item_offsets(Direction::East) {
            assert_eq!(dx, 0);
            assert_ne!(dy, 0);
        }
    }
}
