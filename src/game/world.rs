//! World collaborator interface
//!
//! Everything the AI needs from the map: creature lookup, spectator queries,
//! tiles, line of sight, path requests, and the handful of mutations a
//! monster performs on its own behalf. Implementations must be safe to call
//! from many think steps at once; every mutation is expected to take the
//! world's own lock and return once applied.

use smallvec::SmallVec;
use std::sync::Arc;
use thiserror::Error;

use crate::game::state::{CreatureBody, CreatureId};
use crate::game::template::MonsterTemplate;
use crate::util::position::{Direction, Position};

pub type ItemId = u32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("creature {0} not found")]
    CreatureNotFound(CreatureId),
    #[error("item {0} not found")]
    ItemNotFound(ItemId),
    #[error("tile {0} is blocked")]
    Blocked(Position),
    #[error("no room to place a creature near {0}")]
    NoRoom(Position),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Item lying on a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub id: ItemId,
    pub movable: bool,
    /// Blocks path search but can be walked over
    pub blocks_path: bool,
    /// Blocks walking outright
    pub blocks_solid: bool,
    pub corpse: bool,
}

impl ItemRef {
    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.blocks_path || self.blocks_solid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCreature {
    pub id: CreatureId,
    pub pushable: bool,
    pub invisible: bool,
}

/// Snapshot of one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRef {
    pub position: Position,
    pub ground: bool,
    pub blocks_path: bool,
    pub blocks_solid: bool,
    pub protection_zone: bool,
    pub creatures: SmallVec<[TileCreature; 2]>,
    pub items: Vec<ItemRef>,
}

impl TileRef {
    /// Whether a creature could stand here once the tile is free of creatures.
    /// Pushers treat movable blocking items as passable.
    pub fn is_walkable(&self, can_push_items: bool) -> bool {
        self.ground
            && !self.blocks_solid
            && self
                .items
                .iter()
                .all(|item| !item.blocks_solid || (can_push_items && item.movable))
    }

    /// Topmost creature `viewer_sees_invisible` allows to see
    pub fn top_visible_creature(&self, viewer_sees_invisible: bool) -> Option<&TileCreature> {
        self.creatures
            .iter()
            .rev()
            .find(|c| !c.invisible || viewer_sees_invisible)
    }
}

/// Constraints for a path request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathParams {
    pub min_target_dist: i32,
    pub max_target_dist: i32,
    pub full_path_search: bool,
    pub clear_sight: bool,
    pub keep_distance: bool,
    /// Search radius around the start, 0 lets the solver decide
    pub max_search_dist: i32,
    pub ignore_field_damage: bool,
}

impl Default for PathParams {
    fn default() -> Self {
        Self {
            min_target_dist: 1,
            max_target_dist: 1,
            full_path_search: true,
            clear_sight: true,
            keep_distance: false,
            max_search_dist: 0,
            ignore_field_damage: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeakKind {
    Say,
    Yell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagicEffect {
    Poff,
    BlockHit,
    MagicBlue,
    Teleport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundEffect(pub u16);

pub trait World: Send + Sync {
    // --- queries ---

    fn creature(&self, id: CreatureId) -> Option<CreatureBody>;

    /// Creatures inside the rectangle `center ± (range_x, range_y)`.
    /// `multifloor` includes the floors a viewer at `center` could see.
    fn spectators(&self, center: Position, range_x: i32, range_y: i32, multifloor: bool) -> Vec<CreatureBody>;

    fn tile(&self, pos: Position) -> Option<TileRef>;

    fn is_sight_clear(&self, from: Position, to: Position, same_floor: bool) -> bool;

    fn can_throw_to(&self, from: Position, to: Position) -> bool;

    /// Ordered steps from `from` to a tile satisfying `params` relative to
    /// `to`. An empty list means `from` already satisfies them.
    fn request_path(&self, from: Position, to: Position, params: &PathParams) -> Option<Vec<Direction>>;

    fn is_daytime(&self) -> bool;

    // --- mutations ---

    /// Move one tile, returning the new position
    fn move_creature(&self, id: CreatureId, dir: Direction) -> Result<Position, WorldError>;

    fn teleport_creature(&self, id: CreatureId, to: Position) -> Result<(), WorldError>;

    fn move_item(&self, from: Position, item: ItemId, to: Position) -> Result<(), WorldError>;

    fn remove_item(&self, pos: Position, item: ItemId) -> Result<(), WorldError>;

    /// Add `delta` to health (clamped to `0..=max_health`), returning the new value
    fn change_health(&self, id: CreatureId, delta: i32) -> Result<i32, WorldError>;

    fn set_master(&self, id: CreatureId, master: Option<CreatureId>) -> Result<(), WorldError>;

    fn set_attack_target(&self, id: CreatureId, target: Option<CreatureId>);

    fn set_players_on_screen(&self, id: CreatureId, count: u32);

    fn turn_creature(&self, id: CreatureId, dir: Direction);

    /// Resolve a spell. Returns whether it was actually cast.
    fn cast_spell(&self, caster: CreatureId, spell: &str, target: Option<CreatureId>, min: i32, max: i32) -> bool;

    fn creature_say(&self, id: CreatureId, kind: SpeakKind, text: &str);

    fn magic_effect(&self, pos: Position, effect: MagicEffect);

    fn sound_effect(&self, pos: Position, sound: SoundEffect, source: Option<CreatureId>);

    fn place_creature(&self, template: Arc<MonsterTemplate>, near: Position, force: bool) -> Result<CreatureId, WorldError>;

    fn remove_creature(&self, id: CreatureId) -> Result<(), WorldError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_tile(items: Vec<ItemRef>) -> TileRef {
        TileRef {
            position: Position::new(0, 0, 7),
            ground: true,
            blocks_path: false,
            blocks_solid: false,
            protection_zone: false,
            creatures: SmallVec::new(),
            items,
        }
    }

    #[test]
    fn test_pushers_walk_over_movable_blockers() {
        let crate_item = ItemRef {
            id: 1,
            movable: true,
            blocks_path: false,
            blocks_solid: true,
            corpse: false,
        };
        let tile = create_tile(vec![crate_item]);
        assert!(!tile.is_walkable(false));
        assert!(tile.is_walkable(true));

        let wall = ItemRef { movable: false, ..crate_item };
        assert!(!create_tile(vec![wall]).is_walkable(true));
    }

    #[test]
    fn test_top_visible_creature_skips_invisible() {
        let mut tile = create_tile(Vec::new());
        tile.creatures.push(TileCreature { id: 1, pushable: true, invisible: false });
        tile.creatures.push(TileCreature { id: 2, pushable: true, invisible: true });

        assert_eq!(tile.top_visible_creature(false).map(|c| c.id), Some(1));
        assert_eq!(tile.top_visible_creature(true).map(|c| c.id), Some(2));
    }
}
