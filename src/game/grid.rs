//! In-memory tile world
//!
//! A small but complete `World` implementation: a sparse tile map, a
//! creature table with an occupancy index, a bounded breadth-first path
//! solver and Bresenham line of sight. Used by the simulation binary, the
//! benchmarks and the tests.

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::game::constants::map::{LAYER_VIEW_LIMIT, SURFACE_LAYER, VIEW_RANGE_X};
use crate::game::state::{CreatureBody, CreatureId, CreatureKind};
use crate::game::template::MonsterTemplate;
use crate::game::world::{
    ItemId, ItemRef, MagicEffect, PathParams, SoundEffect, SpeakKind, TileCreature, TileRef,
    World, WorldError,
};
use crate::util::position::{Direction, Position};

/// Observable side effect, recorded for inspection
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    Cast { caster: CreatureId, spell: String, target: Option<CreatureId> },
    Said { creature: CreatureId, kind: SpeakKind, text: String },
    Effect { pos: Position, effect: MagicEffect },
    Sound { pos: Position, sound: SoundEffect, source: Option<CreatureId> },
    Turned { creature: CreatureId, dir: Direction },
    ItemMoved { item: ItemId, from: Position, to: Position },
    ItemRemoved { item: ItemId, pos: Position },
    Placed { creature: CreatureId, name: String },
    Removed { creature: CreatureId },
}

#[derive(Debug, Clone, Default)]
struct TileData {
    ground: bool,
    blocks_path: bool,
    blocks_solid: bool,
    protection_zone: bool,
    items: Vec<ItemRef>,
}

#[derive(Debug, Default)]
struct GridInner {
    tiles: HashMap<Position, TileData>,
    creatures: HashMap<CreatureId, CreatureBody>,
    occupancy: HashMap<Position, SmallVec<[CreatureId; 2]>>,
    next_creature_id: CreatureId,
    daytime: bool,
}

impl GridInner {
    fn tile_ref(&self, pos: Position) -> Option<TileRef> {
        let data = self.tiles.get(&pos)?;
        let creatures = self
            .occupancy
            .get(&pos)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.creatures.get(id))
                    .map(|c| TileCreature {
                        id: c.id,
                        pushable: c.pushable,
                        invisible: c.invisible,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(TileRef {
            position: pos,
            ground: data.ground,
            blocks_path: data.blocks_path,
            blocks_solid: data.blocks_solid,
            protection_zone: data.protection_zone,
            creatures,
            items: data.items.clone(),
        })
    }

    fn is_occupied(&self, pos: Position) -> bool {
        self.occupancy.get(&pos).is_some_and(|ids| !ids.is_empty())
    }

    fn is_free_floor(&self, pos: Position) -> bool {
        self.tiles.get(&pos).is_some_and(|t| {
            t.ground && !t.blocks_solid && t.items.iter().all(|i| !i.blocks_solid)
        }) && !self.is_occupied(pos)
    }

    fn blocks_sight(&self, pos: Position) -> bool {
        self.tiles
            .get(&pos)
            .is_some_and(|t| t.blocks_solid || t.items.iter().any(|i| i.blocks_solid && !i.movable))
    }

    fn place(&mut self, pos: Position, id: CreatureId) {
        self.occupancy.entry(pos).or_default().push(id);
    }

    fn unplace(&mut self, pos: Position, id: CreatureId) {
        if let Some(ids) = self.occupancy.get_mut(&pos) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.occupancy.remove(&pos);
            }
        }
    }

    fn relocate(&mut self, id: CreatureId, to: Position) -> Result<(), WorldError> {
        let from = self
            .creatures
            .get(&id)
            .map(|c| c.position)
            .ok_or(WorldError::CreatureNotFound(id))?;
        self.unplace(from, id);
        self.place(to, id);
        if let Some(body) = self.creatures.get_mut(&id) {
            body.position = to;
        }
        Ok(())
    }

    fn line_clear(&self, from: Position, to: Position) -> bool {
        // Bresenham, endpoints excluded
        let (mut x, mut y) = (from.x, from.y);
        let dx = (to.x - from.x).abs();
        let dy = -(to.y - from.y).abs();
        let sx = if from.x < to.x { 1 } else { -1 };
        let sy = if from.y < to.y { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            if x == to.x && y == to.y {
                return true;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
            if (x != to.x || y != to.y) && self.blocks_sight(Position::new(x, y, from.z)) {
                return false;
            }
        }
    }
}

/// Thread-safe tile world backed by hash maps
#[derive(Debug)]
pub struct GridWorld {
    inner: RwLock<GridInner>,
    events: Mutex<Vec<WorldEvent>>,
}

impl GridWorld {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GridInner {
                next_creature_id: 1,
                daytime: true,
                ..Default::default()
            }),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Walkable ground on every tile of the rectangle between `min` and `max`
    pub fn fill_floor(&self, min: Position, max: Position) {
        let mut inner = self.inner.write();
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                inner.tiles.insert(
                    Position::new(x, y, min.z),
                    TileData {
                        ground: true,
                        ..Default::default()
                    },
                );
            }
        }
    }

    pub fn set_wall(&self, pos: Position) {
        let mut inner = self.inner.write();
        let tile = inner.tiles.entry(pos).or_default();
        tile.ground = true;
        tile.blocks_solid = true;
    }

    pub fn set_blocks_path(&self, pos: Position, blocks: bool) {
        if let Some(tile) = self.inner.write().tiles.get_mut(&pos) {
            tile.blocks_path = blocks;
        }
    }

    pub fn set_protection_zone(&self, pos: Position, protected: bool) {
        if let Some(tile) = self.inner.write().tiles.get_mut(&pos) {
            tile.protection_zone = protected;
        }
    }

    pub fn remove_tile(&self, pos: Position) {
        self.inner.write().tiles.remove(&pos);
    }

    pub fn add_item(&self, pos: Position, item: ItemRef) {
        self.inner.write().tiles.entry(pos).or_default().items.push(item);
    }

    pub fn items(&self, pos: Position) -> Vec<ItemRef> {
        self.inner
            .read()
            .tiles
            .get(&pos)
            .map(|t| t.items.clone())
            .unwrap_or_default()
    }

    pub fn set_daytime(&self, daytime: bool) {
        self.inner.write().daytime = daytime;
    }

    /// Insert a creature, assigning it a fresh id
    pub fn insert_creature(&self, mut body: CreatureBody) -> CreatureId {
        let mut inner = self.inner.write();
        let id = inner.next_creature_id;
        inner.next_creature_id += 1;
        body.id = id;
        let pos = body.position;
        inner.creatures.insert(id, body);
        inner.place(pos, id);
        id
    }

    pub fn add_player(&self, name: &str, pos: Position) -> CreatureId {
        self.insert_creature(CreatureBody::new(0, name, CreatureKind::Player, pos))
    }

    pub fn add_monster(&self, template: Arc<MonsterTemplate>, pos: Position) -> CreatureId {
        self.insert_creature(CreatureBody::from_template(0, template, pos))
    }

    /// Edit a creature in place. Returns false when it does not exist.
    pub fn update_creature(&self, id: CreatureId, f: impl FnOnce(&mut CreatureBody)) -> bool {
        match self.inner.write().creatures.get_mut(&id) {
            Some(body) => {
                f(body);
                true
            }
            None => false,
        }
    }

    pub fn creature_ids(&self) -> Vec<CreatureId> {
        let mut ids: Vec<_> = self.inner.read().creatures.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn creature_count(&self) -> usize {
        self.inner.read().creatures.len()
    }

    /// Take every event recorded since the last call
    pub fn take_events(&self) -> Vec<WorldEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn record(&self, event: WorldEvent) {
        self.events.lock().push(event);
    }

    fn search_path(inner: &GridInner, from: Position, to: Position, params: &PathParams) -> Option<Vec<Direction>> {
        if from.z != to.z {
            return None;
        }

        let radius = if params.max_search_dist > 0 {
            params.max_search_dist
        } else {
            VIEW_RANGE_X * 2
        };

        let matches = |pos: Position| -> Option<i32> {
            let dist = pos.distance(to);
            if dist < params.min_target_dist || dist > params.max_target_dist {
                return None;
            }
            if params.clear_sight && !inner.line_clear(pos, to) {
                return None;
            }
            Some(dist)
        };

        let mut parents: HashMap<Position, (Position, Direction)> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(from);
        parents.insert(from, (from, Direction::North));

        let mut best: Option<(Position, i32)> = None;
        while let Some(pos) = queue.pop_front() {
            if let Some(dist) = matches(pos) {
                if !params.keep_distance || dist == params.max_target_dist {
                    best = Some((pos, dist));
                    break;
                }
                if best.map_or(true, |(_, d)| dist > d) {
                    best = Some((pos, dist));
                }
            }

            for dir in Direction::ALL {
                let next = pos.step(dir);
                if parents.contains_key(&next) || next.distance(from) > radius {
                    continue;
                }
                let passable = inner
                    .tiles
                    .get(&next)
                    .is_some_and(|t| !t.blocks_path || params.ignore_field_damage)
                    && inner.is_free_floor(next);
                if passable {
                    parents.insert(next, (pos, dir));
                    queue.push_back(next);
                }
            }
        }

        let (goal, _) = best?;
        let mut steps = Vec::new();
        let mut cursor = goal;
        while cursor != from {
            let (parent, dir) = parents.get(&cursor).copied()?;
            steps.push(dir);
            cursor = parent;
        }
        steps.reverse();
        Some(steps)
    }
}

impl Default for GridWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl World for GridWorld {
    fn creature(&self, id: CreatureId) -> Option<CreatureBody> {
        self.inner.read().creatures.get(&id).cloned()
    }

    fn spectators(&self, center: Position, range_x: i32, range_y: i32, multifloor: bool) -> Vec<CreatureBody> {
        let (min_z, max_z) = if !multifloor {
            (center.z, center.z)
        } else if center.z <= SURFACE_LAYER {
            (0, SURFACE_LAYER)
        } else {
            (
                (center.z as i32 - LAYER_VIEW_LIMIT).max(0) as u8,
                (center.z as i32 + LAYER_VIEW_LIMIT).min(u8::MAX as i32) as u8,
            )
        };

        let inner = self.inner.read();
        let mut found: Vec<CreatureBody> = inner
            .creatures
            .values()
            .filter(|c| {
                c.position.z >= min_z
                    && c.position.z <= max_z
                    && c.position.distance_x(center) <= range_x
                    && c.position.distance_y(center) <= range_y
            })
            .cloned()
            .collect();
        found.sort_unstable_by_key(|c| c.id);
        found
    }

    fn tile(&self, pos: Position) -> Option<TileRef> {
        self.inner.read().tile_ref(pos)
    }

    fn is_sight_clear(&self, from: Position, to: Position, same_floor: bool) -> bool {
        if from.z == to.z {
            return self.inner.read().line_clear(from, to);
        }
        if same_floor {
            return false;
        }
        // across floors the line is traced on the upper one
        let z = from.z.min(to.z);
        self.inner
            .read()
            .line_clear(Position::new(from.x, from.y, z), Position::new(to.x, to.y, z))
    }

    fn can_throw_to(&self, from: Position, to: Position) -> bool {
        let inner = self.inner.read();
        let landing = inner
            .tiles
            .get(&to)
            .is_some_and(|t| t.ground && !t.blocks_solid && t.items.iter().all(|i| !i.blocks_solid));
        landing && from.z == to.z && inner.line_clear(from, to)
    }

    fn request_path(&self, from: Position, to: Position, params: &PathParams) -> Option<Vec<Direction>> {
        let inner = self.inner.read();
        Self::search_path(&inner, from, to, params)
    }

    fn is_daytime(&self) -> bool {
        self.inner.read().daytime
    }

    fn move_creature(&self, id: CreatureId, dir: Direction) -> Result<Position, WorldError> {
        let mut inner = self.inner.write();
        let body = inner.creatures.get(&id).ok_or(WorldError::CreatureNotFound(id))?;
        let to = body.position.step(dir);
        let (can_push_items, can_push_creatures) = body
            .template
            .as_ref()
            .map_or((false, false), |t| (t.can_push_items, t.can_push_creatures && body.master.is_none()));

        let tile = inner.tile_ref(to).ok_or(WorldError::Blocked(to))?;
        if !tile.is_walkable(can_push_items) {
            return Err(WorldError::Blocked(to));
        }
        let occupied = tile.creatures.iter().any(|c| {
            let player = inner.creatures.get(&c.id).is_some_and(|b| b.is_player());
            !(can_push_creatures && c.pushable && !player)
        });
        if occupied {
            return Err(WorldError::Blocked(to));
        }

        inner.relocate(id, to)?;
        Ok(to)
    }

    fn teleport_creature(&self, id: CreatureId, to: Position) -> Result<(), WorldError> {
        self.inner.write().relocate(id, to)
    }

    fn move_item(&self, from: Position, item: ItemId, to: Position) -> Result<(), WorldError> {
        let mut inner = self.inner.write();
        if !inner.tiles.contains_key(&to) {
            return Err(WorldError::Blocked(to));
        }
        let source = inner.tiles.get_mut(&from).ok_or(WorldError::ItemNotFound(item))?;
        let index = source
            .items
            .iter()
            .position(|i| i.id == item)
            .ok_or(WorldError::ItemNotFound(item))?;
        let moved = source.items.remove(index);
        if let Some(target) = inner.tiles.get_mut(&to) {
            target.items.push(moved);
        }
        drop(inner);
        self.record(WorldEvent::ItemMoved { item, from, to });
        Ok(())
    }

    fn remove_item(&self, pos: Position, item: ItemId) -> Result<(), WorldError> {
        let mut inner = self.inner.write();
        let tile = inner.tiles.get_mut(&pos).ok_or(WorldError::ItemNotFound(item))?;
        let before = tile.items.len();
        tile.items.retain(|i| i.id != item);
        if tile.items.len() == before {
            return Err(WorldError::ItemNotFound(item));
        }
        drop(inner);
        self.record(WorldEvent::ItemRemoved { item, pos });
        Ok(())
    }

    fn change_health(&self, id: CreatureId, delta: i32) -> Result<i32, WorldError> {
        let mut inner = self.inner.write();
        let body = inner.creatures.get_mut(&id).ok_or(WorldError::CreatureNotFound(id))?;
        body.health = body.health.saturating_add(delta).clamp(0, body.max_health);
        Ok(body.health)
    }

    fn set_master(&self, id: CreatureId, master: Option<CreatureId>) -> Result<(), WorldError> {
        let mut inner = self.inner.write();
        let body = inner.creatures.get_mut(&id).ok_or(WorldError::CreatureNotFound(id))?;
        body.master = master;
        Ok(())
    }

    fn set_attack_target(&self, id: CreatureId, target: Option<CreatureId>) {
        if let Some(body) = self.inner.write().creatures.get_mut(&id) {
            body.attacking = target;
        }
    }

    fn set_players_on_screen(&self, id: CreatureId, count: u32) {
        if let Some(body) = self.inner.write().creatures.get_mut(&id) {
            body.players_on_screen = count;
        }
    }

    fn turn_creature(&self, id: CreatureId, dir: Direction) {
        self.record(WorldEvent::Turned { creature: id, dir });
    }

    fn cast_spell(&self, caster: CreatureId, spell: &str, target: Option<CreatureId>, min: i32, max: i32) -> bool {
        let mut inner = self.inner.write();
        if !inner.creatures.contains_key(&caster) {
            return false;
        }

        // fixed midpoint so outcomes stay reproducible
        let delta = (min + max) / 2;
        let affected = target.unwrap_or(caster);
        if delta != 0 {
            if let Some(body) = inner.creatures.get_mut(&affected) {
                body.health = body.health.saturating_add(delta).clamp(0, body.max_health);
            }
        }
        drop(inner);

        self.record(WorldEvent::Cast {
            caster,
            spell: spell.to_string(),
            target,
        });
        true
    }

    fn creature_say(&self, id: CreatureId, kind: SpeakKind, text: &str) {
        self.record(WorldEvent::Said {
            creature: id,
            kind,
            text: text.to_string(),
        });
    }

    fn magic_effect(&self, pos: Position, effect: MagicEffect) {
        self.record(WorldEvent::Effect { pos, effect });
    }

    fn sound_effect(&self, pos: Position, sound: SoundEffect, source: Option<CreatureId>) {
        self.record(WorldEvent::Sound { pos, sound, source });
    }

    fn place_creature(&self, template: Arc<MonsterTemplate>, near: Position, force: bool) -> Result<CreatureId, WorldError> {
        let spot = {
            let inner = self.inner.read();
            let mut candidates = vec![near];
            candidates.extend(Direction::ALL.iter().map(|dir| near.step(*dir)));
            if force {
                for dx in -2i32..=2 {
                    for dy in -2i32..=2 {
                        if dx.abs() == 2 || dy.abs() == 2 {
                            candidates.push(near.translate(dx, dy));
                        }
                    }
                }
            }
            candidates.into_iter().find(|pos| inner.is_free_floor(*pos))
        };

        let pos = spot.ok_or(WorldError::NoRoom(near))?;
        let name = template.name.clone();
        let id = self.add_monster(template, pos);
        self.record(WorldEvent::Placed { creature: id, name });
        Ok(id)
    }

    fn remove_creature(&self, id: CreatureId) -> Result<(), WorldError> {
        let mut inner = self.inner.write();
        let body = inner.creatures.remove(&id).ok_or(WorldError::CreatureNotFound(id))?;
        inner.unplace(body.position, id);
        drop(inner);
        self.record(WorldEvent::Removed { creature: id });
        Ok(())
    }
}
