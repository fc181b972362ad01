//! Movement planner
//!
//! Chooses the next step each think: follow the focused creature along a
//! path (or by the direct distance table when keeping range or fleeing),
//! walk back to the spawn anchor, or wander. Pushers clear the destination
//! tile before stepping onto it.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::game::constants::movement::{
    FOLLOW_PATH_UPDATE_MS, GROUND_SPEED, MAX_ITEM_PUSHES, MAX_STEPS_PER_THINK, MAX_STEP_DURATION,
    RANDOM_STEP_DELAY_MS, STEP_ROUNDING_MS, WALK_BACK_SLACK,
};
use crate::game::dispatcher::Deferred;
use crate::game::monster::{Monster, TickContext};
use crate::game::state::CreatureBody;
use crate::game::world::{ItemRef, MagicEffect, PathParams, TileRef};
use crate::util::position::{self, Direction, Position};

use crate::util::position::Direction::{East, North, NorthEast, NorthWest, South, SouthEast, SouthWest, West};

/// Result of the direct distance table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceStep {
    /// Out of reach or sight, let the path solver handle it
    Defer,
    /// Nothing to do from here
    Hold,
    Step(Direction),
}

impl Monster {
    /// Drop focus on creatures that can no longer be seen, then refresh the
    /// follow path when it is due
    pub(crate) fn think_follow(&mut self, ctx: &mut TickContext<'_>, interval: u64) {
        for id in [self.follow, self.attacked].into_iter().flatten() {
            if Some(id) == self.body.master {
                continue;
            }
            let visible = ctx.world.creature(id).is_some_and(|body| {
                !body.removed && self.can_see_creature(&body) && self.can_see(ctx.config, body.position)
            });
            if !visible {
                self.release_focus_on(ctx, id);
            }
        }

        if self.follow.is_some() {
            self.walk_update_ticks = self.walk_update_ticks.saturating_add(interval);
            if self.force_update_follow_path || self.walk_update_ticks >= FOLLOW_PATH_UPDATE_MS {
                self.walk_update_ticks = 0;
                self.force_update_follow_path = false;
                self.updating_path = true;
            }
        }

        if self.updating_path {
            self.updating_path = false;
            self.go_to_follow_creature(ctx);
        }
    }

    pub(crate) fn on_walk_aborted(&mut self) {
        self.force_update_follow_path = true;
    }

    fn go_to_follow_creature(&mut self, ctx: &mut TickContext<'_>) {
        let Some(target) = self.follow.and_then(|id| ctx.world.creature(id)) else {
            return;
        };

        let params = self.path_params_for(ctx, &target);
        let fleeing = self.is_fleeing();

        if !self.is_summon() && (fleeing || params.max_target_dist > 1) {
            match self.distance_step(ctx, target.position, fleeing) {
                DistanceStep::Step(dir) => {
                    self.walk_queue.clear();
                    self.walk_queue.push_back(dir);
                    self.has_follow_path = true;
                }
                DistanceStep::Hold => {}
                DistanceStep::Defer if fleeing => {}
                DistanceStep::Defer => {
                    self.request_follow_path(ctx, &target, &params);
                    return;
                }
            }
        } else {
            self.request_follow_path(ctx, &target, &params);
        }

        self.on_follow_complete(ctx.world, target.id);
    }

    fn request_follow_path(&mut self, ctx: &TickContext<'_>, target: &CreatureBody, params: &PathParams) -> bool {
        self.walk_queue.clear();
        match ctx.world.request_path(self.position(), target.position, params) {
            Some(steps) => {
                self.walk_queue.extend(steps);
                self.has_follow_path = true;
                true
            }
            None => {
                self.has_follow_path = false;
                false
            }
        }
    }

    pub(crate) fn path_params_for(&self, ctx: &TickContext<'_>, target: &CreatureBody) -> PathParams {
        let mut params = PathParams {
            min_target_dist: 1,
            max_target_dist: self.target_distance,
            full_path_search: !self.has_follow_path,
            clear_sight: true,
            keep_distance: false,
            max_search_dist: 0,
            ignore_field_damage: self.ignore_field_damage,
        };
        let me = self.position();

        if self.is_summon() {
            if self.body.master == Some(target.id) {
                params.max_target_dist = 2;
                params.full_path_search = true;
            } else if self.target_distance <= 1 {
                params.full_path_search = true;
            } else {
                params.full_path_search = !self.can_use_attack(me, target, ctx.world);
            }
        } else if self.is_fleeing() {
            params.max_target_dist = ctx.config.view_range_x;
            params.clear_sight = false;
            params.keep_distance = true;
            params.full_path_search = false;
        } else if self.target_distance <= 1 {
            params.full_path_search = true;
        } else {
            params.full_path_search = !self.can_use_attack(me, target, ctx.world);
        }

        params
    }

    /// Whether a step from `from` toward `dir` lands on a free, walkable tile
    /// inside the spawn range
    pub(crate) fn can_walk_to(&self, ctx: &TickContext<'_>, from: Position, dir: Direction) -> bool {
        let next = from.step(dir);
        if !self.is_in_spawn_range(ctx.config, next) {
            return false;
        }
        let Some(tile) = ctx.world.tile(next) else {
            return false;
        };
        tile.top_visible_creature(self.template.can_see_invisible).is_none()
            && tile.is_walkable(self.template.can_push_items)
    }

    pub(crate) fn random_step(&self, ctx: &mut TickContext<'_>) -> Option<Direction> {
        let mut dirs = Direction::CARDINALS;
        dirs.shuffle(&mut *ctx.rng);
        let me = self.position();
        let view: &TickContext<'_> = ctx;
        dirs.into_iter().find(|dir| self.can_walk_to(view, me, *dir))
    }

    /// Sidestep around the attacked creature without changing the distance
    /// to it. With `keep_attack` the new tile must still allow an attack if
    /// one is possible now.
    pub(crate) fn dance_step(&self, ctx: &mut TickContext<'_>, keep_attack: bool, keep_distance: bool) -> Option<Direction> {
        let target = self.attacked.and_then(|id| ctx.world.creature(id))?;
        let me = self.position();
        let center = target.position;
        let distance = me.distance(center);
        if distance > self.target_distance {
            return None;
        }

        let can_attack_now = self.can_use_attack(me, &target, ctx.world);
        let offset_x = me.offset_x(center);
        let offset_y = me.offset_y(center);

        let wanted = [
            (North, !keep_distance || offset_y >= 0),
            (South, !keep_distance || offset_y <= 0),
            (East, !keep_distance || offset_x <= 0),
            (West, !keep_distance || offset_x >= 0),
        ];

        let view: &TickContext<'_> = ctx;
        let mut options: Vec<Direction> = wanted
            .into_iter()
            .filter(|(_, allowed)| *allowed)
            .map(|(dir, _)| dir)
            .filter(|dir| {
                let next = me.step(*dir);
                next.distance(center) == distance
                    && self.can_walk_to(view, me, *dir)
                    && (!keep_attack || !can_attack_now || self.can_use_attack(next, &target, view.world))
            })
            .collect();

        if options.is_empty() {
            return None;
        }
        options.shuffle(&mut *ctx.rng);
        let index = ctx.rng.gen_range(0..options.len());
        Some(options[index])
    }

    /// Direct step relative to `target` without a path search. Moves away
    /// from a target that is closer than the preferred distance, or when
    /// fleeing.
    pub(crate) fn distance_step(&mut self, ctx: &mut TickContext<'_>, target: Position, flee: bool) -> DistanceStep {
        let me = self.position();
        let dx = me.distance_x(target);
        let dy = me.distance_y(target);
        let distance = dx.max(dy);

        if !flee && (distance > self.target_distance || !ctx.world.is_sight_clear(me, target, true)) {
            return DistanceStep::Defer;
        }
        if !flee && distance == self.target_distance {
            return DistanceStep::Hold;
        }

        let offset_x = me.offset_x(target);
        let offset_y = me.offset_y(target);

        // adjacent targets slow the creature down
        if dx <= 1 && dy <= 1 {
            if self.step_duration < MAX_STEP_DURATION {
                self.step_duration += 1;
            }
        } else if self.step_duration > 0 {
            self.step_duration -= 1;
        }

        if offset_x == 0 && offset_y == 0 {
            return match self.random_step(ctx) {
                Some(dir) => DistanceStep::Step(dir),
                None => DistanceStep::Defer,
            };
        }

        if dx == dy {
            return if offset_x >= 1 && offset_y >= 1 {
                // target north-west
                self.diagonal_step(ctx, flee, [South, East], SouthEast, [North, West], [(West, SouthWest), (North, NorthEast)])
            } else if offset_x <= -1 && offset_y <= -1 {
                // target south-east
                self.diagonal_step(ctx, flee, [West, North], NorthWest, [South, East], [(South, SouthWest), (East, NorthEast)])
            } else if offset_x >= 1 && offset_y <= -1 {
                // target south-west
                self.diagonal_step(ctx, flee, [North, East], NorthEast, [South, West], [(West, NorthWest), (South, SouthEast)])
            } else {
                // target north-east
                self.diagonal_step(ctx, flee, [West, South], SouthWest, [North, East], [(East, SouthEast), (North, NorthWest)])
            };
        }

        if dy > dx {
            if offset_y >= 0 {
                // target north
                self.axis_step(ctx, flee, South, [West, East], offset_x, [(West, SouthWest), (East, SouthEast)], North)
            } else {
                self.axis_step(ctx, flee, North, [West, East], offset_x, [(West, NorthWest), (East, NorthEast)], South)
            }
        } else if offset_x >= 0 {
            // target west
            self.axis_step(ctx, flee, East, [North, South], offset_y, [(South, SouthEast), (North, NorthEast)], West)
        } else {
            self.axis_step(ctx, flee, West, [North, South], offset_y, [(North, NorthWest), (South, SouthWest)], East)
        }
    }

    fn pick(ctx: &mut TickContext<'_>, first: Direction, second: Direction) -> Direction {
        if ctx.coin() {
            first
        } else {
            second
        }
    }

    /// Target on an exact diagonal: step off along either axis away from it,
    /// then the far corner, then the flee sidesteps, then the extras
    fn diagonal_step(
        &self,
        ctx: &mut TickContext<'_>,
        flee: bool,
        away: [Direction; 2],
        corner: Direction,
        flee_pair: [Direction; 2],
        extras: [(Direction, Direction); 2],
    ) -> DistanceStep {
        let me = self.position();
        let a = self.can_walk_to(ctx, me, away[0]);
        let b = self.can_walk_to(ctx, me, away[1]);
        if a && b {
            return DistanceStep::Step(Self::pick(ctx, away[0], away[1]));
        } else if a {
            return DistanceStep::Step(away[0]);
        } else if b {
            return DistanceStep::Step(away[1]);
        } else if self.can_walk_to(ctx, me, corner) {
            return DistanceStep::Step(corner);
        }

        let fa = self.can_walk_to(ctx, me, flee_pair[0]);
        let fb = self.can_walk_to(ctx, me, flee_pair[1]);
        if flee {
            if fa && fb {
                return DistanceStep::Step(Self::pick(ctx, flee_pair[0], flee_pair[1]));
            } else if fa {
                return DistanceStep::Step(flee_pair[0]);
            } else if fb {
                return DistanceStep::Step(flee_pair[1]);
            }
        }

        for (side, check) in extras {
            let side_free = if side == flee_pair[0] {
                fa
            } else if side == flee_pair[1] {
                fb
            } else {
                self.can_walk_to(ctx, me, side)
            };
            if side_free && self.can_walk_to(ctx, me, check) {
                return DistanceStep::Step(side);
            }
        }

        DistanceStep::Hold
    }

    /// Target along one axis: straight away, then the sides (biased by the
    /// other axis offset), then the corners on the far side
    #[allow(clippy::too_many_arguments)]
    fn axis_step(
        &self,
        ctx: &mut TickContext<'_>,
        flee: bool,
        away: Direction,
        sides: [Direction; 2],
        side_offset: i32,
        corners: [(Direction, Direction); 2],
        toward: Direction,
    ) -> DistanceStep {
        let me = self.position();
        if self.can_walk_to(ctx, me, away) {
            return DistanceStep::Step(away);
        }

        let first = self.can_walk_to(ctx, me, sides[0]);
        let second = self.can_walk_to(ctx, me, sides[1]);
        if first && second && side_offset == 0 {
            return DistanceStep::Step(Self::pick(ctx, sides[0], sides[1]));
        } else if first && side_offset <= 0 {
            return DistanceStep::Step(sides[0]);
        } else if second && side_offset >= 0 {
            return DistanceStep::Step(sides[1]);
        }

        if flee {
            if first && second {
                return DistanceStep::Step(Self::pick(ctx, sides[0], sides[1]));
            } else if first {
                return DistanceStep::Step(sides[0]);
            } else if second {
                return DistanceStep::Step(sides[1]);
            }
        }

        let [(side_a, corner_a), (side_b, corner_b)] = corners;
        let ca = self.can_walk_to(ctx, me, corner_a);
        let cb = self.can_walk_to(ctx, me, corner_b);
        if ca || cb {
            let side_free = |side: Direction| if side == sides[0] { first } else { second };
            let dir = if ca && cb {
                Self::pick(ctx, corner_a, corner_b)
            } else if side_free(side_a) {
                side_a
            } else if ca {
                corner_a
            } else if side_free(side_b) {
                side_b
            } else {
                corner_b
            };
            return DistanceStep::Step(dir);
        }

        if flee && self.can_walk_to(ctx, me, toward) {
            return DistanceStep::Step(toward);
        }

        DistanceStep::Hold
    }

    fn follow_step(&mut self, ctx: &mut TickContext<'_>) -> Option<Direction> {
        self.random_stepping = false;
        if let Some(dir) = self.walk_queue.pop_front() {
            return Some(dir);
        }

        self.ignore_field_damage = false;
        if self.attacked.is_none() || self.attacked != self.follow {
            return None;
        }
        if self.is_fleeing() {
            self.dance_step(ctx, false, false)
        } else if self.template.static_attack_chance < ctx.roll() {
            self.dance_step(ctx, true, true)
        } else {
            None
        }
    }

    fn walk_back_step(&mut self, ctx: &TickContext<'_>) -> Option<Direction> {
        if let Some(dir) = self.walk_queue.pop_front() {
            return Some(dir);
        }

        self.ignore_field_damage = false;
        let me = self.position();
        let Some(anchor) = self.spawn.filter(|anchor| anchor.z == me.z) else {
            self.walking_back = false;
            return None;
        };
        let distance = me.distance(anchor);
        if distance == 0 {
            self.walking_back = false;
            return None;
        }

        let params = PathParams {
            min_target_dist: 0,
            max_target_dist: (distance - WALK_BACK_SLACK).max(0),
            full_path_search: true,
            clear_sight: true,
            keep_distance: false,
            max_search_dist: distance,
            ignore_field_damage: self.ignore_field_damage,
        };
        match ctx.world.request_path(me, anchor, &params) {
            Some(steps) => self.walk_queue.extend(steps),
            None => {
                debug!(creature = self.id, ?anchor, "no way back to spawn");
                self.walking_back = false;
            }
        }
        None
    }

    /// Direction of the next step, if any. Pushers clear the destination
    /// tile as a side effect.
    pub(crate) fn next_step(&mut self, ctx: &mut TickContext<'_>) -> Option<Direction> {
        if self.idle || self.body.is_dead() {
            return None;
        }

        let dir = if self.follow.is_some() && self.has_follow_path {
            self.follow_step(ctx)
        } else if self.walking_back {
            self.walk_back_step(ctx)
        } else if ctx.now_ms.saturating_sub(self.last_move_ms) >= RANDOM_STEP_DELAY_MS {
            self.random_stepping = true;
            self.random_step(ctx)
        } else {
            None
        }?;

        let pushes_items = self.template.can_push_items;
        let pushes_creatures = self.template.can_push_creatures && !self.is_summon();
        if pushes_items || pushes_creatures {
            if let Some(tile) = ctx.world.tile(self.position().step(dir)) {
                if pushes_items {
                    self.push_items(ctx, &tile, dir);
                }
                if pushes_creatures {
                    self.push_creatures(ctx, &tile);
                }
            }
        }

        Some(dir)
    }

    fn push_item(&self, ctx: &TickContext<'_>, from: Position, item: &ItemRef, dir: Direction) -> bool {
        position::push_item_offsets(dir).iter().any(|(x, y)| {
            let to = from.translate(*x, *y);
            ctx.world.tile(to).is_some()
                && ctx.world.can_throw_to(from, to)
                && ctx.world.move_item(from, item.id, to).is_ok()
        })
    }

    /// Move movable blockers off `tile`, destroying the ones that will not
    /// budge once the push budget is used up
    pub(crate) fn push_items(&self, ctx: &TickContext<'_>, tile: &TileRef, dir: Direction) {
        let mut moved = 0;
        let mut removed = 0;

        for item in tile.items.iter().rev() {
            if !item.movable || !item.is_blocking() {
                continue;
            }
            if moved < MAX_ITEM_PUSHES && self.push_item(ctx, tile.position, item, dir) {
                moved += 1;
            } else if !item.corpse && ctx.world.remove_item(tile.position, item.id).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            ctx.world.magic_effect(tile.position, MagicEffect::Poff);
        }
    }

    fn push_creature(&self, ctx: &mut TickContext<'_>, body: &CreatureBody) -> bool {
        let mut dirs = Direction::CARDINALS;
        dirs.shuffle(&mut *ctx.rng);

        for dir in dirs {
            let to = body.position.step(dir);
            let free = ctx.world.tile(to).is_some_and(|t| !t.blocks_path);
            if !free {
                continue;
            }
            if let Ok(landed) = ctx.world.move_creature(body.id, dir) {
                ctx.deferred.send(
                    body.id,
                    Deferred::Moved {
                        from: body.position,
                        to: landed,
                    },
                );
                return true;
            }
        }
        false
    }

    /// Shove pushable monsters off `tile`. One that cannot be moved is killed
    /// in place.
    pub(crate) fn push_creatures(&self, ctx: &mut TickContext<'_>, tile: &TileRef) {
        let mut killed = 0;

        for occupant in &tile.creatures {
            if occupant.id == self.id || !occupant.pushable {
                continue;
            }
            let Some(body) = ctx.world.creature(occupant.id).filter(|b| b.is_monster()) else {
                continue;
            };
            if self.push_creature(ctx, &body) {
                continue;
            }
            match ctx.world.change_health(body.id, -body.health) {
                Ok(_) => killed += 1,
                Err(e) => debug!(creature = self.id, blocker = body.id, "push kill rejected: {}", e),
            }
        }

        if killed > 0 {
            ctx.world.magic_effect(tile.position, MagicEffect::BlockHit);
        }
    }

    /// Time one straight step takes at the current speed
    pub(crate) fn step_interval_ms(&self) -> Option<u64> {
        let speed = u64::from(self.body.speed);
        if speed == 0 {
            return None;
        }
        let raw = (1000 * u64::from(GROUND_SPEED)).div_ceil(speed);
        let mut step = raw.div_ceil(STEP_ROUNDING_MS) * STEP_ROUNDING_MS;
        if self.step_duration >= 1 && !self.is_fleeing() && !self.is_summon() {
            step *= 2;
        }
        Some(step)
    }

    /// Spend the elapsed time on steps
    pub(crate) fn walk(&mut self, ctx: &mut TickContext<'_>, interval: u64) {
        self.walk_ticks = self.walk_ticks.saturating_add(interval);

        for _ in 0..MAX_STEPS_PER_THINK {
            let Some(step_ms) = self.step_interval_ms() else {
                self.walk_ticks = 0;
                return;
            };
            if self.walk_ticks < step_ms {
                return;
            }

            let Some(dir) = self.next_step(ctx) else {
                self.walk_ticks = self.walk_ticks.min(step_ms);
                return;
            };

            let from = self.position();
            match ctx.world.move_creature(self.id, dir) {
                Ok(to) => {
                    let cost = if dir.is_diagonal() { step_ms * 3 } else { step_ms };
                    self.walk_ticks = self.walk_ticks.saturating_sub(cost);
                    self.body.position = to;
                    self.last_move_ms = ctx.now_ms;
                    self.facing = dir;
                    ctx.deferred.send(self.id, Deferred::Moved { from, to });
                }
                Err(e) => {
                    debug!(creature = self.id, ?dir, "step failed: {}", e);
                    self.walk_queue.clear();
                    self.on_walk_aborted();
                    self.walk_ticks = self.walk_ticks.min(step_ms);
                    return;
                }
            }
        }
    }
}
