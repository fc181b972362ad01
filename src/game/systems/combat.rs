//! Combat scheduler
//!
//! Attack and defense loops driven by tick accumulators, the target change
//! governor, summon spawning, voices and sounds, and incoming damage.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::ambient::AmbientRequest;
use crate::game::constants::combat::{MAX_MITIGATION, MELEE_GRACE_MS};
use crate::game::dispatcher::Deferred;
use crate::game::monster::{Monster, TickContext};
use crate::game::state::{CreatureBody, CreatureId};
use crate::game::systems::targeting::TargetSearch;
use crate::game::template::{AbilityBlock, CombatType};
use crate::game::world::{MagicEffect, SoundEffect, SpeakKind, World};
use crate::util::position::{Direction, Position};

/// Outcome of the readiness check for one ability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpellCheck {
    pub ready: bool,
    pub in_range: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    None,
    Armor,
}

impl Monster {
    /// Whether an attack could reach `target` from `from`. Peaceful creatures
    /// never need one.
    pub fn can_use_attack(&self, from: Position, target: &CreatureBody, world: &dyn World) -> bool {
        if !self.is_hostile() {
            return true;
        }

        self.template
            .attacks
            .iter()
            .find(|attack| attack.range != 0 && from.distance(target.position) <= attack.range)
            .is_some_and(|_| world.is_sight_clear(from, target.position, true))
    }

    /// Cooldown, melee grace and range test for one ability.
    ///
    /// `reset_ticks` is cleared when the ability's period is still longer than
    /// the accumulator, so slow abilities are not starved by faster ones.
    pub(crate) fn can_use_spell(
        &mut self,
        from: Position,
        target: Position,
        block: &AbilityBlock,
        interval: u32,
        now_ms: u64,
        reset_ticks: &mut bool,
    ) -> SpellCheck {
        let not_ready = |in_range| SpellCheck { ready: false, in_range };

        if block.melee && self.is_fleeing() {
            return not_ready(true);
        }

        if self.extra_melee {
            self.last_melee_ms = now_ms;
        } else if block.melee && now_ms.saturating_sub(self.last_melee_ms) < MELEE_GRACE_MS {
            return not_ready(true);
        }

        if !block.melee || !self.extra_melee {
            if block.speed > self.attack_ticks {
                *reset_ticks = false;
                return not_ready(true);
            }
            if block.speed > 0 && self.attack_ticks % block.speed >= interval {
                return not_ready(true);
            }
        }

        if block.range != 0 && from.distance(target) > block.range {
            return not_ready(false);
        }

        SpellCheck {
            ready: true,
            in_range: true,
        }
    }

    /// Attack the current target if the line of sight allows it
    pub fn on_attacking(&mut self, ctx: &mut TickContext<'_>, interval: u32) {
        let Some(target) = self.attacked.and_then(|id| ctx.world.creature(id)) else {
            return;
        };
        if ctx.world.is_sight_clear(self.position(), target.position, true) {
            self.do_attacking(ctx, interval);
        }
    }

    pub(crate) fn do_attacking(&mut self, ctx: &mut TickContext<'_>, interval: u32) {
        let Some(target) = self.attacked.and_then(|id| ctx.world.creature(id)) else {
            return;
        };
        if self.is_summon() && target.id == self.id {
            return;
        }

        let mut update_look = true;
        let mut reset_ticks = interval != 0;
        self.attack_ticks = self.attack_ticks.saturating_add(interval);

        let me = self.position();
        let template = self.template.clone();
        for block in &template.attacks {
            if block.spell.is_empty() || (block.melee && self.is_fleeing()) {
                continue;
            }

            let check = self.can_use_spell(me, target.position, block, interval, ctx.now_ms, &mut reset_ticks);
            if check.ready && block.chance >= ctx.roll() {
                if update_look {
                    self.update_look_direction(ctx, &target);
                    update_look = false;
                }
                let cast = ctx
                    .world
                    .cast_spell(self.id, &block.spell, Some(target.id), block.min_combat, block.max_combat);
                debug!(creature = self.id, target = target.id, spell = %block.spell, cast, "attack");
                if block.melee {
                    self.extra_melee = false;
                }
            }

            if !check.in_range && block.melee {
                self.extra_melee = true;
            }
        }

        if update_look {
            self.update_look_direction(ctx, &target);
        }
        if reset_ticks {
            self.attack_ticks = 0;
        }
    }

    /// Face the attacked creature. On exact diagonals the current facing
    /// decides which of the two sides to turn to.
    pub(crate) fn update_look_direction(&mut self, ctx: &TickContext<'_>, target: &CreatureBody) {
        let me = self.position();
        let offset_x = target.position.offset_x(me);
        let offset_y = target.position.offset_y(me);
        let (dx, dy) = (offset_x.abs(), offset_y.abs());
        let current = self.facing;

        let dir = if dx > dy {
            if offset_x < 0 {
                Direction::West
            } else {
                Direction::East
            }
        } else if dx < dy {
            if offset_y < 0 {
                Direction::North
            } else {
                Direction::South
            }
        } else if offset_x < 0 && offset_y < 0 {
            match current {
                Direction::South => Direction::West,
                Direction::East => Direction::North,
                other => other,
            }
        } else if offset_x < 0 && offset_y > 0 {
            match current {
                Direction::North => Direction::West,
                Direction::East => Direction::South,
                other => other,
            }
        } else if offset_x > 0 && offset_y < 0 {
            match current {
                Direction::South => Direction::East,
                Direction::West => Direction::North,
                other => other,
            }
        } else {
            match current {
                Direction::North => Direction::East,
                Direction::West => Direction::South,
                other => other,
            }
        };

        ctx.world.turn_creature(self.id, dir);
        self.facing = dir;
    }

    /// Attacked creature vanished: start over and allow an immediate swing
    /// at whatever comes next
    pub(crate) fn on_attacked_creature_disappear(&mut self) {
        self.attack_ticks = 0;
        self.extra_melee = true;
    }

    /// Opportunistic target reconsideration, gated by challenge focus and a
    /// cooldown after every reconsideration
    pub(crate) fn on_think_target(&mut self, ctx: &mut TickContext<'_>, interval: u32) {
        let speed = self.template.change_target_speed;
        if self.is_summon() || speed == 0 {
            return;
        }

        let elapsed = i64::from(interval);
        let mut can_change = true;

        if self.challenge_focus_duration > 0 {
            self.challenge_focus_duration = (self.challenge_focus_duration - elapsed).max(0);
            can_change = false;
        }

        if self.target_change_cooldown > 0 {
            self.target_change_cooldown -= elapsed;
            if self.target_change_cooldown <= 0 {
                self.target_change_cooldown = 0;
            } else {
                can_change = false;
            }
        }

        if !can_change {
            return;
        }

        self.target_change_ticks = self.target_change_ticks.saturating_add(interval);
        if self.target_change_ticks < speed {
            return;
        }

        self.target_change_ticks = 0;
        self.target_change_cooldown = i64::from(speed);
        self.challenge_focus_duration = 0;

        if self.template.change_target_chance >= ctx.roll() {
            let strategy = if self.target_distance <= 1 {
                TargetSearch::Nearest
            } else {
                TargetSearch::Default
            };
            self.search_target(ctx, strategy);
        }
    }

    /// Live plus pending summons, optionally of one name only
    fn summon_count(&self, world: &dyn World, name: Option<&str>) -> usize {
        let matches = |candidate: &str| name.map_or(true, |n| n.eq_ignore_ascii_case(candidate));
        let live = self
            .summons
            .iter()
            .filter_map(|id| world.creature(*id))
            .filter(|body| !body.is_dead() && matches(&body.name))
            .count();
        let pending = self.pending_summons.iter().filter(|n| matches(n)).count();
        live + pending
    }

    /// Defensive spells at self, then summons while engaged
    pub(crate) fn on_think_defense(&mut self, ctx: &mut TickContext<'_>, interval: u32) {
        let mut reset_ticks = true;
        self.defense_ticks = self.defense_ticks.saturating_add(interval);

        let template = self.template.clone();
        for block in &template.defenses {
            if block.speed > self.defense_ticks {
                reset_ticks = false;
                continue;
            }
            if block.speed > 0 && self.defense_ticks % block.speed >= interval {
                continue;
            }
            if block.chance >= ctx.roll() {
                ctx.world
                    .cast_spell(self.id, &block.spell, None, block.min_combat, block.max_combat);
            }
        }

        let max_summons = template.max_summons as usize;
        if !self.is_summon() && self.summon_count(ctx.world, None) < max_summons && self.has_follow_path {
            for block in &template.summons {
                if block.speed > self.defense_ticks {
                    reset_ticks = false;
                    continue;
                }
                if self.summon_count(ctx.world, None) >= max_summons {
                    continue;
                }
                if block.speed > 0 && self.defense_ticks % block.speed >= interval {
                    continue;
                }
                if self.summon_count(ctx.world, Some(&block.name)) >= block.count as usize {
                    continue;
                }
                if block.chance < ctx.roll() {
                    continue;
                }

                self.pending_summons.push(block.name.clone());
                ctx.deferred.send(
                    self.id,
                    Deferred::Summon {
                        name: block.name.clone(),
                        near: self.position(),
                        force: block.force,
                    },
                );
            }
        }

        if reset_ticks {
            self.defense_ticks = 0;
        }
    }

    /// The engine placed a requested summon
    pub fn on_summon_placed(&mut self, name: &str, id: CreatureId) {
        if let Some(index) = self.pending_summons.iter().position(|n| n == name) {
            self.pending_summons.swap_remove(index);
        }
        self.summons.push(id);
    }

    pub fn on_summon_failed(&mut self, name: &str) {
        if let Some(index) = self.pending_summons.iter().position(|n| n == name) {
            self.pending_summons.swap_remove(index);
        }
    }

    pub(crate) fn on_think_yell(&mut self, ctx: &mut TickContext<'_>, interval: u32) {
        let speed = self.template.yell_speed_ticks;
        if speed == 0 {
            return;
        }

        self.yell_ticks = self.yell_ticks.saturating_add(interval);
        if self.yell_ticks < speed {
            return;
        }
        self.yell_ticks = 0;

        if self.template.voices.is_empty() || self.template.yell_chance < ctx.roll() {
            return;
        }
        let index = ctx.rng.gen_range(0..self.template.voices.len());
        let voice = &self.template.voices[index];

        if voice.generated {
            if ctx.ambient_allowed {
                ctx.ambient.submit(AmbientRequest {
                    creature: self.id,
                    name: self.body.name.clone(),
                    prompt: voice.text.clone(),
                    yell: voice.yell,
                });
            }
            return;
        }

        let kind = if voice.yell { SpeakKind::Yell } else { SpeakKind::Say };
        ctx.world.creature_say(self.id, kind, &voice.text);
    }

    pub(crate) fn on_think_sound(&mut self, ctx: &mut TickContext<'_>, interval: u32) {
        let speed = self.template.sound_speed_ticks;
        if speed == 0 {
            return;
        }

        self.sound_ticks = self.sound_ticks.saturating_add(interval);
        if self.sound_ticks < speed {
            return;
        }
        self.sound_ticks = 0;

        if self.template.sound_chance < ctx.roll() {
            return;
        }
        if let Some(sound) = self.template.sounds.choose(&mut *ctx.rng) {
            ctx.world
                .sound_effect(self.position(), SoundEffect(*sound), Some(self.id));
        }
    }

    pub fn mitigation(&self) -> f32 {
        self.template.mitigation.min(MAX_MITIGATION)
    }

    /// Reduce `damage` by armor, mitigation and elemental modifiers
    pub(crate) fn block_hit(&self, ctx: &mut TickContext<'_>, combat: CombatType, damage: &mut i32) -> BlockType {
        let mut block = BlockType::None;

        if combat == CombatType::Physical {
            let armor = self.template.armor;
            if armor > 3 {
                *damage -= ctx.rng.gen_range(armor / 2..=armor - (armor % 2 + 1));
            } else if armor > 0 {
                *damage -= 1;
            }
            if *damage <= 0 {
                *damage = 0;
                block = BlockType::Armor;
            }
        }

        let mitigation = self.mitigation();
        if *damage > 0 && mitigation > 0.0 {
            *damage -= (*damage as f32 * mitigation / 100.0).round() as i32;
        }

        if *damage != 0 {
            let modifier = self.template.element_modifier(combat);
            if modifier != 0 {
                *damage = (f64::from(*damage) * f64::from(100 - modifier) / 100.0).round() as i32;
                if *damage <= 0 {
                    *damage = 0;
                    block = BlockType::Armor;
                }
            }
        }

        block
    }

    /// Apply an incoming hit. Returns the damage actually dealt.
    pub fn apply_damage(
        &mut self,
        ctx: &mut TickContext<'_>,
        attacker: Option<CreatureId>,
        combat: CombatType,
        damage: i32,
    ) -> i32 {
        if self.dead {
            return 0;
        }

        if combat == CombatType::Healing {
            if let Err(e) = ctx.world.change_health(self.id, damage.saturating_abs()) {
                debug!(creature = self.id, "heal rejected: {}", e);
            }
            return 0;
        }

        self.set_idle(ctx, false);

        let mut dealt = damage.saturating_abs();
        let block = self.block_hit(ctx, combat, &mut dealt);
        if block == BlockType::Armor {
            ctx.world.magic_effect(self.position(), MagicEffect::BlockHit);
        }
        if dealt == 0 {
            return 0;
        }

        match ctx.world.change_health(self.id, -dealt) {
            Ok(health) => self.body.health = health,
            Err(e) => {
                debug!(creature = self.id, "damage rejected: {}", e);
                return 0;
            }
        }

        if let Some(attacker) = attacker {
            let entry = self.damage_map.entry(attacker).or_default();
            entry.total += i64::from(dealt);
            entry.last_hit_ms = ctx.now_ms;

            let reflect = self.template.reflect_percent(combat);
            if reflect > 0 && attacker != self.id {
                let reflected = (i64::from(dealt) * i64::from(reflect) / 100).clamp(0, i64::from(i32::MAX)) as i32;
                if reflected > 0 {
                    if let Err(e) = ctx.world.change_health(attacker, -reflected) {
                        debug!(creature = self.id, attacker, "reflect rejected: {}", e);
                    }
                }
            }
        }

        if self.random_stepping {
            self.ignore_field_damage = true;
        }

        dealt
    }

    /// Player credited with the corpse: the top damage dealer, or that
    /// dealer's master when the dealer was a player's summon
    pub fn corpse_owner(&self, world: &dyn World) -> Option<CreatureId> {
        let (top, _) = self
            .damage_map
            .iter()
            .max_by_key(|(id, entry)| (entry.total, std::cmp::Reverse(**id)))?;
        let attacker = world.creature(*top)?;
        if attacker.is_player() {
            return Some(attacker.id);
        }
        attacker
            .master
            .and_then(|id| world.creature(id))
            .filter(|master| master.is_player())
            .map(|master| master.id)
    }
}
