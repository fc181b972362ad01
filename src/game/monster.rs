//! Per-creature AI state
//!
//! A `Monster` is the brain of one creature. It owns every counter and set
//! the decision components mutate, and it is only ever touched by its own
//! think step (or by the engine between think phases). Other creatures are
//! referenced by id and looked up through the world on use, so a creature
//! that vanished reads as absent instead of being kept alive.
//!
//! The decision components live in `game::systems` as further `impl Monster`
//! blocks: targeting, combat, movement and lifecycle.

use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::ambient::AmbientQueue;
use crate::config::AiConfig;
use crate::game::constants::combat::CHANCE_ROLL_MAX;
use crate::game::dispatcher::{Deferred, DeferredSender};
use crate::game::state::{CreatureBody, CreatureId};
use crate::game::template::MonsterTemplate;
use crate::game::world::World;
use crate::script::{HookEvent, HookOutcome};
use crate::util::position::{self, Direction, Position};

/// Everything a think step may touch besides its own brain
pub struct TickContext<'a> {
    pub world: &'a dyn World,
    pub deferred: &'a DeferredSender,
    pub ambient: &'a AmbientQueue,
    pub config: &'a AiConfig,
    pub rng: &'a mut StdRng,
    /// Simulation clock
    pub now_ms: u64,
    /// Generated yells may be scheduled this tick
    pub ambient_allowed: bool,
}

impl TickContext<'_> {
    /// Percentage roll in `1..=100`
    #[inline]
    pub fn roll(&mut self) -> u32 {
        self.rng.gen_range(1..=CHANCE_ROLL_MAX)
    }

    #[inline]
    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }
}

/// Entry of the ordered target list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetEntry {
    pub id: CreatureId,
    /// Counted in `players_on_screen` while listed
    pub counted_player: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DamageEntry {
    pub total: i64,
    pub last_hit_ms: u64,
}

pub struct Monster {
    pub(crate) id: CreatureId,
    pub(crate) template: Arc<MonsterTemplate>,
    /// Own body as of the last refresh
    pub(crate) body: CreatureBody,
    /// Spawn anchor, `None` for summons and free-roaming creatures
    pub(crate) spawn: Option<Position>,

    // target registry
    pub(crate) targets: VecDeque<TargetEntry>,
    pub(crate) friends: FxHashSet<CreatureId>,
    pub(crate) players_on_screen: u32,
    pub(crate) attacked: Option<CreatureId>,
    pub(crate) follow: Option<CreatureId>,

    // combat scheduler
    pub(crate) attack_ticks: u32,
    pub(crate) defense_ticks: u32,
    pub(crate) target_change_ticks: u32,
    pub(crate) yell_ticks: u32,
    pub(crate) sound_ticks: u32,
    pub(crate) target_change_cooldown: i64,
    pub(crate) challenge_focus_duration: i64,
    pub(crate) challenge_melee_duration: i64,
    pub(crate) target_distance: i32,
    pub(crate) extra_melee: bool,
    pub(crate) last_melee_ms: u64,
    pub(crate) summons: Vec<CreatureId>,
    /// Summons requested but not yet placed by the engine
    pub(crate) pending_summons: Vec<String>,
    pub(crate) damage_map: FxHashMap<CreatureId, DamageEntry>,

    // movement planner
    pub(crate) walk_queue: VecDeque<Direction>,
    pub(crate) has_follow_path: bool,
    pub(crate) updating_path: bool,
    pub(crate) force_update_follow_path: bool,
    pub(crate) walk_update_ticks: u64,
    pub(crate) walk_ticks: u64,
    pub(crate) last_move_ms: u64,
    pub(crate) step_duration: i32,
    pub(crate) walking_back: bool,
    pub(crate) facing: Direction,
    pub(crate) random_stepping: bool,
    pub(crate) ignore_field_damage: bool,

    // lifecycle
    pub(crate) idle: bool,
    pub(crate) dead: bool,
}

impl Monster {
    /// Brain for a creature that has a template. Starts idle; the first
    /// appear notification decides whether it wakes up.
    pub fn new(body: CreatureBody, template: Arc<MonsterTemplate>, spawn: Option<Position>) -> Self {
        Self {
            id: body.id,
            target_distance: template.target_distance,
            template,
            body,
            spawn,
            targets: VecDeque::new(),
            friends: FxHashSet::default(),
            players_on_screen: 0,
            attacked: None,
            follow: None,
            attack_ticks: 0,
            defense_ticks: 0,
            target_change_ticks: 0,
            yell_ticks: 0,
            sound_ticks: 0,
            target_change_cooldown: 0,
            challenge_focus_duration: 0,
            challenge_melee_duration: 0,
            extra_melee: false,
            last_melee_ms: 0,
            summons: Vec::new(),
            pending_summons: Vec::new(),
            damage_map: FxHashMap::default(),
            walk_queue: VecDeque::new(),
            has_follow_path: false,
            updating_path: false,
            force_update_follow_path: false,
            walk_update_ticks: 0,
            walk_ticks: 0,
            last_move_ms: 0,
            step_duration: 0,
            walking_back: false,
            facing: Direction::South,
            random_stepping: false,
            ignore_field_damage: false,
            idle: true,
            dead: false,
        }
    }

    // --- accessors ---

    #[inline]
    pub fn id(&self) -> CreatureId {
        self.id
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.body.position
    }

    pub fn body(&self) -> &CreatureBody {
        &self.body
    }

    pub fn template(&self) -> &Arc<MonsterTemplate> {
        &self.template
    }

    pub fn spawn_anchor(&self) -> Option<Position> {
        self.spawn
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    #[inline]
    pub fn is_summon(&self) -> bool {
        self.body.master.is_some()
    }

    pub fn master(&self) -> Option<CreatureId> {
        self.body.master
    }

    #[inline]
    pub fn is_hostile(&self) -> bool {
        self.template.hostile
    }

    /// Low on health and not held in place by a challenge
    pub fn is_fleeing(&self) -> bool {
        !self.is_summon()
            && self.body.health <= self.template.run_away_health
            && self.challenge_focus_duration <= 0
            && self.challenge_melee_duration <= 0
    }

    pub fn attacked(&self) -> Option<CreatureId> {
        self.attacked
    }

    pub fn follow(&self) -> Option<CreatureId> {
        self.follow
    }

    pub fn targets(&self) -> impl Iterator<Item = CreatureId> + '_ {
        self.targets.iter().map(|t| t.id)
    }

    pub fn has_target(&self, id: CreatureId) -> bool {
        self.targets.iter().any(|t| t.id == id)
    }

    pub fn friends(&self) -> impl Iterator<Item = CreatureId> + '_ {
        self.friends.iter().copied()
    }

    pub fn has_friend(&self, id: CreatureId) -> bool {
        self.friends.contains(&id)
    }

    pub fn players_on_screen(&self) -> u32 {
        self.players_on_screen
    }

    pub fn summons(&self) -> &[CreatureId] {
        &self.summons
    }

    pub fn damage_map(&self) -> &FxHashMap<CreatureId, DamageEntry> {
        &self.damage_map
    }

    pub fn target_distance(&self) -> i32 {
        self.target_distance
    }

    pub fn is_walking_back(&self) -> bool {
        self.walking_back
    }

    pub fn has_follow_path(&self) -> bool {
        self.has_follow_path
    }

    // --- shared helpers ---

    /// Re-read the own body. False when the creature is gone from the world.
    pub(crate) fn refresh_body(&mut self, world: &dyn World) -> bool {
        match world.creature(self.id) {
            Some(body) => {
                self.body = body;
                true
            }
            None => false,
        }
    }

    /// Inside this creature's view port
    #[inline]
    pub(crate) fn can_see(&self, config: &AiConfig, pos: Position) -> bool {
        position::can_see(self.position(), pos, config.view_range_x, config.view_range_y)
    }

    #[inline]
    pub(crate) fn can_see_creature(&self, other: &CreatureBody) -> bool {
        !other.invisible || self.template.can_see_invisible
    }

    /// Run the template hook for `event`
    pub(crate) fn hook(&self, ctx: &TickContext<'_>, event: &HookEvent<'_>) -> HookOutcome {
        self.template
            .hooks
            .dispatch(&self.body, event, ctx.world, ctx.config.max_hook_depth)
    }

    /// Set or clear the attacked creature. Fails for a creature out of view.
    pub(crate) fn set_attacked(&mut self, ctx: &TickContext<'_>, target: Option<&CreatureBody>) -> bool {
        match target {
            Some(target) if !self.can_see(ctx.config, target.position) => {
                self.attacked = None;
                ctx.world.set_attack_target(self.id, None);
                false
            }
            Some(target) => {
                self.attacked = Some(target.id);
                ctx.world.set_attack_target(self.id, Some(target.id));
                true
            }
            None => {
                self.attacked = None;
                ctx.world.set_attack_target(self.id, None);
                true
            }
        }
    }

    /// Set or clear the followed creature. A new follow target aborts the
    /// current walk and schedules a path update.
    pub(crate) fn set_follow(&mut self, ctx: &TickContext<'_>, target: Option<&CreatureBody>) -> bool {
        match target {
            Some(target) => {
                if self.follow == Some(target.id) {
                    return true;
                }
                if target.position.z != self.position().z || !self.can_see(ctx.config, target.position) {
                    self.follow = None;
                    return false;
                }
                if !self.walk_queue.is_empty() {
                    self.walk_queue.clear();
                    self.on_walk_aborted();
                }
                self.has_follow_path = false;
                self.force_update_follow_path = false;
                self.follow = Some(target.id);
                self.updating_path = true;
            }
            None => {
                self.updating_path = false;
                self.follow = None;
            }
        }
        true
    }

    /// Attacked or followed creature vanished or went out of view
    pub(crate) fn release_focus_on(&mut self, ctx: &TickContext<'_>, id: CreatureId) {
        if self.attacked == Some(id) {
            self.set_attacked(ctx, None);
            self.on_attacked_creature_disappear();
        }
        if self.follow == Some(id) {
            self.set_follow(ctx, None);
        }
    }

    /// Drop every reference to `id`. Used when a creature leaves the world.
    pub fn forget(&mut self, id: CreatureId) {
        if let Some(index) = self.targets.iter().position(|t| t.id == id) {
            if let Some(entry) = self.targets.remove(index) {
                if entry.counted_player {
                    self.players_on_screen = self.players_on_screen.saturating_sub(1);
                }
            }
        }
        self.friends.remove(&id);
        self.summons.retain(|s| *s != id);
        self.damage_map.remove(&id);
        if self.attacked == Some(id) {
            self.attacked = None;
            self.on_attacked_creature_disappear();
        }
        if self.follow == Some(id) {
            self.follow = None;
            self.updating_path = false;
            self.has_follow_path = false;
            self.walk_queue.clear();
        }
    }

    /// One think step: hooks, spawn enforcement, idle evaluation, then
    /// movement, target selection and ability scheduling.
    pub fn think(&mut self, ctx: &mut TickContext<'_>) {
        let interval = ctx.config.tick_interval_ms;
        if self.dead || !self.refresh_body(ctx.world) || self.body.is_dead() {
            return;
        }

        self.think_follow(ctx, interval);

        if self.hook(ctx, &HookEvent::Think { interval_ms: interval }) == HookOutcome::Handled {
            return;
        }

        self.tick_challenge_melee(interval);

        if !self.can_spawn_here(ctx) {
            tracing::info!(creature = self.id, name = %self.body.name, "outside its respawn period, removing");
            ctx.deferred.send(self.id, Deferred::Remove);
            return;
        }

        if !self.is_in_spawn_range(ctx.config, self.position()) {
            self.return_to_spawn(ctx);
            return;
        }

        self.refresh_visible_sets(ctx);
        self.update_idle_status(ctx);
        if self.idle {
            return;
        }

        let ticks = u32::try_from(interval).unwrap_or(u32::MAX);
        self.walk(ctx, interval);
        self.reconsider_targets(ctx);
        self.on_think_target(ctx, ticks);
        self.on_think_yell(ctx, ticks);
        self.on_think_defense(ctx, ticks);
        self.on_think_sound(ctx, ticks);
        self.on_attacking(ctx, ticks);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::game::state::CreatureKind;
    use crate::script::{CreatureHook, HookError, HookKind};

    #[test]
    fn test_new_monster_is_idle_and_seeded_from_template() {
        let harness = Harness::new();
        let template = MonsterTemplate {
            target_distance: 4,
            ..create_template("Archer")
        };
        let monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        assert!(monster.is_idle());
        assert!(!monster.is_dead());
        assert_eq!(monster.target_distance(), 4);
        assert_eq!(monster.spawn_anchor(), Some(Position::new(0, 0, 7)));
    }

    #[test]
    fn test_forget_clears_every_reference() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(2, 0, 7));

        harness.with(&mut monster, |m, ctx| {
            m.refresh_visible_sets(ctx);
            let body = ctx.world.creature(player).unwrap();
            assert!(m.select_target(ctx, &body));
        });
        assert!(monster.has_target(player));
        assert_eq!(monster.attacked(), Some(player));

        monster.forget(player);
        assert!(!monster.has_target(player));
        assert_eq!(monster.attacked(), None);
        assert_eq!(monster.follow(), None);
        assert!(monster.extra_melee);
    }

    #[test]
    fn test_set_follow_rejects_other_floor() {
        let mut harness = Harness::new();
        harness
            .world
            .fill_floor(Position::new(-5, -5, 6), Position::new(5, 5, 6));
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let above = harness.spawn_body(CreatureKind::Player, Position::new(1, 1, 6));

        let followed = harness.with(&mut monster, |m, ctx| {
            let body = ctx.world.creature(above).unwrap();
            m.set_follow(ctx, Some(&body))
        });
        assert!(!followed);
        assert_eq!(monster.follow(), None);
    }

    #[test]
    fn test_think_hook_vetoes_default_behavior() {
        let mut harness = Harness::new();
        let mut template = create_template("Puppet");
        let hook: Arc<dyn CreatureHook> = Arc::new(|_: &CreatureBody, _: &HookEvent<'_>, _: &dyn World| {
            Ok::<_, HookError>(HookOutcome::Handled)
        });
        template.hooks.register(HookKind::Think, hook);
        let mut monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        harness.spawn_player("Bob", Position::new(2, 0, 7));

        harness.with(&mut monster, |m, ctx| m.think(ctx));
        // nothing was scanned because the hook took over
        assert_eq!(monster.targets().count(), 0);
        assert!(monster.is_idle());
    }

    #[test]
    fn test_think_wakes_up_with_player_in_view() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(3, 0, 7));

        harness.with(&mut monster, |m, ctx| m.think(ctx));
        assert!(!monster.is_idle());
        assert!(monster.has_target(player));
        assert_eq!(monster.attacked(), Some(player));
        assert!(harness.drain().contains(&Deferred::Activate));
    }
}
