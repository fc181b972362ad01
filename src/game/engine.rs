//! Tick scheduler
//!
//! The engine owns every brain together with its random generator, the set
//! of creatures that are ticked, and the deferred task queue. One tick is:
//!
//! 1. apply tasks queued by notifications since the last tick
//! 2. think phase for every active creature (rayon pool or sequential)
//! 3. apply deferred tasks in creature-id order
//! 4. speak delivered ambient lines
//! 5. reap dead creatures, publish metrics

use hashbrown::{HashMap, HashSet};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::ambient::AmbientQueue;
use crate::config::AiConfig;
use crate::game::constants::combat::SUMMON_SOUND;
use crate::game::constants::engine::{MAX_DEFERRED_ROUNDS, SEED_SPREAD};
use crate::game::dispatcher::{Deferred, DeferredSender, DeferredTask, Dispatcher};
use crate::game::monster::{Monster, TickContext};
use crate::game::performance::PerformanceMonitor;
use crate::game::state::{CreatureBody, CreatureId};
use crate::game::template::{CombatType, TemplateRegistry};
use crate::game::world::{MagicEffect, SoundEffect, SpeakKind, World, WorldError};
use crate::metrics::Metrics;
use crate::util::position::{self, Position};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown creature template {0:?}")]
    UnknownTemplate(String),
    #[error("creature {0} has no template")]
    NoTemplate(CreatureId),
    #[error("placement failed: {0}")]
    Placement(#[from] WorldError),
}

/// A creature removed because its health reached zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeathRecord {
    pub creature: CreatureId,
    /// Player credited with the kill
    pub corpse_owner: Option<CreatureId>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub thought: usize,
    pub deferred_applied: usize,
    pub summons_placed: Vec<CreatureId>,
    pub removed: Vec<CreatureId>,
    pub deaths: Vec<DeathRecord>,
    pub ambient_lines: usize,
}

struct Slot {
    monster: Monster,
    rng: StdRng,
}

/// Everything a think step borrows from the engine
struct Shared {
    world: Arc<dyn World>,
    config: AiConfig,
    deferred: DeferredSender,
    ambient: AmbientQueue,
}

impl Shared {
    fn run<R>(
        &self,
        slot: &mut Slot,
        now_ms: u64,
        ambient_allowed: bool,
        f: impl FnOnce(&mut Monster, &mut TickContext<'_>) -> R,
    ) -> R {
        let Slot { monster, rng } = slot;
        let mut ctx = TickContext {
            world: self.world.as_ref(),
            deferred: &self.deferred,
            ambient: &self.ambient,
            config: &self.config,
            rng,
            now_ms,
            ambient_allowed,
        };
        f(monster, &mut ctx)
    }
}

pub struct Engine {
    shared: Shared,
    templates: TemplateRegistry,
    slots: HashMap<CreatureId, Slot>,
    active: HashSet<CreatureId>,
    dispatcher: Dispatcher,
    performance: PerformanceMonitor,
    metrics: Arc<Metrics>,
    now_ms: u64,
    tick_count: u64,
    ambient_allowed: bool,
}

impl Engine {
    pub fn new(world: Arc<dyn World>, templates: TemplateRegistry, config: AiConfig) -> Self {
        let dispatcher = Dispatcher::new();
        let performance = PerformanceMonitor::new(config.tick_interval_ms);
        Self {
            shared: Shared {
                world,
                config,
                deferred: dispatcher.sender(),
                ambient: AmbientQueue::disabled(),
            },
            templates,
            slots: HashMap::new(),
            active: HashSet::new(),
            dispatcher,
            performance,
            metrics: Arc::new(Metrics::new()),
            now_ms: 0,
            tick_count: 0,
            ambient_allowed: true,
        }
    }

    /// Route generated yells through `ambient`
    pub fn with_ambient(mut self, ambient: AmbientQueue) -> Self {
        self.shared.ambient = ambient;
        self
    }

    // --- accessors ---

    pub fn world(&self) -> &Arc<dyn World> {
        &self.shared.world
    }

    pub fn config(&self) -> &AiConfig {
        &self.shared.config
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    pub fn monster(&self, id: CreatureId) -> Option<&Monster> {
        self.slots.get(&id).map(|slot| &slot.monster)
    }

    pub fn monsters(&self) -> impl Iterator<Item = &Monster> {
        self.slots.values().map(|slot| &slot.monster)
    }

    pub fn is_active(&self, id: CreatureId) -> bool {
        self.active.contains(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // --- population ---

    /// Place a creature of template `name` at (or next to) `pos` and give it
    /// a brain anchored where it landed
    pub fn spawn(&mut self, name: &str, pos: Position) -> Result<CreatureId, EngineError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| EngineError::UnknownTemplate(name.to_string()))?;
        let id = self.shared.world.place_creature(template, pos, false)?;
        let anchor = self
            .shared
            .world
            .creature(id)
            .map_or(pos, |body| body.position);
        self.register(id, Some(anchor))?;
        info!(creature = id, name, %anchor, "spawned");
        Ok(id)
    }

    /// Attach a brain to a creature already in the world
    pub fn register(&mut self, id: CreatureId, spawn: Option<Position>) -> Result<(), EngineError> {
        let body = self
            .shared
            .world
            .creature(id)
            .ok_or(WorldError::CreatureNotFound(id))?;
        let template = body.template.clone().ok_or(EngineError::NoTemplate(id))?;

        let seed = self.shared.config.rng_seed ^ u64::from(id).wrapping_mul(SEED_SPREAD);
        let mut slot = Slot {
            monster: Monster::new(body, template, spawn),
            rng: StdRng::seed_from_u64(seed),
        };
        self.shared
            .run(&mut slot, self.now_ms, self.ambient_allowed, |m, ctx| m.on_spawn(ctx));
        self.slots.insert(id, slot);

        self.notify_appear(id);
        Ok(())
    }

    // --- notifications from outside the engine ---

    /// Run `f` for every living brain that passes `sees`, in id order
    fn broadcast(
        &mut self,
        sees: impl Fn(&Monster) -> bool,
        mut f: impl FnMut(&mut Monster, &mut TickContext<'_>),
    ) {
        let mut ids: Vec<CreatureId> = self.slots.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            if slot.monster.is_dead() || !slot.monster.refresh_body(self.shared.world.as_ref()) {
                continue;
            }
            if !sees(&slot.monster) {
                continue;
            }
            self.shared
                .run(slot, self.now_ms, self.ambient_allowed, |m, ctx| f(m, ctx));
        }
    }

    fn in_view(&self, pos: Position) -> impl Fn(&Monster) -> bool {
        let (range_x, range_y) = (self.shared.config.view_range_x, self.shared.config.view_range_y);
        move |m: &Monster| position::can_see(m.position(), pos, range_x, range_y)
    }

    /// A creature entered the world or came into view
    pub fn notify_appear(&mut self, id: CreatureId) {
        let Some(body) = self.shared.world.creature(id) else {
            return;
        };
        let in_view = self.in_view(body.position);
        self.broadcast(
            |m| m.id() == id || in_view(m),
            |m, ctx| m.on_creature_appear(ctx, &body),
        );
    }

    /// A creature left the world. `body` is its last known state.
    pub fn notify_disappear(&mut self, body: &CreatureBody) {
        let in_view = self.in_view(body.position);
        self.broadcast(in_view, |m, ctx| m.on_creature_disappear(ctx, body));

        for slot in self.slots.values_mut() {
            slot.monster.forget(body.id);
        }
    }

    pub fn notify_move(&mut self, id: CreatureId, from: Position, to: Position) {
        let Some(body) = self.shared.world.creature(id) else {
            return;
        };
        let sees_from = self.in_view(from);
        let sees_to = self.in_view(to);
        self.broadcast(
            |m| m.id() == id || sees_from(m) || sees_to(m),
            |m, ctx| m.on_creature_move(ctx, &body, from, to),
        );
    }

    pub fn notify_say(&mut self, speaker: CreatureId, kind: SpeakKind, text: &str) {
        let Some(body) = self.shared.world.creature(speaker) else {
            return;
        };
        let in_view = self.in_view(body.position);
        self.broadcast(
            |m| m.id() != speaker && in_view(m),
            |m, ctx| m.on_creature_say(ctx, &body, kind, text),
        );
    }

    pub fn notify_attacked_by_player(&mut self, target: CreatureId, attacker: CreatureId) {
        let Some(body) = self.shared.world.creature(attacker) else {
            return;
        };
        self.with_monster(target, |m, ctx| m.on_attacked_by_player(ctx, &body));
    }

    /// Run `f` against one brain. `None` when the creature has no living brain.
    fn with_monster<R>(
        &mut self,
        id: CreatureId,
        f: impl FnOnce(&mut Monster, &mut TickContext<'_>) -> R,
    ) -> Option<R> {
        let slot = self.slots.get_mut(&id).filter(|slot| !slot.monster.is_dead())?;
        slot.monster.refresh_body(self.shared.world.as_ref());
        Some(self.shared.run(slot, self.now_ms, self.ambient_allowed, f))
    }

    /// Deal damage to a creature with a brain. Returns what was dealt after
    /// mitigation.
    pub fn apply_damage(
        &mut self,
        target: CreatureId,
        attacker: Option<CreatureId>,
        combat: CombatType,
        damage: i32,
    ) -> i32 {
        self.with_monster(target, |m, ctx| m.apply_damage(ctx, attacker, combat, damage))
            .unwrap_or(0)
    }

    /// External challenge effect: attack `challenger` and ignore other
    /// targets for `duration_ms`
    pub fn challenge(&mut self, target: CreatureId, challenger: CreatureId, duration_ms: i64) -> bool {
        self.with_monster(target, |m, ctx| m.challenge(ctx, challenger, duration_ms))
            .unwrap_or(false)
    }

    pub fn change_target_distance(&mut self, target: CreatureId, distance: i32, duration_ms: i64) -> bool {
        self.with_monster(target, |m, _| m.change_target_distance(distance, duration_ms))
            .unwrap_or(false)
    }

    // --- tick ---

    pub fn tick(&mut self) -> TickReport {
        self.performance.tick_start();
        self.tick_count += 1;
        self.now_ms += self.shared.config.tick_interval_ms;

        let mut report = TickReport {
            tick: self.tick_count,
            ..Default::default()
        };

        self.apply_deferred(&mut report);
        self.reap_dead(&mut report);

        self.ambient_allowed = self.performance.can_schedule_ambient();
        report.thought = self.think_phase();

        self.apply_deferred(&mut report);
        report.ambient_lines = self.deliver_ambient();
        self.reap_dead(&mut report);

        self.publish(&report);
        report
    }

    fn think_phase(&mut self) -> usize {
        let now_ms = self.now_ms;
        let ambient_allowed = self.ambient_allowed;
        let shared = &self.shared;
        let active = &self.active;
        let think = |slot: &mut Slot| shared.run(slot, now_ms, ambient_allowed, |m, ctx| m.think(ctx));

        let mut ids: Vec<CreatureId> = active
            .iter()
            .copied()
            .filter(|id| self.slots.contains_key(id))
            .collect();
        let thought = ids.len();

        #[cfg(feature = "parallel")]
        if shared.config.parallel_enabled {
            self.slots
                .par_values_mut()
                .filter(|slot| active.contains(&slot.monster.id()))
                .for_each(think);
            return thought;
        }

        ids.sort_unstable();
        for id in ids {
            if let Some(slot) = self.slots.get_mut(&id) {
                think(slot);
            }
        }
        thought
    }

    fn apply_deferred(&mut self, report: &mut TickReport) {
        for _ in 0..MAX_DEFERRED_ROUNDS {
            let tasks = self.dispatcher.drain();
            if tasks.is_empty() {
                return;
            }
            report.deferred_applied += tasks.len();
            for DeferredTask { origin, task } in tasks {
                self.apply_task(origin, task, report);
            }
        }

        if !self.dispatcher.is_empty() {
            debug!(
                pending = self.dispatcher.pending_count(),
                "deferred tasks carried over to the next tick"
            );
        }
    }

    fn apply_task(&mut self, origin: CreatureId, task: Deferred, report: &mut TickReport) {
        match task {
            Deferred::CheckAttack { target } => {
                self.with_monster(origin, |m, ctx| {
                    if m.attacked() == Some(target) {
                        m.on_attacking(ctx, 0);
                    }
                });
            }
            Deferred::Activate => {
                if self.slots.get(&origin).is_some_and(|slot| !slot.monster.is_dead()) {
                    self.active.insert(origin);
                }
            }
            Deferred::Deactivate => {
                self.active.remove(&origin);
            }
            Deferred::Summon { name, near, force } => self.place_summon(origin, &name, near, force, report),
            Deferred::Remove => {
                if self.remove(origin) {
                    report.removed.push(origin);
                }
            }
            Deferred::Moved { from, to } => self.notify_move(origin, from, to),
        }
    }

    fn place_summon(&mut self, master: CreatureId, name: &str, near: Position, force: bool, report: &mut TickReport) {
        if !self.slots.get(&master).is_some_and(|slot| !slot.monster.is_dead()) {
            return;
        }

        let Some(template) = self.templates.get(name) else {
            warn!(creature = master, summon = name, "unknown summon template");
            self.with_monster(master, |m, _| m.on_summon_failed(name));
            return;
        };

        let world = self.shared.world.clone();
        let id = match world.place_creature(template, near, force) {
            Ok(id) => id,
            Err(e) => {
                debug!(creature = master, summon = name, "summon not placed: {}", e);
                Metrics::add(&self.metrics.summons_failed, 1);
                self.with_monster(master, |m, _| m.on_summon_failed(name));
                return;
            }
        };

        if let Err(e) = world.set_master(id, Some(master)) {
            debug!(creature = master, summon = id, "summon ownership rejected: {}", e);
        }
        self.with_monster(master, |m, _| m.on_summon_placed(name, id));

        if let Some(caster) = world.creature(master) {
            world.magic_effect(caster.position, MagicEffect::MagicBlue);
        }
        if let Some(summon) = world.creature(id) {
            world.magic_effect(summon.position, MagicEffect::Teleport);
            world.sound_effect(summon.position, SoundEffect(SUMMON_SOUND), Some(id));
        }

        match self.register(id, None) {
            Ok(()) => {
                info!(creature = master, summon = id, name, "summon placed");
                report.summons_placed.push(id);
            }
            Err(e) => warn!(creature = master, summon = id, "summon has no brain: {}", e),
        }
    }

    /// Take a creature out of the world and drop its brain
    fn remove(&mut self, id: CreatureId) -> bool {
        let world = self.shared.world.clone();
        let Some(body) = world.creature(id) else {
            self.drop_brain(id);
            return false;
        };
        if let Err(e) = world.remove_creature(id) {
            debug!(creature = id, "removal rejected: {}", e);
            return false;
        }
        self.drop_brain(id);
        self.notify_disappear(&body);
        info!(creature = id, name = %body.name, "removed");
        true
    }

    fn drop_brain(&mut self, id: CreatureId) {
        self.slots.remove(&id);
        self.active.remove(&id);
        for slot in self.slots.values_mut() {
            slot.monster.forget(id);
        }
    }

    /// Brains whose body died or vanished
    fn reap_dead(&mut self, report: &mut TickReport) {
        let world = self.shared.world.clone();
        let mut dead: Vec<CreatureId> = self
            .slots
            .keys()
            .copied()
            .filter(|id| world.creature(*id).map_or(true, |body| body.is_dead()))
            .collect();
        dead.sort_unstable();

        for id in dead {
            if world.creature(id).is_none() {
                debug!(creature = id, "body vanished, dropping brain");
                self.drop_brain(id);
                continue;
            }

            let corpse_owner = self.with_monster(id, |m, ctx| m.death(ctx)).flatten();
            report.deaths.push(DeathRecord {
                creature: id,
                corpse_owner,
            });
            if self.remove(id) {
                report.removed.push(id);
            }
        }
    }

    fn deliver_ambient(&mut self) -> usize {
        let mut spoken = 0;
        for line in self.shared.ambient.drain() {
            if self.shared.world.creature(line.creature).is_none() {
                continue;
            }
            let kind = if line.yell { SpeakKind::Yell } else { SpeakKind::Say };
            self.shared.world.creature_say(line.creature, kind, &line.text);
            spoken += 1;
        }
        spoken
    }

    fn publish(&mut self, report: &TickReport) {
        use std::sync::atomic::Ordering;

        let metrics = &self.metrics;
        metrics.creatures_total.store(self.slots.len() as u64, Ordering::Relaxed);
        metrics.creatures_active.store(self.active.len() as u64, Ordering::Relaxed);
        Metrics::add(&metrics.think_steps, report.thought as u64);
        Metrics::add(&metrics.deferred_applied, report.deferred_applied as u64);
        Metrics::add(&metrics.summons_placed, report.summons_placed.len() as u64);
        Metrics::add(&metrics.creatures_removed, report.removed.len() as u64);
        Metrics::add(&metrics.deaths, report.deaths.len() as u64);
        Metrics::add(&metrics.ambient_lines, report.ambient_lines as u64);

        if let Some(duration) = self.performance.tick_end(self.slots.len()) {
            metrics.record_tick_time(duration);
        }
        let status = self.performance.status();
        metrics.performance_status.store(status.level(), Ordering::Relaxed);
        metrics
            .budget_usage_percent
            .store(self.performance.budget_usage_percent() as u64, Ordering::Relaxed);

        debug!(
            tick = report.tick,
            thought = report.thought,
            deferred = report.deferred_applied,
            removed = report.removed.len(),
            "tick done"
        );
        if self.tick_count % 60 == 0 {
            info!(
                "AI tick {}: {} creatures, {} active, {}",
                self.tick_count,
                self.slots.len(),
                self.active.len(),
                self.performance.status_message()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::{AmbientError, AmbientRequest, AmbientText};
    use crate::game::grid::{GridWorld, WorldEvent};
    use crate::game::template::{MonsterTemplate, RespawnPeriod, RespawnRule, SummonBlock, VoiceBlock};
    use async_trait::async_trait;
    use std::time::Duration;

    fn create_template(name: &str) -> MonsterTemplate {
        MonsterTemplate {
            name: name.to_string(),
            health: 100,
            speed: 150,
            ..Default::default()
        }
    }

    fn create_engine(templates: Vec<MonsterTemplate>, parallel: bool) -> (Arc<GridWorld>, Engine) {
        let world = Arc::new(GridWorld::new());
        world.fill_floor(Position::new(-20, -20, 7), Position::new(20, 20, 7));
        let mut registry = TemplateRegistry::new();
        for template in templates {
            registry.insert(template);
        }
        let config = AiConfig {
            despawn_radius: 0,
            despawn_range: 0,
            parallel_enabled: parallel,
            ..Default::default()
        };
        let engine = Engine::new(world.clone(), registry, config);
        (world, engine)
    }

    #[test]
    fn test_spawn_unknown_template_errors() {
        let (_, mut engine) = create_engine(vec![], false);
        let result = engine.spawn("Dragon", Position::new(0, 0, 7));
        assert!(matches!(result, Err(EngineError::UnknownTemplate(name)) if name == "Dragon"));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_lonely_creature_stays_idle() {
        let (_, mut engine) = create_engine(vec![create_template("Orc")], true);
        let orc = engine.spawn("Orc", Position::new(0, 0, 7)).unwrap();

        let report = engine.tick();
        assert_eq!(report.thought, 0);
        assert!(!engine.is_active(orc));
        assert!(engine.monster(orc).unwrap().is_idle());
    }

    #[test]
    fn test_creature_wakes_and_hunts_player() {
        let (world, mut engine) = create_engine(vec![create_template("Orc")], true);
        let player = world.add_player("Bob", Position::new(3, 0, 7));
        let orc = engine.spawn("Orc", Position::new(0, 0, 7)).unwrap();

        engine.tick();
        assert!(engine.is_active(orc));
        assert_eq!(engine.monster(orc).unwrap().attacked(), Some(player));

        for _ in 0..3 {
            engine.tick();
        }
        let pos = world.creature(orc).unwrap().position;
        assert!(pos.distance(Position::new(3, 0, 7)) < 3);
        assert!(engine.metrics().think_steps.load(std::sync::atomic::Ordering::Relaxed) >= 4);
    }

    #[test]
    fn test_player_walking_into_view_wakes_creature() {
        let (world, mut engine) = create_engine(vec![create_template("Orc")], false);
        let orc = engine.spawn("Orc", Position::new(0, 0, 7)).unwrap();
        let player = world.add_player("Bob", Position::new(15, 0, 7));
        engine.tick();
        assert!(!engine.is_active(orc));

        world.teleport_creature(player, Position::new(5, 0, 7)).unwrap();
        engine.notify_move(player, Position::new(15, 0, 7), Position::new(5, 0, 7));
        engine.tick();

        assert!(engine.is_active(orc));
        assert!(engine.monster(orc).unwrap().has_target(player));
    }

    #[test]
    fn test_summons_capped_and_released_on_death() {
        let necromancer = MonsterTemplate {
            summons: vec![SummonBlock {
                name: "Skeleton".into(),
                speed: 1000,
                chance: 100,
                count: 2,
                force: false,
            }],
            max_summons: 2,
            ..create_template("Necromancer")
        };
        let (world, mut engine) = create_engine(vec![necromancer, create_template("Skeleton")], false);
        world.add_player("Bob", Position::new(4, 0, 7));
        let necro = engine.spawn("Necromancer", Position::new(0, 0, 7)).unwrap();

        let mut summoned = Vec::new();
        for _ in 0..5 {
            summoned.extend(engine.tick().summons_placed);
        }
        assert!(!summoned.is_empty());
        assert!(summoned.len() <= 2);
        for id in &summoned {
            assert_eq!(world.creature(*id).unwrap().master, Some(necro));
        }
        assert!(world
            .take_events()
            .iter()
            .any(|e| matches!(e, WorldEvent::Effect { effect: MagicEffect::Teleport, .. })));

        world.change_health(necro, -1000).unwrap();
        let report = engine.tick();

        assert!(report.deaths.iter().any(|d| d.creature == necro));
        assert!(engine.monster(necro).is_none());
        assert!(world.creature(necro).is_none());
        for id in &summoned {
            assert!(report.deaths.iter().any(|d| d.creature == *id));
            assert!(world.creature(*id).is_none());
        }
        for monster in engine.monsters() {
            assert!(!monster.has_friend(necro));
            assert!(!monster.has_target(necro));
        }
    }

    #[test]
    fn test_wrong_period_creature_removed() {
        let vampire = MonsterTemplate {
            respawn: RespawnRule {
                period: RespawnPeriod::Night,
                underground: false,
            },
            ..create_template("Vampire")
        };
        let (world, mut engine) = create_engine(vec![vampire], false);
        world.set_daytime(true);
        world.add_player("Bob", Position::new(2, 0, 7));
        let id = engine.spawn("Vampire", Position::new(0, 0, 7)).unwrap();

        let report = engine.tick();
        assert!(report.removed.contains(&id));
        assert!(engine.monster(id).is_none());
        assert!(world.creature(id).is_none());
        assert!(report.deaths.is_empty());
    }

    #[test]
    fn test_apply_damage_records_attacker() {
        let (world, mut engine) = create_engine(vec![create_template("Troll")], false);
        let troll = engine.spawn("Troll", Position::new(0, 0, 7)).unwrap();
        let player = world.add_player("Bob", Position::new(12, 0, 7));

        let dealt = engine.apply_damage(troll, Some(player), CombatType::Physical, 25);
        assert_eq!(dealt, 25);
        assert_eq!(world.creature(troll).unwrap().health, 75);
        assert_eq!(engine.monster(troll).unwrap().damage_map()[&player].total, 25);

        assert_eq!(engine.apply_damage(999, Some(player), CombatType::Physical, 25), 0);
    }

    #[test]
    fn test_killing_blow_credits_player() {
        let (world, mut engine) = create_engine(vec![create_template("Troll")], false);
        let troll = engine.spawn("Troll", Position::new(0, 0, 7)).unwrap();
        let player = world.add_player("Bob", Position::new(1, 0, 7));

        engine.apply_damage(troll, Some(player), CombatType::Physical, 100);
        let report = engine.tick();
        assert_eq!(
            report.deaths,
            vec![DeathRecord {
                creature: troll,
                corpse_owner: Some(player),
            }]
        );
    }

    #[test]
    fn test_sequential_ticks_are_reproducible() {
        let run = || {
            let (world, mut engine) = create_engine(vec![create_template("Orc"), create_template("Wolf")], false);
            world.add_player("Bob", Position::new(4, 3, 7));
            let orc = engine.spawn("Orc", Position::new(0, 0, 7)).unwrap();
            let wolf = engine.spawn("Wolf", Position::new(-3, 2, 7)).unwrap();
            for _ in 0..6 {
                engine.tick();
            }
            (world.creature(orc).unwrap().position, world.creature(wolf).unwrap().position)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_challenge_and_distance_override() {
        let archer = MonsterTemplate {
            target_distance: 4,
            ..create_template("Archer")
        };
        let (world, mut engine) = create_engine(vec![archer], false);
        let bob = world.add_player("Bob", Position::new(2, 0, 7));
        let ann = world.add_player("Ann", Position::new(-3, 0, 7));
        let archer = engine.spawn("Archer", Position::new(0, 0, 7)).unwrap();

        assert!(engine.challenge(archer, ann, 5000));
        assert_eq!(engine.monster(archer).unwrap().attacked(), Some(ann));
        assert!(engine.monster(archer).unwrap().has_target(bob));

        assert!(engine.change_target_distance(archer, 1, 2000));
        assert_eq!(engine.monster(archer).unwrap().target_distance(), 1);
        engine.tick();
        engine.tick();
        assert_eq!(engine.monster(archer).unwrap().target_distance(), 4);
    }

    struct Greeter;

    #[async_trait]
    impl AmbientText for Greeter {
        async fn generate(&self, request: &AmbientRequest) -> Result<String, AmbientError> {
            Ok(format!("{} greets you", request.name))
        }
    }

    #[tokio::test]
    async fn test_generated_yell_spoken_on_later_tick() {
        let orc = MonsterTemplate {
            voices: vec![VoiceBlock {
                text: "greeting".into(),
                yell: true,
                generated: true,
            }],
            yell_speed_ticks: 1000,
            yell_chance: 100,
            ..create_template("Orc")
        };
        let (world, engine) = create_engine(vec![orc], false);
        let ambient = AmbientQueue::spawn(Arc::new(Greeter), 8, Duration::from_millis(500));
        let mut engine = engine.with_ambient(ambient);
        world.add_player("Bob", Position::new(3, 0, 7));
        let id = engine.spawn("Orc", Position::new(0, 0, 7)).unwrap();

        engine.tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = engine.tick();

        assert!(report.ambient_lines >= 1);
        assert!(world.take_events().contains(&WorldEvent::Said {
            creature: id,
            kind: SpeakKind::Yell,
            text: "Orc greets you".into(),
        }));
    }
}
