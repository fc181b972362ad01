//! Target registry
//!
//! Friend/target bookkeeping, opponent classification and the target search
//! strategies. Every lookup goes through the world by id; a creature that is
//! gone simply fails the lookup and is skipped.

use rand::seq::SliceRandom;
use tracing::debug;

use crate::game::constants::targeting::{HEALTH_FACTION_OFFSET, NEAREST_FACTION_OFFSET};
use crate::game::dispatcher::Deferred;
use crate::game::monster::{Monster, TargetEntry, TickContext};
use crate::game::state::{CreatureBody, CreatureId, Faction};
use crate::game::world::{SpeakKind, World};
use crate::script::{HookEvent, HookOutcome};
use crate::util::position::{self, Position};

/// How `search_target` ranks its candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSearch {
    /// Pick one of the others with the template's percentage weights
    Default,
    Nearest,
    Health,
    Damage,
    Random,
}

impl Monster {
    /// Master body when this creature was summoned by a player
    fn player_master(&self, world: &dyn World) -> Option<CreatureBody> {
        self.body
            .master
            .and_then(|id| world.creature(id))
            .filter(|master| master.is_player())
    }

    pub fn is_friend(&self, other: &CreatureBody, world: &dyn World) -> bool {
        if other.id == self.id {
            return false;
        }

        if let Some(master) = self.player_master(world) {
            let player = if other.is_player() {
                Some(other.clone())
            } else {
                other
                    .master
                    .and_then(|id| world.creature(id))
                    .filter(|m| m.is_player())
            };
            if let Some(player) = player {
                let partner = master.party().is_some() && master.party() == player.party();
                if player.id == master.id || partner {
                    return true;
                }
            }
        }

        other.is_monster() && !other.is_summon()
    }

    pub fn is_opponent(&self, other: &CreatureBody, world: &dyn World) -> bool {
        if other.id == self.id || !other.attackable || other.position.z != self.position().z {
            return false;
        }

        if let Some(master) = self.player_master(world) {
            return other.id != master.id;
        }

        if other.is_ignored_by_monsters() {
            return false;
        }

        if !self.body.faction.is_default() {
            return self.template.is_enemy_faction(other.faction) || other.faction == Faction::PLAYER;
        }

        other.is_player()
            || other
                .master
                .and_then(|id| world.creature(id))
                .is_some_and(|m| m.is_player())
    }

    /// Whether `other` may be attacked right now
    pub fn is_target(&self, other: &CreatureBody, world: &dyn World) -> bool {
        if other.id == self.id || other.removed || other.is_dead() || !other.attackable {
            return false;
        }
        if !self.can_see_creature(other) {
            return false;
        }
        if world.tile(other.position).is_some_and(|t| t.protection_zone) {
            return false;
        }
        if other.position.z != self.position().z {
            return false;
        }

        if !self.is_summon() {
            if other.is_disconnected() {
                return false;
            }
            if !self.body.faction.is_default() {
                return self.template.is_enemy_faction(other.faction);
            }
        }

        true
    }

    pub(crate) fn add_friend(&mut self, id: CreatureId) -> bool {
        if id == self.id {
            return false;
        }
        self.friends.insert(id)
    }

    fn counts_players(&self) -> bool {
        !self.is_summon() && !self.body.faction.is_default()
    }

    fn publish_players_on_screen(&self, world: &dyn World) {
        world.set_players_on_screen(self.id, self.players_on_screen);
    }

    /// Insert into the target list. No-op for self and existing entries.
    pub(crate) fn add_target(&mut self, world: &dyn World, other: &CreatureBody, front: bool) -> bool {
        if other.id == self.id || self.has_target(other.id) {
            return false;
        }

        let entry = TargetEntry {
            id: other.id,
            counted_player: self.counts_players() && other.is_player(),
        };
        if front {
            self.targets.push_front(entry);
        } else {
            self.targets.push_back(entry);
        }

        if entry.counted_player {
            self.players_on_screen += 1;
            self.publish_players_on_screen(world);
        }
        true
    }

    pub(crate) fn remove_target(&mut self, world: &dyn World, id: CreatureId) -> bool {
        let Some(index) = self.targets.iter().position(|t| t.id == id) else {
            return false;
        };
        if let Some(entry) = self.targets.remove(index) {
            if entry.counted_player {
                self.players_on_screen = self.players_on_screen.saturating_sub(1);
                self.publish_players_on_screen(world);
            }
        }
        true
    }

    pub(crate) fn clear_targets(&mut self, world: &dyn World) {
        self.targets.clear();
        if self.players_on_screen != 0 {
            self.players_on_screen = 0;
            self.publish_players_on_screen(world);
        }
    }

    /// Prune friends and targets that died or left the view port, then
    /// classify every spectator.
    pub fn refresh_visible_sets(&mut self, ctx: &TickContext<'_>) {
        let world = ctx.world;
        let me = self.position();
        let (range_x, range_y) = (ctx.config.view_range_x, ctx.config.view_range_y);
        let visible = |body: &CreatureBody| !body.is_dead() && position::can_see(me, body.position, range_x, range_y);

        self.friends
            .retain(|id| world.creature(*id).is_some_and(|body| visible(&body)));

        let mut dropped_players = 0;
        self.targets.retain(|entry| {
            let keep = world.creature(entry.id).is_some_and(|body| visible(&body));
            if !keep && entry.counted_player {
                dropped_players += 1;
            }
            keep
        });
        if dropped_players > 0 {
            self.players_on_screen = self.players_on_screen.saturating_sub(dropped_players);
            self.publish_players_on_screen(world);
        }

        for spectator in world.spectators(me, range_x, range_y, true) {
            if spectator.id != self.id && visible(&spectator) && self.can_see(ctx.config, spectator.position) {
                self.on_creature_found(ctx, &spectator, false);
            }
        }
    }

    pub(crate) fn on_creature_found(&mut self, ctx: &TickContext<'_>, other: &CreatureBody, front: bool) {
        if other.is_dead() {
            return;
        }
        if self.is_friend(other, ctx.world) {
            self.add_friend(other.id);
        }
        if self.is_opponent(other, ctx.world) {
            self.add_target(ctx.world, other, front);
        }
        self.update_idle_status(ctx);
    }

    pub(crate) fn on_creature_leave(&mut self, ctx: &TickContext<'_>, id: CreatureId) {
        self.friends.remove(&id);
        if self.remove_target(ctx.world, id) && self.targets.is_empty() {
            self.update_idle_status(ctx);
        }
    }

    fn roll_strategy(&self, ctx: &mut TickContext<'_>) -> TargetSearch {
        let weights = self.template.strategies;
        let roll = ctx.roll();

        let mut sum = weights.nearest;
        if roll <= sum {
            return TargetSearch::Nearest;
        }
        sum += weights.health;
        if roll <= sum {
            return TargetSearch::Health;
        }
        sum += weights.damage;
        if roll <= sum {
            return TargetSearch::Damage;
        }
        TargetSearch::Random
    }

    fn damage_from(&self, id: CreatureId) -> i64 {
        self.damage_map.get(&id).map_or(0, |entry| entry.total)
    }

    /// Pick a target among the eligible entries and select it
    pub fn search_target(&mut self, ctx: &mut TickContext<'_>, strategy: TargetSearch) -> bool {
        let strategy = match strategy {
            TargetSearch::Default => self.roll_strategy(ctx),
            other => other,
        };

        let me = self.position();
        let candidates: Vec<CreatureBody> = self
            .targets
            .iter()
            .filter_map(|entry| ctx.world.creature(entry.id))
            .filter(|body| {
                self.is_target(body, ctx.world)
                    && (self.target_distance == 1 || self.can_use_attack(me, body, ctx.world))
            })
            .collect();

        if candidates.is_empty() {
            return false;
        }

        let chosen = match strategy {
            TargetSearch::Nearest => candidates.iter().min_by_key(|body| {
                me.distance(body.position) as i64 + body.faction.0 as i64 * NEAREST_FACTION_OFFSET
            }),
            TargetSearch::Health => candidates
                .iter()
                .min_by_key(|body| body.health as i64 + body.faction.0 as i64 * HEALTH_FACTION_OFFSET),
            TargetSearch::Damage => {
                let mut best = &candidates[0];
                let mut most = self.damage_from(best.id);
                for body in &candidates[1..] {
                    let dealt = self.damage_from(body.id);
                    if dealt > most {
                        best = body;
                        most = dealt;
                    }
                }
                Some(best)
            }
            TargetSearch::Random | TargetSearch::Default => candidates.choose(&mut *ctx.rng),
        };

        if let Some(target) = chosen {
            debug!(creature = self.id, target = target.id, ?strategy, "target search");
            let target = target.clone();
            if self.select_target(ctx, &target) {
                return true;
            }
        }

        // first selectable entry in list order
        let ids: Vec<CreatureId> = self.targets().collect();
        ids.into_iter().any(|id| {
            ctx.world
                .creature(id)
                .is_some_and(|body| self.select_target(ctx, &body))
        })
    }

    /// Attack (when hostile or a summon) and follow `target`
    pub fn select_target(&mut self, ctx: &TickContext<'_>, target: &CreatureBody) -> bool {
        if !self.is_target(target, ctx.world) || !self.has_target(target.id) {
            return false;
        }

        if (self.is_hostile() || self.is_summon()) && self.set_attacked(ctx, Some(target)) {
            ctx.deferred
                .send(self.id, Deferred::CheckAttack { target: target.id });
        }
        self.set_follow(ctx, Some(target))
    }

    /// Re-queue the followed target after a path update so reachable targets
    /// come first. A summon without a path drops the target instead.
    pub(crate) fn on_follow_complete(&mut self, world: &dyn World, id: CreatureId) {
        if !self.has_follow_path && self.is_summon() {
            self.remove_target(world, id);
            return;
        }

        let Some(index) = self.targets.iter().position(|t| t.id == id) else {
            return;
        };
        let Some(entry) = self.targets.remove(index) else {
            return;
        };
        if self.has_follow_path {
            self.targets.push_front(entry);
        } else {
            self.targets.push_back(entry);
        }
    }

    /// Summon obedience and retargeting when the current target went bad
    pub(crate) fn reconsider_targets(&mut self, ctx: &mut TickContext<'_>) {
        let attacked = self.attacked.and_then(|id| ctx.world.creature(id));
        let follow = self.follow;

        if self.is_summon() {
            let master = self.body.master.and_then(|id| ctx.world.creature(id));
            if self.attacked == Some(self.id) {
                self.set_follow(ctx, None);
            } else if let Some(attacked) = attacked.as_ref().filter(|a| follow != Some(a.id)) {
                self.set_follow(ctx, Some(attacked));
            } else if let Some(target) = master
                .as_ref()
                .and_then(|m| m.attacking)
                .and_then(|id| ctx.world.creature(id))
            {
                self.select_target(ctx, &target);
            } else if master.as_ref().map(|m| m.id) != follow {
                self.set_follow(ctx, master.as_ref());
            }
            return;
        }

        if self.targets.is_empty() {
            return;
        }

        let me = self.position();
        let disconnected = attacked.as_ref().is_some_and(|a| a.is_disconnected());
        let unattackable = attacked
            .as_ref()
            .is_some_and(|a| !self.can_use_attack(me, a, ctx.world));
        let unreachable = self.target_distance <= 1 && attacked.is_some() && follow.is_some() && !self.has_follow_path;

        if attacked.is_none() || disconnected || unattackable || unreachable {
            if follow.is_none() || !self.has_follow_path || disconnected {
                self.search_target(ctx, TargetSearch::Nearest);
            } else if attacked.is_some() && self.is_fleeing() && unattackable {
                self.search_target(ctx, TargetSearch::Default);
            }
        }
    }

    /// Force focus on `target` and lock target changes for `duration_ms`
    pub fn challenge(&mut self, ctx: &TickContext<'_>, target: CreatureId, duration_ms: i64) -> bool {
        if self.is_summon() {
            return false;
        }
        let Some(body) = ctx.world.creature(target) else {
            return false;
        };

        let selected = self.select_target(ctx, &body);
        if selected {
            self.challenge_focus_duration = duration_ms;
            self.target_change_ticks = 0;
        }
        selected
    }

    /// Override the preferred distance for `duration_ms`
    pub fn change_target_distance(&mut self, distance: i32, duration_ms: i64) -> bool {
        if self.is_summon() || self.template.is_reward_boss {
            return false;
        }
        self.challenge_melee_duration = duration_ms;
        self.target_distance = distance;
        true
    }

    // --- world notifications ---

    pub fn on_spawn(&mut self, ctx: &TickContext<'_>) {
        self.hook(ctx, &HookEvent::Spawn { position: self.position() });
    }

    pub fn on_creature_appear(&mut self, ctx: &TickContext<'_>, creature: &CreatureBody) {
        if self.hook(ctx, &HookEvent::Appear { creature }) == HookOutcome::Handled {
            return;
        }

        if creature.id == self.id {
            self.refresh_body(ctx.world);
            self.refresh_visible_sets(ctx);
            self.update_idle_status(ctx);
        } else {
            self.on_creature_found(ctx, creature, true);
        }
    }

    pub fn on_creature_disappear(&mut self, ctx: &TickContext<'_>, creature: &CreatureBody) {
        self.release_focus_on(ctx, creature.id);

        if self.hook(ctx, &HookEvent::Disappear { creature }) == HookOutcome::Handled {
            return;
        }

        if creature.id == self.id {
            self.set_idle(ctx, true);
        } else {
            self.on_creature_leave(ctx, creature.id);
        }
    }

    pub fn on_creature_move(&mut self, ctx: &TickContext<'_>, creature: &CreatureBody, from: Position, to: Position) {
        if creature.id == self.id {
            self.body.position = to;
        }
        self.track_focus_move(ctx, creature.id, from, to);

        let event = HookEvent::Move { creature, from, to };
        if self.hook(ctx, &event) == HookOutcome::Handled {
            return;
        }

        if creature.id == self.id {
            self.refresh_visible_sets(ctx);
            self.update_idle_status(ctx);
            return;
        }

        let sees_new = self.can_see(ctx.config, to);
        let sees_old = self.can_see(ctx.config, from);
        if sees_new && !sees_old {
            self.on_creature_found(ctx, creature, true);
        } else if !sees_new && sees_old {
            self.on_creature_leave(ctx, creature.id);
        }

        self.update_idle_status(ctx);

        if self.is_summon() {
            return;
        }

        match self.follow.and_then(|id| ctx.world.creature(id)) {
            Some(followed) => self.grab_blocking_opponent(ctx, &followed),
            None => {
                if self.is_opponent(creature, ctx.world) {
                    self.select_target(ctx, creature);
                }
            }
        }
    }

    /// Keep follow paths and attack checks in sync with the attacked or
    /// followed creature moving, or with this creature moving itself
    fn track_focus_move(&mut self, ctx: &TickContext<'_>, mover: CreatureId, from: Position, to: Position) {
        let moved_self = mover == self.id;

        if let Some(follow) = self.follow {
            if mover == follow || moved_self {
                if self.has_follow_path {
                    self.updating_path = true;
                }
                let lost = ctx
                    .world
                    .creature(follow)
                    .map_or(true, |f| from.z != to.z || !self.can_see(ctx.config, f.position));
                if lost {
                    self.release_focus_on(ctx, follow);
                }
            }
        }

        if let Some(attacked) = self.attacked {
            if mover == attacked || moved_self {
                let target = ctx.world.creature(attacked);
                match target {
                    Some(t) if from.z == to.z && self.can_see(ctx.config, t.position) => {
                        if self.extra_melee {
                            ctx.deferred.send(self.id, Deferred::CheckAttack { target: attacked });
                        }
                    }
                    _ => self.release_focus_on(ctx, attacked),
                }
            }
        }
    }

    /// While chasing, an opponent standing on the next tile toward the
    /// followed creature becomes the new target
    fn grab_blocking_opponent(&mut self, ctx: &TickContext<'_>, followed: &CreatureBody) {
        let me = self.position();
        let far = followed.position.distance_x(me) > 1 || followed.position.distance_y(me) > 1;
        if !far || self.template.change_target_chance == 0 {
            return;
        }

        let Some(dir) = position::direction_to(me, followed.position) else {
            return;
        };
        let Some(tile) = ctx.world.tile(me.step(dir)) else {
            return;
        };
        let Some(top) = tile.creatures.last().map(|c| c.id) else {
            return;
        };
        if top == followed.id {
            return;
        }
        if let Some(blocker) = ctx.world.creature(top) {
            if self.is_opponent(&blocker, ctx.world) {
                self.select_target(ctx, &blocker);
            }
        }
    }

    pub fn on_creature_say(&mut self, ctx: &TickContext<'_>, speaker: &CreatureBody, kind: SpeakKind, text: &str) {
        self.hook(ctx, &HookEvent::Say { speaker, kind, text });
    }

    pub fn on_attacked_by_player(&mut self, ctx: &TickContext<'_>, attacker: &CreatureBody) {
        self.hook(ctx, &HookEvent::AttackedByPlayer { attacker });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::monster::test_support::*;
    use crate::game::state::CreatureKind;
    use crate::game::template::{AbilityBlock, MonsterTemplate, TargetStrategies};
    use crate::script::{CreatureHook, HookError, HookKind};
    use std::sync::Arc;

    fn create_ranged_template() -> MonsterTemplate {
        MonsterTemplate {
            attacks: vec![AbilityBlock {
                spell: "energy bolt".into(),
                range: 7,
                speed: 2000,
                chance: 100,
                ..Default::default()
            }],
            ..create_template("Sorcerer")
        }
    }

    #[test]
    fn test_never_own_friend_or_target() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let me = monster.body().clone();

        harness.with(&mut monster, |m, ctx| {
            assert!(!m.is_friend(&me, ctx.world));
            assert!(!m.is_opponent(&me, ctx.world));
            assert!(!m.add_friend(me.id));
            assert!(!m.add_target(ctx.world, &me, true));
            m.refresh_visible_sets(ctx);
        });
        assert!(!monster.has_friend(me.id));
        assert!(!monster.has_target(me.id));
    }

    #[test]
    fn test_classification_of_players_and_monsters() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(2, 2, 7));
        let other = harness.spawn_monster(create_template("Troll"), Position::new(-2, 0, 7)).id();

        harness.with(&mut monster, |m, ctx| m.refresh_visible_sets(ctx));
        assert!(monster.has_target(player));
        assert!(!monster.has_friend(player));
        assert!(monster.has_friend(other));
        assert!(!monster.has_target(other));
    }

    #[test]
    fn test_add_target_is_idempotent_and_front_inserts() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let a = harness.spawn_player("A", Position::new(1, 0, 7));
        let b = harness.spawn_player("B", Position::new(2, 0, 7));

        harness.with(&mut monster, |m, ctx| {
            let body_a = ctx.world.creature(a).unwrap();
            let body_b = ctx.world.creature(b).unwrap();
            assert!(m.add_target(ctx.world, &body_a, false));
            assert!(!m.add_target(ctx.world, &body_a, true));
            assert!(m.add_target(ctx.world, &body_b, true));
            assert!(m.remove_target(ctx.world, a));
            assert!(!m.remove_target(ctx.world, a));
        });
        assert_eq!(monster.targets().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn test_players_on_screen_counts_only_faction_monsters() {
        let mut harness = Harness::new();
        let template = MonsterTemplate {
            faction: Faction(3),
            enemy_factions: vec![Faction::PLAYER],
            ..create_template("Guard")
        };
        let mut monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(1, 1, 7));
        harness.world.update_creature(player, |b| b.faction = Faction::PLAYER);

        harness.with(&mut monster, |m, ctx| m.refresh_visible_sets(ctx));
        assert!(monster.has_target(player));
        assert_eq!(monster.players_on_screen(), 1);
        assert_eq!(harness.body(monster.id()).players_on_screen, 1);

        harness.with(&mut monster, |m, ctx| {
            m.remove_target(ctx.world, player);
        });
        assert_eq!(monster.players_on_screen(), 0);
    }

    #[test]
    fn test_refresh_prunes_dead_and_unseen() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let doomed = harness.spawn_player("Doomed", Position::new(1, 0, 7));
        let walker = harness.spawn_player("Walker", Position::new(0, 2, 7));

        harness.with(&mut monster, |m, ctx| m.refresh_visible_sets(ctx));
        assert_eq!(monster.targets().count(), 2);

        harness.world.update_creature(doomed, |body| body.health = 0);
        harness.world.teleport_creature(walker, Position::new(15, 15, 7)).unwrap();
        harness.with(&mut monster, |m, ctx| m.refresh_visible_sets(ctx));
        assert_eq!(monster.targets().count(), 0);
    }

    #[test]
    fn test_dead_player_not_readded_by_refresh() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(1, 0, 7));
        harness.world.update_creature(player, |body| body.health = 0);

        harness.with(&mut monster, |m, ctx| m.refresh_visible_sets(ctx));
        assert!(!monster.has_target(player));

        let body = harness.body(player);
        let selected = harness.with(&mut monster, |m, ctx| {
            m.add_target(ctx.world, &body, false);
            (m.is_target(&body, ctx.world), m.select_target(ctx, &body))
        });
        assert_eq!(selected, (false, false));
        assert_eq!(monster.attacked(), None);
    }

    #[test]
    fn test_search_nearest_picks_closest() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let at_three = harness.spawn_player("three", Position::new(3, 0, 7));
        let at_five = harness.spawn_player("five", Position::new(0, 5, 7));
        let at_two = harness.spawn_player("two", Position::new(-2, 1, 7));

        let found = harness.with(&mut monster, |m, ctx| {
            for id in [at_three, at_five, at_two] {
                let body = ctx.world.creature(id).unwrap();
                m.add_target(ctx.world, &body, false);
            }
            m.search_target(ctx, TargetSearch::Nearest)
        });
        assert!(found);
        assert_eq!(monster.attacked(), Some(at_two));
        assert_eq!(monster.follow(), Some(at_two));
        let checks = harness.drain();
        assert!(checks.contains(&Deferred::CheckAttack { target: at_two }));
    }

    #[test]
    fn test_search_nearest_deprioritizes_by_faction() {
        let mut harness = Harness::new();
        let template = MonsterTemplate {
            faction: Faction(2),
            enemy_factions: vec![Faction(5), Faction(1)],
            ..create_template("Warlord")
        };
        let mut monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        let near = harness.spawn_body(CreatureKind::Monster, Position::new(1, 0, 7));
        harness.world.update_creature(near, |b| b.faction = Faction(5));
        let far = harness.spawn_player("far", Position::new(4, 0, 7));
        harness.world.update_creature(far, |b| b.faction = Faction::PLAYER);

        harness.with(&mut monster, |m, ctx| {
            m.refresh_visible_sets(ctx);
            assert!(m.has_target(near) && m.has_target(far));
            m.search_target(ctx, TargetSearch::Nearest);
        });
        // faction 1 at distance 4 ranks 104, faction 5 at distance 1 ranks 501
        assert_eq!(monster.attacked(), Some(far));
    }

    #[test]
    fn test_search_health_and_damage() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let healthy = harness.spawn_player("healthy", Position::new(1, 0, 7));
        let wounded = harness.spawn_player("wounded", Position::new(2, 0, 7));
        harness.world.update_creature(wounded, |b| b.health = 10);

        harness.with(&mut monster, |m, ctx| {
            m.refresh_visible_sets(ctx);
            m.search_target(ctx, TargetSearch::Health);
        });
        assert_eq!(monster.attacked(), Some(wounded));

        monster.damage_map.entry(healthy).or_default().total = 50;
        monster.damage_map.entry(wounded).or_default().total = 5;
        harness.with(&mut monster, |m, ctx| {
            m.search_target(ctx, TargetSearch::Damage);
        });
        assert_eq!(monster.attacked(), Some(healthy));
    }

    #[test]
    fn test_default_search_uses_weights() {
        let mut harness = Harness::new();
        let template = MonsterTemplate {
            strategies: TargetStrategies {
                nearest: 0,
                health: 100,
                damage: 0,
                random: 0,
            },
            ..create_template("Vulture")
        };
        let mut monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        harness.spawn_player("close", Position::new(1, 0, 7));
        let weak = harness.spawn_player("weak", Position::new(4, 0, 7));
        harness.world.update_creature(weak, |b| b.health = 1);

        harness.with(&mut monster, |m, ctx| {
            m.refresh_visible_sets(ctx);
            assert!(m.search_target(ctx, TargetSearch::Default));
        });
        assert_eq!(monster.attacked(), Some(weak));
    }

    #[test]
    fn test_ranged_search_skips_targets_out_of_reach() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(
            MonsterTemplate {
                target_distance: 4,
                ..create_ranged_template()
            },
            Position::new(0, 0, 7),
        );
        let player = harness.spawn_player("Bob", Position::new(3, 0, 7));
        harness.world.set_wall(Position::new(1, 0, 7));
        harness.world.set_wall(Position::new(2, 0, 7));

        let found = harness.with(&mut monster, |m, ctx| {
            m.refresh_visible_sets(ctx);
            m.search_target(ctx, TargetSearch::Nearest)
        });
        assert!(monster.has_target(player));
        assert!(!found);
        assert_eq!(monster.attacked(), None);
    }

    #[test]
    fn test_select_requires_listed_target() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(1, 0, 7));

        let selected = harness.with(&mut monster, |m, ctx| {
            let body = ctx.world.creature(player).unwrap();
            m.select_target(ctx, &body)
        });
        assert!(!selected);
        assert_eq!(monster.attacked(), None);
    }

    #[test]
    fn test_protection_zone_and_disconnect_are_not_targets() {
        let mut harness = Harness::new();
        let monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let safe = harness.spawn_player("safe", Position::new(1, 0, 7));
        harness.world.set_protection_zone(Position::new(1, 0, 7), true);
        let gone = harness.spawn_player("gone", Position::new(2, 0, 7));
        harness.world.update_creature(gone, |b| {
            if let Some(player) = b.player.as_mut() {
                player.disconnected = true;
            }
        });

        let ctx = harness.ctx();
        assert!(!monster.is_target(&ctx.world.creature(safe).unwrap(), ctx.world));
        assert!(!monster.is_target(&ctx.world.creature(gone).unwrap(), ctx.world));
    }

    #[test]
    fn test_player_summon_friends_and_opponents() {
        let mut harness = Harness::new();
        let owner = harness.spawn_player("Owner", Position::new(0, 1, 7));
        let partner = harness.spawn_player("Partner", Position::new(1, 1, 7));
        let stranger = harness.spawn_player("Stranger", Position::new(-1, 1, 7));
        for (id, party) in [(owner, Some(9)), (partner, Some(9)), (stranger, None)] {
            harness.world.update_creature(id, |b| {
                if let Some(player) = b.player.as_mut() {
                    player.party = party;
                }
            });
        }
        let mut summon = harness.spawn_monster(create_template("Wolf"), Position::new(0, 0, 7));
        harness.world.set_master(summon.id(), Some(owner)).unwrap();

        harness.with(&mut summon, |m, ctx| {
            let owner_body = ctx.world.creature(owner).unwrap();
            let partner_body = ctx.world.creature(partner).unwrap();
            let stranger_body = ctx.world.creature(stranger).unwrap();
            assert!(m.is_friend(&owner_body, ctx.world));
            assert!(m.is_friend(&partner_body, ctx.world));
            assert!(!m.is_friend(&stranger_body, ctx.world));
            assert!(!m.is_opponent(&owner_body, ctx.world));
            assert!(m.is_opponent(&stranger_body, ctx.world));
        });
    }

    #[test]
    fn test_summon_follows_master_without_orders() {
        let mut harness = Harness::new();
        let master = harness.spawn_monster(create_template("Necromancer"), Position::new(0, 0, 7));
        let mut summon = harness.spawn_monster(create_template("Skeleton"), Position::new(1, 1, 7));
        harness.world.set_master(summon.id(), Some(master.id())).unwrap();

        harness.with(&mut summon, |m, ctx| m.reconsider_targets(ctx));
        assert_eq!(summon.follow(), Some(master.id()));
    }

    #[test]
    fn test_summon_adopts_master_target() {
        let mut harness = Harness::new();
        let master = harness.spawn_monster(create_template("Necromancer"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(3, 0, 7));
        harness.world.set_attack_target(master.id(), Some(player));
        let mut summon = harness.spawn_monster(create_template("Skeleton"), Position::new(1, 1, 7));
        harness.world.set_master(summon.id(), Some(master.id())).unwrap();

        harness.with(&mut summon, |m, ctx| {
            m.refresh_visible_sets(ctx);
            m.reconsider_targets(ctx);
        });
        assert_eq!(summon.attacked(), Some(player));
        assert_eq!(summon.follow(), Some(player));
    }

    #[test]
    fn test_challenge_locks_focus() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let a = harness.spawn_player("A", Position::new(1, 0, 7));
        let b = harness.spawn_player("B", Position::new(3, 0, 7));

        harness.with(&mut monster, |m, ctx| {
            m.refresh_visible_sets(ctx);
            m.search_target(ctx, TargetSearch::Nearest);
            assert_eq!(m.attacked(), Some(a));
            assert!(m.challenge(ctx, b, 6000));
        });
        assert_eq!(monster.attacked(), Some(b));
        assert_eq!(monster.challenge_focus_duration, 6000);
    }

    #[test]
    fn test_change_target_distance_rules() {
        let harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        assert!(monster.change_target_distance(1, 3000));
        assert_eq!(monster.target_distance(), 1);

        let mut boss = harness.spawn_monster(
            MonsterTemplate {
                is_reward_boss: true,
                ..create_template("Boss")
            },
            Position::new(5, 5, 7),
        );
        assert!(!boss.change_target_distance(1, 3000));
    }

    #[test]
    fn test_follow_complete_requeues_target() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let a = harness.spawn_player("A", Position::new(1, 0, 7));
        let b = harness.spawn_player("B", Position::new(2, 0, 7));

        harness.with(&mut monster, |m, ctx| {
            for id in [a, b] {
                let body = ctx.world.creature(id).unwrap();
                m.add_target(ctx.world, &body, false);
            }
        });
        monster.has_follow_path = true;
        harness.with(&mut monster, |m, ctx| m.on_follow_complete(ctx.world, b));
        assert_eq!(monster.targets().collect::<Vec<_>>(), vec![b, a]);

        monster.has_follow_path = false;
        harness.with(&mut monster, |m, ctx| m.on_follow_complete(ctx.world, b));
        assert_eq!(monster.targets().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_pathless_summon_drops_target_and_publishes_count() {
        let mut harness = Harness::new();
        let template = MonsterTemplate {
            faction: Faction(3),
            enemy_factions: vec![Faction::PLAYER],
            ..create_template("Guard")
        };
        let mut monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        let master = harness.spawn_monster(create_template("Warlock"), Position::new(-2, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(1, 1, 7));
        harness.world.update_creature(player, |b| b.faction = Faction::PLAYER);

        harness.with(&mut monster, |m, ctx| m.refresh_visible_sets(ctx));
        assert_eq!(harness.body(monster.id()).players_on_screen, 1);

        harness.world.update_creature(monster.id(), |b| b.master = Some(master.id()));
        monster.has_follow_path = false;
        harness.with(&mut monster, |m, ctx| m.on_follow_complete(ctx.world, player));
        assert!(!monster.has_target(player));
        assert_eq!(monster.players_on_screen(), 0);
        assert_eq!(harness.body(monster.id()).players_on_screen, 0);
    }

    #[test]
    fn test_creature_entering_view_is_selected() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(12, 0, 7));

        let from = Position::new(12, 0, 7);
        let to = Position::new(5, 0, 7);
        harness.world.teleport_creature(player, to).unwrap();
        harness.with(&mut monster, |m, ctx| {
            let body = ctx.world.creature(player).unwrap();
            m.on_creature_move(ctx, &body, from, to);
        });
        assert!(monster.has_target(player));
        assert_eq!(monster.attacked(), Some(player));
        assert!(!monster.is_idle());
    }

    #[test]
    fn test_creature_leaving_view_is_dropped() {
        let mut harness = Harness::new();
        let mut monster = harness.spawn_monster(create_template("Orc"), Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(2, 0, 7));
        harness.with(&mut monster, |m, ctx| m.refresh_visible_sets(ctx));
        assert!(monster.has_target(player));

        let from = Position::new(2, 0, 7);
        let to = Position::new(15, 0, 7);
        harness.world.teleport_creature(player, to).unwrap();
        harness.with(&mut monster, |m, ctx| {
            let body = ctx.world.creature(player).unwrap();
            m.on_creature_move(ctx, &body, from, to);
        });
        assert!(!monster.has_target(player));
        assert_eq!(monster.attacked(), None);
        assert!(monster.is_idle());
    }

    #[test]
    fn test_appear_hook_can_veto() {
        let mut harness = Harness::new();
        let mut template = create_template("Shy");
        let hook: Arc<dyn CreatureHook> = Arc::new(|_: &CreatureBody, _: &HookEvent<'_>, _: &dyn World| {
            Ok::<_, HookError>(HookOutcome::Handled)
        });
        template.hooks.register(HookKind::Appear, hook);
        let mut monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(1, 0, 7));

        harness.with(&mut monster, |m, ctx| {
            let body = ctx.world.creature(player).unwrap();
            m.on_creature_appear(ctx, &body);
        });
        assert!(!monster.has_target(player));
    }

    #[test]
    fn test_failing_hook_falls_back_to_default() {
        let mut harness = Harness::new();
        let mut template = create_template("Buggy");
        let hook: Arc<dyn CreatureHook> = Arc::new(|_: &CreatureBody, _: &HookEvent<'_>, _: &dyn World| {
            Err::<HookOutcome, _>(HookError::Failed("nil value".into()))
        });
        template.hooks.register(HookKind::Appear, hook);
        let mut monster = harness.spawn_monster(template, Position::new(0, 0, 7));
        let player = harness.spawn_player("Bob", Position::new(1, 0, 7));

        harness.with(&mut monster, |m, ctx| {
            let body = ctx.world.creature(player).unwrap();
            m.on_creature_appear(ctx, &body);
        });
        assert!(monster.has_target(player));
        assert_eq!(monster.targets().next(), Some(player));
    }
}
