//! Lifecycle and idle state machine
//!
//! Active and idle transitions, spawn leash enforcement and death.

use tracing::{debug, info};

use crate::config::AiConfig;
use crate::game::constants::map::SURFACE_LAYER;
use crate::game::dispatcher::Deferred;
use crate::game::monster::{Monster, TickContext};
use crate::game::state::CreatureId;
use crate::game::template::RespawnPeriod;
use crate::game::world::SoundEffect;
use crate::util::position::{self, Position};

impl Monster {
    /// Re-evaluate whether this creature has anything to do. A creature with
    /// no targets that is away from its anchor starts walking back instead
    /// of going idle.
    pub(crate) fn update_idle_status(&mut self, ctx: &TickContext<'_>) {
        let mut idle = false;

        if !self.body.has_conditions() {
            if !self.is_summon() && self.targets.is_empty() {
                if self.is_in_spawn_location() {
                    idle = true;
                } else {
                    self.walking_back = true;
                }
            } else if let Some(master) = self.body.master.and_then(|id| ctx.world.creature(id)) {
                if !self.body.faction.is_default() && master.is_monster() && master.players_on_screen == 0 {
                    idle = true;
                }
            }
        }

        self.set_idle(ctx, idle);
    }

    pub(crate) fn set_idle(&mut self, ctx: &TickContext<'_>, idle: bool) {
        if self.dead || self.body.removed || self.body.health <= 0 {
            return;
        }

        let changed = self.idle != idle;
        self.idle = idle;

        if idle {
            self.on_idle_status();
            self.clear_targets(ctx.world);
            self.friends.clear();
            if changed {
                debug!(creature = self.id, "going idle");
                ctx.deferred.send(self.id, Deferred::Deactivate);
            }
        } else if changed {
            debug!(creature = self.id, "waking up");
            ctx.deferred.send(self.id, Deferred::Activate);
        }
    }

    fn on_idle_status(&mut self) {
        if self.body.health > 0 {
            self.damage_map.clear();
        }
    }

    /// Standing on the spawn anchor, or not bound to one
    pub fn is_in_spawn_location(&self) -> bool {
        self.spawn.map_or(true, |anchor| anchor == self.position())
    }

    /// Inside the despawn leash around the anchor. A zero radius or range
    /// disables the respective check.
    pub fn is_in_spawn_range(&self, config: &AiConfig, pos: Position) -> bool {
        let Some(anchor) = self.spawn else {
            return true;
        };
        if config.despawn_radius == 0 {
            return true;
        }
        if !position::is_in_zone(anchor, config.despawn_radius, pos) {
            return false;
        }
        config.despawn_range == 0 || pos.distance_z(anchor) <= config.despawn_range
    }

    /// Teleport back to the anchor and go idle. A creature that cannot be
    /// returned is removed.
    pub(crate) fn return_to_spawn(&mut self, ctx: &TickContext<'_>) {
        let Some(anchor) = self.spawn else {
            return;
        };
        let from = self.position();

        match ctx.world.teleport_creature(self.id, anchor) {
            Ok(()) => {
                info!(creature = self.id, name = %self.body.name, %from, "left its spawn range, returning");
                self.body.position = anchor;
                self.walk_queue.clear();
                self.walking_back = false;
                ctx.deferred.send(self.id, Deferred::Moved { from, to: anchor });
                self.set_idle(ctx, true);
            }
            Err(e) => {
                info!(creature = self.id, name = %self.body.name, "cannot return to spawn, removing: {}", e);
                ctx.deferred.send(self.id, Deferred::Remove);
            }
        }
    }

    /// Day-only and night-only creatures may not exist in the wrong period
    /// unless they are underground and allowed to be there
    pub(crate) fn can_spawn_here(&self, ctx: &TickContext<'_>) -> bool {
        if self.spawn.is_none() {
            return true;
        }

        let rule = self.template.respawn;
        let daytime = ctx.world.is_daytime();
        let wrong_period = match rule.period {
            RespawnPeriod::All => false,
            RespawnPeriod::Day => !daytime,
            RespawnPeriod::Night => daytime,
        };
        if !wrong_period {
            return true;
        }
        self.position().z > SURFACE_LAYER && rule.underground
    }

    /// Count down a temporary target distance override
    pub(crate) fn tick_challenge_melee(&mut self, interval: u64) {
        if self.challenge_melee_duration <= 0 {
            return;
        }
        self.challenge_melee_duration -= i64::try_from(interval).unwrap_or(i64::MAX);
        if self.challenge_melee_duration <= 0 {
            self.challenge_melee_duration = 0;
            self.target_distance = self.template.target_distance;
        }
    }

    /// Final cleanup when the creature dies. Returns the player credited
    /// with the kill, if any.
    pub fn death(&mut self, ctx: &TickContext<'_>) -> Option<CreatureId> {
        if self.dead {
            return None;
        }

        let owner = self.corpse_owner(ctx.world);
        self.set_attacked(ctx, None);

        for summon in std::mem::take(&mut self.summons) {
            if let Some(body) = ctx.world.creature(summon) {
                if let Err(e) = ctx.world.change_health(summon, -body.health) {
                    debug!(creature = self.id, summon, "summon kill rejected: {}", e);
                }
                if let Err(e) = ctx.world.set_master(summon, None) {
                    debug!(creature = self.id, summon, "summon release rejected: {}", e);
                }
            }
        }
        self.pending_summons.clear();

        self.clear_targets(ctx.world);
        self.friends.clear();
        self.damage_map.clear();
        self.follow = None;
        self.has_follow_path = false;
        self.walk_queue.clear();

        if let Some(sound) = self.template.death_sound {
            ctx.world
                .sound_effect(self.position(), SoundEffect(sound), Some(self.id));
        }

        self.dead = true;
        self.idle = true;
        info!(creature = self.id, name = %self.body.name, ?owner, "died");
        owner
    }
}
