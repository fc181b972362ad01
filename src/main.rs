use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use creature_ai::ambient::{AmbientError, AmbientQueue, AmbientRequest, AmbientText};
use creature_ai::config::AiConfig;
use creature_ai::game::engine::Engine;
use creature_ai::game::grid::GridWorld;
use creature_ai::game::state::CreatureBody;
use creature_ai::game::template::{CombatType, TemplateRegistry};
use creature_ai::game::world::{SpeakKind, World};
use creature_ai::script::{HookError, HookEvent, HookKind, HookOutcome};
use creature_ai::util::position::{Direction, Position};

const MONSTERS_JSON: &str = include_str!("../assets/monsters.json");

/// Canned lines standing in for a real text generator
struct ScriptedText {
    lines: &'static [&'static str],
    next: AtomicUsize,
}

#[async_trait]
impl AmbientText for ScriptedText {
    async fn generate(&self, request: &AmbientRequest) -> Result<String, AmbientError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let line = self.lines.get(index % self.lines.len().max(1)).ok_or(AmbientError::Unavailable)?;
        Ok(format!("{}: {}", request.name, line))
    }
}

/// Build the demo map: open floor with a wall segment and a few players
fn create_world() -> Arc<GridWorld> {
    let world = Arc::new(GridWorld::new());
    world.fill_floor(Position::new(0, 0, 7), Position::new(40, 40, 7));
    for y in 10..30 {
        world.set_wall(Position::new(20, y, 7));
    }
    world.set_daytime(false);
    world
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Creature AI simulation v{}", env!("CARGO_PKG_VERSION"));

    let config = AiConfig::load_or_default();
    let ticks: u64 = std::env::var("AI_SIM_TICKS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(120);

    let mut templates = TemplateRegistry::from_json(MONSTERS_JSON)?;
    info!("Loaded {} creature templates", templates.len());

    // shamans shout back at anyone who talks near them
    templates.set_hook(
        "Orc Shaman",
        HookKind::Say,
        Arc::new(|me: &CreatureBody, event: &HookEvent<'_>, world: &dyn World| {
            if let HookEvent::Say { speaker, .. } = event {
                if speaker.is_player() {
                    world.creature_say(me.id, SpeakKind::Yell, "Silence, intruder!");
                    return Ok(HookOutcome::Handled);
                }
            }
            Ok::<_, HookError>(HookOutcome::Continue)
        }),
    );

    let world = create_world();
    let ambient = AmbientQueue::spawn(
        Arc::new(ScriptedText {
            lines: &["For the horde!", "Your bones will be mine!", "Flee while you can!"],
            next: AtomicUsize::new(0),
        }),
        config.ambient_queue_capacity,
        Duration::from_millis(config.ambient_timeout_ms),
    );
    let mut engine = Engine::new(world.clone(), templates, config).with_ambient(ambient);

    for (name, pos) in [
        ("Orc Warrior", Position::new(8, 8, 7)),
        ("Orc Warrior", Position::new(12, 30, 7)),
        ("Orc Shaman", Position::new(10, 20, 7)),
        ("Vampire", Position::new(32, 32, 7)),
    ] {
        if let Err(e) = engine.spawn(name, pos) {
            error!("Failed to spawn {}: {}", name, e);
        }
    }

    let hunter = world.add_player("Hunter", Position::new(2, 20, 7));
    let scout = world.add_player("Scout", Position::new(30, 5, 7));
    info!("Simulation ready: {} creatures, {} ticks", engine.len(), ticks);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(Duration::from_millis(50));

    for tick in 0..ticks {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }

        // the scout patrols east and west across the map
        let dir = if (tick / 20) % 2 == 0 { Direction::East } else { Direction::West };
        if let Some(from) = world.creature(scout).map(|b| b.position) {
            if let Ok(to) = world.move_creature(scout, dir) {
                engine.notify_move(scout, from, to);
            }
        }

        if tick % 10 == 0 {
            world.creature_say(hunter, SpeakKind::Say, "Anyone there?");
            engine.notify_say(hunter, SpeakKind::Say, "Anyone there?");
        }

        // the hunter hits whatever creature is attacking it
        let attackers: Vec<_> = engine
            .monsters()
            .filter(|m| m.attacked() == Some(hunter))
            .map(|m| m.id())
            .collect();
        for id in attackers {
            engine.apply_damage(id, Some(hunter), CombatType::Physical, 20);
            engine.notify_attacked_by_player(id, hunter);
        }

        let report = engine.tick();
        for death in &report.deaths {
            info!("Creature {} died, corpse owner {:?}", death.creature, death.corpse_owner);
        }
        for event in world.take_events() {
            tracing::debug!(?event, "world event");
        }
    }

    info!(
        "Simulation finished after {} ticks: {} creatures left, {} active",
        engine.tick_count(),
        engine.len(),
        engine.active_count()
    );
    info!("{}", engine.metrics().to_json());

    Ok(())
}
