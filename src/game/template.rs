//! Creature templates
//!
//! Static per-species data the AI reads at runtime. Templates are loaded once
//! (JSON through serde), shared behind `Arc` and never mutated while the
//! engine runs.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::game::state::Faction;
use crate::script::{CreatureHook, HookKind, ScriptHooks};

/// Damage element used by elemental modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombatType {
    Physical,
    Energy,
    Earth,
    Fire,
    Ice,
    Holy,
    Death,
    Drown,
    LifeDrain,
    ManaDrain,
    Healing,
}

/// Offensive or defensive spell entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityBlock {
    pub spell: String,
    /// Reach in tiles, 0 means self-centred
    pub range: i32,
    /// Period in milliseconds, matched against the tick accumulator
    pub speed: u32,
    /// Percentage chance to fire once ready
    pub chance: u32,
    pub melee: bool,
    pub min_combat: i32,
    pub max_combat: i32,
}

/// Summon table entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummonBlock {
    pub name: String,
    pub speed: u32,
    pub chance: u32,
    /// Live summons of this name a single caster may own
    pub count: u32,
    /// Place even when no free tile is adjacent
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceBlock {
    pub text: String,
    pub yell: bool,
    /// `text` is a prompt for the ambient text generator instead of a line
    pub generated: bool,
}

/// Percentage weights for the default target search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetStrategies {
    pub nearest: u32,
    pub health: u32,
    pub damage: u32,
    pub random: u32,
}

impl Default for TargetStrategies {
    fn default() -> Self {
        Self {
            nearest: 100,
            health: 0,
            damage: 0,
            random: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RespawnPeriod {
    #[default]
    All,
    Day,
    Night,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespawnRule {
    pub period: RespawnPeriod,
    /// Underground spawns ignore the period
    pub underground: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonsterTemplate {
    pub name: String,
    pub health: i32,
    pub speed: u32,
    pub faction: Faction,
    pub enemy_factions: Vec<Faction>,

    pub hostile: bool,
    pub pushable: bool,
    pub can_push_items: bool,
    pub can_push_creatures: bool,
    pub can_see_invisible: bool,
    pub is_reward_boss: bool,

    /// Preferred distance to the attacked creature, 1 is melee
    pub target_distance: i32,
    /// Health at or below which the creature runs away
    pub run_away_health: i32,
    /// Percentage chance to stand still instead of dancing around the target
    pub static_attack_chance: u32,
    /// Milliseconds between opportunistic target reconsiderations, 0 disables
    pub change_target_speed: u32,
    pub change_target_chance: u32,
    pub strategies: TargetStrategies,

    pub attacks: Vec<AbilityBlock>,
    pub defenses: Vec<AbilityBlock>,
    pub summons: Vec<SummonBlock>,
    pub max_summons: u32,

    pub voices: Vec<VoiceBlock>,
    pub yell_speed_ticks: u32,
    pub yell_chance: u32,
    pub sounds: Vec<u16>,
    pub sound_speed_ticks: u32,
    pub sound_chance: u32,
    pub death_sound: Option<u16>,

    pub respawn: RespawnRule,

    pub armor: i32,
    pub defense: i32,
    pub mitigation: f32,
    /// Percentage modifiers per element, positive values resist
    pub elements: HashMap<CombatType, i32>,
    /// Percentage of incoming damage reflected per element
    pub reflects: HashMap<CombatType, i32>,

    #[serde(skip)]
    pub hooks: ScriptHooks,
}

impl Default for MonsterTemplate {
    fn default() -> Self {
        Self {
            name: String::new(),
            health: 100,
            speed: 200,
            faction: Faction::DEFAULT,
            enemy_factions: Vec::new(),
            hostile: true,
            pushable: true,
            can_push_items: false,
            can_push_creatures: false,
            can_see_invisible: false,
            is_reward_boss: false,
            target_distance: 1,
            run_away_health: 0,
            static_attack_chance: 95,
            change_target_speed: 0,
            change_target_chance: 0,
            strategies: TargetStrategies::default(),
            attacks: Vec::new(),
            defenses: Vec::new(),
            summons: Vec::new(),
            max_summons: 0,
            voices: Vec::new(),
            yell_speed_ticks: 0,
            yell_chance: 0,
            sounds: Vec::new(),
            sound_speed_ticks: 0,
            sound_chance: 0,
            death_sound: None,
            respawn: RespawnRule::default(),
            armor: 0,
            defense: 0,
            mitigation: 0.0,
            elements: HashMap::new(),
            reflects: HashMap::new(),
            hooks: ScriptHooks::default(),
        }
    }
}

impl MonsterTemplate {
    pub fn is_enemy_faction(&self, faction: Faction) -> bool {
        self.enemy_factions.contains(&faction)
    }

    pub fn element_modifier(&self, combat: CombatType) -> i32 {
        self.elements.get(&combat).copied().unwrap_or(0)
    }

    pub fn reflect_percent(&self, combat: CombatType) -> i32 {
        self.reflects.get(&combat).copied().unwrap_or(0)
    }
}

/// Name-indexed template store
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<MonsterTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of templates
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let list: Vec<MonsterTemplate> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for template in list {
            registry.insert(template);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, template: MonsterTemplate) -> Arc<MonsterTemplate> {
        let key = template.name.to_lowercase();
        let shared = Arc::new(template);
        self.templates.insert(key, shared.clone());
        shared
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<Arc<MonsterTemplate>> {
        self.templates.get(&name.to_lowercase()).cloned()
    }

    /// Attach a script hook to a template. Creatures already spawned keep the
    /// template they were created with.
    pub fn set_hook(&mut self, name: &str, kind: HookKind, hook: Arc<dyn CreatureHook>) -> bool {
        match self.templates.get_mut(&name.to_lowercase()) {
            Some(template) => {
                Arc::make_mut(template).hooks.register(kind, hook);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.values().map(|t| t.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAT_JSON: &str = r#"[
        {
            "name": "Cave Rat",
            "health": 30,
            "speed": 150,
            "faction": 4,
            "enemy_factions": [5],
            "target_distance": 1,
            "strategies": { "nearest": 60, "health": 20, "damage": 10, "random": 10 },
            "attacks": [
                { "spell": "melee", "range": 1, "speed": 2000, "chance": 100, "melee": true, "min_combat": 0, "max_combat": -10 }
            ],
            "summons": [ { "name": "Rat", "speed": 2000, "chance": 20, "count": 2 } ],
            "max_summons": 2,
            "elements": { "Fire": 20 },
            "respawn": { "period": "Night", "underground": true }
        }
    ]"#;

    #[test]
    fn test_registry_from_json() {
        let registry = TemplateRegistry::from_json(RAT_JSON).unwrap();
        assert_eq!(registry.len(), 1);

        let rat = registry.get("cave rat").unwrap();
        assert_eq!(rat.health, 30);
        assert_eq!(rat.faction, Faction(4));
        assert!(rat.is_enemy_faction(Faction(5)));
        assert_eq!(rat.strategies.nearest, 60);
        assert_eq!(rat.attacks.len(), 1);
        assert!(rat.attacks[0].melee);
        assert_eq!(rat.summons[0].count, 2);
        assert_eq!(rat.element_modifier(CombatType::Fire), 20);
        assert_eq!(rat.element_modifier(CombatType::Ice), 0);
        assert_eq!(rat.respawn.period, RespawnPeriod::Night);
        assert!(rat.respawn.underground);
        // unspecified fields fall back to defaults
        assert!(rat.hostile);
        assert_eq!(rat.static_attack_chance, 95);
    }

    #[test]
    fn test_registry_missing_template() {
        let registry = TemplateRegistry::new();
        assert!(registry.get("dragon").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(TemplateRegistry::from_json("{ not json").is_err());
    }
}
