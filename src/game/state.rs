//! Creature state shared between the world and the AI
//!
//! A `CreatureBody` is the world's view of a creature: what any other
//! creature may observe about it. Brains only ever hold ids and fetch fresh
//! bodies through the world, so a vanished creature simply reads as `None`.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::game::template::MonsterTemplate;
use crate::util::position::Position;

/// Stable creature identifier, never reused while the world runs
pub type CreatureId = u32;

/// Faction tag. `DEFAULT` creatures follow the classic player-vs-monster
/// rules, any other value enables faction warfare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Faction(pub u16);

impl Faction {
    pub const DEFAULT: Faction = Faction(0);
    pub const PLAYER: Faction = Faction(1);

    #[inline]
    pub fn is_default(self) -> bool {
        self == Faction::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreatureKind {
    Player,
    Monster,
    Npc,
}

/// Status effects that keep a creature awake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    Poison,
    Fire,
    Energy,
    Bleeding,
    Paralyze,
    Haste,
    Invisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub remaining_ms: u64,
}

/// Player-only state the AI reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerInfo {
    pub party: Option<u32>,
    pub disconnected: bool,
    /// Staff and test characters monsters never attack
    pub ignored_by_monsters: bool,
}

/// Snapshot of a creature as seen by everyone else
#[derive(Debug, Clone)]
pub struct CreatureBody {
    pub id: CreatureId,
    pub name: String,
    pub kind: CreatureKind,
    pub position: Position,
    pub health: i32,
    pub max_health: i32,
    pub faction: Faction,
    pub master: Option<CreatureId>,
    pub speed: u32,
    pub attackable: bool,
    pub pushable: bool,
    pub invisible: bool,
    pub removed: bool,
    pub conditions: SmallVec<[Condition; 4]>,
    pub player: Option<PlayerInfo>,
    /// Set for monsters, shared with every creature spawned from it
    pub template: Option<Arc<MonsterTemplate>>,
    pub attacking: Option<CreatureId>,
    /// Players a monster currently has in view; summons read their master's
    pub players_on_screen: u32,
}

impl CreatureBody {
    pub fn new(id: CreatureId, name: impl Into<String>, kind: CreatureKind, position: Position) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            position,
            health: 100,
            max_health: 100,
            faction: Faction::DEFAULT,
            master: None,
            speed: 220,
            attackable: true,
            pushable: kind != CreatureKind::Player,
            invisible: false,
            removed: false,
            conditions: SmallVec::new(),
            player: (kind == CreatureKind::Player).then(PlayerInfo::default),
            template: None,
            attacking: None,
            players_on_screen: 0,
        }
    }

    /// Body for a freshly spawned monster, seeded from its template
    pub fn from_template(id: CreatureId, template: Arc<MonsterTemplate>, position: Position) -> Self {
        let mut body = Self::new(id, template.name.clone(), CreatureKind::Monster, position);
        body.health = template.health;
        body.max_health = template.health;
        body.faction = template.faction;
        body.speed = template.speed;
        body.pushable = template.pushable;
        body.template = Some(template);
        body
    }

    #[inline]
    pub fn is_player(&self) -> bool {
        self.kind == CreatureKind::Player
    }

    #[inline]
    pub fn is_monster(&self) -> bool {
        self.kind == CreatureKind::Monster
    }

    #[inline]
    pub fn is_summon(&self) -> bool {
        self.master.is_some()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }

    /// Player that has lost its connection but is still in the world
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.player.as_ref().is_some_and(|p| p.disconnected)
    }

    #[inline]
    pub fn is_ignored_by_monsters(&self) -> bool {
        self.player.as_ref().is_some_and(|p| p.ignored_by_monsters)
    }

    pub fn party(&self) -> Option<u32> {
        self.player.as_ref().and_then(|p| p.party)
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn hostile(&self) -> bool {
        self.template.as_ref().is_some_and(|t| t.hostile)
    }
}
