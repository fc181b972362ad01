/// Map layout constants
pub mod map {
    /// Ground floor. Floors above it (lower `z`) are surface floors.
    pub const SURFACE_LAYER: u8 = 7;
    /// Floors visible up and down while underground
    pub const LAYER_VIEW_LIMIT: i32 = 2;
    /// Client view port half width in tiles
    pub const VIEW_RANGE_X: i32 = 8;
    /// Client view port half height in tiles
    pub const VIEW_RANGE_Y: i32 = 6;
}

/// Combat scheduling constants
pub mod combat {
    /// Window after a melee swing during which a regular melee attack is held back
    pub const MELEE_GRACE_MS: u64 = 1500;
    /// Upper bound of every percentage chance roll (rolls are 1..=100)
    pub const CHANCE_ROLL_MAX: u32 = 100;
    /// Cap on the mitigation value reported for a creature
    pub const MAX_MITIGATION: f32 = 30.0;
    /// Sound played where a summon appears
    pub const SUMMON_SOUND: u16 = 2;
}

/// Target selection constants
pub mod targeting {
    /// Distance penalty per faction id when ranking by proximity
    pub const NEAREST_FACTION_OFFSET: i64 = 100;
    /// Health penalty per faction id when ranking by lowest health
    pub const HEALTH_FACTION_OFFSET: i64 = 100_000;
}

/// Movement constants
pub mod movement {
    /// Speed a creature with base speed walks one tile per second at
    pub const GROUND_SPEED: u32 = 150;
    /// Minimum time between two random wander steps
    pub const RANDOM_STEP_DELAY_MS: u64 = 1000;
    /// Time after which a follow path is recomputed
    pub const FOLLOW_PATH_UPDATE_MS: u64 = 2000;
    /// Items relocated before blockers start being destroyed
    pub const MAX_ITEM_PUSHES: u32 = 20;
    /// Tiles subtracted from the remaining distance when pathing back to spawn
    pub const WALK_BACK_SLACK: i32 = 5;
    /// Step counter ceiling used for the adjacent-target slowdown
    pub const MAX_STEP_DURATION: i32 = 2;
    /// Step intervals are rounded up to a multiple of this
    pub const STEP_ROUNDING_MS: u64 = 50;
    /// Steps one think may take no matter how much walk time piled up
    pub const MAX_STEPS_PER_THINK: u32 = 4;
}

/// Engine defaults
pub mod engine {
    /// Default elapsed time fed to every think step
    pub const TICK_INTERVAL_MS: u64 = 1000;
    /// Default seed from which per-creature generators are derived
    pub const RNG_SEED: u64 = 0x5eed;
    /// Nested script hook calls allowed before the call is refused
    pub const MAX_HOOK_DEPTH: usize = 8;
    /// Deferred task rounds applied per tick. Tasks queued by the last
    /// round wait for the next tick.
    pub const MAX_DEFERRED_ROUNDS: usize = 8;
    /// Odd multiplier spreading creature ids over the seed space
    pub const SEED_SPREAD: u64 = 0x9E37_79B9_7F4A_7C15;
}

/// Ambient text constants
pub mod ambient {
    /// Time a generated line may take before it is dropped
    pub const REQUEST_TIMEOUT_MS: u64 = 5000;
    /// Pending generation requests before new ones are dropped
    pub const QUEUE_CAPACITY: usize = 256;
}
