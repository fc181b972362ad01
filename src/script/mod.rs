//! Script hook capability interface
//!
//! Content authors can attach a handler per event kind to a creature
//! template. The AI calls the handler first; if it reports the event as
//! handled, the default behavior is skipped. Missing handlers, failing
//! handlers and handlers that recurse too deeply all fall through to the
//! default behavior.

use hashbrown::HashMap;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::game::state::CreatureBody;
use crate::game::world::{SpeakKind, World};
use crate::util::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Appear,
    Disappear,
    Move,
    Say,
    Think,
    Spawn,
    AttackedByPlayer,
}

/// Event payload handed to a hook
#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    Appear { creature: &'a CreatureBody },
    Disappear { creature: &'a CreatureBody },
    Move { creature: &'a CreatureBody, from: Position, to: Position },
    Say { speaker: &'a CreatureBody, kind: SpeakKind, text: &'a str },
    Think { interval_ms: u64 },
    Spawn { position: Position },
    AttackedByPlayer { attacker: &'a CreatureBody },
}

impl HookEvent<'_> {
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::Appear { .. } => HookKind::Appear,
            HookEvent::Disappear { .. } => HookKind::Disappear,
            HookEvent::Move { .. } => HookKind::Move,
            HookEvent::Say { .. } => HookKind::Say,
            HookEvent::Think { .. } => HookKind::Think,
            HookEvent::Spawn { .. } => HookKind::Spawn,
            HookEvent::AttackedByPlayer { .. } => HookKind::AttackedByPlayer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Run the default handling afterwards
    Continue,
    /// Skip the default handling
    Handled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("hook call stack exceeded {0} nested calls")]
    StackOverflow(usize),
    #[error("script failed: {0}")]
    Failed(String),
}

/// A handler bound to one event kind of one template
pub trait CreatureHook: Send + Sync {
    fn call(
        &self,
        me: &CreatureBody,
        event: &HookEvent<'_>,
        world: &dyn World,
    ) -> Result<HookOutcome, HookError>;
}

impl<F> CreatureHook for F
where
    F: Fn(&CreatureBody, &HookEvent<'_>, &dyn World) -> Result<HookOutcome, HookError> + Send + Sync,
{
    fn call(
        &self,
        me: &CreatureBody,
        event: &HookEvent<'_>,
        world: &dyn World,
    ) -> Result<HookOutcome, HookError> {
        self(me, event, world)
    }
}

thread_local! {
    /// Hook calls currently on this thread's stack
    static HOOK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter(max_depth: usize) -> Result<Self, HookError> {
        HOOK_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= max_depth {
                return Err(HookError::StackOverflow(max_depth));
            }
            depth.set(current + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        HOOK_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Per-template hook table
#[derive(Clone, Default)]
pub struct ScriptHooks {
    hooks: HashMap<HookKind, Arc<dyn CreatureHook>>,
}

impl fmt::Debug for ScriptHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.hooks.keys()).finish()
    }
}

impl ScriptHooks {
    pub fn register(&mut self, kind: HookKind, hook: Arc<dyn CreatureHook>) {
        self.hooks.insert(kind, hook);
    }

    pub fn has(&self, kind: HookKind) -> bool {
        self.hooks.contains_key(&kind)
    }

    /// Try the hook for `event`, never failing the caller.
    ///
    /// Returns `Handled` only when a registered hook ran and asked for the
    /// default handling to be skipped.
    pub fn dispatch(
        &self,
        me: &CreatureBody,
        event: &HookEvent<'_>,
        world: &dyn World,
        max_depth: usize,
    ) -> HookOutcome {
        let Some(hook) = self.hooks.get(&event.kind()) else {
            return HookOutcome::Continue;
        };

        let result = DepthGuard::enter(max_depth).and_then(|_guard| hook.call(me, event, world));
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    creature = me.id,
                    name = %me.name,
                    hook = ?event.kind(),
                    "script hook failed, using default behavior: {}",
                    e
                );
                HookOutcome::Continue
            }
        }
    }
}
