//! Deferred task queue
//!
//! Think steps run in parallel and must not re-enter the engine. Anything
//! that changes engine-level state (active set, summon ownership, removal)
//! is queued here through a cloned sender and applied by the engine once
//! every think step of the tick has finished.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::game::state::CreatureId;
use crate::util::position::Position;

/// Work a creature asked the engine to do after the think phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// Confirm the attack target is still valid and start the attack
    CheckAttack { target: CreatureId },
    /// Register for active ticking
    Activate,
    /// Drop from active ticking
    Deactivate,
    /// Spawn a summon of `name` near `near` owned by the origin creature
    Summon { name: String, near: Position, force: bool },
    /// Remove the origin creature from the world
    Remove,
    /// The origin creature stepped from `from` to `to`
    Moved { from: Position, to: Position },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredTask {
    pub origin: CreatureId,
    pub task: Deferred,
}

/// Unbounded MPSC queue of deferred tasks. Every queued task is applied.
pub struct Dispatcher {
    sender: Sender<DeferredTask>,
    receiver: Receiver<DeferredTask>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Create a new sender handle for a think step
    pub fn sender(&self) -> DeferredSender {
        DeferredSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain everything queued so far, grouped by origin creature.
    ///
    /// Tasks from one creature keep the order they were queued in; groups
    /// are ordered by creature id so application does not depend on which
    /// worker thread finished first.
    pub fn drain(&self) -> Vec<DeferredTask> {
        let mut tasks: Vec<DeferredTask> = self.receiver.try_iter().collect();
        tasks.sort_by_key(|t| t.origin);
        tasks
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Clonable sender handle given to every think step
#[derive(Clone)]
pub struct DeferredSender {
    sender: Sender<DeferredTask>,
}

impl DeferredSender {
    /// Queue a task. A disconnected queue means the engine is gone, in which
    /// case there is nobody left to apply it.
    #[inline]
    pub fn send(&self, origin: CreatureId, task: Deferred) {
        if self.sender.send(DeferredTask { origin, task }).is_err() {
            tracing::debug!(origin, "deferred queue closed, task dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_send_and_drain() {
        let dispatcher = Dispatcher::new();
        let sender = dispatcher.sender();

        sender.send(1, Deferred::Activate);
        sender.send(1, Deferred::CheckAttack { target: 7 });
        assert_eq!(dispatcher.pending_count(), 2);

        let tasks = dispatcher.drain();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task, Deferred::Activate);
        assert_eq!(tasks[1].task, Deferred::CheckAttack { target: 7 });
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_drain_groups_by_origin_keeping_order() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher.sender();
        let b = dispatcher.sender();

        b.send(9, Deferred::Remove);
        a.send(3, Deferred::Deactivate);
        b.send(9, Deferred::Activate);
        a.send(3, Deferred::Activate);

        let tasks = dispatcher.drain();
        let order: Vec<_> = tasks.iter().map(|t| (t.origin, t.task.clone())).collect();
        assert_eq!(
            order,
            vec![
                (3, Deferred::Deactivate),
                (3, Deferred::Activate),
                (9, Deferred::Remove),
                (9, Deferred::Activate),
            ]
        );
    }

    #[test]
    fn test_senders_across_threads() {
        let dispatcher = Dispatcher::new();
        let handles: Vec<_> = (0..4)
            .map(|origin| {
                let sender = dispatcher.sender();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        sender.send(origin, Deferred::Activate);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(dispatcher.drain().len(), 40);
    }
}
