//! Per-component command queue with keyed coalescing and budgeted draining.

use std::cell::RefCell;
use std::future::Future;

use rustc_hash::FxHashMap;

use crate::innerlude::*;

/// An ordered queue of [`Op`]s with at most one op per coalescing key.
///
/// Draining snapshots the queue: ops pushed while the snapshot is being worked
/// accumulate in the live buffer and are deferred to the next drain. A new op
/// for an in-flight key can therefore coalesce only forward, never
/// retroactively into the snapshot.
pub struct CommandBuffer {
    ops: Vec<Op>,
    index: FxHashMap<String, usize>,
    sequence: u64,
    generation: u64,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            index: FxHashMap::default(),
            sequence: 0,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Look up the stored op for a key, if any.
    pub fn get(&self, key: &str) -> Option<&Op> {
        self.index.get(key).map(|&at| &self.ops[at])
    }

    /// Push an op, coalescing against any stored op with the same key.
    ///
    /// On coalesce the stored op keeps its original `sequence` and adopts the
    /// incoming kind, priority, and payload; when a squash function is given
    /// the stored payload is folded with the incoming one instead of being
    /// replaced.
    pub fn push(&mut self, push: PushOp) {
        debug_assert!(
            !push.kind.is_empty() && !push.key.is_empty(),
            "op kind and key must be non-empty"
        );

        match self.index.get(&push.key).copied() {
            Some(at) => {
                let sequence = self.ops[at].sequence;
                match push.squash {
                    Some(squash) => {
                        let incoming = Op {
                            kind: push.kind,
                            key: push.key,
                            payload: push.payload,
                            priority: push.priority,
                            sequence,
                            generation: self.generation,
                        };
                        let folded = squash(
                            &self.ops[at].payload,
                            &incoming.payload,
                            &self.ops[at],
                            &incoming,
                        );
                        let stored = &mut self.ops[at];
                        stored.kind = incoming.kind;
                        stored.priority = incoming.priority;
                        stored.payload = folded;
                    }
                    None => {
                        let stored = &mut self.ops[at];
                        stored.kind = push.kind;
                        stored.priority = push.priority;
                        stored.payload = push.payload;
                    }
                }
            }
            None => {
                self.sequence += 1;
                let op = Op {
                    kind: push.kind,
                    key: push.key,
                    payload: push.payload,
                    priority: push.priority,
                    sequence: self.sequence,
                    generation: self.generation,
                };
                self.index.insert(op.key.clone(), self.ops.len());
                self.ops.push(op);
            }
        }
    }

    /// Drop all pending ops. Used when the owning component is destroyed.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.index.clear();
    }

    /// Take the current ops as a drain snapshot, sorted by
    /// `(priority, sequence)` ascending, leaving the live buffer empty.
    pub(crate) fn take_snapshot(&mut self) -> Vec<Op> {
        self.index.clear();
        let mut snapshot = std::mem::take(&mut self.ops);
        snapshot.sort_by_key(|op| (op.priority, op.sequence));
        snapshot
    }

    /// Put a yielded snapshot op back into the live buffer.
    ///
    /// If a newer op with the same key was pushed while the snapshot was being
    /// worked, that op wins the payload and priority (coalescing is forward
    /// only) but adopts the snapshot op's earlier sequence so ordering
    /// stability is kept.
    pub(crate) fn requeue(&mut self, op: Op) {
        match self.index.get(&op.key).copied() {
            Some(at) => {
                let live = &mut self.ops[at];
                if op.sequence < live.sequence {
                    live.sequence = op.sequence;
                }
            }
            None => {
                self.index.insert(op.key.clone(), self.ops.len());
                self.ops.push(op);
            }
        }
    }

    /// Drain the buffer through `effect`, one op at a time in
    /// `(priority, sequence)` order.
    ///
    /// `should_yield` is consulted before each op; when it reports true the
    /// rest of the snapshot is requeued and the drain resolves to `false`.
    /// Returns `true` when the snapshot was exhausted.
    pub async fn drain<E, F>(
        cell: &RefCell<CommandBuffer>,
        mut effect: E,
        mut should_yield: impl FnMut() -> bool,
    ) -> bool
    where
        E: FnMut(Op) -> F,
        F: Future<Output = ()>,
    {
        let snapshot = cell.borrow_mut().take_snapshot();
        let mut ops = snapshot.into_iter();

        while let Some(op) = ops.next() {
            if should_yield() {
                let mut live = cell.borrow_mut();
                live.requeue(op);
                for rest in ops {
                    live.requeue(rest);
                }
                return false;
            }
            effect(op).await;
        }

        true
    }
}
