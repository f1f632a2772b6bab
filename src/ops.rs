//! The unit of work that flows from components to the host.
//!
//! Components never touch the host directly. They enqueue [`Op`]s into their
//! [`CommandBuffer`](crate::CommandBuffer); the scheduler coalesces, orders and
//! budgets them across animation frames before dispatching each one through
//! the component's behaviors and its own `effect`.

use std::rc::Rc;

use serde_json::Value;

/// Op payloads are opaque json values. The core shuttles them around but never
/// inspects them.
pub type Payload = Value;

/// Component props. Patches passed to `update` are shallow-merged onto these.
pub type Props = serde_json::Map<String, Value>;

/// Folds the payload of an existing op with the payload of a new push for the
/// same coalescing key.
///
/// Arguments are `(previous_payload, new_payload, previous_op, new_op)`; the
/// returned value replaces the stored payload.
pub type SquashFn = Rc<dyn Fn(&Payload, &Payload, &Op, &Op) -> Payload>;

/// Derives a coalescing key from an op's type and payload.
pub type CoalesceFn = Rc<dyn Fn(&str, &Payload) -> String>;

/// The internal bootstrap op enqueued at component construction. It runs
/// before any user op of the same component (its effective priority is the
/// component priority minus one) and drives behavior and driver `init`.
pub const INIT: &str = "@tempo/init";

/// Named priority levels for [`QueueOpts::priority`].
///
/// Lower runs earlier. These are offsets relative to the owning component's
/// priority, so an op queued with `HIGHEST` on a low-priority component still
/// runs after the ops of a higher-priority sibling.
pub mod priority {
    pub const HIGHEST: i32 = 0;
    pub const HIGH: i32 = 10;
    pub const MEDIUM: i32 = 50;
    pub const LOW: i32 = 80;
    pub const LOWEST: i32 = 100;
}

/// A typed, keyed, prioritized unit of work.
///
/// Within one buffer, keys are unique: pushing an op whose key is already
/// present replaces the stored payload (optionally through a squash function)
/// while preserving the original `sequence`, so a coalesced op keeps its place
/// in line among ops of equal priority.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    /// Semantic tag, e.g. `"SET_PROPS"` or `"SET_TEXTURE"`.
    pub kind: String,

    /// Coalescing identity. Defaults to `kind` when not given explicitly.
    pub key: String,

    /// User data; opaque to the core.
    pub payload: Payload,

    /// Effective sort key. Lower executes earlier.
    pub priority: i32,

    /// Monotonic insertion counter; the stable tie-breaker among ops of equal
    /// priority. Preserved across coalescing.
    pub sequence: u64,

    /// Buffer generation at push time. Informational.
    pub generation: u64,
}

/// A raw push into a [`CommandBuffer`](crate::CommandBuffer).
pub struct PushOp {
    pub kind: String,
    pub key: String,
    pub payload: Payload,
    pub priority: i32,
    pub squash: Option<SquashFn>,
}

/// Options for [`Component::queue`](crate::Component::queue).
///
/// ```ignore
/// component.queue("move", payload, QueueOpts::default().key("pos").priority(priority::HIGH));
/// ```
#[derive(Default, Clone)]
pub struct QueueOpts {
    pub key: Option<String>,
    pub priority: i32,
    pub coalesce_by: Option<CoalesceFn>,
    pub squash_with: Option<SquashFn>,
}

impl QueueOpts {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn coalesce_by(mut self, f: impl Fn(&str, &Payload) -> String + 'static) -> Self {
        self.coalesce_by = Some(Rc::new(f));
        self
    }

    pub fn squash_with(mut self, f: impl Fn(&Payload, &Payload, &Op, &Op) -> Payload + 'static) -> Self {
        self.squash_with = Some(Rc::new(f));
        self
    }
}
