//! Error taxonomy for handler failures.
//!
//! User handler errors never propagate into the scheduler task. They are
//! captured where they occur, tagged with the [`Phase`] they came from, and
//! routed through [`Runtime::report`](crate::Runtime::report).

use std::fmt;
use std::rc::Rc;

use crate::innerlude::*;

/// The lifecycle phase an error was captured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The host future rejected.
    HostInit,
    /// `attach_node` failed; the component is skipped for the frame and a
    /// later dirty-mark retries.
    Attach,
    /// A user or behavior `init` failed.
    Init,
    /// A user or behavior `diff` failed; the diff is forced to defer.
    Diff,
    /// A failure during the initial commit.
    InitialDiff,
    /// A user or behavior `effect` failed; remaining handlers in the chain
    /// still run.
    Effect,
    /// A per-key or lifetime cleanup failed; remaining cleanups still run.
    Cleanup,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::HostInit => "host-init",
            Phase::Attach => "attach",
            Phase::Init => "init",
            Phase::Diff => "diff",
            Phase::InitialDiff => "initial-diff",
            Phase::Effect => "effect",
            Phase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to error handlers alongside the error itself.
pub struct ErrorCtx {
    /// The component the error belongs to, when one is known. Absent for
    /// host-init failures.
    pub component: Option<Rc<Component>>,
    /// The op that was being applied, for effect-phase errors.
    pub op: Option<Op>,
    pub phase: Phase,
}

impl fmt::Debug for ErrorCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCtx")
            .field("phase", &self.phase)
            .field("op", &self.op.as_ref().map(|op| op.kind.as_str()))
            .field(
                "component",
                &self.component.as_ref().map(|c| c.created_at()),
            )
            .finish()
    }
}

/// Failure modes of the idle barrier.
#[derive(Debug, thiserror::Error)]
pub enum IdleError {
    /// The scheduler still had work after the bounded number of flushes.
    /// Almost always a component that re-dirties itself on every frame.
    #[error("scheduler failed to go idle within {0} flushes")]
    StuckAfter(usize),

    /// Host initialization failed; the runtime will never become ready.
    #[error("host initialization failed; the runtime will never become ready")]
    HostUnavailable,
}
