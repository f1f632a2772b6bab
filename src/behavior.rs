//! Composable lifecycle traits.
//!
//! A behavior contributes `init`/`diff`/`effect` hooks to every component of
//! a driver that declares it. Behaviors run before the driver's own hook, in
//! the order the chain declares them (base first), and may be shared between
//! drivers as `Rc<dyn Behavior>`.

use std::rc::Rc;

use anyhow::Result;
use async_trait::async_trait;

use crate::innerlude::*;

/// A trait-like record of optional lifecycle hooks.
///
/// `effect` participation can be narrowed with [`types`](Behavior::types)
/// (a whitelist of op kinds) and [`matches`](Behavior::matches) (an arbitrary
/// predicate); both must pass for the hook to run.
#[async_trait(?Send)]
pub trait Behavior: 'static {
    /// Used in traces and error messages.
    fn name(&self) -> &str {
        "behavior"
    }

    /// Op kinds this behavior's `effect` applies to. `None` means all.
    fn types(&self) -> Option<&[&str]> {
        None
    }

    /// Arbitrary per-op filter, consulted after `types`.
    fn matches(&self, _op: &Op) -> bool {
        true
    }

    /// Lifetime hook. A returned cleanup joins the component's lifetime
    /// cleanups, which run in reverse registration order on destroy.
    async fn init(&self, _cx: &Ctx) -> Result<Option<Cleanup>> {
        Ok(None)
    }

    /// Contributes to the component's diff; may force a defer by returning
    /// [`DiffResult::Defer`] or calling [`Ctx::defer`].
    async fn diff(&self, _prev: &Props, _next: &Props, _cx: &Ctx) -> Result<DiffResult> {
        Ok(DiffResult::Commit)
    }

    /// Per-op hook. A returned cleanup joins the op key's combined cleanup.
    async fn effect(&self, _op: &Op, _cx: &Ctx) -> Result<Option<Cleanup>> {
        Ok(None)
    }
}

/// Concatenate a base chain with a derived one, preserving declared order.
///
/// The merge must be deterministic: base hooks run before derived hooks, and
/// within one chain the declared order is kept.
pub fn merged(
    base: Vec<Rc<dyn Behavior>>,
    derived: impl IntoIterator<Item = Rc<dyn Behavior>>,
) -> Vec<Rc<dyn Behavior>> {
    let mut chain = base;
    chain.extend(derived);
    chain
}

/// Whether a behavior's `effect` applies to `op`.
pub(crate) fn accepts(behavior: &dyn Behavior, op: &Op) -> bool {
    behavior
        .types()
        .map_or(true, |kinds| kinds.contains(&op.kind.as_str()))
        && behavior.matches(op)
}
