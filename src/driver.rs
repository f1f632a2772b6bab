//! The component's virtual interface.
//!
//! A [`Driver`] is what a concrete component implements: configuration,
//! behaviors, and the `init`/`diff`/`effect` lifecycle hooks. All hooks take
//! `&self` — driver state lives behind the driver's own `Cell`/`RefCell`, the
//! same interior-mutability discipline the rest of the core follows.

use std::future::Future;
use std::rc::Rc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use crate::innerlude::*;

/// Outcome of a diff: commit the staged props, or hold them for a later pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffResult {
    #[default]
    Commit,
    Defer,
}

/// Scheduler policy for a component's subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locality {
    /// Wave rendering: the frame walks the dirty set depth by depth, and
    /// components at one depth complete as a group.
    #[default]
    Depth,
    /// Per-item completion: while this component is being processed,
    /// descendants dirtied along the way are drained within the same frame
    /// before the scheduler moves on.
    Subtree,
}

/// Static-per-class configuration, read once at construction.
#[derive(Debug, Clone, Copy)]
pub struct Progressive {
    /// Frame budget in milliseconds. Only meaningful on the root class;
    /// `None`, non-finite, or ≤ 0 means unbudgeted frames.
    pub budget: Option<f64>,
    /// Default component priority. Lower runs earlier; 0 is highest.
    pub priority: i32,
    pub locality: Locality,
}

impl Default for Progressive {
    fn default() -> Self {
        Self {
            budget: None,
            priority: 0,
            locality: Locality::Depth,
        }
    }
}

/// A callable returned from an effect (per key) or init (lifetime), run
/// before replacement or on destroy. May be sync or async; failures are
/// reported under the `cleanup` phase.
pub enum Cleanup {
    Sync(Box<dyn FnOnce() -> Result<()>>),
    Async(Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<()>>>),
}

impl Cleanup {
    pub fn new(f: impl FnOnce() -> Result<()> + 'static) -> Self {
        Cleanup::Sync(Box::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        Cleanup::Async(Box::new(move || f().boxed_local()))
    }

    pub(crate) async fn run(self) -> Result<()> {
        match self {
            Cleanup::Sync(f) => f(),
            Cleanup::Async(f) => f().await,
        }
    }
}

/// The lifecycle hooks of a component.
///
/// Every method has a default, so a driver implements only what it needs.
/// Hooks run on the scheduler task; anything they await suspends the frame at
/// that point.
#[async_trait(?Send)]
pub trait Driver: 'static {
    /// Static configuration for components of this driver.
    fn progressive(&self) -> Progressive {
        Progressive::default()
    }

    /// The behavior chain for this driver, base first. Compose a base
    /// driver's list with [`merged`](crate::behavior::merged).
    fn behaviors(&self) -> Vec<Rc<dyn Behavior>> {
        Vec::new()
    }

    /// Runs once, from the bootstrap op, after behaviors' `init`. A returned
    /// cleanup runs last on destroy.
    async fn init(&self, _cx: &Ctx) -> Result<Option<Cleanup>> {
        Ok(None)
    }

    /// Computes the ops needed to move from `prev` to `next` props. Return
    /// [`DiffResult::Defer`] (or call [`Ctx::defer`]) to hold the staged
    /// props for a later pass.
    async fn diff(&self, _prev: &Props, _next: &Props, _cx: &Ctx) -> Result<DiffResult> {
        Ok(DiffResult::Commit)
    }

    /// Applies one drained op. A returned cleanup is stored under the op's
    /// key and runs before the next effect for that key.
    async fn effect(&self, _op: &Op, _cx: &Ctx) -> Result<Option<Cleanup>> {
        Ok(None)
    }

    /// Override to attach a particular child somewhere other than this
    /// component's own node (slotting).
    fn child_parent(&self, _child: &Component) -> Option<NodeId> {
        None
    }

    /// Instance error handler. Return `true` when the error was handled.
    fn on_error(&self, _error: &anyhow::Error, _cx: &ErrorCtx) -> bool {
        false
    }
}
