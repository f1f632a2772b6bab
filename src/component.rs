//! Component lifecycle: staged props, transactional diffs, effect dispatch,
//! and per-key cleanups.
//!
//! Every mounted component is an [`Rc<Component>`]. Components form a tree: a
//! parent exclusively owns its children (destroy propagates down) and children
//! keep a weak back-reference. All mutation goes through `Cell`/`RefCell` —
//! the whole runtime lives on one task.

use std::cell::{Cell, Ref, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value;
use smallvec::SmallVec;

use crate::behavior::accepts;
use crate::innerlude::*;
use crate::runtime::next_creation_id;
use crate::utils::merge;

/// A node in the component tree.
///
/// Components don't render. They stage prop patches, diff them into ops, and
/// let the scheduler drain those ops into their [`Driver`]'s effects.
pub struct Component {
    runtime: Rc<Runtime>,
    driver: Box<dyn Driver>,
    behaviors: Box<[Rc<dyn Behavior>]>,

    parent: Weak<Component>,
    children: RefCell<Vec<Rc<Component>>>,
    depth: u32,
    priority: i32,
    locality: Locality,
    created_at: u64,

    cmds: RefCell<CommandBuffer>,
    node: Cell<Option<NodeId>>,
    attached_under: Cell<Option<NodeId>>,

    props: RefCell<Props>,
    staged: RefCell<Option<Props>>,
    prev_props: RefCell<Props>,

    cleanups: RefCell<IndexMap<String, CleanupSet>>,
    lifetime_cleanups: RefCell<Vec<Cleanup>>,
    init_cleanup: RefCell<Option<Cleanup>>,

    initialized: Cell<bool>,
    needs_initial_diff: Cell<bool>,
    pre_ready_diff_ran: Cell<bool>,
    init_done: Cell<bool>,
    destroyed: Cell<bool>,

    diff_ticket: Cell<u64>,
}

/// The combined cleanup stored for one op key: every callable collected from
/// the op's effect chain, invoked in reverse collection order.
pub(crate) struct CleanupSet(SmallVec<[Cleanup; 2]>);

impl CleanupSet {
    pub(crate) async fn run(self, component: &Rc<Component>) {
        for cleanup in self.0.into_iter().rev() {
            if let Err(error) = cleanup.run().await {
                component.report(error, Phase::Cleanup, None);
            }
        }
    }
}

impl Component {
    pub(crate) fn new(
        driver: Box<dyn Driver>,
        props: Props,
        runtime: Rc<Runtime>,
        parent: Option<&Rc<Component>>,
    ) -> Rc<Self> {
        let progressive = driver.progressive();
        let behaviors = driver.behaviors().into_boxed_slice();
        let priority = progressive.priority;

        let component = Rc::new(Self {
            runtime,
            driver,
            behaviors,
            parent: parent.map(Rc::downgrade).unwrap_or_default(),
            children: RefCell::new(Vec::new()),
            depth: parent.map_or(0, |p| p.depth + 1),
            priority,
            locality: progressive.locality,
            created_at: next_creation_id(),
            cmds: RefCell::new(CommandBuffer::new()),
            node: Cell::new(None),
            attached_under: Cell::new(None),
            props: RefCell::new(Props::new()),
            staged: RefCell::new(Some(props)),
            prev_props: RefCell::new(Props::new()),
            cleanups: RefCell::new(IndexMap::new()),
            lifetime_cleanups: RefCell::new(Vec::new()),
            init_cleanup: RefCell::new(None),
            initialized: Cell::new(false),
            needs_initial_diff: Cell::new(true),
            pre_ready_diff_ran: Cell::new(false),
            init_done: Cell::new(false),
            destroyed: Cell::new(false),
            diff_ticket: Cell::new(0),
        });

        // the bootstrap op runs before any user op of this component
        component.cmds.borrow_mut().push(PushOp {
            kind: INIT.to_string(),
            key: INIT.to_string(),
            payload: Value::Null,
            priority: component.priority - 1,
            squash: None,
        });

        if let Some(parent) = parent {
            parent.children.borrow_mut().push(component.clone());
        }

        if component.runtime.is_ready() {
            component.mark_dirty();
        }

        component
    }

    /// Mount a child component beneath this one.
    pub fn mount<D: Driver>(self: &Rc<Self>, driver: D, props: Props) -> Rc<Component> {
        Component::new(Box::new(driver), props, self.runtime.clone(), Some(self))
    }

    /// Remove `child` from this component and destroy it recursively.
    pub async fn unmount(self: &Rc<Self>, child: &Rc<Component>) {
        self.children
            .borrow_mut()
            .retain(|c| !Rc::ptr_eq(c, child));
        child.destroy().await;
    }

    /// Shallow-merge `patch` onto the staged props and run a diff.
    ///
    /// While the runtime is not ready this runs the pre-ready diff instead:
    /// the driver's diff may enqueue ops, but behaviors are skipped, nothing
    /// commits, and the scheduler is not woken. Bumps the buffer generation.
    pub async fn update(self: &Rc<Self>, patch: Props) {
        if self.destroyed.get() {
            return;
        }

        {
            let mut staged = self.staged.borrow_mut();
            let base = match staged.take() {
                Some(accumulated) => accumulated,
                None => self.props.borrow().clone(),
            };
            *staged = Some(merge(base, patch));
        }
        self.cmds.borrow_mut().bump_generation();

        if !self.runtime.is_ready() {
            self.pre_ready_diff().await;
            return;
        }

        self.needs_initial_diff.set(false);
        if self.run_diff(Phase::Diff).await {
            self.mark_dirty();
        }
    }

    /// Enqueue an op.
    ///
    /// The effective priority is the component priority plus `opts.priority`;
    /// the coalescing key resolves as `coalesce_by(kind, payload)`, falling
    /// back to `opts.key`, falling back to the kind itself. Wakes the
    /// scheduler only once the runtime is ready.
    pub fn queue(self: &Rc<Self>, kind: impl Into<String>, payload: Payload, opts: QueueOpts) {
        if self.destroyed.get() {
            return;
        }

        let kind = kind.into();
        let QueueOpts {
            key,
            priority,
            coalesce_by,
            squash_with,
        } = opts;
        let key = match coalesce_by {
            Some(derive) => derive(&kind, &payload),
            None => key.unwrap_or_else(|| kind.clone()),
        };

        self.cmds.borrow_mut().push(PushOp {
            kind,
            key,
            payload,
            priority: self.priority + priority,
            squash: squash_with,
        });

        if self.runtime.is_ready() {
            self.mark_dirty();
        }
    }

    /// Destroy this component and its subtree.
    ///
    /// Idempotent. Pending ops are dropped; then, in order: children
    /// recursively, per-key cleanups, lifetime cleanups in reverse
    /// registration order, the init cleanup, and finally the host node is
    /// detached and released.
    pub fn destroy(self: &Rc<Self>) -> futures_util::future::LocalBoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            if this.destroyed.replace(true) {
                return;
            }
            this.cmds.borrow_mut().clear();

            let children: Vec<_> = std::mem::take(&mut *this.children.borrow_mut());
            for child in children {
                child.destroy().await;
            }

            let pending: Vec<CleanupSet> = {
                let mut cleanups = this.cleanups.borrow_mut();
                cleanups.drain(..).map(|(_, set)| set).collect()
            };
            for set in pending {
                set.run(&this).await;
            }

            let lifetime: Vec<Cleanup> =
                std::mem::take(&mut *this.lifetime_cleanups.borrow_mut());
            for cleanup in lifetime.into_iter().rev() {
                if let Err(error) = cleanup.run().await {
                    this.report(error, Phase::Cleanup, None);
                }
            }

            let legacy = this.init_cleanup.borrow_mut().take();
            if let Some(cleanup) = legacy {
                if let Err(error) = cleanup.run().await {
                    this.report(error, Phase::Cleanup, None);
                }
            }

            if let Some(host) = this.runtime.host() {
                if let Some(node) = this.node.take() {
                    if let Some(parent) = this.attached_under.take() {
                        host.detach_node(parent, node);
                    }
                    host.destroy_node(node);
                }
            }
        })
    }

    // ----- accessors -----

    /// The committed props.
    pub fn props(&self) -> Ref<'_, Props> {
        self.props.borrow()
    }

    /// The props committed before the current ones.
    pub fn prev_props(&self) -> Ref<'_, Props> {
        self.prev_props.borrow()
    }

    /// Staged-but-uncommitted props, if a diff has deferred.
    pub fn staged_props(&self) -> Option<Props> {
        self.staged.borrow().clone()
    }

    pub fn parent(&self) -> Option<Rc<Component>> {
        self.parent.upgrade()
    }

    pub fn children(&self) -> Vec<Rc<Component>> {
        self.children.borrow().clone()
    }

    /// Distance from the root; the root is 0.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The component priority from `progressive.priority`. Lower runs
    /// earlier.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn locality(&self) -> Locality {
        self.locality
    }

    /// Construction-order sequence number, unique per process.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// The host node handle, once attached.
    pub fn node(&self) -> Option<NodeId> {
        self.node.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Whether the bootstrap op has run.
    pub fn is_init_done(&self) -> bool {
        self.init_done.get()
    }

    /// Number of ops waiting in the buffer.
    pub fn pending_ops(&self) -> usize {
        self.cmds.borrow().len()
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    // ----- internals -----

    pub(crate) fn cmds(&self) -> &RefCell<CommandBuffer> {
        &self.cmds
    }

    pub(crate) fn mark_dirty(self: &Rc<Self>) {
        if !self.destroyed.get() {
            self.runtime.scheduler().mark_dirty(self);
        }
    }

    pub(crate) fn is_descendant_of(&self, root: &Rc<Component>) -> bool {
        if self.created_at == root.created_at {
            return true;
        }
        let mut cursor = self.parent.upgrade();
        while let Some(ancestor) = cursor {
            if Rc::ptr_eq(&ancestor, root) {
                return true;
            }
            cursor = ancestor.parent.upgrade();
        }
        false
    }

    pub(crate) fn report(self: &Rc<Self>, error: anyhow::Error, phase: Phase, op: Option<Op>) {
        self.runtime.report(
            error,
            ErrorCtx {
                component: Some(self.clone()),
                op,
                phase,
            },
        );
    }

    pub(crate) fn handle_error(&self, error: &anyhow::Error, cx: &ErrorCtx) -> bool {
        self.driver.on_error(error, cx)
    }

    /// Create and attach the host node. Idempotent; attach failures are
    /// reported and leave the component skippable for this frame.
    pub(crate) fn attach(self: &Rc<Self>) -> bool {
        let Some(host) = self.runtime.host() else {
            return false;
        };

        if self.node.get().is_none() {
            self.node.set(Some(host.create_node(self)));
        }

        if self.attached_under.get().is_none() {
            let Some(node) = self.node.get() else {
                return false;
            };
            let attach_parent = match self.parent.upgrade() {
                Some(parent) => parent
                    .driver
                    .child_parent(self)
                    .or_else(|| parent.node.get())
                    .unwrap_or_else(|| host.root_node()),
                None => host.root_node(),
            };
            if let Err(error) = host.attach_node(attach_parent, node) {
                self.report(error, Phase::Attach, None);
                return false;
            }
            self.attached_under.set(Some(attach_parent));
        }

        true
    }

    /// The driver's diff only, run while the runtime is not ready. Ops land
    /// in the buffer, nothing commits, and behaviors stay silent so their
    /// side-effect handlers don't fire prematurely.
    async fn pre_ready_diff(self: &Rc<Self>) {
        let prev = self.props.borrow().clone();
        let next = match self.staged.borrow().clone() {
            Some(next) => next,
            None => return,
        };

        let cx = Ctx::new(self.clone(), Phase::Diff);
        if let Err(error) = self.driver.diff(&prev, &next, &cx).await {
            self.report(error, Phase::Diff, None);
        }

        self.pre_ready_diff_ran.set(true);
    }

    /// Run behaviors' diffs then the driver's, and commit the staged props
    /// unless something deferred, errored, or went stale. Returns whether a
    /// commit happened.
    ///
    /// Each invocation takes a fresh ticket; if the component's ticket has
    /// advanced by resolution time, a later diff owns the commit and this one
    /// resolves as a defer.
    pub(crate) async fn run_diff(self: &Rc<Self>, phase: Phase) -> bool {
        let next = match self.staged.borrow().clone() {
            Some(next) => next,
            None => return false,
        };
        let prev = self.props.borrow().clone();

        let ticket = self.diff_ticket.get() + 1;
        self.diff_ticket.set(ticket);

        let cx = Ctx::new(self.clone(), phase);
        let mut defer = false;

        for behavior in self.behaviors.iter() {
            match behavior.diff(&prev, &next, &cx).await {
                Ok(DiffResult::Commit) => {}
                Ok(DiffResult::Defer) => defer = true,
                Err(error) => {
                    defer = true;
                    self.report(error, phase, None);
                }
            }
        }

        match self.driver.diff(&prev, &next, &cx).await {
            Ok(DiffResult::Commit) => {}
            Ok(DiffResult::Defer) => defer = true,
            Err(error) => {
                defer = true;
                self.report(error, phase, None);
            }
        }

        if cx.deferred() {
            defer = true;
        }
        if self.diff_ticket.get() != ticket {
            defer = true;
        }
        if defer || self.destroyed.get() {
            return false;
        }

        self.commit_staged();
        true
    }

    /// Swap staged props in as the committed props. `prev_props` becomes the
    /// value committed before this swap.
    fn commit_staged(&self) {
        let next = self.staged.borrow_mut().take();
        if let Some(next) = next {
            let committed = std::mem::replace(&mut *self.props.borrow_mut(), next);
            *self.prev_props.borrow_mut() = committed;
        }
    }

    /// The construction-time diff, run at the component's first scheduler
    /// touch, before its first drain.
    ///
    /// `mount` cannot await, so the diff the spec's constructor triggers via
    /// `update(props)` runs here instead - ops it enqueues are in the buffer
    /// before the first snapshot and execute in the same frame as the
    /// bootstrap op. Skipped once an `update` has already diffed, and on the
    /// pre-ready path, where the first post-ready flush commits without
    /// re-diffing.
    pub(crate) async fn initial_diff(self: &Rc<Self>) {
        if self.destroyed.get()
            || self.initialized.get()
            || !self.needs_initial_diff.get()
            || self.pre_ready_diff_ran.get()
        {
            return;
        }

        self.needs_initial_diff.set(false);
        if self.staged.borrow().is_some() {
            self.run_diff(Phase::InitialDiff).await;
        }
    }

    /// First-flush commit, run by the scheduler after the first drain.
    ///
    /// When a pre-ready diff already ran, the staged props commit without
    /// re-diffing; when props are still staged (a deferred or never-run
    /// construction diff), this runs the diff once more and commits unless
    /// it defers.
    pub(crate) async fn initial_commit(self: &Rc<Self>) {
        if self.initialized.get() || self.destroyed.get() {
            return;
        }

        if self.pre_ready_diff_ran.get() {
            self.commit_staged();
        } else if self.staged.borrow().is_some() {
            self.run_diff(Phase::InitialDiff).await;
        }

        self.initialized.set(true);
        self.needs_initial_diff.set(false);
    }

    /// Apply one drained op: the bootstrap op runs init, everything else runs
    /// the per-key cleanup, the matching behaviors, and the driver's effect.
    pub(crate) async fn apply(self: Rc<Self>, op: Op) {
        if self.destroyed.get() {
            return;
        }

        if op.kind == INIT {
            self.run_init().await;
            return;
        }

        // the previous cleanup for this key finishes, fully awaited, before
        // the new effect chain starts
        let previous = self.cleanups.borrow_mut().shift_remove(&op.key);
        if let Some(set) = previous {
            set.run(&self).await;
        }
        if self.destroyed.get() {
            return;
        }

        let cx = Ctx::new(self.clone(), Phase::Effect).with_op(op.clone());
        let mut collected: SmallVec<[Cleanup; 2]> = SmallVec::new();

        for behavior in self.behaviors.iter() {
            if !accepts(behavior.as_ref(), &op) {
                continue;
            }
            let returned = match behavior.effect(&op, &cx).await {
                Ok(returned) => returned,
                Err(error) => {
                    self.report(error, Phase::Effect, Some(op.clone()));
                    None
                }
            };
            collected.extend(cx.take_cleanups());
            collected.extend(returned);
        }

        let returned = match self.driver.effect(&op, &cx).await {
            Ok(returned) => returned,
            Err(error) => {
                self.report(error, Phase::Effect, Some(op.clone()));
                None
            }
        };
        collected.extend(cx.take_cleanups());
        collected.extend(returned);

        if !collected.is_empty() {
            self.cleanups
                .borrow_mut()
                .insert(op.key.clone(), CleanupSet(collected));
        }
    }

    /// Behaviors' init in declared order, then the driver's. Behavior
    /// cleanups join the lifetime list; the driver's return is kept aside and
    /// runs last on destroy.
    async fn run_init(self: &Rc<Self>) {
        let cx = Ctx::new(self.clone(), Phase::Init);

        for behavior in self.behaviors.iter() {
            let returned = match behavior.init(&cx).await {
                Ok(returned) => returned,
                Err(error) => {
                    self.report(error, Phase::Init, None);
                    None
                }
            };
            let mut lifetime = self.lifetime_cleanups.borrow_mut();
            lifetime.extend(cx.take_cleanups());
            lifetime.extend(returned);
        }

        let returned = match self.driver.init(&cx).await {
            Ok(returned) => returned,
            Err(error) => {
                self.report(error, Phase::Init, None);
                None
            }
        };
        self.lifetime_cleanups
            .borrow_mut()
            .extend(cx.take_cleanups());
        *self.init_cleanup.borrow_mut() = returned;

        self.init_done.set(true);
    }
}

/// Handed to every lifecycle hook. Carries the component, collects cleanups
/// registered mid-hook, and records defer requests.
pub struct Ctx {
    component: Rc<Component>,
    phase: Phase,
    op: Option<Op>,
    state: RefCell<CtxState>,
}

#[derive(Default)]
struct CtxState {
    cleanups: SmallVec<[Cleanup; 2]>,
    deferred: bool,
}

impl Ctx {
    pub(crate) fn new(component: Rc<Component>, phase: Phase) -> Self {
        Self {
            component,
            phase,
            op: None,
            state: RefCell::new(CtxState::default()),
        }
    }

    pub(crate) fn with_op(mut self, op: Op) -> Self {
        self.op = Some(op);
        self
    }

    pub fn component(&self) -> &Rc<Component> {
        &self.component
    }

    /// Register a cleanup from inside a hook: a lifetime cleanup during
    /// `init`, part of the op key's combined cleanup during `effect`.
    pub fn add_cleanup(&self, cleanup: Cleanup) {
        self.state.borrow_mut().cleanups.push(cleanup);
    }

    /// Request that the current diff not commit.
    pub fn defer(&self) {
        self.state.borrow_mut().deferred = true;
    }

    /// Route an error through the runtime, tagged with this hook's phase.
    pub fn report(&self, error: anyhow::Error) {
        self.component
            .report(error, self.phase, self.op.clone());
    }

    pub(crate) fn take_cleanups(&self) -> SmallVec<[Cleanup; 2]> {
        std::mem::take(&mut self.state.borrow_mut().cleanups)
    }

    pub(crate) fn deferred(&self) -> bool {
        self.state.borrow().deferred
    }
}
