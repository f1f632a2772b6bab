/*
The cooperative, frame-budgeted scheduler.

Components never run their own ops. They mark themselves dirty; on the next
animation frame the scheduler snapshots the dirty set, orders it, and drains
each component's command buffer within the frame budget.

# Ordering

A flush batch is sorted by (depth, component priority, creation order):
parents before children, urgent components before background ones, and a
stable tie-break so two flushes of the same tree always agree.

# Budget

The budget comes from the root class's `progressive.budget` (milliseconds).
`should_yield` compares wall-clock time against it and latches: once a frame
has decided to yield, it stays decided for the rest of the frame, so every
yield check downstream sees the same answer.

# Locality

Two modes control how much of the tree must look finished before the frame
lets go:

- "depth" (the default) produces wave rendering. Components at one depth
  complete as a group - the frame may pause only when moving to a new depth,
  never between two siblings, so a row of cards never renders half-styled.
- "subtree" produces per-item completion. While a subtree root is being
  processed, descendants dirtied along the way are captured into a local
  queue and drained within the same frame (same sort order, same budget)
  before the next batch element runs. If the budget runs out mid-pass, the
  pass stays pinned and resumes at the start of the next frame, so the
  per-item order holds even under a starved budget. Useful for grids where
  each item should pop in whole.

After a batch (finished or yielded), every host touched this frame is asked
to render exactly once.
*/

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use futures_channel::mpsc::UnboundedSender;
use futures_util::lock::Mutex;
use indexmap::IndexMap;

use crate::innerlude::*;

/// Messages from the scheduler to whoever drives the frame loop.
pub enum SchedulerMsg {
    /// Work is pending; run a flush on the next animation frame.
    Frame,
}

/// Wall-clock frame budget with a latched yield decision.
struct FrameClock {
    start: Instant,
    budget: Option<Duration>,
    tripped: Cell<bool>,
}

impl FrameClock {
    fn new(budget: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            budget,
            tripped: Cell::new(false),
        }
    }

    fn should_yield(&self) -> bool {
        if self.tripped.get() {
            return true;
        }
        match self.budget {
            Some(budget) if self.start.elapsed() >= budget => {
                self.tripped.set(true);
                true
            }
            _ => false,
        }
    }
}

/// Convert a `progressive.budget` millisecond value into a usable duration.
/// Non-finite or non-positive budgets mean unbudgeted frames.
pub(crate) fn budget_from_ms(ms: Option<f64>) -> Option<Duration> {
    ms.filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
}

/// The frame dispatcher.
pub struct Scheduler {
    tx: UnboundedSender<SchedulerMsg>,
    budget: Option<Duration>,

    dirty: RefCell<IndexMap<u64, Rc<Component>>>,
    scheduled: Cell<bool>,
    flushing: Cell<bool>,

    locality_root: RefCell<Option<Rc<Component>>>,
    local_queue: RefCell<Vec<Rc<Component>>>,

    // two flushes never run concurrently; a second call waits for the first
    gate: Mutex<()>,
}

impl Scheduler {
    pub(crate) fn new(tx: UnboundedSender<SchedulerMsg>, budget: Option<Duration>) -> Rc<Self> {
        Rc::new(Self {
            tx,
            budget,
            dirty: RefCell::new(IndexMap::new()),
            scheduled: Cell::new(false),
            flushing: Cell::new(false),
            locality_root: RefCell::new(None),
            local_queue: RefCell::new(Vec::new()),
            gate: Mutex::new(()),
        })
    }

    /// Whether a frame is scheduled, components are waiting, or a yielded
    /// subtree pass is waiting to resume.
    pub fn has_work(&self) -> bool {
        self.scheduled.get()
            || !self.dirty.borrow().is_empty()
            || self.locality_root.borrow().is_some()
    }

    /// Add a component to the dirty set and request a frame if none is
    /// pending.
    ///
    /// While a subtree-locality root is being flushed, its descendants route
    /// into the local queue instead and run within the current frame; the
    /// in-flight batch itself is never mutated.
    pub fn mark_dirty(&self, component: &Rc<Component>) {
        if component.is_destroyed() {
            return;
        }

        if self.flushing.get() {
            let root = self.locality_root.borrow().clone();
            if let Some(root) = root {
                if component.is_descendant_of(&root) {
                    let mut local = self.local_queue.borrow_mut();
                    if !local
                        .iter()
                        .any(|c| c.created_at() == component.created_at())
                    {
                        local.push(component.clone());
                    }
                    return;
                }
            }
        }

        self.dirty
            .borrow_mut()
            .insert(component.created_at(), component.clone());
        self.schedule();
    }

    fn schedule(&self) {
        if !self.scheduled.replace(true) {
            let _ = self.tx.unbounded_send(SchedulerMsg::Frame);
        }
    }

    /// Put a component back into the next frame's dirty set, bypassing
    /// locality routing. Used for work a yield pushed out of this frame.
    fn requeue(&self, component: &Rc<Component>) {
        if component.is_destroyed() {
            return;
        }
        self.dirty
            .borrow_mut()
            .insert(component.created_at(), component.clone());
        self.schedule();
    }

    /// One pass over the currently dirty components.
    ///
    /// A subtree pass that ran out of budget stays pinned across frames: the
    /// next flush resumes it before touching the dirty set, so an item's
    /// descendants always land immediately after it no matter how small the
    /// budget is.
    pub async fn flush(&self, runtime: &Rc<Runtime>) {
        let _guard = self.gate.lock().await;

        self.scheduled.set(false);
        let resuming = self.locality_root.borrow().is_some();
        if !resuming && self.dirty.borrow().is_empty() {
            return;
        }

        // readiness gate: nothing runs before the host exists
        if !runtime.is_ready() {
            self.schedule();
            return;
        }

        let clock = FrameClock::new(self.budget);
        self.flushing.set(true);
        let mut touched = false;

        if resuming {
            touched = true;
            self.run_subtree_pass(&clock, false).await;
        }

        if self.locality_root.borrow().is_none() {
            let mut batch: Vec<Rc<Component>> = {
                let mut dirty = self.dirty.borrow_mut();
                dirty.drain(..).map(|(_, component)| component).collect()
            };
            batch.sort_by_key(|c| (c.depth(), c.priority(), c.created_at()));

            let mut last_depth: Option<u32> = None;
            let mut stopped_at = None;

            for (at, component) in batch.iter().enumerate() {
                if component.is_destroyed() {
                    continue;
                }
                // yield only when moving to a new depth, and never before
                // the first component so every frame makes progress
                if clock.should_yield()
                    && last_depth.is_some()
                    && last_depth != Some(component.depth())
                {
                    stopped_at = Some(at);
                    break;
                }
                last_depth = Some(component.depth());
                touched = true;
                if !self.process(component, &clock).await {
                    // a subtree pass yielded; its remainder resumes next frame
                    stopped_at = Some(at + 1);
                    break;
                }
            }

            if let Some(at) = stopped_at {
                tracing::trace!(remaining = batch.len() - at, "frame budget exhausted");
                for component in &batch[at..] {
                    self.requeue(component);
                }
            }
        } else if self.has_work() {
            // still mid-subtree after the resume; leave the dirty set alone
            self.schedule();
        }

        self.flushing.set(false);

        if touched {
            if let Some(host) = runtime.host() {
                host.request_render();
            }
        }
    }

    /// Process one batch element, including its subtree pass when it opts
    /// into subtree locality. Returns `false` when a subtree pass yielded and
    /// stays pinned for the next frame.
    async fn process(&self, component: &Rc<Component>, clock: &FrameClock) -> bool {
        let subtree = component.locality() == Locality::Subtree;
        if subtree {
            *self.locality_root.borrow_mut() = Some(component.clone());
        }

        self.process_one(component, clock, subtree).await;

        if subtree {
            self.run_subtree_pass(clock, true).await
        } else {
            true
        }
    }

    /// Drain the local queue of the pinned subtree root, in batch order,
    /// until it is empty or the budget runs out. Returns whether the pass
    /// completed (and unpinned itself).
    ///
    /// `progressed` says whether this frame already ran something for the
    /// pass; a resumed frame starts false so a starved budget still advances
    /// one descendant per frame.
    async fn run_subtree_pass(&self, clock: &FrameClock, mut progressed: bool) -> bool {
        loop {
            if progressed && clock.should_yield() {
                self.schedule();
                return false;
            }
            let next = {
                let mut local = self.local_queue.borrow_mut();
                if local.is_empty() {
                    None
                } else {
                    local.sort_by_key(|c| (c.depth(), c.priority(), c.created_at()));
                    Some(local.remove(0))
                }
            };
            match next {
                Some(descendant) if !descendant.is_destroyed() => {
                    self.process_one(&descendant, clock, true).await;
                    progressed = true;
                }
                Some(_) => continue,
                None => {
                    *self.locality_root.borrow_mut() = None;
                    return true;
                }
            }
        }
    }

    /// Attach, run the construction diff if it is still owed, drain, and (on
    /// the first flush) run the initial commit for one component.
    async fn process_one(&self, component: &Rc<Component>, clock: &FrameClock, in_subtree: bool) {
        if !component.attach() {
            // reported under the attach phase; a later dirty-mark retries
            return;
        }

        // before the drain, so ops the diff enqueues join this frame's
        // snapshot
        component.initial_diff().await;

        if !component.cmds().borrow().is_empty() {
            let target = component.clone();
            let fully_drained = CommandBuffer::drain(
                component.cmds(),
                move |op| {
                    let target = target.clone();
                    async move { target.apply(op).await }
                },
                // in depth mode a component group runs to completion; only a
                // subtree pass may cut a drain short
                || in_subtree && clock.should_yield(),
            )
            .await;
            if !fully_drained {
                // the remainder belongs to the pinned pass, ahead of any
                // not-yet-drained descendant
                let mut local = self.local_queue.borrow_mut();
                if !local
                    .iter()
                    .any(|c| c.created_at() == component.created_at())
                {
                    local.push(component.clone());
                }
            }
        }

        if !component.is_initialized() {
            component.initial_commit().await;
        }
    }

    /// The idle barrier: flush until neither a frame is scheduled nor any
    /// component is dirty.
    ///
    /// Awaits any in-flight flush before each pass. Fails after `max`
    /// iterations to surface components that re-dirty themselves forever.
    pub async fn when_idle(&self, runtime: &Rc<Runtime>, max: usize) -> Result<(), IdleError> {
        for _ in 0..max {
            self.flush(runtime).await;
            if !self.has_work() {
                return Ok(());
            }
        }
        Err(IdleError::StuckAfter(max))
    }
}
