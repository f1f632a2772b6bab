//! The Tempo facade.
//!
//! [`Tempo`] wires a [`Runtime`] and [`Scheduler`] together, mounts the root
//! component, drives host creation, and exposes the idle flush used by tests
//! and tools.

use std::future::Future;
use std::rc::Rc;

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::future::LocalBoxFuture;
use futures_util::{FutureExt, StreamExt};

use crate::innerlude::*;
use crate::scheduler::budget_from_ms;

/// Upper bound for [`Tempo::flush_until_idle`] passes before it gives up.
pub const DEFAULT_IDLE_MAX: usize = 64;

/// An orchestration runtime bound to one root component and one host.
///
/// ## Guide
///
/// Mount a root driver with a host source, then flush:
///
/// ```rust, ignore
/// let mut app = Tempo::mount(App::new(), props, host::immediate(NullHost::new()));
/// app.flush_until_idle().await?;
/// ```
///
/// The host source is any future resolving to an `Rc<dyn Host>`; `mount`
/// returns immediately and the facade drives that future from `ready()` (or
/// the first `flush_until_idle`). Ops queued before the host resolves are
/// buffered and run in the first flush after readiness.
///
/// ## Building an event loop around Tempo
///
/// A real embedder threads flushes between paints:
///
/// ```rust, ignore
/// let mut app = Tempo::mount(App::new(), props, create_host(window));
/// app.ready().await;
///
/// loop {
///     app.wait_for_frame().await;   // fires when components dirty themselves
///     next_animation_frame().await;
///     app.flush().await;            // drains within the frame budget
/// }
/// ```
pub struct Tempo {
    runtime: Rc<Runtime>,
    root: Rc<Component>,
    rx: UnboundedReceiver<SchedulerMsg>,
    host_source: Option<LocalBoxFuture<'static, anyhow::Result<Rc<dyn Host>>>>,
    idle_max: usize,
}

impl Tempo {
    /// Construct the runtime and scheduler (with the root class's frame
    /// budget), synchronously construct the root component, and return.
    ///
    /// The host future is not polled here; it resolves during `ready()`. On
    /// resolution the host is installed, the runtime becomes ready, and the
    /// root is marked dirty.
    pub fn mount<D: Driver>(
        driver: D,
        props: Props,
        host: impl Future<Output = anyhow::Result<Rc<dyn Host>>> + 'static,
    ) -> Self {
        let (tx, rx) = futures_channel::mpsc::unbounded();

        let progressive = driver.progressive();
        let scheduler = Scheduler::new(tx, budget_from_ms(progressive.budget));
        let runtime = Runtime::new(scheduler);

        let root = Component::new(Box::new(driver), props, runtime.clone(), None);
        runtime.set_app(&root);

        Self {
            runtime,
            root,
            rx,
            host_source: Some(host.boxed_local()),
            idle_max: DEFAULT_IDLE_MAX,
        }
    }

    /// Install the app-level error hook (the preferred handler in the
    /// resolution chain).
    pub fn on_error(self, hook: impl Fn(&anyhow::Error, &ErrorCtx) + 'static) -> Self {
        self.runtime.set_error_hook(hook);
        self
    }

    pub fn root(&self) -> Rc<Component> {
        self.root.clone()
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    /// Cap the number of passes `flush_until_idle` attempts.
    pub fn set_idle_max(&mut self, max: usize) {
        self.idle_max = max.max(1);
    }

    /// Drive the host source to completion. Returns whether the runtime is
    /// ready; host failures are reported under the `host-init` phase and
    /// latch.
    pub async fn ready(&mut self) -> bool {
        if self.runtime.is_ready() {
            return true;
        }
        let Some(source) = self.host_source.take() else {
            return false;
        };
        match source.await {
            Ok(host) => {
                self.runtime.install_host(host);
                self.runtime.scheduler().mark_dirty(&self.root);
                true
            }
            Err(error) => {
                self.runtime.report(
                    error,
                    ErrorCtx {
                        component: None,
                        op: None,
                        phase: Phase::HostInit,
                    },
                );
                false
            }
        }
    }

    /// Wait until the scheduler requests a frame. Collapses a burst of
    /// requests into one wakeup.
    pub async fn wait_for_frame(&mut self) {
        let _ = self.rx.next().await;
        while let Ok(Some(_)) = self.rx.try_next() {}
    }

    /// Run one scheduler pass.
    pub async fn flush(&self) {
        self.runtime.scheduler().flush(&self.runtime).await;
    }

    /// Flush until the system quiesces.
    pub async fn flush_until_idle(&mut self) -> Result<(), IdleError> {
        if !self.ready().await {
            return Err(IdleError::HostUnavailable);
        }
        self.runtime
            .scheduler()
            .when_idle(&self.runtime, self.idle_max)
            .await
    }

    /// Destroy the tree, then tear the host down.
    pub async fn unmount(self) {
        self.root.destroy().await;
        if let Some(host) = self.runtime.host() {
            host.teardown();
        }
    }
}
