//! The shared runtime handle.
//!
//! Every component holds an `Rc<Runtime>`. It carries the scheduler, the host
//! slot (populated asynchronously once the host future resolves), the
//! readiness flag that gates all op execution, and the error router.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::innerlude::*;

/// Process-wide creation counter. Only ever advances; used as the stable
/// tie-breaker for component ordering.
static CREATED: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_creation_id() -> u64 {
    CREATED.fetch_add(1, Ordering::Relaxed)
}

type ErrorHook = Box<dyn Fn(&anyhow::Error, &ErrorCtx)>;

/// Shared state between the scheduler, the facade, and every component.
pub struct Runtime {
    scheduler: Rc<Scheduler>,
    host: RefCell<Option<Rc<dyn Host>>>,
    ready: Cell<bool>,
    app: RefCell<Weak<Component>>,
    error_hook: RefCell<Option<ErrorHook>>,
}

impl Runtime {
    pub(crate) fn new(scheduler: Rc<Scheduler>) -> Rc<Self> {
        Rc::new(Self {
            scheduler,
            host: RefCell::new(None),
            ready: Cell::new(false),
            app: RefCell::new(Weak::new()),
            error_hook: RefCell::new(None),
        })
    }

    pub fn scheduler(&self) -> &Rc<Scheduler> {
        &self.scheduler
    }

    /// Whether the host has been installed. Until then components buffer
    /// their ops and the scheduler refuses to run them.
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub fn host(&self) -> Option<Rc<dyn Host>> {
        self.host.borrow().clone()
    }

    pub(crate) fn install_host(&self, host: Rc<dyn Host>) {
        *self.host.borrow_mut() = Some(host);
        self.ready.set(true);
    }

    /// The root component, while it is alive.
    pub fn app(&self) -> Option<Rc<Component>> {
        self.app.borrow().upgrade()
    }

    pub(crate) fn set_app(&self, root: &Rc<Component>) {
        *self.app.borrow_mut() = Rc::downgrade(root);
    }

    /// Install the app-level error hook. Takes precedence over every
    /// driver-level handler.
    pub fn set_error_hook(&self, hook: impl Fn(&anyhow::Error, &ErrorCtx) + 'static) {
        *self.error_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Route a captured handler error.
    ///
    /// Resolution order: the app-level hook, the root driver's `on_error`,
    /// and finally a logged default. The erring component's own `on_error`
    /// is consulted only while no root is registered (early boot). Never
    /// propagates.
    pub fn report(&self, error: anyhow::Error, cx: ErrorCtx) {
        if let Some(hook) = &*self.error_hook.borrow() {
            hook(&error, &cx);
            return;
        }

        match self.app() {
            Some(root) => {
                if root.handle_error(&error, &cx) {
                    return;
                }
            }
            // early boot: no root yet, fall back to the component scope
            None => {
                if let Some(component) = &cx.component {
                    if component.handle_error(&error, &cx) {
                        return;
                    }
                }
            }
        }

        tracing::error!(phase = %cx.phase, "unhandled runtime error: {error:#}");
    }
}
