//! The host adapter surface.
//!
//! A host is whatever actually renders: a GPU scene graph, a canvas, a DOM.
//! The core consumes only the minimal surface below; domain-specific
//! operations (texture uploads, text layout, event subscription) are invoked
//! by user components inside their effects and are invisible to the core.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

use slab::Slab;

use crate::innerlude::*;

/// An opaque handle to a host-side node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that can own nodes and present frames on behalf of the runtime.
///
/// All methods take `&self`; hosts use interior mutability, the same
/// single-threaded discipline as the rest of the core.
pub trait Host: 'static {
    /// The container node everything ultimately hangs off.
    fn root_node(&self) -> NodeId;

    /// Allocate a node for a component. Called lazily on the component's
    /// first flush; the core stores the handle on the component.
    fn create_node(&self, component: &Component) -> NodeId;

    /// Attach `child` beneath `parent`. Failures are reported under the
    /// `attach` phase and the component is skipped for the frame.
    fn attach_node(&self, parent: NodeId, child: NodeId) -> anyhow::Result<()>;

    /// Remove `child` from `parent`. Only called during destroy.
    fn detach_node(&self, parent: NodeId, child: NodeId);

    /// Release host-side resources tied to `node`.
    fn destroy_node(&self, node: NodeId);

    /// Present. Called at most once per flush that touched this host.
    fn request_render(&self);

    /// Invoked on `unmount` after the tree is destroyed.
    fn teardown(&self) {}
}

/// Wrap an already-constructed host in the future shape
/// [`Tempo::mount`](crate::Tempo::mount) expects.
pub fn immediate(host: Rc<dyn Host>) -> futures_util::future::Ready<anyhow::Result<Rc<dyn Host>>> {
    futures_util::future::ready(Ok(host))
}

/// A host that renders nothing.
///
/// Node handles are allocated from a slab so identity semantics hold, but no
/// resources exist behind them. Useful for headless runs and tests.
pub struct NullHost {
    nodes: RefCell<Slab<()>>,
}

impl NullHost {
    pub fn new() -> Rc<Self> {
        let mut nodes = Slab::new();
        // slot 0 is the root container
        nodes.insert(());
        Rc::new(Self {
            nodes: RefCell::new(nodes),
        })
    }
}

impl Host for NullHost {
    fn root_node(&self) -> NodeId {
        NodeId(0)
    }

    fn create_node(&self, _component: &Component) -> NodeId {
        NodeId(self.nodes.borrow_mut().insert(()))
    }

    fn attach_node(&self, _parent: NodeId, _child: NodeId) -> anyhow::Result<()> {
        Ok(())
    }

    fn detach_node(&self, _parent: NodeId, _child: NodeId) {}

    fn destroy_node(&self, node: NodeId) {
        self.nodes.borrow_mut().try_remove(node.0);
    }

    fn request_render(&self) {}
}
