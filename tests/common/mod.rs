#![allow(dead_code)]

//! Shared scaffolding for the integration tests: a host that records every
//! call it receives, log plumbing, and json prop helpers.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::bail;
use serde_json::Value;
use tempo_core::prelude::*;
use tempo_core::host;

pub type Log = Rc<RefCell<Vec<String>>>;

pub fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn push(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

/// Build `Props` from a `json!({...})` literal.
pub fn obj(value: Value) -> Props {
    value.as_object().cloned().expect("props literal must be an object")
}

/// A host that renders nothing but remembers everything.
pub struct RecordingHost {
    next: Cell<usize>,
    pub log: Log,
    pub renders: Cell<usize>,
    pub fail_attach: Cell<bool>,
}

impl RecordingHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            next: Cell::new(1),
            log: log(),
            renders: Cell::new(0),
            fail_attach: Cell::new(false),
        })
    }
}

impl Host for RecordingHost {
    fn root_node(&self) -> NodeId {
        NodeId(0)
    }

    fn create_node(&self, _component: &Component) -> NodeId {
        let id = self.next.get();
        self.next.set(id + 1);
        push(&self.log, format!("create:{id}"));
        NodeId(id)
    }

    fn attach_node(&self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        if self.fail_attach.get() {
            bail!("attach refused");
        }
        push(&self.log, format!("attach:{child}->{parent}"));
        Ok(())
    }

    fn detach_node(&self, parent: NodeId, child: NodeId) {
        push(&self.log, format!("detach:{child}<-{parent}"));
    }

    fn destroy_node(&self, node: NodeId) {
        push(&self.log, format!("destroy:{node}"));
    }

    fn request_render(&self) {
        self.renders.set(self.renders.get() + 1);
    }

    fn teardown(&self) {
        push(&self.log, "teardown");
    }
}

/// A root driver with entirely default hooks.
pub struct Inert;

impl Driver for Inert {}

/// Mount with a null host that is ready as soon as the facade polls it.
pub fn mount_ready(driver: impl Driver, props: Props) -> Tempo {
    Tempo::mount(driver, props, host::immediate(NullHost::new()))
}

/// Mount with a recording host, returning both.
pub fn mount_recording(driver: impl Driver, props: Props) -> (Tempo, Rc<RecordingHost>) {
    let recording = RecordingHost::new();
    let app = Tempo::mount(driver, props, host::immediate(recording.clone()));
    (app, recording)
}
