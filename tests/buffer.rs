//! CommandBuffer semantics: coalescing, squashing, ordering, and the
//! yield/requeue path of a budgeted drain.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};
use tempo_core::{CommandBuffer, Op, Payload, PushOp, SquashFn};

fn push(buf: &RefCell<CommandBuffer>, kind: &str, key: &str, payload: Value, priority: i32) {
    buf.borrow_mut().push(PushOp {
        kind: kind.into(),
        key: key.into(),
        payload,
        priority,
        squash: None,
    });
}

fn push_squashed(
    buf: &RefCell<CommandBuffer>,
    kind: &str,
    key: &str,
    payload: Value,
    squash: SquashFn,
) {
    buf.borrow_mut().push(PushOp {
        kind: kind.into(),
        key: key.into(),
        payload,
        priority: 0,
        squash: Some(squash),
    });
}

async fn drain_all(buf: &RefCell<CommandBuffer>) -> Vec<Op> {
    let out = Rc::new(RefCell::new(Vec::new()));
    let sink = out.clone();
    let finished = CommandBuffer::drain(
        buf,
        move |op| {
            let sink = sink.clone();
            async move { sink.borrow_mut().push(op) }
        },
        || false,
    )
    .await;
    assert!(finished);
    out.take()
}

/// The squash used by the delta tests: spread both payloads, sum dx/dy.
fn delta_squash() -> SquashFn {
    Rc::new(|a: &Payload, b: &Payload, _: &Op, _: &Op| {
        let mut merged = a.as_object().cloned().unwrap();
        for (k, v) in b.as_object().unwrap() {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(
            "dx".into(),
            json!(a["dx"].as_i64().unwrap() + b["dx"].as_i64().unwrap()),
        );
        merged.insert(
            "dy".into(),
            json!(a["dy"].as_i64().unwrap() + b["dy"].as_i64().unwrap()),
        );
        Value::Object(merged)
    })
}

#[tokio::test]
async fn coalesces_to_a_single_op_per_key() {
    let buf = RefCell::new(CommandBuffer::new());

    push(&buf, "position", "position", json!({ "x": 1, "y": 1 }), 0);
    push(&buf, "position", "position", json!({ "x": 2, "y": 2 }), 0);

    assert_eq!(buf.borrow().len(), 1);

    let ops = drain_all(&buf).await;
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].payload, json!({ "x": 2, "y": 2 }));
}

#[tokio::test]
async fn payload_folds_under_squash() {
    let buf = RefCell::new(CommandBuffer::new());
    let squash = delta_squash();

    for payload in [
        json!({ "id": 1, "dx": 1, "dy": 0 }),
        json!({ "id": 1, "dx": 2, "dy": 3 }),
        json!({ "id": 1, "dx": 4, "dy": 1 }),
    ] {
        push_squashed(&buf, "patch", "patch:1", payload, squash.clone());
    }
    push_squashed(
        &buf,
        "patch",
        "patch:2",
        json!({ "id": 2, "dx": 5, "dy": 5 }),
        squash.clone(),
    );

    let ops = drain_all(&buf).await;
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].payload, json!({ "id": 1, "dx": 7, "dy": 4 }));
    assert_eq!(ops[1].payload, json!({ "id": 2, "dx": 5, "dy": 5 }));
}

#[tokio::test]
async fn coalescing_adopts_priority_but_keeps_sequence() {
    let buf = RefCell::new(CommandBuffer::new());

    push(&buf, "tick", "A", json!({ "a": 1 }), 10);
    push(&buf, "tick", "B", json!({ "b": 1 }), 5);
    push(&buf, "tick", "A", json!({ "a": 2 }), 0);

    let ops = drain_all(&buf).await;
    let order: Vec<_> = ops.iter().map(|op| op.key.as_str()).collect();
    assert_eq!(order, ["A", "B"]);
    assert_eq!(ops[0].payload, json!({ "a": 2 }));
    assert_eq!(ops[1].payload, json!({ "b": 1 }));
}

#[tokio::test]
async fn first_pushed_drains_first_at_equal_priority() {
    let buf = RefCell::new(CommandBuffer::new());

    push(&buf, "tick", "A", json!(1), 0);
    push(&buf, "tick", "B", json!(2), 0);
    // coalescing B must not move it ahead of A
    push(&buf, "tick", "B", json!(3), 0);
    push(&buf, "tick", "A", json!(4), 0);

    let ops = drain_all(&buf).await;
    let order: Vec<_> = ops.iter().map(|op| op.key.as_str()).collect();
    assert_eq!(order, ["A", "B"]);
    assert_eq!(ops[0].payload, json!(4));
    assert_eq!(ops[1].payload, json!(3));
}

#[tokio::test]
async fn ops_pushed_mid_drain_wait_for_the_next_drain() {
    let buf = Rc::new(RefCell::new(CommandBuffer::new()));
    push(&buf, "step", "step", json!(1), 0);

    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let buf = buf.clone();
        let seen = seen.clone();
        let finished = CommandBuffer::drain(
            &buf.clone(),
            move |op| {
                let buf = buf.clone();
                let seen = seen.clone();
                async move {
                    seen.borrow_mut().push(op.payload.clone());
                    // a new op for the in-flight key lands in the live buffer
                    if op.payload == json!(1) {
                        buf.borrow_mut().push(PushOp {
                            kind: "step".into(),
                            key: "step".into(),
                            payload: json!(2),
                            priority: 0,
                            squash: None,
                        });
                    }
                }
            },
            || false,
        )
        .await;
        assert!(finished);
    }

    assert_eq!(*seen.borrow(), vec![json!(1)]);
    assert_eq!(buf.borrow().len(), 1);

    let ops = drain_all(&buf).await;
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].payload, json!(2));
}

#[tokio::test]
async fn yield_requeues_the_remaining_snapshot() {
    let buf = RefCell::new(CommandBuffer::new());
    push(&buf, "op", "a", json!("a"), 0);
    push(&buf, "op", "b", json!("b"), 0);
    push(&buf, "op", "c", json!("c"), 0);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut checks = 0;
    let finished = CommandBuffer::drain(
        &buf,
        move |op| {
            let sink = sink.clone();
            async move { sink.borrow_mut().push(op.key) }
        },
        move || {
            checks += 1;
            checks > 1
        },
    )
    .await;

    assert!(!finished);
    assert_eq!(*seen.borrow(), vec!["a".to_string()]);
    assert_eq!(buf.borrow().len(), 2);

    let ops = drain_all(&buf).await;
    let order: Vec<_> = ops.iter().map(|op| op.key.as_str()).collect();
    assert_eq!(order, ["b", "c"]);
}

#[tokio::test]
async fn requeued_op_coalesces_forward_against_newer_pushes() {
    let buf = Rc::new(RefCell::new(CommandBuffer::new()));
    push(&buf, "op", "a", json!("old-a"), 0);
    push(&buf, "op", "b", json!("old-b"), 0);

    // drain yields immediately after the first op; meanwhile the effect
    // pushes a fresh payload for the yielded key
    let buf2 = buf.clone();
    let finished = CommandBuffer::drain(
        &buf.clone(),
        move |_op| {
            let buf = buf2.clone();
            async move {
                buf.borrow_mut().push(PushOp {
                    kind: "op".into(),
                    key: "b".into(),
                    payload: json!("new-b"),
                    priority: 0,
                    squash: None,
                });
            }
        },
        {
            let mut checks = 0;
            move || {
                checks += 1;
                checks > 1
            }
        },
    )
    .await;
    assert!(!finished);

    // newer data wins the payload, the earlier sequence keeps its place
    let live = buf.borrow();
    let op = live.get("b").unwrap();
    assert_eq!(op.payload, json!("new-b"));
    assert_eq!(live.len(), 1);
    assert_eq!(op.sequence, 2);
}
