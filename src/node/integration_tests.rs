//! End-to-end scenarios wiring node shapes through real ports, exercising
//! forward delivery and backward acknowledgement across whole node graphs.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::node::{ManyToOneNode, OneToManyNode, OneToOneNode};
use crate::packet::{ErrorPayload, Packet};
use crate::port::{close_hook, listener, name, open_hook, InPort, OutPort};
use crate::process::Process;

const TICK: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(1);

fn init_diagnostics() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn text(pck: &Arc<Packet>) -> String {
    pck.value()
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_one_to_one_transforms_and_acks_upstream() {
    init_diagnostics();
    let node = OneToOneNode::from_fn(|_, pck| {
        (Some(Packet::new(json!(text(pck).to_uppercase()))), None)
    });
    let upstream = OutPort::new();
    upstream.link(&node.in_port(name::IN).unwrap());
    let sink = InPort::new();
    node.out_port(name::OUT).unwrap().link(&sink);

    let proc = Process::new();
    let writer = upstream.open(&proc);
    assert_eq!(writer.write(Packet::new(json!("x"))), 1);

    let sink_reader = sink.open(&proc);
    let got = timeout(WAIT, sink_reader.read())
        .await
        .expect("output delivered")
        .unwrap();
    assert_eq!(got.value(), Some(&json!("X")));
    assert!(sink_reader.receive(&got));

    let ack = timeout(WAIT, writer.receive())
        .await
        .expect("upstream ack")
        .unwrap();
    assert_eq!(ack.id(), got.id());
}

#[tokio::test]
async fn test_one_to_one_routes_error_port() {
    init_diagnostics();
    let node = OneToOneNode::from_fn(|_, _| {
        (None, Some(Packet::error(ErrorPayload::with_code(422, "bad input"))))
    });
    let upstream = OutPort::new();
    upstream.link(&node.in_port(name::IN).unwrap());
    let failures = InPort::new();
    node.out_port(name::ERROR).unwrap().link(&failures);

    let proc = Process::new();
    let writer = upstream.open(&proc);
    writer.write(Packet::new(json!("boom")));

    let failure_reader = failures.open(&proc);
    let err = timeout(WAIT, failure_reader.read())
        .await
        .expect("error delivered")
        .unwrap();
    assert!(err.is_error());
    failure_reader.receive(&err);

    let ack = timeout(WAIT, writer.receive())
        .await
        .expect("upstream ack")
        .unwrap();
    assert!(ack.is_error());
}

#[tokio::test]
async fn test_one_to_one_unlinked_error_echoes_upstream() {
    init_diagnostics();
    // No link on the error port: the error packet itself comes back as
    // the upstream ack instead of stalling the producer.
    let node = OneToOneNode::from_fn(|_, _| {
        (None, Some(Packet::error(ErrorPayload::new("dropped"))))
    });
    let upstream = OutPort::new();
    upstream.link(&node.in_port(name::IN).unwrap());

    let proc = Process::new();
    let writer = upstream.open(&proc);
    writer.write(Packet::new(json!("boom")));

    let ack = timeout(WAIT, writer.receive())
        .await
        .expect("upstream ack")
        .unwrap();
    assert!(ack.is_error());
}

#[tokio::test]
async fn test_one_to_many_acks_once_after_all_branches() {
    init_diagnostics();
    let node = OneToManyNode::from_fn(|_, pck| {
        let base = text(pck);
        (
            vec![
                Some(Packet::new(json!(format!("{base}-left")))),
                Some(Packet::new(json!(format!("{base}-right")))),
            ],
            None,
        )
    });
    let upstream = OutPort::new();
    upstream.link(&node.in_port(name::IN).unwrap());
    let left = InPort::new();
    let right = InPort::new();
    node.out_port("out[0]").unwrap().link(&left);
    node.out_port("out[1]").unwrap().link(&right);

    let proc = Process::new();
    let writer = upstream.open(&proc);
    writer.write(Packet::new(json!("job")));

    let left_reader = left.open(&proc);
    let right_reader = right.open(&proc);
    let got_left = timeout(WAIT, left_reader.read()).await.unwrap().unwrap();
    let got_right = timeout(WAIT, right_reader.read()).await.unwrap().unwrap();
    assert_eq!(got_left.value(), Some(&json!("job-left")));
    assert_eq!(got_right.value(), Some(&json!("job-right")));

    // Acknowledge the branches out of order.
    right_reader.receive(&got_right);
    assert!(
        timeout(TICK, writer.receive()).await.is_err(),
        "input acked before all branches answered"
    );

    left_reader.receive(&got_left);
    let ack = timeout(WAIT, writer.receive())
        .await
        .expect("single input ack")
        .unwrap();
    assert!(!ack.is_error());

    // No second ack for the same input.
    assert!(timeout(TICK, writer.receive()).await.is_err());
}

#[tokio::test]
async fn test_many_to_one_joins_inputs_and_acks_each_writer() {
    init_diagnostics();
    let node = ManyToOneNode::from_fn(|_, pcks| {
        let joined: String = pcks.iter().map(|p| text(p)).collect();
        (Some(Packet::new(json!(joined))), None)
    });
    let first = OutPort::new();
    let second = OutPort::new();
    first.link(&node.in_port("in[0]").unwrap());
    second.link(&node.in_port("in[1]").unwrap());
    let sink = InPort::new();
    node.out_port(name::OUT).unwrap().link(&sink);

    let proc = Process::new();
    let first_writer = first.open(&proc);
    let second_writer = second.open(&proc);
    first_writer.write(Packet::new(json!("A")));
    second_writer.write(Packet::new(json!("B")));

    let sink_reader = sink.open(&proc);
    let got = timeout(WAIT, sink_reader.read())
        .await
        .expect("joined output")
        .unwrap();
    assert_eq!(got.value(), Some(&json!("AB")));
    sink_reader.receive(&got);

    let first_ack = timeout(WAIT, first_writer.receive())
        .await
        .expect("first input ack")
        .unwrap();
    let second_ack = timeout(WAIT, second_writer.receive())
        .await
        .expect("second input ack")
        .unwrap();
    assert_eq!(first_ack.id(), got.id());
    assert_eq!(second_ack.id(), got.id());
}

#[tokio::test]
async fn test_many_to_one_waits_for_complete_set() {
    init_diagnostics();
    let node = ManyToOneNode::from_fn(|_, pcks| {
        let joined: String = pcks.iter().map(|p| text(p)).collect();
        (Some(Packet::new(json!(joined))), None)
    });
    let first = OutPort::new();
    first.link(&node.in_port("in[0]").unwrap());
    // Declared but never written to.
    node.in_port("in[1]").unwrap();
    let sink = InPort::new();
    node.out_port(name::OUT).unwrap().link(&sink);

    let proc = Process::new();
    first.open(&proc).write(Packet::new(json!("A")));

    let sink_reader = sink.open(&proc);
    assert!(
        timeout(TICK, sink_reader.read()).await.is_err(),
        "action ran on an incomplete input set"
    );
}

#[tokio::test]
async fn test_concurrent_processes_do_not_cross_talk() {
    init_diagnostics();
    // One shared node, two Processes: acks must only unblock the writer of
    // the Process they belong to.
    let node = OneToOneNode::from_fn(|_, pck| {
        (Some(Packet::new(json!(text(pck).to_uppercase()))), None)
    });
    let upstream = OutPort::new();
    upstream.link(&node.in_port(name::IN).unwrap());
    let sink = InPort::new();
    node.out_port(name::OUT).unwrap().link(&sink);

    let p1 = Process::new();
    let p2 = Process::new();
    let w1 = upstream.open(&p1);
    let w2 = upstream.open(&p2);
    w1.write(Packet::new(json!("one")));
    w2.write(Packet::new(json!("two")));

    let r1 = sink.open(&p1);
    let r2 = sink.open(&p2);
    let got1 = timeout(WAIT, r1.read()).await.unwrap().unwrap();
    let got2 = timeout(WAIT, r2.read()).await.unwrap().unwrap();
    assert_eq!(got1.value(), Some(&json!("ONE")));
    assert_eq!(got2.value(), Some(&json!("TWO")));

    // Acknowledge only the second Process's output.
    r2.receive(&got2);
    assert!(
        timeout(TICK, w1.receive()).await.is_err(),
        "ack for one Process unblocked another Process's writer"
    );
    let ack2 = timeout(WAIT, w2.receive()).await.unwrap().unwrap();
    assert_eq!(ack2.id(), got2.id());

    r1.receive(&got1);
    let ack1 = timeout(WAIT, w1.receive()).await.unwrap().unwrap();
    assert_eq!(ack1.id(), got1.id());
}

#[tokio::test]
async fn test_node_close_unblocks_readers() {
    init_diagnostics();
    let node = OneToOneNode::from_fn(|_, _| (None, None));
    let input = node.in_port(name::IN).unwrap();
    let proc = Process::new();
    let reader = input.open(&proc);

    let blocked = tokio::spawn(async move { reader.read().await });
    tokio::time::sleep(TICK).await;
    node.close();

    let outcome = timeout(WAIT, blocked)
        .await
        .expect("blocked read must return after close")
        .unwrap();
    assert!(outcome.is_none());

    // A second close is a no-op.
    node.close();
}

#[tokio::test]
async fn test_closing_unread_fanout_target_releases_the_ack() {
    init_diagnostics();
    // One branch answers, the other never reads its queued copy. Closing
    // the stalled target must discount it so the writer still gets the one
    // answered ack.
    let out = OutPort::new();
    let served = InPort::new();
    let stalled = InPort::new();
    out.link(&served);
    out.link(&stalled);

    let proc = Process::new();
    let writer = out.open(&proc);
    assert_eq!(writer.write(Packet::new(json!("fan"))), 2);

    let reader = served.open(&proc);
    let got = timeout(WAIT, reader.read()).await.unwrap().unwrap();
    reader.receive(&got);

    assert!(
        timeout(TICK, writer.receive()).await.is_err(),
        "ack emitted while a branch was still outstanding"
    );

    stalled.close();
    let ack = timeout(WAIT, writer.receive())
        .await
        .expect("ack after the stalled branch was discounted")
        .unwrap();
    assert_eq!(ack.id(), got.id());
}

#[tokio::test]
async fn test_open_hooks_fire_once_per_process() {
    init_diagnostics();
    let input = InPort::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let hook = {
        let fired = fired.clone();
        open_hook(move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(input.add_open_hook(hook.clone()));
    assert!(!input.add_open_hook(hook.clone()));

    let p1 = Process::new();
    input.open(&p1);
    input.open(&p1);
    assert_eq!(fired.load(Ordering::SeqCst), 1, "re-open must not re-fire");

    let p2 = Process::new();
    input.open(&p2);
    assert_eq!(fired.load(Ordering::SeqCst), 2);

    assert!(input.remove_open_hook(&hook));
    assert!(!input.remove_open_hook(&hook));
    input.open(&Process::new());
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_close_hooks_fire_once_on_close() {
    init_diagnostics();
    let port = OutPort::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let hook = {
        let fired = fired.clone();
        close_hook(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(port.add_close_hook(hook.clone()));
    assert!(!port.add_close_hook(hook.clone()));
    assert!(port.remove_close_hook(&hook));
    assert!(!port.remove_close_hook(&hook));

    assert!(port.add_close_hook(hook.clone()));
    port.close();
    port.close();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_link_and_registration_idempotence() {
    init_diagnostics();
    let out = OutPort::new();
    let input = InPort::new();
    assert!(out.link(&input));
    assert!(!out.link(&input));
    assert!(out.unlink(&input));
    assert!(!out.unlink(&input));

    let observer = listener(|_| async {});
    assert!(input.add_listener(observer.clone()));
    assert!(!input.add_listener(observer.clone()));
    assert!(input.remove_listener(&observer));
    assert!(!input.remove_listener(&observer));
}

#[tokio::test]
async fn test_process_exit_closes_streams_mid_flight() {
    init_diagnostics();
    // No listener on the input, so the packet sits unread when the
    // Process exits.
    let input = InPort::new();
    let upstream = OutPort::new();
    upstream.link(&input);

    let proc = Process::new();
    let writer = upstream.open(&proc);
    assert_eq!(writer.write(Packet::new(json!("in flight"))), 1);

    proc.exit(None);

    // The writer's backward stream is torn down with the Process; no ack
    // arrives, only end-of-stream.
    let back = timeout(WAIT, writer.receive())
        .await
        .expect("receive must return after exit");
    assert!(back.is_none());
}
