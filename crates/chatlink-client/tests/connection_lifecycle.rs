#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use chatlink_client::config::ChunkOrdering;
use chatlink_client::transport::Frame;
use chatlink_client::{ConnectionPhase, SharedAssembler, TypingCoordinator, TypingSink};
use chatlink_core::chat::MessageStatus;
use chatlink_core::error::ChatLinkError;
use chatlink_core::protocol::{Body, ChatPayload, Envelope, ErrorDetail, ErrorPayload, MessageType};

use common::{is_heartbeat, manager, settle, MockTransport};

fn chunk_envelope(message_id: &str, delta: &str, sequence: u64, is_final: bool) -> Envelope {
    Envelope::new(Body::Chat(ChatPayload {
        delta: Some(delta.into()),
        sequence: Some(sequence),
        is_final: Some(is_final),
        message_id: Some(message_id.into()),
        ..ChatPayload::default()
    }))
}

fn assert_gap(got: Duration, want: Duration) {
    let diff = if got > want { got - want } else { want - got };
    assert!(diff <= Duration::from_millis(5), "gap {got:?}, want {want:?}");
}

#[tokio::test(start_paused = true)]
async fn connect_twice_opens_one_socket() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport.clone());

    mgr.connect();
    mgr.connect();
    settle().await;
    mgr.connect();
    settle().await;

    assert_eq!(transport.opens(), 1);
    assert!(peers.recv().await.is_some());
    assert!(peers.try_recv().is_err());

    let st = mgr.state();
    assert!(st.is_connected());
    assert!(!st.is_connecting());
    assert_eq!(st.retry_count, 0);
    assert!(st.last_connected_at.is_some());
    assert_eq!(rec.events(), vec!["open"]);
}

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_in_order() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, _rec) = manager(transport);

    let ids: Vec<String> = ["A", "B", "C"]
        .iter()
        .map(|c| mgr.send_chat_message(*c, None))
        .collect();
    settle().await;
    assert_eq!(mgr.metrics().queue_depth.get(), 3);

    mgr.connect();
    let mut peer = peers.recv().await.unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        let env = peer.next_envelope().await;
        assert_eq!(env.kind(), MessageType::Chat);
        seen.push(env.id().to_string());
    }
    assert_eq!(seen, ids);

    settle().await;
    assert_eq!(mgr.metrics().queue_depth.get(), 0);
    assert_eq!(mgr.metrics().frames_out.get(&[("type", "chat")]), 3);
}

#[tokio::test(start_paused = true)]
async fn full_socket_buffer_keeps_fifo_order() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, _rec) = manager(transport);
    mgr.connect();
    let mut peer = peers.recv().await.unwrap();
    settle().await;

    // the mock writer holds 64 frames; the 65th has to wait in the queue
    let ids: Vec<String> = (0..65)
        .map(|n| mgr.send_chat_message(format!("m{n}"), None))
        .collect();
    settle().await;
    assert_eq!(mgr.metrics().queue_depth.get(), 1);

    let late = mgr.send_chat_message("late", None);
    settle().await;
    assert_eq!(mgr.metrics().queue_depth.get(), 2);

    let mut seen = Vec::new();
    for _ in 0..66 {
        seen.push(peer.next_envelope().await.id().to_string());
    }
    let mut want = ids;
    want.push(late);
    assert_eq!(seen, want);

    settle().await;
    assert_eq!(mgr.metrics().queue_depth.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn send_on_dead_writer_is_queued_until_reconnect() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport.clone());
    mgr.connect();
    let mut first = peers.recv().await.unwrap();
    settle().await;

    first.close_writer();
    let id = mgr.send_chat_message("hello", None);
    settle().await;
    assert!(mgr.state().is_connected());
    assert_eq!(mgr.metrics().queue_depth.get(), 1);
    assert_eq!(mgr.metrics().frames_out.get(&[("type", "chat")]), 0);

    first.close(1006).await;
    sleep(Duration::from_secs(1)).await;

    let mut second = peers.recv().await.unwrap();
    assert_eq!(second.next_envelope().await.id(), id);
    settle().await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(mgr.metrics().queue_depth.get(), 0);
    assert_eq!(rec.events(), vec!["open", "close:1006", "reconnect:1", "open"]);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_are_never_queued() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, _rec) = manager(transport);

    mgr.send(Envelope::heartbeat());
    mgr.send_chat_message("hello", None);
    mgr.connect();

    let mut peer = peers.recv().await.unwrap();
    let env = peer.next_envelope().await;
    assert_eq!(env.kind(), MessageType::Chat);
    settle().await;
    assert!(peer.try_frame().is_none());
}

#[tokio::test(start_paused = true)]
async fn peer_heartbeat_gets_one_reply_and_no_message_event() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport);
    mgr.connect();
    let mut peer = peers.recv().await.unwrap();

    peer.push(&Envelope::heartbeat()).await;
    settle().await;

    let reply = peer.try_frame().expect("heartbeat reply");
    assert!(is_heartbeat(&reply));
    assert!(peer.try_frame().is_none());
    assert_eq!(rec.events(), vec!["open"]);
    assert_eq!(mgr.metrics().heartbeats.get(&[("dir", "in")]), 1);
    assert_eq!(mgr.metrics().heartbeats.get(&[("dir", "out")]), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_runs_on_interval_while_connected() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, _rec) = manager(transport);
    mgr.connect();
    let mut peer = peers.recv().await.unwrap();

    sleep(Duration::from_secs(29)).await;
    assert!(peer.try_frame().is_none());

    sleep(Duration::from_secs(2)).await;
    assert!(is_heartbeat(&peer.try_frame().expect("first heartbeat")));
    assert!(peer.try_frame().is_none());

    sleep(Duration::from_secs(30)).await;
    assert!(is_heartbeat(&peer.try_frame().expect("second heartbeat")));

    // stops with the socket
    peer.close(1006).await;
    settle().await;
    mgr.disconnect();
    sleep(Duration::from_secs(90)).await;
    assert!(peer.try_frame().is_none());
}

#[tokio::test(start_paused = true)]
async fn typing_goes_to_typing_handler_only() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport);
    mgr.connect();
    let peer = peers.recv().await.unwrap();

    peer.push(&Envelope::typing(true, "s1", "a1")).await;
    peer.push(&Envelope::chat("hi there", None)).await;
    settle().await;

    assert_eq!(rec.events(), vec!["open", "typing:true", "message:chat"]);
}

#[tokio::test(start_paused = true)]
async fn stream_chunks_reach_the_assembler() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport);
    let assembler = SharedAssembler::new(ChunkOrdering::Arrival);
    mgr.subscribe(Arc::new(assembler.clone()));
    mgr.connect();
    let peer = peers.recv().await.unwrap();

    peer.push(&chunk_envelope("m1", "Hel", 0, false)).await;
    settle().await;
    assert!(assembler.is_streaming());

    peer.push(&chunk_envelope("m1", "lo", 1, true)).await;
    peer.push(&chunk_envelope("m2", "partial", 0, false)).await;
    peer.push(&Envelope::new(Body::Error(ErrorPayload {
        error: ErrorDetail {
            code: "MODEL_ERROR".into(),
            message: "generation aborted".into(),
            details: None,
        },
        metadata: None,
        message_id: Some("m2".into()),
    })))
    .await;
    settle().await;

    let done = assembler.message("m1").unwrap();
    assert_eq!(done.content, "Hello");
    assert_eq!(done.status, MessageStatus::Delivered);
    assert!(!done.is_streaming);

    let failed = assembler.message("m2").unwrap();
    assert_eq!(failed.status, MessageStatus::Failed);
    assert!(!assembler.is_streaming());

    assert_eq!(
        rec.events(),
        vec![
            "open",
            "message:chat",
            "chunk:m1:0",
            "message:chat",
            "chunk:m1:1",
            "message:chat",
            "chunk:m2:0",
            "message:error",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport);
    mgr.connect();
    let peer = peers.recv().await.unwrap();

    peer.push_text("{not json").await;
    peer.push_text(r#"{"id":"x1","type":"bogus","timestamp":"2024-05-01T10:00:00Z","payload":{}}"#)
        .await;
    peer.push(&Envelope::chat("still alive", None)).await;
    settle().await;

    assert_eq!(mgr.metrics().decode_errors.total(), 2);
    assert_eq!(rec.events(), vec!["open", "message:chat"]);
    assert!(mgr.state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn failed_opens_back_off_exponentially() {
    let (transport, _peers) = MockTransport::new();
    transport.fail_next(100);
    let (mgr, rec) = manager(transport.clone());

    let start = Instant::now();
    mgr.connect();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.opens(), 6);
    let reconnects = rec.reconnects();
    let attempts: Vec<u32> = reconnects.iter().map(|(n, _)| *n).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4, 5]);

    assert_gap(reconnects[0].1 - start, Duration::from_secs(1));
    let gaps: Vec<Duration> = reconnects.windows(2).map(|w| w[1].1 - w[0].1).collect();
    for (got, want) in gaps.iter().zip([2, 4, 8, 16]) {
        assert_gap(*got, Duration::from_secs(want));
    }

    let st = mgr.state();
    assert_eq!(st.phase, ConnectionPhase::Disconnected);
    assert_eq!(st.retry_count, 5);
    assert_eq!(st.error, Some(ChatLinkError::RetriesExhausted { attempts: 5 }));

    let events = rec.events();
    assert_eq!(&events[..2], &["error:TRANSPORT", "close:1006"]);
    assert_eq!(
        &events[events.len() - 3..],
        &["error:TRANSPORT", "close:1006", "error:RETRIES_EXHAUSTED"]
    );
    let exhausted = events.iter().filter(|e| *e == "error:RETRIES_EXHAUSTED").count();
    assert_eq!(exhausted, 1);
    assert_eq!(mgr.metrics().reconnects_scheduled.total(), 5);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_after_exhaustion_starts_fresh() {
    let (transport, mut peers) = MockTransport::new();
    transport.fail_next(6);
    let (mgr, _rec) = manager(transport.clone());

    mgr.connect();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.opens(), 6);
    assert_eq!(mgr.state().phase, ConnectionPhase::Disconnected);

    mgr.connect();
    settle().await;
    assert_eq!(transport.opens(), 7);
    assert!(peers.recv().await.is_some());
    let st = mgr.state();
    assert!(st.is_connected());
    assert_eq!(st.retry_count, 0);
    assert!(st.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_and_flushes() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport.clone());
    mgr.connect();
    let first = peers.recv().await.unwrap();

    first.close(1006).await;
    settle().await;
    let st = mgr.state();
    assert_eq!(st.phase, ConnectionPhase::Disconnected);
    assert_eq!(st.retry_count, 1);

    let id = mgr.send_chat_message("sent while offline", None);
    sleep(Duration::from_secs(1)).await;

    let mut second = peers.recv().await.unwrap();
    assert_eq!(second.next_envelope().await.id(), id);
    settle().await;

    assert_eq!(transport.opens(), 2);
    assert_eq!(mgr.state().retry_count, 0);
    assert_eq!(rec.events(), vec!["open", "close:1006", "reconnect:1", "open"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_normally_and_never_retries() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport.clone());
    mgr.connect();
    let mut peer = peers.recv().await.unwrap();

    mgr.disconnect();
    match peer.next_frame().await {
        Frame::Close { code, .. } => assert_eq!(code, 1000),
        other => panic!("expected close frame, got {other:?}"),
    }
    settle().await;
    assert_eq!(mgr.state().phase, ConnectionPhase::Closing);

    // even an abnormal code on the way out must not trigger a retry
    peer.close(1006).await;
    sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(mgr.state().phase, ConnectionPhase::Disconnected);
    assert!(rec.reconnects().is_empty());
    assert_eq!(rec.events(), vec!["open", "close:1006"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, rec) = manager(transport.clone());
    mgr.connect();
    let peer = peers.recv().await.unwrap();

    peer.close(1006).await;
    settle().await;
    assert_eq!(mgr.state().retry_count, 1);

    mgr.disconnect();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.opens(), 1);
    assert!(rec.reconnects().is_empty());
    assert_eq!(mgr.state().phase, ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_connecting_abandons_the_attempt() {
    let (transport, mut peers) = MockTransport::new();
    transport.set_open_delay(Duration::from_secs(5));
    let (mgr, rec) = manager(transport.clone());

    mgr.connect();
    settle().await;
    assert!(mgr.state().is_connecting());

    mgr.disconnect();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.opens(), 1);
    assert!(peers.try_recv().is_err());
    assert_eq!(mgr.state().phase, ConnectionPhase::Disconnected);
    assert!(rec.events().is_empty());

    transport.set_open_delay(Duration::ZERO);
    mgr.connect();
    assert!(peers.recv().await.is_some());
    settle().await;
    assert!(mgr.state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_closes_the_socket() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, _rec) = manager(transport);
    mgr.connect();
    let mut peer = peers.recv().await.unwrap();

    drop(mgr);
    match peer.next_frame().await {
        Frame::Close { code, .. } => assert_eq!(code, 1000),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn state_watch_reports_transitions() {
    let (transport, _peers) = MockTransport::new();
    let (mgr, _rec) = manager(transport);
    let mut watch = mgr.watch_state();
    assert_eq!(watch.borrow().phase, ConnectionPhase::Idle);

    mgr.connect();
    let st = watch.wait_for(|s| s.is_connected()).await.unwrap().clone();
    assert!(!st.is_connecting());
}

#[tokio::test(start_paused = true)]
async fn typing_coordinator_sends_through_manager() {
    let (transport, mut peers) = MockTransport::new();
    let (mgr, _rec) = manager(transport);
    mgr.connect();
    let mut peer = peers.recv().await.unwrap();

    let sink: Arc<dyn TypingSink> = Arc::new(mgr.clone());
    let typing = TypingCoordinator::new(sink, "s1", "a1", &Default::default());
    typing.on_text_changed("hel");
    typing.on_text_changed("hello");
    sleep(Duration::from_millis(600)).await;

    let start = peer.next_envelope().await;
    let ind = start.typing_indicator().unwrap();
    assert!(ind.is_typing);
    assert_eq!(ind.session_id.as_deref(), Some("s1"));
    assert_eq!(ind.agent_id.as_deref(), Some("a1"));

    drop(typing);
    let stop = peer.next_envelope().await;
    assert!(!stop.typing_indicator().unwrap().is_typing);
    settle().await;
    assert!(peer.try_frame().is_none());
}
