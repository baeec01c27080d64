//! Device board behavior under a paused clock.
//!
//! Run with `RUST_LOG=wolweb_core=debug cargo test --test board -- --nocapture`
//! to see the engine's transitions.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing_subscriber::EnvFilter;

use wolweb_core::mock::{MockReply, MockTransport};
use wolweb_core::{
    ActionEvent, ActionKind, ActionStatus, BoardOptions, Completion, Device, DeviceAddress,
    DeviceBoard, Dispose, DisposeGuard, DisplayStatus, FailureReason, PollEnd, PollPhase,
    Response,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn addr(s: &str) -> DeviceAddress {
    DeviceAddress::new(s).unwrap()
}

fn ping_path(s: &str) -> String {
    wolweb_types::wire::ping_path(&addr(s))
}

fn pingable(s: &str) -> Device {
    Device::new(addr(s), format!("host-{}", s)).with_host("10.0.0.1")
}

fn setup(devices: &[Device]) -> (Arc<MockTransport>, DeviceBoard) {
    init_tracing();
    let mock = Arc::new(MockTransport::new());
    let board = DeviceBoard::new(mock.clone(), BoardOptions::default()).unwrap();
    board.sync(devices);
    (mock, board)
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_probed_at_zero_and_three_seconds() {
    let (mock, board) = setup(&[pingable("AA")]);
    mock.respond(&ping_path("AA"), Response::new(200, r#"{"status":"failed"}"#));

    let start = Instant::now();
    let phase = board.begin_ping(&addr("AA")).unwrap().finished().await;
    sleep(Duration::from_secs(30)).await;

    assert_eq!(
        phase,
        PollPhase::Finished {
            end: PollEnd::TimedOut,
            attempts: 2
        }
    );
    let offsets: Vec<Duration> = mock.calls().iter().map(|c| c.at - start).collect();
    assert_eq!(offsets, vec![Duration::ZERO, Duration::from_secs(3)]);
    assert_eq!(
        board.status(&addr("AA"), ActionKind::Ping).unwrap(),
        ActionStatus::Failed(FailureReason::TimedOut { attempts: 2 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_one_poll_session_per_device() {
    let (mock, board) = setup(&[pingable("AA"), pingable("BB")]);
    mock.respond(&ping_path("AA"), Response::new(200, r#"{"status":"failed"}"#));
    mock.respond(&ping_path("BB"), Response::new(200, r#"{"status":"failed"}"#));
    mock.set_latency(Duration::from_millis(500));
    let mut events = board.events().subscribe();

    let first = board.begin_ping(&addr("AA")).unwrap();
    let second = board.begin_ping(&addr("AA")).unwrap();
    let other = board.begin_ping(&addr("BB")).unwrap();

    assert!(!first.is_live());
    assert!(second.is_live());
    assert!(other.is_live());
    assert_eq!(
        board
            .poll_phase(&addr("AA"))
            .unwrap()
            .session()
            .unwrap()
            .attempt,
        1
    );

    // Sends happen in spawned tasks; the replaced session was cancelled
    // before its task ever ran.
    assert_eq!(mock.call_count(), 0);

    let start = Instant::now();
    second.finished().await;
    other.finished().await;
    // AA: both calls belong to the live session. BB: two.
    let aa_offsets: Vec<Duration> = mock
        .calls()
        .iter()
        .filter(|c| c.request.path == ping_path("AA"))
        .map(|c| c.at - start)
        .collect();
    assert_eq!(aa_offsets, vec![Duration::ZERO, Duration::from_millis(3500)]);
    assert_eq!(mock.calls_to(&ping_path("BB")), 2);

    let mut finished_aa = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ActionEvent::PollFinished { device, end, .. } = event
            && device == addr("AA")
        {
            finished_aa.push(end);
        }
    }
    assert_eq!(finished_aa, vec![PollEnd::Cancelled, PollEnd::TimedOut]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_call_never_changes_status() {
    let (mock, board) = setup(&[pingable("AA")]);
    mock.respond("/api/wol", Response::new(500, r#"{"error":"boom"}"#));
    mock.set_latency(Duration::from_secs(1));

    {
        let _task = DisposeGuard::new(board.wake(&addr("AA")).unwrap());
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_secs(5)).await;

    assert_eq!(
        board.status(&addr("AA"), ActionKind::Wake).unwrap(),
        ActionStatus::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn test_newest_wake_wins() {
    let (mock, board) = setup(&[pingable("AA")]);
    mock.enqueue_after(
        "/api/wol",
        Duration::from_secs(2),
        MockReply::Respond(Response::new(200, "{}")),
    );
    mock.enqueue_after(
        "/api/wol",
        Duration::from_millis(100),
        MockReply::Fail("connection reset by peer".to_string()),
    );
    let mut events = board.events().subscribe();

    let a = board.wake(&addr("AA")).unwrap();
    let b = board.wake(&addr("AA")).unwrap();

    let b_done = b.join().await;
    assert!(matches!(
        b_done,
        Completion::Applied(ActionStatus::Failed(FailureReason::Transport { .. }))
    ));
    assert_eq!(a.join().await, Completion::Superseded);
    assert!(matches!(
        board.status(&addr("AA"), ActionKind::Wake).unwrap(),
        ActionStatus::Failed(FailureReason::Transport { .. })
    ));

    let mut discarded = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ActionEvent::Discarded { generation: 1, .. }) {
            discarded += 1;
        }
    }
    assert_eq!(discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_quick_success_reveals_once() {
    let (mock, board) = setup(&[pingable("AA")]);
    mock.respond("/api/wol", Response::new(200, r#"{"message":"success"}"#));
    mock.set_latency(Duration::from_millis(50));
    let mut display = board.watch_display(&addr("AA"), ActionKind::Wake).unwrap();
    assert_eq!(
        *display.borrow_and_update(),
        DisplayStatus::Visible(ActionStatus::Idle)
    );

    let recorder = tokio::spawn(async move {
        let mut seen = Vec::new();
        while display.changed().await.is_ok() {
            seen.push(display.borrow_and_update().clone());
            if seen.len() == 2 {
                break;
            }
        }
        seen
    });

    board.wake(&addr("AA")).unwrap();
    let seen = recorder.await.unwrap();

    assert_eq!(
        seen,
        vec![
            DisplayStatus::Hidden,
            DisplayStatus::Visible(ActionStatus::Succeeded)
        ]
    );
    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        board.display(&addr("AA"), ActionKind::Wake).unwrap(),
        DisplayStatus::Visible(ActionStatus::Succeeded)
    );
}

#[tokio::test(start_paused = true)]
async fn test_null_or_missing_list_is_empty() {
    for body in [r#"{"macs":null}"#, "{}"] {
        let (mock, board) = setup(&[]);
        mock.respond("/api/macs", Response::new(200, body));

        let report = board.refresh().await.unwrap();
        assert!(report.added.is_empty());
        assert!(board.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_removing_device_mid_interval_stops_probes() {
    let (mock, board) = setup(&[pingable("AA")]);
    mock.respond(&ping_path("AA"), Response::new(200, r#"{"status":"failed"}"#));

    let handle = board.begin_ping(&addr("AA")).unwrap();
    sleep(Duration::from_secs(1)).await;
    assert!(board.remove(&addr("AA")));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.call_count(), 1);
    assert!(!handle.is_live());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_board_aborts_everything() {
    let (mock, board) = setup(&[pingable("AA"), pingable("BB")]);
    mock.respond(&ping_path("AA"), Response::new(200, r#"{"status":"failed"}"#));
    mock.respond("/api/wol", Response::new(200, "{}"));
    mock.set_latency(Duration::from_millis(500));

    let poll = board.begin_ping(&addr("AA")).unwrap();
    let wake = board.wake(&addr("BB")).unwrap();
    sleep(Duration::from_millis(100)).await;
    drop(board);

    assert_eq!(wake.join().await, Completion::Cancelled);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.call_count(), 2);
    assert!(!poll.is_live());
}

#[tokio::test(start_paused = true)]
async fn test_reset_ping_cancels_session_and_goes_idle() {
    let (mock, board) = setup(&[pingable("AA")]);
    mock.respond(&ping_path("AA"), Response::new(200, r#"{"status":"failed"}"#));

    let handle = board.begin_ping(&addr("AA")).unwrap();
    sleep(Duration::from_millis(10)).await;
    board.reset(&addr("AA"), ActionKind::Ping).unwrap();

    assert!(!handle.is_live());
    assert_eq!(
        board.status(&addr("AA"), ActionKind::Ping).unwrap(),
        ActionStatus::Idle
    );
    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.call_count(), 1);

    // Disposing the old handle afterwards is harmless.
    handle.dispose();
    assert_eq!(
        board.status(&addr("AA"), ActionKind::Ping).unwrap(),
        ActionStatus::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn test_pairs_are_independent() {
    let (mock, board) = setup(&[pingable("AA")]);
    mock.respond("/api/wol", Response::new(200, "{}"));
    mock.respond(&ping_path("AA"), Response::new(200, r#"{"status":"ok"}"#));
    mock.set_latency(Duration::from_millis(200));

    let wake = board.wake(&addr("AA")).unwrap();
    let poll = board.begin_ping(&addr("AA")).unwrap();
    board.cancel_ping(&addr("AA")).unwrap();

    assert_eq!(wake.join().await, Completion::Applied(ActionStatus::Succeeded));
    assert!(!poll.is_live());
    assert_eq!(
        board.status(&addr("AA"), ActionKind::Ping).unwrap(),
        ActionStatus::Pending
    );
}
