// tests/event_watcher.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use scriptd::clock::spawn_clock;
use scriptd::engine::DiagnosticKind;
use scriptd::exec::ExecStatus;
use scriptd::watch::{spawn_event_watcher, Backoff, ChannelController, Controller, LineController, Notification};
use scriptd_test_utils::builders::{
    every, mock_core, on_event, spawn_dispatcher, utc, value_equals, TestDispatcher,
};
use scriptd_test_utils::fake_executor::{FakeExecutor, FakeRuns};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::common::{eventually, init_tracing, with_timeout};

fn fast_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(50), Duration::from_millis(200))
}

fn dispatcher_with_watcher(
    scripts: &[&str],
    controller: &ChannelController,
) -> (TestDispatcher, FakeRuns) {
    let (core, _fs) = mock_core(scripts, 4);
    let mut runs = None;
    let dispatcher = spawn_dispatcher(core, Duration::from_secs(1), |tx| {
        let (executor, fake) = FakeExecutor::completing(tx, ExecStatus::Success);
        runs = Some(fake);
        executor
    });
    spawn_event_watcher(
        Arc::new(controller.clone()),
        dispatcher.intake_tx.clone(),
        dispatcher.triggers_rx.clone(),
        fast_backoff(),
        dispatcher.shutdown_rx.clone(),
    );
    (dispatcher, runs.unwrap())
}

async fn spawned_count(runs: &FakeRuns, script: &str, expected: usize) {
    eventually(Duration::from_secs(5), || async {
        let count = runs.spawned_scripts().iter().filter(|s| *s == script).count();
        (count >= expected).then_some(())
    })
    .await;
}

async fn wait_subscribed(controller: &ChannelController) {
    eventually(Duration::from_secs(3), || async {
        (controller.subscriber_count() > 0).then_some(())
    })
    .await;
}

#[tokio::test]
async fn value_equals_fires_only_on_transition() {
    init_tracing();
    let controller = ChannelController::new();
    let (dispatcher, runs) = dispatcher_with_watcher(&["porch", "marker"], &controller);
    let handle = &dispatcher.handle;

    handle
        .add_trigger(on_event("on", "porch", "D1", Some("STATE"), value_equals("1")))
        .await
        .unwrap();
    handle
        .add_trigger(on_event("mark", "marker", "D2", None, value_equals("go")))
        .await
        .unwrap();
    wait_subscribed(&controller).await;

    controller.publish_notification(Notification::new("D1", "STATE", Some("0"), "1"));
    spawned_count(&runs, "porch", 1).await;
    eventually(Duration::from_secs(2), || async {
        handle.last_record("porch").await.unwrap()
    })
    .await;

    // Same value again: not a transition.
    controller.publish_notification(Notification::new("D1", "STATE", Some("1"), "1"));
    // Notifications are handled in order, so once the marker ran the
    // repeated value has been seen.
    controller.publish_notification(Notification::new("D2", "GO", Some("stop"), "go"));
    spawned_count(&runs, "marker", 1).await;
    assert_eq!(
        runs.spawned_scripts().iter().filter(|s| *s == "porch").count(),
        1
    );
}

#[tokio::test]
async fn missing_old_value_falls_back_to_previous_notification() {
    let controller = ChannelController::new();
    controller.set_value("D1", "STATE", "0");
    let (dispatcher, runs) = dispatcher_with_watcher(&["porch"], &controller);

    dispatcher
        .handle
        .add_trigger(on_event("on", "porch", "D1", Some("STATE"), value_equals("1")))
        .await
        .unwrap();
    wait_subscribed(&controller).await;

    controller.publish_notification(Notification::new("D1", "STATE", None, "0"));
    controller.publish_notification(Notification::new("D1", "STATE", None, "1"));
    spawned_count(&runs, "porch", 1).await;
}

#[tokio::test]
async fn first_partial_notification_can_fire() {
    let controller = ChannelController::new();
    let (dispatcher, runs) = dispatcher_with_watcher(&["porch"], &controller);

    dispatcher
        .handle
        .add_trigger(on_event("on", "porch", "D1", Some("STATE"), value_equals("1")))
        .await
        .unwrap();
    wait_subscribed(&controller).await;

    // Nothing is known about D1/STATE before this sample.
    controller.publish_notification(Notification::new("D1", "STATE", None, "1"));
    spawned_count(&runs, "porch", 1).await;
}

#[tokio::test]
async fn disconnect_leaves_schedules_running_and_reconnects() {
    init_tracing();
    let controller = ChannelController::new();
    let (dispatcher, runs) = dispatcher_with_watcher(&["clock", "porch"], &controller);
    spawn_clock(
        dispatcher.intake_tx.clone(),
        dispatcher.triggers_rx.clone(),
        Duration::from_millis(100),
        utc(),
        dispatcher.shutdown_rx.clone(),
    );
    let handle = &dispatcher.handle;

    handle.add_trigger(every("tick", "clock", 1)).await.unwrap();
    handle
        .add_trigger(on_event("on", "porch", "D1", Some("STATE"), value_equals("1")))
        .await
        .unwrap();
    wait_subscribed(&controller).await;

    controller.set_available(false);
    controller.disconnect();

    eventually(Duration::from_secs(3), || async {
        let snapshot = handle.snapshot().await.unwrap();
        snapshot
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::ConnectionLost)
            .then_some(())
    })
    .await;

    // Schedules keep firing while the controller is gone.
    spawned_count(&runs, "clock", 2).await;
    assert!(runs.spawned_scripts().iter().all(|s| s != "porch"));

    controller.set_available(true);
    wait_subscribed(&controller).await;
    controller.publish_notification(Notification::new("D1", "STATE", Some("0"), "1"));
    spawned_count(&runs, "porch", 1).await;
}

#[tokio::test]
async fn watcher_stops_on_shutdown() {
    let controller = ChannelController::new();
    let (dispatcher, _runs) = dispatcher_with_watcher(&[], &controller);
    wait_subscribed(&controller).await;

    dispatcher.handle.shutdown().await.unwrap();
    with_timeout(dispatcher.join).await.unwrap().unwrap();
    eventually(Duration::from_secs(2), || async {
        (controller.subscriber_count() == 0).then_some(())
    })
    .await;
}

#[tokio::test]
async fn line_controller_streams_notifications_and_answers_gets() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut request = String::new();
            BufReader::new(read).read_line(&mut request).await.unwrap();
            let request: serde_json::Value = serde_json::from_str(&request).unwrap();

            match request["op"].as_str() {
                Some("subscribe") => {
                    let lines = concat!(
                        "{\"device\":\"D1\",\"key\":\"STATE\",\"new\":\"0\"}\n",
                        "not json\n",
                        "{\"device\":\"D1\",\"key\":\"STATE\",\"new\":1}\n",
                    );
                    write.write_all(lines.as_bytes()).await.unwrap();
                }
                Some("get") => {
                    assert_eq!(request["device"], "D9");
                    assert_eq!(request["key"], "TEMP");
                    write.write_all(b"{\"value\":21.5}\n").await.unwrap();
                }
                other => panic!("unexpected op {other:?}"),
            }
        }
    });

    let controller = LineController::new(address);
    let mut rx = with_timeout(controller.subscribe()).await.unwrap();

    let first = with_timeout(rx.recv()).await.unwrap();
    assert_eq!(first, Notification::new("D1", "STATE", None, "0"));
    let second = with_timeout(rx.recv()).await.unwrap();
    assert_eq!(second, Notification::new("D1", "STATE", Some("0"), "1"));
    // The server closed the connection after writing.
    assert!(with_timeout(rx.recv()).await.is_none());

    let value = with_timeout(controller.get_value("D9", "TEMP")).await.unwrap();
    assert_eq!(value.as_deref(), Some("21.5"));
    with_timeout(server).await.unwrap();
}

#[tokio::test]
async fn line_controller_reports_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let controller = LineController::new(address);
    let err = with_timeout(controller.subscribe()).await.unwrap_err();
    assert!(matches!(err, scriptd::errors::ScriptdError::ConnectionLost(_)));
}

#[tokio::test]
async fn line_controller_get_gives_up_on_a_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        // Hold the connection open without ever replying.
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(socket);
    });

    let controller = LineController::new(address).with_request_timeout(Duration::from_millis(200));
    let err = with_timeout(controller.get_value("D1", "STATE")).await.unwrap_err();
    assert!(matches!(err, scriptd::errors::ScriptdError::ConnectionLost(_)));
    server.abort();
}
