mod common;

use std::sync::Arc;

use ::common::protocol::{Request, Response};
use mcsman::backup::BackupCoordinator;
use mcsman::monitor::CommandMonitor;
use mcsman::{StatusStore, Supervisor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

use crate::common::{FakeCrash, FakeDriver, FakeQuery, RecordingStore, test_config};

fn monitor(base_dir: &std::path::Path) -> (Arc<CommandMonitor>, Arc<StatusStore>) {
    let cfg = Arc::new(test_config(base_dir));
    let store = Arc::new(StatusStore::empty(base_dir));
    let driver = Arc::new(FakeDriver::obedient());
    let query = Arc::new(FakeQuery::default());
    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        driver.clone(),
        Arc::new(FakeCrash::default()),
        cfg.clone(),
    ));
    let backups = Arc::new(BackupCoordinator::new(
        store.clone(),
        driver.clone(),
        query,
        Arc::new(RecordingStore::default()),
        cfg.clone(),
    ));
    let monitor = Arc::new(CommandMonitor::new(
        supervisor, backups, store.clone(), driver, cfg,
    ));
    (monitor, store)
}

async fn roundtrip(socket: &std::path::Path, request: &str) -> Response {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    serde_json::from_slice(&buf).unwrap()
}

async fn wait_for_socket(socket: &std::path::Path) {
    for _ in 0..100 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("socket {} never appeared", socket.display());
}

#[tokio::test]
async fn serves_server_info_over_local_socket() {
    let base = tempfile::tempdir().unwrap();
    let (monitor, store) = monitor(base.path());
    store.register_server("alpha", 25565).unwrap();
    let socket = base.path().join("manager.sock");

    let token = CancellationToken::new();
    let server = tokio::spawn(monitor.run_local(token.clone()));
    wait_for_socket(&socket).await;

    let response = roundtrip(&socket, "server info").await;
    assert_eq!(response.status, 0);
    assert!(response.message.contains("alpha"));
    assert!(response.message.contains("25565"));

    token.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn answers_each_connection_independently() {
    let base = tempfile::tempdir().unwrap();
    let (monitor, _store) = monitor(base.path());
    let socket = base.path().join("manager.sock");

    let token = CancellationToken::new();
    let server = tokio::spawn(monitor.run_local(token.clone()));
    wait_for_socket(&socket).await;

    let first = roundtrip(&socket, "backup info").await;
    assert_eq!(first.status, 0);

    let second = roundtrip(&socket, "frobnicate everything").await;
    assert_eq!(second.status, 404);

    let third = roundtrip(&socket, "server reboot").await;
    assert_eq!(third.status, 404);

    token.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_backup_payload_is_an_internal_error() {
    let base = tempfile::tempdir().unwrap();
    let (monitor, _store) = monitor(base.path());
    let socket = base.path().join("manager.sock");

    let token = CancellationToken::new();
    let server = tokio::spawn(monitor.run_local(token.clone()));
    wait_for_socket(&socket).await;

    let response = roundtrip(&socket, "backup create {not json").await;
    assert_eq!(response.status, 400);

    token.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn remote_connections_cannot_manage_servers() {
    let base = tempfile::tempdir().unwrap();
    let (monitor, _store) = monitor(base.path());

    let start = monitor
        .dispatch(Request::ServerStart(vec!["alpha".to_string()]), true)
        .await;
    assert_eq!(start.status, 404);

    let stop = monitor
        .dispatch(Request::ServerStop(vec!["alpha".to_string()]), true)
        .await;
    assert_eq!(stop.status, 404);

    let info = monitor.dispatch(Request::ServerInfo, true).await;
    assert_eq!(info.status, 0);
}

#[tokio::test]
async fn local_start_reports_started_servers() {
    let base = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(base.path().join("alpha")).unwrap();
    std::fs::write(
        base.path().join("alpha/server.properties"),
        "server-port=25565\nquery.port=25565\n",
    )
    .unwrap();
    let (monitor, store) = monitor(base.path());

    let response = monitor
        .dispatch(Request::ServerStart(vec!["alpha".to_string()]), false)
        .await;

    assert_eq!(response.status, 0);
    assert!(response.message.contains("alpha"));
    assert!(store.server("alpha").unwrap().should_run);
}

#[tokio::test]
async fn socket_is_removed_on_shutdown() {
    let base = tempfile::tempdir().unwrap();
    let (monitor, _store) = monitor(base.path());
    let socket = base.path().join("manager.sock");

    let token = CancellationToken::new();
    let server = tokio::spawn(monitor.run_local(token.clone()));
    wait_for_socket(&socket).await;

    token.cancel();
    server.await.unwrap().unwrap();

    assert!(!socket.exists());
}
