//! Integration tests for graceful shutdown behavior.

mod common;

use async_trait::async_trait;
use common::{test_settings, MockDcss};
use dcss_dhs::error::DhsResult;
use dcss_dhs::operations::{OperationHandler, OperationReporter, OperationRequest};
use dcss_dhs::server::Dhs;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Announces itself, then runs effectively forever.
struct StuckOperation;

#[async_trait]
impl OperationHandler for StuckOperation {
    async fn execute(
        &self,
        _request: OperationRequest,
        progress: &OperationReporter,
    ) -> DhsResult<Vec<String>> {
        progress.update(vec!["started".to_string()]);
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(vec![])
    }
}

#[tokio::test]
async fn stuck_operations_are_failed_after_the_grace_period() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let port = listener.local_addr().expect("no local addr").port();
    let settings = Arc::new(test_settings(port, Duration::from_millis(300)));
    let mut dhs = Dhs::new(settings).expect("failed to build DHS");
    dhs.define_operation("collect", Arc::new(StuckOperation))
        .expect("define failed");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(dhs.run(async move {
        let _ = stop_rx.await;
    }));

    let mut dcss = MockDcss::accept(&listener).await;
    dcss.send("stoc_send_client_type").await;
    assert_eq!(dcss.expect().await, "htos_client_is_hardware simDHS");
    dcss.send("stoh_register_operation collect").await;

    dcss.send("stoh_start_operation collect 3.1").await;
    dcss.send("stoh_start_operation collect 3.2").await;
    assert_eq!(dcss.expect().await, "htos_operation_update collect 3.1 started");
    assert_eq!(dcss.expect().await, "htos_operation_update collect 3.2 started");

    // both operations are running; ask for shutdown
    let started = std::time::Instant::now();
    stop_tx.send(()).expect("DHS already stopped");

    let mut failed = Vec::new();
    for _ in 0..2 {
        let message = dcss.expect().await;
        assert!(message.contains("shutdown_timeout"), "unexpected: {message}");
        failed.push(message);
    }
    failed.sort();
    assert_eq!(failed[0], "htos_operation_completed collect 3.1 shutdown_timeout");
    assert_eq!(failed[1], "htos_operation_completed collect 3.2 shutdown_timeout");

    server
        .await
        .expect("server task panicked")
        .expect("server returned error");

    // the grace period bounds the shutdown, with some scheduling margin
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn shutdown_with_no_active_operations_is_immediate() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let port = listener.local_addr().expect("no local addr").port();
    let settings = Arc::new(test_settings(port, Duration::from_secs(30)));
    let dhs = Dhs::new(settings).expect("failed to build DHS");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(dhs.run(async move {
        let _ = stop_rx.await;
    }));

    let mut dcss = MockDcss::accept(&listener).await;
    dcss.send("stoc_send_client_type").await;
    assert_eq!(dcss.expect().await, "htos_client_is_hardware simDHS");

    let started = std::time::Instant::now();
    stop_tx.send(()).expect("DHS already stopped");
    server
        .await
        .expect("server task panicked")
        .expect("server returned error");
    // the 30s grace period must not delay an idle shutdown
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn connection_loss_fails_inflight_operations_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let port = listener.local_addr().expect("no local addr").port();
    let settings = Arc::new(test_settings(port, Duration::from_millis(300)));
    let mut dhs = Dhs::new(settings).expect("failed to build DHS");
    dhs.define_operation("collect", Arc::new(StuckOperation))
        .expect("define failed");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(dhs.run(async move {
        let _ = stop_rx.await;
    }));

    let mut dcss = MockDcss::accept(&listener).await;
    dcss.send("stoc_send_client_type").await;
    assert_eq!(dcss.expect().await, "htos_client_is_hardware simDHS");
    dcss.send("stoh_register_operation collect").await;
    dcss.send("stoh_start_operation collect 4.1").await;
    assert_eq!(dcss.expect().await, "htos_operation_update collect 4.1 started");

    // sequencer goes away mid-operation
    drop(dcss);

    // the DHS re-dials and runs a fresh handshake
    let mut dcss = MockDcss::accept(&listener).await;
    dcss.send("stoc_send_client_type").await;
    assert_eq!(dcss.expect().await, "htos_client_is_hardware simDHS");

    // the old instance was failed on disconnect, so its handle is free again
    dcss.send("stoh_register_operation collect").await;
    dcss.send("stoh_start_operation collect 4.1").await;
    assert_eq!(dcss.expect().await, "htos_operation_update collect 4.1 started");

    stop_tx.send(()).expect("DHS already stopped");
    let failure = dcss.expect().await;
    assert!(failure.contains("shutdown_timeout"), "unexpected: {failure}");
    server
        .await
        .expect("server task panicked")
        .expect("server returned error");
}
