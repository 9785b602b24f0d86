//! Termination signals stop the exporter. Kept in its own test binary since
//! it signals the whole process.

#![cfg(unix)]

use fleetwatch_lib::application::shutdown_signal;
use std::process::Command;
use std::time::Duration;

#[tokio::test]
async fn test_sigterm_resolves_shutdown_signal() {
    let waiter = tokio::spawn(shutdown_signal());
    // Let the task install its handler before the signal is sent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    let status = Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("shutdown signal did not resolve")
        .unwrap();
    assert!(result.is_ok());
}
