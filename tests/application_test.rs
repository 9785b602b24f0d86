//! Application lifecycle with fake collaborators.

mod common;

use async_trait::async_trait;
use common::*;
use fleetwatch_lib::application::build_sinks;
use fleetwatch_lib::core::{ConfigBuilder, ExporterError, Result};
use fleetwatch_lib::leader::LeaderGate;
use fleetwatch_lib::Application;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Grants leadership, then loses it after `hold`.
struct ExpiringLeader {
    hold: Duration,
    acquired: AtomicBool,
}

#[async_trait]
impl LeaderGate for ExpiringLeader {
    async fn acquire(&self) -> Result<()> {
        self.acquired.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn lost(&self) {
        tokio::time::sleep(self.hold).await;
    }
}

fn leader(hold: Duration) -> Arc<ExpiringLeader> {
    Arc::new(ExpiringLeader {
        hold,
        acquired: AtomicBool::new(false),
    })
}

fn debug_config() -> fleetwatch_lib::Config {
    ConfigBuilder::new()
        .debug(true)
        .update_frequency(Duration::from_secs(60))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_losing_leadership_stops_the_application() {
    let platform = FakePlatform::new(vec![workload("g1", 2)]);
    let transport = FakeTransport::new();
    let leader = leader(Duration::from_secs(5));

    let app = Application::with_collaborators(
        debug_config(),
        platform.clone(),
        transport.clone(),
        leader.clone(),
    );
    let err = app.run().await.unwrap_err();

    assert!(matches!(err, ExporterError::LeaderLost));
    assert!(leader.acquired.load(Ordering::SeqCst));
    assert_eq!(platform.auth_calls(), 1);
    assert_eq!(transport.subscriptions("g1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_discovery_error_stops_the_application() {
    let platform = FakePlatform::new(vec![workload("g1", 1)]);
    platform.fail_next_list(ExporterError::discovery("GET /v2/apps returned 500"));

    let app = Application::with_collaborators(
        debug_config(),
        platform,
        FakeTransport::new(),
        leader(Duration::from_secs(3600)),
    );
    let err = app.run().await.unwrap_err();

    assert_eq!(err.category(), "discovery");
}

#[tokio::test]
async fn test_sinks_follow_configuration() {
    let (sinks, server) = build_sinks(&debug_config()).unwrap();
    let names: Vec<&str> = sinks.iter().map(|sink| sink.name()).collect();
    assert_eq!(names, vec!["debug"]);
    assert!(server.is_none());

    let config = ConfigBuilder::new()
        .statsd_endpoint("127.0.0.1:8125")
        .prometheus("127.0.0.1:0".parse().unwrap())
        .build()
        .unwrap();
    let (sinks, server) = build_sinks(&config).unwrap();
    let names: Vec<&str> = sinks.iter().map(|sink| sink.name()).collect();
    assert_eq!(names, vec!["statsd", "prometheus"]);
    server.unwrap().abort();
}
