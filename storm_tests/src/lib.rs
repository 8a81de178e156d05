//! Helpers shared by the socket-level integration tests.

use std::time::Duration;

use storm_shared::config::ServerConfig;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Fast, deterministic server settings for tests.
pub fn test_server_config(broadcast_interval_ms: u64, jitter_max: f32) -> ServerConfig {
    ServerConfig {
        broadcast_interval_ms,
        jitter_max,
        write_timeout_ms: 200,
        seed: Some(7),
        ..Default::default()
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
