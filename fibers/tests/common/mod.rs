#![allow(dead_code)]

use std::time::Duration;

pub const WINDOW: Duration = Duration::from_millis(100);
pub const PAST_WINDOW: Duration = Duration::from_millis(200);
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(500);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(3);
pub const ROUNDS: usize = 5;
pub const ITEMS_MEDIUM: usize = 200;

/// Installs a fmt subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
