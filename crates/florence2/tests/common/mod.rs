//! Common test utilities and fixtures
#![allow(dead_code)]

pub mod fixtures;
pub mod mock_backend;

pub use fixtures::*;
pub use mock_backend::*;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise `env_logger` once per test binary (`RUST_LOG=debug` to see pipeline logs)
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
