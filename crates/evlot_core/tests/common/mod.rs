//! Shared helpers for the integration tests.

#![allow(dead_code)]

use evlot_core::{CoordinatorConfig, DispatchConfig, LotteryCoordinator, MemoryGateway};
use evlot_sync::RetryConfig;
use evlot_testkit::TestWorld;
use std::sync::Arc;
use std::time::Duration;

pub fn config() -> CoordinatorConfig {
    CoordinatorConfig::new().with_dispatch(
        DispatchConfig::new()
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
            .with_attempt_timeout(Duration::from_millis(50)),
    )
}

pub fn coordinator(
    world: &TestWorld,
    user: &str,
    gateway: &Arc<MemoryGateway>,
) -> LotteryCoordinator {
    LotteryCoordinator::new(config(), world.store(user), gateway.clone())
}
