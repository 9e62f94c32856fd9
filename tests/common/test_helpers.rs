use bucket_grid::{Bandwidth, BucketConfiguration, GridBackend, InMemoryGrid, ManualClock};
use std::time::Duration;

/// `capacity` tokens refilled once per minute; with a frozen clock nothing refills.
#[allow(dead_code)]
pub fn config(capacity: u64) -> BucketConfiguration {
    BucketConfiguration::single(Bandwidth::simple(capacity, Duration::from_secs(60)))
        .expect("valid configuration")
}

/// Synchronous-only backend with a frozen clock.
#[allow(dead_code)]
pub fn sync_backend() -> (GridBackend<String, InMemoryGrid<String>>, InMemoryGrid<String>) {
    let grid = InMemoryGrid::new();
    let backend = GridBackend::builder(grid.clone()).clock(ManualClock::new(0)).build();
    (backend, grid)
}

/// Async-capable backend bound to the current tokio runtime.
#[allow(dead_code)]
pub fn async_backend() -> (GridBackend<String, InMemoryGrid<String>>, InMemoryGrid<String>) {
    let grid = InMemoryGrid::with_runtime(tokio::runtime::Handle::current());
    let backend = GridBackend::builder(grid.clone()).clock(ManualClock::new(0)).build();
    (backend, grid)
}
