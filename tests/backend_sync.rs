mod common;

use bucket_grid::commands::{GetAvailableTokens, TryConsume, TryConsumeAndReturnRemaining};
use bucket_grid::{
    Backend, BackendError, BucketStateStore, CommandError, CommandResult, RemoteBucketState,
    RemoteCommand,
};
use common::test_helpers::{config, sync_backend};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[test]
fn init_and_execute_on_absent_key_consumes_and_keeps_configuration() {
    let (backend, _) = sync_backend();
    let key = "user-42".to_string();

    let probe = backend
        .create_initial_state_and_execute(&key, config(10), TryConsumeAndReturnRemaining { tokens: 3 })
        .unwrap();

    assert!(probe.consumed);
    assert_eq!(probe.remaining_tokens, 7);
    assert_eq!(backend.get_configuration(&key).unwrap(), Some(config(10)));
}

#[test]
fn initialization_is_idempotent() {
    let (backend, grid) = sync_backend();
    let key = "k".to_string();

    backend.create_initial_state(&key, config(10)).unwrap();
    backend.execute(&key, TryConsume { tokens: 4 }).unwrap();
    let after_first = grid.get(&key).unwrap();

    backend.create_initial_state(&key, config(99)).unwrap();
    assert_eq!(grid.get(&key).unwrap(), after_first);
    assert_eq!(backend.get_configuration(&key).unwrap(), Some(config(10)));
}

#[test]
fn get_configuration_is_empty_until_initialized() {
    let (backend, _) = sync_backend();
    let key = "fresh".to_string();
    assert_eq!(backend.get_configuration(&key).unwrap(), None);
    backend.create_initial_state(&key, config(5)).unwrap();
    assert_eq!(backend.get_configuration(&key).unwrap(), Some(config(5)));
}

#[test]
fn execute_on_absent_key_leaves_it_absent() {
    let (backend, grid) = sync_backend();
    let key = "ghost".to_string();
    let result = backend.execute(&key, TryConsume { tokens: 1 }).unwrap();
    assert_eq!(result, CommandResult::BucketNotFound);
    assert!(result.into_data(&key).unwrap_err().is_missing_state());
    assert_eq!(grid.get(&key).unwrap(), None);
}

#[test]
fn fused_init_matches_init_then_execute() {
    let (fused, fused_grid) = sync_backend();
    let (split, split_grid) = sync_backend();
    let key = "k".to_string();

    let fused_result = fused
        .create_initial_state_and_execute(&key, config(10), TryConsume { tokens: 6 })
        .unwrap();
    split.create_initial_state(&key, config(10)).unwrap();
    let split_result = split.execute(&key, TryConsume { tokens: 6 }).unwrap();

    assert_eq!(CommandResult::Success(fused_result), split_result);
    assert_eq!(fused_grid.get(&key).unwrap(), split_grid.get(&key).unwrap());
}

#[test]
fn readers_never_observe_state_before_the_first_command() {
    let (backend, grid) = sync_backend();
    let key = "k".to_string();
    let stop = Arc::new(AtomicBool::new(false));
    let observed_intermediate = Arc::new(AtomicBool::new(false));

    let reader = {
        let grid = grid.clone();
        let key = key.clone();
        let stop = stop.clone();
        let observed = observed_intermediate.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if let Some(state) = grid.get(&key).unwrap() {
                    if state.available_tokens() != 7 {
                        observed.store(true, Ordering::SeqCst);
                    }
                }
            }
        })
    };

    backend.create_initial_state_and_execute(&key, config(10), TryConsume { tokens: 3 }).unwrap();
    stop.store(true, Ordering::SeqCst);
    reader.join().unwrap();

    assert!(!observed_intermediate.load(Ordering::SeqCst));
    assert_eq!(grid.get(&key).unwrap().unwrap().available_tokens(), 7);
}

#[test]
fn concurrent_executes_are_linearized() {
    let (backend, _) = sync_backend();
    let key = "shared".to_string();
    backend.create_initial_state(&key, config(100)).unwrap();
    let granted = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let backend = backend.clone();
            let key = key.clone();
            let granted = granted.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    if backend.execute(&key, TryConsume { tokens: 1 }).unwrap()
                        == CommandResult::Success(true)
                    {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(granted.load(Ordering::SeqCst), 100, "exactly the capacity is handed out");
    assert_eq!(backend.execute(&key, GetAvailableTokens).unwrap(), CommandResult::Success(0));
}

#[test]
fn two_large_consumers_never_double_spend() {
    let (backend, _) = sync_backend();
    let key = "k".to_string();
    backend.create_initial_state(&key, config(10)).unwrap();

    let racers: Vec<_> = (0..2)
        .map(|_| {
            let backend = backend.clone();
            let key = key.clone();
            std::thread::spawn(move || backend.execute(&key, TryConsume { tokens: 6 }).unwrap())
        })
        .collect();
    let outcomes: Vec<_> = racers.into_iter().map(|racer| racer.join().unwrap()).collect();

    let granted = outcomes.iter().filter(|o| **o == CommandResult::Success(true)).count();
    assert_eq!(granted, 1);
    assert_eq!(backend.execute(&key, GetAvailableTokens).unwrap(), CommandResult::Success(4));
}

#[test]
fn store_failures_are_surfaced_not_retried() {
    let (backend, grid) = sync_backend();
    let key = "k".to_string();
    backend.create_initial_state(&key, config(10)).unwrap();

    grid.fail_next_with("partition unavailable");
    let err = backend.execute(&key, TryConsume { tokens: 1 }).unwrap_err();
    assert!(err.is_state_access());

    // The failed call left the bucket untouched and the next call goes through.
    assert_eq!(backend.execute(&key, GetAvailableTokens).unwrap(), CommandResult::Success(10));
}

#[test]
fn command_failures_leave_state_unchanged() {
    let (backend, grid) = sync_backend();
    let key = "k".to_string();
    backend.create_initial_state(&key, config(10)).unwrap();
    let before = grid.get(&key).unwrap();

    let err = backend.execute(&key, TryConsume { tokens: 0 }).unwrap_err();
    assert!(matches!(err, BackendError::CommandExecution { label: "try_consume", .. }));
    assert_eq!(grid.get(&key).unwrap(), before);
}

#[test]
fn fused_init_failure_creates_nothing() {
    let (backend, grid) = sync_backend();
    let key = "k".to_string();
    let err = backend
        .create_initial_state_and_execute(&key, config(10), TryConsume { tokens: 0 })
        .unwrap_err();
    assert!(err.is_command_execution());
    assert_eq!(grid.get(&key).unwrap(), None);
    assert_eq!(backend.get_configuration(&key).unwrap(), None);
}

#[test]
fn misses_on_absent_keys_leave_no_entries_behind() {
    let (backend, grid) = sync_backend();
    for i in 0..100 {
        let key = format!("ghost-{i}");
        let result = backend.execute(&key, TryConsume { tokens: 1 }).unwrap();
        assert!(result.is_bucket_not_found());
        backend
            .create_initial_state_and_execute(&key, config(10), TryConsume { tokens: 0 })
            .unwrap_err();
    }
    assert!(grid.is_empty());

    backend.create_initial_state(&"real".to_string(), config(10)).unwrap();
    assert_eq!(grid.len(), 1);
}

/// Drains the bucket, then panics before returning.
#[derive(Debug)]
struct DrainThenPanic;

impl RemoteCommand for DrainThenPanic {
    type Output = ();

    fn label(&self) -> &'static str {
        "drain_then_panic"
    }

    fn execute(&self, state: &mut RemoteBucketState, _now_nanos: u64) -> Result<(), CommandError> {
        state.consume(state.available_tokens());
        panic!("command blew up");
    }
}

#[test]
fn panicking_command_does_not_lock_out_the_key() {
    let (backend, grid) = sync_backend();
    let key = "k".to_string();
    backend.create_initial_state(&key, config(10)).unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.execute(&key, DrainThenPanic)));
    assert!(outcome.is_err());

    // The half-finished copy was discarded; the stored bucket is intact and usable.
    assert_eq!(grid.get(&key).unwrap().map(|state| state.available_tokens()), Some(10));
    assert_eq!(backend.execute(&key, TryConsume { tokens: 3 }).unwrap(), CommandResult::Success(true));
    assert_eq!(backend.execute(&key, GetAvailableTokens).unwrap(), CommandResult::Success(7));
}

#[test]
fn panicking_fused_init_leaves_the_grid_usable() {
    let (backend, grid) = sync_backend();
    let key = "fresh".to_string();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        backend.create_initial_state_and_execute(&key, config(10), DrainThenPanic)
    }));
    assert!(outcome.is_err());

    assert_eq!(grid.get(&key).unwrap(), None);
    let tokens = backend.create_initial_state_and_execute(&key, config(10), GetAvailableTokens).unwrap();
    assert_eq!(tokens, 10);
    assert_eq!(backend.get_configuration(&"other".to_string()).unwrap(), None);
}
