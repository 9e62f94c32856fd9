#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucket-grid
//!
//! Atomic remote command execution for token buckets kept in a distributed
//! key-value grid. Many processes share a bucket by shipping commands to the
//! grid node that owns its key; the grid applies each command atomically and
//! hands the result back, synchronously or as a future.
//!
//! ## Features
//!
//! - **Execution backend** with sync and async variants of every mutating call
//! - **Fused init-and-execute**: creating a bucket and its first command are one atomic step
//! - **Pluggable stores** behind [`BucketStateStore`]; [`InMemoryGrid`] included
//! - **Callback-to-future bridge** that resolves exactly once
//! - **tower integration** so timeouts and retries can be layered by callers
//!
//! ## Quick Start
//!
//! ```rust
//! use bucket_grid::{Backend, Bandwidth, BucketConfiguration, GridBackend, InMemoryGrid};
//! use bucket_grid::commands::TryConsumeAndReturnRemaining;
//! use std::time::Duration;
//!
//! let backend = GridBackend::new(InMemoryGrid::<String>::new());
//! let configuration =
//!     BucketConfiguration::single(Bandwidth::simple(10, Duration::from_secs(60))).unwrap();
//!
//! let probe = backend
//!     .create_initial_state_and_execute(
//!         &"user-42".to_string(),
//!         configuration,
//!         TryConsumeAndReturnRemaining { tokens: 3 },
//!     )
//!     .unwrap();
//! assert!(probe.consumed);
//! assert_eq!(probe.remaining_tokens, 7);
//! ```

pub mod backend;
pub mod bucket;
pub mod clock;
pub mod command;
pub mod commands;
pub mod error;
pub mod future;
pub mod mutator;
pub mod service;
pub mod store;

// Re-exports
pub use backend::{Backend, GridBackend, GridBackendBuilder};
pub use bucket::{Bandwidth, BucketConfiguration, RemoteBucketState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandResult, Nothing, RemoteCommand};
pub use error::{BackendError, CommandError};
pub use future::{CommandFuture, CompletionCallback, DataFuture};
pub use mutator::{EntryMutator, EntryProcessor, ProcessedEntry};
pub use store::{BucketStateStore, ExecutionCallback, InMemoryGrid};
