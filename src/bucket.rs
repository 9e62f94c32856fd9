//! Bucket data model stored in the grid.
//!
//! A [`RemoteBucketState`] is the whole value kept at a key: the immutable
//! [`BucketConfiguration`] the bucket was created from plus the mutable
//! counters ([`BucketState`]) the token bucket math needs. Every atomic
//! operation replaces it wholesale.

use crate::error::CommandError;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One refill rule: `refill_tokens` are added every `refill_period`, up to `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bandwidth {
    capacity: u64,
    refill_tokens: u64,
    refill_period: Duration,
}

impl Bandwidth {
    /// Create a bandwidth. Validation happens when it is placed in a [`BucketConfiguration`].
    pub fn new(capacity: u64, refill_tokens: u64, refill_period: Duration) -> Self {
        Self { capacity, refill_tokens, refill_period }
    }

    /// Refill the whole capacity once per `period`.
    pub fn simple(capacity: u64, period: Duration) -> Self {
        Self::new(capacity, capacity, period)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_tokens(&self) -> u64 {
        self.refill_tokens
    }

    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    fn period_nanos(&self) -> u128 {
        self.refill_period.as_nanos()
    }

    fn validate(&self) -> Result<(), CommandError> {
        if self.capacity == 0 {
            return Err(CommandError::InvalidConfiguration("capacity must be positive".into()));
        }
        if self.refill_tokens == 0 {
            return Err(CommandError::InvalidConfiguration(
                "refill tokens must be positive".into(),
            ));
        }
        if self.refill_period.is_zero() {
            return Err(CommandError::InvalidConfiguration(
                "refill period must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Immutable description of a bucket's capacity and refill rules.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BucketConfiguration {
    bandwidths: Vec<Bandwidth>,
}

impl BucketConfiguration {
    /// Build a configuration from one or more bandwidths.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` when the list is empty or a bandwidth has a zero field.
    pub fn new(bandwidths: Vec<Bandwidth>) -> Result<Self, CommandError> {
        if bandwidths.is_empty() {
            return Err(CommandError::InvalidConfiguration(
                "at least one bandwidth is required".into(),
            ));
        }
        for bandwidth in &bandwidths {
            bandwidth.validate()?;
        }
        Ok(Self { bandwidths })
    }

    /// Single-bandwidth configuration.
    pub fn single(bandwidth: Bandwidth) -> Result<Self, CommandError> {
        Self::new(vec![bandwidth])
    }

    pub fn bandwidths(&self) -> &[Bandwidth] {
        &self.bandwidths
    }
}

/// Token counter for one bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct BandwidthState {
    tokens: u64,
    last_refill_nanos: u64,
}

impl BandwidthState {
    fn full(bandwidth: &Bandwidth, now_nanos: u64) -> Self {
        Self { tokens: bandwidth.capacity, last_refill_nanos: now_nanos }
    }

    fn refill(&mut self, bandwidth: &Bandwidth, now_nanos: u64) {
        if now_nanos <= self.last_refill_nanos {
            return;
        }
        if self.tokens >= bandwidth.capacity {
            self.last_refill_nanos = now_nanos;
            return;
        }
        let elapsed = u128::from(now_nanos - self.last_refill_nanos);
        let refill_tokens = u128::from(bandwidth.refill_tokens);
        let period = bandwidth.period_nanos();
        let added = elapsed * refill_tokens / period;
        if added == 0 {
            return;
        }
        let missing = u128::from(bandwidth.capacity - self.tokens);
        if added >= missing {
            self.tokens = bandwidth.capacity;
            self.last_refill_nanos = now_nanos;
        } else {
            // Only advance by the time the whole tokens account for; the remainder keeps accruing.
            let consumed_time = added * period / refill_tokens;
            self.tokens += added as u64;
            self.last_refill_nanos += consumed_time as u64;
        }
    }

    fn nanos_to_wait(&self, bandwidth: &Bandwidth, tokens: u64, now_nanos: u64) -> u64 {
        if tokens <= self.tokens {
            return 0;
        }
        if tokens > bandwidth.capacity {
            return u64::MAX;
        }
        let deficit = u128::from(tokens - self.tokens);
        let refill_tokens = u128::from(bandwidth.refill_tokens);
        let period = bandwidth.period_nanos();
        let Some(full_wait) = deficit
            .checked_mul(period)
            .and_then(|scaled| scaled.checked_add(refill_tokens - 1))
            .map(|scaled| scaled / refill_tokens)
        else {
            return u64::MAX;
        };
        let accrued = u128::from(now_nanos.saturating_sub(self.last_refill_nanos));
        u64::try_from(full_wait.saturating_sub(accrued)).unwrap_or(u64::MAX)
    }
}

/// Mutable runtime counters, one per configured bandwidth.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BucketState {
    bandwidths: Vec<BandwidthState>,
}

impl BucketState {
    /// Every bandwidth full, last refilled at `now_nanos`.
    pub fn initial(configuration: &BucketConfiguration, now_nanos: u64) -> Self {
        Self {
            bandwidths: configuration
                .bandwidths
                .iter()
                .map(|bandwidth| BandwidthState::full(bandwidth, now_nanos))
                .collect(),
        }
    }
}

/// The value stored in the grid at a bucket key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteBucketState {
    configuration: BucketConfiguration,
    state: BucketState,
}

impl RemoteBucketState {
    /// Fresh state for a newly initialized key.
    pub fn new(configuration: BucketConfiguration, now_nanos: u64) -> Self {
        let state = BucketState::initial(&configuration, now_nanos);
        Self { configuration, state }
    }

    pub fn configuration(&self) -> &BucketConfiguration {
        &self.configuration
    }

    pub fn state(&self) -> &BucketState {
        &self.state
    }

    /// Bring every bandwidth up to date with `now_nanos`.
    pub fn refill_all(&mut self, now_nanos: u64) {
        for (counter, bandwidth) in self.state.bandwidths.iter_mut().zip(&self.configuration.bandwidths)
        {
            counter.refill(bandwidth, now_nanos);
        }
    }

    /// Tokens available right now; the most restrictive bandwidth wins.
    pub fn available_tokens(&self) -> u64 {
        self.state.bandwidths.iter().map(|counter| counter.tokens).min().unwrap_or(0)
    }

    /// Remove `tokens` from every bandwidth. Callers check availability first.
    pub fn consume(&mut self, tokens: u64) {
        for counter in &mut self.state.bandwidths {
            counter.tokens = counter.tokens.saturating_sub(tokens);
        }
    }

    /// Add tokens to every bandwidth, capped at capacity.
    pub fn add_tokens(&mut self, tokens: u64) {
        for (counter, bandwidth) in self.state.bandwidths.iter_mut().zip(&self.configuration.bandwidths)
        {
            counter.tokens = counter.tokens.saturating_add(tokens).min(bandwidth.capacity);
        }
    }

    /// Time until `tokens` would be available, `u64::MAX` if it exceeds some capacity.
    pub fn nanos_to_wait(&self, tokens: u64, now_nanos: u64) -> u64 {
        self.state
            .bandwidths
            .iter()
            .zip(&self.configuration.bandwidths)
            .map(|(counter, bandwidth)| counter.nanos_to_wait(bandwidth, tokens, now_nanos))
            .max()
            .unwrap_or(0)
    }

    /// Swap the configuration, keeping accumulated tokens where a bandwidth survives.
    ///
    /// Counters are matched by position; surviving ones are clamped to the new
    /// capacity and added ones start full.
    pub fn replace_configuration(&mut self, configuration: BucketConfiguration, now_nanos: u64) {
        let bandwidths = configuration
            .bandwidths
            .iter()
            .enumerate()
            .map(|(index, bandwidth)| match self.state.bandwidths.get(index) {
                Some(previous) => BandwidthState {
                    tokens: previous.tokens.min(bandwidth.capacity),
                    last_refill_nanos: now_nanos,
                },
                None => BandwidthState::full(bandwidth, now_nanos),
            })
            .collect();
        self.configuration = configuration;
        self.state = BucketState { bandwidths };
    }
}
