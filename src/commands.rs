//! Built-in token bucket commands.
//!
//! Each command refills the bucket up to the supplied time before acting, so
//! the stored counters are always current when the grid persists them.

use crate::bucket::{BucketConfiguration, RemoteBucketState};
use crate::command::{Nothing, RemoteCommand};
use crate::error::CommandError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

fn require_positive(tokens: u64) -> Result<(), CommandError> {
    if tokens == 0 {
        return Err(CommandError::InvalidArgs("tokens must be positive".into()));
    }
    Ok(())
}

/// Consume `tokens` if they are all available; returns whether they were.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TryConsume {
    pub tokens: u64,
}

impl RemoteCommand for TryConsume {
    type Output = bool;

    fn label(&self) -> &'static str {
        "try_consume"
    }

    fn execute(&self, state: &mut RemoteBucketState, now_nanos: u64) -> Result<bool, CommandError> {
        require_positive(self.tokens)?;
        state.refill_all(now_nanos);
        if state.available_tokens() < self.tokens {
            return Ok(false);
        }
        state.consume(self.tokens);
        Ok(true)
    }
}

/// Outcome of [`TryConsumeAndReturnRemaining`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConsumptionProbe {
    /// Whether the tokens were taken.
    pub consumed: bool,
    /// Tokens left after the attempt.
    pub remaining_tokens: u64,
    /// Zero when consumed; otherwise time until the request could succeed
    /// (`u64::MAX` when it never can).
    pub nanos_to_wait_for_refill: u64,
}

/// Like [`TryConsume`], but reports remaining tokens and the wait on refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TryConsumeAndReturnRemaining {
    pub tokens: u64,
}

impl RemoteCommand for TryConsumeAndReturnRemaining {
    type Output = ConsumptionProbe;

    fn label(&self) -> &'static str {
        "try_consume_and_return_remaining"
    }

    fn execute(
        &self,
        state: &mut RemoteBucketState,
        now_nanos: u64,
    ) -> Result<ConsumptionProbe, CommandError> {
        require_positive(self.tokens)?;
        state.refill_all(now_nanos);
        let available = state.available_tokens();
        if available < self.tokens {
            return Ok(ConsumptionProbe {
                consumed: false,
                remaining_tokens: available,
                nanos_to_wait_for_refill: state.nanos_to_wait(self.tokens, now_nanos),
            });
        }
        state.consume(self.tokens);
        Ok(ConsumptionProbe {
            consumed: true,
            remaining_tokens: state.available_tokens(),
            nanos_to_wait_for_refill: 0,
        })
    }
}

/// Take everything available, up to `limit`; returns the amount taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConsumeAsMuchAsPossible {
    pub limit: u64,
}

impl ConsumeAsMuchAsPossible {
    pub fn unlimited() -> Self {
        Self { limit: u64::MAX }
    }
}

impl RemoteCommand for ConsumeAsMuchAsPossible {
    type Output = u64;

    fn label(&self) -> &'static str {
        "consume_as_much_as_possible"
    }

    fn execute(&self, state: &mut RemoteBucketState, now_nanos: u64) -> Result<u64, CommandError> {
        state.refill_all(now_nanos);
        let taken = state.available_tokens().min(self.limit);
        if taken > 0 {
            state.consume(taken);
        }
        Ok(taken)
    }
}

/// Return tokens to the bucket, capped at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AddTokens {
    pub tokens: u64,
}

impl RemoteCommand for AddTokens {
    type Output = Nothing;

    fn label(&self) -> &'static str {
        "add_tokens"
    }

    fn execute(&self, state: &mut RemoteBucketState, now_nanos: u64) -> Result<Nothing, CommandError> {
        require_positive(self.tokens)?;
        state.refill_all(now_nanos);
        state.add_tokens(self.tokens);
        Ok(Nothing)
    }
}

/// Read the available tokens after refilling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GetAvailableTokens;

impl RemoteCommand for GetAvailableTokens {
    type Output = u64;

    fn label(&self) -> &'static str {
        "get_available_tokens"
    }

    fn execute(&self, state: &mut RemoteBucketState, now_nanos: u64) -> Result<u64, CommandError> {
        state.refill_all(now_nanos);
        Ok(state.available_tokens())
    }
}

/// Swap the stored configuration in place.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReplaceConfiguration {
    pub configuration: BucketConfiguration,
}

impl RemoteCommand for ReplaceConfiguration {
    type Output = Nothing;

    fn label(&self) -> &'static str {
        "replace_configuration"
    }

    fn execute(&self, state: &mut RemoteBucketState, now_nanos: u64) -> Result<Nothing, CommandError> {
        state.refill_all(now_nanos);
        state.replace_configuration(self.configuration.clone(), now_nanos);
        Ok(Nothing)
    }
}
