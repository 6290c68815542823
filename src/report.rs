//! Write outcomes and failure reporting
//!
//! Chunk writes never fail the caller: a save that cannot be completed is
//! logged, handed to a `WriteReporter`, and described by the returned
//! `WriteOutcome`. Reads, by contrast, return their errors directly.

use crate::error::RegionError;
use crate::position::ChunkPos;

/// What happened to one `RegionStorage::write` call
#[derive(Debug)]
pub enum WriteOutcome {
    /// Document stored after `attempts` tries
    Saved { attempts: u32 },
    /// Slot emptied
    Cleared,
    /// Clearing a chunk whose region was never written; nothing to do
    NothingToClear,
    /// Non-retryable failure after a single attempt. For `SizeExceeded` the
    /// slot has been cleared.
    Rejected(RegionError),
    /// Every attempt failed with a retryable error; `error` is the last one
    FailedAfterRetries { attempts: u32, error: RegionError },
    /// The region container could not be opened
    Unavailable(RegionError),
}

impl WriteOutcome {
    /// Whether the requested state (stored or cleared) was reached
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            WriteOutcome::Saved { .. } | WriteOutcome::Cleared | WriteOutcome::NothingToClear
        )
    }

    pub fn error(&self) -> Option<&RegionError> {
        match self {
            WriteOutcome::Rejected(e)
            | WriteOutcome::FailedAfterRetries { error: e, .. }
            | WriteOutcome::Unavailable(e) => Some(e),
            _ => None,
        }
    }
}

/// Hook receiving every write failure that is not propagated to the caller
pub trait WriteReporter: Send + Sync {
    fn report(&self, pos: ChunkPos, error: &RegionError);
}

impl<F> WriteReporter for F
where
    F: Fn(ChunkPos, &RegionError) + Send + Sync,
{
    fn report(&self, pos: ChunkPos, error: &RegionError) {
        self(pos, error)
    }
}

/// Reporter that drops reports; failures still reach the log
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl WriteReporter for SilentReporter {
    fn report(&self, _pos: ChunkPos, _error: &RegionError) {}
}
