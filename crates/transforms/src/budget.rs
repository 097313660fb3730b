use crate::{Error, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation shared by every worker of one obfuscation run.
#[derive(Debug, Clone, Default)]
pub struct MeshBudget {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl MeshBudget {
    pub fn new(timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    /// A budget that never runs out.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Fails once the run is cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
