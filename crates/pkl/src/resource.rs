use std::time::{Duration, Instant};

use crate::error::{EvalError, EvalResult};

/// How many expression steps pass between deadline checks.
///
/// `Instant::now()` is not free; checking on a counter keeps the hot
/// evaluation path cheap while bounding how far past the deadline an
/// evaluation can run.
const STEP_CHECK_INTERVAL: u32 = 1024;

/// Enforces the evaluation deadline shared by an evaluator's lifetime.
///
/// The deadline is checked at every `STEP_CHECK_INTERVAL`-th expression
/// step and at every I/O suspension point (module load, package fetch,
/// resource read, external-reader round-trip).
#[derive(Debug, Clone)]
pub struct EvalLimits {
    deadline: Option<Instant>,
    steps: u32,
}

impl EvalLimits {
    /// Limits with no deadline; evaluation runs until completion.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            steps: 0,
        }
    }

    /// Limits with a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            steps: 0,
        }
    }

    /// The absolute deadline, if one is configured.
    ///
    /// I/O layers use this to derive per-request timeouts.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining time until the deadline.
    ///
    /// Returns an error if the deadline has already passed.
    pub fn remaining(&self) -> EvalResult<Option<Duration>> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    Err(EvalError::timed_out())
                } else {
                    Ok(Some(deadline - now))
                }
            }
        }
    }

    /// Called once per expression evaluation step.
    #[inline]
    pub fn on_step(&mut self) -> EvalResult<()> {
        self.steps = self.steps.wrapping_add(1);
        if self.steps % STEP_CHECK_INTERVAL == 0 {
            self.check_deadline()?;
        }
        Ok(())
    }

    /// Called at every I/O suspension point.
    pub fn check_deadline(&self) -> EvalResult<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EvalError::timed_out());
            }
        }
        Ok(())
    }
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self::unlimited()
    }
}
