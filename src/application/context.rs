use std::time::Duration;

use tokio::time::Instant;

/// Per-call context handed to every ledger operation.
///
/// Carries the deadline by which the operation must finish, including any
/// time spent waiting for a wallet lock or a pooled connection. Dropping the
/// operation's future cancels it the same way an expired deadline does.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
}

impl OpContext {
    /// No caller-imposed deadline; the service default applies.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The earlier of this context's deadline and `now + fallback`.
    pub(crate) fn effective_deadline(&self, fallback: Duration) -> Instant {
        let default = Instant::now() + fallback;
        match self.deadline {
            Some(deadline) => deadline.min(default),
            None => default,
        }
    }
}
