//! Request-scoped selection context.
//!
//! Carries what one request needs through backend selection and store
//! calls: its deadline and its backend-level session key. Cancellation
//! beyond the deadline is future drop; every reservation taken during
//! selection is an RAII guard, so a dropped selection releases what it
//! claimed.

use std::time::{Duration, Instant};

use crate::session::SessionKey;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    session: Option<SessionKey>,
}

impl RequestContext {
    /// A context with no deadline and no session.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_session(mut self, session: Option<SessionKey>) -> Self {
        self.session = session;
        self
    }

    pub fn session(&self) -> Option<&SessionKey> {
        self.session.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}
