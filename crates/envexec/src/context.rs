//! Cancellation and deadline handling threaded through every phase.
//!
//! A [`Context`] is passed by reference into each suspension point (file
//! open, byte copy, backend run, output collection). Those points call
//! [`Context::check`] and stop with a [`ContextError`] once the context is
//! cancelled or its deadline has passed.

use miette::Diagnostic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, Diagnostic)]
pub enum ContextError {
    #[error("context cancelled")]
    #[diagnostic(code(envexec::context::cancelled))]
    Cancelled,
    #[error("context deadline exceeded")]
    #[diagnostic(
        code(envexec::context::deadline_exceeded),
        help("raise the caller deadline or the command time limit")
    )]
    DeadlineExceeded,
}

/// Shareable cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation token plus an optional deadline.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancelToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that observes `token`.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    /// Derive a context with `deadline`. An earlier existing deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancellation is reported before an elapsed deadline.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.token.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
