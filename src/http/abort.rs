//! Timeouts and cancellation
//!
//! A `CancellationToken` is the caller's side of an abort signal. An
//! `AbortScope` is the exchange's side: it merges the token with an
//! optional deadline and is consulted by the session between poll slices.

use super::{Error, Result};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Longest a single poll may block before the scope is checked again
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag with an optional reason
///
/// Clones share the same flag. The flag moves from idle to cancelled
/// exactly once; later calls to `cancel` are no-ops.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<OnceLock<Option<String>>>,
}

impl CancellationToken {
    /// Create a new, idle token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel without a reason
    ///
    /// Returns true if this call performed the transition.
    pub fn cancel(&self) -> bool {
        self.state.set(None).is_ok()
    }

    /// Cancel with a reason reported in `Error::Cancelled`
    pub fn cancel_with_reason(&self, reason: impl Into<String>) -> bool {
        self.state.set(Some(reason.into())).is_ok()
    }

    /// Check whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.get().is_some()
    }

    /// Reason given at cancellation, if any
    pub fn reason(&self) -> Option<String> {
        self.state.get().cloned().flatten()
    }
}

#[derive(Debug, Clone)]
enum Fired {
    Timeout,
    Cancelled(Option<String>),
}

/// Per-exchange abort coordinator
///
/// Whichever of the deadline or the token fires first wins; the scope
/// then keeps reporting that same cause.
#[derive(Debug, Clone)]
pub struct AbortScope {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    token: Option<CancellationToken>,
    fired: Option<Fired>,
}

impl AbortScope {
    /// Start a scope; the timer starts now
    pub fn new(timeout: Option<Duration>, token: Option<CancellationToken>) -> Self {
        let timeout = timeout.filter(|t| !t.is_zero());
        AbortScope {
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            token,
            fired: None,
        }
    }

    /// Fail if the deadline passed or the token was cancelled
    pub fn check(&mut self) -> Result<()> {
        if self.fired.is_none() {
            if let Some(token) = &self.token {
                if token.is_cancelled() {
                    self.fired = Some(Fired::Cancelled(token.reason()));
                }
            }
        }
        if self.fired.is_none() {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.fired = Some(Fired::Timeout);
                }
            }
        }

        match &self.fired {
            None => Ok(()),
            Some(Fired::Timeout) => Err(Error::Timeout(self.timeout.unwrap_or_default())),
            Some(Fired::Cancelled(reason)) => Err(Error::Cancelled {
                reason: reason.clone(),
            }),
        }
    }

    /// How long the next poll may block
    pub fn slice(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(POLL_SLICE),
            None => POLL_SLICE,
        }
    }

    /// Time left before the deadline, if one is armed
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Clear the timer and detach from the token once the exchange is done
    pub fn disarm(&mut self) {
        self.deadline = None;
        self.token = None;
    }

    /// Whether a deadline or token is still being observed
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some() || self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_token_cancels_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        assert!(token.cancel_with_reason("first"));
        assert!(!token.cancel_with_reason("second"));
        assert!(!token.cancel());

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("first"));
    }

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), None);
    }

    #[test]
    fn test_scope_reports_cancellation() {
        let token = CancellationToken::new();
        let mut scope = AbortScope::new(None, Some(token.clone()));
        assert!(scope.check().is_ok());

        token.cancel_with_reason("stop");
        match scope.check() {
            Err(Error::Cancelled { reason }) => assert_eq!(reason.as_deref(), Some("stop")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_scope_times_out() {
        let mut scope = AbortScope::new(Some(Duration::from_millis(10)), None);
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(scope.check(), Err(Error::Timeout(_))));
        assert_eq!(scope.slice(), Duration::ZERO);
    }

    #[test]
    fn test_first_cause_wins() {
        let token = CancellationToken::new();
        let mut scope = AbortScope::new(Some(Duration::from_millis(5)), Some(token.clone()));
        thread::sleep(Duration::from_millis(10));
        assert!(matches!(scope.check(), Err(Error::Timeout(_))));

        token.cancel();
        assert!(matches!(scope.check(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_zero_timeout_disabled() {
        let mut scope = AbortScope::new(Some(Duration::ZERO), None);
        assert!(!scope.is_armed());
        assert!(scope.check().is_ok());
        assert_eq!(scope.slice(), POLL_SLICE);
    }

    #[test]
    fn test_disarm_clears_timer() {
        let token = CancellationToken::new();
        let mut scope = AbortScope::new(Some(Duration::from_millis(1)), Some(token.clone()));
        scope.disarm();
        token.cancel();
        thread::sleep(Duration::from_millis(5));
        assert!(scope.check().is_ok());
        assert!(scope.remaining().is_none());
    }
}
