//! Failed-login throttling.
//!
//! Sliding window per normalized email: once `max_attempts` failures fall
//! inside the last `window_ms`, further attempts are refused until the
//! oldest failure ages out. A successful login clears the window.
//!
//! At most `max_tracked` emails are kept. Aged-out windows are dropped by
//! [`LoginThrottle::purge`]; past the cap the stalest window is evicted.

use std::collections::{HashMap, VecDeque};

use gigledger_types::{GigledgerError, Result, constants, normalize_email};

#[derive(Debug)]
pub struct LoginThrottle {
    /// `email → timestamps of recent failures` (monotonically increasing)
    failures: HashMap<String, VecDeque<u64>>,
    window_ms: u64,
    max_attempts: usize,
    max_tracked: usize,
}

impl LoginThrottle {
    #[must_use]
    pub fn new(window_ms: u64, max_attempts: usize) -> Self {
        Self {
            failures: HashMap::new(),
            window_ms,
            max_attempts,
            max_tracked: constants::MAX_THROTTLED_EMAILS,
        }
    }

    /// Cap on tracked emails (at least one).
    #[must_use]
    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked.max(1);
        self
    }

    fn prune(window: &mut VecDeque<u64>, cutoff: u64) {
        while let Some(&front) = window.front() {
            if front < cutoff {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Refuse the attempt if the window is full.
    ///
    /// # Errors
    /// `TooManyAttempts`.
    pub fn check(&mut self, email: &str, now_ms: u64) -> Result<()> {
        let key = normalize_email(email);
        let Some(window) = self.failures.get_mut(&key) else {
            return Ok(());
        };
        Self::prune(window, now_ms.saturating_sub(self.window_ms));
        if window.len() >= self.max_attempts {
            tracing::warn!(email = %key, attempts = window.len(), "Login throttled");
            return Err(GigledgerError::TooManyAttempts {
                attempts: window.len(),
                window_ms: self.window_ms,
            });
        }
        if window.is_empty() {
            self.failures.remove(&key);
        }
        Ok(())
    }

    pub fn record_failure(&mut self, email: &str, now_ms: u64) {
        let key = normalize_email(email);
        if !self.failures.contains_key(&key) && self.failures.len() >= self.max_tracked {
            self.purge(now_ms);
            if self.failures.len() >= self.max_tracked {
                self.evict_stalest();
            }
        }
        let window = self.failures.entry(key).or_default();
        Self::prune(window, now_ms.saturating_sub(self.window_ms));
        window.push_back(now_ms);
    }

    /// Drop windows whose failures have all aged out. Returns how many.
    pub fn purge(&mut self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let before = self.failures.len();
        self.failures.retain(|_, window| {
            Self::prune(window, cutoff);
            !window.is_empty()
        });
        before - self.failures.len()
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .failures
            .iter()
            .min_by_key(|(_, window)| window.back().copied().unwrap_or(0))
            .map(|(key, _)| key.clone());
        if let Some(key) = stalest {
            tracing::debug!(email = %key, "Throttle window evicted");
            self.failures.remove(&key);
        }
    }

    /// Number of emails with a failure window.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.failures.len()
    }

    pub fn reset(&mut self, email: &str) {
        self.failures.remove(&normalize_email(email));
    }

    /// Failures currently counted against `email`.
    #[must_use]
    pub fn failures(&self, email: &str) -> usize {
        self.failures
            .get(&normalize_email(email))
            .map_or(0, VecDeque::len)
    }
}
