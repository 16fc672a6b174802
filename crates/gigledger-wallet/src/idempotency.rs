//! Request idempotency guard: prevents double-posting on client retries.
//!
//! API callers attach an idempotency key to money-moving requests. A key
//! that already succeeded is rejected with
//! [`GigledgerError::DuplicateRequest`] instead of posting the movement a
//! second time.
//!
//! Keys are stored as SHA-256 digests in a bounded set with FIFO eviction so
//! memory usage stays predictable in long-running services.

use std::collections::{HashSet, VecDeque};

use gigledger_types::{GigledgerError, Result};
use sha2::{Digest, Sha256};

type KeyDigest = [u8; 32];

/// Remembers processed request keys.
#[derive(Debug)]
pub struct IdempotencyGuard {
    seen: HashSet<KeyDigest>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<KeyDigest>,
    max_size: usize,
}

impl IdempotencyGuard {
    /// Create a new guard with the given maximum cache size.
    ///
    /// # Panics
    /// Panics if `max_size` is zero.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "IdempotencyGuard max_size must be > 0");
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    fn digest(key: &str) -> KeyDigest {
        let mut hasher = Sha256::new();
        hasher.update(b"gigledger:request:v1:");
        hasher.update(key.as_bytes());
        hasher.finalize().into()
    }

    /// Fail if `key` was already recorded.
    ///
    /// # Errors
    /// Returns [`GigledgerError::DuplicateRequest`].
    pub fn check(&self, key: &str) -> Result<()> {
        if self.seen.contains(&Self::digest(key)) {
            return Err(GigledgerError::DuplicateRequest(key.to_string()));
        }
        Ok(())
    }

    /// Record `key` as processed. Recording an already known key is a no-op.
    pub fn record(&mut self, key: &str) {
        let digest = Self::digest(key);
        if self.seen.contains(&digest) {
            return;
        }

        if self.seen.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(digest);
        self.order.push_back(digest);
        tracing::trace!(key_digest = %hex::encode(&digest[..8]), "Request key recorded");
    }

    /// Check and record in one step.
    pub fn mark_processed(&mut self, key: &str) -> Result<()> {
        self.check(key)?;
        self.record(key);
        Ok(())
    }

    #[must_use]
    pub fn is_processed(&self, key: &str) -> bool {
        self.seen.contains(&Self::digest(key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
