//! Server-side session registry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use gigledger_types::{AuthSource, GigledgerError, Result, Session, SessionId, UserId};

/// Live and revoked sessions, keyed by id.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
    ttl: Duration,
}

impl SessionStore {
    /// # Errors
    /// `Configuration` unless `ttl_secs` is positive and representable.
    pub fn new(ttl_secs: i64) -> Result<Self> {
        let ttl = Duration::try_seconds(ttl_secs)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| {
                GigledgerError::Configuration(format!("session ttl of {ttl_secs}s is out of range"))
            })?;
        Ok(Self {
            sessions: HashMap::new(),
            ttl,
        })
    }

    /// Open a session for `user` starting at `now`.
    ///
    /// # Errors
    /// `Configuration` if the expiry does not fit in a timestamp.
    pub fn issue(
        &mut self,
        user: UserId,
        source: AuthSource,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let expires_at = now.checked_add_signed(self.ttl).ok_or_else(|| {
            GigledgerError::Configuration(format!(
                "session ttl of {}s overflows the clock",
                self.ttl.num_seconds()
            ))
        })?;
        let session = Session {
            id: SessionId::new(),
            user_id: user,
            source,
            created_at: now,
            expires_at,
            revoked: false,
        };
        self.sessions.insert(session.id, session.clone());
        tracing::debug!(
            session = %session.id,
            user = %user,
            source = %session.source,
            "Session issued"
        );
        Ok(session)
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// The live session `id` belonging to `user`.
    ///
    /// # Errors
    /// `SessionRevoked` if unknown, revoked or owned by someone else;
    /// `TokenExpired` once it has expired.
    pub fn validate(&self, id: SessionId, user: UserId, now: DateTime<Utc>) -> Result<&Session> {
        let session = self
            .sessions
            .get(&id)
            .filter(|s| s.user_id == user && !s.revoked)
            .ok_or(GigledgerError::SessionRevoked)?;
        if session.is_expired(now) {
            return Err(GigledgerError::TokenExpired);
        }
        Ok(session)
    }

    /// Returns whether a live session was revoked.
    pub fn revoke(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                tracing::debug!(session = %id, user = %session.user_id, "Session revoked");
                true
            }
            _ => false,
        }
    }

    /// Revoke every session of `user`. Returns how many were live.
    pub fn revoke_all_for(&mut self, user: UserId) -> usize {
        let mut revoked = 0;
        for session in self.sessions.values_mut() {
            if session.user_id == user && !session.revoked {
                session.revoked = true;
                revoked += 1;
            }
        }
        if revoked > 0 {
            tracing::info!(user = %user, revoked, "All sessions revoked");
        }
        revoked
    }

    /// Drop expired and revoked sessions. Returns how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.is_live(now));
        before - self.sessions.len()
    }

    /// Live sessions of `user`.
    #[must_use]
    pub fn live_for(&self, user: UserId, now: DateTime<Utc>) -> Vec<&Session> {
        self.sessions
            .values()
            .filter(|s| s.user_id == user && s.is_live(now))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
