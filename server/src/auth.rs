use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Bearer sessions for the dashboard.
///
/// An empty password digest puts the store in open mode: every request is
/// authorized and login is refused.
pub struct SessionStore {
    password_sha256: String,
    ttl: Duration,
    sessions: Mutex<HashMap<String, DateTime<Utc>>>,
    issued: AtomicU64,
}

impl SessionStore {
    pub fn new(password_sha256: String, ttl_minutes: u64) -> Self {
        Self {
            password_sha256: password_sha256.to_ascii_lowercase(),
            ttl: Duration::minutes(ttl_minutes as i64),
            sessions: Mutex::new(HashMap::new()),
            issued: AtomicU64::new(0),
        }
    }

    pub fn open_mode(&self) -> bool {
        self.password_sha256.is_empty()
    }

    pub fn login(&self, password: &str) -> Option<Session> {
        if self.open_mode() || sha256_hex(password) != self.password_sha256 {
            return None;
        }

        let now = Utc::now();
        let serial = self.issued.fetch_add(1, Ordering::Relaxed);
        let token = sha256_hex(&format!(
            "{}:{}:{}",
            self.password_sha256,
            now.timestamp_micros(),
            serial
        ));
        let expires_at = now + self.ttl;

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, expiry| *expiry > now);
        sessions.insert(token.clone(), expires_at);

        Some(Session { token, expires_at })
    }

    pub fn logout(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(token).is_some()
    }

    pub fn authorized(&self, token: Option<&str>) -> bool {
        if self.open_mode() {
            return true;
        }
        let Some(token) = token else {
            return false;
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(token) {
            Some(expiry) if *expiry > Utc::now() => true,
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_password(password: &str, ttl_minutes: u64) -> SessionStore {
        SessionStore::new(sha256_hex(password), ttl_minutes)
    }

    #[test]
    fn login_requires_the_configured_password() {
        let store = store_with_password("orchid", 60);

        assert!(store.login("wrong").is_none());
        let session = store.login("orchid").unwrap();
        assert!(store.authorized(Some(&session.token)));
        assert!(!store.authorized(Some("forged")));
        assert!(!store.authorized(None));
    }

    #[test]
    fn logout_revokes_the_token() {
        let store = store_with_password("orchid", 60);
        let session = store.login("orchid").unwrap();

        assert!(store.logout(&session.token));
        assert!(!store.logout(&session.token));
        assert!(!store.authorized(Some(&session.token)));
    }

    #[test]
    fn expired_sessions_are_rejected() {
        let store = store_with_password("orchid", 0);
        let session = store.login("orchid").unwrap();
        assert!(!store.authorized(Some(&session.token)));
    }

    #[test]
    fn open_mode_authorizes_everything_and_refuses_login() {
        let store = SessionStore::new(String::new(), 60);

        assert!(store.open_mode());
        assert!(store.authorized(None));
        assert!(store.login("anything").is_none());
    }

    #[test]
    fn tokens_are_unique_per_login() {
        let store = store_with_password("orchid", 60);
        let a = store.login("orchid").unwrap();
        let b = store.login("orchid").unwrap();
        assert_ne!(a.token, b.token);
    }
}
