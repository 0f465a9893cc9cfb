//! One-time codes and pending registrations.
//!
//! Both stores are process-local maps. Every entry carries its own expiry
//! and expired entries are purged on each access, so neither map outlives
//! the codes it serves. A multi-instance deployment would move these to
//! shared TTL storage.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct OtpStore {
    length: u32,
    ttl: Duration,
    entries: Mutex<HashMap<String, OtpEntry>>,
}

struct OtpEntry {
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    NotFound,
    Expired,
    Mismatch,
}

impl VerifyOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "no code issued",
            Self::Expired => "code expired",
            Self::Mismatch => "code mismatch",
        }
    }
}

impl OtpStore {
    pub fn new(length: u32, ttl_minutes: i64) -> Self {
        Self {
            // 4..=9 digits keeps the code space sane and the arithmetic in u64
            length: length.clamp(4, 9),
            ttl: Duration::minutes(ttl_minutes),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a fresh code for `identifier`, replacing any outstanding one.
    pub fn issue(&self, identifier: &str) -> String {
        self.issue_at(identifier, Utc::now())
    }

    fn issue_at(&self, identifier: &str, now: DateTime<Utc>) -> String {
        let code = self.generate();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            identifier.to_string(),
            OtpEntry {
                code: code.clone(),
                expires_at: now + self.ttl,
            },
        );
        code
    }

    /// Single-use check: the entry is removed on success and on detected
    /// expiry. A mismatched code leaves the entry in place for a retry.
    pub fn verify(&self, identifier: &str, code: &str) -> VerifyOutcome {
        self.verify_at(identifier, code, Utc::now())
    }

    fn verify_at(&self, identifier: &str, code: &str, now: DateTime<Utc>) -> VerifyOutcome {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get(identifier) else {
            return VerifyOutcome::NotFound;
        };
        if entry.expires_at <= now {
            entries.remove(identifier);
            return VerifyOutcome::Expired;
        }
        if entry.code != code {
            return VerifyOutcome::Mismatch;
        }
        entries.remove(identifier);
        VerifyOutcome::Ok
    }

    fn generate(&self) -> String {
        let max = 10u64.pow(self.length);
        let value = rand::thread_rng().gen_range(0..max);
        format!("{value:0width$}", width = self.length as usize)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingUser {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
}

pub struct PendingStore {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

struct PendingEntry {
    user: PendingUser,
    expires_at: DateTime<Utc>,
}

impl Default for PendingStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl PendingStore {
    /// Stores a pending registration until `expires_at` (the OTP expiry),
    /// replacing any previous attempt for the same identifier.
    pub fn put(&self, identifier: &str, user: PendingUser, expires_at: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(identifier.to_string(), PendingEntry { user, expires_at });
    }

    /// Removes and returns the pending registration, if still live.
    pub fn take(&self, identifier: &str) -> Option<PendingUser> {
        self.take_at(identifier, Utc::now())
    }

    fn take_at(&self, identifier: &str, now: DateTime<Utc>) -> Option<PendingUser> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.remove(identifier)?;
        (entry.expires_at > now).then_some(entry.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(name: &str) -> PendingUser {
        PendingUser {
            full_name: name.to_string(),
            email: Some(format!("{name}@example.com")),
            phone: None,
            password_hash: "hash".to_string(),
        }
    }

    #[test]
    fn test_issue_verify_roundtrip() {
        let store = OtpStore::new(6, 5);
        let code = store.issue("a@example.com");
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(store.verify("a@example.com", &code), VerifyOutcome::Ok);
        // single-use: gone after a successful check
        assert_eq!(store.verify("a@example.com", &code), VerifyOutcome::NotFound);
    }

    #[test]
    fn test_mismatch_keeps_entry() {
        let store = OtpStore::new(6, 5);
        let code = store.issue("a@example.com");
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert_eq!(store.verify("a@example.com", wrong), VerifyOutcome::Mismatch);
        assert_eq!(store.verify("a@example.com", &code), VerifyOutcome::Ok);
    }

    #[test]
    fn test_expired_code_rejected_and_removed() {
        let store = OtpStore::new(6, 5);
        let code = store.issue_at("a@example.com", Utc::now() - Duration::minutes(10));
        assert_eq!(
            store.verify("a@example.com", &code),
            VerifyOutcome::Expired
        );
        assert_eq!(
            store.verify("a@example.com", &code),
            VerifyOutcome::NotFound
        );
    }

    #[test]
    fn test_issue_purges_expired_entries() {
        let store = OtpStore::new(6, 5);
        let past = Utc::now() - Duration::minutes(10);
        store.issue_at("stale@example.com", past);
        store.issue("fresh@example.com");
        let entries = store.entries.lock().unwrap();
        assert!(!entries.contains_key("stale@example.com"));
        assert!(entries.contains_key("fresh@example.com"));
    }

    #[test]
    fn test_pending_store_honors_expiry() {
        let store = PendingStore::default();
        store.put("a", pending("a"), Utc::now() + Duration::minutes(5));
        assert_eq!(store.take("a"), Some(pending("a")));
        assert_eq!(store.take("a"), None);

        store.put("b", pending("b"), Utc::now() + Duration::minutes(5));
        assert_eq!(
            store.take_at("b", Utc::now() + Duration::minutes(10)),
            None
        );
    }

    #[test]
    fn test_pending_put_purges_expired() {
        let store = PendingStore::default();
        store.put("old", pending("old"), Utc::now() - Duration::minutes(1));
        store.put("new", pending("new"), Utc::now() + Duration::minutes(5));
        let entries = store.entries.lock().unwrap();
        assert!(!entries.contains_key("old"));
        assert!(entries.contains_key("new"));
    }
}
