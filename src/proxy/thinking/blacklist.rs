//! Per-session blacklist of thinking signatures the upstream rejected.
//!
//! Sessions are sharded across a `DashMap`; each session owns its own
//! `RwLock`ed entry set, so traffic in one conversation never waits on
//! another. Entries expire after [`INVALID_SIGNATURE_TTL`] and are swept by a
//! background task every [`SWEEP_INTERVAL`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// How long a rejected signature stays blacklisted.
pub const INVALID_SIGNATURE_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// How often expired entries and empty sessions are purged.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

type SessionEntries = RwLock<HashMap<String, Instant>>;

/// Shared handle to the blacklist. Cloning is cheap; all clones see the
/// same entries.
///
/// Construct one per process and hand it to every [`SignatureRecovery`].
/// Tests build a fresh instance each.
///
/// [`SignatureRecovery`]: super::SignatureRecovery
#[derive(Clone)]
pub struct SignatureBlacklist {
    inner: Arc<BlacklistInner>,
}

struct BlacklistInner {
    sessions: DashMap<String, SessionEntries>,
    ttl: Duration,
    sweep_interval: Duration,
    sweeper_started: AtomicBool,
    shutdown: CancellationToken,
}

impl Default for SignatureBlacklist {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureBlacklist {
    pub fn new() -> Self {
        Self::with_timings(INVALID_SIGNATURE_TTL, SWEEP_INTERVAL)
    }

    /// Blacklist with custom expiry and sweep cadence.
    pub fn with_timings(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            inner: Arc::new(BlacklistInner {
                sessions: DashMap::new(),
                ttl,
                sweep_interval,
                sweeper_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Mark `signature` invalid for `session_id`, refreshing its timestamp if
    /// it is already present. No-op when either argument is empty.
    pub fn record(&self, session_id: &str, signature: &str) {
        if session_id.is_empty() || signature.is_empty() {
            return;
        }
        self.ensure_sweeper();

        // Either guard is held across the insert so a concurrent sweep
        // cannot drop the partition between lookup and write. Existing
        // sessions only take the shard's read lock.
        match self.inner.sessions.get(session_id) {
            Some(entries) => {
                entries.write().insert(signature.to_string(), Instant::now());
            }
            None => {
                let entries = self.inner.sessions.entry(session_id.to_string()).or_default();
                entries.write().insert(signature.to_string(), Instant::now());
            }
        }

        tracing::debug!(
            session = %short(session_id),
            signature = %short(signature),
            signature_len = signature.len(),
            "Blacklisted thinking signature"
        );
    }

    /// True iff an unexpired entry exists. Always false for empty arguments.
    pub fn is_blacklisted(&self, session_id: &str, signature: &str) -> bool {
        self.is_blacklisted_at(session_id, signature, Instant::now())
    }

    fn is_blacklisted_at(&self, session_id: &str, signature: &str, now: Instant) -> bool {
        if session_id.is_empty() || signature.is_empty() {
            return false;
        }
        let Some(entries) = self.inner.sessions.get(session_id) else {
            return false;
        };
        let recorded = entries.read().get(signature).copied();
        recorded.is_some_and(|at| now.saturating_duration_since(at) <= self.inner.ttl)
    }

    /// Remove every entry for `session_id`. An empty id clears all sessions.
    pub fn clear(&self, session_id: &str) {
        if session_id.is_empty() {
            self.clear_all();
        } else {
            self.inner.sessions.remove(session_id);
        }
    }

    /// Remove every entry for every session.
    pub fn clear_all(&self) {
        self.inner.sessions.clear();
    }

    /// Number of sessions that currently hold at least one entry.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Run one sweep pass now. Returns the number of signatures removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired_at(Instant::now())
    }

    /// Stop the background sweep. Entries remain readable.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Start the sweeper on first use. Without a tokio runtime the start is
    /// deferred to the next write that happens inside one.
    fn ensure_sweeper(&self) {
        if self.inner.sweeper_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.sweeper_started.store(false, Ordering::Release);
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let interval = self.inner.sweep_interval;
        handle.spawn(run_sweeper(weak, shutdown, interval));
    }
}

impl BlacklistInner {
    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        let mut empty_sessions = Vec::new();

        // Snapshot the keys so no shard guard outlives a single session's
        // rewrite.
        let keys: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();

        for key in keys {
            let Some(session) = self.sessions.get(&key) else {
                continue;
            };
            let mut entries = session.write();
            let before = entries.len();
            entries.retain(|_, at| now.saturating_duration_since(*at) <= self.ttl);
            removed += before - entries.len();
            if entries.is_empty() {
                empty_sessions.push(key);
            }
        }

        // Re-checked under the shard lock: a writer may have refilled the
        // partition since the pass above.
        for key in empty_sessions {
            self.sessions
                .remove_if(&key, |_, entries| entries.read().is_empty());
        }

        removed
    }
}

impl Drop for BlacklistInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_sweeper(inner: Weak<BlacklistInner>, shutdown: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let removed = inner.purge_expired_at(Instant::now());
                if removed > 0 {
                    tracing::debug!(
                        removed,
                        sessions = inner.sessions.len(),
                        "Purged expired thinking signatures"
                    );
                }
            }
        }
    }
}

/// Log-safe prefix of an opaque token.
pub(crate) fn short(value: &str) -> &str {
    let end = value
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_lookup() {
        let blacklist = SignatureBlacklist::new();
        blacklist.record("session-a", "sig-1");

        assert!(blacklist.is_blacklisted("session-a", "sig-1"));
        assert!(!blacklist.is_blacklisted("session-a", "sig-2"));
        assert!(!blacklist.is_blacklisted("session-b", "sig-1"));
    }

    #[test]
    fn empty_arguments_are_ignored() {
        let blacklist = SignatureBlacklist::new();
        blacklist.record("", "sig");
        blacklist.record("session", "");

        assert_eq!(blacklist.session_count(), 0);
        assert!(!blacklist.is_blacklisted("", "sig"));
        assert!(!blacklist.is_blacklisted("session", ""));
        assert!(!blacklist.is_blacklisted("", ""));
    }

    #[test]
    fn clear_session_removes_all_its_entries() {
        let blacklist = SignatureBlacklist::new();
        blacklist.record("session-a", "sig-1");
        blacklist.record("session-a", "sig-2");
        blacklist.record("session-b", "sig-1");

        blacklist.clear("session-a");

        assert!(!blacklist.is_blacklisted("session-a", "sig-1"));
        assert!(!blacklist.is_blacklisted("session-a", "sig-2"));
        assert!(blacklist.is_blacklisted("session-b", "sig-1"));
    }

    #[test]
    fn clear_with_empty_id_clears_everything() {
        let blacklist = SignatureBlacklist::new();
        blacklist.record("session-a", "sig-1");
        blacklist.record("session-b", "sig-2");

        blacklist.clear("");

        assert_eq!(blacklist.session_count(), 0);
        assert!(!blacklist.is_blacklisted("session-b", "sig-2"));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let blacklist = SignatureBlacklist::new();
        blacklist.record("session", "sig");

        let later = Instant::now() + INVALID_SIGNATURE_TTL + Duration::from_secs(1);
        assert!(!blacklist.is_blacklisted_at("session", "sig", later));

        let within = Instant::now() + INVALID_SIGNATURE_TTL - Duration::from_secs(60);
        assert!(blacklist.is_blacklisted_at("session", "sig", within));
    }

    #[test]
    fn sweep_removes_expired_entries_and_empty_sessions() {
        let blacklist = SignatureBlacklist::new();
        blacklist.record("session-a", "old");
        blacklist.record("session-b", "old");

        let later = Instant::now() + INVALID_SIGNATURE_TTL + Duration::from_secs(1);
        let removed = blacklist.inner.purge_expired_at(later);

        assert_eq!(removed, 2);
        assert_eq!(blacklist.session_count(), 0);
    }

    #[test]
    fn sweep_keeps_fresh_entries() {
        let blacklist = SignatureBlacklist::new();
        blacklist.record("session", "fresh");

        assert_eq!(blacklist.purge_expired(), 0);
        assert_eq!(blacklist.session_count(), 1);
        assert!(blacklist.is_blacklisted("session", "fresh"));
    }

    #[test]
    fn re_recording_refreshes_timestamp() {
        let blacklist = SignatureBlacklist::with_timings(Duration::from_millis(200), SWEEP_INTERVAL);
        blacklist.record("session", "sig");
        std::thread::sleep(Duration::from_millis(120));
        blacklist.record("session", "sig");
        std::thread::sleep(Duration::from_millis(120));

        assert!(blacklist.is_blacklisted("session", "sig"));
    }

    #[test]
    fn clones_share_entries() {
        let blacklist = SignatureBlacklist::new();
        let other = blacklist.clone();
        other.record("session", "sig");
        assert!(blacklist.is_blacklisted("session", "sig"));
    }

    #[tokio::test]
    async fn background_sweeper_purges_on_interval() {
        let blacklist =
            SignatureBlacklist::with_timings(Duration::from_millis(10), Duration::from_millis(20));
        blacklist.record("session", "sig");

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(blacklist.session_count(), 0);
        blacklist.shutdown();
    }

    #[test]
    fn concurrent_writers_across_sessions() {
        let blacklist = SignatureBlacklist::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let blacklist = blacklist.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        blacklist.record(&format!("session-{}", i), &format!("sig-{}", j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(blacklist.session_count(), 8);
        assert!(blacklist.is_blacklisted("session-7", "sig-99"));
    }

    #[test]
    fn writers_to_other_sessions_proceed_while_one_session_is_locked() {
        let blacklist = SignatureBlacklist::new();
        for i in 0..64 {
            blacklist.record(&format!("session-{}", i), "old-sig");
        }

        // Hold one session's set the way a sweep pass does while rewriting it.
        let locked = blacklist.inner.sessions.get("session-0").unwrap();
        let guard = locked.write();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let writer = {
            let blacklist = blacklist.clone();
            std::thread::spawn(move || {
                for i in 1..64 {
                    let session = format!("session-{}", i);
                    blacklist.record(&session, "new-sig");
                    assert!(blacklist.is_blacklisted(&session, "new-sig"));
                }
                done_tx.send(()).unwrap();
            })
        };

        let finished = done_rx.recv_timeout(Duration::from_secs(5));
        drop(guard);
        drop(locked);
        writer.join().unwrap();

        assert!(finished.is_ok(), "writers to other sessions waited on a locked session");
        assert!(blacklist.is_blacklisted("session-63", "new-sig"));
    }

    #[test]
    fn sweep_concurrent_with_writers_keeps_fresh_entries() {
        let blacklist = SignatureBlacklist::new();
        let stop = Arc::new(AtomicBool::new(false));

        let sweeper = {
            let blacklist = blacklist.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut passes = 0;
                loop {
                    blacklist.purge_expired();
                    passes += 1;
                    if stop.load(Ordering::Acquire) {
                        break passes;
                    }
                }
            })
        };

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let blacklist = blacklist.clone();
                std::thread::spawn(move || {
                    for j in 0..200 {
                        let own = format!("session-{}", i);
                        let signature = format!("sig-{}", j);
                        blacklist.record(&own, &signature);
                        blacklist.record("shared", &signature);
                        assert!(blacklist.is_blacklisted(&own, &signature));
                        assert!(blacklist.is_blacklisted("shared", &signature));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        stop.store(true, Ordering::Release);
        assert!(sweeper.join().unwrap() > 0);

        assert_eq!(blacklist.purge_expired(), 0);
        assert_eq!(blacklist.session_count(), 5);
        for i in 0..4 {
            assert!(blacklist.is_blacklisted(&format!("session-{}", i), "sig-199"));
        }
        assert!(blacklist.is_blacklisted("shared", "sig-0"));
    }

    #[test]
    fn short_truncates_on_char_boundary() {
        assert_eq!(short("abc"), "abc");
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
    }
}
