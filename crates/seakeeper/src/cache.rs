//! Freshness-gated status cache.
//!
//! Holds the most recent status message. The inbound message handler is
//! the only writer; each update swaps the whole entry under one lock so
//! readers always see a status, raw map and timestamp from the same
//! message.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::codec::Status;
use crate::context::ReadContext;
use crate::error::{Result, SeakeeperError};

/// One decoded status message.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: Status,
    pub raw: Map<String, Value>,
    pub received_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(status: Status, raw: Map<String, Value>) -> Self {
        Self {
            status,
            raw,
            received_at: Utc::now(),
        }
    }

    /// Age of the entry at `now`. Timestamps from the future count as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.received_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Apply the staleness policy to a receipt timestamp.
///
/// Fresh when `now - received_at < stale_after`. A missing timestamp is
/// infinitely old. Stale reads from a background capture context yield
/// [`SeakeeperError::NoCaptureToStore`]; every other stale read yields
/// [`SeakeeperError::StatusTooOld`].
pub fn check_freshness(
    received_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_after: Duration,
    context: ReadContext,
) -> Result<()> {
    let age = received_at.map(|ts| (now - ts).to_std().unwrap_or(Duration::ZERO));
    if matches!(age, Some(age) if age < stale_after) {
        return Ok(());
    }

    if context.background_capture {
        // nothing worth storing, and nothing worth logging
        return Err(SeakeeperError::NoCaptureToStore);
    }

    Err(SeakeeperError::StatusTooOld {
        last_update: received_at,
        age,
        context,
    })
}

/// Single-entry status cache.
pub struct StatusCache {
    entry: RwLock<Option<Arc<CacheEntry>>>,
    stale_after: Duration,
}

impl StatusCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            stale_after,
        }
    }

    /// Replace the live entry. Only the inbound message handler calls this.
    pub fn record_update(&self, entry: CacheEntry) {
        debug!(
            "Recorded status update ({} fields) at {}",
            entry.raw.len(),
            entry.received_at
        );
        *self.entry.write() = Some(Arc::new(entry));
    }

    /// Consistent snapshot of the live entry, if any.
    pub fn snapshot(&self) -> Option<Arc<CacheEntry>> {
        self.entry.read().clone()
    }

    /// Last typed status, without any freshness check.
    pub fn last_status(&self) -> Status {
        self.snapshot()
            .map(|entry| entry.status.clone())
            .unwrap_or_default()
    }

    pub fn last_received_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().map(|entry| entry.received_at)
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Snapshot of the live entry if it is fresh at `now`.
    pub fn fresh_entry_at(
        &self,
        now: DateTime<Utc>,
        context: ReadContext,
    ) -> Result<Arc<CacheEntry>> {
        let snapshot = self.snapshot();
        check_freshness(
            snapshot.as_ref().map(|entry| entry.received_at),
            now,
            self.stale_after,
            context,
        )?;
        // check_freshness already rejected a missing entry
        snapshot.ok_or(SeakeeperError::StatusTooOld {
            last_update: None,
            age: None,
            context,
        })
    }

    /// Snapshot of the live entry if it is fresh now.
    pub fn fresh_entry(&self, context: ReadContext) -> Result<Arc<CacheEntry>> {
        self.fresh_entry_at(Utc::now(), context)
    }

    /// Raw key/value map of the live entry if it is fresh.
    pub fn readings(&self, context: ReadContext) -> Result<Map<String, Value>> {
        Ok(self.fresh_entry(context)?.raw.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn entry_received_at(received_at: DateTime<Utc>) -> CacheEntry {
        let mut raw = Map::new();
        raw.insert("battery_voltage".to_string(), Value::from(25.4));
        CacheEntry {
            status: Status {
                battery_voltage: 25.4,
                ..Default::default()
            },
            raw,
            received_at,
        }
    }

    #[test]
    fn test_freshness_boundaries() {
        let now = Utc::now();
        let stale_after = Duration::from_secs(60);
        let ctx = ReadContext::default();

        for secs in [0, 1, 30, 59] {
            let ts = now - TimeDelta::seconds(secs);
            assert!(check_freshness(Some(ts), now, stale_after, ctx).is_ok());
        }
        let ts = now - TimeDelta::milliseconds(59_999);
        assert!(check_freshness(Some(ts), now, stale_after, ctx).is_ok());

        for secs in [60, 61, 3600] {
            let ts = now - TimeDelta::seconds(secs);
            let err = check_freshness(Some(ts), now, stale_after, ctx).unwrap_err();
            match err {
                SeakeeperError::StatusTooOld { last_update, age, .. } => {
                    assert_eq!(last_update, Some(ts));
                    assert_eq!(age, Some(Duration::from_secs(secs as u64)));
                }
                other => panic!("Expected StatusTooOld, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_stale_background_capture_is_silent() {
        let now = Utc::now();
        let ts = now - TimeDelta::seconds(60);
        let err = check_freshness(
            Some(ts),
            now,
            Duration::from_secs(60),
            ReadContext::background_capture(),
        )
        .unwrap_err();
        assert!(err.is_silent_skip());

        // Fresh data is returned regardless of context
        let ts = now - TimeDelta::seconds(10);
        assert!(check_freshness(
            Some(ts),
            now,
            Duration::from_secs(60),
            ReadContext::background_capture()
        )
        .is_ok());
    }

    #[test]
    fn test_missing_entry_is_stale() {
        let now = Utc::now();
        let err =
            check_freshness(None, now, Duration::from_secs(60), ReadContext::default()).unwrap_err();
        assert!(matches!(
            err,
            SeakeeperError::StatusTooOld {
                last_update: None,
                age: None,
                ..
            }
        ));

        let cache = StatusCache::new(Duration::from_secs(60));
        assert!(cache.readings(ReadContext::default()).is_err());
        assert!(cache
            .readings(ReadContext::background_capture())
            .unwrap_err()
            .is_silent_skip());
        assert_eq!(cache.last_status(), Status::default());
        assert!(cache.last_received_at().is_none());
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let now = Utc::now();
        let ts = now + TimeDelta::seconds(5);
        assert!(check_freshness(Some(ts), now, Duration::from_secs(60), ReadContext::default())
            .is_ok());
        assert_eq!(entry_received_at(ts).age_at(now), Duration::ZERO);
    }

    #[test]
    fn test_record_update_replaces_entry() {
        let cache = StatusCache::new(Duration::from_secs(60));

        cache.record_update(entry_received_at(Utc::now()));
        let readings = cache.readings(ReadContext::default()).unwrap();
        assert_eq!(readings.get("battery_voltage"), Some(&Value::from(25.4)));

        let mut newer = entry_received_at(Utc::now());
        newer.status.battery_voltage = 24.0;
        newer.raw.clear();
        newer.raw.insert("battery_voltage".to_string(), Value::from(24.0));
        cache.record_update(newer);

        assert_eq!(cache.last_status().battery_voltage, 24.0);
        let readings = cache.readings(ReadContext::default()).unwrap();
        assert_eq!(readings.get("battery_voltage"), Some(&Value::from(24.0)));
    }

    #[test]
    fn test_stale_entry_still_visible_unchecked() {
        let cache = StatusCache::new(Duration::from_secs(60));
        let old = Utc::now() - TimeDelta::seconds(120);
        cache.record_update(entry_received_at(old));

        assert!(cache.readings(ReadContext::default()).is_err());
        assert_eq!(cache.last_status().battery_voltage, 25.4);
        assert_eq!(cache.last_received_at(), Some(old));
    }

    #[test]
    fn test_concurrent_readers_see_whole_entries() {
        let cache = Arc::new(StatusCache::new(Duration::from_secs(60)));

        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    let mut entry = entry_received_at(Utc::now());
                    entry.status.battery_voltage = i as f64;
                    entry.raw.insert("battery_voltage".to_string(), Value::from(i as f64));
                    cache.record_update(entry);
                }
            })
        };

        for _ in 0..1000 {
            if let Some(entry) = cache.snapshot() {
                assert_eq!(
                    entry.raw.get("battery_voltage").and_then(Value::as_f64),
                    Some(entry.status.battery_voltage)
                );
            }
        }
        writer.join().unwrap();
    }
}
