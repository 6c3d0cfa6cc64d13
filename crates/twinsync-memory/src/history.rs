//! Windowed in-memory check history with incrementally maintained
//! recurrence aggregates.
//!
//! The ordered check log is the source of truth. The per-phrase index is a
//! derived cache updated on every append and eviction; it is never written
//! to independently. Read paths filter by the retention cutoff themselves, so
//! statistics never reflect expired records even if eviction has not run.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;
use twinsync_types::CheckResult;
use uuid::Uuid;

/// Default retention window.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Retention and calendar settings shared by every spot's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    pub retention: Duration,
    /// Offset used for calendar-day and day-of-week bucketing.
    pub offset: FixedOffset,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
            offset: Utc.fix(),
        }
    }
}

impl MemoryConfig {
    /// Local calendar date of `at`.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Local weekday of `at`.
    pub fn local_weekday(&self, at: DateTime<Utc>) -> Weekday {
        at.with_timezone(&self.offset).weekday()
    }
}

/// Windowed occurrence statistics for one canonical phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseStats {
    /// Canonical (normalised) phrase.
    pub key: String,
    /// Display form as most recently reported by the classifier.
    pub phrase: String,
    /// Number of checks in the window where the phrase was to-sort.
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Occurrences per local weekday, Monday first.
    pub by_weekday: [u32; 7],
}

#[derive(Debug, Clone)]
struct PhraseIndex {
    phrase: String,
    /// Completion times of the checks that reported this phrase, ascending.
    seen: VecDeque<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SpotMemory
// ─────────────────────────────────────────────────────────────────────────────

/// Per-spot check history bounded by the retention window.
#[derive(Debug, Clone)]
pub struct SpotMemory {
    config: MemoryConfig,
    checks: VecDeque<CheckResult>,
    ids: HashSet<Uuid>,
    phrases: HashMap<String, PhraseIndex>,
}

impl SpotMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            checks: VecDeque::new(),
            ids: HashSet::new(),
            phrases: HashMap::new(),
        }
    }

    /// Rebuild from persisted results (e.g. [`Ledger::checks_since`][crate::ledger::Ledger::checks_since]).
    pub fn from_history(
        config: MemoryConfig,
        results: impl IntoIterator<Item = CheckResult>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut memory = Self::new(config);
        for result in results {
            memory.append(result, now);
        }
        memory
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.retention
    }

    /// Append a completed check.
    ///
    /// Returns `false` and leaves the memory untouched when the id was
    /// already appended or the result is already outside the window.
    pub fn append(&mut self, result: CheckResult, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);
        if result.timestamp < self.cutoff(now) || !self.ids.insert(result.id) {
            return false;
        }

        let mut keys = HashSet::new();
        for item in result.to_sort() {
            let key = item.key();
            if key.is_empty() || !keys.insert(key.clone()) {
                continue;
            }
            let index = self.phrases.entry(key).or_insert_with(|| PhraseIndex {
                phrase: item.phrase.clone(),
                seen: VecDeque::new(),
            });
            if index.seen.back().is_none_or(|last| *last <= result.timestamp) {
                index.phrase = item.phrase.clone();
                index.seen.push_back(result.timestamp);
            } else {
                let at = index.seen.partition_point(|t| *t <= result.timestamp);
                index.seen.insert(at, result.timestamp);
            }
        }

        if self.checks.back().is_none_or(|last| last.timestamp <= result.timestamp) {
            self.checks.push_back(result);
        } else {
            let at = self.checks.partition_point(|c| c.timestamp <= result.timestamp);
            self.checks.insert(at, result);
        }
        true
    }

    /// Drop records older than the retention window. Returns how many checks
    /// were evicted.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let mut evicted = 0;
        while self.checks.front().is_some_and(|c| c.timestamp < cutoff) {
            if let Some(old) = self.checks.pop_front() {
                self.ids.remove(&old.id);
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.phrases.retain(|_, index| {
                while index.seen.front().is_some_and(|t| *t < cutoff) {
                    index.seen.pop_front();
                }
                !index.seen.is_empty()
            });
            debug!(evicted, "evicted expired checks from memory");
        }
        evicted
    }

    /// In-window checks no older than `window`, oldest first. A `window`
    /// longer than the retention period is capped by it.
    pub fn history(&self, window: Duration, now: DateTime<Utc>) -> Vec<&CheckResult> {
        let since = (now - window).max(self.cutoff(now));
        self.checks.iter().filter(|c| c.timestamp >= since).collect()
    }

    /// Every in-window check, oldest first.
    pub fn checks(&self, now: DateTime<Utc>) -> impl Iterator<Item = &CheckResult> + '_ {
        let cutoff = self.cutoff(now);
        self.checks.iter().filter(move |c| c.timestamp >= cutoff)
    }

    /// Most recent check, regardless of the window.
    pub fn latest(&self) -> Option<&CheckResult> {
        self.checks.back()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Occurrence statistics of to-sort phrases within the window, keyed by
    /// canonical phrase.
    pub fn occurrence_stats(&self, now: DateTime<Utc>) -> HashMap<String, PhraseStats> {
        let cutoff = self.cutoff(now);
        let mut stats = HashMap::new();
        for (key, index) in &self.phrases {
            let live: Vec<_> = index.seen.iter().filter(|t| **t >= cutoff).collect();
            let (Some(first), Some(last)) = (live.first(), live.last()) else {
                continue;
            };
            let mut by_weekday = [0u32; 7];
            for t in &live {
                by_weekday[self.config.local_weekday(**t).num_days_from_monday() as usize] += 1;
            }
            stats.insert(
                key.clone(),
                PhraseStats {
                    key: key.clone(),
                    phrase: index.phrase.clone(),
                    count: live.len() as u32,
                    first_seen: **first,
                    last_seen: **last,
                    by_weekday,
                },
            );
        }
        stats
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use twinsync_types::{CheckTrigger, Item, ItemStatus};

    fn check(at: DateTime<Utc>, to_sort: &[&str], matched: &[&str]) -> CheckResult {
        let mut items: Vec<Item> = to_sort
            .iter()
            .map(|p| Item {
                phrase: p.to_string(),
                qualifier: None,
                status: ItemStatus::ToSort,
            })
            .collect();
        items.extend(matched.iter().map(|p| Item {
            phrase: p.to_string(),
            qualifier: None,
            status: ItemStatus::Matched,
        }));
        CheckResult {
            id: Uuid::new_v4(),
            spot_id: "desk".into(),
            definition_id: Uuid::new_v4(),
            timestamp: at,
            trigger: CheckTrigger::Automatic,
            items,
            notes: String::new(),
            is_sorted: to_sort.is_empty(),
        }
    }

    fn monday_9am() -> DateTime<Utc> {
        // 2026-10-05 is a Monday.
        Utc.with_ymd_and_hms(2026, 10, 5, 9, 0, 0).unwrap()
    }

    #[test]
    fn duplicate_append_is_ignored() {
        let now = monday_9am();
        let mut memory = SpotMemory::new(MemoryConfig::default());
        let c = check(now, &["coffee mug"], &[]);
        assert!(memory.append(c.clone(), now));
        let before = memory.occurrence_stats(now);
        assert!(!memory.append(c, now));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.occurrence_stats(now), before);
    }

    #[test]
    fn four_daily_offences_are_counted() {
        let start = monday_9am();
        let mut memory = SpotMemory::new(MemoryConfig::default());
        for day in 0..4 {
            let at = start + Duration::days(day);
            memory.append(check(at, &["Coffee Mug"], &["laptop"]), at);
        }
        let now = start + Duration::days(3);
        let stats = memory.occurrence_stats(now);
        let mug = &stats["coffee mug"];
        assert_eq!(mug.count, 4);
        assert_eq!(mug.first_seen, start);
        assert_eq!(mug.last_seen, now);
        assert_eq!(mug.by_weekday, [1, 1, 1, 1, 0, 0, 0]);
        assert!(!stats.contains_key("laptop"), "matched items are not offences");
    }

    #[test]
    fn phrase_is_counted_once_per_check() {
        let now = monday_9am();
        let mut memory = SpotMemory::new(MemoryConfig::default());
        memory.append(check(now, &["mug", "Mug ", "papers"], &[]), now);
        let stats = memory.occurrence_stats(now);
        assert_eq!(stats["mug"].count, 1);
        assert_eq!(stats["papers"].count, 1);
    }

    #[test]
    fn expired_records_never_show_in_stats_or_history() {
        let start = monday_9am();
        let mut memory = SpotMemory::new(MemoryConfig::default());
        memory.append(check(start, &["mug"], &[]), start);
        let later = start + Duration::days(20);
        memory.append(check(later, &["mug"], &[]), later);

        // Nothing evicted yet, but reads already exclude the first record.
        let now = start + Duration::days(31);
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.occurrence_stats(now)["mug"].count, 1);
        assert_eq!(memory.history(Duration::days(90), now).len(), 1);

        assert_eq!(memory.evict_expired(now), 1);
        assert_eq!(memory.len(), 1);
        let far = start + Duration::days(60);
        memory.evict_expired(far);
        assert!(memory.occurrence_stats(far).is_empty());
    }

    #[test]
    fn stale_append_is_rejected() {
        let now = monday_9am();
        let mut memory = SpotMemory::new(MemoryConfig::default());
        assert!(!memory.append(check(now - Duration::days(45), &["mug"], &[]), now));
        assert!(memory.is_empty());
    }

    #[test]
    fn history_window_and_order() {
        let now = monday_9am();
        let mut memory = SpotMemory::new(MemoryConfig::default());
        let late = check(now, &[], &[]);
        let early = check(now - Duration::hours(30), &["mug"], &[]);
        memory.append(late.clone(), now);
        memory.append(early.clone(), now);

        let all: Vec<_> = memory.history(Duration::days(7), now).iter().map(|c| c.id).collect();
        assert_eq!(all, [early.id, late.id]);
        assert_eq!(memory.history(Duration::hours(24), now).len(), 1);
        assert_eq!(memory.latest().map(|c| c.id), Some(late.id));
    }

    #[test]
    fn weekday_bucketing_uses_local_offset() {
        // 23:30 UTC Sunday is Monday morning at UTC+2.
        let at = Utc.with_ymd_and_hms(2026, 10, 4, 23, 30, 0).unwrap();
        let config = MemoryConfig {
            offset: FixedOffset::east_opt(2 * 3600).unwrap(),
            ..MemoryConfig::default()
        };
        let mut memory = SpotMemory::new(config);
        memory.append(check(at, &["mug"], &[]), at);
        assert_eq!(memory.occurrence_stats(at)["mug"].by_weekday[0], 1);
        assert_eq!(config.local_weekday(at), Weekday::Mon);
    }
}
