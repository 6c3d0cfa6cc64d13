//! Pattern Analyzer.
//!
//! Derives descriptive statistics from a spot's [`SpotMemory`]. It is strictly
//! read-only: facts flow from history into [`PatternStats`] and from there
//! into rendered narrative, never back into classification.
//!
//! ## Derived facts
//!
//! | field                       | meaning                                                      |
//! |-----------------------------|--------------------------------------------------------------|
//! | `recurring`                 | to-sort phrases seen in at least `recurring_threshold` checks |
//! | `typical_resolution`        | median local time of the first sorted check, over days that had one |
//! | `hardest_day` / `best_day`  | weekday with the lowest / highest sorted rate, or insufficient data when fewer than two weekdays can be told apart |
//! | `consecutive_unsorted_days` | trailing run of check days whose last check was unsorted      |
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use twinsync_memory::history::{MemoryConfig, SpotMemory};
//! use twinsync_memory::patterns::{DayVerdict, PatternAnalyzer};
//!
//! let memory = SpotMemory::new(MemoryConfig::default());
//! let stats = PatternAnalyzer::default().analyze(&memory, Utc::now());
//! assert_eq!(stats.total_checks, 0);
//! assert_eq!(stats.hardest_day, DayVerdict::InsufficientData);
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use twinsync_types::normalize_phrase;

use crate::history::SpotMemory;

pub const DEFAULT_RECURRING_THRESHOLD: u32 = 3;
pub const DEFAULT_TOP_N: usize = 5;
pub const DEFAULT_MIN_SAMPLES_PER_WEEKDAY: u32 = 3;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

// ─────────────────────────────────────────────────────────────────────────────
// PatternStats
// ─────────────────────────────────────────────────────────────────────────────

/// A to-sort phrase that keeps coming back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringPhrase {
    /// Canonical key.
    pub key: String,
    /// Display form.
    pub phrase: String,
    pub count: u32,
    pub last_seen: DateTime<Utc>,
}

/// Outcome of a weekday estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DayVerdict {
    Day {
        weekday: Weekday,
        /// Fraction of that weekday's checks that were sorted.
        sorted_rate: f64,
        samples: u32,
    },
    /// Fewer than two weekdays reached the minimum sample size, or every
    /// weekday that did has the same sorted rate.
    InsufficientData,
}

impl DayVerdict {
    pub fn weekday(&self) -> Option<Weekday> {
        match self {
            DayVerdict::Day { weekday, .. } => Some(*weekday),
            DayVerdict::InsufficientData => None,
        }
    }
}

/// Everything the analyzer knows about one spot at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub total_checks: u32,
    pub sorted_checks: u32,
    /// Every phrase at or above the recurring threshold: count desc, then
    /// most recently seen, then phrase.
    pub recurring: Vec<RecurringPhrase>,
    pub top_n: usize,
    pub typical_resolution: Option<NaiveTime>,
    pub hardest_day: DayVerdict,
    pub best_day: DayVerdict,
    pub consecutive_unsorted_days: u32,
}

impl PatternStats {
    /// The `top_n` most frequent recurring phrases.
    pub fn top_recurring(&self) -> &[RecurringPhrase] {
        &self.recurring[..self.recurring.len().min(self.top_n)]
    }

    /// Windowed count for `phrase` if it is recurring.
    pub fn recurring_count(&self, phrase: &str) -> Option<u32> {
        let key = normalize_phrase(phrase);
        self.recurring.iter().find(|r| r.key == key).map(|r| r.count)
    }

    /// Share of sorted checks in the window, `None` without checks.
    pub fn sorted_rate(&self) -> Option<f64> {
        (self.total_checks > 0).then(|| f64::from(self.sorted_checks) / f64::from(self.total_checks))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PatternAnalyzer
// ─────────────────────────────────────────────────────────────────────────────

/// Thresholds used to turn raw history into claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternAnalyzer {
    pub recurring_threshold: u32,
    pub top_n: usize,
    pub min_samples_per_weekday: u32,
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self {
            recurring_threshold: DEFAULT_RECURRING_THRESHOLD,
            top_n: DEFAULT_TOP_N,
            min_samples_per_weekday: DEFAULT_MIN_SAMPLES_PER_WEEKDAY,
        }
    }
}

impl PatternAnalyzer {
    pub fn analyze(&self, memory: &SpotMemory, now: DateTime<Utc>) -> PatternStats {
        let config = *memory.config();

        let mut total_checks = 0u32;
        let mut sorted_checks = 0u32;
        let mut weekday_samples = [(0u32, 0u32); 7];
        // Per local day: (first sorted time, last check sorted?)
        let mut days: BTreeMap<NaiveDate, (Option<NaiveTime>, bool)> = BTreeMap::new();

        for check in memory.checks(now) {
            total_checks += 1;
            let local = check.timestamp.with_timezone(&config.offset);
            let slot = &mut weekday_samples[config.local_weekday(check.timestamp).num_days_from_monday() as usize];
            slot.0 += 1;
            if check.is_sorted {
                sorted_checks += 1;
                slot.1 += 1;
            }
            let day = days.entry(local.date_naive()).or_insert((None, false));
            if check.is_sorted && day.0.is_none() {
                day.0 = Some(local.time());
            }
            day.1 = check.is_sorted;
        }

        let mut recurring: Vec<RecurringPhrase> = memory
            .occurrence_stats(now)
            .into_values()
            .filter(|s| s.count >= self.recurring_threshold)
            .map(|s| RecurringPhrase {
                key: s.key,
                phrase: s.phrase,
                count: s.count,
                last_seen: s.last_seen,
            })
            .collect();
        recurring.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(b.last_seen.cmp(&a.last_seen))
                .then(a.key.cmp(&b.key))
        });

        let mut first_sorted: Vec<u32> = days
            .values()
            .filter_map(|(first, _)| first.map(|t| t.num_seconds_from_midnight()))
            .collect();
        first_sorted.sort_unstable();

        let consecutive_unsorted_days = days
            .values()
            .rev()
            .take_while(|(_, ended_sorted)| !ended_sorted)
            .count() as u32;

        let (hardest_day, best_day) = self.compare_days(&weekday_samples);
        PatternStats {
            total_checks,
            sorted_checks,
            recurring,
            top_n: self.top_n,
            typical_resolution: median_time(&first_sorted),
            hardest_day,
            best_day,
            consecutive_unsorted_days,
        }
    }

    /// Hardest and best weekday. Both are [`DayVerdict::InsufficientData`]
    /// unless they name different weekdays.
    fn compare_days(&self, samples: &[(u32, u32); 7]) -> (DayVerdict, DayVerdict) {
        let hardest = self.pick_day(samples, |rate, current| rate < current);
        let best = self.pick_day(samples, |rate, current| rate > current);
        if hardest.weekday() == best.weekday() {
            return (DayVerdict::InsufficientData, DayVerdict::InsufficientData);
        }
        (hardest, best)
    }

    /// Choose the weekday whose sorted rate wins under `better`, considering
    /// only weekdays with enough samples. Ties keep the earlier weekday.
    fn pick_day(&self, samples: &[(u32, u32); 7], better: impl Fn(f64, f64) -> bool) -> DayVerdict {
        let mut chosen = DayVerdict::InsufficientData;
        for (weekday, &(total, sorted)) in WEEKDAYS.iter().zip(samples) {
            if total == 0 || total < self.min_samples_per_weekday {
                continue;
            }
            let rate = f64::from(sorted) / f64::from(total);
            let replace = match chosen {
                DayVerdict::InsufficientData => true,
                DayVerdict::Day { sorted_rate, .. } => better(rate, sorted_rate),
            };
            if replace {
                chosen = DayVerdict::Day {
                    weekday: *weekday,
                    sorted_rate: rate,
                    samples: total,
                };
            }
        }
        chosen
    }
}

fn median_time(sorted_secs: &[u32]) -> Option<NaiveTime> {
    let n = sorted_secs.len();
    if n == 0 {
        return None;
    }
    let secs = if n % 2 == 1 {
        sorted_secs[n / 2]
    } else {
        (sorted_secs[n / 2 - 1] + sorted_secs[n / 2]) / 2
    };
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
