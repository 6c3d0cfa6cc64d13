//! Report Composer.
//!
//! [`compose`] is a pure function from one check's facts to a
//! [`RenderedReport`]. Facts are gathered once into [`ReportFacts`]; each
//! voice only chooses which of them to show and how to phrase them, so two
//! voices can never disagree about a number. Nothing here reads or writes
//! spot state.
//!
//! | voice        | lists | recurring flags | narrative                                   |
//! |--------------|-------|-----------------|---------------------------------------------|
//! | `direct`     | yes   | yes             | classifier notes, streak                    |
//! | `supportive` | yes   | yes             | notes, what is already in place, streak     |
//! | `analytical` | yes   | yes             | notes, sorted rate, recurring, weekdays, typical resolution |
//! | `minimal`    | yes   | no              | none                                        |
//! | `gentle`     | yes   | yes             | notes, softened after consecutive unsorted days |
//! | `custom`     | yes   | yes             | notes, then the user template with `{placeholder}` values |

use chrono::Weekday;
use twinsync_memory::patterns::{DayVerdict, PatternStats};
use twinsync_types::{CheckResult, RenderedReport, ReportItem, StreakState, VoicePolicy};

/// Value substituted for a placeholder whose fact is absent.
pub const MISSING_VALUE: &str = "n/a";

/// Consecutive unsorted days after which the gentle voice softens.
pub const GENTLE_SOFTEN_AFTER_DAYS: u32 = 2;

/// Every fact a report may mention, taken verbatim from the inputs.
#[derive(Debug, Clone)]
struct ReportFacts<'a> {
    spot: &'a str,
    to_sort: Vec<ReportItem>,
    looking_good: Vec<ReportItem>,
    notes: &'a str,
    is_sorted: bool,
    streak: &'a StreakState,
    stats: &'a PatternStats,
}

impl<'a> ReportFacts<'a> {
    fn gather(result: &'a CheckResult, stats: &'a PatternStats, streak: &'a StreakState) -> Self {
        let to_sort = result
            .to_sort()
            .map(|i| ReportItem {
                phrase: i.phrase.clone(),
                qualifier: i.qualifier.clone(),
                recurring_count: stats.recurring_count(&i.phrase),
            })
            .collect();
        let looking_good = result
            .looking_good()
            .map(|i| ReportItem {
                phrase: i.phrase.clone(),
                qualifier: i.qualifier.clone(),
                recurring_count: None,
            })
            .collect();
        Self {
            spot: &result.spot_id,
            to_sort,
            looking_good,
            notes: result.notes.trim(),
            is_sorted: result.is_sorted,
            streak,
            stats,
        }
    }

    fn counts_headline(&self) -> String {
        if self.is_sorted {
            format!("{} is sorted", self.spot)
        } else {
            format!(
                "{}: {} to sort, {} looking good",
                self.spot,
                self.to_sort.len(),
                self.looking_good.len()
            )
        }
    }

    fn notes_line(&self) -> Option<String> {
        (!self.notes.is_empty()).then(|| self.notes.to_string())
    }

    fn streak_line(&self) -> Option<String> {
        let s = self.streak;
        if s.current > 0 {
            Some(format!("Streak: {} (best {}).", days(s.current), days(s.best)))
        } else if s.best > 0 {
            Some(format!("Best streak so far: {}.", days(s.best)))
        } else {
            None
        }
    }

    fn placeholder(&self, name: &str) -> String {
        let top = self.stats.top_recurring().first();
        match name {
            "spot" => self.spot.to_string(),
            "to_sort_count" => self.to_sort.len().to_string(),
            "looking_good_count" => self.looking_good.len().to_string(),
            "to_sort" => join_or_missing(&self.to_sort),
            "looking_good" => join_or_missing(&self.looking_good),
            "streak" => self.streak.current.to_string(),
            "best_streak" => self.streak.best.to_string(),
            "top_item" => top.map_or_else(|| MISSING_VALUE.to_string(), |r| r.phrase.clone()),
            "top_item_count" => top.map_or_else(|| MISSING_VALUE.to_string(), |r| r.count.to_string()),
            "hardest_day" => self
                .stats
                .hardest_day
                .weekday()
                .map_or_else(|| MISSING_VALUE.to_string(), |d| weekday_name(d).to_string()),
            "notes" if !self.notes.is_empty() => self.notes.to_string(),
            _ => MISSING_VALUE.to_string(),
        }
    }
}

/// Render `result` under `voice`.
///
/// Every number in the output is read from `result`, `stats` or `streak`.
/// A custom template placeholder whose value is absent renders as
/// [`MISSING_VALUE`].
pub fn compose(
    result: &CheckResult,
    stats: &PatternStats,
    streak: &StreakState,
    voice: &VoicePolicy,
) -> RenderedReport {
    let facts = ReportFacts::gather(result, stats, streak);
    let (headline, narrative) = match voice {
        VoicePolicy::Direct => direct(&facts),
        VoicePolicy::Supportive => supportive(&facts),
        VoicePolicy::Analytical => analytical(&facts),
        VoicePolicy::Minimal => (facts.counts_headline(), Vec::new()),
        VoicePolicy::Gentle => gentle(&facts),
        VoicePolicy::Custom(template) => custom(template, &facts),
    };

    let mut to_sort = facts.to_sort;
    if *voice == VoicePolicy::Minimal {
        for item in &mut to_sort {
            item.recurring_count = None;
        }
    }

    RenderedReport {
        spot_id: result.spot_id.clone(),
        check_id: result.id,
        voice: voice.name().to_string(),
        headline,
        to_sort,
        looking_good: facts.looking_good,
        narrative,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Voices
// ─────────────────────────────────────────────────────────────────────────────

fn direct(f: &ReportFacts<'_>) -> (String, Vec<String>) {
    let narrative = [f.notes_line(), f.streak_line()].into_iter().flatten().collect();
    (f.counts_headline(), narrative)
}

fn supportive(f: &ReportFacts<'_>) -> (String, Vec<String>) {
    let headline = if f.is_sorted {
        format!("{} is sorted. Nice work!", f.spot)
    } else {
        format!("{} is nearly there: {} to sort", f.spot, f.to_sort.len())
    };
    let mut narrative: Vec<String> = f.notes_line().into_iter().collect();
    if !f.is_sorted && !f.looking_good.is_empty() {
        narrative.push(format!(
            "{} already in place.",
            count_noun(f.looking_good.len(), "thing is", "things are")
        ));
    }
    if f.is_sorted && f.streak.current > 0 {
        narrative.push(format!("That's day {} of your streak.", f.streak.current));
    } else if !f.is_sorted && f.streak.best > 0 {
        narrative.push(format!("Your best run so far is {}.", days(f.streak.best)));
    }
    (headline, narrative)
}

fn analytical(f: &ReportFacts<'_>) -> (String, Vec<String>) {
    let s = f.stats;
    let mut narrative: Vec<String> = f.notes_line().into_iter().collect();
    if s.total_checks > 0 {
        narrative.push(format!(
            "Sorted in {} of the last {}.",
            s.sorted_checks,
            count_noun(s.total_checks as usize, "check", "checks")
        ));
    }
    let top = s.top_recurring();
    if !top.is_empty() {
        let list: Vec<String> = top.iter().map(|r| format!("{} ({}x)", r.phrase, r.count)).collect();
        narrative.push(format!("Most recurring: {}.", list.join(", ")));
    }
    narrative.push(day_line("Hardest day", &s.hardest_day));
    narrative.push(day_line("Best day", &s.best_day));
    if let Some(t) = s.typical_resolution {
        narrative.push(format!("Usually sorted by {}.", t.format("%H:%M")));
    }
    narrative.extend(f.streak_line());
    (f.counts_headline(), narrative)
}

fn gentle(f: &ReportFacts<'_>) -> (String, Vec<String>) {
    if f.is_sorted {
        let mut narrative: Vec<String> = f.notes_line().into_iter().collect();
        narrative.extend(f.streak_line());
        return (format!("{} is looking lovely", f.spot), narrative);
    }

    let run = f.stats.consecutive_unsorted_days;
    let first = f.to_sort.first().map(|i| i.phrase.as_str());
    if run >= GENTLE_SOFTEN_AFTER_DAYS {
        let mut narrative: Vec<String> = f.notes_line().into_iter().collect();
        narrative.push(format!(
            "It has been {} in a row. Some stretches are like that.",
            days(run)
        ));
        if let Some(first) = first {
            narrative.push(format!("If you have a minute, maybe start with the {first}."));
        }
        (format!("{} could use a little time when you're ready", f.spot), narrative)
    } else {
        let mut narrative: Vec<String> = f.notes_line().into_iter().collect();
        if let Some(first) = first {
            narrative.push(format!("The {first} might like a home."));
        }
        (
            format!(
                "{}: {} could use a home",
                f.spot,
                count_noun(f.to_sort.len(), "thing", "things")
            ),
            narrative,
        )
    }
}

fn custom(template: &str, f: &ReportFacts<'_>) -> (String, Vec<String>) {
    let mut narrative: Vec<String> = f.notes_line().into_iter().collect();
    narrative.push(render_template(template, f));
    (f.counts_headline(), narrative)
}

fn render_template(template: &str, f: &ReportFacts<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                out.push_str(&f.placeholder(&after[..close]));
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Formatting helpers
// ─────────────────────────────────────────────────────────────────────────────

fn days(n: u32) -> String {
    count_noun(n as usize, "day", "days")
}

fn count_noun(n: usize, one: &str, many: &str) -> String {
    if n == 1 { format!("1 {one}") } else { format!("{n} {many}") }
}

fn join_or_missing(items: &[ReportItem]) -> String {
    if items.is_empty() {
        return MISSING_VALUE.to_string();
    }
    items.iter().map(|i| i.phrase.as_str()).collect::<Vec<_>>().join(", ")
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn day_line(label: &str, verdict: &DayVerdict) -> String {
    match verdict {
        DayVerdict::Day {
            weekday,
            sorted_rate,
            samples,
        } => format!(
            "{label}: {} ({:.0}% sorted over {}).",
            weekday_name(*weekday),
            sorted_rate * 100.0,
            count_noun(*samples as usize, "check", "checks")
        ),
        DayVerdict::InsufficientData => format!("{label}: not enough data yet."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};
    use twinsync_memory::patterns::RecurringPhrase;
    use twinsync_types::{CheckTrigger, Item, ItemStatus, StreakPhase};
    use uuid::Uuid;

    fn item(phrase: &str, status: ItemStatus) -> Item {
        Item {
            phrase: phrase.into(),
            qualifier: None,
            status,
        }
    }

    fn result(to_sort: &[&str], good: &[&str]) -> CheckResult {
        let mut items: Vec<Item> = to_sort.iter().map(|p| item(p, ItemStatus::ToSort)).collect();
        items.extend(good.iter().map(|p| item(p, ItemStatus::Matched)));
        CheckResult {
            id: Uuid::new_v4(),
            spot_id: "desk".into(),
            definition_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            trigger: CheckTrigger::Manual,
            items,
            notes: "A mug on the left.".into(),
            is_sorted: to_sort.is_empty(),
        }
    }

    fn stats() -> PatternStats {
        PatternStats {
            total_checks: 10,
            sorted_checks: 4,
            recurring: vec![RecurringPhrase {
                key: "coffee mug".into(),
                phrase: "coffee mug".into(),
                count: 4,
                last_seen: Utc::now(),
            }],
            top_n: 5,
            typical_resolution: NaiveTime::from_hms_opt(9, 30, 0),
            hardest_day: DayVerdict::Day {
                weekday: Weekday::Mon,
                sorted_rate: 0.25,
                samples: 4,
            },
            best_day: DayVerdict::InsufficientData,
            consecutive_unsorted_days: 0,
        }
    }

    fn streak(current: u32, best: u32) -> StreakState {
        StreakState {
            phase: if current > 0 { StreakPhase::Sorted } else { StreakPhase::NeedsAttention },
            current,
            best,
            ..StreakState::default()
        }
    }

    #[test]
    fn recurring_items_are_flagged() {
        let r = result(&["Coffee mug", "papers"], &["laptop"]);
        let report = compose(&r, &stats(), &streak(0, 3), &VoicePolicy::Direct);
        assert_eq!(report.to_sort[0].recurring_count, Some(4));
        assert_eq!(report.to_sort[1].recurring_count, None);
        assert_eq!(report.headline, "desk: 2 to sort, 1 looking good");
        assert!(report.to_text().contains("Coffee mug [seen 4x recently]"));
    }

    #[test]
    fn minimal_has_lists_only() {
        let r = result(&["coffee mug"], &["laptop"]);
        let report = compose(&r, &stats(), &streak(0, 0), &VoicePolicy::Minimal);
        assert!(report.narrative.is_empty());
        assert_eq!(report.to_sort.len(), 1);
        assert_eq!(report.to_sort[0].recurring_count, None);
        assert_eq!(report.voice, "minimal");
    }

    #[test]
    fn voices_share_the_same_lists() {
        let r = result(&["coffee mug", "papers"], &["laptop"]);
        let s = stats();
        let st = streak(0, 2);
        let direct = compose(&r, &s, &st, &VoicePolicy::Direct);
        for voice in [VoicePolicy::Supportive, VoicePolicy::Analytical, VoicePolicy::Gentle] {
            let other = compose(&r, &s, &st, &voice);
            assert_eq!(other.to_sort, direct.to_sort, "{voice}");
            assert_eq!(other.looking_good, direct.looking_good, "{voice}");
        }
    }

    #[test]
    fn analytical_reports_patterns_and_gaps() {
        let r = result(&["coffee mug"], &[]);
        let report = compose(&r, &stats(), &streak(0, 0), &VoicePolicy::Analytical);
        let text = report.notes();
        assert!(text.contains("Sorted in 4 of the last 10 checks."));
        assert!(text.contains("Most recurring: coffee mug (4x)."));
        assert!(text.contains("Hardest day: Monday (25% sorted over 4 checks)."));
        assert!(text.contains("Best day: not enough data yet."));
        assert!(text.contains("Usually sorted by 09:30."));
    }

    #[test]
    fn supportive_acknowledges_streak() {
        let r = result(&[], &["laptop"]);
        let report = compose(&r, &stats(), &streak(3, 5), &VoicePolicy::Supportive);
        assert_eq!(report.headline, "desk is sorted. Nice work!");
        assert!(report.narrative.iter().any(|l| l == "That's day 3 of your streak."));
    }

    #[test]
    fn gentle_softens_after_consecutive_unsorted_days() {
        let r = result(&["papers"], &[]);
        let mut s = stats();
        let calm = compose(&r, &s, &streak(0, 0), &VoicePolicy::Gentle);
        assert_eq!(calm.headline, "desk: 1 thing could use a home");

        s.consecutive_unsorted_days = 3;
        let soft = compose(&r, &s, &streak(0, 0), &VoicePolicy::Gentle);
        assert_eq!(soft.headline, "desk could use a little time when you're ready");
        assert_eq!(soft.narrative[0], "A mug on the left.");
        assert!(soft.narrative[1].contains("3 days in a row"));
        assert!(soft.narrative[2].contains("papers"));
    }

    #[test]
    fn custom_template_substitutes_known_facts() {
        let r = result(&["coffee mug", "papers"], &[]);
        let voice = VoicePolicy::Custom(
            "{spot}: {to_sort_count} left ({to_sort}). Top: {top_item} x{top_item_count}. Hard on {hardest_day}. Streak {streak}/{best_streak}.".into(),
        );
        let report = compose(&r, &stats(), &streak(0, 7), &voice);
        assert_eq!(report.headline, "desk: 2 to sort, 0 looking good");
        assert_eq!(
            report.narrative,
            [
                "A mug on the left.",
                "desk: 2 left (coffee mug, papers). Top: coffee mug x4. Hard on Monday. Streak 0/7."
            ]
        );
    }

    #[test]
    fn every_voice_but_minimal_keeps_the_notes() {
        let r = result(&["papers"], &[]);
        let mut s = stats();
        s.consecutive_unsorted_days = 4;
        for voice in [
            VoicePolicy::Direct,
            VoicePolicy::Supportive,
            VoicePolicy::Analytical,
            VoicePolicy::Gentle,
            VoicePolicy::Custom("{spot}".into()),
        ] {
            let report = compose(&r, &s, &streak(0, 0), &voice);
            assert_eq!(report.narrative.first().map(String::as_str), Some("A mug on the left."), "{voice}");
        }
    }

    #[test]
    fn custom_template_never_invents_missing_values() {
        let r = result(&[], &[]);
        let empty = PatternStats {
            total_checks: 0,
            sorted_checks: 0,
            recurring: vec![],
            top_n: 5,
            typical_resolution: None,
            hardest_day: DayVerdict::InsufficientData,
            best_day: DayVerdict::InsufficientData,
            consecutive_unsorted_days: 0,
        };
        let voice = VoicePolicy::Custom("{top_item} {top_item_count} {hardest_day} {to_sort}".into());
        let report = compose(&r, &empty, &streak(0, 0), &voice);
        assert_eq!(report.narrative, ["A mug on the left.", "n/a n/a n/a n/a"]);
    }
}
