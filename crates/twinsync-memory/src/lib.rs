//! `twinsync-memory` – what a spot remembers.
//!
//! Gives every spot durable state and recall over its own past, on top of a
//! local SQLite substrate.
//!
//! # Modules
//!
//! - [`ledger`] – [`Ledger`][ledger::Ledger]: the SQLite store holding each
//!   spot's check log, definition snapshots, streak, snooze and schedule
//!   anchor so that nothing is lost across restarts.
//! - [`history`] – [`SpotMemory`][history::SpotMemory]: the windowed,
//!   append-only check history with per-phrase occurrence aggregates.
//! - [`patterns`] – [`PatternAnalyzer`][patterns::PatternAnalyzer]: read-only
//!   statistics (recurring offenders, typical resolution time, hardest and
//!   best weekday) derived from a [`SpotMemory`][history::SpotMemory].

pub mod history;
pub mod ledger;
pub mod patterns;
