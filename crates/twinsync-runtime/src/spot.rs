//! [`Spot`] – one spot's check pipeline and owned state.
//!
//! Each check runs the same fixed sequence:
//!
//! 1. **Guard** – acquire the spot's [`CheckGuard`]; a second concurrent
//!    request is rejected with [`SpotError::CheckInProgress`].
//! 2. **Observe** – capture a still and ask the [`ObservationAdapter`] for a
//!    verdict. This is the only step that awaits, and it is bounded by the
//!    configured timeout. No state lock is held while it runs.
//! 3. **Reconcile** – the comparator turns the verdict into a
//!    [`CheckResult`].
//! 4. **Record** – the result is appended to the ledger and the in-memory
//!    history; the streak tracker applies it.
//! 5. **Render** – pattern stats are derived and the report composer renders
//!    the report under the spot's voice.
//! 6. **Publish** – events go out on the bus for the entity surface and any
//!    other listener.
//!
//! A failed observation (camera fault, classifier error, timeout) stops at
//! step 2: nothing is recorded, the streak is untouched, and the error is kept
//! for display until the next successful check. Step 4 writes the result, the
//! streak and the schedule anchor in one ledger transaction before any
//! in-memory state changes, so a storage failure is handled like any other
//! failed check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use twinsync_hal::Camera;
use twinsync_kernel::{
    CheckContext, CheckGuard, CheckPermit, StreakTracker, next_eligible_check, reconcile,
};
use twinsync_memory::history::{MemoryConfig, SpotMemory};
use twinsync_memory::ledger::Ledger;
use twinsync_memory::patterns::{PatternAnalyzer, PatternStats};
use twinsync_middleware::EventBus;
use twinsync_types::{
    Cadence, CheckResult, CheckTrigger, ClassifierError, ClassifierVerdict, Definition, Event,
    EventPayload, RenderedReport, SnoozeState, SpotConfig, SpotError, SpotOverrides, SpotType,
    StreakState, VoicePolicy,
};

use crate::observation::ObservationAdapter;
use crate::report::compose;

const EVENT_SOURCE: &str = "twinsync-runtime::spot";

/// Default bound on capture plus classification.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(90);

/// How often a retiring spot looks for its in-flight check to finish.
const RETIRE_POLL: Duration = Duration::from_millis(10);

/// Tunables shared by every spot.
#[derive(Debug, Clone, Copy)]
pub struct SpotSettings {
    pub check_timeout: Duration,
    pub memory: MemoryConfig,
    pub analyzer: PatternAnalyzer,
}

impl Default for SpotSettings {
    fn default() -> Self {
        Self {
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            memory: MemoryConfig::default(),
            analyzer: PatternAnalyzer::default(),
        }
    }
}

/// Collaborators shared by every spot of one supervisor.
#[derive(Clone)]
pub struct SpotContext {
    pub adapter: Arc<dyn ObservationAdapter>,
    pub ledger: Arc<Mutex<Ledger>>,
    pub bus: EventBus,
    pub settings: SpotSettings,
}

/// Current time at the precision the ledger stores (microseconds).
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time view of a spot for CLIs and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SpotSnapshot {
    pub id: String,
    pub name: String,
    pub camera: String,
    pub spot_type: SpotType,
    pub voice: VoicePolicy,
    pub cadence: Cadence,
    pub definition: String,
    pub streak: StreakState,
    /// Only while active.
    pub snooze: Option<SnoozeState>,
    pub last_check: Option<CheckResult>,
    pub last_report: Option<RenderedReport>,
    pub last_error: Option<String>,
    pub next_check: Option<DateTime<Utc>>,
    pub checking: bool,
    pub stats: PatternStats,
}

struct SpotState {
    /// Effective config: the file's values with runtime overrides applied.
    config: SpotConfig,
    overrides: SpotOverrides,
    definition: Definition,
    memory: SpotMemory,
    streak: StreakState,
    snooze: Option<SnoozeState>,
    /// Finish time of the last automatic attempt.
    anchor: Option<DateTime<Utc>>,
    last_error: Option<SpotError>,
    last_report: Option<RenderedReport>,
}

impl SpotState {
    fn next_check(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_eligible_check(self.config.cadence, self.anchor, self.snooze.as_ref(), now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spot
// ─────────────────────────────────────────────────────────────────────────────

pub struct Spot {
    id: String,
    camera: Arc<dyn Camera>,
    ctx: SpotContext,
    guard: CheckGuard,
    tracker: StreakTracker,
    state: Mutex<SpotState>,
    schedule_changed: Notify,
    retired: AtomicBool,
}

impl Spot {
    /// Validate `config` and restore the spot's state from the ledger.
    ///
    /// The latest stored check is re-rendered so a report is available
    /// before the first check of this run. Definition, voice and cadence
    /// edited at runtime are kept while the config file still holds the
    /// value they replaced; a changed file value wins and, for the
    /// definition, is recorded as a new snapshot. A spot seen for the first
    /// time gets `now` as its schedule anchor so the first automatic check
    /// waits one full interval.
    ///
    /// # Errors
    ///
    /// [`SpotError::InvalidDefinition`] / [`SpotError::Configuration`] from
    /// validation, [`SpotError::Storage`] from the ledger.
    pub fn open(
        config: SpotConfig,
        camera: Arc<dyn Camera>,
        ctx: SpotContext,
        now: DateTime<Utc>,
    ) -> Result<Self, SpotError> {
        let parsed = config.validate()?;
        let id = config.id();
        let memory_config = ctx.settings.memory;

        let (config, overrides, definition, history, streak, snooze, anchor) = {
            let ledger = lock(&ctx.ledger);
            let mut overrides = ledger.load_overrides(&id)?;
            let file_definition_unchanged = overrides.definition_unchanged(&config);
            let definition = match ledger.latest_definition(&id)? {
                Some(stored) if file_definition_unchanged || !stored.differs_from(&config.definition) => {
                    stored
                }
                _ => {
                    ledger.record_definition(&id, &parsed)?;
                    parsed
                }
            };
            let mut config = overrides.rebase(&config);
            config.definition = definition.text.clone();
            ledger.save_overrides(&id, &overrides)?;
            let history = ledger.checks_since(&id, now - memory_config.retention)?;
            let streak = ledger.load_streak(&id)?;
            let mut snooze = ledger.load_snooze(&id)?;
            if snooze.is_some_and(|s| s.has_expired(now)) {
                snooze = None;
                ledger.save_snooze(&id, None)?;
            }
            let anchor = match ledger.load_schedule_anchor(&id)? {
                Some(anchor) => anchor,
                None => {
                    ledger.save_schedule_anchor(&id, Some(now))?;
                    now
                }
            };
            (config, overrides, definition, history, streak, snooze, anchor)
        };

        let memory = SpotMemory::from_history(memory_config, history, now);
        let last_report = memory.latest().map(|latest| {
            let stats = ctx.settings.analyzer.analyze(&memory, now);
            compose(latest, &stats, &streak, &config.voice)
        });

        info!(
            spot = %id,
            camera = %config.camera,
            cadence = %config.cadence,
            voice = %config.voice,
            history = memory.len(),
            "spot opened"
        );
        Ok(Self {
            guard: CheckGuard::new(id.clone()),
            tracker: StreakTracker::new(memory_config.offset),
            state: Mutex::new(SpotState {
                memory,
                config,
                overrides,
                definition,
                streak,
                snooze,
                anchor: Some(anchor),
                last_error: None,
                last_report,
            }),
            id,
            camera,
            ctx,
            schedule_changed: Notify::new(),
            retired: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        lock(&self.state).config.name.clone()
    }

    pub fn config(&self) -> SpotConfig {
        lock(&self.state).config.clone()
    }

    pub fn definition(&self) -> Definition {
        lock(&self.state).definition.clone()
    }

    pub fn is_checking(&self) -> bool {
        self.guard.is_in_flight()
    }

    /// Stop accepting checks and wait for one already in flight to finish.
    ///
    /// Once this returns nothing more is written for the spot; the permit
    /// keeps it idle while the caller deletes its rows.
    pub(crate) async fn retire(&self) -> CheckPermit {
        self.retired.store(true, Ordering::Release);
        loop {
            if !self.guard.is_in_flight() {
                if let Ok(permit) = self.guard.try_acquire() {
                    return permit;
                }
            }
            tokio::time::sleep(RETIRE_POLL).await;
        }
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Woken whenever snooze or cadence changes move the next check.
    pub fn schedule_changed(&self) -> &Notify {
        &self.schedule_changed
    }

    fn emit(&self, payload: EventPayload) {
        self.ctx.bus.emit(Event::new(EVENT_SOURCE, payload));
    }

    fn emit_schedule(&self, next_check: Option<DateTime<Utc>>) {
        self.emit(EventPayload::ScheduleUpdated {
            spot_id: self.id.clone(),
            next_check,
        });
        self.schedule_changed.notify_one();
    }

    /// Publish the spot's current streak, snooze and schedule so listeners
    /// that attach after startup see a complete picture.
    pub fn announce(&self, now: DateTime<Utc>) {
        let (streak, snooze, next) = {
            let state = lock(&self.state);
            (
                state.streak.clone(),
                state.snooze.filter(|s| s.is_active(now)),
                state.next_check(now),
            )
        };
        self.emit(EventPayload::StreakUpdated {
            spot_id: self.id.clone(),
            streak,
        });
        self.emit(EventPayload::SnoozeChanged {
            spot_id: self.id.clone(),
            snooze,
        });
        self.emit_schedule(next);
    }

    // ── Check pipeline ───────────────────────────────────────────────────────

    /// Run one check.
    ///
    /// # Errors
    ///
    /// - [`SpotError::CheckInProgress`] when a check is already running; the
    ///   running check is unaffected and nothing is recorded.
    /// - [`SpotError::Camera`] / [`SpotError::Classifier`] when observation
    ///   fails or times out. No result is recorded and the streak is untouched.
    /// - [`SpotError::Storage`] when the result cannot be persisted. Nothing
    ///   is recorded and the streak is untouched.
    /// - [`SpotError::UnknownSpot`] once the spot has been removed.
    pub async fn check(&self, trigger: CheckTrigger) -> Result<RenderedReport, SpotError> {
        let _permit = self.guard.try_acquire()?;
        if self.is_retired() {
            return Err(SpotError::UnknownSpot(self.id.clone()));
        }
        let definition = lock(&self.state).definition.clone();
        info!(spot = %self.id, %trigger, "check started");

        let timeout = self.ctx.settings.check_timeout;
        let observed = tokio::time::timeout(timeout, self.observe(&definition))
            .await
            .unwrap_or_else(|_| {
                Err(ClassifierError::Timeout {
                    after_secs: timeout.as_secs(),
                }
                .into())
            });

        let completed_at = now();
        let result = observed.and_then(|verdict| {
            reconcile(
                &definition,
                verdict,
                CheckContext {
                    spot_id: self.id.clone(),
                    trigger,
                    completed_at,
                },
            )
        });
        match result {
            Ok(result) => self.record(result, completed_at),
            Err(err) => Err(self.fail(trigger, err, completed_at)),
        }
    }

    async fn observe(&self, definition: &Definition) -> Result<ClassifierVerdict, SpotError> {
        let capture = self.camera.capture().await?;
        debug!(spot = %self.id, bytes = capture.data.len(), "capture taken");
        Ok(self.ctx.adapter.evaluate(&capture, definition).await?)
    }

    fn record(&self, result: CheckResult, at: DateTime<Utc>) -> Result<RenderedReport, SpotError> {
        if self.is_retired() {
            return Err(SpotError::UnknownSpot(self.id.clone()));
        }
        let automatic = result.trigger == CheckTrigger::Automatic;
        let mut streak = lock(&self.state).streak.clone();
        self.tracker.apply_check(&mut streak, &result);

        let committed = lock(&self.ctx.ledger).commit_check(&result, &streak, automatic.then_some(at));
        match committed {
            Ok(true) => {}
            Ok(false) => {
                let err = SpotError::Storage(format!("check {} is already recorded", result.id));
                return Err(self.fail(result.trigger, err, at));
            }
            Err(err) => return Err(self.fail(result.trigger, err.into(), at)),
        }

        let (report, next) = {
            let mut state = lock(&self.state);
            let state = &mut *state;
            state.memory.append(result.clone(), at);
            state.streak = streak.clone();
            let stats = self.ctx.settings.analyzer.analyze(&state.memory, at);
            let report = compose(&result, &stats, &state.streak, &state.config.voice);
            if automatic {
                state.anchor = Some(at);
            }
            state.last_error = None;
            state.last_report = Some(report.clone());
            (report, state.next_check(at))
        };

        if automatic {
            match lock(&self.ctx.ledger).purge_before(at - self.ctx.settings.memory.retention) {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "expired checks purged from ledger"),
                Err(e) => warn!(spot = %self.id, error = %e, "expired checks not purged"),
            }
        }

        info!(
            spot = %self.id,
            trigger = %result.trigger,
            to_sort = result.to_sort_count(),
            is_sorted = result.is_sorted,
            streak = streak.current,
            "check completed"
        );
        self.emit(EventPayload::CheckCompleted(result));
        self.emit(EventPayload::StreakUpdated {
            spot_id: self.id.clone(),
            streak,
        });
        self.emit(EventPayload::ReportRendered(report.clone()));
        self.emit_schedule(next);
        Ok(report)
    }

    /// Record a failed attempt and hand the error back.
    fn fail(&self, trigger: CheckTrigger, err: SpotError, at: DateTime<Utc>) -> SpotError {
        warn!(spot = %self.id, %trigger, error = %err, "check failed, will retry at next cadence");
        let automatic = trigger == CheckTrigger::Automatic;
        let next = {
            let mut state = lock(&self.state);
            state.last_error = Some(err.clone());
            if automatic {
                state.anchor = Some(at);
            }
            state.next_check(at)
        };
        if automatic {
            if let Err(e) = lock(&self.ctx.ledger).save_schedule_anchor(&self.id, Some(at)) {
                warn!(spot = %self.id, error = %e, "schedule anchor not persisted");
            }
        }

        let event = Event::new(
            EVENT_SOURCE,
            EventPayload::CheckFailed {
                spot_id: self.id.clone(),
                trigger,
                error: err.clone(),
            },
        );
        self.ctx.bus.alert(event.clone());
        self.ctx.bus.emit(event);
        if automatic {
            self.emit_schedule(next);
        }
        err
    }

    // ── User actions ─────────────────────────────────────────────────────────

    /// Mark the spot sorted without a check. Does not add a streak day.
    pub fn reset(&self, at: DateTime<Utc>) -> Result<StreakState, SpotError> {
        let streak = {
            let mut state = lock(&self.state);
            self.tracker.apply_reset(&mut state.streak, at);
            state.streak.clone()
        };
        lock(&self.ctx.ledger).save_streak(&self.id, &streak)?;
        info!(spot = %self.id, total_resets = streak.total_resets, "spot reset to sorted");
        self.emit(EventPayload::StreakUpdated {
            spot_id: self.id.clone(),
            streak: streak.clone(),
        });
        Ok(streak)
    }

    /// Suppress automatic checks for `duration` from `at`.
    pub fn snooze(&self, duration: chrono::Duration, at: DateTime<Utc>) -> Result<SnoozeState, SpotError> {
        if duration <= chrono::Duration::zero() {
            return Err(SpotError::Configuration("snooze duration must be positive".into()));
        }
        let snooze = SnoozeState::for_duration(at, duration);
        self.set_snooze(Some(snooze), at)?;
        Ok(snooze)
    }

    /// Suppress automatic checks until [`unsnooze`][Self::unsnooze].
    pub fn snooze_indefinitely(&self, at: DateTime<Utc>) -> Result<SnoozeState, SpotError> {
        let snooze = SnoozeState::indefinite(at);
        self.set_snooze(Some(snooze), at)?;
        Ok(snooze)
    }

    /// Lift any snooze. A check already running is not affected.
    pub fn unsnooze(&self, at: DateTime<Utc>) -> Result<(), SpotError> {
        self.set_snooze(None, at)
    }

    fn set_snooze(&self, snooze: Option<SnoozeState>, at: DateTime<Utc>) -> Result<(), SpotError> {
        lock(&self.ctx.ledger).save_snooze(&self.id, snooze.as_ref())?;
        let next = {
            let mut state = lock(&self.state);
            state.snooze = snooze;
            state.next_check(at)
        };
        match snooze.and_then(|s| s.until) {
            Some(until) => info!(spot = %self.id, %until, "snoozed"),
            None if snooze.is_some() => info!(spot = %self.id, "snoozed until further notice"),
            None => info!(spot = %self.id, "snooze lifted"),
        }
        self.emit(EventPayload::SnoozeChanged {
            spot_id: self.id.clone(),
            snooze,
        });
        self.emit_schedule(next);
        Ok(())
    }

    /// Change the voice. Kept across restarts until the config file's voice
    /// changes.
    pub fn set_voice(&self, voice: VoicePolicy) -> Result<(), SpotError> {
        voice.validate()?;
        let mut state = lock(&self.state);
        let mut overrides = state.overrides.clone();
        overrides.voice = Some(voice.clone());
        lock(&self.ctx.ledger).save_overrides(&self.id, &overrides)?;
        state.overrides = overrides;
        info!(spot = %self.id, %voice, "voice changed");
        state.config.voice = voice;
        Ok(())
    }

    /// Change the cadence; returns the new next eligible check.
    pub fn set_cadence(&self, cadence: Cadence, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, SpotError> {
        cadence.validate()?;
        let next = {
            let mut state = lock(&self.state);
            let mut overrides = state.overrides.clone();
            overrides.cadence = Some(cadence);
            lock(&self.ctx.ledger).save_overrides(&self.id, &overrides)?;
            state.overrides = overrides;
            state.config.cadence = cadence;
            state.next_check(at)
        };
        info!(spot = %self.id, %cadence, "cadence changed");
        self.emit_schedule(next);
        Ok(next)
    }

    /// Replace the definition with a new snapshot. Past results keep
    /// pointing at the snapshot they ran against. Unchanged text keeps the
    /// current snapshot. The new snapshot stays current across restarts until
    /// the config file's definition changes.
    pub fn set_definition(&self, text: &str) -> Result<Definition, SpotError> {
        let current = self.definition();
        if !current.differs_from(text) {
            return Ok(current);
        }
        let definition = Definition::parse(text)?;
        lock(&self.ctx.ledger).record_definition(&self.id, &definition)?;
        let mut state = lock(&self.state);
        state.config.definition = text.to_string();
        state.definition = definition.clone();
        info!(spot = %self.id, definition = %definition.id, "definition updated");
        Ok(definition)
    }

    pub fn next_eligible_check(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        lock(&self.state).next_check(at)
    }

    pub fn snapshot(&self, at: DateTime<Utc>) -> SpotSnapshot {
        let state = lock(&self.state);
        SpotSnapshot {
            id: self.id.clone(),
            name: state.config.name.clone(),
            camera: state.config.camera.clone(),
            spot_type: state.config.spot_type,
            voice: state.config.voice.clone(),
            cadence: state.config.cadence,
            definition: state.definition.text.clone(),
            streak: state.streak.clone(),
            snooze: state.snooze.filter(|s| s.is_active(at)),
            last_check: state.memory.latest().cloned(),
            last_report: state.last_report.clone(),
            last_error: state.last_error.as_ref().map(ToString::to_string),
            next_check: state.next_check(at),
            checking: self.guard.is_in_flight(),
            stats: self.ctx.settings.analyzer.analyze(&state.memory, at),
        }
    }
}

impl std::fmt::Debug for Spot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spot")
            .field("id", &self.id)
            .field("camera", &self.camera.id())
            .field("checking", &self.guard.is_in_flight())
            .finish()
    }
}
