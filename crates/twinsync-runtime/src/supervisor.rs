//! [`SpotSupervisor`] – owns every spot and drives their control loops.
//!
//! Spots are independent: each gets its own Tokio task that sleeps until the
//! spot's next eligible check, runs it, and recomputes. A snooze or cadence
//! change wakes the task early through the spot's `schedule_changed` notifier.
//! Checks of different spots run concurrently; checks of one spot are
//! serialised by its guard.
//!
//! Inbound [`SpotAction`]s are dispatched through [`SpotSupervisor::handle`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twinsync_hal::CameraRegistry;
use twinsync_kernel::is_due;
use twinsync_middleware::SpotAction;
use twinsync_types::{
    CheckTrigger, Definition, Event, EventPayload, RenderedReport, SnoozeState, SpotConfig,
    SpotError, StreakState, VoicePolicy, slugify,
};

use crate::spot::{Spot, SpotContext, SpotSnapshot, now};

const EVENT_SOURCE: &str = "twinsync-runtime::supervisor";

/// Pause before retrying an automatic check that found another check running.
const BUSY_RETRY: Duration = Duration::from_secs(5);

/// Longest single sleep of an idle loop; bounds drift on manual or
/// indefinitely snoozed spots.
const IDLE_RECHECK: Duration = Duration::from_secs(3600);

/// Result of a dispatched [`SpotAction`].
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Report(RenderedReport),
    Sweep(Vec<(String, Result<RenderedReport, SpotError>)>),
    Streak(StreakState),
    Snooze(Option<SnoozeState>),
    NextCheck(Option<DateTime<Utc>>),
    Voice(VoicePolicy),
    Definition(Definition),
}

struct SpotLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SpotSupervisor {
    ctx: SpotContext,
    cameras: CameraRegistry,
    spots: RwLock<BTreeMap<String, Arc<Spot>>>,
    loops: Mutex<HashMap<String, SpotLoop>>,
    running: AtomicBool,
}

impl SpotSupervisor {
    pub fn new(ctx: SpotContext, cameras: CameraRegistry) -> Self {
        Self {
            ctx,
            cameras,
            spots: RwLock::new(BTreeMap::new()),
            loops: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &SpotContext {
        &self.ctx
    }

    /// Validate and register a spot. Starts its loop when the supervisor is
    /// already running.
    ///
    /// # Errors
    ///
    /// [`SpotError::Configuration`] for a duplicate id or unknown camera, plus
    /// anything [`Spot::open`] rejects.
    pub fn add_spot(&self, config: SpotConfig) -> Result<Arc<Spot>, SpotError> {
        let id = config.id();
        if self.read_spots().contains_key(&id) {
            return Err(SpotError::Configuration(format!("spot id '{id}' is already in use")));
        }
        let camera = self.cameras.resolve(&config.camera)?;
        let spot = Arc::new(Spot::open(config, camera, self.ctx.clone(), now())?);

        {
            let mut spots = self.spots.write().unwrap_or_else(PoisonError::into_inner);
            if spots.contains_key(&id) {
                return Err(SpotError::Configuration(format!("spot id '{id}' is already in use")));
            }
            spots.insert(id.clone(), Arc::clone(&spot));
        }
        spot.announce(now());
        if self.running.load(Ordering::Acquire) {
            self.spawn_loop(Arc::clone(&spot));
        }
        Ok(spot)
    }

    /// Register every config; invalid spots are reported and skipped so the
    /// valid ones still run.
    pub fn add_spots(&self, configs: impl IntoIterator<Item = SpotConfig>) -> Vec<(String, SpotError)> {
        let mut rejected = Vec::new();
        for config in configs {
            let name = config.name.clone();
            if let Err(err) = self.add_spot(config) {
                warn!(spot = %name, error = %err, "spot not scheduled");
                rejected.push((name, err));
            }
        }
        rejected
    }

    /// Stop the spot's loop and delete everything stored for it.
    ///
    /// A check already running is allowed to finish first; whatever it
    /// produced is deleted along with the rest.
    pub async fn remove_spot(&self, spot: &str) -> Result<(), SpotError> {
        let id = slugify(spot);
        let removed = self
            .spots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(removed) = removed else {
            return Err(SpotError::UnknownSpot(spot.to_string()));
        };

        let spot_loop = lock(&self.loops).remove(&id);
        if let Some(spot_loop) = spot_loop {
            let _ = spot_loop.stop.send(true);
            let _ = spot_loop.handle.await;
        }
        let _idle = removed.retire().await;
        lock(&self.ctx.ledger).delete_spot(&id)?;
        self.ctx.bus.emit(Event::new(
            EVENT_SOURCE,
            EventPayload::SpotRemoved { spot_id: id.clone() },
        ));
        info!(spot = %id, "spot removed");
        Ok(())
    }

    /// Look a spot up by id or display name.
    pub fn spot(&self, spot: &str) -> Result<Arc<Spot>, SpotError> {
        self.read_spots()
            .get(&slugify(spot))
            .cloned()
            .ok_or_else(|| SpotError::UnknownSpot(spot.to_string()))
    }

    /// All spots ordered by id.
    pub fn spots(&self) -> Vec<Arc<Spot>> {
        self.read_spots().values().cloned().collect()
    }

    pub fn snapshots(&self) -> Vec<SpotSnapshot> {
        let at = now();
        self.spots().iter().map(|s| s.snapshot(at)).collect()
    }

    fn read_spots(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<Spot>>> {
        self.spots.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Actions ──────────────────────────────────────────────────────────────

    /// Dispatch one inbound action.
    pub async fn handle(&self, action: SpotAction) -> Result<ActionOutcome, SpotError> {
        action.validate()?;
        debug!(service = action.service(), spot = ?action.spot(), "action received");
        let at = now();
        match action {
            SpotAction::CheckAll => Ok(ActionOutcome::Sweep(self.check_all().await)),
            SpotAction::Check { spot } => {
                let spot = self.spot(&spot)?;
                Ok(ActionOutcome::Report(spot.check(CheckTrigger::Manual).await?))
            }
            SpotAction::Reset { spot } => Ok(ActionOutcome::Streak(self.spot(&spot)?.reset(at)?)),
            SpotAction::Snooze {
                spot,
                duration_minutes,
            } => {
                let spot = self.spot(&spot)?;
                let snooze = match duration_minutes {
                    Some(m) => spot.snooze(chrono::Duration::minutes(i64::from(m)), at)?,
                    None => spot.snooze_indefinitely(at)?,
                };
                Ok(ActionOutcome::Snooze(Some(snooze)))
            }
            SpotAction::Unsnooze { spot } => {
                self.spot(&spot)?.unsnooze(at)?;
                Ok(ActionOutcome::Snooze(None))
            }
            SpotAction::SetVoice { spot, voice } => {
                self.spot(&spot)?.set_voice(voice.clone())?;
                Ok(ActionOutcome::Voice(voice))
            }
            SpotAction::SetCadence { spot, cadence } => Ok(ActionOutcome::NextCheck(
                self.spot(&spot)?.set_cadence(cadence, at)?,
            )),
            SpotAction::SetDefinition { spot, definition } => Ok(ActionOutcome::Definition(
                self.spot(&spot)?.set_definition(&definition)?,
            )),
        }
    }

    /// Check every spot concurrently. A spot whose check is already running
    /// reports [`SpotError::CheckInProgress`] in its entry; the others are
    /// unaffected.
    pub async fn check_all(&self) -> Vec<(String, Result<RenderedReport, SpotError>)> {
        let spots = self.spots();
        info!(spots = spots.len(), "checking all spots");
        let results = join_all(spots.iter().map(|s| s.check(CheckTrigger::CheckAll))).await;
        spots
            .iter()
            .map(|s| s.id().to_string())
            .zip(results)
            .collect()
    }

    // ── Control loops ────────────────────────────────────────────────────────

    /// Start one control loop per registered spot. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let spots = self.spots();
        info!(spots = spots.len(), "supervisor started");
        for spot in spots {
            self.spawn_loop(spot);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop every loop, waiting for in-flight checks to finish.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let loops: Vec<SpotLoop> = lock(&self.loops).drain().map(|(_, l)| l).collect();
        for spot_loop in &loops {
            let _ = spot_loop.stop.send(true);
        }
        join_all(loops.into_iter().map(|l| l.handle)).await;
        info!("supervisor stopped");
    }

    fn spawn_loop(&self, spot: Arc<Spot>) {
        let (stop, stop_rx) = watch::channel(false);
        let id = spot.id().to_string();
        let handle = tokio::spawn(run_loop(spot, stop_rx));
        if let Some(old) = lock(&self.loops).insert(id, SpotLoop { stop, handle }) {
            let _ = old.stop.send(true);
        }
    }
}

async fn run_loop(spot: Arc<Spot>, mut stop: watch::Receiver<bool>) {
    debug!(spot = %spot.id(), "control loop started");
    loop {
        let at = now();
        let next = spot.next_eligible_check(at);
        let wait = match next {
            Some(t) => (t - at).to_std().unwrap_or(Duration::ZERO).min(IDLE_RECHECK),
            None => IDLE_RECHECK,
        };

        tokio::select! {
            _ = stop.changed() => break,
            _ = spot.schedule_changed().notified() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        let at = now();
        if !is_due(spot.next_eligible_check(at), at) {
            continue;
        }
        match spot.check(CheckTrigger::Automatic).await {
            Ok(_) => {}
            Err(SpotError::CheckInProgress(_)) => {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tokio::time::sleep(BUSY_RETRY) => {}
                }
            }
            // Already logged and published by the spot.
            Err(_) => {}
        }
    }
    debug!(spot = %spot.id(), "control loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spot::tests::{ScriptedAdapter, StillCamera, context, desk_config, verdict};
    use twinsync_types::{Cadence, ClassifierError, SpotType};

    fn supervisor(adapter: Arc<ScriptedAdapter>) -> SpotSupervisor {
        let mut cameras = CameraRegistry::new();
        cameras.register(Arc::new(StillCamera { fail: false }));
        SpotSupervisor::new(context(adapter, Duration::from_secs(5)), cameras)
    }

    fn hall_config() -> SpotConfig {
        SpotConfig {
            name: "Hallway".into(),
            camera: "still".into(),
            spot_type: SpotType::Entryway,
            definition: "Shoes on the rack".into(),
            voice: VoicePolicy::Minimal,
            cadence: Cadence::Manual,
        }
    }

    #[tokio::test]
    async fn add_spot_validates_and_rejects_duplicates() {
        let sup = supervisor(Arc::new(ScriptedAdapter::default()));
        sup.add_spot(desk_config(Cadence::Manual)).unwrap();

        let dup = sup.add_spot(desk_config(Cadence::TimesPerDay(2))).unwrap_err();
        assert!(matches!(dup, SpotError::Configuration(_)));

        let mut bad_camera = hall_config();
        bad_camera.camera = "garage".into();
        let mut empty = hall_config();
        empty.name = "Empty".into();
        empty.definition = " ".into();
        let rejected = sup.add_spots([bad_camera, empty, hall_config()]);
        assert_eq!(rejected.len(), 2);
        assert!(matches!(rejected[1].1, SpotError::InvalidDefinition(_)));
        assert_eq!(sup.spots().len(), 2);
    }

    #[tokio::test]
    async fn handle_dispatches_actions() {
        let adapter = Arc::new(ScriptedAdapter::default());
        adapter.push(Ok(verdict(&["mug"], &["laptop"])));
        let sup = supervisor(adapter);
        sup.add_spot(desk_config(Cadence::EveryHours(4))).unwrap();

        let action = SpotAction::from_service_call(r#"{"service":"check","spot":"Work Desk"}"#).unwrap();
        let ActionOutcome::Report(report) = sup.handle(action).await.unwrap() else {
            panic!("expected a report");
        };
        assert_eq!(report.to_sort.len(), 1);

        let snooze = sup
            .handle(SpotAction::Snooze {
                spot: "work_desk".into(),
                duration_minutes: None,
            })
            .await
            .unwrap();
        assert!(matches!(snooze, ActionOutcome::Snooze(Some(s)) if s.until.is_none()));
        assert_eq!(sup.spot("work_desk").unwrap().next_eligible_check(now()), None);

        let reset = sup.handle(SpotAction::Reset { spot: "work_desk".into() }).await.unwrap();
        assert!(matches!(reset, ActionOutcome::Streak(s) if s.is_sorted()));

        let unknown = sup.handle(SpotAction::Check { spot: "attic".into() }).await.unwrap_err();
        assert_eq!(unknown, SpotError::UnknownSpot("attic".into()));
    }

    #[tokio::test]
    async fn check_all_reports_each_spot() {
        let adapter = Arc::new(ScriptedAdapter::default());
        adapter.push(Err(ClassifierError::Http("502".into())));
        let sup = supervisor(adapter);
        sup.add_spot(desk_config(Cadence::Manual)).unwrap();
        sup.add_spot(hall_config()).unwrap();

        let results = sup.check_all().await;
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["hallway", "work_desk"]);
        assert_eq!(results.iter().filter(|(_, r)| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn remove_spot_deletes_ledger_rows() {
        let sup = supervisor(Arc::new(ScriptedAdapter::default()));
        sup.add_spot(desk_config(Cadence::Manual)).unwrap();
        sup.spot("work_desk").unwrap().check(CheckTrigger::Manual).await.unwrap();
        let mut events = sup.context().bus.subscribe_all();

        sup.remove_spot("Work Desk").await.unwrap();
        assert!(sup.spot("work_desk").is_err());
        let ledger = lock(&sup.context().ledger);
        assert!(ledger.latest_definition("work_desk").unwrap().is_none());
        assert!(ledger.last_check_at("work_desk").unwrap().is_none());
        drop(ledger);
        assert!(matches!(
            events.try_recv().map(|e| e.payload),
            Some(EventPayload::SpotRemoved { .. })
        ));
        assert!(sup.remove_spot("work_desk").await.is_err());
    }

    #[tokio::test]
    async fn remove_spot_waits_for_the_running_check() {
        let adapter = Arc::new(ScriptedAdapter {
            delay: Duration::from_millis(200),
            ..ScriptedAdapter::default()
        });
        adapter.push(Ok(verdict(&[], &["laptop"])));
        let sup = supervisor(adapter);
        let spot = sup.add_spot(desk_config(Cadence::Manual)).unwrap();

        let (checked, removed) = tokio::join!(spot.check(CheckTrigger::Manual), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sup.remove_spot("work_desk").await
        });
        removed.unwrap();
        assert_eq!(checked.unwrap_err(), SpotError::UnknownSpot("work_desk".into()));

        let ledger = lock(&sup.context().ledger);
        assert!(ledger.last_check_at("work_desk").unwrap().is_none());
        assert!(ledger.latest_definition("work_desk").unwrap().is_none());
        assert_eq!(ledger.load_streak("work_desk").unwrap(), StreakState::default());
        assert_eq!(ledger.load_schedule_anchor("work_desk").unwrap(), None);
        drop(ledger);

        // A handle kept past removal cannot write anything either.
        assert_eq!(
            spot.check(CheckTrigger::Manual).await.unwrap_err(),
            SpotError::UnknownSpot("work_desk".into())
        );
        assert!(lock(&sup.context().ledger).last_check_at("work_desk").unwrap().is_none());
    }

    #[tokio::test]
    async fn control_loop_runs_due_checks_until_shutdown() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let sup = supervisor(adapter);
        // The last automatic attempt was long ago.
        lock(&sup.context().ledger)
            .save_schedule_anchor("work_desk", Some(now() - chrono::Duration::hours(2)))
            .unwrap();
        let spot = sup.add_spot(desk_config(Cadence::EveryHours(1))).unwrap();
        assert!(is_due(spot.next_eligible_check(now()), now()));

        let mut checks = sup.context().bus.subscribe_to(twinsync_middleware::Topic::Checks);
        sup.start();
        let event = tokio::time::timeout(Duration::from_secs(2), checks.next())
            .await
            .expect("automatic check did not run")
            .unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::CheckCompleted(ref r) if r.trigger == CheckTrigger::Automatic
        ));

        sup.shutdown().await;
        assert!(!sup.is_running());
        // Anchored on the automatic check: nothing due for another hour.
        assert!(!is_due(spot.next_eligible_check(now()), now()));
    }
}
