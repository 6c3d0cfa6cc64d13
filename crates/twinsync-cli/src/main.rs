//! `twinsync-cli` – TwinSync Command Line Interface
//!
//! This binary is the primary entry point for a TwinSync installation. It:
//!
//! 1. Loads `~/.twinsync/config.toml`, writing a default file on first run.
//! 2. Opens the SQLite ledger, registers cameras and validates spots. Invalid
//!    spots are reported and skipped; the rest are scheduled.
//! 3. Starts one control loop per spot and projects bus events onto the
//!    entity surface shown by `/status`.
//! 4. Drops the user into an **interactive REPL** exposing every inbound
//!    action (`/check`, `/snooze`, `/voice`, …).
//! 5. Intercepts **Ctrl-C** to stop the control loops before exiting.

mod config;
mod repl;

use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

use twinsync_memory::ledger::Ledger;
use twinsync_middleware::{EntitySurface, EventBus};
use twinsync_runtime::{SpotContext, SpotSupervisor, VisionDriver};
use twinsync_types::{Event, EventPayload};

use crate::repl::lock;

const BUS_CAPACITY: usize = 256;

fn main() {
    // RUST_LOG filters (default "info"); TWINSYNC_LOG_FORMAT=json switches
    // to newline-delimited JSON. User-facing output still uses println!.
    let _telemetry = twinsync_runtime::init_tracing("twinsync");

    print_banner();

    let cfg = load_config();
    let settings = match cfg.spot_settings() {
        Ok(s) => s,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    // ── Ledger ────────────────────────────────────────────────────────────
    if let Some(parent) = cfg.db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(error = %e, dir = %parent.display(), "could not create ledger directory");
        }
    }
    let ledger = match Ledger::open(&cfg.db_path) {
        Ok(l) => l,
        Err(e) => {
            println!("{} {}: {}", "Failed to open ledger".red(), cfg.db_path.display(), e);
            return;
        }
    };
    println!("  Ledger  : {}", cfg.db_path.display().to_string().bold());
    println!("  Vision  : {} ({})", cfg.model.bold(), cfg.vision_url.dimmed());
    if cfg.api_key.is_empty() {
        println!("  {}", "No API key configured; set api_key or TWINSYNC_API_KEY.".yellow());
    }

    // ── Event bus → entity surface ────────────────────────────────────────
    let bus = EventBus::new(BUS_CAPACITY);
    let surface = Arc::new(Mutex::new(EntitySurface::new(cfg.overdue_after())));
    let mut events = bus.subscribe_all();
    {
        let surface = surface.clone();
        rt.spawn(async move {
            while let Some(event) = events.next().await {
                lock(&surface).apply(&event);
            }
        });
    }

    // ── Cameras and spots ─────────────────────────────────────────────────
    let (cameras, camera_problems) = cfg.camera_registry();
    for problem in &camera_problems {
        println!("  {} {}", "Camera skipped:".yellow(), problem);
    }
    let (spots, mut rejected) = cfg.partition_spots(&cameras);

    let ctx = SpotContext {
        adapter: Arc::new(VisionDriver::new(cfg.vision_config())),
        ledger: Arc::new(Mutex::new(ledger)),
        bus,
        settings,
    };
    let supervisor = Arc::new(SpotSupervisor::new(ctx, cameras));
    rejected.extend(supervisor.add_spots(spots));
    for (name, e) in &rejected {
        println!("  {} {}: {}", "Spot not scheduled:".red(), name.bold(), e);
    }
    seed_surface(&supervisor, &surface);

    let spot_count = supervisor.spots().len();
    if spot_count == 0 {
        println!(
            "  {} Add [[cameras]] and [[spots]] to {} and restart.",
            "No spots configured.".yellow(),
            config::config_path().display().to_string().bold()
        );
    } else {
        println!("  {} spot(s) scheduled.", spot_count.to_string().bold());
    }
    rt.block_on(async { supervisor.start() });
    info!(spots = spot_count, "twinsync started");

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let (stop_tx, mut stop_rx) = watch::channel(false);
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping control loops …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            let _ = stop_tx.send(true);
        }) {
            warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
        }
    }
    {
        // The REPL may be blocked on stdin; stop the loops from here.
        let supervisor = supervisor.clone();
        rt.spawn(async move {
            if stop_rx.changed().await.is_ok() {
                supervisor.shutdown().await;
                println!("{}", "  ✓ Exiting TwinSync.".green());
                std::process::exit(130);
            }
        });
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let shell = repl::Shell {
        supervisor: supervisor.clone(),
        surface,
    };
    repl::run(&rt, &shell, shutdown);

    rt.block_on(supervisor.shutdown());
}

/// Load the config, writing defaults on first run.
fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config  : {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

/// Fill the entity surface with what the ledger already knows, so `/status`
/// is complete before the first check of this session.
fn seed_surface(supervisor: &SpotSupervisor, surface: &Mutex<EntitySurface>) {
    let now = chrono::Utc::now();
    let mut surface = lock(surface);
    for snapshot in supervisor.snapshots() {
        surface.register(&snapshot.id, &snapshot.name);
        if let Some(result) = snapshot.last_check {
            surface.apply(&Event::new("twinsync-cli", EventPayload::CheckCompleted(result)));
        }
        if let Some(report) = snapshot.last_report {
            surface.apply(&Event::new("twinsync-cli", EventPayload::ReportRendered(report)));
        }
        surface.apply(&Event::new(
            "twinsync-cli",
            EventPayload::StreakUpdated {
                spot_id: snapshot.id.clone(),
                streak: snapshot.streak,
            },
        ));
        surface.apply(&Event::new(
            "twinsync-cli",
            EventPayload::ScheduleUpdated {
                spot_id: snapshot.id,
                next_check: snapshot.next_check,
            },
        ));
    }
    let system = surface.system_entities(now);
    info!(
        spots = system.spot_count,
        needing_attention = system.spots_needing_attention,
        "entity surface seeded"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  _____          _       ____                   "#.bold().cyan());
    println!("{}", r#" |_   _|_      _(_)_ __ / ___| _   _ _ __   ___ "#.bold().cyan());
    println!("{}", r#"   | | \ \ /\ / / | '_ \\___ \| | | | '_ \ / __|"#.bold().cyan());
    println!("{}", r#"   | |  \ V  V /| | | | |___) | |_| | | | | (__ "#.bold().cyan());
    println!("{}", r#"   |_|   \_/\_/ |_|_| |_|____/ \__, |_| |_|\___|"#.bold().cyan());
    println!("{}", r#"                               |___/            "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "TwinSync Spot".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Keeps track of whether your spots look the way you want them to");
    println!();
}
