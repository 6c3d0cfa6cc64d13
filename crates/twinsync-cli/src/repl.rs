//! REPL – Read-Eval-Print Loop for the TwinSync interactive shell.
//!
//! Supported slash-commands:
//!   /help                        – show this list
//!   /status [spot]               – entity state of every spot, or one in detail
//!   /report <spot>               – the last rendered report
//!   /check <spot>                – run a check now
//!   /check_all                   – check every spot
//!   /reset <spot>                – mark a spot reset (streak bookkeeping)
//!   /snooze <spot> [minutes]     – suppress automatic checks
//!   /unsnooze <spot>             – resume automatic checks
//!   /voice <spot> <voice>        – direct, supportive, analytical, minimal,
//!                                  gentle or custom:<template>
//!   /cadence <spot> <cadence>    – manual, <n>x (per day) or <h>h
//!   /definition <spot> <text>    – replace the ready-state description
//!   /remove <spot>               – delete a spot and its history
//!   /call <json>                 – raw service call
//!   /quit | /exit                – gracefully exit the CLI
//!
//! Spots may be named by id (`work_desk`). Commands taking a single spot also
//! accept the display name (`/check Work Desk`).

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, Utc};
use tokio::runtime::Runtime;
use twinsync_middleware::{EntitySurface, SpotAction, SpotEntities};
use twinsync_runtime::{ActionOutcome, SpotSupervisor};
use twinsync_types::{Cadence, RenderedReport, SpotError, VoicePolicy};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status(Option<String>),
    Report(String),
    Remove(String),
    /// Anything that maps onto an inbound service call.
    Action(SpotAction),
    Quit,
}

/// Parse one REPL line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    let command = match cmd {
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        "/status" => Command::Status((!rest.is_empty()).then(|| rest.to_string())),
        "/report" => Command::Report(required(cmd, rest)?.to_string()),
        "/remove" => Command::Remove(required(cmd, rest)?.to_string()),
        "/check_all" => Command::Action(SpotAction::CheckAll),
        "/check" => Command::Action(SpotAction::Check {
            spot: required(cmd, rest)?.to_string(),
        }),
        "/reset" => Command::Action(SpotAction::Reset {
            spot: required(cmd, rest)?.to_string(),
        }),
        "/unsnooze" => Command::Action(SpotAction::Unsnooze {
            spot: required(cmd, rest)?.to_string(),
        }),
        "/snooze" => {
            let (spot, minutes) = split_spot(cmd, rest)?;
            let duration_minutes = match minutes {
                "" => None,
                m => Some(
                    m.parse::<u32>()
                        .map_err(|_| format!("'{m}' is not a number of minutes"))?,
                ),
            };
            Command::Action(SpotAction::Snooze {
                spot: spot.to_string(),
                duration_minutes,
            })
        }
        "/voice" => {
            let (spot, voice) = split_spot(cmd, rest)?;
            Command::Action(SpotAction::SetVoice {
                spot: spot.to_string(),
                voice: VoicePolicy::from_str(required(cmd, voice)?).map_err(|e| e.to_string())?,
            })
        }
        "/cadence" => {
            let (spot, cadence) = split_spot(cmd, rest)?;
            Command::Action(SpotAction::SetCadence {
                spot: spot.to_string(),
                cadence: Cadence::from_str(required(cmd, cadence)?).map_err(|e| e.to_string())?,
            })
        }
        "/definition" => {
            let (spot, text) = split_spot(cmd, rest)?;
            Command::Action(SpotAction::SetDefinition {
                spot: spot.to_string(),
                definition: text.replace("\\n", "\n"),
            })
        }
        "/call" => Command::Action(
            SpotAction::from_service_call(required(cmd, rest)?).map_err(|e| e.to_string())?,
        ),
        other => return Err(format!("Unknown command: '{other}'")),
    };

    if let Command::Action(action) = &command {
        action.validate().map_err(|e| e.to_string())?;
    }
    Ok(command)
}

fn required<'a>(cmd: &str, arg: &'a str) -> Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("{cmd} needs more arguments; see /help"))
    } else {
        Ok(arg)
    }
}

/// Split `<spot> <rest>`; the spot is the first word.
fn split_spot<'a>(cmd: &str, args: &'a str) -> Result<(&'a str, &'a str), String> {
    let args = required(cmd, args)?;
    Ok(match args.split_once(char::is_whitespace) {
        Some((spot, rest)) => (spot, rest.trim()),
        None => (args, ""),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell
// ─────────────────────────────────────────────────────────────────────────────

/// What the REPL drives.
pub struct Shell {
    pub supervisor: Arc<SpotSupervisor>,
    pub surface: Arc<Mutex<EntitySurface>>,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(rt: &Runtime, shell: &Shell, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "twinsync>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Status(spot)) => cmd_status(shell, spot.as_deref()),
            Ok(Command::Report(spot)) => cmd_report(shell, &spot),
            Ok(Command::Remove(spot)) => match rt.block_on(shell.supervisor.remove_spot(&spot)) {
                Ok(()) => println!("{} {}", "✓ Removed".green(), spot.bold()),
                Err(e) => print_error(&e),
            },
            Ok(Command::Action(action)) => match rt.block_on(shell.supervisor.handle(action)) {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => print_error(&e),
            },
            Err(msg) => println!(
                "{} Type {} for available commands.",
                msg.red(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "TwinSync Commands".bold().underline());
    let rows = [
        ("/status [spot]", "entity state of all spots, or one spot in detail"),
        ("/report <spot>", "show the last report"),
        ("/check <spot>", "check a spot now"),
        ("/check_all", "check every spot"),
        ("/reset <spot>", "mark a spot as reset"),
        ("/snooze <spot> [minutes]", "pause automatic checks (1-1440 min, or until unsnoozed)"),
        ("/unsnooze <spot>", "resume automatic checks"),
        ("/voice <spot> <voice>", "direct | supportive | analytical | minimal | gentle | custom:<template>"),
        ("/cadence <spot> <cadence>", "manual | <n>x (per day) | <h>h"),
        ("/definition <spot> <text>", "replace the definition (use \\n for new lines)"),
        ("/remove <spot>", "delete a spot and its history"),
        ("/call <json>", "raw service call, e.g. {\"service\":\"check_all\"}"),
        ("/quit  /exit", "exit the CLI"),
    ];
    for (cmd, what) in rows {
        println!("  {:<28} – {}", cmd.bold().cyan(), what);
    }
    println!();
}

fn cmd_status(shell: &Shell, spot: Option<&str>) {
    let now = Utc::now();
    let surface = lock(&shell.surface);

    if let Some(spot) = spot {
        let id = match shell.supervisor.spot(spot) {
            Ok(s) => s.id().to_string(),
            Err(e) => return print_error(&e),
        };
        match surface.spot_entities(&id, now) {
            Some(entities) => print_spot_detail(&entities),
            None => println!("  {}", "no state published yet".dimmed()),
        }
        return;
    }

    let system = surface.system_entities(now);
    println!("{}", "TwinSync Status".bold().underline());
    println!(
        "  {} spot(s), {} needing attention, all sorted: {}, next check: {}",
        system.spot_count,
        system.spots_needing_attention,
        yes_no(system.all_sorted),
        fmt_time(system.next_scheduled_check)
    );
    for entities in surface.all_spots(now) {
        print_spot_line(&entities);
    }
}

fn cmd_report(shell: &Shell, spot: &str) {
    let snapshot = match shell.supervisor.spot(spot) {
        Ok(s) => s.snapshot(Utc::now()),
        Err(e) => return print_error(&e),
    };
    match &snapshot.last_report {
        Some(report) => print_report(report),
        None => println!("  {}", "no completed check yet".dimmed()),
    }
    if let Some(err) = &snapshot.last_error {
        println!("  {} {}", "Last error:".yellow(), err);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_outcome(outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Report(report) => print_report(report),
        ActionOutcome::Sweep(results) => {
            for (spot, result) in results {
                match result {
                    Ok(report) => {
                        println!("{}", format!("── {spot} ──").bold());
                        print_report(report);
                    }
                    Err(e) => println!("{} {}: {}", "✗".red(), spot.bold(), e),
                }
            }
        }
        ActionOutcome::Streak(streak) => println!(
            "{} streak {} (best {}), {} reset(s) in total",
            "✓".green(),
            streak.current,
            streak.best,
            streak.total_resets
        ),
        ActionOutcome::Snooze(Some(snooze)) => match snooze.until {
            Some(until) => println!("{} snoozed until {}", "✓".green(), fmt_time(Some(until))),
            None => println!("{} snoozed until /unsnooze", "✓".green()),
        },
        ActionOutcome::Snooze(None) => println!("{} snooze cleared", "✓".green()),
        ActionOutcome::NextCheck(next) => {
            println!("{} next automatic check: {}", "✓".green(), fmt_time(*next))
        }
        ActionOutcome::Voice(voice) => println!("{} voice set to {}", "✓".green(), voice),
        ActionOutcome::Definition(def) => println!(
            "{} definition recorded ({} expected, {} excluded hint(s))",
            "✓".green(),
            def.expected.len(),
            def.excluded.len()
        ),
    }
}

fn print_report(report: &RenderedReport) {
    let text = report.to_text();
    let mut lines = text.lines();
    if let Some(headline) = lines.next() {
        println!("  {}", headline.bold());
    }
    for line in lines {
        println!("  {line}");
    }
}

fn print_spot_line(e: &SpotEntities) {
    let state = if e.snoozed {
        "snoozed".blue()
    } else if e.sorted {
        "sorted".green()
    } else if e.last_check.is_none() {
        "unchecked".dimmed()
    } else {
        format!("{} to sort", e.to_sort_count).yellow()
    };
    let overdue = if e.overdue { " overdue".red().to_string() } else { String::new() };
    println!(
        "  {:<20} {:<12} streak {:>3} (best {:>3})  next {}{}",
        e.name.bold(),
        state,
        e.streak,
        e.best_streak,
        fmt_time(e.next_scheduled_check),
        overdue
    );
}

fn print_spot_detail(e: &SpotEntities) {
    println!("{} ({})", e.name.bold().underline(), e.spot_id.dimmed());
    println!("  sorted           : {}", yes_no(e.sorted));
    println!("  needs attention  : {}", yes_no(e.needs_attention));
    let snooze = match (e.snoozed, e.snooze_until) {
        (false, _) => "no".to_string(),
        (true, None) => "until unsnoozed".to_string(),
        (true, until) => format!("until {}", fmt_time(until)),
    };
    println!("  snoozed          : {snooze}");
    println!("  to sort ({:>2})     : {}", e.to_sort_count, e.to_sort_items.join(", "));
    println!("  looking good ({:>2}): {}", e.looking_good_count, e.looking_good_items.join(", "));
    println!("  streak           : {} (best {})", e.streak, e.best_streak);
    println!("  last check       : {}", fmt_time(e.last_check));
    println!("  next check       : {}", fmt_time(e.next_scheduled_check));
    println!("  overdue          : {}", yes_no(e.overdue));
    if !e.notes.is_empty() {
        println!("  notes            : {}", e.notes);
    }
    if let Some(err) = &e.last_error {
        println!("  last error       : {}", err.yellow());
    }
}

fn print_error(e: &SpotError) {
    println!("{} {}", "Error:".red().bold(), e);
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn fmt_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%a %H:%M").to_string(),
        None => "–".to_string(),
    }
}
