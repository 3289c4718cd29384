//! keyrulesd: feeds key events read from stdin through the rule engine.
//!
//! One command per line:
//!
//! ```text
//! down <key> [ms]            real key press
//! up <key> [ms]              real key release
//! synthetic down|up <key>    injected event, always passes through
//! cancel <key> | cancel-all
//! tick <ms>                  advance replay time and run timers
//! reload | stats
//! ```
//!
//! In live mode timestamps come from the monotonic clock and a timer thread
//! drives long presses. With `--replay` the given timestamps are used as-is
//! and timers run whenever time advances.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use keyrules::backend::{CommandExecutor, CommandSettings, DryRunExecutor};
use keyrules::clock::{Clock, ManualClock, SystemClock};
use keyrules::config::{CachedRuleStore, FileRuleStore, render_rule_file};
use keyrules::dispatch::ActionExecutor;
use keyrules::model::{Edge, PhysicalKey, RawEvent, RuleSet, Source, Timestamp};
use keyrules::{Engine, EngineConfig, RuleProvider, Verdict};

#[derive(Parser, Debug)]
#[command(name = "keyrulesd")]
#[command(about = "Recognise key gestures from stdin and run matching rules")]
struct Args {
    /// JSON rule file; built-in defaults are used without one
    #[arg(short, long, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log actions instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Use timestamps from the input instead of the clock
    #[arg(long)]
    replay: bool,

    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    #[arg(long, default_value_t = 1000)]
    reload_ms: u64,

    #[arg(long, default_value_t = 10)]
    queue_capacity: usize,

    /// Shell template for send_key actions; {key} is the key code
    #[arg(long, default_value = "input keyevent {key}")]
    send_key_cmd: String,

    /// Program and leading arguments for launch_target actions
    #[arg(long, default_value = "am start")]
    launcher: String,

    /// Key codes that are never reported as consumed
    #[arg(long = "never-consume", value_name = "KEY")]
    never_consume: Vec<u32>,

    /// Print the built-in rules as a rule file and exit
    #[arg(long)]
    print_defaults: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Event {
        edge: Edge,
        key: u32,
        at: Option<u64>,
        source: Source,
    },
    Cancel(u32),
    CancelAll,
    Tick(u64),
    Reload,
    Stats,
}

fn parse_line(line: &str) -> Result<Line, String> {
    let mut words = line.split_whitespace();
    let head = words.next().ok_or("empty line")?;

    let number = |word: Option<&str>, what: &str| -> Result<u64, String> {
        let word = word.ok_or_else(|| format!("missing {what}"))?;
        word.parse().map_err(|_| format!("bad {what} '{word}'"))
    };
    let key = |word: Option<&str>| -> Result<u32, String> {
        number(word, "key")?
            .try_into()
            .map_err(|_| "key out of range".to_string())
    };
    let edge = |word: &str| match word {
        "down" => Ok(Edge::Down),
        "up" => Ok(Edge::Up),
        other => Err(format!("unknown edge '{other}'")),
    };

    let parsed = match head {
        "down" | "up" => Line::Event {
            edge: edge(head)?,
            key: key(words.next())?,
            at: words.next().map(|w| number(Some(w), "timestamp")).transpose()?,
            source: Source::Real,
        },
        "synthetic" => Line::Event {
            edge: edge(words.next().ok_or("missing edge")?)?,
            key: key(words.next())?,
            at: words.next().map(|w| number(Some(w), "timestamp")).transpose()?,
            source: Source::Synthetic,
        },
        "cancel" => Line::Cancel(key(words.next())?),
        "cancel-all" => Line::CancelAll,
        "tick" => Line::Tick(number(words.next(), "timestamp")?),
        "reload" => Line::Reload,
        "stats" => Line::Stats,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(parsed)
}

fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_defaults {
        println!("{}", render_rule_file(&RuleSet::builtin_default())?);
        return Ok(());
    }

    init_logging(&args.log_level);

    let manual = ManualClock::new(0);
    let clock: Arc<dyn Clock> = if args.replay {
        Arc::new(manual.clone())
    } else {
        Arc::new(SystemClock::new())
    };

    let executor: Arc<dyn ActionExecutor> = if args.dry_run {
        Arc::new(DryRunExecutor)
    } else {
        Arc::new(CommandExecutor::new(CommandSettings {
            send_key: args.send_key_cmd.clone(),
            launcher: args.launcher.clone(),
            ..CommandSettings::default()
        }))
    };

    let provider = match &args.rules {
        Some(path) => {
            tracing::info!(path = %path.display(), "watching rule file");
            let file = Arc::new(FileRuleStore::new(path));
            let cached = CachedRuleStore::spawn(file, Duration::from_millis(args.reload_ms))?;
            RuleProvider::Store(Arc::new(cached))
        }
        None => RuleProvider::Builtin,
    };

    let config = EngineConfig {
        tick: (!args.replay).then(|| Duration::from_millis(args.tick_ms.max(1))),
        reload_interval: Duration::from_millis(args.reload_ms),
        queue_capacity: args.queue_capacity,
        never_consume: args.never_consume.iter().copied().map(PhysicalKey).collect::<HashSet<_>>(),
        ..EngineConfig::default()
    };
    let engine = Engine::start(config, provider, executor, Arc::clone(&clock))?;

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    let mut replay_ms = 0u64;

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let command = match parse_line(trimmed) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(line = trimmed, error = %e, "ignoring input line");
                continue;
            }
        };

        match command {
            Line::Event { edge, key, at, source } => {
                let timestamp = if args.replay {
                    replay_ms = at.unwrap_or(replay_ms).max(replay_ms);
                    manual.set(replay_ms);
                    report_timers(&mut stdout, engine.poll_timers(Timestamp::from_millis(replay_ms)))?;
                    Timestamp::from_millis(replay_ms)
                } else {
                    clock.now()
                };
                let event = RawEvent {
                    key: PhysicalKey(key),
                    edge,
                    timestamp,
                    source,
                };
                let verdict = match engine.handle(&event) {
                    Verdict::Consumed => "consumed",
                    Verdict::PassThrough => "pass",
                };
                writeln!(stdout, "{edge:?} {key} @{} -> {verdict}", timestamp.as_millis())?;
            }
            Line::Cancel(key) => engine.cancel(PhysicalKey(key)),
            Line::CancelAll => engine.cancel_all(),
            Line::Tick(ms) => {
                if args.replay {
                    replay_ms = replay_ms.max(ms);
                    manual.set(replay_ms);
                    report_timers(&mut stdout, engine.poll_timers(Timestamp::from_millis(replay_ms)))?;
                }
            }
            Line::Reload => {
                let reloaded = engine.reload_now();
                writeln!(stdout, "reload -> {}", if reloaded { "applied" } else { "unchanged" })?;
            }
            Line::Stats => {
                writeln!(stdout, "{:?}", engine.dispatcher().stats())?;
            }
        }
        stdout.flush()?;
    }

    let drain_for = engine.dispatcher().action_timeout();
    let deadline = Instant::now() + drain_for;
    while engine.dispatcher().in_flight() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    engine.shutdown();
    Ok(())
}

fn report_timers(out: &mut impl Write, fired: usize) -> io::Result<()> {
    if fired > 0 {
        writeln!(out, "timer -> {fired} queued")?;
    }
    Ok(())
}
