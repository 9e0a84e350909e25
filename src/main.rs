//! Idlewatch - idle timer daemon
//!
//! Registers the configured targets and durations, reads activity signals
//! from stdin, and reports every idle timeout and return through tracing
//! and a JSONL event log.
//!
//! Input lines:
//!
//! ```text
//! <target> <signal>             activity, if the signal counts per config
//! idle <target>                 report time since the target's last activity
//! forget <target> [duration]    stop one duration (default 30000)
//! forget-all <target>           stop every duration
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, trace, warn};

use idlewatch::config::Config;
use idlewatch::idle::{IdleDuration, IdleEvent, IdleTimers};
use idlewatch::logging::{self, JsonlLogger};

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One parsed stdin line.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Signal { target: &'a str, kind: &'a str },
    IdleTime { target: &'a str },
    Forget { target: &'a str, duration_ms: u64 },
    ForgetAll { target: &'a str },
}

fn parse_line(line: &str) -> Option<Input<'_>> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;
    let third = parts.next();

    let input = match first {
        "idle" => Input::IdleTime { target: second },
        "forget" => Input::Forget {
            target: second,
            duration_ms: match third {
                Some(raw) => raw.parse().ok()?,
                None => IdleDuration::DEFAULT.as_millis(),
            },
        },
        "forget-all" => Input::ForgetAll { target: second },
        target => Input::Signal {
            target,
            kind: second,
        },
    };
    Some(input)
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    logging::init_tracing(&config.logging.level, config.logging.format)?;

    info!("Starting idlewatch v{}", VERSION);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let mut jsonl_logger = JsonlLogger::new(config.logging.logs_dir())?;
    jsonl_logger.log_session_start(VERSION)?;

    let (timers, worker) = IdleTimers::<String>::spawn();
    let mut events = timers.subscribe();

    for target in &config.targets {
        for duration_ms in target.durations(config.idle.default_duration_ms) {
            timers
                .register(target.name.clone(), duration_ms)
                .await
                .with_context(|| format!("Failed to register {}ms on {:?}", duration_ms, target.name))?;
        }
        info!(
            "Watching {:?} for {:?} ms",
            target.name,
            target.durations(config.idle.default_duration_ms)
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_line(&timers, &config, &line).await,
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        report(&event);
                        if let Err(e) = jsonl_logger.log_idle_event(&event) {
                            warn!("Failed to log idle event: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} idle events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Shutting down...");
    jsonl_logger.log_session_end()?;
    timers.shutdown();
    worker.await.context("Idle timer service panicked")?;

    Ok(())
}

async fn handle_line(timers: &IdleTimers<String>, config: &Config, line: &str) {
    let Some(input) = parse_line(line) else {
        if !line.trim().is_empty() {
            warn!("Ignoring malformed input: {:?}", line);
        }
        return;
    };

    let result = match input {
        Input::Signal { target, kind } => {
            if !config.activity.counts(kind) {
                trace!("Signal {:?} on {:?} does not count as activity", kind, target);
                return;
            }
            timers.activity(target.to_string())
        }
        Input::IdleTime { target } => match timers.idle_time(target.to_string()).await {
            Ok(idle) => {
                info!("{:?} idle for {} ms", target, idle.as_millis());
                Ok(())
            }
            Err(e) => Err(e),
        },
        Input::Forget {
            target,
            duration_ms,
        } => timers.unregister(target.to_string(), duration_ms).await,
        Input::ForgetAll { target } => timers.unregister_all(target.to_string()).await,
    };

    if let Err(e) = result {
        warn!("{:?}: {}", line, e);
    }
}

fn report(event: &IdleEvent<String>) {
    match event {
        IdleEvent::Timeout { target, duration } => {
            info!("{:?} idle:timeout timer={}", target, duration);
        }
        IdleEvent::Return {
            target,
            duration,
            idle_for,
        } => {
            info!(
                "{:?} idle:return timer={} idleTime={}ms",
                target,
                duration,
                idle_for.as_millis()
            );
        }
    }
}
