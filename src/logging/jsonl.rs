//! JSONL event log for idle transitions.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::idle::IdleEvent;

/// Event types for JSONL logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LogEvent {
    #[serde(rename = "session_start")]
    SessionStart {
        timestamp: DateTime<Utc>,
        version: String,
    },
    #[serde(rename = "session_end")]
    SessionEnd {
        timestamp: DateTime<Utc>,
        timeouts: u64,
        returns: u64,
    },
    #[serde(rename = "idle_timeout")]
    IdleTimeout {
        timestamp: DateTime<Utc>,
        target: String,
        duration_ms: u64,
    },
    #[serde(rename = "idle_return")]
    IdleReturn {
        timestamp: DateTime<Utc>,
        target: String,
        duration_ms: u64,
        idle_ms: u64,
    },
}

/// Append-only JSONL writer, one file per local day.
pub struct JsonlLogger {
    /// Directory for log files
    logs_dir: PathBuf,
    /// Current log file writer
    current_file: Option<BufWriter<File>>,
    /// Current date (for rotation)
    current_date: Option<String>,
    /// Timeouts logged since start
    timeouts: u64,
    /// Returns logged since start
    returns: u64,
}

impl JsonlLogger {
    /// Create a new JSONL logger.
    pub fn new(logs_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        Ok(Self {
            logs_dir,
            current_file: None,
            current_date: None,
            timeouts: 0,
            returns: 0,
        })
    }

    /// Get or create the log file for today.
    fn get_writer(&mut self) -> Result<&mut BufWriter<File>> {
        let today = Local::now().format("%Y-%m-%d").to_string();

        if self.current_date.as_ref() != Some(&today) {
            let log_path = self.logs_dir.join(format!("{}.jsonl", today));

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

            self.current_file = Some(BufWriter::new(file));
            self.current_date = Some(today);

            debug!("Opened log file: {:?}", log_path);
        }

        self.current_file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No log file available"))
    }

    /// Write a line to the JSONL log.
    fn write_line(&mut self, entry: &LogEvent) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let writer = self.get_writer()?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    /// Log session start event.
    pub fn log_session_start(&mut self, version: &str) -> Result<()> {
        let event = LogEvent::SessionStart {
            timestamp: Utc::now(),
            version: version.to_string(),
        };
        info!("Session started");
        self.write_line(&event)
    }

    /// Log session end event with the transition counts seen so far.
    pub fn log_session_end(&mut self) -> Result<()> {
        let event = LogEvent::SessionEnd {
            timestamp: Utc::now(),
            timeouts: self.timeouts,
            returns: self.returns,
        };
        info!(
            "Session ended, {} timeouts and {} returns",
            self.timeouts, self.returns
        );
        self.write_line(&event)
    }

    /// Log an idle timeout or return.
    pub fn log_idle_event<T: Display>(&mut self, event: &IdleEvent<T>) -> Result<()> {
        let entry = match event {
            IdleEvent::Timeout { target, duration } => {
                self.timeouts += 1;
                LogEvent::IdleTimeout {
                    timestamp: Utc::now(),
                    target: target.to_string(),
                    duration_ms: duration.as_millis(),
                }
            }
            IdleEvent::Return {
                target,
                duration,
                idle_for,
            } => {
                self.returns += 1;
                LogEvent::IdleReturn {
                    timestamp: Utc::now(),
                    target: target.to_string(),
                    duration_ms: duration.as_millis(),
                    idle_ms: idle_for.as_millis() as u64,
                }
            }
        };
        self.write_line(&entry)
    }

    /// Idle timeouts logged this session.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Idle returns logged this session.
    pub fn returns(&self) -> u64 {
        self.returns
    }
}

impl Drop for JsonlLogger {
    fn drop(&mut self) {
        if let Some(ref mut writer) = self.current_file {
            let _ = writer.flush();
        }
    }
}
