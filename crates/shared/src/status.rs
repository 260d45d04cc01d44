use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::watch;

use crate::models::PipelineRun;

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Everything the control panel shows. Published through a `watch` channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveStatus {
    pub running: bool,
    /// Run in progress, updated after every article
    pub current: Option<PipelineRun>,
    /// Most recent finished run
    pub last: Option<PipelineRun>,
    pub ledger_size: usize,
    pub ledger_store: String,
    /// Set when the ledger could not be loaded and started empty
    pub ledger_degraded: Option<String>,
    /// Posted ids that are missing from the durable ledger
    pub unpersisted: Vec<String>,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub log: VecDeque<LogLine>,
}

impl LiveStatus {
    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(LogLine {
            at: Utc::now(),
            level,
            message: message.into(),
        });
    }

    /// The run to show on the panel: the live one if any, else the last.
    pub fn latest_run(&self) -> Option<&PipelineRun> {
        self.current.as_ref().or(self.last.as_ref())
    }
}

pub fn log_line(status: &watch::Sender<LiveStatus>, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    status.send_modify(|s| s.push_log(level, message));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let mut status = LiveStatus::default();
        for i in 0..(MAX_LOG_LINES + 25) {
            status.push_log(LogLevel::Info, format!("line {}", i));
        }
        assert_eq!(status.log.len(), MAX_LOG_LINES);
        assert_eq!(status.log.front().unwrap().message, "line 25");
    }
}
