//! Start-time lookup for processes reported to late-joining subscribers

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::process::Command;
use tracing::{debug, warn};

/// `ps -o lstart` in the C locale, after whitespace is collapsed.
const LSTART_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// Blocking lookup of process start times. Pids the source can't account
/// for are simply absent from the result.
pub trait StartTimeLookup: Send + Sync {
    fn start_times(&self, pids: &[String]) -> HashMap<String, DateTime<Utc>>;
}

/// Queries `ps` for the requested pids in one invocation.
pub struct PsStartTimes {
    program: String,
}

impl PsStartTimes {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for PsStartTimes {
    fn default() -> Self {
        Self::new("ps")
    }
}

impl StartTimeLookup for PsStartTimes {
    fn start_times(&self, pids: &[String]) -> HashMap<String, DateTime<Utc>> {
        let pids: Vec<&str> = pids
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
            .collect();
        if pids.is_empty() {
            return HashMap::new();
        }

        let output = Command::new(&self.program)
            .env("LC_ALL", "C")
            .args(["-o", "pid,lstart", "-p", &pids.join(",")])
            .output();
        match output {
            // ps exits non-zero when some pids are gone; whatever it printed is still usable
            Ok(out) => {
                let raw = String::from_utf8_lossy(&out.stdout);
                let times = parse_start_times(&raw);
                debug!("Resolved start time for {}/{} processes", times.len(), pids.len());
                times
            }
            Err(e) => {
                warn!("Start time lookup via {} failed: {}", self.program, e);
                HashMap::new()
            }
        }
    }
}

/// Parses `ps -o pid,lstart` output: one header line, then `PID <lstart>`
/// rows. Rows that don't parse are skipped.
pub fn parse_start_times(output: &str) -> HashMap<String, DateTime<Utc>> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let pid = words.next()?;
            let started = words.collect::<Vec<_>>().join(" ");
            Some((pid.to_string(), parse_lstart(&started)?))
        })
        .collect()
}

/// Interprets an `lstart` value in the host's local timezone.
pub fn parse_lstart(text: &str) -> Option<DateTime<Utc>> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let naive = NaiveDateTime::parse_from_str(&collapsed, LSTART_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
