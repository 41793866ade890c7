//! Header recognition and record extraction for the sampling tool's table output

use once_cell::sync::Lazy;
use regex::Regex;

static PID_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bPID\b").unwrap());
static COMMAND_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bCOMMAND\b").unwrap());
static TIME_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bTIME\+?\b").unwrap());
static DATA_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+\s+").unwrap());

/// One row of the process table. `time` is whatever the tool printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: String,
    pub command: String,
    pub time: String,
}

/// True when the line carries the `PID`, `COMMAND` and `TIME`/`TIME+` titles.
pub fn is_header(line: &str) -> bool {
    PID_TOKEN.is_match(line) && COMMAND_TOKEN.is_match(line) && TIME_TOKEN.is_match(line)
}

/// Token offsets of the columns we care about, counted over whitespace-split
/// header tokens. `None` until a header has been seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnLayout {
    pub pid: Option<usize>,
    pub time: Option<usize>,
    pub command: Option<usize>,
}

impl ColumnLayout {
    pub fn is_resolved(&self) -> bool {
        self.pid.is_some()
    }

    /// Learns column offsets from `line` if it is a header and nothing has
    /// been resolved yet. Returns whether this call resolved the layout.
    pub fn resolve(&mut self, line: &str) -> bool {
        if self.is_resolved() || !is_header(line) {
            return false;
        }
        let mut layout = ColumnLayout::default();
        for (index, token) in line.split_whitespace().enumerate() {
            if token == "PID" {
                layout.pid = Some(index);
            }
            if token.contains("TIME") {
                layout.time = Some(index);
            }
            if token == "COMMAND" {
                layout.command = Some(index);
            }
        }
        *self = layout;
        self.is_resolved()
    }

    /// Extracts a record from a data line. Lines that don't start with a
    /// numeric pid, or are too short for any resolved column, yield `None`.
    pub fn parse_record(&self, line: &str) -> Option<ProcessRecord> {
        let (pid_at, time_at, command_at) = (self.pid?, self.time?, self.command?);
        if !DATA_LINE.is_match(line) {
            return None;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        Some(ProcessRecord {
            pid: words.get(pid_at)?.to_string(),
            time: words.get(time_at)?.to_string(),
            command: words.get(command_at)?.to_string(),
        })
    }
}
