//! IPC protocol definitions (JSON messages)

use crate::columns::ProcessRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A process appearing, disappearing, or being reported to a new subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub id: String,
    pub name: String,
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
}

impl ProcessEvent {
    pub fn from_record(record: &ProcessRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: record.pid.clone(),
            name: record.command.clone(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "newProcess")]
    NewProcess,
    #[serde(rename = "removedProcess")]
    RemovedProcess,
    #[serde(rename = "currentProcess")]
    CurrentProcess,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewProcess => "newProcess",
            EventKind::RemovedProcess => "removedProcess",
            EventKind::CurrentProcess => "currentProcess",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Status,
    SetFilter { params: SetFilterParams },
    Restart { params: RestartParams },
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFilterParams {
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartParams {
    /// Sampling delay as numeric text; anything invalid falls back to 1.
    #[serde(default)]
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Response { id: Option<String>, data: serde_json::Value },
    Event { event: EventKind, data: Vec<ProcessEvent> },
    Status { data: StatusData },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub running: bool,
    pub delay: f64,
    pub filters: Vec<String>,
    pub subscriber_count: usize,
}
