//! Snapshot accumulation and diffing across header boundaries

use crate::columns::{is_header, ColumnLayout, ProcessRecord};
use crate::protocol::ProcessEvent;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Records collected between two header sightings, at most one per pid.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Vec<ProcessRecord>,
    pids: HashSet<String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the record unless its pid is already present. First one wins.
    pub fn insert(&mut self, record: ProcessRecord) -> bool {
        if !self.pids.insert(record.pid.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, pid: &str) -> bool {
        self.pids.contains(pid)
    }

    pub fn records(&self) -> &[ProcessRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<ProcessRecord> for Snapshot {
    fn from_iter<I: IntoIterator<Item = ProcessRecord>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

/// Command-name substrings. Empty means everything passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    patterns: Vec<String>,
}

impl FilterSet {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn matches(&self, command: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| command.contains(p.as_str()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDiff {
    pub appeared: Vec<ProcessEvent>,
    pub disappeared: Vec<ProcessEvent>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }
}

/// Records of `from` whose pid is missing in `other` and whose command passes
/// the filter, stamped with `now`.
fn missing_from(from: &Snapshot, other: &Snapshot, filters: &FilterSet, now: DateTime<Utc>) -> Vec<ProcessEvent> {
    from.records()
        .iter()
        .filter(|r| !other.contains(&r.pid))
        .filter(|r| filters.matches(&r.command))
        .map(|r| ProcessEvent::from_record(r, now))
        .collect()
}

pub fn diff(previous: &Snapshot, current: &Snapshot, filters: &FilterSet, now: DateTime<Utc>) -> SnapshotDiff {
    SnapshotDiff {
        disappeared: missing_from(previous, current, filters, now),
        appeared: missing_from(current, previous, filters, now),
    }
}

/// Line-driven state machine turning the tool's output into lifecycle diffs.
///
/// Lines before the first header are ignored. The sample between the first
/// and second header becomes the baseline, and every later header closes a
/// sample and diffs it against the one before.
#[derive(Debug, Default)]
pub struct SnapshotDiffer {
    layout: ColumnLayout,
    previous: Option<Snapshot>,
    current: Option<Snapshot>,
    filters: FilterSet,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(&self) -> ColumnLayout {
        self.layout
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: FilterSet) {
        self.filters = filters;
    }

    /// Feeds one line. Returns a diff only at a header boundary that closes a
    /// sample following a complete baseline.
    pub fn ingest(&mut self, line: &str, now: DateTime<Utc>) -> Option<SnapshotDiff> {
        self.layout.resolve(line);

        if is_header(line) {
            let closed = self.current.replace(Snapshot::new())?;
            let changes = self
                .previous
                .as_ref()
                .map(|previous| diff(previous, &closed, &self.filters, now));
            self.previous = Some(closed);
            return changes;
        }

        if let (Some(current), Some(record)) = (self.current.as_mut(), self.layout.parse_record(line)) {
            current.insert(record);
        }
        None
    }

    /// The best view of what is running right now: the last complete sample,
    /// or the one being collected if none has closed yet. Filtered.
    pub fn visible_records(&self) -> Vec<ProcessRecord> {
        self.previous
            .as_ref()
            .or(self.current.as_ref())
            .map(|s| {
                s.records()
                    .iter()
                    .filter(|r| self.filters.matches(&r.command))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops both snapshots. Column layout and filters survive.
    pub fn clear_snapshots(&mut self) {
        self.previous = None;
        self.current = None;
    }
}
