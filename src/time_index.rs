// Time index over a cue set: sorted by start, locality scan then binary search.
// Rule: exact containment beats nearest match; ties go to the earlier cue.
// See DESIGN.md: Time Index

use std::collections::HashMap;

use crate::types::Cue;

/// Best-effort nearest matches further than this (seconds) are rejected.
pub const NEAREST_MATCH_CAP: f64 = 1.0;

/// Entries scanned before the hint position.
const HINT_BACK: usize = 2;
/// Entries scanned after the hint position.
const HINT_FORWARD: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct TimeIndexEntry {
    pub start: f64,
    pub end: f64,
    /// Position of the cue in the original cue slice.
    pub index: usize,
    pub id: String,
}

impl TimeIndexEntry {
    /// Half-open containment, so a boundary instant belongs to the cue starting there.
    fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    /// Distance from `time` to this entry's interval (zero inside).
    fn distance(&self, time: f64) -> f64 {
        if time < self.start {
            self.start - time
        } else if time > self.end {
            time - self.end
        } else {
            0.0
        }
    }
}

/// Derived lookup structure. Rebuilt wholesale whenever the cue set changes.
#[derive(Debug, Clone, Default)]
pub struct TimeIndex {
    entries: Vec<TimeIndexEntry>,
    /// Running maximum of `end` over `entries[..=i]`; bounds the backward walk.
    max_end: Vec<f64>,
    /// Cue index -> entry position.
    positions: Vec<usize>,
}

impl TimeIndex {
    pub fn build(cues: &[Cue]) -> Self {
        let mut entries: Vec<TimeIndexEntry> = cues
            .iter()
            .enumerate()
            .map(|(index, cue)| TimeIndexEntry {
                start: cue.start_secs(),
                end: cue.end_secs(),
                index,
                id: cue.id.clone(),
            })
            .collect();
        // Stable: cues sharing a start keep their source order.
        entries.sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut max_end = Vec::with_capacity(entries.len());
        let mut running = f64::NEG_INFINITY;
        for entry in &entries {
            running = running.max(entry.end);
            max_end.push(running);
        }

        let mut positions = vec![0; entries.len()];
        for (position, entry) in entries.iter().enumerate() {
            positions[entry.index] = position;
        }

        TimeIndex {
            entries,
            max_end,
            positions,
        }
    }

    pub fn entries(&self) -> &[TimeIndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the cue index active at `time` (seconds, offset already applied).
    ///
    /// `hint` is the currently active cue index; playback usually advances one
    /// cue at a time, so a small window around it is checked first.
    pub fn lookup(&self, time: f64, tolerance: f64, hint: Option<usize>) -> Option<usize> {
        if self.entries.is_empty() || !time.is_finite() {
            return None;
        }

        if let Some(found) = hint.and_then(|h| self.scan_window(time, h)) {
            return Some(self.entries[found].index);
        }

        // Entries before `split` start at or before `time`.
        let split = self.entries.partition_point(|e| e.start <= time);

        if let Some(found) = self.containing_before(time, split) {
            return Some(self.entries[found].index);
        }

        self.nearest(time, split, tolerance.max(NEAREST_MATCH_CAP))
            .map(|position| self.entries[position].index)
    }

    fn scan_window(&self, time: f64, hint: usize) -> Option<usize> {
        let position = *self.positions.get(hint)?;
        let first = position.saturating_sub(HINT_BACK);
        let last = (position + HINT_FORWARD).min(self.entries.len() - 1);

        // A later-starting container past the window would win the search.
        if self.entries.get(last + 1).is_some_and(|e| e.start <= time) {
            return None;
        }
        (first..=last).rev().find(|&p| self.entries[p].contains(time))
    }

    fn containing_before(&self, time: f64, split: usize) -> Option<usize> {
        let mut position = split;
        while position > 0 {
            position -= 1;
            if self.max_end[position] <= time {
                // Nothing at or before this position reaches `time`.
                return None;
            }
            if self.entries[position].contains(time) {
                return Some(position);
            }
        }
        None
    }

    fn nearest(&self, time: f64, split: usize, limit: f64) -> Option<usize> {
        let before = split.checked_sub(1).map(|p| self.best_before(p));
        let after = (split < self.entries.len()).then_some(split);

        let candidate = match (before, after) {
            (Some(b), Some(a)) => {
                // `<=` keeps the earlier cue on equal distance.
                if self.entries[b].distance(time) <= self.entries[a].distance(time) {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        (self.entries[candidate].distance(time) <= limit).then_some(candidate)
    }

    /// Among entries starting at or before `time` (none of which contain it),
    /// the one ending latest is the closest. The first such entry wins on equal ends.
    fn best_before(&self, last: usize) -> usize {
        let target = self.max_end[last];
        self.max_end[..=last].partition_point(|&end| end < target)
    }
}

/// Cue set plus its derived index and id lookup.
#[derive(Debug, Clone, Default)]
pub struct CueTrack {
    cues: Vec<Cue>,
    index: TimeIndex,
    by_id: HashMap<String, usize>,
}

impl CueTrack {
    pub fn new(cues: Vec<Cue>) -> Self {
        let index = TimeIndex::build(&cues);
        let by_id = cues
            .iter()
            .enumerate()
            .map(|(i, cue)| (cue.id.clone(), i))
            .collect();
        CueTrack { cues, index, by_id }
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn get(&self, index: usize) -> Option<&Cue> {
        self.cues.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn time_index(&self) -> &TimeIndex {
        &self.index
    }

    pub fn lookup(&self, time: f64, tolerance: f64, hint: Option<usize>) -> Option<usize> {
        self.index.lookup(time, tolerance, hint)
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}
