//! Per-view filter predicates.
//!
//! Each dimension holds a list of rules OR'd together. An empty list passes
//! everything: absence of a filter is never "match nothing".

use std::str::FromStr;

use regex::Regex;

use crate::error::ShowError;
use crate::model::{BatchCounter, BatchFunction, BatchInstruction, Counter, Instruction};

/// `"T"` or `"start-end"`, surrounding whitespace allowed.
const TIMELINE_PATTERN: &str = r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$";

/// One timeline rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineRule {
    /// Passes a candidate whose closed window contains the timestamp.
    At(u64),
    /// Passes a candidate whose window intersects `[start, end]`.
    Range { start: u64, end: u64 },
}

impl TimelineRule {
    pub fn matches(&self, start: u64, end: u64) -> bool {
        match *self {
            TimelineRule::At(ts) => start <= ts && ts <= end,
            TimelineRule::Range {
                start: lo,
                end: hi,
            } => start <= hi && end >= lo,
        }
    }
}

impl FromStr for TimelineRule {
    type Err = ShowError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| {
            ShowError::ConfigInvalid(format!("timeline rule '{raw}': {why}"))
        };
        let re = Regex::new(TIMELINE_PATTERN).map_err(|e| invalid(&e.to_string()))?;
        let caps = re
            .captures(raw)
            .ok_or_else(|| invalid("expected a timestamp or 'start-end'"))?;
        let parse = |s: &str| s.parse::<u64>().map_err(|e| invalid(&e.to_string()));

        let first = parse(&caps[1])?;
        match caps.get(2) {
            None => Ok(TimelineRule::At(first)),
            Some(second) => {
                let end = parse(second.as_str())?;
                if first > end {
                    return Err(invalid("range starts after it ends"));
                }
                Ok(TimelineRule::Range { start: first, end })
            }
        }
    }
}

fn parse_thread_rule(raw: &str) -> Result<u32, ShowError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|e| ShowError::ConfigInvalid(format!("thread rule '{raw}': {e}")))
}

/// The five filter dimensions of a view, parsed once at configuration time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub timeline: Vec<TimelineRule>,
    pub event: Vec<String>,
    pub track: Vec<String>,
    pub device: Vec<String>,
    pub thread: Vec<u32>,
}

impl FilterSet {
    /// Build a filter set from raw rule strings.
    pub fn parse(
        timeline: &[String],
        event: &[String],
        track: &[String],
        device: &[String],
        thread: &[String],
    ) -> Result<Self, ShowError> {
        Ok(Self {
            timeline: timeline
                .iter()
                .map(|r| r.parse::<TimelineRule>())
                .collect::<Result<Vec<_>, ShowError>>()?,
            event: event.to_vec(),
            track: track.to_vec(),
            device: device.to_vec(),
            thread: thread
                .iter()
                .map(|r| parse_thread_rule(r))
                .collect::<Result<Vec<_>, ShowError>>()?,
        })
    }

    pub fn pass_timeline(&self, start: u64, end: u64) -> bool {
        self.timeline.is_empty() || self.timeline.iter().any(|r| r.matches(start, end))
    }

    pub fn pass_event(&self, event_name: &str) -> bool {
        contains_any(&self.event, event_name)
    }

    pub fn pass_track(&self, track_name: &str) -> bool {
        contains_any(&self.track, track_name)
    }

    pub fn pass_device(&self, device_name: &str) -> bool {
        contains_any(&self.device, device_name)
    }

    pub fn pass_thread(&self, thread_id: u32) -> bool {
        self.thread.is_empty() || self.thread.contains(&thread_id)
    }

    /// Instructions on selected threads, reduced to the stages that pass the
    /// timeline and event filters. Instructions left without stages are dropped.
    pub fn select_instructions(&self, batch: &BatchInstruction) -> BatchInstruction {
        let instructions = batch
            .instructions
            .iter()
            .filter(|inst| self.pass_thread(inst.thread_id))
            .filter_map(|inst| {
                let stages: Vec<_> = inst
                    .stages
                    .iter()
                    .filter(|st| {
                        self.pass_timeline(st.start_time, st.end_time) && self.pass_event(&st.name)
                    })
                    .cloned()
                    .collect();
                if stages.is_empty() {
                    return None;
                }
                Some(Instruction {
                    stages,
                    ..inst.clone()
                })
            })
            .collect();
        BatchInstruction { instructions }
    }

    pub fn select_functions(&self, batch: &BatchFunction) -> BatchFunction {
        let functions = batch
            .functions
            .iter()
            .filter(|f| {
                self.pass_thread(f.thread_id)
                    && self.pass_timeline(f.timestamp, f.timestamp)
                    && self.pass_event(&f.name)
            })
            .cloned()
            .collect();
        BatchFunction { functions }
    }

    /// Counters whose name passes the track filter, reduced to the samples
    /// inside the timeline filter. Counters left without samples are dropped.
    pub fn select_counters(&self, batch: &BatchCounter) -> BatchCounter {
        let counters = batch
            .counters
            .iter()
            .filter(|cnt| self.pass_track(&cnt.name))
            .filter_map(|cnt| {
                let values: Vec<_> = cnt
                    .values
                    .iter()
                    .filter(|v| self.pass_timeline(v.timestamp, v.timestamp))
                    .copied()
                    .collect();
                if values.is_empty() {
                    return None;
                }
                Some(Counter {
                    values,
                    ..cnt.clone()
                })
            })
            .collect();
        BatchCounter { counters }
    }
}

fn contains_any(rules: &[String], candidate: &str) -> bool {
    rules.is_empty() || rules.iter().any(|r| candidate.contains(r.as_str()))
}
