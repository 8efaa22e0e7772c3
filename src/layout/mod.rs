//! Track layout engine.
//!
//! Each mode turns one filtered batch into lanes under a device track:
//!
//! - [`pipeline`]: same-named stages packed into non-overlapping lanes.
//! - [`linear`]: one lane per instruction.
//! - [`callstack`]: one lane per thread, CALL/RETURN paired into slices.
//! - [`counter`]: one counter track per counter name.
//!
//! Lane state that must survive across batches of the same device (rank
//! sequence, thread lanes, pending calls, counter tracks) lives in
//! [`DeviceLanes`], which the orchestrator keeps per view and device.

pub mod callstack;
pub mod counter;
pub mod linear;
pub mod pipeline;

use std::collections::HashMap;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::sink::TrackId;

/// Where the pipeline packer starts looking for a free lane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanePolicy {
    /// Always scan from lane 0 and take the first free lane.
    #[default]
    SmallestFirst,
    /// Scan from the lane used by the previous placement, wrapping around.
    RoundRobin,
}

/// Greedily pack `items` into lanes so that no two items sharing a lane
/// overlap. Each candidate is checked only against the last item of a lane,
/// so `items` must already be sorted by start time.
///
/// Returns item indices per lane, lanes in creation order, items in placement
/// order within each lane.
pub fn assign_lanes<T>(
    items: &[T],
    overlaps: impl Fn(&T, &T) -> bool,
    policy: LanePolicy,
) -> Vec<Vec<usize>> {
    let mut lanes: Vec<Vec<usize>> = Vec::new();
    let mut last_lane = 0;

    for (idx, item) in items.iter().enumerate() {
        let count = lanes.len();
        let first = match policy {
            LanePolicy::SmallestFirst => 0,
            LanePolicy::RoundRobin => last_lane,
        };
        let free = (0..count).map(|k| (first + k) % count).find(|&lane| {
            lanes[lane]
                .last()
                .map_or(true, |&tail| !overlaps(&items[tail], item))
        });

        let lane = match free {
            Some(lane) => lane,
            None => {
                lanes.push(Vec::new());
                count
            }
        };
        lanes[lane].push(idx);
        last_lane = lane;
    }

    lanes
}

/// A call-stack lane and the CALL timestamps still waiting for a RETURN.
#[derive(Debug)]
pub struct ThreadLane {
    pub track: TrackId,
    pub pending: Vec<u64>,
}

/// Lane state for one device under one view.
#[derive(Debug)]
pub struct DeviceLanes {
    pub track: TrackId,
    next_rank: i32,
    pub threads: HashMap<u32, ThreadLane>,
    pub counters: HashMap<String, TrackId>,
}

impl DeviceLanes {
    pub fn new(track: TrackId) -> Self {
        Self {
            track,
            next_rank: 0,
            threads: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    /// Next sibling rank for a lane under this device.
    pub fn next_rank(&mut self) -> i32 {
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }
}

/// What a layout pass produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutStats {
    pub lanes: usize,
    pub events: usize,
    pub counter_samples: usize,
    pub dropped_returns: usize,
}

impl AddAssign for LayoutStats {
    fn add_assign(&mut self, other: Self) {
        self.lanes += other.lanes;
        self.events += other.events;
        self.counter_samples += other.counter_samples;
        self.dropped_returns += other.dropped_returns;
    }
}
