//! Pipeline mode: same-named stages packed into non-overlapping lanes.
//!
//! Stages are bucketed by name (buckets visited in lexicographic order),
//! stably sorted by start time, then packed with [`assign_lanes`]. Each lane
//! becomes a track named `<stage>_<lane>`; ranks continue the device's
//! sequence so lanes from later batches sort after earlier ones.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::debug;

use super::{assign_lanes, DeviceLanes, LanePolicy, LayoutStats};
use crate::model::{BatchInstruction, Instruction, Stage};
use crate::sink::{Annotation, RenderSink};

/// A stage together with the instruction that owns it.
struct Placed<'a> {
    stage: &'a Stage,
    instruction: &'a Instruction,
}

pub fn render(
    sink: &mut dyn RenderSink,
    device: &mut DeviceLanes,
    batch: &BatchInstruction,
    policy: LanePolicy,
) -> Result<LayoutStats> {
    let mut buckets: BTreeMap<&str, Vec<Placed<'_>>> = BTreeMap::new();
    for instruction in &batch.instructions {
        for stage in &instruction.stages {
            buckets
                .entry(stage.name.as_str())
                .or_default()
                .push(Placed { stage, instruction });
        }
    }

    let mut stats = LayoutStats::default();
    for (name, mut bucket) in buckets {
        bucket.sort_by_key(|p| p.stage.start_time);
        let lanes = assign_lanes(&bucket, |a, b| a.stage.overlaps(b.stage), policy);
        debug!(
            "Stage {} on device track {}: {} entries in {} lanes",
            name,
            device.track,
            bucket.len(),
            lanes.len()
        );

        for (lane_idx, lane) in lanes.iter().enumerate() {
            let lane_name = format!("{name}_{lane_idx}");
            let rank = device.next_rank();
            let track = sink.create_track(&lane_name, &lane_name, device.track, rank, false)?;
            stats.lanes += 1;

            for &idx in lane {
                let Placed { stage, instruction } = bucket[idx];
                sink.add_event(
                    &stage.name,
                    track,
                    stage.start_time,
                    stage.end_time,
                    &[
                        Annotation::new("instruction", &instruction.metadata),
                        Annotation::new("stage", &stage.metadata),
                    ],
                )?;
                stats.events += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::PerfettoSink;
    use crate::test_utils::TrackTree;

    fn stage(name: &str, start: u64, end: u64) -> Stage {
        Stage {
            name: name.to_string(),
            start_time: start,
            end_time: end,
            ..Default::default()
        }
    }

    fn instruction(seq: u64, stages: Vec<Stage>) -> Instruction {
        Instruction {
            thread_id: 0,
            global_seq_num: seq,
            name: format!("inst{seq}"),
            stages,
            ..Default::default()
        }
    }

    fn render_batch(batch: &BatchInstruction, policy: LanePolicy) -> (TrackTree, LayoutStats) {
        let mut sink = PerfettoSink::open(4).unwrap();
        let root = sink.root_track();
        let mut device = DeviceLanes::new(root);
        let stats = render(&mut sink, &mut device, batch, policy).unwrap();
        (TrackTree::from_packets(sink.packets()), stats)
    }

    #[test]
    fn test_overlapping_stages_split_into_lanes() {
        let batch = BatchInstruction {
            instructions: vec![
                instruction(1, vec![stage("Fetch", 0, 10), stage("Exec", 10, 30)]),
                instruction(2, vec![stage("Fetch", 5, 15), stage("Exec", 15, 40)]),
                instruction(3, vec![stage("Fetch", 15, 20), stage("Exec", 40, 50)]),
            ],
        };
        let (tree, stats) = render_batch(&batch, LanePolicy::SmallestFirst);

        // Buckets are visited by name: Exec before Fetch.
        let lanes: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|t| (t.name.clone(), t.rank))
            .collect();
        assert_eq!(
            lanes,
            vec![
                ("Exec_0".to_string(), 0),
                ("Exec_1".to_string(), 1),
                ("Fetch_0".to_string(), 2),
                ("Fetch_1".to_string(), 3),
            ]
        );

        let exec0 = tree.find("Exec_0").unwrap();
        let spans: Vec<_> = tree.slices(exec0).iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(spans, vec![(10, 30), (40, 50)]);
        let fetch0 = tree.find("Fetch_0").unwrap();
        let spans: Vec<_> = tree.slices(fetch0).iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(spans, vec![(0, 10), (15, 20)]);

        assert_eq!(stats.lanes, 4);
        assert_eq!(stats.events, 6);
    }

    #[test]
    fn test_equal_starts_keep_encounter_order() {
        let batch = BatchInstruction {
            instructions: vec![
                instruction(1, vec![stage("Exec", 10, 20)]),
                instruction(2, vec![stage("Exec", 0, 5)]),
                instruction(3, vec![stage("Exec", 10, 12)]),
            ],
        };
        let (tree, _) = render_batch(&batch, LanePolicy::SmallestFirst);
        let exec0 = tree.find("Exec_0").unwrap();
        let exec1 = tree.find("Exec_1").unwrap();
        let spans0: Vec<_> = tree.slices(exec0).iter().map(|s| (s.start, s.end)).collect();
        let spans1: Vec<_> = tree.slices(exec1).iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(spans0, vec![(0, 5), (10, 20)]);
        assert_eq!(spans1, vec![(10, 12)]);
    }

    #[test]
    fn test_both_metadata_namespaces_are_kept() {
        let mut st = stage("Exec", 0, 10);
        st.metadata.insert("unit".to_string(), "alu0".to_string());
        let mut inst = instruction(1, vec![st]);
        inst.metadata.insert("unit".to_string(), "core1".to_string());
        let batch = BatchInstruction {
            instructions: vec![inst],
        };

        let (tree, _) = render_batch(&batch, LanePolicy::SmallestFirst);
        let exec0 = tree.find("Exec_0").unwrap();
        let slice = &tree.slices(exec0)[0];
        assert_eq!(slice.annotation("instruction", "unit"), Some("core1"));
        assert_eq!(slice.annotation("stage", "unit"), Some("alu0"));
    }

    #[test]
    fn test_ranks_continue_across_batches() {
        let mut sink = PerfettoSink::open(4).unwrap();
        let root = sink.root_track();
        let mut device = DeviceLanes::new(root);
        let first = BatchInstruction {
            instructions: vec![instruction(1, vec![stage("Exec", 0, 10)])],
        };
        let second = BatchInstruction {
            instructions: vec![instruction(2, vec![stage("Exec", 0, 10)])],
        };
        render(&mut sink, &mut device, &first, LanePolicy::SmallestFirst).unwrap();
        render(&mut sink, &mut device, &second, LanePolicy::SmallestFirst).unwrap();

        let tree = TrackTree::from_packets(sink.packets());
        let ranks: Vec<_> = tree
            .children(root)
            .iter()
            .map(|t| (t.name.clone(), t.rank))
            .collect();
        assert_eq!(
            ranks,
            vec![("Exec_0".to_string(), 0), ("Exec_0".to_string(), 1)]
        );
    }
}
