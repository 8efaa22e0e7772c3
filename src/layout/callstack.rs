//! Call-stack mode: one lane per thread.
//!
//! CALL pushes its timestamp on the thread's pending stack. RETURN pops the
//! most recent CALL and emits one slice from the call to the return, titled
//! and annotated with the RETURN event. POINT emits an instant. Events are
//! taken in batch order; nothing is re-sorted by timestamp.

use anyhow::Result;
use tracing::warn;

use super::{DeviceLanes, LayoutStats, ThreadLane};
use crate::error::ShowError;
use crate::model::{BatchFunction, FunctionKind};
use crate::sink::{Annotation, RenderSink};

pub fn render(
    sink: &mut dyn RenderSink,
    device: &mut DeviceLanes,
    batch: &BatchFunction,
) -> Result<LayoutStats> {
    let mut stats = LayoutStats::default();

    for func in &batch.functions {
        if !device.threads.contains_key(&func.thread_id) {
            let name = format!("function_t{}", func.thread_id);
            let rank = i32::try_from(func.thread_id).unwrap_or(i32::MAX);
            let track = sink.create_track(&name, &name, device.track, rank, false)?;
            device.threads.insert(
                func.thread_id,
                ThreadLane {
                    track,
                    pending: Vec::new(),
                },
            );
            stats.lanes += 1;
        }
        let Some(lane) = device.threads.get_mut(&func.thread_id) else {
            continue;
        };

        let annotations = [Annotation::new("function", &func.metadata)];
        match func.inst_type {
            FunctionKind::Call => lane.pending.push(func.timestamp),
            FunctionKind::Return => match lane.pending.pop() {
                Some(called_at) => {
                    sink.add_event(
                        &func.name,
                        lane.track,
                        called_at,
                        func.timestamp,
                        &annotations,
                    )?;
                    stats.events += 1;
                }
                None => {
                    let err = ShowError::MalformedSequence {
                        thread_id: func.thread_id,
                        timestamp: func.timestamp,
                        name: func.name.clone(),
                    };
                    warn!("Dropping event: {}", err);
                    stats.dropped_returns += 1;
                }
            },
            FunctionKind::Point => {
                sink.add_event(
                    &func.name,
                    lane.track,
                    func.timestamp,
                    func.timestamp,
                    &annotations,
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
    use crate::model::FunctionEvent;
    use crate::sink::PerfettoSink;
    use crate::test_utils::TrackTree;

    fn event(thread_id: u32, timestamp: u64, kind: FunctionKind, name: &str) -> FunctionEvent {
        FunctionEvent {
            thread_id,
            timestamp,
            inst_type: kind,
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn run(batches: &[BatchFunction]) -> (PerfettoSink, DeviceLanes, LayoutStats) {
        let mut sink = PerfettoSink::open(4).unwrap();
        let mut device = DeviceLanes::new(sink.root_track());
        let mut stats = LayoutStats::default();
        for batch in batches {
            stats += render(&mut sink, &mut device, batch).unwrap();
        }
        (sink, device, stats)
    }

    #[test]
    fn test_nested_calls_produce_nested_slices() {
        let batch = BatchFunction {
            functions: vec![
                event(1, 10, FunctionKind::Call, "outer"),
                event(1, 20, FunctionKind::Call, "inner"),
                event(1, 30, FunctionKind::Return, "inner"),
                event(1, 40, FunctionKind::Return, "outer"),
            ],
        };
        let (sink, _, stats) = run(&[batch]);
        let tree = TrackTree::from_packets(sink.packets());
        let track = sink.track_by_name("function_t1").unwrap();
        let spans: Vec<_> = tree
            .slices(track)
            .iter()
            .map(|s| (s.title.clone(), s.start, s.end))
            .collect();
        assert_eq!(
            spans,
            vec![
                ("inner".to_string(), 20, 30),
                ("outer".to_string(), 10, 40)
            ]
        );
        assert_eq!(stats.events, 2);
        assert_eq!(stats.lanes, 1);
    }

    #[test]
    fn test_return_without_call_is_dropped() {
        let batch = BatchFunction {
            functions: vec![
                event(3, 5, FunctionKind::Return, "orphan"),
                event(3, 6, FunctionKind::Point, "tick"),
            ],
        };
        let (sink, _, stats) = run(&[batch]);
        let tree = TrackTree::from_packets(sink.packets());
        let track = sink.track_by_name("function_t3").unwrap();
        let slices = tree.slices(track);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].title, "tick");
        assert_eq!((slices[0].start, slices[0].end), (6, 6));
        assert_eq!(stats.dropped_returns, 1);
        assert_eq!(stats.events, 1);
    }

    #[test]
    fn test_thread_lanes_ranked_by_thread_id() {
        let batch = BatchFunction {
            functions: vec![
                event(7, 1, FunctionKind::Point, "a"),
                event(2, 2, FunctionKind::Point, "b"),
                event(7, 3, FunctionKind::Point, "c"),
            ],
        };
        let (sink, device, stats) = run(&[batch]);
        assert_eq!(stats.lanes, 2);
        assert_eq!(device.threads.len(), 2);

        let tree = TrackTree::from_packets(sink.packets());
        let lanes: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|t| (t.name.clone(), t.rank))
            .collect();
        assert_eq!(
            lanes,
            vec![
                ("function_t2".to_string(), 2),
                ("function_t7".to_string(), 7)
            ]
        );
    }

    #[test]
    fn test_pending_calls_carry_across_batches() {
        let first = BatchFunction {
            functions: vec![event(1, 10, FunctionKind::Call, "main")],
        };
        let second = BatchFunction {
            functions: vec![event(1, 90, FunctionKind::Return, "main")],
        };
        let (sink, _, stats) = run(&[first, second]);
        assert_eq!(stats.lanes, 1);
        let tree = TrackTree::from_packets(sink.packets());
        let track = sink.track_by_name("function_t1").unwrap();
        let spans: Vec<_> = tree.slices(track).iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(spans, vec![(10, 90)]);
    }
}
