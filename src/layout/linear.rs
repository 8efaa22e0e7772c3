//! Linear mode: one lane per instruction, stages in stored order.

use anyhow::Result;

use super::{DeviceLanes, LayoutStats};
use crate::model::BatchInstruction;
use crate::sink::{Annotation, RenderSink};

pub fn render(
    sink: &mut dyn RenderSink,
    device: &mut DeviceLanes,
    batch: &BatchInstruction,
) -> Result<LayoutStats> {
    let mut stats = LayoutStats::default();
    for instruction in &batch.instructions {
        let name = format!(
            "inst_{}_{}",
            instruction.thread_id, instruction.global_seq_num
        );
        let rank = device.next_rank();
        let track = sink.create_track(&name, &instruction.name, device.track, rank, true)?;
        stats.lanes += 1;

        for stage in &instruction.stages {
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
    Ok(stats)
}
