//! Counter mode: one counter track per counter name, samples in stored order.

use anyhow::Result;

use super::{DeviceLanes, LayoutStats};
use crate::model::BatchCounter;
use crate::sink::RenderSink;

pub fn render(
    sink: &mut dyn RenderSink,
    device: &mut DeviceLanes,
    batch: &BatchCounter,
) -> Result<LayoutStats> {
    let mut stats = LayoutStats::default();

    for counter in &batch.counters {
        let track = match device.counters.get(&counter.name) {
            Some(track) => *track,
            None => {
                let name = format!("counter_{}", counter.name);
                let track = sink.create_counter_track(&name, &counter.unit, device.track)?;
                device.counters.insert(counter.name.clone(), track);
                stats.lanes += 1;
                track
            }
        };

        for sample in &counter.values {
            sink.add_counter_sample(track, sample.timestamp, sample.value)?;
            stats.counter_samples += 1;
        }
    }

    Ok(stats)
}
